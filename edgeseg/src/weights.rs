use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use clap::ValueEnum;
use once_cell::sync::Lazy;
use serde::Deserialize;

use crate::{
    dataset::DatasetName,
    error::{Error, Result},
};

/// Segmentation networks known to the weight table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ModelName {
    Espnetv2,
    Dicenet,
}

const ESPNETV2_SCALES: &[f64] = &[0.5, 1.0, 1.5, 2.0];
const DICENET_SCALES: &[f64] = &[0.75, 1.0, 1.25, 1.5, 1.75, 2.0];
const RELEASED_SIZES: &[(DatasetName, (u32, u32))] = &[
    (DatasetName::Pascal, (256, 256)),
    (DatasetName::Pascal, (384, 384)),
    (DatasetName::City, (512, 256)),
    (DatasetName::City, (1024, 512)),
];

static BUILTIN: Lazy<WeightMap> = Lazy::new(|| {
    let mut map = WeightMap::default();
    for (model, scales) in [
        (ModelName::Espnetv2, ESPNETV2_SCALES),
        (ModelName::Dicenet, DICENET_SCALES),
    ] {
        for &scale in scales {
            for &(dataset, size) in RELEASED_SIZES {
                let dataset_key = dataset_key(dataset, size);
                let weights = PathBuf::from(format!(
                    "model/segmentation/model_zoo/{model}/{model}_s_{scale:?}_{dataset_key}.pth"
                ));
                map.insert(model_key(model, scale), dataset_key, weights);
            }
        }
    }
    map
});

/// `{model}_{scale}`, e.g. `espnetv2_2.0`.
pub fn model_key(model: ModelName, scale: f64) -> String {
    format!("{model}_{scale:?}")
}

/// `{dataset}_{width}x{height}`, e.g. `city_512x256`.
pub fn dataset_key(dataset: DatasetName, size: (u32, u32)) -> String {
    format!("{dataset}_{}x{}", size.0, size.1)
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeightEntry {
    pub weights: PathBuf,
}

/// Weight file locations keyed by model key, then dataset key.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct WeightMap(BTreeMap<String, BTreeMap<String, WeightEntry>>);

impl WeightMap {
    /// The table of released checkpoints.
    pub fn builtin() -> &'static WeightMap {
        &BUILTIN
    }

    /// Reads a table with the same layout from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::MissingFile {
                what: "weight map",
                path: path.to_path_buf(),
            });
        }
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    fn insert(&mut self, model_key: String, dataset_key: String, weights: PathBuf) {
        self.0
            .entry(model_key)
            .or_default()
            .insert(dataset_key, WeightEntry { weights });
    }

    /// Returns the configured path without touching the filesystem.
    pub fn lookup(&self, model_key: &str, dataset_key: &str) -> Result<&Path> {
        let unknown = |missing: &str| Error::UnknownWeightKey {
            model_key: model_key.to_string(),
            dataset_key: dataset_key.to_string(),
            missing: missing.to_string(),
        };
        let datasets = self.0.get(model_key).ok_or_else(|| unknown(model_key))?;
        let entry = datasets
            .get(dataset_key)
            .ok_or_else(|| unknown(dataset_key))?;
        Ok(&entry.weights)
    }

    /// Resolves the weight file of a configuration, relative paths being
    /// taken from `root`. The file must exist.
    pub fn resolve(
        &self,
        model: ModelName,
        scale: f64,
        dataset: DatasetName,
        size: (u32, u32),
        root: &Path,
    ) -> Result<PathBuf> {
        let model_key = model_key(model, scale);
        let dataset_key = dataset_key(dataset, size);
        let weights = root.join(self.lookup(&model_key, &dataset_key)?);
        tracing::debug!(
            model_key = %model_key,
            dataset_key = %dataset_key,
            weights = %weights.display(),
            "weights resolved"
        );

        if !weights.is_file() {
            return Err(Error::MissingFile {
                what: "weight file",
                path: weights,
            });
        }
        Ok(weights)
    }
}
