mod model;

use std::path::Path;

use anyhow::{Result, bail};
use candle_core::Device;
use tracing::instrument;

use crate::loading::{load_var_builder, strip_data_parallel};

pub use model::EspNetV2;

/// Output channels of encoder levels 1-4 for every released width scale.
const SCALE_CHANNELS: &[(f64, [usize; 4])] = &[
    (0.5, [16, 32, 64, 128]),
    (1.0, [32, 64, 128, 256]),
    (1.25, [32, 80, 160, 320]),
    (1.5, [32, 96, 192, 384]),
    (2.0, [32, 128, 256, 512]),
];

// first tensor of the graph, used to detect the checkpoint layout
const PROBE_TENSOR: &str = "net.level1.conv.weight";

pub fn channels_for_scale(scale: f64) -> Result<[usize; 4]> {
    match SCALE_CHANNELS
        .iter()
        .find(|(s, _)| (s - scale).abs() < f64::EPSILON)
    {
        Some((_, channels)) => Ok(*channels),
        None => bail!(
            "ESPNetv2 scale {scale} is not supported, expected one of {:?}",
            SCALE_CHANNELS.iter().map(|(s, _)| *s).collect::<Vec<_>>()
        ),
    }
}

pub fn supported_scales() -> impl Iterator<Item = f64> {
    SCALE_CHANNELS.iter().map(|(s, _)| *s)
}

impl EspNetV2 {
    /// Loads a segmentation checkpoint trained with width `scale` for
    /// `classes` output classes.
    #[instrument(level = "info", skip(device))]
    pub fn from_file(path: &Path, scale: f64, classes: usize, device: &Device) -> Result<Self> {
        let channels = channels_for_scale(scale)?;
        let vb = load_var_builder(path, device)?;
        let vb = strip_data_parallel(vb, PROBE_TENSOR);
        let model = Self::load(vb, &channels, classes)?;
        tracing::info!("weights loaded from {}", path.display());
        Ok(model)
    }
}
