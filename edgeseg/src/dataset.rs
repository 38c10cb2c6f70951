use std::path::{Path, PathBuf};

use clap::ValueEnum;
use edgeseg_ml::{
    Palette,
    classes::{CITYSCAPES_CLASSES, VOC_CLASSES},
};
use tracing::instrument;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Datasets the released checkpoints were trained on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum DatasetName {
    City,
    Pascal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Split {
    Val,
    Test,
}

impl DatasetName {
    pub fn classes(self) -> &'static [&'static str] {
        match self {
            DatasetName::City => CITYSCAPES_CLASSES,
            DatasetName::Pascal => VOC_CLASSES,
        }
    }

    pub fn default_palette(self) -> Palette {
        match self {
            DatasetName::City => Palette::Cityscapes,
            DatasetName::Pascal => Palette::Voc,
        }
    }

    /// Whether predictions are translated to official label ids before they
    /// are written.
    pub fn uses_label_ids(self) -> bool {
        matches!(self, DatasetName::City)
    }
}

/// Lists the images of `split` under the dataset `root`.
#[instrument(level = "info", skip(root), fields(root = %root.display()))]
pub fn enumerate(dataset: DatasetName, root: &Path, split: Split) -> Result<Vec<PathBuf>> {
    let images = match dataset {
        DatasetName::City => cityscapes_images(root, split)?,
        DatasetName::Pascal => voc_images(root, split)?,
    };
    tracing::info!("# of images for testing: {}", images.len());
    Ok(images)
}

/// `<root>/leftImg8bit/<split>/*/*.png`
fn cityscapes_images(root: &Path, split: Split) -> Result<Vec<PathBuf>> {
    let base = root.join("leftImg8bit").join(split.to_string());
    let mut images: Vec<PathBuf> = WalkDir::new(&base)
        .follow_links(true)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "png"))
        .collect();

    if images.is_empty() {
        return Err(Error::EmptyDataset {
            pattern: base.join("*").join("*.png").display().to_string(),
        });
    }
    images.sort();
    Ok(images)
}

/// Images listed in `<root>/VOC2012/list/<split>.txt`, one per line.
fn voc_images(root: &Path, split: Split) -> Result<Vec<PathBuf>> {
    let subset = root.join("VOC2012");
    let manifest = subset.join("list").join(format!("{split}.txt"));
    if !manifest.is_file() {
        return Err(Error::MissingFile {
            what: "manifest file",
            path: manifest,
        });
    }

    let images = read_manifest(&manifest, &subset)?;
    if images.is_empty() {
        return Err(Error::EmptyDataset {
            pattern: manifest.display().to_string(),
        });
    }
    Ok(images)
}

/// Resolves the first token of every line against `base`. The first entry
/// that does not exist is an error.
pub fn read_manifest(manifest: &Path, base: &Path) -> Result<Vec<PathBuf>> {
    let contents = std::fs::read_to_string(manifest)?;
    let mut images = Vec::new();
    for line in contents.lines() {
        let Some(relative) = line.split_whitespace().next() else {
            continue;
        };
        let image = base.join(relative);
        if !image.is_file() {
            return Err(Error::MissingFile {
                what: "image file",
                path: image,
            });
        }
        images.push(image);
    }
    Ok(images)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn cityscapes_glob() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let split = dir.path().join("leftImg8bit/val");
        touch(&split.join("munster/munster_000001_leftImg8bit.png"));
        touch(&split.join("frankfurt/frankfurt_000000_leftImg8bit.png"));
        touch(&split.join("frankfurt/notes.txt"));
        touch(&split.join("top_level.png"));
        touch(&split.join("lindau/nested/too_deep.png"));
        touch(&dir.path().join("leftImg8bit/test/berlin/berlin_000000_leftImg8bit.png"));

        let images = enumerate(DatasetName::City, dir.path(), Split::Val)?;
        assert_eq!(
            images,
            vec![
                split.join("frankfurt/frankfurt_000000_leftImg8bit.png"),
                split.join("munster/munster_000001_leftImg8bit.png"),
            ]
        );
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn cityscapes_glob_follows_symlinks() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = dir.path().join("storage");
        touch(&storage.join("munster_000001_leftImg8bit.png"));
        touch(&storage.join("berlin/berlin_000000_leftImg8bit.png"));

        let split = dir.path().join("leftImg8bit/val");
        fs::create_dir_all(split.join("munster"))?;
        std::os::unix::fs::symlink(
            storage.join("munster_000001_leftImg8bit.png"),
            split.join("munster/munster_000001_leftImg8bit.png"),
        )?;
        std::os::unix::fs::symlink(storage.join("berlin"), split.join("berlin"))?;

        let images = enumerate(DatasetName::City, dir.path(), Split::Val)?;
        assert_eq!(
            images,
            vec![
                split.join("berlin/berlin_000000_leftImg8bit.png"),
                split.join("munster/munster_000001_leftImg8bit.png"),
            ]
        );
        Ok(())
    }

    #[test]
    fn empty_cityscapes_split_is_fatal() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("leftImg8bit/val/munster"))?;

        let err = enumerate(DatasetName::City, dir.path(), Split::Val).unwrap_err();
        match err {
            Error::EmptyDataset { pattern } => assert!(pattern.ends_with("*.png")),
            other => panic!("unexpected error: {other}"),
        }

        let missing_root = dir.path().join("nowhere");
        assert!(matches!(
            enumerate(DatasetName::City, &missing_root, Split::Test),
            Err(Error::EmptyDataset { .. })
        ));
        Ok(())
    }

    #[test]
    fn manifest_names_first_missing_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let subset = dir.path().join("VOC2012");
        for name in ["a.jpg", "b.jpg", "c.jpg"] {
            touch(&subset.join("JPEGImages").join(name));
        }
        let manifest = subset.join("list/val.txt");
        touch(&manifest);
        fs::write(
            &manifest,
            "JPEGImages/a.jpg SegmentationClassAug/a.png\n\
             JPEGImages/b.jpg SegmentationClassAug/b.png\n\
             JPEGImages/missing.jpg SegmentationClassAug/missing.png\n\
             JPEGImages/c.jpg SegmentationClassAug/c.png\n",
        )?;

        let err = enumerate(DatasetName::Pascal, dir.path(), Split::Val).unwrap_err();
        match err {
            Error::MissingFile { what, path } => {
                assert_eq!(what, "image file");
                assert_eq!(path, subset.join("JPEGImages/missing.jpg"));
            }
            other => panic!("unexpected error: {other}"),
        }
        Ok(())
    }

    #[test]
    fn manifest_entries_in_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let subset = dir.path().join("VOC2012");
        for name in ["b.jpg", "a.jpg"] {
            touch(&subset.join("JPEGImages").join(name));
        }
        let manifest = subset.join("list/test.txt");
        touch(&manifest);
        fs::write(&manifest, "JPEGImages/b.jpg\n\n   \nJPEGImages/a.jpg extra\n")?;

        let images = enumerate(DatasetName::Pascal, dir.path(), Split::Test)?;
        assert_eq!(
            images,
            vec![
                subset.join("JPEGImages/b.jpg"),
                subset.join("JPEGImages/a.jpg")
            ]
        );
        Ok(())
    }

    #[test]
    fn missing_manifest() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let err = enumerate(DatasetName::Pascal, dir.path(), Split::Val).unwrap_err();
        assert!(matches!(err, Error::MissingFile { what: "manifest file", .. }));
        assert!(err.to_string().contains("val.txt"));
        Ok(())
    }

    #[test]
    fn empty_manifest() -> Result<()> {
        let dir = tempfile::tempdir()?;
        touch(&dir.path().join("VOC2012/list/val.txt"));
        let err = enumerate(DatasetName::Pascal, dir.path(), Split::Val).unwrap_err();
        assert!(matches!(err, Error::EmptyDataset { .. }));
        Ok(())
    }

    #[test]
    fn dataset_properties() {
        assert_eq!(DatasetName::City.classes().len(), 20);
        assert_eq!(DatasetName::Pascal.classes().len(), 21);
        assert_eq!(DatasetName::City.to_string(), "city");
        assert_eq!(Split::Test.to_string(), "test");
        assert!(DatasetName::City.uses_label_ids());
        assert!(!DatasetName::Pascal.uses_label_ids());
    }
}
