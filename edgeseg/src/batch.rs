use std::{
    fs,
    path::{Path, PathBuf},
};

use candle_core::Module;
use edgeseg_ml::{Segmenter, relabel};
use image::DynamicImage;
use tracing::instrument;

use crate::{
    error::{Error, Result},
    progress::progress_bar,
    render::Renderer,
};

/// Where a batch run writes its outputs.
#[derive(Debug, Clone)]
pub struct OutputDirs {
    pub labels: PathBuf,
    pub color: PathBuf,
}

impl OutputDirs {
    pub fn new(savedir: &Path) -> Self {
        Self {
            labels: savedir.join("labels"),
            color: savedir.join("color"),
        }
    }

    fn create(&self) -> Result<()> {
        fs::create_dir_all(&self.labels)?;
        fs::create_dir_all(&self.color)?;
        Ok(())
    }
}

/// Segments every image in order and writes one label map and one color
/// image per input, both named after the input's file stem.
///
/// With `label_ids` set the label map holds official label ids instead of
/// training ids. Any failure stops the run.
#[instrument(level = "info", skip_all, fields(images = images.len()))]
pub fn run<M: Module>(
    segmenter: &Segmenter<M>,
    renderer: &Renderer,
    images: &[PathBuf],
    outputs: &OutputDirs,
    label_ids: bool,
) -> Result<usize> {
    outputs.create()?;
    let pb = progress_bar("segmenting", images.len() as u64);

    for path in images {
        segment_file(segmenter, renderer, path, outputs, label_ids)?;
        pb.inc(1);
    }

    pb.finish_and_clear();
    tracing::info!(
        labels = %outputs.labels.display(),
        color = %outputs.color.display(),
        "segmented {} images",
        images.len()
    );
    Ok(images.len())
}

#[instrument(level = "debug", skip(segmenter, renderer, outputs), fields(path = %path.display()))]
fn segment_file<M: Module>(
    segmenter: &Segmenter<M>,
    renderer: &Renderer,
    path: &Path,
    outputs: &OutputDirs,
    label_ids: bool,
) -> Result<()> {
    let name = output_name(path)?;
    let image: DynamicImage = image::open(path)?;
    let labels = segmenter.predict(&image)?;

    let rendered = renderer.render(&image.to_rgb8(), &labels)?;
    let labels = if label_ids { relabel(&labels)? } else { labels };

    labels.save(outputs.labels.join(&name))?;
    rendered.save(outputs.color.join(&name))?;
    Ok(())
}

/// `<stem>.png`, whatever the input format.
fn output_name(path: &Path) -> Result<String> {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| Error::Unsupported(format!("unusable file name: {}", path.display())))?;
    Ok(format!("{stem}.png"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_names() -> Result<()> {
        assert_eq!(
            output_name(Path::new("data/leftImg8bit/val/munster/munster_000001_leftImg8bit.png"))?,
            "munster_000001_leftImg8bit.png"
        );
        assert_eq!(output_name(Path::new("VOC2012/JPEGImages/2007_000033.jpg"))?, "2007_000033.png");
        Ok(())
    }

    #[test]
    fn output_dirs() {
        let outputs = OutputDirs::new(Path::new("results"));
        assert_eq!(outputs.labels, Path::new("results/labels"));
        assert_eq!(outputs.color, Path::new("results/color"));
    }
}
