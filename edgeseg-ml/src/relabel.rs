//! Translation of contiguous training ids to official Cityscapes label ids.

use anyhow::{Result, bail};
use image::GrayImage;
use tracing::instrument;

/// Label value that evaluation ignores.
pub const IGNORE_LABEL: u8 = 255;

/// Cityscapes label id for every training id in `0..=19`.
///
/// Training id 19 is the background class and ends on the ignore label.
const TRAIN_TO_LABEL_ID: [u8; 20] = [
    7, 8, 11, 12, 13, 17, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 31, 32, 33, IGNORE_LABEL,
];

/// Maps a single training id. Returns `None` for values without a mapping.
pub fn relabel_id(label: u8) -> Option<u8> {
    match label {
        IGNORE_LABEL => Some(IGNORE_LABEL),
        _ => TRAIN_TO_LABEL_ID.get(label as usize).copied(),
    }
}

/// Maps every pixel of a training-id label map to its Cityscapes label id.
///
/// Every pixel is looked up exactly once, so a destination value is never
/// substituted again. Pixels already holding [`IGNORE_LABEL`] are kept;
/// any other value outside `0..=19` is an error.
#[instrument(level = "debug", skip_all)]
pub fn relabel(labels: &GrayImage) -> Result<GrayImage> {
    let mut output = GrayImage::new(labels.width(), labels.height());
    for (x, y, pixel) in labels.enumerate_pixels() {
        let Some(id) = relabel_id(pixel[0]) else {
            bail!("label {} at ({x}, {y}) has no Cityscapes label id", pixel[0]);
        };
        output.put_pixel(x, y, image::Luma([id]));
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn documented_destinations() {
        assert_eq!(relabel_id(0), Some(7));
        assert_eq!(relabel_id(1), Some(8));
        assert_eq!(relabel_id(6), Some(19));
        assert_eq!(relabel_id(7), Some(20));
        assert_eq!(relabel_id(18), Some(33));
        assert_eq!(relabel_id(19), Some(IGNORE_LABEL));
    }

    #[test]
    fn no_collisions() {
        let outputs: HashSet<u8> = (0..=19).filter_map(relabel_id).collect();
        assert_eq!(outputs.len(), 20);
    }

    #[test]
    fn out_of_range_has_no_mapping() {
        assert_eq!(relabel_id(20), None);
        assert_eq!(relabel_id(254), None);
        assert_eq!(relabel_id(IGNORE_LABEL), Some(IGNORE_LABEL));
    }

    #[test]
    fn relabels_whole_map() -> anyhow::Result<()> {
        let labels = GrayImage::from_raw(4, 1, vec![0, 19, 6, 255]).unwrap();
        let ids = relabel(&labels)?;
        assert_eq!(ids.into_raw(), vec![7, 255, 19, 255]);
        Ok(())
    }

    #[test]
    fn input_is_not_modified() -> anyhow::Result<()> {
        let labels = GrayImage::from_raw(2, 1, vec![0, 1]).unwrap();
        let _ = relabel(&labels)?;
        assert_eq!(labels.as_raw(), &vec![0, 1]);
        Ok(())
    }

    #[test]
    fn rejects_unmapped_value() {
        let labels = GrayImage::from_raw(3, 1, vec![0, 1, 42]).unwrap();
        let err = relabel(&labels).unwrap_err();
        assert!(err.to_string().contains("label 42 at (2, 0)"));
    }
}
