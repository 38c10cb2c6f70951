use anyhow::{Result, anyhow, ensure};
use candle_core::{DType, Device, Tensor};
use image::GrayImage;
use tracing::instrument;

/// Turns per-class scores `(classes, H, W)` into a label map of
/// `original_dimensions` (width, height).
#[instrument(level = "debug", skip(scores))]
pub fn postprocess(scores: &Tensor, original_dimensions: (u32, u32)) -> Result<GrayImage> {
    let (width, height) = original_dimensions;
    let labels = scores.argmax(0)?.to_dtype(DType::U8)?.to_device(&Device::Cpu)?;
    let (h, w) = labels.dims2()?;
    let data: Vec<u8> = labels.flatten_all()?.to_vec1()?;
    let labels = GrayImage::from_raw(w as u32, h as u32, data)
        .ok_or_else(|| anyhow!("failed to build label map"))?;

    resize_labels(&labels, width, height)
}

/// Resizes a label map with nearest-neighbour sampling at pixel centres, so
/// no label value that was not already present can appear.
pub fn resize_labels(labels: &GrayImage, width: u32, height: u32) -> Result<GrayImage> {
    let (w, h) = labels.dimensions();
    ensure!(
        w > 0 && h > 0 && width > 0 && height > 0,
        "cannot resize a {w}x{h} label map to {width}x{height}"
    );

    let columns: Vec<u32> = (0..width).map(|x| nearest(x, width, w)).collect();
    let rows: Vec<u32> = (0..height).map(|y| nearest(y, height, h)).collect();
    Ok(GrayImage::from_fn(width, height, |x, y| {
        *labels.get_pixel(columns[x as usize], rows[y as usize])
    }))
}

// source index whose cell contains the centre of destination cell `dst`
fn nearest(dst: u32, dst_len: u32, src_len: u32) -> u32 {
    let src = (2 * dst as u64 + 1) * src_len as u64 / (2 * dst_len as u64);
    (src as u32).min(src_len - 1)
}
