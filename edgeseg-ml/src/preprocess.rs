use anyhow::{Result, ensure};
use candle_core::{DType, Device, Tensor};
use image::{DynamicImage, imageops::FilterType};
use tracing::instrument;

/// ImageNet channel statistics the backbones were trained with, RGB order.
pub const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Resizes `image` to exactly `size` (width, height) and normalizes it.
///
/// Returns a `(3, height, width)` `f32` tensor on `device`. The aspect ratio
/// is not preserved.
#[instrument(level = "debug", skip(image, device))]
pub fn preprocess(image: &DynamicImage, size: (u32, u32), device: &Device) -> Result<Tensor> {
    let (width, height) = size;
    ensure!(
        width > 0 && height > 0,
        "input size must be positive, got {width}x{height}"
    );
    let resized = image.resize_exact(width, height, FilterType::Triangle);
    let (w, h) = (width as usize, height as usize);

    let mean = Tensor::from_slice(&MEAN, (3, 1, 1), device)?;
    let std = Tensor::from_slice(&STD, (3, 1, 1), device)?;
    let tensor = (Tensor::from_vec(resized.to_rgb8().into_raw(), (h, w, 3), device)?
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?
        * (1. / 255.))?
        .broadcast_sub(&mean)?
        .broadcast_div(&std)?;

    Ok(tensor)
}
