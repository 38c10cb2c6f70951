use edgeseg_ml::{ColorMap, Palette, colorize, overlay};
use image::{GrayImage, RgbImage};

use crate::error::{Error, Result};

/// Turns predicted class indices into a color image.
#[derive(Debug, Clone)]
pub struct Renderer {
    colors: ColorMap,
    overlay: Option<f32>,
}

impl Renderer {
    /// With `overlay` set, the colors are blended over the input image with
    /// that weight instead of replacing it.
    pub fn new(palette: Palette, classes: usize, overlay: Option<f32>) -> Result<Self> {
        if let Some(alpha) = overlay
            && !(0.0..=1.0).contains(&alpha)
        {
            return Err(Error::Unsupported(format!(
                "overlay alpha must be within [0, 1], got {alpha}"
            )));
        }
        let colors = palette.colors(classes);
        if colors.len() < classes {
            tracing::warn!(
                %palette,
                colors = colors.len(),
                classes,
                "palette has fewer colors than classes, the rest render black"
            );
        }
        Ok(Self { colors, overlay })
    }

    pub fn render(&self, image: &RgbImage, labels: &GrayImage) -> Result<RgbImage> {
        let colors = colorize(labels, &self.colors);
        match self.overlay {
            Some(alpha) => Ok(overlay(image, &colors, alpha)?),
            None => Ok(colors),
        }
    }
}

#[cfg(test)]
mod tests {
    use image::{Luma, Rgb};

    use super::*;

    #[test]
    fn plain_colors() -> Result<()> {
        let renderer = Renderer::new(Palette::Voc, 21, None)?;
        let labels = GrayImage::from_pixel(4, 3, Luma([1]));
        let image = RgbImage::from_pixel(4, 3, Rgb([10, 20, 30]));
        let rendered = renderer.render(&image, &labels)?;
        assert!(rendered.pixels().all(|p| *p == Rgb([128, 0, 0])));
        Ok(())
    }

    #[test]
    fn blended_colors() -> Result<()> {
        let renderer = Renderer::new(Palette::Voc, 21, Some(0.5))?;
        let labels = GrayImage::from_pixel(2, 2, Luma([1]));
        let image = RgbImage::from_pixel(2, 2, Rgb([0, 100, 200]));
        let rendered = renderer.render(&image, &labels)?;
        assert_eq!(*rendered.get_pixel(0, 0), Rgb([64, 50, 100]));
        Ok(())
    }

    #[test]
    fn rejects_alpha_out_of_range() {
        assert!(Renderer::new(Palette::Cityscapes, 20, Some(1.5)).is_err());
        assert!(Renderer::new(Palette::Cityscapes, 20, Some(-0.1)).is_err());
    }
}
