use anyhow::{Result, ensure};
use candle_core::{Module, Tensor};
use image::{DynamicImage, GenericImageView, GrayImage};
use tracing::instrument;

use crate::{ExecutionContext, postprocess, preprocess};

/// Runs a segmentation network on whole images.
///
/// The model is any `Module` mapping a `(1, 3, H, W)` batch to
/// `(1, classes, H, W)` scores. It is only ever evaluated, never trained.
pub struct Segmenter<M> {
    model: M,
    context: ExecutionContext,
    input_size: (u32, u32),
    classes: usize,
}

impl<M: Module> Segmenter<M> {
    /// `input_size` is the (width, height) every image is resized to before
    /// the forward pass.
    pub fn new(
        model: M,
        context: ExecutionContext,
        input_size: (u32, u32),
        classes: usize,
    ) -> Self {
        Self {
            model,
            context,
            input_size,
            classes,
        }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn classes(&self) -> usize {
        self.classes
    }

    /// Predicts a label map with the dimensions of `image`.
    #[instrument(level = "debug", skip_all)]
    pub fn predict(&self, image: &DynamicImage) -> Result<GrayImage> {
        let original_dimensions = image.dimensions();
        let input = preprocess(image, self.input_size, self.context.device())?;
        let scores = self.forward(&input)?;
        postprocess(&scores, original_dimensions)
    }

    #[instrument(level = "debug", skip_all)]
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let scores = self.model.forward(&input.unsqueeze(0)?)?.squeeze(0)?;
        let (channels, _, _) = scores.dims3()?;
        ensure!(
            channels == self.classes,
            "model produced {channels} channels, expected {} classes",
            self.classes
        );
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, IndexOp};
    use image::{Rgb, RgbImage};

    use super::*;

    fn constant_winner(winner: usize, classes: usize) -> impl Module {
        move |xs: &Tensor| -> candle_core::Result<Tensor> {
            let (b, _, h, w) = xs.dims4()?;
            let mut channels = Vec::with_capacity(classes);
            for class in 0..classes {
                let value = if class == winner { 1.0 } else { 0.0 };
                channels.push((Tensor::ones((b, 1, h, w), DType::F32, xs.device())? * value)?);
            }
            Tensor::cat(&channels, 1)
        }
    }

    #[test]
    fn label_map_has_original_dimensions() -> Result<()> {
        let segmenter =
            Segmenter::new(constant_winner(2, 3), ExecutionContext::cpu(), (16, 8), 3);
        let image = DynamicImage::ImageRgb8(RgbImage::new(40, 30));

        let labels = segmenter.predict(&image)?;
        assert_eq!(labels.dimensions(), (40, 30));
        assert!(labels.pixels().all(|p| p[0] == 2));
        Ok(())
    }

    #[test]
    fn scores_follow_the_input() -> Result<()> {
        // class 0 where the red channel is above the mean, class 1 elsewhere
        let model = |xs: &Tensor| -> candle_core::Result<Tensor> {
            let red = xs.i((.., 0..1, .., ..))?;
            Tensor::cat(&[&red, &red.neg()?], 1)
        };
        let segmenter = Segmenter::new(model, ExecutionContext::cpu(), (32, 16), 2);
        let image = DynamicImage::ImageRgb8(RgbImage::from_fn(64, 20, |x, _| {
            if x < 32 { Rgb([255, 0, 0]) } else { Rgb([0, 0, 0]) }
        }));

        let labels = segmenter.predict(&image)?;
        assert_eq!(labels.get_pixel(0, 0)[0], 0);
        assert_eq!(labels.get_pixel(10, 19)[0], 0);
        assert_eq!(labels.get_pixel(63, 0)[0], 1);
        assert_eq!(labels.get_pixel(50, 10)[0], 1);
        Ok(())
    }

    #[test]
    fn rejects_unexpected_class_count() {
        let segmenter =
            Segmenter::new(constant_winner(0, 3), ExecutionContext::cpu(), (8, 8), 20);
        let image = DynamicImage::ImageRgb8(RgbImage::new(8, 8));
        let err = segmenter.predict(&image).unwrap_err();
        assert!(err.to_string().contains("expected 20 classes"));
    }

    #[test]
    fn exposes_configuration() {
        let segmenter =
            Segmenter::new(constant_winner(0, 3), ExecutionContext::cpu(), (8, 8), 3);
        assert_eq!(segmenter.classes(), 3);
        assert_eq!(segmenter.context().name(), crate::DeviceName::Cpu);
    }
}
