#[cfg(feature = "camera")]
pub use live::run;

#[cfg(not(feature = "camera"))]
pub fn run<M: candle_core::Module>(
    _segmenter: &edgeseg_ml::Segmenter<M>,
    _renderer: &crate::render::Renderer,
    _index: i32,
) -> crate::error::Result<usize> {
    Err(crate::error::Error::Unsupported(
        "camera source requires building with the `camera` feature".to_string(),
    ))
}

#[cfg(feature = "camera")]
mod live {
    use candle_core::Module;
    use edgeseg_ml::Segmenter;
    use image::{DynamicImage, RgbImage};
    use opencv::{
        core::Mat,
        highgui, imgproc,
        prelude::*,
        videoio::{self, VideoCapture},
    };
    use tracing::instrument;

    use crate::{
        error::{Error, Result},
        render::Renderer,
    };

    const INPUT_WINDOW: &str = "Image";
    const RESULT_WINDOW: &str = "Segmentation";
    const ESCAPE: i32 = 27;

    /// Segments frames from a capture device until Esc is pressed or the
    /// device stops delivering frames.
    #[instrument(level = "info", skip(segmenter, renderer))]
    pub fn run<M: Module>(segmenter: &Segmenter<M>, renderer: &Renderer, index: i32) -> Result<usize> {
        let mut capture = VideoCapture::new(index, videoio::CAP_ANY)?;
        if !capture.is_opened()? {
            return Err(Error::Camera(format!("cannot open capture device {index}")));
        }

        let mut frame = Mat::default();
        let mut frames = 0;
        loop {
            if !capture.read(&mut frame)? || frame.empty() {
                tracing::warn!("capture device returned no frame");
                break;
            }
            highgui::imshow(INPUT_WINDOW, &frame)?;
            if highgui::wait_key(1)? == ESCAPE {
                break;
            }

            let image = frame_to_rgb(&frame)?;
            let labels = segmenter.predict(&DynamicImage::ImageRgb8(image.clone()))?;
            let rendered = renderer.render(&image, &labels)?;
            highgui::imshow(RESULT_WINDOW, &rgb_to_frame(&rendered)?)?;
            frames += 1;
        }

        capture.release()?;
        highgui::destroy_all_windows()?;
        tracing::info!("segmented {frames} frames");
        Ok(frames)
    }

    fn frame_to_rgb(frame: &Mat) -> Result<RgbImage> {
        let mut rgb = Mat::default();
        imgproc::cvt_color_def(frame, &mut rgb, imgproc::COLOR_BGR2RGB)?;
        let (width, height) = (rgb.cols() as u32, rgb.rows() as u32);
        RgbImage::from_raw(width, height, rgb.data_bytes()?.to_vec())
            .ok_or_else(|| Error::Camera(format!("unexpected frame layout {width}x{height}")))
    }

    fn rgb_to_frame(image: &RgbImage) -> Result<Mat> {
        let flat = Mat::from_slice(image.as_raw())?;
        let rgb = flat.reshape(3, image.height() as i32)?.try_clone()?;
        let mut bgr = Mat::default();
        imgproc::cvt_color_def(&rgb, &mut bgr, imgproc::COLOR_RGB2BGR)?;
        Ok(bgr)
    }
}
