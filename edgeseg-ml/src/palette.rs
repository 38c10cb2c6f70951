use anyhow::{Result, ensure};
use clap::ValueEnum;
use image::{GrayImage, Rgb, RgbImage};
use imageproc::map::{map_pixels, map_pixels2};
use tracing::instrument;

const CITYSCAPES_COLORS: [[u8; 3]; 20] = [
    [128, 64, 128],
    [244, 35, 232],
    [70, 70, 70],
    [102, 102, 156],
    [190, 153, 153],
    [153, 153, 153],
    [250, 170, 30],
    [220, 220, 0],
    [107, 142, 35],
    [152, 251, 152],
    [70, 130, 180],
    [220, 20, 60],
    [255, 0, 0],
    [0, 0, 142],
    [0, 0, 70],
    [0, 60, 100],
    [0, 80, 100],
    [0, 0, 230],
    [119, 11, 32],
    [0, 0, 0],
];

const VOC_COLORS: usize = 256;

/// Built-in color palettes for label maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, strum::Display)]
#[value(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Palette {
    Cityscapes,
    Voc,
    /// Hues spaced evenly around the color wheel, one per class.
    Hsv,
}

impl Palette {
    /// Resolves the palette for a model that predicts `num_classes` classes.
    pub fn colors(self, num_classes: usize) -> ColorMap {
        let colors = match self {
            Palette::Cityscapes => CITYSCAPES_COLORS.iter().map(|c| Rgb(*c)).collect(),
            Palette::Voc => (0..VOC_COLORS).map(voc_color).collect(),
            Palette::Hsv => (0..num_classes)
                .map(|i| hsv_to_rgb(i as f32 * 360.0 / num_classes as f32))
                .collect(),
        };
        ColorMap { colors }
    }
}

/// A resolved palette. Labels without an entry render black.
#[derive(Debug, Clone)]
pub struct ColorMap {
    colors: Vec<Rgb<u8>>,
}

impl ColorMap {
    pub fn color(&self, label: u8) -> Rgb<u8> {
        self.colors
            .get(label as usize)
            .copied()
            .unwrap_or(Rgb([0, 0, 0]))
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}

// PASCAL VOC devkit colormap: bits of the index spread over the channels
fn voc_color(index: usize) -> Rgb<u8> {
    let (mut r, mut g, mut b) = (0u8, 0u8, 0u8);
    let mut c = index;
    for j in 0..8 {
        r |= ((c & 1) as u8) << (7 - j);
        g |= (((c >> 1) & 1) as u8) << (7 - j);
        b |= (((c >> 2) & 1) as u8) << (7 - j);
        c >>= 3;
    }
    Rgb([r, g, b])
}

fn hsv_to_rgb(hue: f32) -> Rgb<u8> {
    let h = hue.rem_euclid(360.0) / 60.0;
    let x = 1.0 - (h % 2.0 - 1.0).abs();
    let (r, g, b) = match h as u32 {
        0 => (1.0, x, 0.0),
        1 => (x, 1.0, 0.0),
        2 => (0.0, 1.0, x),
        3 => (0.0, x, 1.0),
        4 => (x, 0.0, 1.0),
        _ => (1.0, 0.0, x),
    };
    let scale = |v: f32| (v * 255.0).round() as u8;
    Rgb([scale(r), scale(g), scale(b)])
}

/// Maps every label of `labels` to its palette color.
#[instrument(level = "debug", skip_all)]
pub fn colorize(labels: &GrayImage, colors: &ColorMap) -> RgbImage {
    map_pixels(labels, |pixel| colors.color(pixel[0]))
}

/// Blends `colors` over `image`. `alpha` is the weight of the color map.
#[instrument(level = "debug", skip(image, colors))]
pub fn overlay(image: &RgbImage, colors: &RgbImage, alpha: f32) -> Result<RgbImage> {
    ensure!(
        image.dimensions() == colors.dimensions(),
        "overlay dimensions mismatch: image is {:?}, colors are {:?}",
        image.dimensions(),
        colors.dimensions()
    );
    ensure!(
        (0.0..=1.0).contains(&alpha),
        "overlay alpha must be within [0, 1], got {alpha}"
    );

    Ok(map_pixels2(image, colors, |a: Rgb<u8>, b: Rgb<u8>| {
        let mix = |a: u8, b: u8| (a as f32 * (1.0 - alpha) + b as f32 * alpha).round() as u8;
        Rgb([mix(a[0], b[0]), mix(a[1], b[1]), mix(a[2], b[2])])
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_zero_labels_render_palette_entry_zero() {
        let labels = GrayImage::new(8, 5);
        for palette in [Palette::Cityscapes, Palette::Voc, Palette::Hsv] {
            let colors = palette.colors(20);
            let image = colorize(&labels, &colors);
            assert_eq!(image.dimensions(), (8, 5));
            assert!(image.pixels().all(|p| *p == colors.color(0)));
        }
    }

    #[test]
    fn voc_colormap() {
        let colors = Palette::Voc.colors(21);
        assert_eq!(colors.len(), 256);
        assert_eq!(colors.color(0), Rgb([0, 0, 0]));
        assert_eq!(colors.color(1), Rgb([128, 0, 0]));
        assert_eq!(colors.color(2), Rgb([0, 128, 0]));
        assert_eq!(colors.color(15), Rgb([192, 128, 128]));
        assert_eq!(colors.color(255), Rgb([224, 224, 192]));
    }

    #[test]
    fn cityscapes_colormap() {
        let colors = Palette::Cityscapes.colors(20);
        assert_eq!(colors.color(0), Rgb([128, 64, 128]));
        assert_eq!(colors.color(13), Rgb([0, 0, 142]));
        // no entry for the ignore label
        assert_eq!(colors.color(255), Rgb([0, 0, 0]));
    }

    #[test]
    fn hsv_colors_are_distinct() {
        let colors = Palette::Hsv.colors(20);
        assert_eq!(colors.len(), 20);
        assert_eq!(colors.color(0), Rgb([255, 0, 0]));
        let distinct: std::collections::HashSet<_> = (0..20).map(|i| colors.color(i).0).collect();
        assert_eq!(distinct.len(), 20);
    }

    #[test]
    fn overlay_weights() -> Result<()> {
        let image = RgbImage::from_pixel(3, 2, Rgb([200, 100, 0]));
        let colors = RgbImage::from_pixel(3, 2, Rgb([0, 100, 200]));

        assert_eq!(overlay(&image, &colors, 1.0)?, colors);
        assert_eq!(overlay(&image, &colors, 0.0)?, image);
        let half = overlay(&image, &colors, 0.5)?;
        assert!(half.pixels().all(|p| *p == Rgb([100, 100, 100])));
        Ok(())
    }

    #[test]
    fn overlay_rejects_mismatched_sizes() {
        let image = RgbImage::new(3, 2);
        let colors = RgbImage::new(2, 3);
        assert!(overlay(&image, &colors, 0.5).is_err());
    }
}
