//! Print strip assembly: stacks processed photos into a single JPEG.
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use thiserror::Error;
use tracing::debug;

use crate::model::ImageData;

#[derive(Debug, Error)]
pub enum StripError {
    #[error("no images to assemble")]
    Empty,
    #[error("image {index} could not be decoded: {source}")]
    Decode {
        index: usize,
        source: image::ImageError,
    },
    #[error("image {index} is too tall or too narrow for the strip")]
    Proportions { index: usize },
    #[error("strip of {width}x{height} pixels exceeds the canvas limit")]
    TooLarge { width: u64, height: u64 },
    #[error("failed to encode strip: {0}")]
    Encode(image::ImageError),
}

/// A photo may be at most this many times taller than it is wide.
pub const MAX_PHOTO_ASPECT: u64 = 4;
/// Upper bound on strip pixels (about 180 MB of RGB).
pub const MAX_STRIP_PIXELS: u64 = 60_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripLayout {
    /// Width of each photo inside the strip.
    pub photo_width: u32,
    pub margin: u32,
    pub background: [u8; 3],
}

impl Default for StripLayout {
    fn default() -> Self {
        Self {
            photo_width: 600,
            margin: 24,
            background: [255, 255, 255],
        }
    }
}

pub fn compose_strip(images: &[ImageData], layout: StripLayout) -> Result<ImageData, StripError> {
    if images.is_empty() {
        return Err(StripError::Empty);
    }

    let decoded = images
        .iter()
        .enumerate()
        .map(|(index, img)| {
            image::load_from_memory(&img.bytes).map_err(|source| StripError::Decode { index, source })
        })
        .collect::<Result<Vec<DynamicImage>, StripError>>()?;

    // Size everything before the first resize allocates.
    let heights = decoded
        .iter()
        .enumerate()
        .map(|(index, img)| scaled_height(img, layout.photo_width, index))
        .collect::<Result<Vec<u32>, StripError>>()?;
    let (width, height) = canvas_size(&heights, layout)?;

    let mut canvas = RgbImage::from_pixel(width, height, Rgb(layout.background));
    let mut y = layout.margin;
    for (img, photo_height) in decoded.iter().zip(&heights) {
        let photo = imageops::resize(&img.to_rgb8(), layout.photo_width, *photo_height, FilterType::Triangle);
        imageops::overlay(&mut canvas, &photo, i64::from(layout.margin), i64::from(y));
        y += photo_height + layout.margin;
    }
    debug!(photos = heights.len(), width, height, "strip assembled");

    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(canvas)
        .write_to(&mut out, ImageFormat::Jpeg)
        .map_err(StripError::Encode)?;
    Ok(ImageData::jpeg(out.into_inner()))
}

/// Height of `img` once scaled to `width`, refusing degenerate proportions.
fn scaled_height(img: &DynamicImage, width: u32, index: usize) -> Result<u32, StripError> {
    let scaled = u64::from(img.height()) * u64::from(width) / u64::from(img.width().max(1));
    if scaled > u64::from(width) * MAX_PHOTO_ASPECT {
        return Err(StripError::Proportions { index });
    }
    // Bounded by width * MAX_PHOTO_ASPECT, so it fits.
    Ok(scaled.max(1) as u32)
}

fn canvas_size(heights: &[u32], layout: StripLayout) -> Result<(u32, u32), StripError> {
    let margin = u64::from(layout.margin);
    let width = u64::from(layout.photo_width) + 2 * margin;
    let height = heights.iter().map(|h| u64::from(*h) + margin).sum::<u64>() + margin;
    let too_large = StripError::TooLarge { width, height };
    if width.saturating_mul(height) > MAX_STRIP_PIXELS {
        return Err(too_large);
    }
    match (u32::try_from(width), u32::try_from(height)) {
        (Ok(w), Ok(h)) => Ok((w, h)),
        _ => Err(too_large),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(width: u32, height: u32) -> ImageData {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 10, 10]));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        ImageData::new("image/png", buf.into_inner())
    }

    #[test]
    fn stacks_photos_vertically() {
        let layout = StripLayout {
            photo_width: 100,
            margin: 10,
            background: [255, 255, 255],
        };
        let strip = compose_strip(&[png(200, 300), png(50, 50), png(400, 200)], layout).unwrap();
        assert_eq!(strip.mime, "image/jpeg");

        let decoded = image::load_from_memory(&strip.bytes).unwrap();
        assert_eq!(decoded.width(), 120);
        // 150 + 100 + 50 photo heights, four margins.
        assert_eq!(decoded.height(), 150 + 100 + 50 + 40);
    }

    #[test]
    fn rejects_degenerate_tall_photo_before_resizing() {
        let err = compose_strip(&[png(10, 10), png(1, 4000)], StripLayout::default()).unwrap_err();
        assert!(matches!(err, StripError::Proportions { index: 1 }));

        // Exactly at the aspect limit is still fine.
        let layout = StripLayout {
            photo_width: 50,
            margin: 0,
            background: [0, 0, 0],
        };
        let strip = compose_strip(&[png(10, 40)], layout).unwrap();
        let decoded = image::load_from_memory(&strip.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (50, 200));
    }

    #[test]
    fn rejects_canvas_over_pixel_budget() {
        let layout = StripLayout {
            photo_width: 4000,
            margin: 10,
            background: [255, 255, 255],
        };
        // Two 1x3 photos become 4000x12000 each: about 97M pixels in total.
        let err = compose_strip(&[png(1, 3), png(1, 3)], layout).unwrap_err();
        assert!(matches!(err, StripError::TooLarge { width: 4020, .. }));
    }

    #[test]
    fn canvas_height_does_not_wrap() {
        let layout = StripLayout {
            photo_width: 100,
            margin: u32::MAX / 2,
            background: [255, 255, 255],
        };
        assert!(matches!(
            canvas_size(&[400, 400, 400], layout),
            Err(StripError::TooLarge { .. })
        ));
    }

    #[test]
    fn rejects_empty_and_garbage() {
        assert!(matches!(
            compose_strip(&[], StripLayout::default()),
            Err(StripError::Empty)
        ));
        let bad = ImageData::jpeg(vec![0, 1, 2, 3]);
        assert!(matches!(
            compose_strip(&[png(10, 10), bad], StripLayout::default()),
            Err(StripError::Decode { index: 1, .. })
        ));
    }
}
