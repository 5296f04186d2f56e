//! Overlay compositing for positive analyses
//!
//! Blends a translucent red tint over mask-positive pixels of the original
//! image. The original is expanded to RGBA first (grayscale and color take
//! separate expansion paths), the tint layer is zero everywhere the mask is
//! negative, and the blend result drops the alpha channel before it is
//! persisted.

use crate::error::{AnalysisError, Result};
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};

/// Builds visualization rasters from a cleaned mask
pub struct OverlayCompositor;

impl OverlayCompositor {
    /// Composite `tint` (RGBA) at `tint_weight` over every mask-positive
    /// pixel of `original`.
    ///
    /// The output has the original's spatial dimensions and exactly three
    /// channels.
    ///
    /// # Errors
    /// - Mask dimensions do not match the original image (contract error:
    ///   the mask is produced by resizing to the original's size)
    pub fn compose(
        original: &DynamicImage,
        mask: &GrayImage,
        tint: [u8; 4],
        tint_weight: f32,
    ) -> Result<RgbImage> {
        let (width, height) = (original.width(), original.height());
        if mask.dimensions() != (width, height) {
            return Err(AnalysisError::internal(format!(
                "Mask dimensions {:?} do not match image dimensions {:?}",
                mask.dimensions(),
                (width, height)
            )));
        }

        let base = Self::expand_to_rgba(original);

        // Tint layer: fully transparent zero except where the mask is positive
        let mut tint_layer = RgbaImage::new(width, height);
        for (x, y, pixel) in tint_layer.enumerate_pixels_mut() {
            if mask.get_pixel(x, y)[0] > 0 {
                *pixel = image::Rgba(tint);
            }
        }

        let blended = RgbImage::from_fn(width, height, |x, y| {
            let b = base.get_pixel(x, y);
            let t = tint_layer.get_pixel(x, y);
            let mut channels = [0u8; 3];
            for c in 0..3 {
                let value = f32::from(b[c]) + tint_weight * f32::from(t[c]);
                channels[c] = value.clamp(0.0, 255.0) as u8;
            }
            image::Rgb(channels)
        });

        Ok(blended)
    }

    /// Expand to four channels, choosing the expansion path by input
    /// channel count: grayscale replicates its luma, color keeps its RGB.
    fn expand_to_rgba(image: &DynamicImage) -> RgbaImage {
        match image {
            DynamicImage::ImageLuma8(_)
            | DynamicImage::ImageLuma16(_)
            | DynamicImage::ImageLumaA8(_)
            | DynamicImage::ImageLumaA16(_) => {
                let gray = image.to_luma8();
                let (width, height) = gray.dimensions();
                RgbaImage::from_fn(width, height, |x, y| {
                    let luma = gray.get_pixel(x, y)[0];
                    image::Rgba([luma, luma, luma, 255])
                })
            },
            _ => image.to_rgba8(),
        }
    }
}
