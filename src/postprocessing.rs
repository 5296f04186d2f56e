//! Binary mask cleanup
//!
//! Morphological opening removes isolated noise pixels, the following
//! closing fills small holes inside connected regions. Both use a 3x3
//! structuring element; out-of-image neighbors are ignored, so borders
//! neither erode nor dilate on their own.

use image::GrayImage;

/// Cleans thresholded segmentation masks
pub struct MaskPostprocessor;

impl MaskPostprocessor {
    /// Apply 3x3 opening then closing. Shape and the binary `{0, 255}`
    /// alphabet are preserved, and the operation is idempotent: cleaning an
    /// already-cleaned mask changes nothing.
    #[must_use]
    pub fn clean(mask: &GrayImage) -> GrayImage {
        let opened = Self::dilate(&Self::erode(mask));
        Self::erode(&Self::dilate(&opened))
    }

    /// Erosion: each pixel becomes the minimum of its in-bounds 3x3
    /// neighborhood.
    fn erode(mask: &GrayImage) -> GrayImage {
        Self::neighborhood_reduce(mask, u8::min)
    }

    /// Dilation: each pixel becomes the maximum of its in-bounds 3x3
    /// neighborhood.
    fn dilate(mask: &GrayImage) -> GrayImage {
        Self::neighborhood_reduce(mask, u8::max)
    }

    fn neighborhood_reduce(mask: &GrayImage, reduce: fn(u8, u8) -> u8) -> GrayImage {
        let (width, height) = mask.dimensions();
        GrayImage::from_fn(width, height, |x, y| {
            let mut value = mask.get_pixel(x, y)[0];
            let x = i64::from(x);
            let y = i64::from(y);
            for dy in -1..=1i64 {
                for dx in -1..=1i64 {
                    let (nx, ny) = (x + dx, y + dy);
                    if nx >= 0 && ny >= 0 && nx < i64::from(width) && ny < i64::from(height) {
                        value = reduce(value, mask.get_pixel(nx as u32, ny as u32)[0]);
                    }
                }
            }
            image::Luma([value])
        })
    }
}
