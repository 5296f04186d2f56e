//! Image normalization for predictor input
//!
//! Turns raw upload bytes into the fixed-shape standardized tensor both
//! predictors consume. Decoding tries a primary content-based pass and a
//! secondary guessed-format pass before giving up.

use crate::config::MODEL_INPUT_SIZE;
use crate::error::{AnalysisError, Result};
use image::{imageops, DynamicImage, ImageReader, RgbImage};
use ndarray::Array4;
use std::io::Cursor;
use std::path::Path;

/// Floor added to the per-image standard deviation so near-constant images
/// (e.g. pure black) do not blow up the division.
const STD_EPSILON: f32 = 1e-7;

/// Decode raw image bytes, falling back to a second decoder pass when the
/// primary content-based decode rejects the data.
pub(crate) fn decode_bytes(bytes: &[u8]) -> Result<DynamicImage> {
    if bytes.is_empty() {
        return Err(AnalysisError::bad_input("Empty upload"));
    }

    match image::load_from_memory(bytes) {
        Ok(img) => Ok(img),
        Err(primary_err) => {
            log::debug!(
                "Primary decode failed: {primary_err}. Attempting guessed-format decode."
            );

            ImageReader::new(Cursor::new(bytes))
                .with_guessed_format()
                .map_err(|e| AnalysisError::decode(format!("Unreadable image data: {e}")))?
                .decode()
                .map_err(|fallback_err| {
                    AnalysisError::decode(format!(
                        "Image bytes are not a recognized raster format. \
                         Primary error: {primary_err}. Fallback error: {fallback_err}"
                    ))
                })
        },
    }
}

/// Normalizes decoded images into the predictor input tensor
pub struct ImageNormalizer;

impl ImageNormalizer {
    /// Normalize raw upload bytes into a `(1, 256, 256, 3)` tensor.
    ///
    /// # Errors
    /// - `BadInput` on an empty upload
    /// - `Decode` when both decode attempts reject the bytes
    pub fn normalize_bytes(bytes: &[u8]) -> Result<Array4<f32>> {
        let image = decode_bytes(bytes)?;
        Ok(Self::normalize_image(&image))
    }

    /// Normalize an image file into a `(1, 256, 256, 3)` tensor.
    ///
    /// # Errors
    /// - File I/O errors reading the path
    /// - `Decode` when the contents are not a recognized raster format
    pub fn normalize_file<P: AsRef<Path>>(path: P) -> Result<Array4<f32>> {
        let path_ref = path.as_ref();
        let bytes = std::fs::read(path_ref)
            .map_err(|e| AnalysisError::file_io_error("read image file", path_ref, &e))?;
        Self::normalize_bytes(&bytes)
    }

    /// Normalize an already-decoded image. Pure: the source image is not
    /// mutated.
    ///
    /// Channels are canonicalized to RGB (grayscale replicated, alpha
    /// dropped), the image is stretch-resized to 256x256 with bilinear
    /// filtering (aspect ratio deliberately not preserved), pixel values
    /// are scaled to `[0, 1]`, and the whole image is standardized to zero
    /// mean and unit variance with an epsilon floor.
    #[must_use]
    pub fn normalize_image(image: &DynamicImage) -> Array4<f32> {
        let rgb = Self::canonicalize_channels(image);
        let size = MODEL_INPUT_SIZE;
        let resized = imageops::resize(&rgb, size, size, imageops::FilterType::Triangle);

        let side = size as usize;
        let mut tensor = Array4::<f32>::zeros((1, side, side, 3));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            tensor[[0, y, x, 0]] = f32::from(pixel[0]) / 255.0;
            tensor[[0, y, x, 1]] = f32::from(pixel[1]) / 255.0;
            tensor[[0, y, x, 2]] = f32::from(pixel[2]) / 255.0;
        }

        Self::standardize(&mut tensor);
        tensor
    }

    /// Canonicalize to three RGB channels: one-channel input has its luma
    /// replicated, alpha-bearing input has the alpha dropped.
    fn canonicalize_channels(image: &DynamicImage) -> RgbImage {
        match image {
            DynamicImage::ImageLuma8(_)
            | DynamicImage::ImageLuma16(_)
            | DynamicImage::ImageLumaA8(_)
            | DynamicImage::ImageLumaA16(_) => {
                let gray = image.to_luma8();
                let (width, height) = gray.dimensions();
                RgbImage::from_fn(width, height, |x, y| {
                    let luma = gray.get_pixel(x, y)[0];
                    image::Rgb([luma, luma, luma])
                })
            },
            _ => image.to_rgb8(),
        }
    }

    /// Standardize in place over the whole image: `(x - mean) / (std + eps)`.
    fn standardize(tensor: &mut Array4<f32>) {
        let count = tensor.len() as f32;
        let mean = tensor.iter().sum::<f32>() / count;
        let variance = tensor.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / count;
        let std = variance.sqrt();

        tensor.mapv_inplace(|v| (v - mean) / (std + STD_EPSILON));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageBuffer, Luma, Rgb};

    fn encode_png(image: &DynamicImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn gradient_image(width: u32, height: u32) -> DynamicImage {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            let r = ((x as f32 / width as f32) * 255.0) as u8;
            let g = ((y as f32 / height as f32) * 255.0) as u8;
            Rgb([r, g, 40])
        });
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_output_shape_is_fixed() {
        for (w, h) in [(100, 100), (640, 480), (31, 257)] {
            let tensor = ImageNormalizer::normalize_image(&gradient_image(w, h));
            assert_eq!(tensor.shape(), &[1, 256, 256, 3]);
        }
    }

    #[test]
    fn test_standardized_mean_and_variance() {
        let tensor = ImageNormalizer::normalize_image(&gradient_image(100, 100));

        let count = tensor.len() as f32;
        let mean = tensor.iter().sum::<f32>() / count;
        let variance = tensor.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / count;

        assert!(mean.abs() < 1e-3, "mean was {mean}");
        assert!((variance - 1.0).abs() < 1e-2, "variance was {variance}");
    }

    #[test]
    fn test_grayscale_is_replicated_across_channels() {
        let gray: GrayImage = ImageBuffer::from_fn(64, 64, |x, _| Luma([(x * 3) as u8]));
        let tensor = ImageNormalizer::normalize_image(&DynamicImage::ImageLuma8(gray));

        assert_eq!(tensor.shape(), &[1, 256, 256, 3]);
        for y in [0usize, 127, 255] {
            for x in [0usize, 127, 255] {
                let r = tensor[[0, y, x, 0]];
                assert_eq!(r, tensor[[0, y, x, 1]]);
                assert_eq!(r, tensor[[0, y, x, 2]]);
            }
        }

        // Replicated channels keep each per-channel mean at the global mean
        let side = 256usize;
        for c in 0..3 {
            let mut sum = 0.0;
            for y in 0..side {
                for x in 0..side {
                    sum += tensor[[0, y, x, c]];
                }
            }
            let channel_mean = sum / (side * side) as f32;
            assert!(channel_mean.abs() < 1e-3);
        }
    }

    #[test]
    fn test_constant_image_stays_finite() {
        let black = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(50, 50, Rgb([0, 0, 0])));
        let tensor = ImageNormalizer::normalize_image(&black);
        assert!(tensor.iter().all(|v| v.is_finite()));
        assert!(tensor.iter().all(|v| v.abs() < 1e-3));
    }

    #[test]
    fn test_alpha_input_is_accepted() {
        let rgba = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(
            40,
            30,
            image::Rgba([10, 200, 30, 7]),
        ));
        let tensor = ImageNormalizer::normalize_image(&rgba);
        assert_eq!(tensor.shape(), &[1, 256, 256, 3]);
    }

    #[test]
    fn test_normalize_bytes_round_trip() {
        let bytes = encode_png(&gradient_image(100, 100));
        let tensor = ImageNormalizer::normalize_bytes(&bytes).unwrap();
        assert_eq!(tensor.shape(), &[1, 256, 256, 3]);
    }

    #[test]
    fn test_empty_upload_is_bad_input() {
        let err = ImageNormalizer::normalize_bytes(&[]).unwrap_err();
        assert!(matches!(err, AnalysisError::BadInput(_)));
    }

    #[test]
    fn test_undecodable_bytes_are_decode_errors() {
        let err = ImageNormalizer::normalize_bytes(b"definitely not an image").unwrap_err();
        assert!(matches!(err, AnalysisError::Decode(_)));
    }
}
