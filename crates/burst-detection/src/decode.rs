//! Byte-level image decoding with corruption detection
//!
//! Turns raw asset bytes into an 8-bit pixel grid shaped `[height, width]` for
//! grayscale or `[height, width, channels]` for color. Anything the `image`
//! crate cannot identify or fully decode is reported as corrupted.

use std::io::Cursor;

use image::{DynamicImage, ImageReader};
use ndarray::{ArrayD, IxDyn};

use crate::error::DecodeError;
use crate::quality::validate;

/// Decoded pixels, row-major, one `u8` per channel.
pub type PixelGrid = ArrayD<u8>;

pub struct ImageDecoder;

impl ImageDecoder {
    /// Decode and verify an image.
    ///
    /// Fails with [`DecodeError::Corrupted`] for empty input, unknown
    /// container formats and decode errors. A successfully decoded image whose
    /// layout the analyzer does not accept (gray + alpha) fails with
    /// [`DecodeError::Invalid`] instead.
    pub fn decode(bytes: &[u8]) -> Result<PixelGrid, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Corrupted("empty byte stream".to_string()));
        }

        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| DecodeError::Corrupted(format!("unreadable stream: {e}")))?;

        if reader.format().is_none() {
            return Err(DecodeError::Corrupted("unrecognized image format".to_string()));
        }

        // A full decode is the structural verification pass: truncated or
        // malformed payloads fail here rather than in the analyzer.
        let image = reader
            .decode()
            .map_err(|e| DecodeError::Corrupted(format!("decode failed: {e}")))?;

        let grid = Self::to_grid(image)?;
        validate(&grid)?;
        Ok(grid)
    }

    /// True when the bytes cannot be decoded as an image at all.
    pub fn is_corrupted(bytes: &[u8]) -> bool {
        matches!(Self::decode(bytes), Err(DecodeError::Corrupted(_)))
    }

    fn to_grid(image: DynamicImage) -> Result<PixelGrid, DecodeError> {
        let width = image.width() as usize;
        let height = image.height() as usize;

        // 16-bit and float sources are narrowed to 8 bits per channel
        let (channels, raw) = match image.color().channel_count() {
            1 => (1, image.into_luma8().into_raw()),
            2 => (2, image.into_luma_alpha8().into_raw()),
            3 => (3, image.into_rgb8().into_raw()),
            _ => (4, image.into_rgba8().into_raw()),
        };

        let shape = if channels == 1 {
            vec![height, width]
        } else {
            vec![height, width, channels]
        };

        ArrayD::from_shape_vec(IxDyn(&shape), raw)
            .map_err(|e| DecodeError::Corrupted(format!("pixel buffer does not match dimensions: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvalidImageInput;
    use crate::testing::png_bytes;
    use image::{GrayAlphaImage, GrayImage, RgbImage, RgbaImage};

    #[test]
    fn test_empty_bytes_are_corrupted() {
        assert!(matches!(ImageDecoder::decode(&[]), Err(DecodeError::Corrupted(_))));
        assert!(ImageDecoder::is_corrupted(&[]));
    }

    #[test]
    fn test_garbage_bytes_are_corrupted() {
        let garbage = b"definitely not an image, just some text".to_vec();
        assert!(ImageDecoder::is_corrupted(&garbage));
    }

    #[test]
    fn test_truncated_png_is_corrupted() {
        let bytes = png_bytes(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            32,
            32,
            image::Rgb([10, 200, 30]),
        )));
        let truncated = &bytes[..bytes.len() / 2];
        assert!(ImageDecoder::is_corrupted(truncated));
    }

    #[test]
    fn test_grayscale_decodes_to_2d() {
        let bytes = png_bytes(DynamicImage::ImageLuma8(GrayImage::from_pixel(
            20,
            10,
            image::Luma([77]),
        )));
        let grid = ImageDecoder::decode(&bytes).unwrap();
        assert_eq!(grid.shape(), &[10, 20]);
        assert!(grid.iter().all(|&v| v == 77));
    }

    #[test]
    fn test_color_decodes_to_3d() {
        let rgb = png_bytes(DynamicImage::ImageRgb8(RgbImage::new(8, 6)));
        assert_eq!(ImageDecoder::decode(&rgb).unwrap().shape(), &[6, 8, 3]);

        let rgba = png_bytes(DynamicImage::ImageRgba8(RgbaImage::new(8, 6)));
        assert_eq!(ImageDecoder::decode(&rgba).unwrap().shape(), &[6, 8, 4]);
    }

    #[test]
    fn test_gray_alpha_is_invalid_not_corrupted() {
        let bytes = png_bytes(DynamicImage::ImageLumaA8(GrayAlphaImage::new(4, 4)));
        match ImageDecoder::decode(&bytes) {
            Err(DecodeError::Invalid(InvalidImageInput::Channels(2))) => {}
            other => panic!("expected channel validation failure, got {other:?}"),
        }
        assert!(!ImageDecoder::is_corrupted(&bytes));
    }
}
