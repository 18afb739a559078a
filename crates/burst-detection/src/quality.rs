//! Image quality analysis
//!
//! Objective, deterministic quality signals for a single photo: a sharpness
//! score from Laplacian variance, an exposure score from the brightness
//! histogram, and a weighted overall score used to rank frames in a burst.
//! All scores live on a 0-100 scale.

use std::path::Path;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use ndarray::ArrayView2;

use crate::decode::{ImageDecoder, PixelGrid};
use crate::error::{AnalysisError, DecodeError, InvalidImageInput};

/// Laplacian variance that maps to a full-scale blur score.
pub const DEFAULT_BLUR_THRESHOLD: f64 = 100.0;

const BLUR_WEIGHT: f64 = 0.6;
const EXPOSURE_WEIGHT: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Sharpness (0-100), `None` when the image is corrupted
    pub blur_score: Option<f64>,
    /// Exposure quality (0-100), `None` when the image is corrupted
    pub exposure_score: Option<f64>,
    /// Weighted combination of blur and exposure (0-100)
    pub overall_quality: f64,
    pub is_corrupted: bool,
}

impl QualityReport {
    /// Build a report from the two component scores.
    pub fn new(blur_score: f64, exposure_score: f64) -> Self {
        Self {
            blur_score: Some(blur_score),
            exposure_score: Some(exposure_score),
            overall_quality: blur_score * BLUR_WEIGHT + exposure_score * EXPOSURE_WEIGHT,
            is_corrupted: false,
        }
    }

    /// The zero-quality record produced for undecodable photos.
    pub fn corrupted() -> Self {
        Self {
            blur_score: None,
            exposure_score: None,
            overall_quality: 0.0,
            is_corrupted: true,
        }
    }

    /// Get a human-readable quality category
    pub fn quality_category(&self) -> &'static str {
        if self.is_corrupted {
            return "Corrupted";
        }
        match self.overall_quality {
            x if x >= 85.0 => "Excellent",
            x if x >= 70.0 => "Good",
            x if x >= 50.0 => "Fair",
            x if x >= 30.0 => "Poor",
            _ => "Very Poor",
        }
    }
}

#[derive(Debug, Clone)]
pub struct QualityAnalyzer {
    blur_threshold: f64,
}

impl QualityAnalyzer {
    pub fn new(blur_threshold: f64) -> Self {
        Self { blur_threshold }
    }

    pub fn blur_threshold(&self) -> f64 {
        self.blur_threshold
    }

    /// Sharpness score: variance of the Laplacian, normalized so that
    /// `blur_threshold` maps to 100.
    pub fn calculate_blur(&self, image: &PixelGrid) -> Result<f64, InvalidImageInput> {
        let gray = algorithms::to_grayscale(image)?;
        Ok(self.blur_from_gray(&gray.view()))
    }

    /// Exposure score: rewards a mean brightness near mid-gray and a
    /// reasonably spread histogram.
    pub fn calculate_exposure(&self, image: &PixelGrid) -> Result<f64, InvalidImageInput> {
        let gray = algorithms::to_grayscale(image)?;
        Ok(exposure_from_gray(&gray.view()))
    }

    /// Score an already decoded image.
    pub fn analyze_image(&self, image: &PixelGrid) -> Result<QualityReport, InvalidImageInput> {
        // One luminance grid feeds both signals
        let gray = algorithms::to_grayscale(image)?;
        let gray = gray.view();
        Ok(QualityReport::new(self.blur_from_gray(&gray), exposure_from_gray(&gray)))
    }

    fn blur_from_gray(&self, gray: &ArrayView2<u8>) -> f64 {
        let variance = algorithms::laplacian_variance(gray);
        (variance / self.blur_threshold * 100.0).min(100.0)
    }

    /// Score raw image bytes.
    ///
    /// Corruption is checked first and yields a zero-quality report rather
    /// than an error; the numeric stages only ever see decodable images.
    pub fn analyze(&self, bytes: &[u8]) -> Result<QualityReport, AnalysisError> {
        let image = match ImageDecoder::decode(bytes) {
            Ok(image) => image,
            Err(DecodeError::Corrupted(reason)) => {
                debug!(%reason, "corrupted image, skipping quality analysis");
                return Ok(QualityReport::corrupted());
            }
            Err(DecodeError::Invalid(invalid)) => return Err(invalid.into()),
        };

        Ok(self.analyze_image(&image)?)
    }

    /// Analyze image quality from file path
    pub fn analyze_file<P: AsRef<Path>>(&self, path: P) -> Result<QualityReport, AnalysisError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| AnalysisError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.analyze(&bytes)
    }

    /// Analyze many files in parallel. Results come back in input order.
    pub fn analyze_batch<P: AsRef<Path> + Sync>(
        &self,
        paths: &[P],
    ) -> Vec<Result<QualityReport, AnalysisError>> {
        paths.par_iter().map(|path| self.analyze_file(path)).collect()
    }
}

fn exposure_from_gray(gray: &ArrayView2<u8>) -> f64 {
    let histogram = algorithms::brightness_histogram(gray);
    let (mean, std_dev) = algorithms::histogram_moments(&histogram);

    let brightness_penalty = (mean - algorithms::IDEAL_BRIGHTNESS).abs() / algorithms::IDEAL_BRIGHTNESS;
    let brightness_score = (1.0 - brightness_penalty).max(0.0);
    let spread_score = (std_dev / algorithms::SPREAD_NORMALIZATION).min(1.0);

    let score = (brightness_score * algorithms::BRIGHTNESS_WEIGHT + spread_score * algorithms::SPREAD_WEIGHT) * 100.0;
    score.clamp(0.0, 100.0)
}

impl Default for QualityAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_BLUR_THRESHOLD)
    }
}

/// Check that a pixel grid is something the analyzer understands.
pub fn validate(image: &PixelGrid) -> Result<(), InvalidImageInput> {
    if image.is_empty() {
        return Err(InvalidImageInput::Empty);
    }
    match image.ndim() {
        2 => Ok(()),
        3 => match image.shape()[2] {
            3 | 4 => Ok(()),
            channels => Err(InvalidImageInput::Channels(channels)),
        },
        rank => Err(InvalidImageInput::Rank(rank)),
    }
}

/// Numeric building blocks for the quality signals
pub mod algorithms {
    use super::*;
    use ndarray::{ArrayView2, Axis, CowArray, Ix2, Ix3};

    pub const IDEAL_BRIGHTNESS: f64 = 128.0;
    pub const SPREAD_NORMALIZATION: f64 = 50.0;
    pub const BRIGHTNESS_WEIGHT: f64 = 0.6;
    pub const SPREAD_WEIGHT: f64 = 0.4;

    /// ITU-R BT.601 luma in 14-bit fixed point, rounded to nearest.
    pub fn luminance(r: u8, g: u8, b: u8) -> u8 {
        let y = r as u32 * 4899 + g as u32 * 9617 + b as u32 * 1868;
        ((y + (1 << 13)) >> 14) as u8
    }

    /// Collapse a validated grid to one luminance channel. Alpha is ignored.
    /// Grayscale input is borrowed as is.
    pub fn to_grayscale(image: &PixelGrid) -> Result<CowArray<'_, u8, Ix2>, InvalidImageInput> {
        validate(image)?;
        let rank = image.ndim();

        if rank == 2 {
            return image
                .view()
                .into_dimensionality::<Ix2>()
                .map(CowArray::from)
                .map_err(|_| InvalidImageInput::Rank(rank));
        }

        let color = image
            .view()
            .into_dimensionality::<Ix3>()
            .map_err(|_| InvalidImageInput::Rank(rank))?;
        Ok(CowArray::from(color.map_axis(Axis(2), |px| luminance(px[0], px[1], px[2]))))
    }

    /// Reflect-101 border index (`gfedcb|abcdefgh|gfedcba`).
    fn reflect_101(index: isize, len: usize) -> usize {
        let len = len as isize;
        if len == 1 {
            return 0;
        }
        let mut i = index;
        if i < 0 {
            i = -i;
        }
        if i >= len {
            i = 2 * len - 2 - i;
        }
        i as usize
    }

    /// Population variance of the 4-neighbour Laplacian response.
    ///
    /// Computed in one pass. Responses are integers in [-1020, 1020], so the
    /// running sums are exact.
    pub fn laplacian_variance(gray: &ArrayView2<u8>) -> f64 {
        let (height, width) = gray.dim();
        if height == 0 || width == 0 {
            return 0.0;
        }

        let px = |y: isize, x: isize| -> i64 { gray[[reflect_101(y, height), reflect_101(x, width)]] as i64 };

        let mut sum: i128 = 0;
        let mut sum_sq: i128 = 0;
        for y in 0..height as isize {
            for x in 0..width as isize {
                let value = px(y - 1, x) + px(y + 1, x) + px(y, x - 1) + px(y, x + 1) - 4 * px(y, x);
                sum += value as i128;
                sum_sq += (value * value) as i128;
            }
        }

        let n = (height * width) as i128;
        (n * sum_sq - sum * sum) as f64 / (n * n) as f64
    }

    /// 256-bin brightness histogram normalized to probabilities.
    pub fn brightness_histogram(gray: &ArrayView2<u8>) -> [f64; 256] {
        let mut counts = [0u64; 256];
        for &value in gray.iter() {
            counts[value as usize] += 1;
        }

        let total = gray.len().max(1) as f64;
        let mut histogram = [0.0; 256];
        for (bin, count) in histogram.iter_mut().zip(counts.iter()) {
            *bin = *count as f64 / total;
        }
        histogram
    }

    /// Mean bin index and standard deviation of a normalized histogram.
    pub fn histogram_moments(histogram: &[f64; 256]) -> (f64, f64) {
        let mean: f64 = histogram
            .iter()
            .enumerate()
            .map(|(i, p)| i as f64 * p)
            .sum();
        let variance: f64 = histogram
            .iter()
            .enumerate()
            .map(|(i, p)| p * (i as f64 - mean).powi(2))
            .sum();
        (mean, variance.sqrt())
    }
}
