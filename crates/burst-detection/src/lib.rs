//! Image quality analysis and burst detection for photo imports
//!
//! Decodes raw asset bytes, scores sharpness and exposure, reads capture
//! times from EXIF, and groups rapid-fire shots into bursts with a
//! recommended best frame.

pub mod burst;
pub mod decode;
pub mod error;
pub mod exif;
pub mod quality;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use burst::{recommend_best_shot, BurstCandidate, BurstConfig, BurstDetector, BurstGroup};
pub use decode::{ImageDecoder, PixelGrid};
pub use error::{AnalysisError, DecodeError, InvalidImageInput};
pub use exif::capture_time;
pub use quality::{QualityAnalyzer, QualityReport, DEFAULT_BLUR_THRESHOLD};
