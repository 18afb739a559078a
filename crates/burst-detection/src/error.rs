//! Error types for image decoding and quality analysis.

use std::path::PathBuf;
use thiserror::Error;

/// A pixel grid that the analyzer cannot work with. This is a caller bug,
/// not a property of the photo, and is always propagated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidImageInput {
    #[error("image cannot be empty")]
    Empty,

    #[error("image must be 2D (grayscale) or 3D (color), got {0} dimensions")]
    Rank(usize),

    #[error("color images must have 3 or 4 channels, got {0}")]
    Channels(usize),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    /// The bytes are not a readable raster image.
    #[error("corrupted image: {0}")]
    Corrupted(String),

    /// The image decoded but its pixel layout is not analyzable.
    #[error(transparent)]
    Invalid(#[from] InvalidImageInput),
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid image input: {0}")]
    InvalidImage(#[from] InvalidImageInput),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
