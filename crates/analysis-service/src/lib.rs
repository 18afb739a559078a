//! Import batch analysis service.
//!
//! Pulls a batch of photos from the asset store, scores each one, groups
//! bursts and records everything in the batch database.

pub mod config;
pub mod fetch;
pub mod logging;
pub mod orchestrator;

pub use config::Config;
pub use fetch::{AssetMetadata, AssetSource, FetchError, ImmichClient};
pub use orchestrator::{BatchOrchestrator, OrchestratorError};
