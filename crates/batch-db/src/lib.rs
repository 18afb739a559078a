//! SQLite persistence for photo import batches.
//!
//! Stores each import batch with its progress counters and status, one quality
//! score per analyzed asset, and the burst sequences found when the batch
//! completes. Deleting a batch removes its scores and bursts.

mod db;
mod error;
mod models;

pub use db::{default_database_path, BatchDb};
pub use error::StoreError;
pub use models::{
    AnalysisStatus, AssetQualityScore, BatchStatus, BurstSequence, ImportBatch, NewBurstSequence,
    ParseStatusError,
};

/// Persistence operations the batch pipeline relies on.
///
/// Implementations must be safe to share across tasks; the orchestrator holds
/// one behind an `Arc` while status readers query it concurrently.
pub trait BatchStore: Send + Sync {
    /// Validate a submission and create a batch in `processing`.
    fn create_batch(&self, user_id: &str, asset_ids: &[String]) -> Result<ImportBatch, StoreError>;

    fn load_batch(&self, batch_id: &str) -> Result<ImportBatch, StoreError>;

    /// Store a score and count the asset, atomically: as skipped when the
    /// score is flagged corrupted, as analyzed otherwise.
    /// A second score for the same asset in the same batch is rejected.
    fn record_quality_score(&self, score: &AssetQualityScore) -> Result<ImportBatch, StoreError>;

    /// Count one asset as skipped.
    fn record_skipped(&self, batch_id: &str) -> Result<ImportBatch, StoreError>;

    /// Persist the batch's bursts and move it to `complete` in one transaction.
    fn complete_batch(&self, batch_id: &str, bursts: &[NewBurstSequence]) -> Result<ImportBatch, StoreError>;

    fn mark_failed(&self, batch_id: &str, message: &str) -> Result<ImportBatch, StoreError>;

    fn list_scores(&self, batch_id: &str) -> Result<Vec<AssetQualityScore>, StoreError>;

    fn list_bursts(&self, batch_id: &str) -> Result<Vec<BurstSequence>, StoreError>;

    /// Newest first.
    fn list_batches_for_user(&self, user_id: &str) -> Result<Vec<ImportBatch>, StoreError>;

    fn delete_batch(&self, batch_id: &str) -> Result<(), StoreError>;
}
