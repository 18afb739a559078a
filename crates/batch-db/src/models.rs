//! Records persisted for each import batch.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Lifecycle of an import batch. Only `Processing` can move, and only forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Processing,
    Complete,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Processing => "processing",
            BatchStatus::Complete => "complete",
            BatchStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BatchStatus::Processing)
    }

    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        matches!(
            (self, next),
            (BatchStatus::Processing, BatchStatus::Complete) | (BatchStatus::Processing, BatchStatus::Failed)
        )
    }

    /// Checked transition.
    pub fn transition_to(self, next: BatchStatus) -> Result<BatchStatus, StoreError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(StoreError::InvalidTransition { from: self, to: next })
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown batch status: {0}")]
pub struct ParseStatusError(String);

impl FromStr for BatchStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(BatchStatus::Processing),
            "complete" => Ok(BatchStatus::Complete),
            "failed" => Ok(BatchStatus::Failed),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

impl ToSql for BatchStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for BatchStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// One import operation: a fixed list of assets analyzed together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportBatch {
    pub id: String,
    pub user_id: String,
    pub asset_ids: Vec<String>,
    pub status: BatchStatus,
    pub total_assets: u32,
    pub analyzed_assets: u32,
    pub skipped_assets: u32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ImportBatch {
    /// Assets with a final outcome, scored or skipped.
    pub fn processed_assets(&self) -> u32 {
        self.analyzed_assets + self.skipped_assets
    }

    /// Share of the batch that produced a quality score.
    pub fn progress_percent(&self) -> f64 {
        if self.total_assets == 0 {
            return 0.0;
        }
        self.analyzed_assets as f64 / self.total_assets as f64 * 100.0
    }

    /// Remaining time extrapolated from the average pace so far.
    pub fn eta_seconds(&self, now: DateTime<Utc>) -> Option<u64> {
        let processed = self.processed_assets();
        if self.status != BatchStatus::Processing || processed == 0 {
            return None;
        }
        let elapsed = (now - self.created_at).num_milliseconds().max(0) as f64 / 1000.0;
        let remaining = self.total_assets.saturating_sub(processed) as f64;
        Some((elapsed / processed as f64 * remaining).ceil() as u64)
    }

    pub fn analysis_status(&self, now: DateTime<Utc>) -> AnalysisStatus {
        AnalysisStatus {
            status: self.status,
            progress_percent: self.progress_percent(),
            eta_seconds: self.eta_seconds(now),
            total_assets: self.total_assets,
            analyzed_assets: self.analyzed_assets,
            skipped_assets: self.skipped_assets,
            error_message: self.error_message.clone(),
        }
    }
}

/// Progress view of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisStatus {
    pub status: BatchStatus,
    pub progress_percent: f64,
    pub eta_seconds: Option<u64>,
    pub total_assets: u32,
    pub analyzed_assets: u32,
    pub skipped_assets: u32,
    pub error_message: Option<String>,
}

/// Quality signals for one asset within one batch. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetQualityScore {
    pub asset_id: String,
    pub batch_id: String,
    pub blur_score: Option<f64>,
    pub exposure_score: Option<f64>,
    pub overall_quality: Option<f64>,
    pub is_corrupted: bool,
    pub analyzed_at: DateTime<Utc>,
}

/// A burst to persist when a batch completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBurstSequence {
    pub asset_ids: Vec<String>,
    pub recommended_asset_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurstSequence {
    pub id: String,
    pub batch_id: String,
    /// Members in capture order
    pub asset_ids: Vec<String>,
    pub recommended_asset_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
