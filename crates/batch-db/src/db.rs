//! SQLite implementation of [`BatchStore`].
//!
//! Uses WAL mode so status queries can read while an analysis run writes.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{AssetQualityScore, BatchStatus, BurstSequence, ImportBatch, NewBurstSequence};
use crate::BatchStore;

/// Database handle shared between the orchestrator and status readers.
pub struct BatchDb {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl BatchDb {
    /// Open the database at its default location, creating it if needed.
    pub fn open() -> Result<Self, StoreError> {
        Self::open_at(&default_database_path())
    }

    /// Open or create a database file, creating parent directories.
    pub fn open_at(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(db_path)?;
        // WAL mode for concurrent read/write
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA synchronous=NORMAL;")?;
        debug!(path = %db_path.display(), "opened batch database");
        Self::init(conn, Some(db_path.to_path_buf()))
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, db_path: Option<PathBuf>) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        create_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    /// Database file path, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn finish(&self, batch_id: &str, next: BatchStatus, message: Option<&str>, bursts: &[NewBurstSequence]) -> Result<ImportBatch, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let batch = load_batch(&tx, batch_id)?;
        let status = batch.status.transition_to(next)?;

        let now = Utc::now();
        for burst in bursts {
            if burst.asset_ids.len() < 2 {
                return Err(StoreError::InvariantViolation(format!(
                    "burst sequence needs at least 2 assets, got {}",
                    burst.asset_ids.len()
                )));
            }
            tx.execute(
                "INSERT INTO burst_sequences (id, batch_id, asset_ids, recommended_asset_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    Uuid::new_v4().to_string(),
                    batch_id,
                    serde_json::to_string(&burst.asset_ids)?,
                    burst.recommended_asset_id,
                    now,
                ],
            )?;
        }

        tx.execute(
            "UPDATE import_batches SET status = ?1, error_message = ?2 WHERE id = ?3",
            params![status, message, batch_id],
        )?;

        let updated = load_batch(&tx, batch_id)?;
        tx.commit()?;
        Ok(updated)
    }
}

impl BatchStore for BatchDb {
    fn create_batch(&self, user_id: &str, asset_ids: &[String]) -> Result<ImportBatch, StoreError> {
        validate_submission(user_id, asset_ids)?;

        let batch = ImportBatch {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            asset_ids: asset_ids.to_vec(),
            status: BatchStatus::Processing,
            total_assets: u32::try_from(asset_ids.len())
                .map_err(|_| StoreError::InvalidRequest(format!("too many assets: {}", asset_ids.len())))?,
            analyzed_assets: 0,
            skipped_assets: 0,
            error_message: None,
            created_at: Utc::now(),
        };

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO import_batches (
                id, user_id, asset_ids, status, total_assets,
                analyzed_assets, skipped_assets, error_message, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                batch.id,
                batch.user_id,
                serde_json::to_string(&batch.asset_ids)?,
                batch.status,
                batch.total_assets,
                batch.analyzed_assets,
                batch.skipped_assets,
                batch.error_message,
                batch.created_at,
            ],
        )?;
        Ok(batch)
    }

    fn load_batch(&self, batch_id: &str) -> Result<ImportBatch, StoreError> {
        load_batch(&self.conn.lock(), batch_id)
    }

    fn record_quality_score(&self, score: &AssetQualityScore) -> Result<ImportBatch, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let batch = load_batch(&tx, &score.batch_id)?;
        if !batch.asset_ids.contains(&score.asset_id) {
            return Err(StoreError::InvariantViolation(format!(
                "asset {} is not part of batch {}",
                score.asset_id, score.batch_id
            )));
        }

        tx.execute(
            "INSERT INTO asset_quality_scores (
                asset_id, batch_id, blur_score, exposure_score,
                overall_quality, is_corrupted, analyzed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                score.asset_id,
                score.batch_id,
                score.blur_score,
                score.exposure_score,
                score.overall_quality,
                score.is_corrupted,
                score.analyzed_at,
            ],
        )
        .map_err(|e| {
            StoreError::from_write(e, || {
                format!(
                    "quality score for asset {} in batch {} rejected (duplicate or out of range)",
                    score.asset_id, score.batch_id
                )
            })
        })?;

        // A corrupted asset keeps its zero-quality record but shows as skipped
        let column = if score.is_corrupted { "skipped_assets" } else { "analyzed_assets" };
        let updated = bump_counter(&tx, &score.batch_id, column)?;
        tx.commit()?;
        Ok(updated)
    }

    fn record_skipped(&self, batch_id: &str) -> Result<ImportBatch, StoreError> {
        let conn = self.conn.lock();
        bump_counter(&conn, batch_id, "skipped_assets")
    }

    fn complete_batch(&self, batch_id: &str, bursts: &[NewBurstSequence]) -> Result<ImportBatch, StoreError> {
        self.finish(batch_id, BatchStatus::Complete, None, bursts)
    }

    fn mark_failed(&self, batch_id: &str, message: &str) -> Result<ImportBatch, StoreError> {
        self.finish(batch_id, BatchStatus::Failed, Some(message), &[])
    }

    fn list_scores(&self, batch_id: &str) -> Result<Vec<AssetQualityScore>, StoreError> {
        let conn = self.conn.lock();
        ensure_batch_exists(&conn, batch_id)?;

        let mut stmt = conn.prepare(
            "SELECT asset_id, batch_id, blur_score, exposure_score,
                    overall_quality, is_corrupted, analyzed_at
             FROM asset_quality_scores WHERE batch_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![batch_id], |row| {
            Ok(AssetQualityScore {
                asset_id: row.get(0)?,
                batch_id: row.get(1)?,
                blur_score: row.get(2)?,
                exposure_score: row.get(3)?,
                overall_quality: row.get(4)?,
                is_corrupted: row.get(5)?,
                analyzed_at: row.get(6)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn list_bursts(&self, batch_id: &str) -> Result<Vec<BurstSequence>, StoreError> {
        let conn = self.conn.lock();
        ensure_batch_exists(&conn, batch_id)?;

        let mut stmt = conn.prepare(
            "SELECT id, batch_id, asset_ids, recommended_asset_id, created_at
             FROM burst_sequences WHERE batch_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![batch_id], |row| {
            Ok(BurstSequence {
                id: row.get(0)?,
                batch_id: row.get(1)?,
                asset_ids: json_ids(row, 2)?,
                recommended_asset_id: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn list_batches_for_user(&self, user_id: &str) -> Result<Vec<ImportBatch>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{BATCH_COLUMNS} WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = stmt.query_map(params![user_id], batch_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn delete_batch(&self, batch_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        // Scores and bursts go with it (ON DELETE CASCADE)
        let deleted = conn.execute("DELETE FROM import_batches WHERE id = ?1", params![batch_id])?;
        if deleted == 0 {
            return Err(StoreError::BatchNotFound(batch_id.to_string()));
        }
        debug!(batch_id, "deleted import batch");
        Ok(())
    }
}

/// `<data dir>/photo-triage/triage.db`, or the working directory when the
/// platform has no data dir.
pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("photo-triage")
        .join("triage.db")
}

fn validate_submission(user_id: &str, asset_ids: &[String]) -> Result<(), StoreError> {
    if user_id.trim().is_empty() {
        return Err(StoreError::InvalidRequest("user id must not be empty".to_string()));
    }
    if asset_ids.is_empty() {
        return Err(StoreError::InvalidRequest("asset id list must not be empty".to_string()));
    }
    let mut seen = HashSet::with_capacity(asset_ids.len());
    for id in asset_ids {
        if id.trim().is_empty() {
            return Err(StoreError::InvalidRequest("asset ids must not be empty".to_string()));
        }
        if !seen.insert(id.as_str()) {
            return Err(StoreError::InvalidRequest(format!("duplicate asset id: {id}")));
        }
    }
    Ok(())
}

/// Apply a counter increment to a batch that is still accepting results.
fn bump_counter(conn: &Connection, batch_id: &str, column: &str) -> Result<ImportBatch, StoreError> {
    let sql = format!(
        "UPDATE import_batches SET {column} = {column} + 1
         WHERE id = ?1 AND status = 'processing'
           AND analyzed_assets + skipped_assets < total_assets"
    );
    let changed = conn.execute(&sql, params![batch_id])?;
    if changed == 0 {
        let batch = load_batch(conn, batch_id)?;
        return Err(if batch.status.is_terminal() {
            StoreError::InvariantViolation(format!(
                "batch {batch_id} is {} and no longer accepts results",
                batch.status
            ))
        } else {
            StoreError::InvariantViolation(format!(
                "batch {batch_id} already has results for all {} assets",
                batch.total_assets
            ))
        });
    }
    load_batch(conn, batch_id)
}

// -- Schema --

fn create_tables(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS import_batches (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            asset_ids TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'processing'
                CHECK (status IN ('processing', 'complete', 'failed')),
            total_assets INTEGER NOT NULL CHECK (total_assets > 0),
            analyzed_assets INTEGER NOT NULL DEFAULT 0 CHECK (analyzed_assets >= 0),
            skipped_assets INTEGER NOT NULL DEFAULT 0 CHECK (skipped_assets >= 0),
            error_message TEXT,
            created_at TEXT NOT NULL,
            CHECK (analyzed_assets + skipped_assets <= total_assets)
        );

        CREATE TABLE IF NOT EXISTS asset_quality_scores (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            asset_id TEXT NOT NULL,
            batch_id TEXT NOT NULL REFERENCES import_batches(id) ON DELETE CASCADE,
            blur_score REAL CHECK (blur_score IS NULL OR (blur_score >= 0 AND blur_score <= 100)),
            exposure_score REAL CHECK (exposure_score IS NULL OR (exposure_score >= 0 AND exposure_score <= 100)),
            overall_quality REAL CHECK (overall_quality IS NULL OR (overall_quality >= 0 AND overall_quality <= 100)),
            is_corrupted INTEGER NOT NULL DEFAULT 0,
            analyzed_at TEXT NOT NULL,
            UNIQUE (asset_id, batch_id)
        );

        CREATE TABLE IF NOT EXISTS burst_sequences (
            id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL REFERENCES import_batches(id) ON DELETE CASCADE,
            asset_ids TEXT NOT NULL,
            recommended_asset_id TEXT,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_batches_user ON import_batches(user_id);
        CREATE INDEX IF NOT EXISTS idx_scores_batch ON asset_quality_scores(batch_id);
        CREATE INDEX IF NOT EXISTS idx_bursts_batch ON burst_sequences(batch_id);
        ",
    )?;
    Ok(())
}

// -- Row mapping --

const BATCH_COLUMNS: &str = "SELECT id, user_id, asset_ids, status, total_assets,
        analyzed_assets, skipped_assets, error_message, created_at
     FROM import_batches";

fn batch_from_row(row: &Row<'_>) -> rusqlite::Result<ImportBatch> {
    Ok(ImportBatch {
        id: row.get(0)?,
        user_id: row.get(1)?,
        asset_ids: json_ids(row, 2)?,
        status: row.get(3)?,
        total_assets: row.get(4)?,
        analyzed_assets: row.get(5)?,
        skipped_assets: row.get(6)?,
        error_message: row.get(7)?,
        created_at: row.get::<_, DateTime<Utc>>(8)?,
    })
}

fn json_ids(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn load_batch(conn: &Connection, batch_id: &str) -> Result<ImportBatch, StoreError> {
    conn.query_row(&format!("{BATCH_COLUMNS} WHERE id = ?1"), params![batch_id], batch_from_row)
        .optional()?
        .ok_or_else(|| StoreError::BatchNotFound(batch_id.to_string()))
}

fn ensure_batch_exists(conn: &Connection, batch_id: &str) -> Result<(), StoreError> {
    let found = conn
        .query_row("SELECT 1 FROM import_batches WHERE id = ?1", params![batch_id], |_| Ok(()))
        .optional()?;
    found.ok_or_else(|| StoreError::BatchNotFound(batch_id.to_string()))
}
