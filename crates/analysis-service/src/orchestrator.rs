//! Batch orchestration: fetch, analyze, group, persist.
//!
//! Each asset is fetched and scored independently, up to
//! `max_concurrent_fetches` at a time. Workers only produce results; the
//! coordinating task is the single writer that applies them to the store, so
//! counters move one result at a time and are visible mid-run. Store calls run
//! on the blocking pool. Burst detection starts once every asset has an
//! outcome, and the bursts are persisted together with the `complete`
//! transition.

use std::sync::Arc;
use std::time::Duration;

use batch_db::{AnalysisStatus, AssetQualityScore, BatchStatus, BatchStore, ImportBatch, NewBurstSequence, StoreError};
use burst_detection::{BurstCandidate, BurstConfig, BurstDetector, QualityAnalyzer, QualityReport};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::fetch::AssetSource;

/// Smallest group persisted as a burst sequence.
const MIN_BURST_SIZE: usize = 2;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Only batches still in `processing` can be run.
    #[error("batch {batch_id} is {status}, refusing to run it")]
    InvalidTransition { batch_id: String, status: BatchStatus },

    /// The batch already holds results from an earlier run.
    #[error("batch {batch_id} already has {processed} processed assets")]
    AlreadyStarted { batch_id: String, processed: u32 },

    /// A store fault stopped the run; the batch has been marked failed.
    #[error("batch {batch_id} failed: {source}")]
    BatchFailed {
        batch_id: String,
        #[source]
        source: StoreError,
    },
}

/// How a single asset came out of fetch + analysis.
#[derive(Debug)]
enum AssetOutcome {
    Scored {
        report: QualityReport,
        capture_time: Option<DateTime<Utc>>,
    },
    Skipped {
        reason: String,
    },
}

pub struct BatchOrchestrator {
    store: Arc<dyn BatchStore>,
    source: Arc<dyn AssetSource>,
    analyzer: QualityAnalyzer,
    burst_config: BurstConfig,
    max_concurrent_fetches: usize,
    fetch_timeout: Duration,
}

impl BatchOrchestrator {
    pub fn new(store: Arc<dyn BatchStore>, source: Arc<dyn AssetSource>) -> Self {
        Self {
            store,
            source,
            analyzer: QualityAnalyzer::default(),
            burst_config: BurstConfig::default(),
            max_concurrent_fetches: 4,
            fetch_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(store: Arc<dyn BatchStore>, source: Arc<dyn AssetSource>, config: &Config) -> Self {
        Self::new(store, source)
            .with_analyzer(QualityAnalyzer::new(config.analysis.blur_threshold))
            .with_burst_config(config.burst.clone())
            .with_max_concurrent_fetches(config.analysis.max_concurrent_fetches)
            .with_fetch_timeout(Duration::from_secs(config.asset_store.timeout_secs))
    }

    pub fn with_analyzer(mut self, analyzer: QualityAnalyzer) -> Self {
        self.analyzer = analyzer;
        self
    }

    /// A burst needs at least two frames; smaller minimums are raised to 2.
    pub fn with_burst_config(mut self, mut burst_config: BurstConfig) -> Self {
        if burst_config.min_burst_size < MIN_BURST_SIZE {
            warn!(
                requested = burst_config.min_burst_size,
                "min_burst_size below {MIN_BURST_SIZE}, using {MIN_BURST_SIZE}"
            );
            burst_config.min_burst_size = MIN_BURST_SIZE;
        }
        self.burst_config = burst_config;
        self
    }

    pub fn with_max_concurrent_fetches(mut self, limit: usize) -> Self {
        self.max_concurrent_fetches = limit.max(1);
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<dyn BatchStore> {
        &self.store
    }

    /// Validate and record a new batch in `processing`.
    pub fn submit(&self, user_id: &str, asset_ids: &[String]) -> Result<ImportBatch, OrchestratorError> {
        let batch = self.store.create_batch(user_id, asset_ids)?;
        info!(batch_id = %batch.id, user_id, total_assets = batch.total_assets, "import batch submitted");
        Ok(batch)
    }

    pub fn status(&self, batch_id: &str) -> Result<AnalysisStatus, OrchestratorError> {
        Ok(self.store.load_batch(batch_id)?.analysis_status(Utc::now()))
    }

    /// Drive a batch from `processing` to `complete`.
    ///
    /// Fetch and analysis failures only skip the asset. Any store fault marks
    /// the batch `failed` and is returned as [`OrchestratorError::BatchFailed`].
    pub async fn run(&self, batch_id: &str) -> Result<ImportBatch, OrchestratorError> {
        let id = batch_id.to_string();
        let batch = self.on_store(move |store| store.load_batch(&id)).await?;
        if batch.status != BatchStatus::Processing {
            return Err(OrchestratorError::InvalidTransition {
                batch_id: batch.id,
                status: batch.status,
            });
        }
        let processed = batch.processed_assets();
        if processed > 0 {
            return Err(OrchestratorError::AlreadyStarted {
                batch_id: batch.id,
                processed,
            });
        }

        info!(batch_id, total_assets = batch.total_assets, "starting batch analysis");

        match self.process(&batch).await {
            Ok(completed) => {
                info!(
                    batch_id,
                    analyzed = completed.analyzed_assets,
                    skipped = completed.skipped_assets,
                    "batch analysis complete"
                );
                Ok(completed)
            }
            Err(source) => {
                error!(batch_id, error = %source, "batch analysis failed");
                let (id, message) = (batch_id.to_string(), source.to_string());
                if let Err(e) = self.on_store(move |store| store.mark_failed(&id, &message)).await {
                    error!(batch_id, error = %e, "could not mark batch as failed");
                }
                Err(OrchestratorError::BatchFailed {
                    batch_id: batch_id.to_string(),
                    source,
                })
            }
        }
    }

    async fn process(&self, batch: &ImportBatch) -> Result<ImportBatch, StoreError> {
        let mut results = stream::iter(batch.asset_ids.iter().cloned().enumerate())
            .map(|(index, asset_id)| {
                let source = Arc::clone(&self.source);
                let analyzer = self.analyzer.clone();
                let fetch_timeout = self.fetch_timeout;
                async move {
                    let outcome = process_asset(source.as_ref(), analyzer, fetch_timeout, &asset_id).await;
                    (index, asset_id, outcome)
                }
            })
            .buffer_unordered(self.max_concurrent_fetches);

        let mut candidates: Vec<(usize, BurstCandidate)> = Vec::new();

        while let Some((index, asset_id, outcome)) = results.next().await {
            match outcome {
                AssetOutcome::Scored { report, capture_time } => {
                    let score = AssetQualityScore {
                        asset_id: asset_id.clone(),
                        batch_id: batch.id.clone(),
                        blur_score: report.blur_score,
                        exposure_score: report.exposure_score,
                        overall_quality: Some(report.overall_quality),
                        is_corrupted: report.is_corrupted,
                        analyzed_at: Utc::now(),
                    };
                    // Counted as skipped by the store when corrupted
                    self.on_store(move |store| store.record_quality_score(&score)).await?;

                    match capture_time {
                        _ if report.is_corrupted => {
                            warn!(batch_id = %batch.id, asset_id, "corrupted asset, recorded with zero quality");
                        }
                        Some(time) => {
                            candidates.push((index, BurstCandidate::new(asset_id, time, report.overall_quality)));
                        }
                        None => {
                            debug!(batch_id = %batch.id, asset_id, "no capture time, excluded from burst detection");
                        }
                    }
                }
                AssetOutcome::Skipped { reason } => {
                    warn!(batch_id = %batch.id, asset_id, %reason, "skipping asset");
                    let id = batch.id.clone();
                    self.on_store(move |store| store.record_skipped(&id)).await?;
                }
            }
        }

        // Restore submission order so equal timestamps group deterministically
        candidates.sort_by_key(|(index, _)| *index);
        let candidates = candidates.into_iter().map(|(_, candidate)| candidate).collect();

        let detector = BurstDetector::new(self.burst_config.clone());
        let bursts: Vec<NewBurstSequence> = detector
            .group(candidates)
            .into_iter()
            .map(|group| NewBurstSequence {
                asset_ids: group.asset_ids,
                recommended_asset_id: group.recommended_asset_id,
            })
            .collect();

        debug!(batch_id = %batch.id, bursts = bursts.len(), "burst detection finished");
        let id = batch.id.clone();
        self.on_store(move |store| store.complete_batch(&id, &bursts)).await
    }

    /// SQLite calls lock the connection and touch disk, so they stay off the
    /// async worker threads.
    async fn on_store<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn BatchStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || call(store.as_ref()))
            .await
            .map_err(|e| StoreError::Interrupted(e.to_string()))?
    }
}

async fn process_asset(
    source: &dyn AssetSource,
    analyzer: QualityAnalyzer,
    fetch_timeout: Duration,
    asset_id: &str,
) -> AssetOutcome {
    let bytes = match tokio::time::timeout(fetch_timeout, source.fetch_asset_bytes(asset_id)).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => return AssetOutcome::Skipped { reason: e.to_string() },
        Err(_) => {
            return AssetOutcome::Skipped {
                reason: format!("fetch timed out after {}s", fetch_timeout.as_secs_f64()),
            }
        }
    };

    // Decoding and scoring are CPU-bound
    let analyzed = tokio::task::spawn_blocking(move || {
        let report = analyzer.analyze(&bytes);
        let exif_time = burst_detection::capture_time(&bytes);
        (report, exif_time)
    })
    .await;

    let (report, exif_time) = match analyzed {
        Ok((Ok(report), exif_time)) => (report, exif_time),
        Ok((Err(e), _)) => return AssetOutcome::Skipped { reason: e.to_string() },
        Err(e) => {
            return AssetOutcome::Skipped {
                reason: format!("analysis task failed: {e}"),
            }
        }
    };

    let capture_time = match exif_time {
        Some(time) => Some(time),
        None => match tokio::time::timeout(fetch_timeout, source.fetch_capture_time(asset_id)).await {
            Ok(Ok(time)) => time,
            Ok(Err(e)) => {
                debug!(asset_id, error = %e, "capture time lookup failed");
                None
            }
            Err(_) => {
                debug!(asset_id, "capture time lookup timed out");
                None
            }
        },
    };

    AssetOutcome::Scored { report, capture_time }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchError;
    use batch_db::BatchDb;
    use burst_detection::testing::{jpeg_with_exif, png_bytes};
    use chrono::TimeZone;
    use image::{DynamicImage, GrayAlphaImage, GrayImage, Luma, LumaA};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory asset store.
    #[derive(Default)]
    struct FakeSource {
        assets: HashMap<String, Vec<u8>>,
        capture_times: HashMap<String, DateTime<Utc>>,
        delay: Option<Duration>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeSource {
        fn with_asset(mut self, id: &str, bytes: Vec<u8>) -> Self {
            self.assets.insert(id.to_string(), bytes);
            self
        }

        fn with_capture_time(mut self, id: &str, offset_ms: i64) -> Self {
            self.capture_times.insert(id.to_string(), at(offset_ms));
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    #[async_trait::async_trait]
    impl AssetSource for FakeSource {
        async fn fetch_asset_bytes(&self, asset_id: &str) -> Result<Vec<u8>, FetchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.assets
                .get(asset_id)
                .cloned()
                .ok_or_else(|| FetchError::NotFound(asset_id.to_string()))
        }

        async fn fetch_capture_time(&self, asset_id: &str) -> Result<Option<DateTime<Utc>>, FetchError> {
            Ok(self.capture_times.get(asset_id).copied())
        }
    }

    /// Delegates to a real database but fails the nth score write.
    struct FaultyStore {
        inner: BatchDb,
        fail_on_score: usize,
        scores_seen: AtomicUsize,
    }

    impl BatchStore for FaultyStore {
        fn create_batch(&self, user_id: &str, asset_ids: &[String]) -> Result<ImportBatch, StoreError> {
            self.inner.create_batch(user_id, asset_ids)
        }
        fn load_batch(&self, batch_id: &str) -> Result<ImportBatch, StoreError> {
            self.inner.load_batch(batch_id)
        }
        fn record_quality_score(&self, score: &AssetQualityScore) -> Result<ImportBatch, StoreError> {
            if self.scores_seen.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on_score {
                return Err(StoreError::InvariantViolation("disk I/O error".to_string()));
            }
            self.inner.record_quality_score(score)
        }
        fn record_skipped(&self, batch_id: &str) -> Result<ImportBatch, StoreError> {
            self.inner.record_skipped(batch_id)
        }
        fn complete_batch(&self, batch_id: &str, bursts: &[NewBurstSequence]) -> Result<ImportBatch, StoreError> {
            self.inner.complete_batch(batch_id, bursts)
        }
        fn mark_failed(&self, batch_id: &str, message: &str) -> Result<ImportBatch, StoreError> {
            self.inner.mark_failed(batch_id, message)
        }
        fn list_scores(&self, batch_id: &str) -> Result<Vec<AssetQualityScore>, StoreError> {
            self.inner.list_scores(batch_id)
        }
        fn list_bursts(&self, batch_id: &str) -> Result<Vec<batch_db::BurstSequence>, StoreError> {
            self.inner.list_bursts(batch_id)
        }
        fn list_batches_for_user(&self, user_id: &str) -> Result<Vec<ImportBatch>, StoreError> {
            self.inner.list_batches_for_user(user_id)
        }
        fn delete_batch(&self, batch_id: &str) -> Result<(), StoreError> {
            self.inner.delete_batch(batch_id)
        }
    }

    fn at(offset_ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 14, 30, 0).unwrap() + chrono::Duration::milliseconds(offset_ms)
    }

    /// High-contrast horizontal stripes: sharp and well spread.
    fn striped_png() -> Vec<u8> {
        let img = GrayImage::from_fn(48, 48, |_, y| if y % 8 < 4 { Luma([230]) } else { Luma([25]) });
        png_bytes(DynamicImage::ImageLuma8(img))
    }

    fn flat_png() -> Vec<u8> {
        png_bytes(DynamicImage::ImageLuma8(GrayImage::from_pixel(48, 48, Luma([128]))))
    }

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn orchestrator(source: FakeSource) -> (BatchOrchestrator, Arc<FakeSource>) {
        let source = Arc::new(source);
        let store: Arc<dyn BatchStore> = Arc::new(BatchDb::open_in_memory().unwrap());
        let orch = BatchOrchestrator::new(store, source.clone());
        (orch, source)
    }

    #[tokio::test]
    async fn test_all_assets_scored_and_grouped() {
        let source = FakeSource::default()
            .with_asset("a", flat_png())
            .with_asset("b", striped_png())
            .with_asset("c", flat_png())
            .with_capture_time("a", 0)
            .with_capture_time("b", 500)
            .with_capture_time("c", 1000);
        let (orch, _) = orchestrator(source);

        let batch = orch.submit("user-1", &ids(&["a", "b", "c"])).unwrap();
        let done = orch.run(&batch.id).await.unwrap();

        assert_eq!(done.status, BatchStatus::Complete);
        assert_eq!(done.analyzed_assets, 3);
        assert_eq!(done.skipped_assets, 0);

        let scores = orch.store().list_scores(&batch.id).unwrap();
        assert_eq!(scores.len(), 3);
        for score in &scores {
            let overall = score.overall_quality.unwrap();
            assert!((0.0..=100.0).contains(&overall));
            assert!(!score.is_corrupted);
        }

        let bursts = orch.store().list_bursts(&batch.id).unwrap();
        assert_eq!(bursts.len(), 1);
        assert_eq!(bursts[0].asset_ids, ids(&["a", "b", "c"]));

        // Flat frames have no edges, so the striped one wins
        assert_eq!(bursts[0].recommended_asset_id.as_deref(), Some("b"));
        let best = scores.iter().find(|s| s.asset_id == "b").unwrap();
        assert!(scores.iter().all(|s| s.overall_quality <= best.overall_quality));
    }

    #[tokio::test]
    async fn test_fetch_failures_are_skipped() {
        let source = FakeSource::default()
            .with_asset("a", flat_png())
            .with_asset("c", flat_png());
        let (orch, _) = orchestrator(source);

        let batch = orch.submit("user-1", &ids(&["a", "missing", "c"])).unwrap();
        let done = orch.run(&batch.id).await.unwrap();

        assert_eq!(done.status, BatchStatus::Complete);
        assert_eq!(done.analyzed_assets, 2);
        assert_eq!(done.skipped_assets, 1);
        assert_eq!(done.processed_assets(), done.total_assets);

        let scored: Vec<_> = orch
            .store()
            .list_scores(&batch.id)
            .unwrap()
            .into_iter()
            .map(|s| s.asset_id)
            .collect();
        assert!(!scored.contains(&"missing".to_string()));
    }

    #[tokio::test]
    async fn test_corrupted_assets_get_zero_quality_record() {
        let source = FakeSource::default()
            .with_asset("good", flat_png())
            .with_asset("broken", b"not an image".to_vec())
            .with_asset("empty", Vec::new());
        let (orch, _) = orchestrator(source);

        let batch = orch.submit("user-1", &ids(&["good", "broken", "empty"])).unwrap();
        let done = orch.run(&batch.id).await.unwrap();
        assert_eq!(done.status, BatchStatus::Complete);
        assert_eq!(done.analyzed_assets, 1);
        assert_eq!(done.skipped_assets, 2);

        let status = orch.status(&batch.id).unwrap();
        assert!((status.progress_percent - 100.0 / 3.0).abs() < 1e-9);

        let scores = orch.store().list_scores(&batch.id).unwrap();
        assert_eq!(scores.len(), 3);
        for score in scores.iter().filter(|s| s.asset_id != "good") {
            assert!(score.is_corrupted);
            assert_eq!(score.blur_score, None);
            assert_eq!(score.exposure_score, None);
            assert_eq!(score.overall_quality, Some(0.0));
        }
    }

    #[tokio::test]
    async fn test_corrupted_frames_stay_out_of_bursts() {
        let source = FakeSource::default()
            .with_asset("a", flat_png())
            .with_asset("b", b"truncated".to_vec())
            .with_asset("c", flat_png())
            .with_capture_time("a", 0)
            .with_capture_time("b", 300)
            .with_capture_time("c", 600);
        let (orch, _) = orchestrator(source);

        let batch = orch.submit("user-1", &ids(&["a", "b", "c"])).unwrap();
        orch.run(&batch.id).await.unwrap();

        let bursts = orch.store().list_bursts(&batch.id).unwrap();
        assert_eq!(bursts.len(), 1);
        assert_eq!(bursts[0].asset_ids, ids(&["a", "c"]));
    }

    #[tokio::test]
    async fn test_analysis_failures_are_skipped_without_score() {
        let gray_alpha = GrayAlphaImage::from_pixel(16, 16, LumaA([120, 255]));
        let source = FakeSource::default()
            .with_asset("good", flat_png())
            .with_asset("gray-alpha", png_bytes(DynamicImage::ImageLumaA8(gray_alpha)));
        let (orch, _) = orchestrator(source);

        let batch = orch.submit("user-1", &ids(&["good", "gray-alpha"])).unwrap();
        let done = orch.run(&batch.id).await.unwrap();

        assert_eq!(done.status, BatchStatus::Complete);
        assert_eq!(done.analyzed_assets, 1);
        assert_eq!(done.skipped_assets, 1);

        let scores = orch.store().list_scores(&batch.id).unwrap();
        assert_eq!(scores.len(), 1);
        assert!(scores.iter().all(|s| s.asset_id != "gray-alpha"));
    }

    #[tokio::test]
    async fn test_min_burst_size_below_two_is_raised() {
        let source = FakeSource::default()
            .with_asset("a", flat_png())
            .with_asset("b", flat_png())
            .with_capture_time("a", 0)
            .with_capture_time("b", 5 * 60 * 1000);
        let (orch, _) = orchestrator(source);
        let orch = orch.with_burst_config(BurstConfig {
            interval_seconds: 2.0,
            min_burst_size: 1,
        });

        let batch = orch.submit("user-1", &ids(&["a", "b"])).unwrap();
        let done = orch.run(&batch.id).await.unwrap();

        assert_eq!(done.status, BatchStatus::Complete);
        assert!(orch.store().list_bursts(&batch.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_assets_without_capture_time_are_not_grouped() {
        let source = FakeSource::default()
            .with_asset("a", flat_png())
            .with_asset("b", flat_png())
            .with_asset("c", flat_png())
            .with_capture_time("a", 0)
            .with_capture_time("c", 400);
        let (orch, _) = orchestrator(source);

        let batch = orch.submit("user-1", &ids(&["a", "b", "c"])).unwrap();
        let done = orch.run(&batch.id).await.unwrap();
        assert_eq!(done.analyzed_assets, 3);

        let bursts = orch.store().list_bursts(&batch.id).unwrap();
        assert_eq!(bursts.len(), 1);
        assert_eq!(bursts[0].asset_ids, ids(&["a", "c"]));
    }

    #[tokio::test]
    async fn test_spread_out_assets_form_no_bursts() {
        let source = FakeSource::default()
            .with_asset("a", flat_png())
            .with_asset("b", flat_png())
            .with_capture_time("a", 0)
            .with_capture_time("b", 5 * 60 * 1000);
        let (orch, _) = orchestrator(source);

        let batch = orch.submit("user-1", &ids(&["a", "b"])).unwrap();
        orch.run(&batch.id).await.unwrap();
        assert!(orch.store().list_bursts(&batch.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exif_time_wins_over_store_metadata() {
        let exif_a = jpeg_with_exif("2024:06:01 14:30:00", None);
        let exif_b = jpeg_with_exif("2024:06:01 14:30:01", None);
        // Store metadata would put them ten minutes apart
        let source = FakeSource::default()
            .with_asset("a", exif_a)
            .with_asset("b", exif_b)
            .with_capture_time("a", 0)
            .with_capture_time("b", 10 * 60 * 1000);
        let (orch, _) = orchestrator(source);

        let batch = orch.submit("user-1", &ids(&["a", "b"])).unwrap();
        orch.run(&batch.id).await.unwrap();

        let bursts = orch.store().list_bursts(&batch.id).unwrap();
        assert_eq!(bursts.len(), 1);
        assert_eq!(bursts[0].asset_ids, ids(&["a", "b"]));
    }

    #[tokio::test]
    async fn test_store_fault_marks_batch_failed() {
        let source = Arc::new(
            FakeSource::default()
                .with_asset("a", flat_png())
                .with_asset("b", flat_png())
                .with_asset("c", flat_png()),
        );
        let store = Arc::new(FaultyStore {
            inner: BatchDb::open_in_memory().unwrap(),
            fail_on_score: 2,
            scores_seen: AtomicUsize::new(0),
        });
        let orch = BatchOrchestrator::new(store.clone(), source).with_max_concurrent_fetches(1);

        let batch = orch.submit("user-1", &ids(&["a", "b", "c"])).unwrap();
        let err = orch.run(&batch.id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::BatchFailed { .. }));

        let failed = store.load_batch(&batch.id).unwrap();
        assert_eq!(failed.status, BatchStatus::Failed);
        assert!(failed.error_message.unwrap().contains("disk I/O error"));
        assert!(store.list_bursts(&batch.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_finished_batches_are_not_rerun() {
        let (orch, _) = orchestrator(FakeSource::default().with_asset("a", flat_png()));
        let batch = orch.submit("user-1", &ids(&["a"])).unwrap();
        orch.run(&batch.id).await.unwrap();

        match orch.run(&batch.id).await {
            Err(OrchestratorError::InvalidTransition { status, .. }) => assert_eq!(status, BatchStatus::Complete),
            other => panic!("expected invalid transition, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_partially_processed_batch_is_refused() {
        let (orch, _) = orchestrator(FakeSource::default().with_asset("a", flat_png()));
        let batch = orch.submit("user-1", &ids(&["a", "b"])).unwrap();
        orch.store().record_skipped(&batch.id).unwrap();

        assert!(matches!(
            orch.run(&batch.id).await,
            Err(OrchestratorError::AlreadyStarted { processed: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_batch() {
        let (orch, _) = orchestrator(FakeSource::default());
        assert!(matches!(
            orch.run("no-such-batch").await,
            Err(OrchestratorError::Store(StoreError::BatchNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_invalid_submissions() {
        let (orch, _) = orchestrator(FakeSource::default());
        assert!(matches!(
            orch.submit("user-1", &[]),
            Err(OrchestratorError::Store(StoreError::InvalidRequest(_)))
        ));
        assert!(matches!(
            orch.submit("user-1", &ids(&["a", "a"])),
            Err(OrchestratorError::Store(StoreError::InvalidRequest(_)))
        ));
    }

    #[tokio::test]
    async fn test_fan_out_is_bounded() {
        let mut source = FakeSource::default().with_delay(Duration::from_millis(20));
        let names: Vec<String> = (0..12).map(|i| format!("asset-{i}")).collect();
        for name in &names {
            source = source.with_asset(name, flat_png());
        }
        let (orch, source) = orchestrator(source);
        let orch = orch.with_max_concurrent_fetches(3);

        let batch = orch.submit("user-1", &names).unwrap();
        let done = orch.run(&batch.id).await.unwrap();

        assert_eq!(done.analyzed_assets, 12);
        let peak = source.max_in_flight.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency {peak}");
        assert!(peak >= 2, "fetches never overlapped");
    }

    #[tokio::test]
    async fn test_slow_fetch_times_out_as_skip() {
        let source = FakeSource::default()
            .with_asset("slow", flat_png())
            .with_delay(Duration::from_millis(200));
        let (orch, _) = orchestrator(source);
        let orch = orch.with_fetch_timeout(Duration::from_millis(20));

        let batch = orch.submit("user-1", &ids(&["slow"])).unwrap();
        let done = orch.run(&batch.id).await.unwrap();
        assert_eq!(done.status, BatchStatus::Complete);
        assert_eq!(done.skipped_assets, 1);
        assert_eq!(done.analyzed_assets, 0);
    }

    #[tokio::test]
    async fn test_status_reports_progress() {
        let (orch, _) = orchestrator(FakeSource::default().with_asset("a", flat_png()));
        let batch = orch.submit("user-1", &ids(&["a", "b"])).unwrap();

        let before = orch.status(&batch.id).unwrap();
        assert_eq!(before.status, BatchStatus::Processing);
        assert_eq!(before.progress_percent, 0.0);
        assert_eq!(before.eta_seconds, None);

        orch.run(&batch.id).await.unwrap();
        let after = orch.status(&batch.id).unwrap();
        assert_eq!(after.status, BatchStatus::Complete);
        assert_eq!(after.progress_percent, 50.0);
        assert_eq!(after.analyzed_assets + after.skipped_assets, after.total_assets);
        assert_eq!(after.eta_seconds, None);
    }
}
