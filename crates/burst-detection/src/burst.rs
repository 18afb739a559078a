//! Burst detection and grouping
//!
//! Partitions photos into burst sequences by capture-time adjacency: a photo
//! extends the open burst when it was taken within `interval_seconds` of the
//! photo immediately before it. Each burst gets a recommended best shot, the
//! frame with the highest overall quality.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BurstConfig {
    /// Maximum gap between consecutive shots in the same burst (seconds)
    pub interval_seconds: f64,
    /// Minimum number of shots to constitute a burst
    pub min_burst_size: usize,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 2.0,
            min_burst_size: 2,
        }
    }
}

/// A scored photo waiting to be grouped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurstCandidate {
    pub asset_id: String,
    pub capture_time: DateTime<Utc>,
    pub quality_score: f64,
}

impl BurstCandidate {
    pub fn new(asset_id: impl Into<String>, capture_time: DateTime<Utc>, quality_score: f64) -> Self {
        Self {
            asset_id: asset_id.into(),
            capture_time,
            quality_score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurstGroup {
    /// Member asset ids, sorted by capture time
    pub asset_ids: Vec<String>,
    /// Suggested best pick
    pub recommended_asset_id: Option<String>,
    /// Number of frames in the burst
    pub frame_count: usize,
    /// Duration of the entire burst sequence (milliseconds)
    pub duration_ms: i64,
    /// Average gap between consecutive shots (milliseconds)
    pub avg_gap_ms: f64,
    /// Estimated frames per second
    pub estimated_fps: f64,
}

impl BurstGroup {
    /// Build a group from time-ordered members.
    pub fn from_members(members: &[BurstCandidate]) -> Self {
        let frame_count = members.len();
        let (duration_ms, avg_gap_ms, estimated_fps) = match (members.first(), members.last()) {
            (Some(first), Some(last)) if frame_count > 1 => {
                let duration = (last.capture_time - first.capture_time).num_milliseconds();
                let gaps: i64 = members
                    .windows(2)
                    .map(|pair| (pair[1].capture_time - pair[0].capture_time).num_milliseconds())
                    .sum();
                let avg_gap = gaps as f64 / (frame_count - 1) as f64;
                let fps = if duration > 0 {
                    (frame_count as f64 * 1000.0) / duration as f64
                } else {
                    0.0
                };
                (duration, avg_gap, fps)
            }
            _ => (0, 0.0, 0.0),
        };

        Self {
            asset_ids: members.iter().map(|m| m.asset_id.clone()).collect(),
            recommended_asset_id: recommend_best_shot(members).map(str::to_string),
            frame_count,
            duration_ms,
            avg_gap_ms,
            estimated_fps,
        }
    }
}

pub struct BurstDetector {
    config: BurstConfig,
}

impl BurstDetector {
    pub fn new(config: BurstConfig) -> Self {
        Self { config }
    }

    pub fn with_default_config() -> Self {
        Self::new(BurstConfig::default())
    }

    pub fn config(&self) -> &BurstConfig {
        &self.config
    }

    /// Detect burst sequences, returned in capture order.
    ///
    /// Groups smaller than `min_burst_size` are dropped, never merged into a
    /// neighbour.
    pub fn detect_bursts(&self, mut photos: Vec<BurstCandidate>) -> Vec<Vec<BurstCandidate>> {
        // Stable sort: equal timestamps keep their submission order
        photos.sort_by_key(|photo| photo.capture_time);

        let mut bursts = Vec::new();
        let mut current: Vec<BurstCandidate> = Vec::new();

        for photo in photos {
            if let Some(previous) = current.last() {
                if gap_seconds(previous, &photo) > self.config.interval_seconds {
                    let finished = std::mem::take(&mut current);
                    if finished.len() >= self.config.min_burst_size {
                        bursts.push(finished);
                    }
                }
            }
            current.push(photo);
        }

        if current.len() >= self.config.min_burst_size {
            bursts.push(current);
        }

        bursts
    }

    /// Detect bursts and pick a best shot for each.
    pub fn group(&self, photos: Vec<BurstCandidate>) -> Vec<BurstGroup> {
        self.detect_bursts(photos)
            .iter()
            .map(|members| BurstGroup::from_members(members))
            .collect()
    }
}

fn gap_seconds(previous: &BurstCandidate, next: &BurstCandidate) -> f64 {
    (next.capture_time - previous.capture_time)
        .num_microseconds()
        .map(|us| us as f64 / 1_000_000.0)
        .unwrap_or(f64::INFINITY)
}

/// Id of the highest-quality photo; ties go to the earliest in input order.
pub fn recommend_best_shot(burst: &[BurstCandidate]) -> Option<&str> {
    let mut best: Option<&BurstCandidate> = None;
    for candidate in burst {
        match best {
            Some(current) if candidate.quality_score <= current.quality_score => {}
            _ => best = Some(candidate),
        }
    }
    best.map(|c| c.asset_id.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 14, 30, 0).unwrap()
    }

    fn photo_at(id: &str, offset_ms: i64) -> BurstCandidate {
        BurstCandidate::new(id, base_time() + Duration::milliseconds(offset_ms), 50.0)
    }

    fn scored(id: &str, quality: f64) -> BurstCandidate {
        BurstCandidate::new(id, base_time(), quality)
    }

    fn ids(burst: &[BurstCandidate]) -> Vec<&str> {
        burst.iter().map(|p| p.asset_id.as_str()).collect()
    }

    #[test]
    fn test_empty_and_single_inputs() {
        let detector = BurstDetector::with_default_config();
        assert!(detector.detect_bursts(Vec::new()).is_empty());
        assert!(detector.detect_bursts(vec![photo_at("a", 0)]).is_empty());
    }

    #[test]
    fn test_rapid_sequence_is_one_burst() {
        let detector = BurstDetector::with_default_config();
        let photos = (0..5).map(|i| photo_at(&format!("p{i}"), i * 500)).collect();

        let bursts = detector.detect_bursts(photos);
        assert_eq!(bursts.len(), 1);
        assert_eq!(bursts[0].len(), 5);
    }

    #[test]
    fn test_widely_spaced_photos_form_no_burst() {
        let detector = BurstDetector::with_default_config();
        let five_minutes = 5 * 60 * 1000;
        let photos = (0..3).map(|i| photo_at(&format!("p{i}"), i * five_minutes)).collect();

        assert!(detector.detect_bursts(photos).is_empty());
    }

    #[test]
    fn test_two_clusters_in_encounter_order() {
        let detector = BurstDetector::with_default_config();
        let later = 5 * 60 * 1000;
        let photos = vec![
            photo_at("a1", 0),
            photo_at("a2", 500),
            photo_at("a3", 1000),
            photo_at("b1", later),
            photo_at("b2", later + 500),
            photo_at("b3", later + 1000),
            photo_at("b4", later + 1500),
        ];

        let bursts = detector.detect_bursts(photos);
        assert_eq!(bursts.len(), 2);
        assert_eq!(ids(&bursts[0]), vec!["a1", "a2", "a3"]);
        assert_eq!(ids(&bursts[1]), vec!["b1", "b2", "b3", "b4"]);
    }

    #[test]
    fn test_unsorted_input_is_ordered_by_time() {
        let detector = BurstDetector::with_default_config();
        let photos = vec![photo_at("c", 1000), photo_at("a", 0), photo_at("b", 500)];

        let bursts = detector.detect_bursts(photos);
        assert_eq!(ids(&bursts[0]), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_equal_timestamps_keep_input_order() {
        let detector = BurstDetector::with_default_config();
        let photos = vec![photo_at("z", 0), photo_at("y", 0), photo_at("x", 0)];

        let bursts = detector.detect_bursts(photos);
        assert_eq!(ids(&bursts[0]), vec!["z", "y", "x"]);
    }

    #[test]
    fn test_gap_is_measured_from_previous_photo() {
        // Each gap is 1.5s, so the chain spans 6s but stays one burst
        let detector = BurstDetector::with_default_config();
        let photos = (0..5).map(|i| photo_at(&format!("p{i}"), i * 1500)).collect();

        let bursts = detector.detect_bursts(photos);
        assert_eq!(bursts.len(), 1);
        assert_eq!(bursts[0].len(), 5);
    }

    #[test]
    fn test_gap_equal_to_interval_extends_burst() {
        let detector = BurstDetector::with_default_config();
        let bursts = detector.detect_bursts(vec![photo_at("a", 0), photo_at("b", 2000)]);
        assert_eq!(bursts.len(), 1);

        let bursts = detector.detect_bursts(vec![photo_at("a", 0), photo_at("b", 2001)]);
        assert!(bursts.is_empty());
    }

    #[test]
    fn test_undersized_groups_are_discarded() {
        let detector = BurstDetector::new(BurstConfig {
            interval_seconds: 2.0,
            min_burst_size: 3,
        });
        let photos = vec![
            photo_at("a1", 0),
            photo_at("a2", 500),
            // 10s gap
            photo_at("b1", 10_500),
            photo_at("b2", 11_000),
            photo_at("b3", 11_500),
            // trailing pair, too small
            photo_at("c1", 30_000),
            photo_at("c2", 30_500),
        ];

        let bursts = detector.detect_bursts(photos);
        assert_eq!(bursts.len(), 1);
        assert_eq!(ids(&bursts[0]), vec!["b1", "b2", "b3"]);
    }

    #[test]
    fn test_recommend_best_shot() {
        let burst = vec![scored("a", 45.0), scored("b", 85.0), scored("c", 60.0)];
        assert_eq!(recommend_best_shot(&burst), Some("b"));
    }

    #[test]
    fn test_recommend_tie_prefers_first() {
        let burst = vec![scored("a", 80.0), scored("b", 80.0)];
        assert_eq!(recommend_best_shot(&burst), Some("a"));

        let burst = vec![scored("x", 10.0), scored("b", 80.0), scored("a", 80.0)];
        assert_eq!(recommend_best_shot(&burst), Some("b"));
    }

    #[test]
    fn test_recommend_empty_burst() {
        assert_eq!(recommend_best_shot(&[]), None);
    }

    #[test]
    fn test_group_stats_and_recommendation() {
        let detector = BurstDetector::with_default_config();
        let mut photos: Vec<_> = [0, 250, 500, 1000]
            .iter()
            .enumerate()
            .map(|(i, &ms)| photo_at(&format!("p{i}"), ms))
            .collect();
        photos[2].quality_score = 91.0;

        let groups = detector.group(photos);
        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        assert_eq!(group.frame_count, 4);
        assert_eq!(group.asset_ids, vec!["p0", "p1", "p2", "p3"]);
        assert_eq!(group.recommended_asset_id.as_deref(), Some("p2"));
        assert_eq!(group.duration_ms, 1000);
        assert!((group.avg_gap_ms - 1000.0 / 3.0).abs() < 1e-9);
        assert_eq!(group.estimated_fps, 4.0);
    }

    #[test]
    fn test_simultaneous_frames_have_zero_fps() {
        let group = BurstGroup::from_members(&[photo_at("a", 0), photo_at("b", 0)]);
        assert_eq!(group.duration_ms, 0);
        assert_eq!(group.estimated_fps, 0.0);
    }
}
