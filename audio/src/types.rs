//! Synchronization data model.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Correction algorithms a group can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SyncAlgorithm {
    SimpleOffset,
    AdaptiveDelay,
    Kalman,
    PtpSync,
}

impl Default for SyncAlgorithm {
    fn default() -> Self {
        SyncAlgorithm::AdaptiveDelay
    }
}

/// Quality levels with their delay tolerance in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    Low,
    Medium,
    High,
    Ultra,
}

impl QualityLevel {
    /// Tolerance used by the quality score: low 100 ms, medium 50 ms,
    /// high 20 ms, ultra 5 ms.
    pub fn tolerance(&self) -> f64 {
        match self {
            QualityLevel::Low => 0.1,
            QualityLevel::Medium => 0.05,
            QualityLevel::High => 0.02,
            QualityLevel::Ultra => 0.005,
        }
    }

    /// Level for an average quality score: ultra ≥ 0.9, high ≥ 0.8,
    /// medium ≥ 0.6, else low.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.9 {
            QualityLevel::Ultra
        } else if score >= 0.8 {
            QualityLevel::High
        } else if score >= 0.6 {
            QualityLevel::Medium
        } else {
            QualityLevel::Low
        }
    }
}

/// One master/slaves binding.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SyncGroup {
    pub group_id: String,
    pub master_zone_id: String,
    pub slave_zone_ids: Vec<String>,
    #[serde(default)]
    pub sync_mode: SyncAlgorithm,
    /// Corrections smaller than this are not emitted.
    pub tolerance_seconds: f64,
}

/// One delay sample for a slave zone.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SyncMeasurement {
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub master_position: f64,
    pub slave_position: f64,
    /// Compensated delay master − slave, seconds.
    pub delay: f64,
    pub jitter: f64,
    /// Score in [0, 1].
    pub quality: f64,
}

/// Rolling statistics for one slave zone, derived from the retained
/// measurement window only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatistics {
    pub zone_id: String,
    pub avg_delay: f64,
    pub max_delay: f64,
    pub min_delay: f64,
    pub jitter: f64,
    pub quality_level: QualityLevel,
    pub measurements_count: usize,
    pub last_sync_time: DateTime<Utc>,
}

impl SyncStatistics {
    pub fn empty(zone_id: impl Into<String>) -> Self {
        Self {
            zone_id: zone_id.into(),
            avg_delay: 0.0,
            max_delay: 0.0,
            min_delay: 0.0,
            jitter: 0.0,
            quality_level: QualityLevel::Low,
            measurements_count: 0,
            last_sync_time: Utc::now(),
        }
    }
}

/// Emitted when a slave needs an audio shift larger than the group
/// tolerance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionEvent {
    pub group_id: String,
    pub zone_id: String,
    /// Seconds to shift the slave by.
    pub correction: f64,
    pub quality: f64,
}
