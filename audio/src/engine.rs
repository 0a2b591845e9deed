//! The synchronization engine.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::kalman::KalmanFilter;
use crate::types::{
    CorrectionEvent, QualityLevel, SyncAlgorithm, SyncGroup, SyncMeasurement, SyncStatistics,
};

const MEASUREMENT_WINDOW: usize = 1000;
const PERFORMANCE_WINDOW: usize = 100;
const RECENT_WINDOW: usize = 10;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync group '{0}' already exists")]
    GroupExists(String),
    #[error("sync group '{0}' not found")]
    GroupNotFound(String),
}

/// Playback position supplier, pluggable so tests can script positions.
/// Positions are monotone seconds within the current track.
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn zone_position(&self, zone_id: &str) -> Option<f64>;
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub sync_interval: Duration,
    /// Corrections are clamped to ±this many seconds.
    pub max_sync_delay: f64,
    /// Quality level whose tolerance feeds the quality score.
    pub quality: QualityLevel,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_millis(100),
            max_sync_delay: 1.0,
            quality: QualityLevel::Medium,
        }
    }
}

pub struct SyncEngine {
    config: SyncConfig,
    positions: Arc<dyn PositionSource>,
    groups: Mutex<HashMap<String, SyncGroup>>,
    measurements: Mutex<HashMap<String, VecDeque<SyncMeasurement>>>,
    statistics: Mutex<HashMap<String, SyncStatistics>>,
    filters: Mutex<HashMap<String, KalmanFilter>>,
    network_delays: Mutex<HashMap<String, f64>>,
    clock_offsets: Mutex<HashMap<String, f64>>,
    performance: Mutex<HashMap<String, VecDeque<f64>>>,
    corrections: broadcast::Sender<CorrectionEvent>,
    cancel: CancellationToken,
}

impl SyncEngine {
    pub fn new(config: SyncConfig, positions: Arc<dyn PositionSource>) -> Self {
        let (corrections, _) = broadcast::channel(256);
        Self {
            config,
            positions,
            groups: Mutex::new(HashMap::new()),
            measurements: Mutex::new(HashMap::new()),
            statistics: Mutex::new(HashMap::new()),
            filters: Mutex::new(HashMap::new()),
            network_delays: Mutex::new(HashMap::new()),
            clock_offsets: Mutex::new(HashMap::new()),
            performance: Mutex::new(HashMap::new()),
            corrections,
            cancel: CancellationToken::new(),
        }
    }

    /// Subscribe to correction events. Per-group emission is sequential.
    pub fn corrections(&self) -> broadcast::Receiver<CorrectionEvent> {
        self.corrections.subscribe()
    }

    pub fn add_sync_group(&self, group: SyncGroup) -> Result<(), SyncError> {
        let mut groups = self.groups.lock().expect("groups lock");
        if groups.contains_key(&group.group_id) {
            return Err(SyncError::GroupExists(group.group_id));
        }
        for zone in &group.slave_zone_ids {
            self.filters
                .lock()
                .expect("filters lock")
                .entry(zone.clone())
                .or_default();
            self.measurements
                .lock()
                .expect("measurements lock")
                .entry(zone.clone())
                .or_default();
            self.statistics
                .lock()
                .expect("statistics lock")
                .entry(zone.clone())
                .or_insert_with(|| SyncStatistics::empty(zone.clone()));
        }
        info!(
            group = %group.group_id,
            master = %group.master_zone_id,
            slaves = group.slave_zone_ids.len(),
            "sync group added"
        );
        groups.insert(group.group_id.clone(), group);
        Ok(())
    }

    pub fn remove_sync_group(&self, group_id: &str) -> Result<(), SyncError> {
        self.groups
            .lock()
            .expect("groups lock")
            .remove(group_id)
            .map(|_| info!(group = %group_id, "sync group removed"))
            .ok_or_else(|| SyncError::GroupNotFound(group_id.to_string()))
    }

    pub fn group(&self, group_id: &str) -> Option<SyncGroup> {
        self.groups.lock().expect("groups lock").get(group_id).cloned()
    }

    pub fn group_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.groups.lock().expect("groups lock").keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn set_network_delay(&self, zone_id: &str, delay: f64) {
        self.network_delays
            .lock()
            .expect("delays lock")
            .insert(zone_id.to_string(), delay);
    }

    pub fn set_clock_offset(&self, zone_id: &str, offset: f64) {
        self.clock_offsets
            .lock()
            .expect("offsets lock")
            .insert(zone_id.to_string(), offset);
    }

    /// Record one delay sample for a slave. Jitter is the standard
    /// deviation of the most recent retained delays.
    pub fn record_measurement(
        &self,
        slave_zone: &str,
        master_position: f64,
        slave_position: f64,
    ) -> SyncMeasurement {
        let raw_delay = master_position - slave_position;
        let network_delay = self
            .network_delays
            .lock()
            .expect("delays lock")
            .get(slave_zone)
            .copied()
            .unwrap_or(0.0);
        let clock_offset = self
            .clock_offsets
            .lock()
            .expect("offsets lock")
            .get(slave_zone)
            .copied()
            .unwrap_or(0.0);
        let delay = raw_delay - network_delay - clock_offset;

        let mut measurements = self.measurements.lock().expect("measurements lock");
        let window = measurements.entry(slave_zone.to_string()).or_default();
        let jitter = {
            let recent: Vec<f64> = window
                .iter()
                .rev()
                .take(RECENT_WINDOW)
                .map(|m| m.delay)
                .collect();
            std_dev(&recent)
        };
        let quality = self.quality_score(delay, jitter);
        let measurement = SyncMeasurement {
            timestamp: Utc::now().timestamp_micros() as f64 / 1e6,
            master_position,
            slave_position,
            delay,
            jitter,
            quality,
        };
        window.push_back(measurement);
        while window.len() > MEASUREMENT_WINDOW {
            window.pop_front();
        }
        measurement
    }

    /// Quality score: 0.5·max(0, 1−|d|/τ) + 0.5·max(0, 1−j/τ), clamped.
    fn quality_score(&self, delay: f64, jitter: f64) -> f64 {
        let tolerance = self.config.quality.tolerance();
        let delay_part = (1.0 - delay.abs() / tolerance).max(0.0);
        let jitter_part = (1.0 - jitter / tolerance).max(0.0);
        (0.5 * delay_part + 0.5 * jitter_part).clamp(0.0, 1.0)
    }

    /// Correction for a slave from its recent window, clamped to
    /// ±`max_sync_delay`.
    pub fn calculate_correction(&self, group: &SyncGroup, slave_zone: &str) -> f64 {
        let measurements = self.measurements.lock().expect("measurements lock");
        let Some(window) = measurements.get(slave_zone) else {
            return 0.0;
        };
        if window.is_empty() {
            return 0.0;
        }
        let recent: Vec<SyncMeasurement> =
            window.iter().rev().take(RECENT_WINDOW).rev().copied().collect();

        let correction = match group.sync_mode {
            SyncAlgorithm::SimpleOffset => {
                recent.iter().map(|m| m.delay).sum::<f64>() / recent.len() as f64
            }
            SyncAlgorithm::AdaptiveDelay => {
                let total_weight: f64 = recent.iter().map(|m| m.quality).sum();
                if total_weight > 0.0 {
                    recent.iter().map(|m| m.delay * m.quality).sum::<f64>() / total_weight
                } else {
                    0.0
                }
            }
            SyncAlgorithm::Kalman => {
                let latest = recent.last().map(|m| m.delay).unwrap_or(0.0);
                self.filters
                    .lock()
                    .expect("filters lock")
                    .entry(slave_zone.to_string())
                    .or_default()
                    .update(latest)
            }
            SyncAlgorithm::PtpSync => linear_trend_at(&recent, Utc::now().timestamp_micros() as f64 / 1e6),
        };

        correction.clamp(-self.config.max_sync_delay, self.config.max_sync_delay)
    }

    /// Refresh the per-slave statistics from the retained window.
    pub fn update_statistics(&self, slave_zone: &str) {
        let measurements = self.measurements.lock().expect("measurements lock");
        let Some(window) = measurements.get(slave_zone) else {
            return;
        };
        if window.is_empty() {
            return;
        }
        let delays: Vec<f64> = window.iter().map(|m| m.delay).collect();
        let avg_quality =
            window.iter().map(|m| m.quality).sum::<f64>() / window.len() as f64;
        let stats = SyncStatistics {
            zone_id: slave_zone.to_string(),
            avg_delay: delays.iter().sum::<f64>() / delays.len() as f64,
            max_delay: delays.iter().copied().fold(f64::MIN, f64::max),
            min_delay: delays.iter().copied().fold(f64::MAX, f64::min),
            jitter: std_dev(&delays),
            quality_level: QualityLevel::from_score(avg_quality),
            measurements_count: window.len(),
            last_sync_time: Utc::now(),
        };
        drop(measurements);

        self.statistics
            .lock()
            .expect("statistics lock")
            .insert(slave_zone.to_string(), stats);

        let mut performance = self.performance.lock().expect("performance lock");
        let samples = performance.entry(slave_zone.to_string()).or_default();
        samples.push_back(avg_quality);
        while samples.len() > PERFORMANCE_WINDOW {
            samples.pop_front();
        }
    }

    pub fn statistics_for(&self, zone_id: &str) -> Option<SyncStatistics> {
        self.statistics
            .lock()
            .expect("statistics lock")
            .get(zone_id)
            .cloned()
    }

    pub fn all_statistics(&self) -> Vec<SyncStatistics> {
        let mut all: Vec<SyncStatistics> = self
            .statistics
            .lock()
            .expect("statistics lock")
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.zone_id.cmp(&b.zone_id));
        all
    }

    pub fn performance_for(&self, zone_id: &str) -> Vec<f64> {
        self.performance
            .lock()
            .expect("performance lock")
            .get(zone_id)
            .map(|samples| samples.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn measurement_count(&self, zone_id: &str) -> usize {
        self.measurements
            .lock()
            .expect("measurements lock")
            .get(zone_id)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// One synchronization pass over a group: measure each slave against
    /// the master, emit corrections past the tolerance, refresh statistics.
    pub async fn sync_group_once(&self, group_id: &str) -> Result<(), SyncError> {
        let group = self
            .group(group_id)
            .ok_or_else(|| SyncError::GroupNotFound(group_id.to_string()))?;
        let Some(master_position) = self.positions.zone_position(&group.master_zone_id).await
        else {
            debug!(zone = %group.master_zone_id, "master position unavailable");
            return Ok(());
        };

        for slave_zone in &group.slave_zone_ids {
            let Some(slave_position) = self.positions.zone_position(slave_zone).await else {
                debug!(zone = %slave_zone, "slave position unavailable");
                continue;
            };
            let measurement =
                self.record_measurement(slave_zone, master_position, slave_position);
            let correction = self.calculate_correction(&group, slave_zone);
            if correction.abs() > group.tolerance_seconds {
                let event = CorrectionEvent {
                    group_id: group.group_id.clone(),
                    zone_id: slave_zone.clone(),
                    correction,
                    quality: measurement.quality,
                };
                debug!(
                    zone = %slave_zone,
                    correction,
                    "sync correction emitted"
                );
                if self.corrections.send(event).is_err() {
                    warn!("no correction subscribers");
                }
            }
            self.update_statistics(slave_zone);
        }
        Ok(())
    }

    /// Poll every group at `sync_interval` until stopped.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        info!(interval = ?engine.config.sync_interval, "sync engine started");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.config.sync_interval);
            loop {
                tokio::select! {
                    _ = engine.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        for group_id in engine.group_ids() {
                            if let Err(err) = engine.sync_group_once(&group_id).await {
                                debug!(%err, "sync pass skipped");
                            }
                        }
                    }
                }
            }
            info!("sync engine stopped");
        })
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

/// Population standard deviation; zero for fewer than two samples.
fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Least-squares line through (timestamp, delay), evaluated at `at`.
fn linear_trend_at(measurements: &[SyncMeasurement], at: f64) -> f64 {
    match measurements {
        [] => 0.0,
        [only] => only.delay,
        _ => {
            let n = measurements.len() as f64;
            let mean_t = measurements.iter().map(|m| m.timestamp).sum::<f64>() / n;
            let mean_d = measurements.iter().map(|m| m.delay).sum::<f64>() / n;
            let denom: f64 = measurements
                .iter()
                .map(|m| (m.timestamp - mean_t).powi(2))
                .sum();
            if denom.abs() < f64::EPSILON {
                return mean_d;
            }
            let slope: f64 = measurements
                .iter()
                .map(|m| (m.timestamp - mean_t) * (m.delay - mean_d))
                .sum::<f64>()
                / denom;
            let intercept = mean_d - slope * mean_t;
            slope * at + intercept
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedPositions;

    #[async_trait]
    impl PositionSource for FixedPositions {
        async fn zone_position(&self, _zone_id: &str) -> Option<f64> {
            Some(10.0)
        }
    }

    fn engine() -> SyncEngine {
        SyncEngine::new(SyncConfig::default(), Arc::new(FixedPositions))
    }

    #[test]
    fn duplicate_group_is_rejected() {
        let engine = engine();
        let group = SyncGroup {
            group_id: "g1".into(),
            master_zone_id: "living".into(),
            slave_zone_ids: vec!["kitchen".into()],
            sync_mode: SyncAlgorithm::SimpleOffset,
            tolerance_seconds: 0.05,
        };
        engine.add_sync_group(group.clone()).unwrap();
        assert!(matches!(
            engine.add_sync_group(group),
            Err(SyncError::GroupExists(_))
        ));
    }

    #[test]
    fn measurement_window_is_bounded_to_one_thousand() {
        let engine = engine();
        for i in 0..1100 {
            engine.record_measurement("kitchen", i as f64, i as f64 - 0.1);
        }
        assert_eq!(engine.measurement_count("kitchen"), 1000);
    }

    #[test]
    fn compensation_is_subtracted_from_raw_delay() {
        let engine = engine();
        engine.set_network_delay("kitchen", 0.02);
        engine.set_clock_offset("kitchen", 0.01);
        let m = engine.record_measurement("kitchen", 10.0, 9.9);
        assert!((m.delay - 0.07).abs() < 1e-12, "delay was {}", m.delay);
    }

    #[test]
    fn quality_rewards_low_delay_and_low_jitter() {
        let engine = engine();
        let perfect = engine.record_measurement("kitchen", 5.0, 5.0);
        assert!((perfect.quality - 1.0).abs() < 1e-12);
        // Delay far past tolerance zeroes the delay half; the jitter half
        // is still perfect on a first measurement.
        let awful = engine.record_measurement("bath", 5.0, 0.0);
        assert!((awful.quality - 0.5).abs() < 1e-12);
    }

    #[test]
    fn std_dev_matches_population_formula() {
        assert_eq!(std_dev(&[]), 0.0);
        assert_eq!(std_dev(&[0.5]), 0.0);
        let sd = std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((sd - 2.0).abs() < 1e-12);
    }

    #[test]
    fn linear_trend_extrapolates() {
        let mk = |t: f64, d: f64| SyncMeasurement {
            timestamp: t,
            master_position: 0.0,
            slave_position: 0.0,
            delay: d,
            jitter: 0.0,
            quality: 1.0,
        };
        // Delay grows 0.01 per second.
        let window = vec![mk(0.0, 0.0), mk(1.0, 0.01), mk(2.0, 0.02)];
        let projected = linear_trend_at(&window, 5.0);
        assert!((projected - 0.05).abs() < 1e-9, "projected {projected}");
    }

    #[test]
    fn corrections_are_clamped_to_max_sync_delay() {
        let engine = engine();
        let group = SyncGroup {
            group_id: "g1".into(),
            master_zone_id: "living".into(),
            slave_zone_ids: vec!["garage".into()],
            sync_mode: SyncAlgorithm::SimpleOffset,
            tolerance_seconds: 0.05,
        };
        engine.add_sync_group(group.clone()).unwrap();
        for _ in 0..5 {
            engine.record_measurement("garage", 100.0, 0.0);
        }
        let correction = engine.calculate_correction(&group, "garage");
        assert_eq!(correction, 1.0);
    }
}
