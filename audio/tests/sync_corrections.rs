//! Correction behaviour with scripted playback positions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use servis_audio::{
    PositionSource, SyncAlgorithm, SyncConfig, SyncEngine, SyncGroup,
};

/// Positions scripted per zone; each read pops the next value.
#[derive(Default)]
struct ScriptedPositions {
    feeds: Mutex<HashMap<String, Vec<f64>>>,
}

impl ScriptedPositions {
    fn feed(&self, zone: &str, positions: &[f64]) {
        let mut feeds = self.feeds.lock().unwrap();
        feeds
            .entry(zone.to_string())
            .or_default()
            .extend_from_slice(positions);
    }
}

#[async_trait]
impl PositionSource for ScriptedPositions {
    async fn zone_position(&self, zone_id: &str) -> Option<f64> {
        let mut feeds = self.feeds.lock().unwrap();
        let feed = feeds.get_mut(zone_id)?;
        if feed.is_empty() {
            None
        } else {
            Some(feed.remove(0))
        }
    }
}

fn two_slave_group(tolerance: f64) -> SyncGroup {
    SyncGroup {
        group_id: "living-pair".into(),
        master_zone_id: "living".into(),
        slave_zone_ids: vec!["kitchen".into(), "bedroom".into()],
        sync_mode: SyncAlgorithm::SimpleOffset,
        tolerance_seconds: tolerance,
    }
}

/// Scripted delays [0.10, 0.12, 0.08, 0.10] for each slave: master stays at
/// 100.0 while slaves lag by the wanted amount.
fn feed_delays(positions: &ScriptedPositions) {
    let delays = [0.10, 0.12, 0.08, 0.10];
    positions.feed("living", &[100.0; 4]);
    let slave_positions: Vec<f64> = delays.iter().map(|d| 100.0 - d).collect();
    positions.feed("kitchen", &slave_positions);
    positions.feed("bedroom", &slave_positions);
}

#[tokio::test]
async fn simple_offset_correction_is_the_mean_of_recent_delays() {
    let positions = Arc::new(ScriptedPositions::default());
    feed_delays(&positions);
    let engine = Arc::new(SyncEngine::new(SyncConfig::default(), positions.clone()));
    engine.add_sync_group(two_slave_group(0.05)).unwrap();

    for _ in 0..4 {
        engine.sync_group_once("living-pair").await.unwrap();
    }

    let group = engine.group("living-pair").unwrap();
    for zone in ["kitchen", "bedroom"] {
        let correction = engine.calculate_correction(&group, zone);
        assert!(
            (correction - 0.10).abs() < 1e-9,
            "{zone} correction was {correction}"
        );
    }
}

#[tokio::test]
async fn events_fire_only_past_the_tolerance() {
    // Tight tolerance: 0.10 > 0.05, so corrections must be emitted.
    let positions = Arc::new(ScriptedPositions::default());
    feed_delays(&positions);
    let engine = Arc::new(SyncEngine::new(SyncConfig::default(), positions));
    engine.add_sync_group(two_slave_group(0.05)).unwrap();
    let mut events = engine.corrections();
    for _ in 0..4 {
        engine.sync_group_once("living-pair").await.unwrap();
    }
    let event = events.try_recv().expect("a correction event");
    assert_eq!(event.group_id, "living-pair");
    assert!(event.correction.abs() > 0.05);

    // Loose tolerance: 0.10 <= 0.2 means silence.
    let positions = Arc::new(ScriptedPositions::default());
    feed_delays(&positions);
    let engine = Arc::new(SyncEngine::new(SyncConfig::default(), positions));
    engine.add_sync_group(two_slave_group(0.2)).unwrap();
    let mut events = engine.corrections();
    for _ in 0..4 {
        engine.sync_group_once("living-pair").await.unwrap();
    }
    assert!(events.try_recv().is_err(), "no event expected within tolerance");
}

#[tokio::test]
async fn statistics_reflect_the_scripted_window() {
    let positions = Arc::new(ScriptedPositions::default());
    feed_delays(&positions);
    let engine = Arc::new(SyncEngine::new(SyncConfig::default(), positions));
    engine.add_sync_group(two_slave_group(0.05)).unwrap();
    for _ in 0..4 {
        engine.sync_group_once("living-pair").await.unwrap();
    }

    let stats = engine.statistics_for("kitchen").expect("statistics exist");
    assert_eq!(stats.measurements_count, 4);
    assert!((stats.avg_delay - 0.10).abs() < 1e-9);
    assert!((stats.max_delay - 0.12).abs() < 1e-9);
    assert!((stats.min_delay - 0.08).abs() < 1e-9);

    let samples = engine.performance_for("kitchen");
    assert_eq!(samples.len(), 4);
}

#[tokio::test]
async fn adaptive_delay_weights_by_quality() {
    struct StaticPositions;
    #[async_trait]
    impl PositionSource for StaticPositions {
        async fn zone_position(&self, zone_id: &str) -> Option<f64> {
            // Master leads the slave by a constant 30 ms.
            Some(if zone_id == "living" { 50.0 } else { 49.97 })
        }
    }

    let engine = Arc::new(SyncEngine::new(SyncConfig::default(), Arc::new(StaticPositions)));
    engine
        .add_sync_group(SyncGroup {
            group_id: "adaptive".into(),
            master_zone_id: "living".into(),
            slave_zone_ids: vec!["porch".into()],
            sync_mode: SyncAlgorithm::AdaptiveDelay,
            tolerance_seconds: 0.01,
        })
        .unwrap();
    for _ in 0..6 {
        engine.sync_group_once("adaptive").await.unwrap();
    }
    let group = engine.group("adaptive").unwrap();
    let correction = engine.calculate_correction(&group, "porch");
    assert!((correction - 0.03).abs() < 1e-6, "correction {correction}");
}

#[tokio::test]
async fn kalman_mode_tracks_a_steady_delay() {
    struct SteadyPositions;
    #[async_trait]
    impl PositionSource for SteadyPositions {
        async fn zone_position(&self, zone_id: &str) -> Option<f64> {
            Some(if zone_id == "living" { 20.0 } else { 19.95 })
        }
    }

    let engine = Arc::new(SyncEngine::new(SyncConfig::default(), Arc::new(SteadyPositions)));
    engine
        .add_sync_group(SyncGroup {
            group_id: "kalman-group".into(),
            master_zone_id: "living".into(),
            slave_zone_ids: vec!["den".into()],
            sync_mode: SyncAlgorithm::Kalman,
            tolerance_seconds: 0.01,
        })
        .unwrap();
    for _ in 0..50 {
        engine.sync_group_once("kalman-group").await.unwrap();
    }
    let group = engine.group("kalman-group").unwrap();
    let correction = engine.calculate_correction(&group, "den");
    assert!((correction - 0.05).abs() < 5e-3, "correction {correction}");
}
