//! Multi-zone audio synchronization.
//!
//! A sync group binds one master zone to a set of slave zones. The engine
//! polls playback positions, tracks delay measurements per slave, and emits
//! correction events when a group drifts past its tolerance. Consumers of
//! the events apply the actual audio shift.

pub mod engine;
pub mod kalman;
pub mod tools;
pub mod types;

pub use engine::{PositionSource, SyncConfig, SyncEngine, SyncError};
pub use kalman::KalmanFilter;
pub use types::{
    CorrectionEvent, QualityLevel, SyncAlgorithm, SyncGroup, SyncMeasurement, SyncStatistics,
};
