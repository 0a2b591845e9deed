//! UI adapters.
//!
//! Three front-ends implement the same contract: start/stop, targeted and
//! broadcast delivery, and observable counters. Incoming payloads become a
//! canonical [`CommandMessage`] and go through the orchestrator's
//! `process_command` tool via a [`servis_rpc::ServiceCaller`].

pub mod adapter;
pub mod mobile;
pub mod text;
pub mod web;

pub use adapter::{AdapterStats, CommandMessage, ConnectionInfo, StatsSnapshot, UiAdapter, UiError};
pub use mobile::MobileAdapter;
pub use text::TextAdapter;
pub use web::WebAdapter;
