//! peerping keeps a probing engine's target set in line with fleet
//! membership and exports the engine's round-trip statistics to Prometheus.

pub mod agent;
pub mod config;
pub mod engine;
pub mod export;
pub mod peer;
pub mod reconciler;
pub mod target;
pub mod telemetry;
