use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use thiserror::Error;

use crate::target::TargetId;

/// Aggregate round-trip statistics for one probe target.
///
/// Times are in the engine's native unit (milliseconds).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProbeStats {
    pub best: f32,
    pub worst: f32,
    pub mean: f32,
    pub std_dev: f32,
    pub packets_sent: u64,
    pub packets_lost: u64,
}

impl ProbeStats {
    /// True once at least one probe got an answer.
    pub fn has_replies(&self) -> bool {
        self.packets_sent > self.packets_lost
    }

    /// Fraction of probes lost, NaN when nothing was sent yet.
    pub fn loss_ratio(&self) -> f64 {
        self.packets_lost as f64 / self.packets_sent as f64
    }
}

/// Errors returned by a probing engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("target {0} already exists")]
    DuplicateTarget(String),

    #[error("target rejected: {0}")]
    Rejected(String),
}

/// Probing engine contract.
///
/// The engine owns target liveness and rolling statistics. All methods
/// are non-blocking and may be called concurrently.
pub trait ProbeEngine: Send + Sync {
    /// Start probing `addr` under `id` once `delay` has elapsed.
    fn add_target_delayed(
        &self,
        id: &TargetId,
        addr: IpAddr,
        delay: Duration,
    ) -> Result<(), EngineError>;

    /// Stop probing `id`. Unknown ids are ignored.
    fn remove_target(&self, id: &TargetId);

    /// Statistics gathered since the last export. Empty means nothing new.
    fn export(&self) -> HashMap<TargetId, ProbeStats>;
}
