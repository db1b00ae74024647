//! Keeps the probing engine's target set in line with fleet membership.
//!
//! The reconciler consumes add/update/delete events for sibling peers and
//! for the local peer ("self"), and derives one probe target per sibling
//! once both ends have a probe address. Events for the same peer arrive in
//! order; events for different peers may interleave arbitrarily.
//!
//! Handlers never fail. Address resolution and engine errors are logged
//! and the event is dropped; a later event for the same peer retries.

pub mod registry;
pub mod resolve;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::engine::{EngineError, ProbeEngine};
use crate::export::HealthMetrics;
use crate::peer::{Peer, PeerEventHandler, VersionOrdering};
use crate::target::TargetId;

pub use self::registry::PeerRegistry;
pub use self::resolve::{resolve_probe_address, Jitter, ResolveError};

/// Default ceiling for the random delay before a new target starts probing.
pub const DEFAULT_JITTER_MAX: Duration = Duration::from_millis(2000);

/// Drives probe targets from peer lifecycle events.
pub struct Reconciler {
    me: Peer,
    registry: PeerRegistry,
    engine: Arc<dyn ProbeEngine>,
    jitter: Jitter,
    ordering: VersionOrdering,
    health: Option<Arc<HealthMetrics>>,
}

impl Reconciler {
    /// Create a reconciler for the local peer `me`, whose probe address may
    /// still be unknown.
    pub fn new(me: Peer, engine: Arc<dyn ProbeEngine>) -> Self {
        Self {
            me,
            registry: PeerRegistry::new(),
            engine,
            jitter: Jitter::new(DEFAULT_JITTER_MAX),
            ordering: VersionOrdering::default(),
            health: None,
        }
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_version_ordering(mut self, ordering: VersionOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    /// Record event and target counters in `health`.
    pub fn with_metrics(mut self, health: Arc<HealthMetrics>) -> Self {
        self.health = Some(health);
        self
    }

    /// The current local peer.
    pub fn me(&self) -> &Peer {
        &self.me
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Sorted ids of every target currently submitted to the engine.
    pub fn active_targets(&self) -> Vec<TargetId> {
        self.registry.active_targets()
    }

    fn is_me(&self, peer: &Peer) -> bool {
        peer.name == self.me.name
    }

    /// Replace the local peer, rebuilding targets when its identity moved.
    fn adopt_me(&mut self, me: Peer) {
        let rekey = me.probe_address != self.me.probe_address
            || me.node != self.me.node
            || me.host_address != self.me.host_address;

        if rekey {
            info!(
                old_ip = %self.me.probe_address,
                new_ip = %me.probe_address,
                "local peer identity changed, rebuilding targets",
            );
            self.remove_all_targets();
        }

        self.me = me;

        if !self.me.has_probe_address() {
            return;
        }

        for peer in self.registry.snapshot() {
            self.ensure_target(&peer.name);
        }
    }

    /// Make the engine probe `name` under the id derived from the current
    /// records, replacing any target created under an older id.
    fn ensure_target(&mut self, name: &str) {
        let Some(peer) = self.registry.get(name).cloned() else {
            return;
        };
        let id = TargetId::new(&self.me, &peer);

        if let Some(current) = self.registry.active_target(name) {
            if *current == id {
                return;
            }
            self.remove_target(name);
        }

        let addr = match resolve_probe_address(&peer.probe_address) {
            Ok(addr) => addr,
            Err(e) => {
                error!(error = %e, peer = %name, "resolve peer probe address");
                self.record_target_op("add", "resolve_error");
                return;
            }
        };

        let delay = self.jitter.sample();
        match self.engine.add_target_delayed(&id, addr, delay) {
            Ok(()) => {
                debug!(target_id = %id, %addr, ?delay, "added probe target");
                self.registry.set_active(name, id);
                self.record_target_op("add", "ok");
            }
            Err(EngineError::DuplicateTarget(_)) => {
                // Already probing under this exact id; track it so it is
                // removed with the peer.
                warn!(target_id = %id, "probe target already present in engine");
                self.registry.set_active(name, id);
                self.record_target_op("add", "duplicate");
            }
            Err(e) => {
                error!(error = %e, target_id = %id, "engine rejected probe target");
                self.record_target_op("add", "rejected");
            }
        }
    }

    fn remove_target(&mut self, name: &str) {
        if let Some(id) = self.registry.clear_active(name) {
            self.engine.remove_target(&id);
            debug!(target_id = %id, "removed probe target");
            self.record_target_op("remove", "ok");
        }
    }

    fn remove_all_targets(&mut self) {
        for (_, id) in self.registry.drain_active() {
            self.engine.remove_target(&id);
            debug!(target_id = %id, "removed probe target");
            self.record_target_op("remove", "ok");
        }
    }

    /// Record a peer observed while the local probe address is unknown.
    fn defer(&mut self, peer: Peer) {
        info!(peer = %peer.name, "deferring peer until local probe address is known");
        self.registry.insert(peer);
    }

    fn record_event(&self, kind: &str) {
        if let Some(h) = &self.health {
            h.events_received.with_label_values(&[kind]).inc();
        }
    }

    fn record_discard(&self, reason: &str) {
        if let Some(h) = &self.health {
            h.events_discarded.with_label_values(&[reason]).inc();
        }
    }

    fn record_target_op(&self, op: &str, result: &str) {
        if let Some(h) = &self.health {
            h.target_operations.with_label_values(&[op, result]).inc();
        }
    }

    fn update_gauges(&self) {
        if let Some(h) = &self.health {
            h.peers_tracked.set(self.registry.len() as f64);
            h.targets_active.set(self.registry.active_len() as f64);
        }
    }
}

impl PeerEventHandler for Reconciler {
    fn on_add(&mut self, peer: Peer) {
        self.record_event("add");
        info!(
            peer = %peer.name,
            version = %peer.version,
            ip = %peer.probe_address,
            "add",
        );

        if !peer.has_probe_address() {
            info!(peer = %peer.name, "ignoring add of peer without probe address");
            self.record_discard("no_address");
            return;
        }

        if self.is_me(&peer) {
            self.adopt_me(peer);
        } else if !self.me.has_probe_address() {
            self.defer(peer);
        } else {
            let name = peer.name.clone();
            self.registry.insert(peer);
            self.ensure_target(&name);
        }

        self.update_gauges();
    }

    fn on_update(&mut self, old: Peer, new: Peer) {
        self.record_event("update");
        info!(
            peer = %new.name,
            old_version = %old.version,
            new_version = %new.version,
            old_ip = %old.probe_address,
            new_ip = %new.probe_address,
            "update",
        );

        let stored = if self.is_me(&new) {
            Some(&self.me.version)
        } else {
            self.registry.get(&new.name).map(|p| &p.version)
        };
        let stale = !self.ordering.is_newer(&old.version, &new.version)
            || stored.is_some_and(|v| !self.ordering.is_newer(v, &new.version));
        if stale {
            debug!(
                peer = %new.name,
                version = %new.version,
                ordering = self.ordering.as_str(),
                "discarding stale update",
            );
            self.record_discard("stale");
            return;
        }

        if !new.has_probe_address() {
            info!(peer = %new.name, "ignoring update of peer without probe address");
            self.record_discard("no_address");
            return;
        }

        if self.is_me(&new) {
            self.adopt_me(new);
        } else if !self.me.has_probe_address() {
            self.defer(new);
        } else {
            let name = new.name.clone();
            self.registry.insert(new);
            self.ensure_target(&name);
        }

        self.update_gauges();
    }

    fn on_delete(&mut self, peer: Peer) {
        self.record_event("delete");
        info!(
            peer = %peer.name,
            version = %peer.version,
            ip = %peer.probe_address,
            "delete",
        );

        if self.is_me(&peer) {
            warn!(peer = %peer.name, "ignoring delete of local peer");
            return;
        }

        let (_, target) = self.registry.remove(&peer.name);
        if let Some(id) = target {
            self.engine.remove_target(&id);
            debug!(target_id = %id, "removed probe target");
            self.record_target_op("remove", "ok");
        }

        self.update_gauges();
    }
}
