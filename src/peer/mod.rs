//! Fleet peer model and the lifecycle events delivered by the event source.

mod version;

pub use version::{Version, VersionOrdering};

/// One member of the fleet as reported by the event source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Peer {
    /// Unique name within the fleet.
    pub name: String,
    /// Identifier of the node the peer is scheduled on.
    pub node: String,
    /// Address probes are sent to. Empty until the network stack assigns it.
    pub probe_address: String,
    /// Address of the hosting node.
    pub host_address: String,
    pub version: Version,
}

impl Peer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = node.into();
        self
    }

    pub fn with_probe_address(mut self, addr: impl Into<String>) -> Self {
        self.probe_address = addr.into();
        self
    }

    pub fn with_host_address(mut self, addr: impl Into<String>) -> Self {
        self.host_address = addr.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<Version>) -> Self {
        self.version = version.into();
        self
    }

    /// Returns true once a probe address has been assigned.
    pub fn has_probe_address(&self) -> bool {
        !self.probe_address.is_empty()
    }
}

/// A peer lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Added(Peer),
    Updated { old: Peer, new: Peer },
    Deleted(Peer),
}

impl PeerEvent {
    /// Returns the canonical metric/log label.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Added(_) => "add",
            Self::Updated { .. } => "update",
            Self::Deleted(_) => "delete",
        }
    }

    /// Name of the peer the event refers to.
    pub fn peer_name(&self) -> &str {
        match self {
            Self::Added(p) | Self::Deleted(p) => &p.name,
            Self::Updated { new, .. } => &new.name,
        }
    }
}

/// Receiver of peer lifecycle events.
///
/// Implementations are driven sequentially: no two handler calls overlap.
pub trait PeerEventHandler {
    fn on_add(&mut self, peer: Peer);

    fn on_update(&mut self, old: Peer, new: Peer);

    fn on_delete(&mut self, peer: Peer);

    /// Route a tagged event to the matching handler.
    fn dispatch(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::Added(peer) => self.on_add(peer),
            PeerEvent::Updated { old, new } => self.on_update(old, new),
            PeerEvent::Deleted(peer) => self.on_delete(peer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl PeerEventHandler for Recorder {
        fn on_add(&mut self, peer: Peer) {
            self.calls.push(format!("add {}", peer.name));
        }

        fn on_update(&mut self, old: Peer, new: Peer) {
            self.calls
                .push(format!("update {} {}->{}", new.name, old.version, new.version));
        }

        fn on_delete(&mut self, peer: Peer) {
            self.calls.push(format!("delete {}", peer.name));
        }
    }

    #[test]
    fn test_dispatch_routes_each_variant() {
        let mut rec = Recorder::default();
        let a = Peer::new("a").with_version("1");

        rec.dispatch(PeerEvent::Added(a.clone()));
        rec.dispatch(PeerEvent::Updated {
            old: a.clone(),
            new: a.clone().with_version("2"),
        });
        rec.dispatch(PeerEvent::Deleted(a));

        assert_eq!(rec.calls, vec!["add a", "update a 1->2", "delete a"]);
    }

    #[test]
    fn test_event_kind_and_name() {
        let ev = PeerEvent::Updated {
            old: Peer::new("old-name"),
            new: Peer::new("b"),
        };
        assert_eq!(ev.kind(), "update");
        assert_eq!(ev.peer_name(), "b");
        assert_eq!(PeerEvent::Deleted(Peer::new("c")).kind(), "delete");
    }

    #[test]
    fn test_has_probe_address() {
        assert!(!Peer::new("a").has_probe_address());
        assert!(Peer::new("a").with_probe_address("10.0.0.1").has_probe_address());
    }
}
