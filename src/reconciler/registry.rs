use std::collections::{BTreeMap, HashMap};

use crate::peer::Peer;
use crate::target::TargetId;

/// Known sibling peers and the probe target each one currently has.
///
/// Members are kept for as long as the event source reports them, whether
/// or not a target could be created. A member without an active target is
/// pending.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    members: BTreeMap<String, Peer>,
    active: HashMap<String, TargetId>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a member, returning the previous record.
    pub fn insert(&mut self, peer: Peer) -> Option<Peer> {
        self.members.insert(peer.name.clone(), peer)
    }

    /// Forget a member and return its record and active target.
    pub fn remove(&mut self, name: &str) -> (Option<Peer>, Option<TargetId>) {
        (self.members.remove(name), self.active.remove(name))
    }

    pub fn get(&self, name: &str) -> Option<&Peer> {
        self.members.get(name)
    }

    /// Copy of the member list, safe to iterate while mutating the registry.
    pub fn snapshot(&self) -> Vec<Peer> {
        self.members.values().cloned().collect()
    }

    /// Members that have no active target.
    pub fn pending(&self) -> impl Iterator<Item = &Peer> {
        self.members
            .values()
            .filter(|p| !self.active.contains_key(&p.name))
    }

    pub fn active_target(&self, name: &str) -> Option<&TargetId> {
        self.active.get(name)
    }

    /// Record `id` as the active target of `name`, returning the previous one.
    pub fn set_active(&mut self, name: &str, id: TargetId) -> Option<TargetId> {
        self.active.insert(name.to_string(), id)
    }

    pub fn clear_active(&mut self, name: &str) -> Option<TargetId> {
        self.active.remove(name)
    }

    /// Remove and return every active target.
    pub fn drain_active(&mut self) -> Vec<(String, TargetId)> {
        self.active.drain().collect()
    }

    /// All active targets, sorted.
    pub fn active_targets(&self) -> Vec<TargetId> {
        let mut ids: Vec<TargetId> = self.active.values().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }
}
