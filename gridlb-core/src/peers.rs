//! Peer registry
//!
//! Tracks every known group member together with a send-capable handle
//! and its last-observed load classification. The local node always has
//! an entry of its own, with no handle; broadcast iteration skips it.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::TransportError;
use crate::types::{LoadState, Message, NodeId};

/// Send-capable reference to a remote peer, provided by the transport
pub trait PeerHandle: Send + Sync {
    fn send(&self, msg: &Message) -> Result<(), TransportError>;
}

/// Factory for peer handles, provided by the transport
pub trait PeerConnector: Send + Sync {
    fn connect(&self, uuid: &NodeId) -> Result<Arc<dyn PeerHandle>, TransportError>;
}

/// One known group member
pub struct Peer {
    pub uuid: NodeId,
    /// None for the local node, or when the transport had no route
    pub handle: Option<Arc<dyn PeerHandle>>,
    pub classification: LoadState,
}

/// Registry of group members keyed by UUID
pub struct PeerRegistry {
    self_uuid: NodeId,
    peers: BTreeMap<NodeId, Peer>,
}

impl PeerRegistry {
    /// Create a registry containing only the local node
    pub fn new(self_uuid: NodeId) -> Self {
        let mut peers = BTreeMap::new();
        peers.insert(
            self_uuid.clone(),
            Peer {
                uuid: self_uuid.clone(),
                handle: None,
                classification: LoadState::Normal,
            },
        );
        Self { self_uuid, peers }
    }

    pub fn self_uuid(&self) -> &NodeId {
        &self.self_uuid
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn contains(&self, uuid: &NodeId) -> bool {
        self.peers.contains_key(uuid)
    }

    pub fn get(&self, uuid: &NodeId) -> Option<&Peer> {
        self.peers.get(uuid)
    }

    pub fn classification_of(&self, uuid: &NodeId) -> Option<LoadState> {
        self.peers.get(uuid).map(|p| p.classification)
    }

    /// Insert a peer or overwrite the handle of an existing one. New
    /// peers start UNKNOWN until a protocol event classifies them. The
    /// local node's entry never takes a handle.
    pub fn upsert(&mut self, uuid: NodeId, handle: Arc<dyn PeerHandle>) {
        if uuid == self.self_uuid {
            return;
        }
        match self.peers.get_mut(&uuid) {
            Some(peer) => peer.handle = Some(handle),
            None => {
                debug!("Registry: tracking new peer {}", uuid);
                self.peers.insert(
                    uuid.clone(),
                    Peer {
                        uuid,
                        handle: Some(handle),
                        classification: LoadState::Unknown,
                    },
                );
            }
        }
    }

    /// Track a peer for which no route exists yet
    pub fn track(&mut self, uuid: NodeId) {
        if uuid == self.self_uuid || self.peers.contains_key(&uuid) {
            return;
        }
        debug!("Registry: tracking unreachable peer {}", uuid);
        self.peers.insert(
            uuid.clone(),
            Peer {
                uuid,
                handle: None,
                classification: LoadState::Unknown,
            },
        );
    }

    /// Move a peer into the given classification bucket. Unknown UUIDs
    /// are a no-op.
    pub fn reclassify(&mut self, uuid: &NodeId, classification: LoadState) {
        match self.peers.get_mut(uuid) {
            Some(peer) => peer.classification = classification,
            None => debug!("Registry: reclassify of unknown peer {} ignored", uuid),
        }
    }

    /// Replace the group roster. Peers absent from `uuids` are evicted,
    /// except the local node; new members enter as NORMAL; survivors keep
    /// their classification.
    pub fn replace_group(&mut self, uuids: &[NodeId], connector: &dyn PeerConnector) {
        let self_uuid = self.self_uuid.clone();
        self.peers
            .retain(|uuid, _| *uuid == self_uuid || uuids.contains(uuid));

        for uuid in uuids {
            if *uuid == self_uuid || self.peers.contains_key(uuid) {
                continue;
            }
            let handle = match connector.connect(uuid) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    info!("Registry: no route to new group member {}: {}", uuid, e);
                    None
                }
            };
            self.peers.insert(
                uuid.clone(),
                Peer {
                    uuid: uuid.clone(),
                    handle,
                    classification: LoadState::Normal,
                },
            );
        }
    }

    /// All known peers, the local node included, in UUID order
    pub fn iter_all(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    /// All peers except the local node
    pub fn iter_remote(&self) -> impl Iterator<Item = &Peer> {
        let self_uuid = &self.self_uuid;
        self.peers.values().filter(move |p| p.uuid != *self_uuid)
    }

    /// Peers currently in the given classification bucket
    pub fn iter_by_class(&self, classification: LoadState) -> impl Iterator<Item = &Peer> {
        self.peers
            .values()
            .filter(move |p| p.classification == classification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct NullHandle;

    impl PeerHandle for NullHandle {
        fn send(&self, _msg: &Message) -> Result<(), TransportError> {
            Ok(())
        }
    }

    struct TestConnector {
        refused: Mutex<Vec<NodeId>>,
    }

    impl TestConnector {
        fn new() -> Self {
            Self { refused: Mutex::new(Vec::new()) }
        }

        fn refusing(uuids: &[&str]) -> Self {
            Self {
                refused: Mutex::new(uuids.iter().map(|u| u.to_string()).collect()),
            }
        }
    }

    impl PeerConnector for TestConnector {
        fn connect(&self, uuid: &NodeId) -> Result<Arc<dyn PeerHandle>, TransportError> {
            if self.refused.lock().contains(uuid) {
                Err(TransportError::Unreachable(uuid.clone()))
            } else {
                Ok(Arc::new(NullHandle))
            }
        }
    }

    fn registry() -> PeerRegistry {
        PeerRegistry::new("self".to_string())
    }

    #[test]
    fn test_self_present_from_construction() {
        let reg = registry();
        assert!(reg.contains(&"self".to_string()));
        assert_eq!(reg.classification_of(&"self".to_string()), Some(LoadState::Normal));
        assert_eq!(reg.iter_remote().count(), 0);
    }

    #[test]
    fn test_upsert_starts_unknown_and_overwrites_handle() {
        let mut reg = registry();
        reg.upsert("a".to_string(), Arc::new(NullHandle));
        assert_eq!(reg.classification_of(&"a".to_string()), Some(LoadState::Unknown));

        reg.reclassify(&"a".to_string(), LoadState::Demand);
        // A second upsert refreshes the handle but keeps the bucket
        reg.upsert("a".to_string(), Arc::new(NullHandle));
        assert_eq!(reg.classification_of(&"a".to_string()), Some(LoadState::Demand));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_upsert_of_self_is_ignored() {
        let mut reg = registry();
        reg.upsert("self".to_string(), Arc::new(NullHandle));
        assert!(reg.get(&"self".to_string()).unwrap().handle.is_none());
    }

    #[test]
    fn test_reclassify_moves_between_buckets_atomically() {
        let mut reg = registry();
        reg.upsert("a".to_string(), Arc::new(NullHandle));
        reg.reclassify(&"a".to_string(), LoadState::Supply);

        assert_eq!(reg.iter_by_class(LoadState::Supply).count(), 1);
        reg.reclassify(&"a".to_string(), LoadState::Demand);
        assert_eq!(reg.iter_by_class(LoadState::Supply).count(), 0);
        assert_eq!(reg.iter_by_class(LoadState::Demand).count(), 1);
    }

    #[test]
    fn test_reclassify_unknown_uuid_is_noop() {
        let mut reg = registry();
        reg.reclassify(&"ghost".to_string(), LoadState::Supply);
        assert!(!reg.contains(&"ghost".to_string()));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_replace_group_yields_roster_plus_self() {
        let mut reg = registry();
        reg.upsert("d".to_string(), Arc::new(NullHandle));

        let roster = vec!["a".to_string(), "c".to_string()];
        reg.replace_group(&roster, &TestConnector::new());

        let uuids: Vec<&NodeId> = reg.iter_all().map(|p| &p.uuid).collect();
        assert_eq!(uuids, vec!["a", "c", "self"]);
        assert_eq!(reg.classification_of(&"a".to_string()), Some(LoadState::Normal));
    }

    #[test]
    fn test_replace_group_preserves_survivor_classification() {
        let mut reg = registry();
        reg.upsert("a".to_string(), Arc::new(NullHandle));
        reg.reclassify(&"a".to_string(), LoadState::Supply);
        reg.reclassify(&"self".to_string(), LoadState::Demand);

        reg.replace_group(&["a".to_string(), "b".to_string()], &TestConnector::new());

        assert_eq!(reg.classification_of(&"a".to_string()), Some(LoadState::Supply));
        assert_eq!(reg.classification_of(&"b".to_string()), Some(LoadState::Normal));
        assert_eq!(reg.classification_of(&"self".to_string()), Some(LoadState::Demand));
    }

    #[test]
    fn test_replace_group_tracks_unreachable_members() {
        let mut reg = registry();
        reg.replace_group(
            &["a".to_string(), "b".to_string()],
            &TestConnector::refusing(&["b"]),
        );

        assert!(reg.get(&"a".to_string()).unwrap().handle.is_some());
        let b = reg.get(&"b".to_string()).unwrap();
        assert!(b.handle.is_none());
        assert_eq!(b.classification, LoadState::Normal);
    }

    #[test]
    fn test_roster_containing_self_does_not_duplicate() {
        let mut reg = registry();
        reg.reclassify(&"self".to_string(), LoadState::Supply);
        reg.replace_group(&["self".to_string(), "a".to_string()], &TestConnector::new());

        assert_eq!(reg.len(), 2);
        assert_eq!(reg.classification_of(&"self".to_string()), Some(LoadState::Supply));
    }
}
