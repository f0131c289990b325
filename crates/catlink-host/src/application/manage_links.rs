//! LinkRegistry: the host's record of every device link it has opened.
//!
//! A host can drive more than one display (one serial port each).  Every
//! link gets a [`LinkId`] when it is opened and keeps its own session; the
//! registry only mirrors what each link reported last, for status output.
//!
//! # Link lifecycle (for beginners)
//!
//! ```text
//! Opening ──► AwaitingHello ──► Negotiated
//!                   │
//!                   └─────────► Legacy
//!
//! any state ──► Closed (transport lost)
//! ```

use std::collections::HashMap;
use std::time::Duration;

use catlink_core::{PeerInfo, SessionState};
use uuid::Uuid;

/// Identifies one open link on this host.
pub type LinkId = Uuid;

/// What the registry knows about one link.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkRecord {
    pub id: LinkId,
    /// Serial port path or TCP address.
    pub endpoint: String,
    pub state: SessionState,
    /// `false` once the transport has gone away.
    pub open: bool,
    pub peer: Option<PeerInfo>,
    /// Round-trip time of the last answered `PING`.
    pub last_rtt: Option<Duration>,
}

impl LinkRecord {
    /// A freshly opened link.
    pub fn opened(id: LinkId, endpoint: impl Into<String>) -> Self {
        Self {
            id,
            endpoint: endpoint.into(),
            state: SessionState::Init,
            open: true,
            peer: None,
            last_rtt: None,
        }
    }
}

/// In-memory registry of links, keyed by [`LinkId`].
#[derive(Debug, Default)]
pub struct LinkRegistry {
    links: HashMap<LinkId, LinkRecord>,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a link record.
    pub fn upsert(&mut self, record: LinkRecord) {
        self.links.insert(record.id, record);
    }

    /// Snapshot of every link, ordered by endpoint for stable output.
    pub fn all(&self) -> Vec<LinkRecord> {
        let mut links: Vec<_> = self.links.values().cloned().collect();
        links.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        links
    }

    pub fn get(&self, id: LinkId) -> Option<&LinkRecord> {
        self.links.get(&id)
    }

    /// Records a session state change (and the peer, once known).
    pub fn set_state(&mut self, id: LinkId, state: SessionState, peer: Option<PeerInfo>) {
        if let Some(link) = self.links.get_mut(&id) {
            link.state = state;
            if peer.is_some() {
                link.peer = peer;
            }
        }
    }

    pub fn update_rtt(&mut self, id: LinkId, rtt: Duration) {
        if let Some(link) = self.links.get_mut(&id) {
            link.last_rtt = Some(rtt);
        }
    }

    /// Marks the transport as gone; the record stays for status output.
    pub fn mark_closed(&mut self, id: LinkId) {
        if let Some(link) = self.links.get_mut(&id) {
            link.open = false;
        }
    }

    /// Number of links whose transport is still open.
    pub fn open_count(&self) -> usize {
        self.links.values().filter(|l| l.open).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catlink_core::{CapabilitySet, LegacyReason, ProtocolVersion};

    #[test]
    fn test_registry_starts_empty() {
        let registry = LinkRegistry::new();
        assert!(registry.all().is_empty());
        assert_eq!(registry.open_count(), 0);
    }

    #[test]
    fn test_upsert_adds_link() {
        let mut registry = LinkRegistry::new();
        let link = LinkRecord::opened(Uuid::new_v4(), "/dev/ttyUSB0");
        let id = link.id;
        registry.upsert(link);
        assert_eq!(registry.get(id).map(|l| l.state), Some(SessionState::Init));
    }

    #[test]
    fn test_set_state_records_peer() {
        // Arrange
        let mut registry = LinkRegistry::new();
        let link = LinkRecord::opened(Uuid::new_v4(), "COM3");
        let id = link.id;
        registry.upsert(link);
        let negotiated = SessionState::Negotiated {
            version: ProtocolVersion::new(2, 0),
            peer_caps: CapabilitySet::REFERENCE_DEVICE,
        };
        let peer = PeerInfo {
            name: "esp32".to_string(),
            firmware: "2025.09.26".to_string(),
        };

        // Act
        registry.set_state(id, negotiated, Some(peer.clone()));
        registry.set_state(id, negotiated, None);

        // Assert
        let record = registry.get(id).unwrap();
        assert_eq!(record.state, negotiated);
        assert_eq!(record.peer, Some(peer), "a later update without peer keeps it");
    }

    #[test]
    fn test_mark_closed_keeps_record() {
        let mut registry = LinkRegistry::new();
        let link = LinkRecord::opened(Uuid::new_v4(), "127.0.0.1:7878");
        let id = link.id;
        registry.upsert(link);
        registry.set_state(id, SessionState::Legacy(LegacyReason::HelloTimeout), None);

        registry.mark_closed(id);

        assert_eq!(registry.open_count(), 0);
        assert!(!registry.get(id).unwrap().open);
    }

    #[test]
    fn test_all_is_sorted_by_endpoint() {
        let mut registry = LinkRegistry::new();
        registry.upsert(LinkRecord::opened(Uuid::new_v4(), "/dev/ttyUSB1"));
        registry.upsert(LinkRecord::opened(Uuid::new_v4(), "/dev/ttyACM0"));

        let endpoints: Vec<_> = registry.all().into_iter().map(|l| l.endpoint).collect();

        assert_eq!(endpoints, ["/dev/ttyACM0", "/dev/ttyUSB1"]);
    }

    #[test]
    fn test_update_rtt_ignores_unknown_link() {
        let mut registry = LinkRegistry::new();
        let link = LinkRecord::opened(Uuid::new_v4(), "COM4");
        let id = link.id;
        registry.upsert(link);

        registry.update_rtt(id, Duration::from_millis(3));
        registry.update_rtt(Uuid::new_v4(), Duration::from_millis(9));

        assert_eq!(registry.get(id).unwrap().last_rtt, Some(Duration::from_millis(3)));
        assert_eq!(registry.all().len(), 1);
    }
}
