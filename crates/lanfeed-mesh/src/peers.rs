use lanfeed_proto::PeerId;
use std::collections::HashMap;

/// Last-known profile of a peer seen on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub display_name: String,
    pub status: String,
}

/// Directory of peers, keyed by identifier.
///
/// Written only by PROFILE handling; read by every subsystem that renders a
/// peer-visible identifier. Records are never removed — a peer that stops
/// announcing simply goes stale.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    map: HashMap<PeerId, PeerRecord>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record for a peer. Last write wins.
    pub fn upsert(&mut self, id: PeerId, display_name: String, status: String) {
        self.map.insert(
            id,
            PeerRecord {
                display_name,
                status,
            },
        );
    }

    pub fn get(&self, id: &PeerId) -> Option<&PeerRecord> {
        self.map.get(id)
    }

    /// Display name for a peer, falling back to the raw identifier for peers
    /// we have not seen a PROFILE from.
    pub fn display_name(&self, id: &PeerId) -> String {
        match self.map.get(id) {
            Some(record) => record.display_name.clone(),
            None => id.to_string(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PeerId, &PeerRecord)> {
        self.map.iter()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
