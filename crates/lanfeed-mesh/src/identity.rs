use lanfeed_proto::PeerId;

/// Who this peer is on the network.
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    pub id: PeerId,
    pub display_name: String,
    pub status: String,
}

impl LocalIdentity {
    pub fn new(id: PeerId, display_name: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            status: status.into(),
        }
    }
}
