use std::fmt;
use std::net::IpAddr;

/// A peer identifier of the form `name@host`.
///
/// The host segment doubles as the unicast destination address for directed
/// messages, so it must parse as an IP address before anything can be sent
/// to the peer — but parsing is deferred to send time so that records about
/// unreachable peers can still be stored and displayed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId {
    raw: String,
    at: usize,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PeerIdError {
    #[error("peer id {0:?} is not of the form name@host")]
    Malformed(String),
    #[error("peer {0} has host {1:?}, which is not an IP address")]
    BadHost(String, String),
}

impl PeerId {
    pub fn parse(raw: &str) -> Result<Self, PeerIdError> {
        match raw.split_once('@') {
            Some((name, host)) if !name.is_empty() && !host.is_empty() => Ok(Self {
                raw: raw.to_string(),
                at: name.len(),
            }),
            _ => Err(PeerIdError::Malformed(raw.to_string())),
        }
    }

    pub fn name(&self) -> &str {
        &self.raw[..self.at]
    }

    pub fn host(&self) -> &str {
        &self.raw[self.at + 1..]
    }

    /// The unicast address for this peer.
    pub fn addr(&self) -> Result<IpAddr, PeerIdError> {
        self.host()
            .parse()
            .map_err(|_| PeerIdError::BadHost(self.raw.clone(), self.host().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
