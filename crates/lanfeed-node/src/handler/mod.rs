pub mod games;
pub mod groups;
pub mod social;
pub mod transfer;

use lanfeed_mesh::identity::LocalIdentity;
use lanfeed_mesh::peers::PeerDirectory;
use lanfeed_mesh::transport::{Destination, Transport};
use lanfeed_proto::message::{DecodeError, GameOutcome, LikeAction, Symbol};
use lanfeed_proto::{Message, PeerId, codec};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};

/// Shared peer state. Every table gets its own lock; operations on one table
/// never hold another table's lock while they run, except that handlers may
/// take the peer directory briefly for display names after releasing their
/// own table.
pub struct NodeState {
    pub identity: LocalIdentity,
    pub transport: Transport,
    /// Directory where completed inbound transfers are written.
    pub downloads_dir: PathBuf,
    pub peers: Mutex<PeerDirectory>,
    pub feed: Mutex<social::FeedStore>,
    /// Group id → group record.
    pub groups: Mutex<HashMap<String, groups::Group>>,
    /// Game id → session.
    pub games: Mutex<HashMap<String, games::GameSession>>,
    /// Announced but not yet accepted inbound file offers.
    pub offers: Mutex<HashMap<String, transfer::PendingOffer>>,
    /// Accepted inbound transfers being reassembled.
    pub transfers: Mutex<HashMap<String, transfer::IncomingTransfer>>,
    pub event_tx: broadcast::Sender<Event>,
}

impl NodeState {
    pub fn new(identity: LocalIdentity, transport: Transport, downloads_dir: PathBuf) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(256);
        Arc::new(Self {
            identity,
            transport,
            downloads_dir,
            peers: Mutex::new(PeerDirectory::new()),
            feed: Mutex::new(social::FeedStore::default()),
            groups: Mutex::new(HashMap::new()),
            games: Mutex::new(HashMap::new()),
            offers: Mutex::new(HashMap::new()),
            transfers: Mutex::new(HashMap::new()),
            event_tx,
        })
    }

    /// Display name for a peer, falling back to the raw identifier.
    pub async fn display_name(&self, id: &PeerId) -> String {
        self.peers.lock().await.display_name(id)
    }
}

/// Something that happened that the user should see. Handlers emit these
/// instead of printing, so subsystem logic stays display-free.
#[derive(Debug, Clone)]
pub enum Event {
    ProfileSeen {
        peer: PeerId,
        display_name: String,
        status: String,
    },
    PostReceived {
        author: String,
        content: String,
    },
    DmReceived {
        from: String,
        content: String,
    },
    FollowerAdded {
        peer: String,
    },
    FollowerRemoved {
        peer: String,
    },
    PostLiked {
        peer: String,
        action: LikeAction,
        post_timestamp: u64,
    },
    GroupInvited {
        group_id: String,
        group_name: String,
    },
    GroupUpdated {
        group_id: String,
        group_name: String,
    },
    GroupMessage {
        group_name: String,
        from: String,
        content: String,
    },
    FileOffered {
        file_id: String,
        from: String,
        filename: String,
        filesize: u64,
    },
    TransferComplete {
        file_id: String,
        path: PathBuf,
    },
    TransferFailed {
        file_id: String,
        reason: String,
    },
    ReceiptConfirmed {
        file_id: String,
        from: String,
        status: String,
    },
    GameInvited {
        game_id: String,
        from: String,
        symbol: Symbol,
    },
    GameMoveApplied {
        game_id: String,
        board: [Option<Symbol>; 9],
    },
    GameEnded {
        game_id: String,
        outcome: GameOutcome,
        board: [Option<Symbol>; 9],
    },
}

/// Result of a locally issued command, reported only to the invoking
/// console. Errors here never produce network traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok { detail: Option<String> },
    Error { code: String, message: String },
}

pub fn ok_response(detail: Option<String>) -> Response {
    Response::Ok { detail }
}

pub fn error_response(code: &str, message: &str) -> Response {
    Response::Error {
        code: code.to_string(),
        message: message.to_string(),
    }
}

/// Drain the transport and dispatch every received datagram. Individual
/// handling failures are logged and never end the loop.
pub async fn inbound_loop(state: Arc<NodeState>) {
    let mut incoming = state.transport.incoming.lock().await;
    while let Some((payload, src)) = incoming.recv().await {
        process_datagram(&state, &payload, src).await;
    }
}

/// Decode one datagram and route it to the subsystem that owns its type.
pub async fn process_datagram(state: &Arc<NodeState>, payload: &[u8], src: SocketAddr) {
    let fields = codec::decode(payload);
    let msg = match Message::from_fields(&fields) {
        Ok(msg) => msg,
        Err(DecodeError::UnknownType(t)) => {
            tracing::debug!(%src, msg_type = %t, "dropping message with unrecognized type");
            return;
        }
        Err(e) => {
            tracing::warn!(%src, err = %e, "dropping malformed message");
            return;
        }
    };

    // Broadcast sends are visible on our own receive path. Drop them before
    // any subsystem runs.
    if *msg.origin() == state.identity.id {
        tracing::trace!(msg_type = msg.kind(), "suppressing own echo");
        return;
    }

    tracing::debug!(%src, from = %msg.origin(), msg_type = msg.kind(), "received");

    match msg {
        Message::Profile {
            user_id,
            display_name,
            status,
        } => handle_profile(state, user_id, display_name, status).await,
        Message::Post {
            user_id,
            content,
            timestamp,
        } => social::handle_remote_post(state, user_id, content, timestamp).await,
        Message::Dm { from, to, content } => {
            social::handle_remote_dm(state, from, to, content).await
        }
        Message::Follow { from, .. } => social::handle_remote_follow(state, from, true).await,
        Message::Unfollow { from, .. } => social::handle_remote_follow(state, from, false).await,
        Message::Like {
            from,
            to,
            post_timestamp,
            action,
        } => social::handle_remote_like(state, from, to, post_timestamp, action).await,
        Message::GroupCreate {
            from,
            group_id,
            group_name,
            members,
        } => groups::handle_remote_create(state, from, group_id, group_name, members).await,
        Message::GroupUpdate {
            from,
            group_id,
            add,
            remove,
        } => groups::handle_remote_update(state, from, group_id, add, remove).await,
        Message::GroupMessage {
            from,
            group_id,
            content,
        } => groups::handle_remote_message(state, from, group_id, content).await,
        Message::FileOffer {
            from,
            file_id,
            filename,
            filesize,
            filetype,
        } => transfer::handle_file_offer(state, from, file_id, filename, filesize, filetype).await,
        Message::FileChunk {
            file_id,
            chunk_index,
            total_chunks,
            data,
            ..
        } => transfer::handle_file_chunk(state, file_id, chunk_index, total_chunks, data).await,
        Message::FileReceived {
            from,
            file_id,
            status,
        } => transfer::handle_file_received(state, from, file_id, status).await,
        Message::GameInvite {
            from,
            game_id,
            symbol,
        } => games::handle_remote_invite(state, from, game_id, symbol).await,
        Message::GameMove {
            game_id,
            position,
            symbol,
            ..
        } => games::handle_remote_move(state, game_id, position, symbol).await,
        Message::GameResult {
            game_id,
            outcome,
            winning_line,
            symbol,
            ..
        } => games::handle_remote_result(state, game_id, outcome, winning_line, symbol).await,
    }
}

async fn handle_profile(state: &Arc<NodeState>, user_id: PeerId, display_name: String, status: String) {
    {
        let mut peers = state.peers.lock().await;
        peers.upsert(user_id.clone(), display_name.clone(), status.clone());
    }
    let _ = state.event_tx.send(Event::ProfileSeen {
        peer: user_id,
        display_name,
        status,
    });
}

/// Broadcast this peer's PROFILE. Used once at startup and then periodically
/// as the keep-alive.
pub async fn announce_profile(state: &NodeState) -> anyhow::Result<()> {
    let msg = Message::Profile {
        user_id: state.identity.id.clone(),
        display_name: state.identity.display_name.clone(),
        status: state.identity.status.clone(),
    };
    send_message(state, &msg, Destination::Broadcast).await
}

/// Encode and queue a message on the transport.
pub(crate) async fn send_message(
    state: &NodeState,
    msg: &Message,
    dest: Destination,
) -> anyhow::Result<()> {
    let payload = codec::encode(&msg.to_fields());
    state.transport.send(payload, dest).await
}

/// Resolve a peer's unicast destination, mapping failure to a command error.
pub(crate) fn peer_dest(peer: &PeerId) -> Result<Destination, Response> {
    peer.addr()
        .map(Destination::Peer)
        .map_err(|e| error_response("unreachable_peer", &e.to_string()))
}

/// Parse a raw console argument into a peer id, mapping failure to a command
/// error.
pub(crate) fn parse_peer(raw: &str) -> Result<PeerId, Response> {
    PeerId::parse(raw).map_err(|e| error_response("bad_peer", &e.to_string()))
}

/// Seconds since the epoch, used as the post timestamp key.
pub fn now_ts() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// A short opaque identifier for transfers and game sessions.
pub(crate) fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests;
