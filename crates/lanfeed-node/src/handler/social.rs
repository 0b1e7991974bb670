use super::{
    Event, NodeState, Response, error_response, now_ts, ok_response, parse_peer, peer_dest,
    send_message,
};
use lanfeed_mesh::transport::Destination;
use lanfeed_proto::message::LikeAction;
use lanfeed_proto::{Message, PeerId};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// A broadcast post, keyed by author and creation timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub author: PeerId,
    pub timestamp: u64,
    pub content: String,
    pub likers: BTreeSet<PeerId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectMessage {
    pub from: PeerId,
    pub to: PeerId,
    pub content: String,
}

/// Posts, likes, DMs and follow relationships.
#[derive(Debug, Default)]
pub struct FeedStore {
    posts: HashMap<(PeerId, u64), Post>,
    dms: Vec<DirectMessage>,
    followers: BTreeSet<PeerId>,
    following: BTreeSet<PeerId>,
}

impl FeedStore {
    /// Store a post. Returns false without touching anything if a post with
    /// the same author and timestamp already exists — duplicate broadcasts
    /// and replays are dropped, first write wins.
    pub fn record_post(&mut self, author: PeerId, timestamp: u64, content: String) -> bool {
        let key = (author.clone(), timestamp);
        if self.posts.contains_key(&key) {
            return false;
        }
        self.posts.insert(
            key,
            Post {
                author,
                timestamp,
                content,
                likers: BTreeSet::new(),
            },
        );
        true
    }

    /// Apply a like or unlike to a stored post. Returns false if the post is
    /// unknown.
    pub fn apply_like(
        &mut self,
        liker: PeerId,
        author: &PeerId,
        timestamp: u64,
        action: LikeAction,
    ) -> bool {
        let Some(post) = self.posts.get_mut(&(author.clone(), timestamp)) else {
            return false;
        };
        match action {
            LikeAction::Like => post.likers.insert(liker),
            LikeAction::Unlike => post.likers.remove(&liker),
        };
        true
    }

    pub fn record_dm(&mut self, dm: DirectMessage) {
        self.dms.push(dm);
    }

    pub fn set_follower(&mut self, peer: PeerId, following: bool) {
        if following {
            self.followers.insert(peer);
        } else {
            self.followers.remove(&peer);
        }
    }

    pub fn set_following(&mut self, peer: PeerId, following: bool) {
        if following {
            self.following.insert(peer);
        } else {
            self.following.remove(&peer);
        }
    }

    /// Posts ordered newest first.
    pub fn recent_posts(&self) -> Vec<&Post> {
        let mut posts: Vec<&Post> = self.posts.values().collect();
        posts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        posts
    }

    pub fn get_post(&self, author: &PeerId, timestamp: u64) -> Option<&Post> {
        self.posts.get(&(author.clone(), timestamp))
    }

    pub fn dms(&self) -> &[DirectMessage] {
        &self.dms
    }

    pub fn followers(&self) -> &BTreeSet<PeerId> {
        &self.followers
    }

    pub fn following(&self) -> &BTreeSet<PeerId> {
        &self.following
    }
}

// ---- local commands ----

pub async fn handle_post(state: &Arc<NodeState>, content: &str) -> Response {
    if content.is_empty() {
        return error_response("empty_post", "post content cannot be empty");
    }

    let timestamp = now_ts();
    {
        // Record locally first; the echoed broadcast copy is suppressed by
        // the dispatcher and would dedupe on the key anyway.
        let mut feed = state.feed.lock().await;
        feed.record_post(state.identity.id.clone(), timestamp, content.to_string());
    }

    let msg = Message::Post {
        user_id: state.identity.id.clone(),
        content: content.to_string(),
        timestamp,
    };
    match send_message(state, &msg, Destination::Broadcast).await {
        Ok(()) => ok_response(None),
        Err(e) => error_response("send_failed", &e.to_string()),
    }
}

pub async fn handle_dm(state: &Arc<NodeState>, to: &str, content: &str) -> Response {
    let to = match parse_peer(to) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let dest = match peer_dest(&to) {
        Ok(d) => d,
        Err(resp) => return resp,
    };

    let msg = Message::Dm {
        from: state.identity.id.clone(),
        to: to.clone(),
        content: content.to_string(),
    };
    if let Err(e) = send_message(state, &msg, dest).await {
        return error_response("send_failed", &e.to_string());
    }

    let mut feed = state.feed.lock().await;
    feed.record_dm(DirectMessage {
        from: state.identity.id.clone(),
        to,
        content: content.to_string(),
    });
    ok_response(None)
}

pub async fn handle_follow(state: &Arc<NodeState>, target: &str, follow: bool) -> Response {
    let to = match parse_peer(target) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let dest = match peer_dest(&to) {
        Ok(d) => d,
        Err(resp) => return resp,
    };

    let msg = if follow {
        Message::Follow {
            from: state.identity.id.clone(),
            to: to.clone(),
        }
    } else {
        Message::Unfollow {
            from: state.identity.id.clone(),
            to: to.clone(),
        }
    };
    if let Err(e) = send_message(state, &msg, dest).await {
        return error_response("send_failed", &e.to_string());
    }

    let mut feed = state.feed.lock().await;
    feed.set_following(to, follow);
    ok_response(None)
}

pub async fn handle_like(
    state: &Arc<NodeState>,
    author: &str,
    post_timestamp: u64,
    action: LikeAction,
) -> Response {
    let author = match parse_peer(author) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let dest = match peer_dest(&author) {
        Ok(d) => d,
        Err(resp) => return resp,
    };

    let msg = Message::Like {
        from: state.identity.id.clone(),
        to: author.clone(),
        post_timestamp,
        action,
    };
    if let Err(e) = send_message(state, &msg, dest).await {
        return error_response("send_failed", &e.to_string());
    }

    // Update our own copy of the post if we hold one.
    let mut feed = state.feed.lock().await;
    feed.apply_like(state.identity.id.clone(), &author, post_timestamp, action);
    ok_response(None)
}

/// Render the feed, newest post first.
pub async fn handle_feed(state: &Arc<NodeState>) -> Response {
    let feed = state.feed.lock().await;
    let posts = feed.recent_posts();
    if posts.is_empty() {
        return ok_response(Some("the feed is empty".to_string()));
    }

    // Authors are shown by raw id: the timestamp+id pair is what the like
    // command needs back.
    let mut lines = Vec::with_capacity(posts.len());
    for post in posts {
        lines.push(format!(
            "[{}] {}: {} ({} likes)",
            post.timestamp,
            post.author,
            post.content,
            post.likers.len()
        ));
    }
    ok_response(Some(lines.join("\n")))
}

pub async fn handle_peers(state: &Arc<NodeState>) -> Response {
    let peers = state.peers.lock().await;
    if peers.is_empty() {
        return ok_response(Some("no peers seen yet".to_string()));
    }
    let mut lines: Vec<String> = peers
        .iter()
        .map(|(id, record)| format!("{} ({}) — {}", record.display_name, id, record.status))
        .collect();
    lines.sort();
    ok_response(Some(lines.join("\n")))
}

// ---- remote messages ----

pub async fn handle_remote_post(
    state: &Arc<NodeState>,
    user_id: PeerId,
    content: String,
    timestamp: u64,
) {
    let stored = {
        let mut feed = state.feed.lock().await;
        feed.record_post(user_id.clone(), timestamp, content.clone())
    };
    if !stored {
        tracing::debug!(author = %user_id, timestamp, "dropping duplicate post");
        return;
    }

    let author = state.display_name(&user_id).await;
    let _ = state.event_tx.send(Event::PostReceived { author, content });
}

pub async fn handle_remote_dm(state: &Arc<NodeState>, from: PeerId, to: PeerId, content: String) {
    {
        let mut feed = state.feed.lock().await;
        feed.record_dm(DirectMessage {
            from: from.clone(),
            to,
            content: content.clone(),
        });
    }
    let from = state.display_name(&from).await;
    let _ = state.event_tx.send(Event::DmReceived { from, content });
}

pub async fn handle_remote_follow(state: &Arc<NodeState>, from: PeerId, following: bool) {
    {
        let mut feed = state.feed.lock().await;
        feed.set_follower(from.clone(), following);
    }
    let peer = state.display_name(&from).await;
    let event = if following {
        Event::FollowerAdded { peer }
    } else {
        Event::FollowerRemoved { peer }
    };
    let _ = state.event_tx.send(event);
}

pub async fn handle_remote_like(
    state: &Arc<NodeState>,
    from: PeerId,
    author: PeerId,
    post_timestamp: u64,
    action: LikeAction,
) {
    let applied = {
        let mut feed = state.feed.lock().await;
        feed.apply_like(from.clone(), &author, post_timestamp, action)
    };
    if !applied {
        tracing::debug!(author = %author, post_timestamp, "like for unknown post, dropping");
        return;
    }

    let peer = state.display_name(&from).await;
    let _ = state.event_tx.send(Event::PostLiked {
        peer,
        action,
        post_timestamp,
    });
}
