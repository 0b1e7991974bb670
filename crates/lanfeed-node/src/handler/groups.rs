use super::{Event, NodeState, Response, error_response, ok_response, send_message};
use lanfeed_mesh::transport::Destination;
use lanfeed_proto::{Message, PeerId};
use std::collections::BTreeSet;
use std::sync::Arc;

/// A group as this peer sees it. There is no central authority: each member
/// tracks the group independently, and a lost CREATE/UPDATE permanently
/// diverges that member's view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub group_name: String,
    pub creator: PeerId,
    pub members: BTreeSet<PeerId>,
}

/// Which way a membership update goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateAction {
    Add,
    Remove,
}

/// Apply a membership update: the add-set first, then the remove-set. An
/// identifier appearing in both ends up removed.
fn apply_update(group: &mut Group, add: &[PeerId], remove: &[PeerId]) {
    group.members.extend(add.iter().cloned());
    for peer in remove {
        group.members.remove(peer);
    }
}

/// Send one message to each recipient's unicast address. Recipients whose
/// host segment does not resolve are skipped with a warning; the rest still
/// get the message.
async fn fan_out(state: &NodeState, msg: &Message, recipients: &BTreeSet<PeerId>) {
    let sends = recipients.iter().filter_map(|peer| {
        let dest = match peer.addr() {
            Ok(ip) => Destination::Peer(ip),
            Err(e) => {
                tracing::warn!(peer = %peer, err = %e, "skipping unresolvable group member");
                return None;
            }
        };
        let peer = peer.clone();
        Some(async move {
            if let Err(e) = send_message(state, msg, dest).await {
                tracing::warn!(peer = %peer, err = %e, "group send failed");
            }
        })
    });
    futures_util::future::join_all(sends).await;
}

fn parse_member_list(raw: &str) -> Result<Vec<PeerId>, Response> {
    let mut members = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|m| !m.is_empty()) {
        match PeerId::parse(entry) {
            Ok(peer) => members.push(peer),
            Err(e) => return Err(error_response("bad_member", &e.to_string())),
        }
    }
    if members.is_empty() {
        return Err(error_response("no_members", "member list is empty"));
    }
    Ok(members)
}

// ---- local commands ----

pub async fn handle_create_group(
    state: &Arc<NodeState>,
    group_id: &str,
    group_name: &str,
    members_csv: &str,
) -> Response {
    let members = match parse_member_list(members_csv) {
        Ok(m) => m,
        Err(resp) => return resp,
    };

    let mut member_set: BTreeSet<PeerId> = members.into_iter().collect();
    member_set.insert(state.identity.id.clone());

    let group = Group {
        group_name: group_name.to_string(),
        creator: state.identity.id.clone(),
        members: member_set.clone(),
    };
    {
        let mut groups = state.groups.lock().await;
        groups.insert(group_id.to_string(), group);
    }

    let msg = Message::GroupCreate {
        from: state.identity.id.clone(),
        group_id: group_id.to_string(),
        group_name: group_name.to_string(),
        members: member_set.iter().cloned().collect(),
    };
    fan_out(state, &msg, &member_set).await;

    ok_response(Some(format!(
        "group '{group_name}' created and invites sent"
    )))
}

pub async fn handle_update_group(
    state: &Arc<NodeState>,
    action: UpdateAction,
    group_id: &str,
    members_csv: &str,
) -> Response {
    let affected = match parse_member_list(members_csv) {
        Ok(m) => m,
        Err(resp) => return resp,
    };

    let (msg, recipients, group_name) = {
        let mut groups = state.groups.lock().await;
        let Some(group) = groups.get_mut(group_id) else {
            return error_response("unknown_group", &format!("no group {group_id}"));
        };
        if group.creator != state.identity.id {
            return error_response(
                "not_creator",
                "only the group creator may change membership",
            );
        }

        // Notify the union of the current members and the affected peers, so
        // a removed member still hears about its removal.
        let mut recipients = group.members.clone();
        recipients.extend(affected.iter().cloned());

        let (add, remove) = match action {
            UpdateAction::Add => (affected.clone(), Vec::new()),
            UpdateAction::Remove => (Vec::new(), affected.clone()),
        };
        apply_update(group, &add, &remove);

        let msg = Message::GroupUpdate {
            from: state.identity.id.clone(),
            group_id: group_id.to_string(),
            add,
            remove,
        };
        (msg, recipients, group.group_name.clone())
    };

    fan_out(state, &msg, &recipients).await;
    ok_response(Some(format!("membership update sent for '{group_name}'")))
}

pub async fn handle_group_message(
    state: &Arc<NodeState>,
    group_id: &str,
    content: &str,
) -> Response {
    if content.is_empty() {
        return error_response("empty_message", "message content cannot be empty");
    }

    let recipients = {
        let groups = state.groups.lock().await;
        let Some(group) = groups.get(group_id) else {
            return error_response("unknown_group", &format!("no group {group_id}"));
        };
        if !group.members.contains(&state.identity.id) {
            return error_response("not_member", "you are not a member of that group");
        }
        group.members.clone()
    };

    let msg = Message::GroupMessage {
        from: state.identity.id.clone(),
        group_id: group_id.to_string(),
        content: content.to_string(),
    };
    fan_out(state, &msg, &recipients).await;
    ok_response(None)
}

pub async fn handle_list_groups(state: &Arc<NodeState>) -> Response {
    let groups = state.groups.lock().await;
    let mut lines = Vec::new();
    for (group_id, group) in groups.iter() {
        if !group.members.contains(&state.identity.id) {
            continue;
        }
        let members: Vec<&str> = group.members.iter().map(PeerId::as_str).collect();
        lines.push(format!(
            "{} ({})\n  creator: {}\n  members: {}",
            group.group_name,
            group_id,
            group.creator,
            members.join(", ")
        ));
    }
    if lines.is_empty() {
        return ok_response(Some("you are not a member of any groups".to_string()));
    }
    lines.sort();
    ok_response(Some(lines.join("\n")))
}

// ---- remote messages ----

pub async fn handle_remote_create(
    state: &Arc<NodeState>,
    from: PeerId,
    group_id: String,
    group_name: String,
    members: Vec<PeerId>,
) {
    let member_set: BTreeSet<PeerId> = members.into_iter().collect();

    // Only honor invitations that actually list us; anything else is noise
    // or a stray unicast.
    if !member_set.contains(&state.identity.id) {
        tracing::debug!(%group_id, from = %from, "ignoring group create that does not include us");
        return;
    }

    {
        let mut groups = state.groups.lock().await;
        groups.insert(
            group_id.clone(),
            Group {
                group_name: group_name.clone(),
                creator: from,
                members: member_set,
            },
        );
    }
    let _ = state.event_tx.send(Event::GroupInvited {
        group_id,
        group_name,
    });
}

pub async fn handle_remote_update(
    state: &Arc<NodeState>,
    from: PeerId,
    group_id: String,
    add: Vec<PeerId>,
    remove: Vec<PeerId>,
) {
    let group_name = {
        let mut groups = state.groups.lock().await;
        let Some(group) = groups.get_mut(&group_id) else {
            tracing::debug!(%group_id, "membership update for unknown group, dropping");
            return;
        };
        if group.creator != from {
            tracing::warn!(%group_id, from = %from, "unauthorized membership update, dropping");
            return;
        }
        apply_update(group, &add, &remove);
        group.group_name.clone()
    };
    let _ = state.event_tx.send(Event::GroupUpdated {
        group_id,
        group_name,
    });
}

pub async fn handle_remote_message(
    state: &Arc<NodeState>,
    from: PeerId,
    group_id: String,
    content: String,
) {
    let group_name = {
        let groups = state.groups.lock().await;
        let Some(group) = groups.get(&group_id) else {
            return;
        };
        if !group.members.contains(&state.identity.id) {
            tracing::debug!(%group_id, "group message for a group we are not in, dropping");
            return;
        }
        group.group_name.clone()
    };
    let from = state.display_name(&from).await;
    let _ = state.event_tx.send(Event::GroupMessage {
        group_name,
        from,
        content,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(raw: &str) -> PeerId {
        PeerId::parse(raw).unwrap()
    }

    fn make_group(creator: &str, members: &[&str]) -> Group {
        Group {
            group_name: "study".to_string(),
            creator: peer(creator),
            members: members.iter().map(|m| peer(m)).collect(),
        }
    }

    #[test]
    fn update_applies_add_then_remove() {
        let mut group = make_group("a@10.0.0.1", &["a@10.0.0.1", "b@10.0.0.2"]);
        apply_update(&mut group, &[peer("c@10.0.0.3")], &[peer("b@10.0.0.2")]);

        assert!(group.members.contains(&peer("c@10.0.0.3")));
        assert!(!group.members.contains(&peer("b@10.0.0.2")));
        assert_eq!(group.members.len(), 2);
    }

    #[test]
    fn removal_wins_when_a_peer_is_in_both_sets() {
        let mut group = make_group("a@10.0.0.1", &["a@10.0.0.1"]);
        apply_update(&mut group, &[peer("b@10.0.0.2")], &[peer("b@10.0.0.2")]);
        assert!(!group.members.contains(&peer("b@10.0.0.2")));
    }

    #[test]
    fn member_list_rejects_malformed_local_input() {
        assert!(parse_member_list("b@10.0.0.2,not-a-peer").is_err());
        assert!(parse_member_list("").is_err());
        assert!(parse_member_list("b@10.0.0.2, c@10.0.0.3").is_ok());
    }
}
