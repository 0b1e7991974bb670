use super::games::{GameSession, GameStatus};
use super::groups::UpdateAction;
use super::*;
use lanfeed_mesh::transport::Datagram;
use lanfeed_proto::message::{GameOutcome, LikeAction, Symbol};
use tokio::sync::mpsc;

/// Create a NodeState wired to a captive in-memory transport. Outbound
/// datagrams land in the returned receiver; inbound ones are injected by
/// calling `process_datagram` directly.
fn make_test_state(
    id: &str,
) -> (
    Arc<NodeState>,
    mpsc::Receiver<Datagram>,
    tempfile::TempDir,
) {
    let (out_tx, out_rx) = mpsc::channel(64);
    let (_in_tx, in_rx) = mpsc::channel(64);
    let transport = Transport::in_memory(out_tx, in_rx);
    let identity = LocalIdentity::new(PeerId::parse(id).unwrap(), "Tester", "testing");
    let dir = tempfile::tempdir().unwrap();
    let state = NodeState::new(identity, transport, dir.path().join("downloads"));
    (state, out_rx, dir)
}

fn peer(raw: &str) -> PeerId {
    PeerId::parse(raw).unwrap()
}

async fn deliver(state: &Arc<NodeState>, msg: &Message) {
    let payload = codec::encode(&msg.to_fields());
    let src: SocketAddr = "10.0.0.99:50999".parse().unwrap();
    process_datagram(state, &payload, src).await;
}

fn decode_outbound(datagram: &Datagram) -> Message {
    Message::from_fields(&codec::decode(&datagram.payload)).unwrap()
}

fn assert_error(resp: &Response, expected_code: &str) {
    match resp {
        Response::Error { code, message } => {
            assert_eq!(code, expected_code, "unexpected error code: {message}");
        }
        other => panic!("expected Response::Error({expected_code}), got {other:?}"),
    }
}

fn assert_ok(resp: &Response) {
    if let Response::Error { code, message } = resp {
        panic!("expected Response::Ok, got error {code}: {message}");
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

#[tokio::test]
async fn own_broadcast_echo_is_suppressed() {
    let (state, _out, _dir) = make_test_state("me@10.0.0.1");

    let echo = Message::Post {
        user_id: peer("me@10.0.0.1"),
        content: "talking to myself".to_string(),
        timestamp: 100,
    };
    deliver(&state, &echo).await;

    assert!(state.feed.lock().await.recent_posts().is_empty());
}

#[tokio::test]
async fn own_profile_echo_does_not_enter_the_directory() {
    let (state, _out, _dir) = make_test_state("me@10.0.0.1");

    let echo = Message::Profile {
        user_id: peer("me@10.0.0.1"),
        display_name: "Me".to_string(),
        status: "echoing".to_string(),
    };
    deliver(&state, &echo).await;

    assert!(state.peers.lock().await.is_empty());
}

#[tokio::test]
async fn unrecognized_type_is_dropped_not_fatal() {
    let (state, _out, _dir) = make_test_state("me@10.0.0.1");
    let src: SocketAddr = "10.0.0.99:50999".parse().unwrap();

    process_datagram(&state, b"TYPE: TELEPORT\nFROM: b@10.0.0.2\n\n", src).await;
    process_datagram(&state, b"complete garbage", src).await;

    // The node is still fine afterwards.
    assert!(state.peers.lock().await.is_empty());
}

#[tokio::test]
async fn malformed_message_is_dropped() {
    let (state, _out, _dir) = make_test_state("me@10.0.0.1");
    let src: SocketAddr = "10.0.0.99:50999".parse().unwrap();

    // PROFILE missing DISPLAY_NAME/STATUS.
    process_datagram(&state, b"TYPE: PROFILE\nUSER_ID: b@10.0.0.2\n\n", src).await;
    assert!(state.peers.lock().await.is_empty());
}

// ---------------------------------------------------------------------------
// Peer directory
// ---------------------------------------------------------------------------

#[tokio::test]
async fn profile_creates_and_updates_peer_records() {
    let (state, _out, _dir) = make_test_state("me@10.0.0.1");

    deliver(
        &state,
        &Message::Profile {
            user_id: peer("b@10.0.0.2"),
            display_name: "Bob".to_string(),
            status: "around".to_string(),
        },
    )
    .await;
    assert_eq!(state.display_name(&peer("b@10.0.0.2")).await, "Bob");

    // Last write wins on the same identifier.
    deliver(
        &state,
        &Message::Profile {
            user_id: peer("b@10.0.0.2"),
            display_name: "Bobby".to_string(),
            status: "busy".to_string(),
        },
    )
    .await;
    let peers = state.peers.lock().await;
    assert_eq!(peers.len(), 1);
    assert_eq!(peers.display_name(&peer("b@10.0.0.2")), "Bobby");
}

// ---------------------------------------------------------------------------
// Social feed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_post_broadcast_is_stored_once() {
    let (state, _out, _dir) = make_test_state("me@10.0.0.1");

    let post = Message::Post {
        user_id: peer("b@10.0.0.2"),
        content: "original".to_string(),
        timestamp: 42,
    };
    deliver(&state, &post).await;
    deliver(&state, &post).await;

    let feed = state.feed.lock().await;
    assert_eq!(feed.recent_posts().len(), 1);
    assert_eq!(
        feed.get_post(&peer("b@10.0.0.2"), 42).unwrap().content,
        "original"
    );
}

#[tokio::test]
async fn dm_is_recorded_and_surfaced() {
    let (state, _out, _dir) = make_test_state("me@10.0.0.1");
    let mut events = state.event_tx.subscribe();

    deliver(
        &state,
        &Message::Dm {
            from: peer("b@10.0.0.2"),
            to: peer("me@10.0.0.1"),
            content: "psst".to_string(),
        },
    )
    .await;

    assert_eq!(state.feed.lock().await.dms().len(), 1);
    match events.try_recv() {
        Ok(Event::DmReceived { content, .. }) => assert_eq!(content, "psst"),
        other => panic!("expected DmReceived, got {other:?}"),
    }
}

#[tokio::test]
async fn follow_and_unfollow_track_followers() {
    let (state, _out, _dir) = make_test_state("me@10.0.0.1");

    deliver(
        &state,
        &Message::Follow {
            from: peer("b@10.0.0.2"),
            to: peer("me@10.0.0.1"),
        },
    )
    .await;
    assert!(
        state
            .feed
            .lock()
            .await
            .followers()
            .contains(&peer("b@10.0.0.2"))
    );

    deliver(
        &state,
        &Message::Unfollow {
            from: peer("b@10.0.0.2"),
            to: peer("me@10.0.0.1"),
        },
    )
    .await;
    assert!(state.feed.lock().await.followers().is_empty());
}

#[tokio::test]
async fn remote_like_updates_a_stored_post() {
    let (state, _out, _dir) = make_test_state("me@10.0.0.1");
    state
        .feed
        .lock()
        .await
        .record_post(peer("me@10.0.0.1"), 42, "mine".to_string());

    deliver(
        &state,
        &Message::Like {
            from: peer("b@10.0.0.2"),
            to: peer("me@10.0.0.1"),
            post_timestamp: 42,
            action: LikeAction::Like,
        },
    )
    .await;
    assert_eq!(
        state
            .feed
            .lock()
            .await
            .get_post(&peer("me@10.0.0.1"), 42)
            .unwrap()
            .likers
            .len(),
        1
    );

    deliver(
        &state,
        &Message::Like {
            from: peer("b@10.0.0.2"),
            to: peer("me@10.0.0.1"),
            post_timestamp: 42,
            action: LikeAction::Unlike,
        },
    )
    .await;
    assert!(
        state
            .feed
            .lock()
            .await
            .get_post(&peer("me@10.0.0.1"), 42)
            .unwrap()
            .likers
            .is_empty()
    );
}

#[tokio::test]
async fn like_for_unknown_post_changes_nothing() {
    let (state, _out, _dir) = make_test_state("me@10.0.0.1");
    let mut events = state.event_tx.subscribe();

    deliver(
        &state,
        &Message::Like {
            from: peer("b@10.0.0.2"),
            to: peer("me@10.0.0.1"),
            post_timestamp: 7,
            action: LikeAction::Like,
        },
    )
    .await;

    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn local_post_is_broadcast_and_recorded() {
    let (state, mut out, _dir) = make_test_state("me@10.0.0.1");

    assert_ok(&social::handle_post(&state, "hello lan").await);

    assert_eq!(state.feed.lock().await.recent_posts().len(), 1);
    let datagram = out.try_recv().unwrap();
    assert_eq!(datagram.dest, Destination::Broadcast);
    match decode_outbound(&datagram) {
        Message::Post { content, .. } => assert_eq!(content, "hello lan"),
        other => panic!("expected Post on the wire, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

#[tokio::test]
async fn group_create_is_accepted_when_we_are_listed() {
    let (state, _out, _dir) = make_test_state("b@10.0.0.2");

    deliver(
        &state,
        &Message::GroupCreate {
            from: peer("a@10.0.0.1"),
            group_id: "g1".to_string(),
            group_name: "study".to_string(),
            members: vec![peer("a@10.0.0.1"), peer("b@10.0.0.2")],
        },
    )
    .await;

    let groups = state.groups.lock().await;
    let group = groups.get("g1").expect("group should exist");
    assert_eq!(group.creator, peer("a@10.0.0.1"));
    assert_eq!(group.members.len(), 2);
    assert!(group.members.contains(&peer("b@10.0.0.2")));
}

#[tokio::test]
async fn group_create_is_ignored_when_we_are_not_listed() {
    let (state, _out, _dir) = make_test_state("c@10.0.0.3");

    deliver(
        &state,
        &Message::GroupCreate {
            from: peer("a@10.0.0.1"),
            group_id: "g1".to_string(),
            group_name: "study".to_string(),
            members: vec![peer("a@10.0.0.1"), peer("b@10.0.0.2")],
        },
    )
    .await;

    assert!(state.groups.lock().await.is_empty());
}

#[tokio::test]
async fn update_from_non_creator_leaves_members_unchanged() {
    let (state, _out, _dir) = make_test_state("b@10.0.0.2");

    deliver(
        &state,
        &Message::GroupCreate {
            from: peer("a@10.0.0.1"),
            group_id: "g1".to_string(),
            group_name: "study".to_string(),
            members: vec![peer("a@10.0.0.1"), peer("b@10.0.0.2")],
        },
    )
    .await;

    deliver(
        &state,
        &Message::GroupUpdate {
            from: peer("mallory@10.0.0.66"),
            group_id: "g1".to_string(),
            add: vec![peer("mallory@10.0.0.66")],
            remove: vec![peer("a@10.0.0.1")],
        },
    )
    .await;

    let groups = state.groups.lock().await;
    let group = groups.get("g1").unwrap();
    assert_eq!(group.members.len(), 2);
    assert!(group.members.contains(&peer("a@10.0.0.1")));
    assert!(!group.members.contains(&peer("mallory@10.0.0.66")));
}

#[tokio::test]
async fn update_from_creator_applies_add_and_remove() {
    let (state, _out, _dir) = make_test_state("b@10.0.0.2");

    deliver(
        &state,
        &Message::GroupCreate {
            from: peer("a@10.0.0.1"),
            group_id: "g1".to_string(),
            group_name: "study".to_string(),
            members: vec![peer("a@10.0.0.1"), peer("b@10.0.0.2")],
        },
    )
    .await;

    deliver(
        &state,
        &Message::GroupUpdate {
            from: peer("a@10.0.0.1"),
            group_id: "g1".to_string(),
            add: vec![peer("c@10.0.0.3")],
            remove: vec![peer("b@10.0.0.2")],
        },
    )
    .await;

    let groups = state.groups.lock().await;
    let group = groups.get("g1").unwrap();
    assert!(group.members.contains(&peer("c@10.0.0.3")));
    assert!(!group.members.contains(&peer("b@10.0.0.2")));
}

#[tokio::test]
async fn group_message_requires_membership() {
    let (state, _out, _dir) = make_test_state("c@10.0.0.3");
    let mut events = state.event_tx.subscribe();

    // A group we are not in.
    deliver(
        &state,
        &Message::GroupMessage {
            from: peer("a@10.0.0.1"),
            group_id: "g1".to_string(),
            content: "secret".to_string(),
        },
    )
    .await;
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn group_message_is_surfaced_to_members() {
    let (state, _out, _dir) = make_test_state("b@10.0.0.2");

    deliver(
        &state,
        &Message::GroupCreate {
            from: peer("a@10.0.0.1"),
            group_id: "g1".to_string(),
            group_name: "study".to_string(),
            members: vec![peer("a@10.0.0.1"), peer("b@10.0.0.2")],
        },
    )
    .await;

    let mut events = state.event_tx.subscribe();
    deliver(
        &state,
        &Message::GroupMessage {
            from: peer("a@10.0.0.1"),
            group_id: "g1".to_string(),
            content: "meeting at 5".to_string(),
        },
    )
    .await;

    match events.try_recv() {
        Ok(Event::GroupMessage { content, group_name, .. }) => {
            assert_eq!(content, "meeting at 5");
            assert_eq!(group_name, "study");
        }
        other => panic!("expected GroupMessage, got {other:?}"),
    }
}

#[tokio::test]
async fn local_update_requires_being_the_creator() {
    let (state, _out, _dir) = make_test_state("b@10.0.0.2");

    deliver(
        &state,
        &Message::GroupCreate {
            from: peer("a@10.0.0.1"),
            group_id: "g1".to_string(),
            group_name: "study".to_string(),
            members: vec![peer("a@10.0.0.1"), peer("b@10.0.0.2")],
        },
    )
    .await;

    let resp =
        groups::handle_update_group(&state, UpdateAction::Add, "g1", "c@10.0.0.3").await;
    assert_error(&resp, "not_creator");
}

#[tokio::test]
async fn local_create_registers_and_notifies_every_member() {
    let (state, mut out, _dir) = make_test_state("a@10.0.0.1");

    let resp = groups::handle_create_group(&state, "g1", "study", "b@10.0.0.2,c@10.0.0.3").await;
    assert_ok(&resp);

    {
        let groups = state.groups.lock().await;
        let group = groups.get("g1").unwrap();
        assert_eq!(group.creator, peer("a@10.0.0.1"));
        assert_eq!(group.members.len(), 3);
    }

    // One CREATE per member, self included (the echo is suppressed on receipt).
    let mut count = 0;
    while let Ok(datagram) = out.try_recv() {
        assert!(matches!(decode_outbound(&datagram), Message::GroupCreate { .. }));
        count += 1;
    }
    assert_eq!(count, 3);
}

#[tokio::test]
async fn removed_member_is_still_notified() {
    let (state, mut out, _dir) = make_test_state("a@10.0.0.1");

    assert_ok(&groups::handle_create_group(&state, "g1", "study", "b@10.0.0.2").await);
    while out.try_recv().is_ok() {}

    assert_ok(
        &groups::handle_update_group(&state, UpdateAction::Remove, "g1", "b@10.0.0.2").await,
    );

    // The update still went to b even though b is no longer a member.
    let mut recipients = Vec::new();
    while let Ok(datagram) = out.try_recv() {
        recipients.push(datagram.dest);
    }
    assert!(recipients.contains(&Destination::Peer("10.0.0.2".parse().unwrap())));

    let groups = state.groups.lock().await;
    assert!(!groups.get("g1").unwrap().members.contains(&peer("b@10.0.0.2")));
}

// ---------------------------------------------------------------------------
// File transfer
// ---------------------------------------------------------------------------

fn chunk(file_id: &str, index: u32, total: u32, data: &[u8]) -> Message {
    Message::FileChunk {
        from: peer("b@10.0.0.2"),
        file_id: file_id.to_string(),
        chunk_index: index,
        total_chunks: total,
        chunk_size: data.len() as u32,
        data: data.to_vec(),
    }
}

fn offer(file_id: &str, filename: &str) -> Message {
    Message::FileOffer {
        from: peer("b@10.0.0.2"),
        file_id: file_id.to_string(),
        filename: filename.to_string(),
        filesize: 25,
        filetype: "text/plain".to_string(),
    }
}

#[tokio::test]
async fn out_of_order_chunks_with_duplicates_assemble_once() {
    let (state, mut out, dir) = make_test_state("me@10.0.0.1");

    deliver(&state, &offer("f1", "hello.txt")).await;
    assert_ok(&transfer::handle_accept(&state, "f1").await);

    // Indices [3, 0, 4, 1, 2] with a duplicate redelivery of 2.
    for (index, data) in [(3u32, b"dddd"), (0, b"aaaa"), (4, b"eeee"), (1, b"bbbb")] {
        deliver(&state, &chunk("f1", index, 5, data)).await;
    }
    deliver(&state, &chunk("f1", 2, 5, b"cccc")).await;
    deliver(&state, &chunk("f1", 2, 5, b"XXXX")).await;

    let path = dir.path().join("downloads").join("hello.txt");
    let contents = std::fs::read(&path).unwrap();
    assert_eq!(contents, b"aaaabbbbccccddddeeee" as &[u8]);

    // Assembly fired exactly once and tore the transfer down.
    assert!(state.transfers.lock().await.is_empty());

    // A COMPLETE receipt went back to the sender.
    let mut receipt_seen = false;
    while let Ok(datagram) = out.try_recv() {
        if let Message::FileReceived { file_id, status, .. } = decode_outbound(&datagram) {
            assert_eq!(file_id, "f1");
            assert_eq!(status, "COMPLETE");
            assert_eq!(datagram.dest, Destination::Peer("10.0.0.2".parse().unwrap()));
            receipt_seen = true;
        }
    }
    assert!(receipt_seen);
}

#[tokio::test]
async fn duplicate_chunk_keeps_first_arrival() {
    let (state, _out, dir) = make_test_state("me@10.0.0.1");

    deliver(&state, &offer("f1", "hello.txt")).await;
    assert_ok(&transfer::handle_accept(&state, "f1").await);

    deliver(&state, &chunk("f1", 0, 2, b"first")).await;
    deliver(&state, &chunk("f1", 0, 2, b"later")).await;
    deliver(&state, &chunk("f1", 1, 2, b"!")).await;

    let contents = std::fs::read(dir.path().join("downloads").join("hello.txt")).unwrap();
    assert_eq!(contents, b"first!" as &[u8]);
}

#[tokio::test]
async fn chunks_before_accept_are_dropped_not_buffered() {
    let (state, _out, dir) = make_test_state("me@10.0.0.1");

    deliver(&state, &offer("f1", "hello.txt")).await;
    deliver(&state, &chunk("f1", 0, 2, b"early")).await;

    assert_ok(&transfer::handle_accept(&state, "f1").await);
    {
        let transfers = state.transfers.lock().await;
        assert!(transfers.get("f1").unwrap().chunks.is_empty());
    }

    // Both chunks have to arrive after acceptance for the file to complete.
    deliver(&state, &chunk("f1", 0, 2, b"early")).await;
    deliver(&state, &chunk("f1", 1, 2, b" bird")).await;
    let contents = std::fs::read(dir.path().join("downloads").join("hello.txt")).unwrap();
    assert_eq!(contents, b"early bird" as &[u8]);
}

#[tokio::test]
async fn chunks_for_unknown_transfers_are_dropped() {
    let (state, _out, _dir) = make_test_state("me@10.0.0.1");
    deliver(&state, &chunk("nope", 0, 1, b"stray")).await;
    assert!(state.transfers.lock().await.is_empty());
}

#[tokio::test]
async fn accept_of_unknown_offer_fails_locally() {
    let (state, _out, _dir) = make_test_state("me@10.0.0.1");
    assert_error(&transfer::handle_accept(&state, "nope").await, "unknown_offer");
}

#[tokio::test]
async fn reject_discards_a_pending_offer() {
    let (state, _out, _dir) = make_test_state("me@10.0.0.1");
    deliver(&state, &offer("f1", "hello.txt")).await;

    assert_ok(&transfer::handle_reject(&state, "f1").await);
    assert_error(&transfer::handle_accept(&state, "f1").await, "unknown_offer");
}

#[tokio::test]
async fn transfer_state_is_torn_down_even_when_the_write_fails() {
    let (state, mut out, dir) = make_test_state("me@10.0.0.1");

    // Make the downloads path unusable: a plain file where the directory
    // should go.
    std::fs::write(dir.path().join("downloads"), b"in the way").unwrap();

    let mut events = state.event_tx.subscribe();
    deliver(&state, &offer("f1", "hello.txt")).await;
    assert_ok(&transfer::handle_accept(&state, "f1").await);
    deliver(&state, &chunk("f1", 0, 1, b"data")).await;

    // State is gone despite the failure, and no receipt was sent.
    assert!(state.transfers.lock().await.is_empty());
    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, Event::TransferFailed { .. }) {
            saw_failure = true;
        }
    }
    assert!(saw_failure);
    while let Ok(datagram) = out.try_recv() {
        assert!(!matches!(decode_outbound(&datagram), Message::FileReceived { .. }));
    }
}

#[tokio::test]
async fn declared_filename_cannot_escape_the_downloads_dir() {
    let (state, _out, dir) = make_test_state("me@10.0.0.1");

    deliver(&state, &offer("f1", "../escape.txt")).await;
    assert_ok(&transfer::handle_accept(&state, "f1").await);
    deliver(&state, &chunk("f1", 0, 1, b"gotcha")).await;

    assert!(!dir.path().join("escape.txt").exists());
    assert!(dir.path().join("downloads").join("escape.txt").exists());
}

#[tokio::test]
async fn send_file_offers_then_streams_all_chunks() {
    let (state, mut out, dir) = make_test_state("me@10.0.0.1");

    let path = dir.path().join("payload.bin");
    // Two full chunks plus a 100-byte tail.
    let payload: Vec<u8> = (0..2148u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, &payload).unwrap();

    let resp = transfer::handle_send_file(&state, "b@10.0.0.2", path.to_str().unwrap()).await;
    assert_ok(&resp);

    let first = out.recv().await.unwrap();
    let Message::FileOffer { file_id, filename, filesize, .. } = decode_outbound(&first) else {
        panic!("expected the offer first");
    };
    assert_eq!(filename, "payload.bin");
    assert_eq!(filesize, 2148);

    let mut reassembled = Vec::new();
    for expect_index in 0..3u32 {
        let datagram = out.recv().await.unwrap();
        let Message::FileChunk {
            file_id: chunk_file_id,
            chunk_index,
            total_chunks,
            chunk_size,
            data,
            ..
        } = decode_outbound(&datagram)
        else {
            panic!("expected a chunk");
        };
        assert_eq!(chunk_file_id, file_id);
        assert_eq!(chunk_index, expect_index);
        assert_eq!(total_chunks, 3);
        assert_eq!(chunk_size as usize, data.len());
        reassembled.extend_from_slice(&data);
    }
    assert_eq!(reassembled, payload);
}

#[tokio::test]
async fn send_file_rejects_a_missing_path() {
    let (state, _out, _dir) = make_test_state("me@10.0.0.1");
    let resp = transfer::handle_send_file(&state, "b@10.0.0.2", "/no/such/file").await;
    assert_error(&resp, "file_not_found");
}

// ---------------------------------------------------------------------------
// Games
// ---------------------------------------------------------------------------

async fn put_game(
    state: &Arc<NodeState>,
    game_id: &str,
    board: [Option<Symbol>; 9],
    my_turn: bool,
    status: GameStatus,
) {
    state.games.lock().await.insert(
        game_id.to_string(),
        GameSession {
            board,
            my_symbol: Symbol::X,
            opponent: peer("b@10.0.0.2"),
            my_turn,
            status,
        },
    );
}

#[tokio::test]
async fn invite_assigns_symbols_and_gives_opponent_first_turn() {
    let (state, mut out, _dir) = make_test_state("me@10.0.0.1");

    assert_ok(&games::handle_invite(&state, "b@10.0.0.2").await);

    let datagram = out.try_recv().unwrap();
    let Message::GameInvite { game_id, symbol, .. } = decode_outbound(&datagram) else {
        panic!("expected an invite on the wire");
    };

    let games_table = state.games.lock().await;
    let game = games_table.get(&game_id).unwrap();
    assert_eq!(game.status, GameStatus::Pending);
    assert!(!game.my_turn);
    // The invite carries the opponent's symbol, the complement of ours.
    assert_eq!(symbol, game.my_symbol.other());
}

#[tokio::test]
async fn remote_invite_mirrors_the_session_with_our_turn() {
    let (state, _out, _dir) = make_test_state("me@10.0.0.1");

    deliver(
        &state,
        &Message::GameInvite {
            from: peer("b@10.0.0.2"),
            game_id: "g1".to_string(),
            symbol: Symbol::O,
        },
    )
    .await;

    let games_table = state.games.lock().await;
    let game = games_table.get("g1").unwrap();
    assert_eq!(game.my_symbol, Symbol::O);
    assert_eq!(game.opponent, peer("b@10.0.0.2"));
    assert!(game.my_turn);
    assert_eq!(game.status, GameStatus::Pending);
}

#[tokio::test]
async fn move_is_rejected_when_it_is_not_our_turn() {
    let (state, mut out, _dir) = make_test_state("me@10.0.0.1");
    put_game(&state, "g1", [None; 9], false, GameStatus::Pending).await;

    assert_error(&games::handle_move(&state, "g1", 0).await, "not_your_turn");
    assert!(out.try_recv().is_err(), "rejection must not send anything");
    assert!(state.games.lock().await.get("g1").unwrap().board[0].is_none());
}

#[tokio::test]
async fn move_is_rejected_on_an_occupied_cell() {
    let (state, mut out, _dir) = make_test_state("me@10.0.0.1");
    let mut board = [None; 9];
    board[4] = Some(Symbol::O);
    put_game(&state, "g1", board, true, GameStatus::Active).await;

    assert_error(&games::handle_move(&state, "g1", 4).await, "bad_move");
    assert!(out.try_recv().is_err());
    assert_eq!(state.games.lock().await.get("g1").unwrap().board[4], Some(Symbol::O));
}

#[tokio::test]
async fn move_is_rejected_out_of_range_and_after_the_game_ends() {
    let (state, mut out, _dir) = make_test_state("me@10.0.0.1");
    put_game(&state, "g1", [None; 9], true, GameStatus::Active).await;
    assert_error(&games::handle_move(&state, "g1", 9).await, "bad_move");

    put_game(&state, "g2", [None; 9], true, GameStatus::Finished).await;
    assert_error(&games::handle_move(&state, "g2", 0).await, "game_over");

    assert_error(&games::handle_move(&state, "missing", 0).await, "unknown_game");
    assert!(out.try_recv().is_err());
}

#[tokio::test]
async fn completing_a_line_sends_win_and_finishes_the_session() {
    let (state, mut out, _dir) = make_test_state("me@10.0.0.1");
    let mut board = [None; 9];
    board[0] = Some(Symbol::X);
    board[1] = Some(Symbol::X);
    board[4] = Some(Symbol::O);
    board[5] = Some(Symbol::O);
    put_game(&state, "g1", board, true, GameStatus::Active).await;

    assert_ok(&games::handle_move(&state, "g1", 2).await);

    let Message::GameResult { outcome, winning_line, symbol, .. } =
        decode_outbound(&out.try_recv().unwrap())
    else {
        panic!("expected a result on the wire");
    };
    assert_eq!(outcome, GameOutcome::Win);
    assert_eq!(winning_line, Some([0, 1, 2]));
    assert_eq!(symbol, Some(Symbol::X));
    assert_eq!(state.games.lock().await.get("g1").unwrap().status, GameStatus::Finished);
}

#[tokio::test]
async fn filling_the_board_without_a_line_sends_draw() {
    let (state, mut out, _dir) = make_test_state("me@10.0.0.1");
    // X O X / X O O / O X _  — X at 8 fills the board with no line.
    let board = [
        Some(Symbol::X),
        Some(Symbol::O),
        Some(Symbol::X),
        Some(Symbol::X),
        Some(Symbol::O),
        Some(Symbol::O),
        Some(Symbol::O),
        Some(Symbol::X),
        None,
    ];
    put_game(&state, "g1", board, true, GameStatus::Active).await;

    assert_ok(&games::handle_move(&state, "g1", 8).await);

    let Message::GameResult { outcome, winning_line, .. } =
        decode_outbound(&out.try_recv().unwrap())
    else {
        panic!("expected a result on the wire");
    };
    assert_eq!(outcome, GameOutcome::Draw);
    assert_eq!(winning_line, None);
    assert_eq!(state.games.lock().await.get("g1").unwrap().status, GameStatus::Finished);
}

#[tokio::test]
async fn ordinary_move_flips_the_turn_to_the_opponent() {
    let (state, mut out, _dir) = make_test_state("me@10.0.0.1");
    put_game(&state, "g1", [None; 9], true, GameStatus::Pending).await;

    assert_ok(&games::handle_move(&state, "g1", 4).await);

    let Message::GameMove { position, symbol, .. } = decode_outbound(&out.try_recv().unwrap())
    else {
        panic!("expected a move on the wire");
    };
    assert_eq!(position, 4);
    assert_eq!(symbol, Symbol::X);

    let games_table = state.games.lock().await;
    let game = games_table.get("g1").unwrap();
    assert!(!game.my_turn);
    assert_eq!(game.status, GameStatus::Active);
}

/// Boundary behavior, preserved as specified: remote moves are applied as
/// announced with no legality validation, unlike local moves.
#[tokio::test]
async fn remote_move_is_applied_without_local_validation() {
    let (state, _out, _dir) = make_test_state("me@10.0.0.1");
    let mut board = [None; 9];
    board[4] = Some(Symbol::X);
    // It is currently OUR turn and cell 4 is occupied — an opponent move
    // would be illegal by local rules, yet it is trusted.
    put_game(&state, "g1", board, true, GameStatus::Active).await;

    deliver(
        &state,
        &Message::GameMove {
            from: peer("b@10.0.0.2"),
            game_id: "g1".to_string(),
            position: 4,
            symbol: Symbol::O,
        },
    )
    .await;

    let games_table = state.games.lock().await;
    let game = games_table.get("g1").unwrap();
    assert_eq!(game.board[4], Some(Symbol::O));
    assert!(game.my_turn);
}

#[tokio::test]
async fn remote_win_reconstructs_the_missing_winning_cell() {
    let (state, _out, _dir) = make_test_state("me@10.0.0.1");
    // We saw O at 0 and 1; the move that completed the line at 2 never
    // reached us as a MOVE.
    let mut board = [None; 9];
    board[0] = Some(Symbol::O);
    board[1] = Some(Symbol::O);
    board[3] = Some(Symbol::X);
    put_game(&state, "g1", board, false, GameStatus::Active).await;

    deliver(
        &state,
        &Message::GameResult {
            from: peer("b@10.0.0.2"),
            game_id: "g1".to_string(),
            outcome: GameOutcome::Win,
            winning_line: Some([0, 1, 2]),
            symbol: Some(Symbol::O),
        },
    )
    .await;

    let games_table = state.games.lock().await;
    let game = games_table.get("g1").unwrap();
    assert_eq!(game.board[2], Some(Symbol::O));
    assert_eq!(game.status, GameStatus::Finished);
}

#[tokio::test]
async fn no_moves_are_accepted_after_a_remote_result() {
    let (state, _out, _dir) = make_test_state("me@10.0.0.1");
    put_game(&state, "g1", [None; 9], true, GameStatus::Active).await;

    deliver(
        &state,
        &Message::GameResult {
            from: peer("b@10.0.0.2"),
            game_id: "g1".to_string(),
            outcome: GameOutcome::Draw,
            winning_line: None,
            symbol: None,
        },
    )
    .await;

    assert_error(&games::handle_move(&state, "g1", 0).await, "game_over");
}
