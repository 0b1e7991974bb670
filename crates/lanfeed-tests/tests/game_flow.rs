use lanfeed_node::handler::games::GameStatus;
use lanfeed_node::handler::{Event, Response, games};
use lanfeed_proto::message::GameOutcome;
use lanfeed_tests::harness::{TestNet, TestPeer, spawn_peer};

async fn play(peer: &TestPeer, game_id: &str, position: u8) {
    let resp = games::handle_move(&peer.state, game_id, position).await;
    assert!(
        matches!(resp, Response::Ok { .. }),
        "move {position} rejected: {resp:?}"
    );
}

#[tokio::test]
async fn a_full_game_to_a_win() {
    let net = TestNet::new();
    let mut alice = spawn_peer(&net, "alice", "10.0.0.1").await;
    let mut bob = spawn_peer(&net, "bob", "10.0.0.2").await;

    games::handle_invite(&alice.state, "bob@10.0.0.2").await;
    let event = bob
        .wait_for(|e| matches!(e, Event::GameInvited { .. }))
        .await;
    let Event::GameInvited { game_id, symbol: bob_symbol, .. } = event else {
        unreachable!()
    };

    // The invitee moves first. Bob works the top row while Alice answers in
    // the middle row.
    play(&bob, &game_id, 0).await;
    alice
        .wait_for(|e| matches!(e, Event::GameMoveApplied { .. }))
        .await;
    play(&alice, &game_id, 3).await;
    bob.wait_for(|e| matches!(e, Event::GameMoveApplied { .. }))
        .await;
    play(&bob, &game_id, 1).await;
    alice
        .wait_for(|e| matches!(e, Event::GameMoveApplied { .. }))
        .await;
    play(&alice, &game_id, 4).await;
    bob.wait_for(|e| matches!(e, Event::GameMoveApplied { .. }))
        .await;

    // 0-1-2 completes Bob's line: his side reports the win immediately.
    let resp = games::handle_move(&bob.state, &game_id, 2).await;
    let Response::Ok { detail: Some(detail) } = resp else {
        panic!("winning move should succeed with a verdict");
    };
    assert!(detail.contains("you won"));

    // Alice never saw the winning MOVE, only the RESULT; the missing cell is
    // reconstructed from the declared line.
    let event = alice
        .wait_for(|e| matches!(e, Event::GameEnded { .. }))
        .await;
    let Event::GameEnded { outcome, board, .. } = event else {
        unreachable!()
    };
    assert_eq!(outcome, GameOutcome::Win);
    for cell in [0, 1, 2] {
        assert_eq!(board[cell], Some(bob_symbol));
    }

    // Both sessions are finished; no further moves are accepted anywhere.
    for peer in [&alice, &bob] {
        let games_table = peer.state.games.lock().await;
        assert_eq!(games_table.get(&game_id).unwrap().status, GameStatus::Finished);
    }
    let resp = games::handle_move(&alice.state, &game_id, 8).await;
    assert!(matches!(resp, Response::Error { .. }));
}

#[tokio::test]
async fn symbols_are_complementary_across_the_two_sides() {
    let net = TestNet::new();
    let alice = spawn_peer(&net, "alice", "10.0.0.1").await;
    let mut bob = spawn_peer(&net, "bob", "10.0.0.2").await;

    games::handle_invite(&alice.state, "bob@10.0.0.2").await;
    let event = bob
        .wait_for(|e| matches!(e, Event::GameInvited { .. }))
        .await;
    let Event::GameInvited { game_id, symbol: bob_symbol, .. } = event else {
        unreachable!()
    };

    let alice_games = alice.state.games.lock().await;
    let alice_symbol = alice_games.get(&game_id).unwrap().my_symbol;
    assert_eq!(alice_symbol, bob_symbol.other());

    let bob_games = bob.state.games.lock().await;
    assert_eq!(bob_games.get(&game_id).unwrap().my_symbol, bob_symbol);
    assert!(bob_games.get(&game_id).unwrap().my_turn);
}
