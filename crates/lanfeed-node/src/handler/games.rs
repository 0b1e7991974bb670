use super::{
    Event, NodeState, Response, error_response, ok_response, parse_peer, peer_dest, send_message,
    short_id,
};
use lanfeed_proto::message::{GameOutcome, Symbol};
use lanfeed_proto::{Message, PeerId};
use std::sync::Arc;

pub const WINNING_LINES: [[u8; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8], // rows
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8], // columns
    [0, 4, 8],
    [2, 4, 6], // diagonals
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameStatus {
    Pending,
    Active,
    Finished,
}

/// One tic-tac-toe match against a single opponent. Cells are written at
/// most once by local moves; the state machine is one-shot
/// pending → active → finished.
#[derive(Debug, Clone)]
pub struct GameSession {
    pub board: [Option<Symbol>; 9],
    pub my_symbol: Symbol,
    pub opponent: PeerId,
    pub my_turn: bool,
    pub status: GameStatus,
}

/// The first line fully held by `symbol`, if any.
pub fn winning_line(board: &[Option<Symbol>; 9], symbol: Symbol) -> Option<[u8; 3]> {
    WINNING_LINES
        .iter()
        .find(|line| line.iter().all(|&cell| board[cell as usize] == Some(symbol)))
        .copied()
}

pub fn is_draw(board: &[Option<Symbol>; 9]) -> bool {
    board.iter().all(|cell| cell.is_some())
}

/// Render the board with cell indices shown for empty cells.
pub fn render_board(board: &[Option<Symbol>; 9]) -> String {
    let mut out = String::from("-------------\n");
    for row in 0..3 {
        let cell = |col: usize| {
            let i = row * 3 + col;
            match board[i] {
                Some(symbol) => symbol.to_string(),
                None => i.to_string(),
            }
        };
        out.push_str(&format!("| {} | {} | {} |\n", cell(0), cell(1), cell(2)));
        out.push_str("-------------\n");
    }
    out
}

// ---- local commands ----

/// Start a game: pick symbols at random, give the opponent the first turn,
/// and send them an invite carrying their symbol.
pub async fn handle_invite(state: &Arc<NodeState>, opponent: &str) -> Response {
    let opponent = match parse_peer(opponent) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let dest = match peer_dest(&opponent) {
        Ok(d) => d,
        Err(resp) => return resp,
    };

    let game_id = short_id();
    let my_symbol = if rand::random::<bool>() {
        Symbol::X
    } else {
        Symbol::O
    };
    let their_symbol = my_symbol.other();

    {
        let mut games = state.games.lock().await;
        games.insert(
            game_id.clone(),
            GameSession {
                board: [None; 9],
                my_symbol,
                opponent: opponent.clone(),
                my_turn: false,
                status: GameStatus::Pending,
            },
        );
    }

    let msg = Message::GameInvite {
        from: state.identity.id.clone(),
        game_id: game_id.clone(),
        symbol: their_symbol,
    };
    if let Err(e) = send_message(state, &msg, dest).await {
        return error_response("send_failed", &e.to_string());
    }

    ok_response(Some(format!(
        "invited {opponent} to game {game_id}; you are '{my_symbol}', waiting for their first move"
    )))
}

/// Play a cell. Rejections are local only — nothing goes on the wire for an
/// illegal move.
pub async fn handle_move(state: &Arc<NodeState>, game_id: &str, position: u8) -> Response {
    let (msg, dest, detail) = {
        let mut games = state.games.lock().await;
        let Some(game) = games.get_mut(game_id) else {
            return error_response("unknown_game", &format!("no game {game_id}"));
        };
        let dest = match peer_dest(&game.opponent) {
            Ok(d) => d,
            Err(resp) => return resp,
        };

        if game.status == GameStatus::Finished {
            return error_response("game_over", "this game is already over");
        }
        if !game.my_turn {
            return error_response("not_your_turn", "it is not your turn");
        }
        if position > 8 {
            return error_response("bad_move", "position must be between 0 and 8");
        }
        let cell = position as usize;
        if game.board[cell].is_some() {
            return error_response("bad_move", "that cell is already taken");
        }

        game.board[cell] = Some(game.my_symbol);
        game.status = GameStatus::Active;

        if let Some(line) = winning_line(&game.board, game.my_symbol) {
            game.status = GameStatus::Finished;
            let msg = Message::GameResult {
                from: state.identity.id.clone(),
                game_id: game_id.to_string(),
                outcome: GameOutcome::Win,
                winning_line: Some(line),
                symbol: Some(game.my_symbol),
            };
            (msg, dest, format!("you won!\n{}", render_board(&game.board)))
        } else if is_draw(&game.board) {
            game.status = GameStatus::Finished;
            let msg = Message::GameResult {
                from: state.identity.id.clone(),
                game_id: game_id.to_string(),
                outcome: GameOutcome::Draw,
                winning_line: None,
                symbol: None,
            };
            (msg, dest, format!("it's a draw\n{}", render_board(&game.board)))
        } else {
            game.my_turn = false;
            let msg = Message::GameMove {
                from: state.identity.id.clone(),
                game_id: game_id.to_string(),
                position,
                symbol: game.my_symbol,
            };
            (msg, dest, render_board(&game.board))
        }
    };

    if let Err(e) = send_message(state, &msg, dest).await {
        return error_response("send_failed", &e.to_string());
    }
    ok_response(Some(detail))
}

pub async fn handle_list_games(state: &Arc<NodeState>) -> Response {
    let games = state.games.lock().await;
    if games.is_empty() {
        return ok_response(Some("no games".to_string()));
    }
    let mut lines: Vec<String> = games
        .iter()
        .map(|(game_id, game)| {
            let status = match game.status {
                GameStatus::Pending => "pending",
                GameStatus::Active => "active",
                GameStatus::Finished => "finished",
            };
            let turn = if game.my_turn && game.status != GameStatus::Finished {
                ", your turn"
            } else {
                ""
            };
            format!(
                "{game_id}: vs {} as '{}' ({status}{turn})",
                game.opponent, game.my_symbol
            )
        })
        .collect();
    lines.sort();
    ok_response(Some(lines.join("\n")))
}

// ---- remote messages ----

/// Mirror the inviter's session: we hold the symbol the invite assigned us,
/// and the first move is ours.
pub async fn handle_remote_invite(
    state: &Arc<NodeState>,
    from: PeerId,
    game_id: String,
    symbol: Symbol,
) {
    {
        let mut games = state.games.lock().await;
        games.insert(
            game_id.clone(),
            GameSession {
                board: [None; 9],
                my_symbol: symbol,
                opponent: from.clone(),
                my_turn: true,
                status: GameStatus::Pending,
            },
        );
    }
    let from = state.display_name(&from).await;
    let _ = state.event_tx.send(Event::GameInvited {
        game_id,
        from,
        symbol,
    });
}

/// Apply an opponent's move as announced. The sender validated legality on
/// its side; the receiver trusts the claim and only flips the turn.
pub async fn handle_remote_move(
    state: &Arc<NodeState>,
    game_id: String,
    position: u8,
    symbol: Symbol,
) {
    let board = {
        let mut games = state.games.lock().await;
        let Some(game) = games.get_mut(&game_id) else {
            tracing::debug!(%game_id, "move for unknown game, dropping");
            return;
        };
        game.board[position as usize] = Some(symbol);
        game.my_turn = true;
        game.status = GameStatus::Active;
        game.board
    };
    let _ = state.event_tx.send(Event::GameMoveApplied { game_id, board });
}

/// End the session on the opponent's result. For a WIN we may be missing
/// the move that completed the line — it was never sent as a MOVE — so the
/// first cell on the declared line not yet bearing the winning symbol is
/// filled in.
pub async fn handle_remote_result(
    state: &Arc<NodeState>,
    game_id: String,
    outcome: GameOutcome,
    winning_line: Option<[u8; 3]>,
    symbol: Option<Symbol>,
) {
    let board = {
        let mut games = state.games.lock().await;
        let Some(game) = games.get_mut(&game_id) else {
            tracing::debug!(%game_id, "result for unknown game, dropping");
            return;
        };
        if outcome == GameOutcome::Win
            && let (Some(line), Some(symbol)) = (winning_line, symbol)
        {
            for &cell in line.iter() {
                if game.board[cell as usize] != Some(symbol) {
                    game.board[cell as usize] = Some(symbol);
                    break;
                }
            }
        }
        game.status = GameStatus::Finished;
        game.board
    };
    let _ = state.event_tx.send(Event::GameEnded {
        game_id,
        outcome,
        board,
    });
}
