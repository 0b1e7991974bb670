//! Interactive command prompt. Parses commands into handler calls and
//! prints events from the node's broadcast channel; all formatting lives
//! here, none in the subsystems.

use crate::handler::{
    Event, NodeState, Response, error_response, games, groups, ok_response, social, transfer,
};
use anyhow::Result;
use lanfeed_proto::message::{GameOutcome, LikeAction};
use std::io::Write;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;

const HELP: &str = "\
commands:
  post <text>                        broadcast a post
  feed                               show the feed, newest first
  like <author> <timestamp>          like a post
  unlike <author> <timestamp>        take a like back
  dm <peer> <text>                   send a direct message
  follow <peer> / unfollow <peer>    manage follows
  peers                              list peers seen on the network
  sendfile <peer> <path>             offer and stream a file
  accept <file_id> / reject <file_id>  answer a file offer
  creategroup <id> <name> <m1,m2>    create a group
  addtogroup <id> <m1,m2>            add members (creator only)
  removefromgroup <id> <m1,m2>       remove members (creator only)
  gmsg <id> <text>                   message a group
  groups                             list your groups
  ttt <peer>                         invite a peer to tic-tac-toe
  move <game_id> <0-8>               play a cell
  games                              list game sessions
  quit                               exit";

/// Run the prompt until EOF or `quit`.
pub async fn run(state: Arc<NodeState>) -> Result<()> {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut events = state.event_tx.subscribe();

    println!("lanfeed is running as {}; type 'help' for commands", state.identity.id);
    prompt();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let cmd = line.trim();
                if cmd == "quit" {
                    break;
                }
                if !cmd.is_empty() {
                    print_response(run_command(&state, cmd).await);
                }
                prompt();
            }
            event = events.recv() => {
                if let Ok(event) = event {
                    println!("\n{}", render_event(&event));
                    prompt();
                }
            }
        }
    }
    Ok(())
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

fn print_response(resp: Response) {
    match resp {
        Response::Ok { detail: Some(detail) } => println!("{detail}"),
        Response::Ok { detail: None } => println!("ok"),
        Response::Error { message, .. } => println!("error: {message}"),
    }
}

fn usage(text: &str) -> Response {
    error_response("usage", text)
}

async fn run_command(state: &Arc<NodeState>, cmd: &str) -> Response {
    let (verb, rest) = match cmd.split_once(' ') {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (cmd, ""),
    };

    match verb {
        "help" => ok_response(Some(HELP.to_string())),
        "post" => social::handle_post(state, rest).await,
        "feed" => social::handle_feed(state).await,
        "peers" => social::handle_peers(state).await,
        "dm" => match rest.split_once(' ') {
            Some((to, content)) => social::handle_dm(state, to, content.trim()).await,
            None => usage("usage: dm <peer> <text>"),
        },
        "follow" | "unfollow" => {
            if rest.is_empty() {
                return usage(&format!("usage: {verb} <peer>"));
            }
            social::handle_follow(state, rest, verb == "follow").await
        }
        "like" | "unlike" => {
            let action = if verb == "like" {
                LikeAction::Like
            } else {
                LikeAction::Unlike
            };
            match rest.split_once(' ').and_then(|(author, ts)| {
                ts.trim().parse::<u64>().ok().map(|ts| (author, ts))
            }) {
                Some((author, timestamp)) => {
                    social::handle_like(state, author, timestamp, action).await
                }
                None => usage(&format!("usage: {verb} <author> <timestamp>")),
            }
        }
        "sendfile" => match rest.split_once(' ') {
            Some((to, path)) => transfer::handle_send_file(state, to, path.trim()).await,
            None => usage("usage: sendfile <peer> <path>"),
        },
        "accept" => {
            if rest.is_empty() {
                return usage("usage: accept <file_id>");
            }
            transfer::handle_accept(state, rest).await
        }
        "reject" => {
            if rest.is_empty() {
                return usage("usage: reject <file_id>");
            }
            transfer::handle_reject(state, rest).await
        }
        "creategroup" => {
            let mut parts = rest.splitn(3, ' ');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(id), Some(name), Some(members)) => {
                    groups::handle_create_group(state, id, name, members.trim()).await
                }
                _ => usage("usage: creategroup <id> <name> <member1,member2,...>"),
            }
        }
        "addtogroup" | "removefromgroup" => {
            let action = if verb == "addtogroup" {
                groups::UpdateAction::Add
            } else {
                groups::UpdateAction::Remove
            };
            match rest.split_once(' ') {
                Some((id, members)) => {
                    groups::handle_update_group(state, action, id, members.trim()).await
                }
                None => usage(&format!("usage: {verb} <group_id> <member1,member2,...>")),
            }
        }
        "gmsg" => match rest.split_once(' ') {
            Some((id, content)) => groups::handle_group_message(state, id, content.trim()).await,
            None => usage("usage: gmsg <group_id> <text>"),
        },
        "groups" => groups::handle_list_groups(state).await,
        "ttt" => {
            if rest.is_empty() {
                return usage("usage: ttt <peer>");
            }
            games::handle_invite(state, rest).await
        }
        "move" => {
            match rest.split_once(' ').and_then(|(id, pos)| {
                pos.trim().parse::<u8>().ok().map(|pos| (id, pos))
            }) {
                Some((game_id, position)) => games::handle_move(state, game_id, position).await,
                None => usage("usage: move <game_id> <position 0-8>"),
            }
        }
        "games" => games::handle_list_games(state).await,
        _ => error_response("unknown_command", "unknown command; type 'help'"),
    }
}

fn render_event(event: &Event) -> String {
    match event {
        Event::ProfileSeen {
            display_name,
            status,
            ..
        } => format!("[PROFILE] {display_name} — {status}"),
        Event::PostReceived { author, content } => format!("[POST] {author}: {content}"),
        Event::DmReceived { from, content } => format!("[DM] {from}: {content}"),
        Event::FollowerAdded { peer } => format!("{peer} has followed you"),
        Event::FollowerRemoved { peer } => format!("{peer} has unfollowed you"),
        Event::PostLiked {
            peer,
            action,
            post_timestamp,
        } => {
            let verb = match action {
                LikeAction::Like => "liked",
                LikeAction::Unlike => "unliked",
            };
            format!("{peer} {verb} your post [{post_timestamp}]")
        }
        Event::GroupInvited {
            group_id,
            group_name,
        } => format!("you've been added to group '{group_name}' ({group_id})"),
        Event::GroupUpdated { group_name, .. } => {
            format!("the group '{group_name}' member list was updated")
        }
        Event::GroupMessage {
            group_name,
            from,
            content,
        } => format!("[{group_name}] {from}: {content}"),
        Event::FileOffered {
            file_id,
            from,
            filename,
            filesize,
        } => format!(
            "{from} is sending you '{filename}' ({filesize} bytes)\nto accept, type: accept {file_id}"
        ),
        Event::TransferComplete { file_id, path } => {
            format!("file transfer {file_id} is complete, saved to {}", path.display())
        }
        Event::TransferFailed { file_id, reason } => {
            format!("file transfer {file_id} failed: {reason}")
        }
        Event::ReceiptConfirmed {
            file_id,
            from,
            status,
        } => format!("{from} confirmed {status} for transfer {file_id}"),
        Event::GameInvited {
            game_id,
            from,
            symbol,
        } => format!(
            "{from} invited you to tic-tac-toe (game {game_id})\nyou are '{symbol}' and it is your turn: move {game_id} <0-8>"
        ),
        Event::GameMoveApplied { game_id, board } => format!(
            "move received for game {game_id}, it is your turn\n{}",
            games::render_board(board)
        ),
        Event::GameEnded {
            game_id,
            outcome,
            board,
        } => {
            let verdict = match outcome {
                GameOutcome::Win => "you lose",
                GameOutcome::Draw => "it's a draw",
            };
            format!(
                "game {game_id} is over: {verdict}\n{}",
                games::render_board(board)
            )
        }
    }
}
