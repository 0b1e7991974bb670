//! Typed protocol messages and the conversion boundary between them and the
//! raw field mapping. Subsystems only ever see `Message` values; required
//! fields are validated here so handlers never re-parse raw strings.

use crate::codec::Fields;
use crate::peer::PeerId;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::fmt;

/// A tic-tac-toe mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    X,
    O,
}

impl Symbol {
    pub fn other(self) -> Symbol {
        match self {
            Symbol::X => Symbol::O,
            Symbol::O => Symbol::X,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Symbol::X => "X",
            Symbol::O => "O",
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeAction {
    Like,
    Unlike,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameOutcome {
    Win,
    Draw,
}

/// A decoded protocol message, one variant per wire `TYPE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Profile {
        user_id: PeerId,
        display_name: String,
        status: String,
    },
    Post {
        user_id: PeerId,
        content: String,
        timestamp: u64,
    },
    Dm {
        from: PeerId,
        to: PeerId,
        content: String,
    },
    Follow {
        from: PeerId,
        to: PeerId,
    },
    Unfollow {
        from: PeerId,
        to: PeerId,
    },
    Like {
        from: PeerId,
        /// Author of the post being (un)liked.
        to: PeerId,
        post_timestamp: u64,
        action: LikeAction,
    },
    GroupCreate {
        from: PeerId,
        group_id: String,
        group_name: String,
        members: Vec<PeerId>,
    },
    GroupUpdate {
        from: PeerId,
        group_id: String,
        add: Vec<PeerId>,
        remove: Vec<PeerId>,
    },
    GroupMessage {
        from: PeerId,
        group_id: String,
        content: String,
    },
    FileOffer {
        from: PeerId,
        file_id: String,
        filename: String,
        filesize: u64,
        filetype: String,
    },
    FileChunk {
        from: PeerId,
        file_id: String,
        chunk_index: u32,
        total_chunks: u32,
        chunk_size: u32,
        data: Vec<u8>,
    },
    FileReceived {
        from: PeerId,
        file_id: String,
        status: String,
    },
    GameInvite {
        from: PeerId,
        game_id: String,
        /// The symbol assigned to the invitee.
        symbol: Symbol,
    },
    GameMove {
        from: PeerId,
        game_id: String,
        position: u8,
        symbol: Symbol,
    },
    GameResult {
        from: PeerId,
        game_id: String,
        outcome: GameOutcome,
        winning_line: Option<[u8; 3]>,
        symbol: Option<Symbol>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("message has no TYPE field")]
    MissingType,
    #[error("unrecognized message type {0:?}")]
    UnknownType(String),
    #[error("{kind} message is missing required field {field}")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
    #[error("{kind} field {field} is invalid: {reason}")]
    InvalidField {
        kind: &'static str,
        field: &'static str,
        reason: String,
    },
}

fn req<'a>(
    fields: &'a Fields,
    kind: &'static str,
    field: &'static str,
) -> Result<&'a str, DecodeError> {
    fields
        .get(field)
        .ok_or(DecodeError::MissingField { kind, field })
}

fn req_peer(fields: &Fields, kind: &'static str, field: &'static str) -> Result<PeerId, DecodeError> {
    PeerId::parse(req(fields, kind, field)?).map_err(|e| DecodeError::InvalidField {
        kind,
        field,
        reason: e.to_string(),
    })
}

fn req_num<T: std::str::FromStr>(
    fields: &Fields,
    kind: &'static str,
    field: &'static str,
) -> Result<T, DecodeError>
where
    T::Err: fmt::Display,
{
    req(fields, kind, field)?
        .parse()
        .map_err(|e: T::Err| DecodeError::InvalidField {
            kind,
            field,
            reason: e.to_string(),
        })
}

fn req_symbol(
    fields: &Fields,
    kind: &'static str,
    field: &'static str,
) -> Result<Symbol, DecodeError> {
    match req(fields, kind, field)? {
        "X" => Ok(Symbol::X),
        "O" => Ok(Symbol::O),
        other => Err(DecodeError::InvalidField {
            kind,
            field,
            reason: format!("expected X or O, got {other:?}"),
        }),
    }
}

/// Parse a comma-separated peer list. Entries that are empty or not of the
/// `name@host` shape are skipped rather than failing the whole message.
fn peer_list(raw: &str) -> Vec<PeerId> {
    raw.split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .filter_map(|m| PeerId::parse(m).ok())
        .collect()
}

fn peer_csv(peers: &[PeerId]) -> String {
    peers
        .iter()
        .map(PeerId::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

impl Message {
    /// The wire `TYPE` discriminant for this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Profile { .. } => "PROFILE",
            Message::Post { .. } => "POST",
            Message::Dm { .. } => "DM",
            Message::Follow { .. } => "FOLLOW",
            Message::Unfollow { .. } => "UNFOLLOW",
            Message::Like { .. } => "LIKE",
            Message::GroupCreate { .. } => "GROUP_CREATE",
            Message::GroupUpdate { .. } => "GROUP_UPDATE",
            Message::GroupMessage { .. } => "GROUP_MESSAGE",
            Message::FileOffer { .. } => "FILE_OFFER",
            Message::FileChunk { .. } => "FILE_CHUNK",
            Message::FileReceived { .. } => "FILE_RECEIVED",
            Message::GameInvite { .. } => "TICTACTOE_INVITE",
            Message::GameMove { .. } => "TICTACTOE_MOVE",
            Message::GameResult { .. } => "TICTACTOE_RESULT",
        }
    }

    /// The peer that originated this message, whichever of `USER_ID`/`FROM`
    /// the type carries.
    pub fn origin(&self) -> &PeerId {
        match self {
            Message::Profile { user_id, .. } | Message::Post { user_id, .. } => user_id,
            Message::Dm { from, .. }
            | Message::Follow { from, .. }
            | Message::Unfollow { from, .. }
            | Message::Like { from, .. }
            | Message::GroupCreate { from, .. }
            | Message::GroupUpdate { from, .. }
            | Message::GroupMessage { from, .. }
            | Message::FileOffer { from, .. }
            | Message::FileChunk { from, .. }
            | Message::FileReceived { from, .. }
            | Message::GameInvite { from, .. }
            | Message::GameMove { from, .. }
            | Message::GameResult { from, .. } => from,
        }
    }

    /// Validate a decoded field mapping into a typed message.
    ///
    /// Fields beyond the required set are ignored, matching the protocol's
    /// tolerance for unknown fields.
    pub fn from_fields(fields: &Fields) -> Result<Self, DecodeError> {
        let kind = fields.get("TYPE").ok_or(DecodeError::MissingType)?;
        match kind {
            "PROFILE" => Ok(Message::Profile {
                user_id: req_peer(fields, "PROFILE", "USER_ID")?,
                display_name: req(fields, "PROFILE", "DISPLAY_NAME")?.to_string(),
                status: req(fields, "PROFILE", "STATUS")?.to_string(),
            }),
            "POST" => Ok(Message::Post {
                user_id: req_peer(fields, "POST", "USER_ID")?,
                content: req(fields, "POST", "CONTENT")?.to_string(),
                timestamp: req_num(fields, "POST", "TIMESTAMP")?,
            }),
            "DM" => Ok(Message::Dm {
                from: req_peer(fields, "DM", "FROM")?,
                to: req_peer(fields, "DM", "TO")?,
                content: req(fields, "DM", "CONTENT")?.to_string(),
            }),
            "FOLLOW" => Ok(Message::Follow {
                from: req_peer(fields, "FOLLOW", "FROM")?,
                to: req_peer(fields, "FOLLOW", "TO")?,
            }),
            "UNFOLLOW" => Ok(Message::Unfollow {
                from: req_peer(fields, "UNFOLLOW", "FROM")?,
                to: req_peer(fields, "UNFOLLOW", "TO")?,
            }),
            "LIKE" => Ok(Message::Like {
                from: req_peer(fields, "LIKE", "FROM")?,
                to: req_peer(fields, "LIKE", "TO")?,
                post_timestamp: req_num(fields, "LIKE", "POST_TIMESTAMP")?,
                action: match req(fields, "LIKE", "ACTION")? {
                    "LIKE" => LikeAction::Like,
                    "UNLIKE" => LikeAction::Unlike,
                    other => {
                        return Err(DecodeError::InvalidField {
                            kind: "LIKE",
                            field: "ACTION",
                            reason: format!("expected LIKE or UNLIKE, got {other:?}"),
                        });
                    }
                },
            }),
            "GROUP_CREATE" => Ok(Message::GroupCreate {
                from: req_peer(fields, "GROUP_CREATE", "FROM")?,
                group_id: req(fields, "GROUP_CREATE", "GROUP_ID")?.to_string(),
                group_name: req(fields, "GROUP_CREATE", "GROUP_NAME")?.to_string(),
                members: peer_list(req(fields, "GROUP_CREATE", "MEMBERS")?),
            }),
            "GROUP_UPDATE" => {
                // ADD and REMOVE are each optional, but an update carrying
                // neither is meaningless.
                let add = fields.get("ADD").map(peer_list).unwrap_or_default();
                let remove = fields.get("REMOVE").map(peer_list).unwrap_or_default();
                if fields.get("ADD").is_none() && fields.get("REMOVE").is_none() {
                    return Err(DecodeError::MissingField {
                        kind: "GROUP_UPDATE",
                        field: "ADD or REMOVE",
                    });
                }
                Ok(Message::GroupUpdate {
                    from: req_peer(fields, "GROUP_UPDATE", "FROM")?,
                    group_id: req(fields, "GROUP_UPDATE", "GROUP_ID")?.to_string(),
                    add,
                    remove,
                })
            }
            "GROUP_MESSAGE" => Ok(Message::GroupMessage {
                from: req_peer(fields, "GROUP_MESSAGE", "FROM")?,
                group_id: req(fields, "GROUP_MESSAGE", "GROUP_ID")?.to_string(),
                content: req(fields, "GROUP_MESSAGE", "CONTENT")?.to_string(),
            }),
            "FILE_OFFER" => Ok(Message::FileOffer {
                from: req_peer(fields, "FILE_OFFER", "FROM")?,
                file_id: req(fields, "FILE_OFFER", "FILEID")?.to_string(),
                filename: req(fields, "FILE_OFFER", "FILENAME")?.to_string(),
                filesize: req_num(fields, "FILE_OFFER", "FILESIZE")?,
                filetype: req(fields, "FILE_OFFER", "FILETYPE")?.to_string(),
            }),
            "FILE_CHUNK" => Ok(Message::FileChunk {
                from: req_peer(fields, "FILE_CHUNK", "FROM")?,
                file_id: req(fields, "FILE_CHUNK", "FILEID")?.to_string(),
                chunk_index: req_num(fields, "FILE_CHUNK", "CHUNK_INDEX")?,
                total_chunks: req_num(fields, "FILE_CHUNK", "TOTAL_CHUNKS")?,
                chunk_size: req_num(fields, "FILE_CHUNK", "CHUNK_SIZE")?,
                data: BASE64
                    .decode(req(fields, "FILE_CHUNK", "DATA")?)
                    .map_err(|e| DecodeError::InvalidField {
                        kind: "FILE_CHUNK",
                        field: "DATA",
                        reason: e.to_string(),
                    })?,
            }),
            "FILE_RECEIVED" => Ok(Message::FileReceived {
                from: req_peer(fields, "FILE_RECEIVED", "FROM")?,
                file_id: req(fields, "FILE_RECEIVED", "FILEID")?.to_string(),
                status: req(fields, "FILE_RECEIVED", "STATUS")?.to_string(),
            }),
            "TICTACTOE_INVITE" => Ok(Message::GameInvite {
                from: req_peer(fields, "TICTACTOE_INVITE", "FROM")?,
                game_id: req(fields, "TICTACTOE_INVITE", "GAMEID")?.to_string(),
                symbol: req_symbol(fields, "TICTACTOE_INVITE", "SYMBOL")?,
            }),
            "TICTACTOE_MOVE" => {
                let position: u8 = req_num(fields, "TICTACTOE_MOVE", "POSITION")?;
                // Board indexing needs a bounded position even though remote
                // moves are otherwise trusted.
                if position > 8 {
                    return Err(DecodeError::InvalidField {
                        kind: "TICTACTOE_MOVE",
                        field: "POSITION",
                        reason: format!("{position} is outside 0..=8"),
                    });
                }
                Ok(Message::GameMove {
                    from: req_peer(fields, "TICTACTOE_MOVE", "FROM")?,
                    game_id: req(fields, "TICTACTOE_MOVE", "GAMEID")?.to_string(),
                    position,
                    symbol: req_symbol(fields, "TICTACTOE_MOVE", "SYMBOL")?,
                })
            }
            "TICTACTOE_RESULT" => {
                let outcome = match req(fields, "TICTACTOE_RESULT", "RESULT")? {
                    "WIN" => GameOutcome::Win,
                    "DRAW" => GameOutcome::Draw,
                    other => {
                        return Err(DecodeError::InvalidField {
                            kind: "TICTACTOE_RESULT",
                            field: "RESULT",
                            reason: format!("expected WIN or DRAW, got {other:?}"),
                        });
                    }
                };
                let winning_line = match fields.get("WINNING_LINE") {
                    Some(raw) => Some(parse_winning_line(raw)?),
                    None => None,
                };
                let symbol = match fields.get("SYMBOL") {
                    Some(_) => Some(req_symbol(fields, "TICTACTOE_RESULT", "SYMBOL")?),
                    None => None,
                };
                Ok(Message::GameResult {
                    from: req_peer(fields, "TICTACTOE_RESULT", "FROM")?,
                    game_id: req(fields, "TICTACTOE_RESULT", "GAMEID")?.to_string(),
                    outcome,
                    winning_line,
                    symbol,
                })
            }
            other => Err(DecodeError::UnknownType(other.to_string())),
        }
    }

    /// Serialize back into the wire field mapping.
    pub fn to_fields(&self) -> Fields {
        let mut f = Fields::new();
        f.set("TYPE", self.kind());
        match self {
            Message::Profile {
                user_id,
                display_name,
                status,
            } => {
                f.set("USER_ID", user_id.as_str());
                f.set("DISPLAY_NAME", display_name);
                f.set("STATUS", status);
            }
            Message::Post {
                user_id,
                content,
                timestamp,
            } => {
                f.set("USER_ID", user_id.as_str());
                f.set("CONTENT", content);
                f.set("TIMESTAMP", timestamp.to_string());
            }
            Message::Dm { from, to, content } => {
                f.set("FROM", from.as_str());
                f.set("TO", to.as_str());
                f.set("CONTENT", content);
            }
            Message::Follow { from, to } | Message::Unfollow { from, to } => {
                f.set("FROM", from.as_str());
                f.set("TO", to.as_str());
            }
            Message::Like {
                from,
                to,
                post_timestamp,
                action,
            } => {
                f.set("FROM", from.as_str());
                f.set("TO", to.as_str());
                f.set("POST_TIMESTAMP", post_timestamp.to_string());
                f.set(
                    "ACTION",
                    match action {
                        LikeAction::Like => "LIKE",
                        LikeAction::Unlike => "UNLIKE",
                    },
                );
            }
            Message::GroupCreate {
                from,
                group_id,
                group_name,
                members,
            } => {
                f.set("FROM", from.as_str());
                f.set("GROUP_ID", group_id);
                f.set("GROUP_NAME", group_name);
                f.set("MEMBERS", peer_csv(members));
            }
            Message::GroupUpdate {
                from,
                group_id,
                add,
                remove,
            } => {
                f.set("FROM", from.as_str());
                f.set("GROUP_ID", group_id);
                if !add.is_empty() {
                    f.set("ADD", peer_csv(add));
                }
                if !remove.is_empty() {
                    f.set("REMOVE", peer_csv(remove));
                }
            }
            Message::GroupMessage {
                from,
                group_id,
                content,
            } => {
                f.set("FROM", from.as_str());
                f.set("GROUP_ID", group_id);
                f.set("CONTENT", content);
            }
            Message::FileOffer {
                from,
                file_id,
                filename,
                filesize,
                filetype,
            } => {
                f.set("FROM", from.as_str());
                f.set("FILEID", file_id);
                f.set("FILENAME", filename);
                f.set("FILESIZE", filesize.to_string());
                f.set("FILETYPE", filetype);
            }
            Message::FileChunk {
                from,
                file_id,
                chunk_index,
                total_chunks,
                chunk_size,
                data,
            } => {
                f.set("FROM", from.as_str());
                f.set("FILEID", file_id);
                f.set("CHUNK_INDEX", chunk_index.to_string());
                f.set("TOTAL_CHUNKS", total_chunks.to_string());
                f.set("CHUNK_SIZE", chunk_size.to_string());
                f.set("DATA", BASE64.encode(data));
            }
            Message::FileReceived {
                from,
                file_id,
                status,
            } => {
                f.set("FROM", from.as_str());
                f.set("FILEID", file_id);
                f.set("STATUS", status);
            }
            Message::GameInvite {
                from,
                game_id,
                symbol,
            } => {
                f.set("FROM", from.as_str());
                f.set("GAMEID", game_id);
                f.set("SYMBOL", symbol.as_str());
            }
            Message::GameMove {
                from,
                game_id,
                position,
                symbol,
            } => {
                f.set("FROM", from.as_str());
                f.set("GAMEID", game_id);
                f.set("POSITION", position.to_string());
                f.set("SYMBOL", symbol.as_str());
            }
            Message::GameResult {
                from,
                game_id,
                outcome,
                winning_line,
                symbol,
            } => {
                f.set("FROM", from.as_str());
                f.set("GAMEID", game_id);
                f.set(
                    "RESULT",
                    match outcome {
                        GameOutcome::Win => "WIN",
                        GameOutcome::Draw => "DRAW",
                    },
                );
                if let Some(line) = winning_line {
                    f.set(
                        "WINNING_LINE",
                        format!("{},{},{}", line[0], line[1], line[2]),
                    );
                }
                if let Some(symbol) = symbol {
                    f.set("SYMBOL", symbol.as_str());
                }
            }
        }
        f
    }
}

fn parse_winning_line(raw: &str) -> Result<[u8; 3], DecodeError> {
    let invalid = |reason: String| DecodeError::InvalidField {
        kind: "TICTACTOE_RESULT",
        field: "WINNING_LINE",
        reason,
    };
    let cells: Vec<u8> = raw
        .split(',')
        .map(|c| c.trim().parse::<u8>())
        .collect::<Result<_, _>>()
        .map_err(|e| invalid(e.to_string()))?;
    let line: [u8; 3] = cells
        .try_into()
        .map_err(|_| invalid("expected exactly three cells".to_string()))?;
    if line.iter().any(|&c| c > 8) {
        return Err(invalid("cell outside 0..=8".to_string()));
    }
    Ok(line)
}
