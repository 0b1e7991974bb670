use super::{
    Event, NodeState, Response, error_response, ok_response, parse_peer, peer_dest, send_message,
    short_id,
};
use lanfeed_mesh::transport::Destination;
use lanfeed_proto::{Message, PeerId};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// Raw bytes per chunk before text encoding.
pub const CHUNK_DATA_SIZE: usize = 1024;

/// Best-effort throttle between chunk sends so the local socket buffer is
/// not overrun. Not flow control: the receiver has no say.
const CHUNK_PACING: Duration = Duration::from_millis(10);

/// An announced inbound offer the user has not accepted yet. No chunks are
/// buffered in this state.
#[derive(Debug, Clone)]
pub struct PendingOffer {
    pub from: PeerId,
    pub filename: String,
    pub filesize: u64,
    pub filetype: String,
}

/// An accepted inbound transfer being reassembled.
#[derive(Debug)]
pub struct IncomingTransfer {
    pub from: PeerId,
    pub filename: String,
    /// Chunk index → payload, first arrival wins. Iteration order is index
    /// order, which is what assembly concatenates in.
    pub chunks: BTreeMap<u32, Vec<u8>>,
    /// Learned from the first chunk received, not from the offer.
    pub total_chunks: Option<u32>,
}

/// Content type from the filename extension. The original declared size and
/// type are display metadata only and are never validated against the chunk
/// stream.
pub(crate) fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("txt") | Some("md") | Some("log") => "text/plain",
        Some("html") | Some("htm") => "text/html",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}

// ---- local commands ----

/// Offer a file to a peer, then stream its chunks from a dedicated task so
/// the pacing delay never blocks the receive path.
pub async fn handle_send_file(state: &Arc<NodeState>, to: &str, path: &str) -> Response {
    let to = match parse_peer(to) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let dest = match peer_dest(&to) {
        Ok(d) => d,
        Err(resp) => return resp,
    };

    let path = PathBuf::from(path);
    let filesize = match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => meta.len(),
        Ok(_) => return error_response("not_a_file", &format!("{} is not a file", path.display())),
        Err(e) => {
            return error_response("file_not_found", &format!("{}: {e}", path.display()));
        }
    };
    let Some(filename) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
        return error_response("bad_path", &format!("{} has no usable filename", path.display()));
    };

    let file_id = short_id();
    let offer = Message::FileOffer {
        from: state.identity.id.clone(),
        file_id: file_id.clone(),
        filename: filename.clone(),
        filesize,
        filetype: content_type_for(&path).to_string(),
    };
    if let Err(e) = send_message(state, &offer, dest).await {
        return error_response("send_failed", &e.to_string());
    }

    let state = state.clone();
    let task_id = file_id.clone();
    tokio::spawn(async move {
        if let Err(e) = stream_chunks(&state, dest, &task_id, &path, filesize).await {
            tracing::error!(file_id = %task_id, err = %e, "failed to stream file");
        }
    });

    ok_response(Some(format!(
        "offered '{filename}' to {to} as transfer {file_id}"
    )))
}

async fn stream_chunks(
    state: &NodeState,
    dest: Destination,
    file_id: &str,
    path: &Path,
    filesize: u64,
) -> anyhow::Result<()> {
    let total_chunks = filesize.div_ceil(CHUNK_DATA_SIZE as u64) as u32;
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = vec![0u8; CHUNK_DATA_SIZE];
    let mut chunk_index = 0u32;

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        // Pace before every send, the first included, so the receiver has a
        // beat between the offer and chunk 0 in which to accept.
        tokio::time::sleep(CHUNK_PACING).await;
        let msg = Message::FileChunk {
            from: state.identity.id.clone(),
            file_id: file_id.to_string(),
            chunk_index,
            total_chunks,
            chunk_size: n as u32,
            data: buf[..n].to_vec(),
        };
        send_message(state, &msg, dest).await?;
        chunk_index += 1;
    }

    tracing::info!(%file_id, total_chunks, "finished sending all chunks");
    Ok(())
}

/// Move a pending offer to an active transfer with an empty chunk map.
/// Chunks that arrived before this point were dropped, not buffered.
pub async fn handle_accept(state: &Arc<NodeState>, file_id: &str) -> Response {
    let offer = {
        let mut offers = state.offers.lock().await;
        match offers.remove(file_id) {
            Some(offer) => offer,
            None => return error_response("unknown_offer", "invalid or expired file offer id"),
        }
    };

    let filename = offer.filename.clone();
    let mut transfers = state.transfers.lock().await;
    transfers.insert(
        file_id.to_string(),
        IncomingTransfer {
            from: offer.from,
            filename: offer.filename,
            chunks: BTreeMap::new(),
            total_chunks: None,
        },
    );

    ok_response(Some(format!(
        "accepted '{filename}', waiting for chunks"
    )))
}

/// Discard a pending offer. There is no cancellation protocol on the wire;
/// the sender's chunks will simply be dropped on arrival.
pub async fn handle_reject(state: &Arc<NodeState>, file_id: &str) -> Response {
    let mut offers = state.offers.lock().await;
    match offers.remove(file_id) {
        Some(offer) => ok_response(Some(format!("rejected '{}'", offer.filename))),
        None => error_response("unknown_offer", "invalid or expired file offer id"),
    }
}

// ---- remote messages ----

pub async fn handle_file_offer(
    state: &Arc<NodeState>,
    from: PeerId,
    file_id: String,
    filename: String,
    filesize: u64,
    filetype: String,
) {
    {
        let mut offers = state.offers.lock().await;
        offers.insert(
            file_id.clone(),
            PendingOffer {
                from: from.clone(),
                filename: filename.clone(),
                filesize,
                filetype,
            },
        );
    }
    let from = state.display_name(&from).await;
    let _ = state.event_tx.send(Event::FileOffered {
        file_id,
        from,
        filename,
        filesize,
    });
}

/// Store one chunk of an accepted transfer. Chunks for unknown or
/// unaccepted transfer ids are silently dropped; duplicate indices keep the
/// first arrival. Once the stored count reaches the declared total the
/// transfer is taken out of the table and assembled exactly once.
pub async fn handle_file_chunk(
    state: &Arc<NodeState>,
    file_id: String,
    chunk_index: u32,
    total_chunks: u32,
    data: Vec<u8>,
) {
    let completed = {
        let mut transfers = state.transfers.lock().await;
        let Some(transfer) = transfers.get_mut(&file_id) else {
            tracing::trace!(%file_id, chunk_index, "chunk for inactive transfer, dropping");
            return;
        };
        transfer.total_chunks = Some(total_chunks);
        transfer.chunks.entry(chunk_index).or_insert(data);

        if transfer.chunks.len() as u32 == total_chunks {
            // Remove under the lock so late duplicates cannot re-trigger
            // assembly, and so teardown holds even if the write fails.
            transfers.remove(&file_id)
        } else {
            None
        }
    };

    if let Some(transfer) = completed {
        assemble(state, file_id, transfer).await;
    }
}

/// Reconstruct the file in index order, write it out, and confirm receipt.
/// The transfer's state is already gone whichever way this ends.
async fn assemble(state: &Arc<NodeState>, file_id: String, transfer: IncomingTransfer) {
    // Take only the final path component of the declared name so a remote
    // peer cannot steer the write outside the downloads directory.
    let filename = Path::new(&transfer.filename)
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| file_id.clone());
    let path = state.downloads_dir.join(filename);

    let mut contents = Vec::new();
    for chunk in transfer.chunks.values() {
        contents.extend_from_slice(chunk);
    }

    let result = async {
        tokio::fs::create_dir_all(&state.downloads_dir).await?;
        tokio::fs::write(&path, &contents).await
    }
    .await;

    match result {
        Ok(()) => {
            tracing::info!(%file_id, path = %path.display(), "transfer complete");
            let receipt = Message::FileReceived {
                from: state.identity.id.clone(),
                file_id: file_id.clone(),
                status: "COMPLETE".to_string(),
            };
            match peer_dest(&transfer.from) {
                Ok(dest) => {
                    if let Err(e) = send_message(state, &receipt, dest).await {
                        tracing::warn!(%file_id, err = %e, "failed to send receipt");
                    }
                }
                Err(_) => {
                    tracing::warn!(%file_id, from = %transfer.from, "cannot address receipt");
                }
            }
            let _ = state.event_tx.send(Event::TransferComplete { file_id, path });
        }
        Err(e) => {
            tracing::error!(%file_id, err = %e, "failed to write received file");
            let _ = state.event_tx.send(Event::TransferFailed {
                file_id,
                reason: e.to_string(),
            });
        }
    }
}

pub async fn handle_file_received(
    state: &Arc<NodeState>,
    from: PeerId,
    file_id: String,
    status: String,
) {
    tracing::info!(%file_id, from = %from, %status, "receipt confirmed");
    let from = state.display_name(&from).await;
    let _ = state.event_tx.send(Event::ReceiptConfirmed {
        file_id,
        from,
        status,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_from_extension() {
        assert_eq!(content_type_for(Path::new("notes.txt")), "text/plain");
        assert_eq!(content_type_for(Path::new("photo.jpeg")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("archive.zip")), "application/zip");
        assert_eq!(
            content_type_for(Path::new("mystery.bin")),
            "application/octet-stream"
        );
        assert_eq!(
            content_type_for(Path::new("no_extension")),
            "application/octet-stream"
        );
    }
}
