use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};

use parley_db::Database;
use parley_types::error::ChatError;
use parley_types::frames::{ClientFrame, ServerFrame};
use parley_types::models::{MediaKind, MessageKind};

use crate::history;
use crate::ingest::{self, IngestInput};
use crate::registry::Registry;
use crate::upload::{ActiveUpload, MediaStore};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Shared services injected into every connection task.
#[derive(Clone)]
pub struct ConnectionCtx {
    pub db: Arc<Database>,
    pub registry: Registry,
    pub media: Arc<MediaStore>,
}

/// Handle one pre-authenticated socket for a (room, participant) pair:
/// register, replay history, then pump frames both ways until the
/// transport closes. Unregistration is unconditional on exit — a leaked
/// registry entry is the primary resource-exhaustion risk here.
pub async fn handle_connection(
    socket: WebSocket,
    ctx: ConnectionCtx,
    room: String,
    kind: MessageKind,
    user_id: i64,
) {
    let (mut sender, mut receiver) = socket.split();

    let (conn_id, mut frames_rx) = ctx.registry.register(&room, user_id).await;
    info!("user {} connected to room {} ({})", user_id, room, kind.as_str());

    // History replay: one ordered batch, then mark everything read.
    match history::replay(&ctx.db, &room, user_id).await {
        Ok(messages) => {
            let frame = ServerFrame::History { messages };
            if sender.send(Message::Text(frame.to_json().into())).await.is_err() {
                ctx.registry.unregister(&room, user_id, conn_id).await;
                return;
            }
        }
        Err(e) => {
            warn!("history replay failed for {room}/{user_id}: {e}");
            ctx.registry.unregister(&room, user_id, conn_id).await;
            return;
        }
    }
    history::mark_replayed(&ctx.db, &room, kind, user_id).await;

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward room frames -> client, with heartbeat.
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                frame = frames_rx.recv() => {
                    let Some(frame) = frame else { break };
                    if sender.send(Message::Text(frame.to_json().into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read frames from the client.
    let recv_ctx = ctx.clone();
    let recv_room = room.clone();
    let mut recv_task = tokio::spawn(async move {
        let mut upload: Option<ActiveUpload> = None;
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(frame) => {
                        handle_frame(&recv_ctx, &recv_room, kind, user_id, frame, &mut upload)
                            .await;
                    }
                    Err(e) => {
                        warn!("user {} bad frame: {} -- raw: {}", user_id, e, snippet(&text));
                    }
                },
                // Raw binary frames feed the in-flight upload directly.
                Message::Binary(data) => {
                    push_chunk(&recv_ctx, &recv_room, kind, user_id, &data, &mut upload).await;
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        // A dropped connection mid-transfer never produces a row.
        if let Some(active) = upload.take() {
            active.abort().await;
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    ctx.registry.unregister(&room, user_id, conn_id).await;
    info!("user {} disconnected from room {}", user_id, room);
}

async fn handle_frame(
    ctx: &ConnectionCtx,
    room: &str,
    kind: MessageKind,
    user_id: i64,
    frame: ClientFrame,
    upload: &mut Option<ActiveUpload>,
) {
    match frame {
        ClientFrame::Text { content, receiver_id } => {
            ingest_inline(ctx, room, kind, user_id, receiver_id, MediaKind::Text, content).await;
        }

        ClientFrame::System { content, receiver_id } => {
            ingest_inline(ctx, room, kind, user_id, receiver_id, MediaKind::System, content).await;
        }

        ClientFrame::UploadStart { filename, media, size, receiver_id } => {
            if upload.is_some() {
                let err = ChatError::Validation("an upload is already in progress".into());
                report_failure(ctx, room, user_id, &err).await;
                return;
            }
            match ActiveUpload::begin(&ctx.media, &filename, media, size, receiver_id).await {
                Ok(active) => *upload = Some(active),
                Err(e) => report_failure(ctx, room, user_id, &e).await,
            }
        }

        ClientFrame::UploadChunk { data } => match B64.decode(&data) {
            Ok(bytes) => push_chunk(ctx, room, kind, user_id, &bytes, upload).await,
            Err(_) => {
                let err = ChatError::Validation("chunk is not valid base64".into());
                report_failure(ctx, room, user_id, &err).await;
            }
        },
    }
}

/// Run an inline (non-upload) frame payload through ingestion.
async fn ingest_inline(
    ctx: &ConnectionCtx,
    room: &str,
    kind: MessageKind,
    user_id: i64,
    receiver_id: i64,
    media: MediaKind,
    payload: String,
) {
    let size = payload.len() as i64;
    let input = IngestInput {
        room: room.to_string(),
        kind,
        sender_id: user_id,
        receiver_id,
        media,
        payload,
        size,
    };
    if let Err(e) = ingest::ingest(&ctx.db, &ctx.registry, input).await {
        report_failure(ctx, room, user_id, &e).await;
    }
}

/// Feed one chunk into the in-flight transfer; on implicit completion the
/// stored media goes through the ordinary ingestion pipeline.
async fn push_chunk(
    ctx: &ConnectionCtx,
    room: &str,
    kind: MessageKind,
    user_id: i64,
    data: &[u8],
    upload: &mut Option<ActiveUpload>,
) {
    let Some(active) = upload.as_mut() else {
        let err = ChatError::Validation("no upload in progress".into());
        report_failure(ctx, room, user_id, &err).await;
        return;
    };

    match active.push(data).await {
        Ok(false) => {}
        Ok(true) => {
            let Some(done) = upload.take() else { return };
            let media = done.media();
            let receiver_id = done.receiver_id();
            match done.finalize().await {
                Ok(stored) => {
                    let input = IngestInput {
                        room: room.to_string(),
                        kind,
                        sender_id: user_id,
                        receiver_id,
                        media,
                        payload: stored.stored_name,
                        size: stored.size,
                    };
                    if let Err(e) = ingest::ingest(&ctx.db, &ctx.registry, input).await {
                        report_failure(ctx, room, user_id, &e).await;
                    }
                }
                Err(e) => report_failure(ctx, room, user_id, &e).await,
            }
        }
        Err(e) => {
            if let Some(failed) = upload.take() {
                failed.abort().await;
            }
            report_failure(ctx, room, user_id, &e).await;
        }
    }
}

/// First ~200 bytes of a raw frame for the log, cut on a char boundary so
/// multibyte payloads cannot panic the recv task.
fn snippet(text: &str) -> &str {
    let mut end = text.len().min(200);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Failures are reported to the offending sender only; nobody else in the
/// room learns about them.
async fn report_failure(ctx: &ConnectionCtx, room: &str, user_id: i64, err: &ChatError) {
    warn!("frame from user {user_id} in {room} failed: {err}");
    let frame = ServerFrame::Error { code: err.code().to_string(), message: err.to_string() };
    ctx.registry.send_to(room, user_id, frame).await;
}
