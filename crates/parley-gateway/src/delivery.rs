use std::sync::Arc;

use tracing::warn;

use parley_db::{Database, NewMessage};
use parley_db::models::MessageRow;
use parley_types::error::ChatError;
use parley_types::frames::ServerFrame;
use parley_types::models::{MediaKind, MessageKind, NoticeCode};

use crate::registry::Registry;

/// Fan a persisted message out to the room. Decides the receiver's
/// delivered status at write time, then broadcasts; gated messages only
/// ever reach their sender, so fan-out honours the same predicate as the
/// read path.
pub async fn deliver(
    db: &Arc<Database>,
    registry: &Registry,
    row: MessageRow,
) -> Result<(), ChatError> {
    let kind = MessageKind::parse(&row.kind)
        .ok_or_else(|| ChatError::Store(anyhow::anyhow!("corrupt kind on message {}", row.id)))?;
    let gated = row.requires_gating || row.sent_while_blocked;

    // Private chats track delivery on the row itself: delivered iff the
    // receiver has the room open right now. A gated message is never
    // delivered regardless of presence.
    if kind != MessageKind::Group
        && !gated
        && registry.is_registered(&row.room, row.receiver_id).await
    {
        let db_task = db.clone();
        let id = row.id;
        tokio::task::spawn_blocking(move || db_task.set_delivered(id))
            .await
            .map_err(|e| ChatError::Store(anyhow::anyhow!("delivered-flag task failed: {e}")))?
            .map_err(ChatError::Store)?;
    }

    // One broadcast frame is shared by every connected viewer, so the name
    // is resolved from the sender's own side (their in-room alias, else
    // profile name). Per-viewer relationship aliases apply on replay, where
    // each viewer gets their own resolution.
    let db_task = db.clone();
    let wire_row = row.clone();
    let viewer = row.sender_id;
    let wire = tokio::task::spawn_blocking(move || db_task.to_wire(viewer, wire_row))
        .await
        .map_err(|e| ChatError::Store(anyhow::anyhow!("wire task failed: {e}")))?
        .map_err(ChatError::Store)?;

    if gated {
        registry.send_to(&row.room, row.sender_id, ServerFrame::Message(wire)).await;
        notify_sender(db, registry, &row).await;
    } else {
        registry.broadcast(&row.room, ServerFrame::Message(wire)).await;
    }

    Ok(())
}

/// Persist and deliver the sender-only system notice that trails a gated
/// message. Sequenced after the primary frame so clients render the real
/// message first. Failures are logged and swallowed: bookkeeping must never
/// roll back a message that is already durable.
async fn notify_sender(db: &Arc<Database>, registry: &Registry, primary: &MessageRow) {
    let (code, text) = if primary.sent_while_blocked {
        (NoticeCode::Rejected, "message was rejected by the recipient")
    } else {
        (NoticeCode::VerificationRequired, "recipient requires contact verification")
    };

    let db_task = db.clone();
    let room = primary.room.clone();
    let kind = MessageKind::parse(&primary.kind).unwrap_or(MessageKind::Private);
    let sender_id = primary.sender_id;
    let receiver_id = primary.receiver_id;
    let now = chrono::Utc::now().timestamp();

    let result = tokio::task::spawn_blocking(move || {
        let mut notice = NewMessage::text(&room, kind, sender_id, receiver_id, text, now);
        notice.media = MediaKind::System;
        notice.notice_code = Some(code);
        let id = db_task.insert_message(&notice)?;
        db_task.bump_room_counter(&room, now)?;
        let row = db_task
            .get_message(id)?
            .ok_or_else(|| anyhow::anyhow!("notice {id} vanished after insert"))?;
        db_task.to_wire(sender_id, row)
    })
    .await;

    match result {
        Ok(Ok(wire)) => {
            registry
                .send_to(&primary.room, primary.sender_id, ServerFrame::Message(wire))
                .await;
        }
        Ok(Err(e)) => warn!("sender notice for message {} failed: {e}", primary.id),
        Err(e) => warn!("sender notice task for message {} failed: {e}", primary.id),
    }
}
