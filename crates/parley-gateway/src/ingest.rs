use std::sync::Arc;

use tracing::warn;

use parley_db::{Database, NewMessage};
use parley_db::models::MessageRow;
use parley_types::error::{ChatError, StateKind};
use parley_types::models::{MENTION_ALL_TOKEN, MediaKind, MessageKind, PairState};

use crate::delivery;
use crate::registry::Registry;

/// A message handed to the ingestion pipeline, either straight off a socket
/// frame or re-materialized by a forward.
#[derive(Debug, Clone)]
pub struct IngestInput {
    pub room: String,
    pub kind: MessageKind,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub media: MediaKind,
    pub payload: String,
    pub size: i64,
}

/// §ingestion pipeline: reject disbanded groups, freeze relationship flags,
/// resolve mentions, persist, bump the room counter, backfill read markers
/// for connected viewers, then hand off to delivery. Returns the new id.
pub async fn ingest(
    db: &Arc<Database>,
    registry: &Registry,
    input: IngestInput,
) -> Result<i64, ChatError> {
    if input.payload.is_empty() {
        return Err(ChatError::Validation("empty payload".into()));
    }
    if input.kind != MessageKind::Group && input.sender_id == input.receiver_id {
        return Err(ChatError::Validation("sender and receiver are the same user".into()));
    }

    // Who has the room open right now; their read markers are filled in at
    // write time so an open window never shows a false unread badge.
    let occupants = if input.kind == MessageKind::Group {
        registry.occupants(&input.room).await
    } else {
        Vec::new()
    };

    let now = chrono::Utc::now().timestamp();
    let db_task = db.clone();
    let row = tokio::task::spawn_blocking(move || persist(&db_task, input, occupants, now))
        .await
        .map_err(|e| ChatError::Store(anyhow::anyhow!("ingest task failed: {e}")))??;

    let id = row.id;
    delivery::deliver(db, registry, row).await?;
    Ok(id)
}

/// Synchronous persistence half of the pipeline. Runs on the blocking pool
/// in one piece, so the row and its counter bump cannot be torn apart by a
/// dropped connection.
fn persist(
    db: &Database,
    input: IngestInput,
    occupants: Vec<i64>,
    now: i64,
) -> Result<MessageRow, ChatError> {
    // (a) disbanded groups take nothing new
    if input.kind == MessageKind::Group {
        let group = db
            .group_by_room(&input.room)
            .map_err(ChatError::Store)?
            .ok_or_else(|| ChatError::Validation(format!("unknown group room {}", input.room)))?;
        if group.disbanded {
            return Err(ChatError::State(StateKind::GroupDisbanded));
        }
    }

    // (b) relationship flags, frozen at send time
    let (requires_gating, sent_while_blocked) = if input.kind == MessageKind::Private {
        match db
            .classify_pair(input.sender_id, input.receiver_id)
            .map_err(ChatError::Store)?
        {
            PairState::Mutual => (false, false),
            PairState::OneWay => (true, false),
            PairState::Blocked => (true, true),
        }
    } else {
        (false, false)
    };

    // (c) mention resolution for group text
    let mut mention_ids: Vec<i64> = Vec::new();
    let mut mention_all = false;
    if input.kind == MessageKind::Group && input.media == MediaKind::Text {
        let candidates = db
            .mention_candidates(&input.room, input.sender_id)
            .map_err(ChatError::Store)?;
        if input.payload.contains(MENTION_ALL_TOKEN) {
            mention_all = true;
            mention_ids = candidates.into_iter().map(|(id, _)| id).collect();
        } else {
            for (uid, name) in candidates {
                if input.payload.contains(&format!("@{name}")) {
                    mention_ids.push(uid);
                }
            }
        }
    }

    // (d) persist row and mention set
    let msg = NewMessage {
        room: input.room.clone(),
        kind: input.kind,
        media: input.media,
        sender_id: input.sender_id,
        receiver_id: input.receiver_id,
        payload: input.payload,
        size: input.size,
        created_at: now,
        mention_all,
        requires_gating,
        sent_while_blocked,
        notice_code: None,
    };
    let id = db.insert_message(&msg).map_err(ChatError::Store)?;
    if !mention_ids.is_empty() {
        db.insert_mentions(id, &mention_ids).map_err(ChatError::Store)?;
    }

    // (e) aggregate counter, atomic at the store
    db.bump_room_counter(&input.room, now).map_err(ChatError::Store)?;

    // (f) read markers for the sender and everyone with the room open.
    // Bookkeeping only; failures never undo the persisted message.
    if input.kind == MessageKind::Group {
        if let Err(e) = db.mark_read(id, input.sender_id) {
            warn!("sender read marker failed for message {id}: {e}");
        }
        for uid in occupants {
            if uid == input.sender_id {
                continue;
            }
            if let Err(e) = db.mark_read(id, uid) {
                warn!("viewer read marker failed for message {id}/{uid}: {e}");
            }
        }
    }

    db.get_message(id)
        .map_err(ChatError::Store)?
        .ok_or_else(|| ChatError::Store(anyhow::anyhow!("message {id} vanished after insert")))
}
