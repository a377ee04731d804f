use std::sync::Arc;

use tracing::warn;

use parley_db::Database;
use parley_types::error::ChatError;
use parley_types::models::{MessageKind, WireMessage};

/// Filtered room history for the connecting participant, oldest first,
/// sender names resolved for their view.
pub async fn replay(
    db: &Arc<Database>,
    room: &str,
    viewer: i64,
) -> Result<Vec<WireMessage>, ChatError> {
    let db = db.clone();
    let room = room.to_string();
    tokio::task::spawn_blocking(move || db.history_wire(&room, viewer))
        .await
        .map_err(|e| ChatError::Store(anyhow::anyhow!("history task failed: {e}")))?
        .map_err(ChatError::Store)
}

/// After the history batch is pushed, mark everything currently visible as
/// read for the connecting participant. Best-effort bookkeeping: a failure
/// on one row is logged and skipped, never aborting the rest of the batch.
pub async fn mark_replayed(db: &Arc<Database>, room: &str, kind: MessageKind, viewer: i64) {
    let db = db.clone();
    let room = room.to_string();
    let result = tokio::task::spawn_blocking(move || {
        match kind {
            MessageKind::Private | MessageKind::Assistant => {
                if let Err(e) = db.mark_private_delivered(&room, viewer) {
                    warn!("delivered-flag backfill failed for {room}/{viewer}: {e}");
                }
            }
            MessageKind::Group => {
                let ids = match db.unmarked_visible_messages(&room, viewer) {
                    Ok(ids) => ids,
                    Err(e) => {
                        warn!("read-marker scan failed for {room}/{viewer}: {e}");
                        return;
                    }
                };
                for id in ids {
                    if let Err(e) = db.mark_read(id, viewer) {
                        warn!("read marker failed for message {id}/{viewer}: {e}");
                    }
                }
            }
        }
    })
    .await;

    if let Err(e) = result {
        warn!("mark-replayed task failed for {viewer}: {e}");
    }
}
