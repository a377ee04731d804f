use std::sync::Arc;

use axum::{Extension, Json, extract::State};

use parley_db::Database;
use parley_db::models::MessageRow;
use parley_gateway::ingest::{IngestInput, ingest};
use parley_gateway::Registry;
use parley_types::api::{Claims, Envelope, ForwardRequest, ForwardResponse};
use parley_types::error::{ChatError, StateKind};
use parley_types::models::{ForwardBundle, ForwardItem, MediaKind, MessageKind};

use crate::error::ApiResult;
use crate::AppState;

pub async fn forward_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ForwardRequest>,
) -> ApiResult<Json<Envelope<ForwardResponse>>> {
    let id = apply_forward(&state.db, &state.registry, claims.sub, req).await?;
    Ok(Json(Envelope::ok(ForwardResponse { message_id: id })))
}

/// Forwarding re-materializes source messages as one new message in the
/// target room, then runs it through the normal ingestion pipeline so the
/// target room's own gating and mention rules apply. Source flags are never
/// copied.
pub async fn apply_forward(
    db: &Arc<Database>,
    registry: &Registry,
    requester: i64,
    req: ForwardRequest,
) -> Result<i64, ChatError> {
    if req.message_ids.is_empty() {
        return Err(ChatError::Validation("no messages selected".into()));
    }

    let db_task = db.clone();
    let input = tokio::task::spawn_blocking(move || build_forward(&db_task, requester, &req))
        .await
        .map_err(|e| ChatError::Store(anyhow::anyhow!("forward task failed: {e}")))??;

    ingest(db, registry, input).await
}

/// Snapshot the sources and shape the forwarded payload. A single source
/// keeps its media and content verbatim; multiple sources become one
/// `forwarded` bundle carrying the origin title and per-item snapshots.
fn build_forward(
    db: &Database,
    requester: i64,
    req: &ForwardRequest,
) -> Result<IngestInput, ChatError> {
    let mut rows: Vec<MessageRow> = Vec::with_capacity(req.message_ids.len());
    for &id in &req.message_ids {
        let row = db
            .get_message(id)?
            .ok_or(ChatError::State(StateKind::NotFound))?;
        // One recalled source fails the whole batch.
        if row.recalled {
            return Err(ChatError::State(StateKind::RecalledSource));
        }
        // Messages the requester cannot see are treated as absent.
        if !db.message_visible(row.id, requester)? {
            return Err(ChatError::State(StateKind::NotFound));
        }
        if row.media == MediaKind::System.as_str() {
            return Err(ChatError::Validation("system notices cannot be forwarded".into()));
        }
        rows.push(row);
    }

    let origin_room = rows[0].room.clone();
    if rows.iter().any(|r| r.room != origin_room) {
        return Err(ChatError::Validation("sources must come from one room".into()));
    }
    rows.sort_by_key(|r| (r.created_at, r.id));

    let (media, payload, size) = if rows.len() == 1 {
        let r = &rows[0];
        let media = MediaKind::parse(&r.media)
            .ok_or_else(|| ChatError::Store(anyhow::anyhow!("corrupt media on message {}", r.id)))?;
        (media, r.payload.clone(), r.size)
    } else {
        let bundle = build_bundle(db, requester, &origin_room, &rows)?;
        let payload = serde_json::to_string(&bundle)
            .map_err(|e| ChatError::Store(anyhow::anyhow!("bundle encoding failed: {e}")))?;
        let size = payload.len() as i64;
        (MediaKind::Forwarded, payload, size)
    };

    Ok(IngestInput {
        room: req.target_room.clone(),
        kind: req.target_kind,
        sender_id: requester,
        receiver_id: req.receiver_id,
        media,
        payload,
        size,
    })
}

fn build_bundle(
    db: &Database,
    requester: i64,
    origin_room: &str,
    rows: &[MessageRow],
) -> Result<ForwardBundle, ChatError> {
    let origin_kind = MessageKind::parse(&rows[0].kind)
        .ok_or_else(|| ChatError::Store(anyhow::anyhow!("corrupt kind on message {}", rows[0].id)))?;

    let origin_title = match db.group_by_room(origin_room)? {
        Some(group) => group.title,
        None => {
            let other = db
                .other_participant(origin_room, requester)?
                .unwrap_or(rows[0].sender_id);
            let mine = db.resolve_display_name(requester, requester, origin_room)?;
            let theirs = db.resolve_display_name(requester, other, origin_room)?;
            format!("{mine} & {theirs}")
        }
    };

    let mut items = Vec::with_capacity(rows.len());
    for r in rows {
        items.push(ForwardItem {
            sender_name: db.resolve_display_name(requester, r.sender_id, origin_room)?,
            content: r.payload.clone(),
            media: MediaKind::parse(&r.media)
                .ok_or_else(|| ChatError::Store(anyhow::anyhow!("corrupt media on message {}", r.id)))?,
            size: r.size,
            created_at: r.created_at,
        });
    }

    Ok(ForwardBundle { origin_title, origin_kind, items })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_types::models::GroupRole;

    fn setup() -> (Arc<Database>, Registry) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.add_user(1, "alice", "Alice").unwrap();
        db.add_user(2, "bob", "Bob").unwrap();
        db.add_user(3, "carol", "Carol").unwrap();
        db.add_contact(1, 3, None).unwrap();
        db.add_contact(3, 1, None).unwrap();
        db.create_group(10, "g1", "Climbing", 1).unwrap();
        db.add_group_member(10, 2, GroupRole::Member, None).unwrap();
        (db, Registry::new())
    }

    async fn send_group(db: &Arc<Database>, registry: &Registry, sender: i64, content: &str) -> i64 {
        ingest(
            db,
            registry,
            IngestInput {
                room: "g1".into(),
                kind: MessageKind::Group,
                sender_id: sender,
                receiver_id: 10,
                media: MediaKind::Text,
                payload: content.into(),
                size: content.len() as i64,
            },
        )
        .await
        .unwrap()
    }

    fn private_request(ids: Vec<i64>) -> ForwardRequest {
        ForwardRequest {
            target_room: "p13".into(),
            target_kind: MessageKind::Private,
            receiver_id: 3,
            message_ids: ids,
        }
    }

    #[tokio::test]
    async fn single_forward_copies_content_not_flags() {
        let (db, registry) = setup();
        let src = send_group(&db, &registry, 2, "route beta").await;

        let id = apply_forward(&db, &registry, 1, private_request(vec![src]))
            .await
            .unwrap();

        let row = db.get_message(id).unwrap().unwrap();
        assert_eq!(row.room, "p13");
        assert_eq!(row.kind, "private");
        assert_eq!(row.media, "text");
        assert_eq!(row.payload, "route beta");
        assert_eq!(row.sender_id, 1);
        assert!(!row.requires_gating);
    }

    #[tokio::test]
    async fn forward_regates_against_target_relationship() {
        let (db, registry) = setup();
        db.add_block(3, 1).unwrap();
        let src = send_group(&db, &registry, 2, "psst").await;

        let id = apply_forward(&db, &registry, 1, private_request(vec![src]))
            .await
            .unwrap();

        let row = db.get_message(id).unwrap().unwrap();
        assert!(row.requires_gating);
        assert!(row.sent_while_blocked);
        assert!(!db.message_visible(id, 3).unwrap());
    }

    #[tokio::test]
    async fn multi_forward_bundles_in_chronological_order() {
        let (db, registry) = setup();
        let a = send_group(&db, &registry, 1, "first").await;
        let b = send_group(&db, &registry, 2, "second").await;

        // Selection order does not matter, creation order does.
        let id = apply_forward(&db, &registry, 1, private_request(vec![b, a]))
            .await
            .unwrap();

        let row = db.get_message(id).unwrap().unwrap();
        assert_eq!(row.media, "forwarded");
        let bundle: ForwardBundle = serde_json::from_str(&row.payload).unwrap();
        assert_eq!(bundle.origin_title, "Climbing");
        assert_eq!(bundle.origin_kind, MessageKind::Group);
        assert_eq!(bundle.items.len(), 2);
        assert_eq!(bundle.items[0].content, "first");
        assert_eq!(bundle.items[0].sender_name, "Alice");
        assert_eq!(bundle.items[1].content, "second");
        assert_eq!(bundle.items[1].sender_name, "Bob");
    }

    #[tokio::test]
    async fn recalled_source_fails_the_whole_batch() {
        let (db, registry) = setup();
        let a = send_group(&db, &registry, 1, "keep").await;
        let b = send_group(&db, &registry, 1, "gone").await;
        let t0 = db.get_message(b).unwrap().unwrap().created_at;
        assert!(db.recall_message(b, t0 + 1).unwrap());

        let err = apply_forward(&db, &registry, 1, private_request(vec![a, b]))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::State(StateKind::RecalledSource)));
        // Nothing landed in the target room.
        assert!(db.history("p13", 1).unwrap().is_empty());
    }

    #[tokio::test]
    async fn invisible_source_reads_as_not_found() {
        let (db, registry) = setup();
        let src = send_group(&db, &registry, 2, "secret").await;
        db.add_tombstone(src, 1).unwrap();

        let err = apply_forward(&db, &registry, 1, private_request(vec![src]))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::State(StateKind::NotFound)));
    }

    #[tokio::test]
    async fn empty_selection_is_rejected() {
        let (db, registry) = setup();
        let err = apply_forward(&db, &registry, 1, private_request(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }
}
