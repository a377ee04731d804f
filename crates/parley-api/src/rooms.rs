use axum::{Extension, Json, extract::Path, extract::State};

use parley_db::Database;
use parley_types::api::{Claims, Envelope, RoomSummary};
use parley_types::error::ChatError;
use parley_types::models::MessageKind;

use crate::error::{ApiResult, run_blocking};
use crate::AppState;

pub async fn pin_room(
    State(state): State<AppState>,
    Path(room): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Envelope<()>>> {
    let db = state.db.clone();
    run_blocking(move || Ok(db.pin_room(claims.sub, &room)?)).await?;
    Ok(Json(Envelope::done()))
}

pub async fn unpin_room(
    State(state): State<AppState>,
    Path(room): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Envelope<()>>> {
    let db = state.db.clone();
    run_blocking(move || Ok(db.unpin_room(claims.sub, &room)?)).await?;
    Ok(Json(Envelope::done()))
}

pub async fn mute_room(
    State(state): State<AppState>,
    Path(room): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Envelope<()>>> {
    let db = state.db.clone();
    run_blocking(move || Ok(db.mute_room(claims.sub, &room)?)).await?;
    Ok(Json(Envelope::done()))
}

pub async fn unmute_room(
    State(state): State<AppState>,
    Path(room): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Envelope<()>>> {
    let db = state.db.clone();
    run_blocking(move || Ok(db.unmute_room(claims.sub, &room)?)).await?;
    Ok(Json(Envelope::done()))
}

/// Chat-list view: one summary per room the caller participates in, pinned
/// rooms first, then most recently active.
pub async fn list_rooms(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Envelope<Vec<RoomSummary>>>> {
    let db = state.db.clone();
    let viewer = claims.sub;
    let summaries = run_blocking(move || build_summaries(&db, viewer)).await?;
    Ok(Json(Envelope::ok(summaries)))
}

fn build_summaries(db: &Database, viewer: i64) -> Result<Vec<RoomSummary>, ChatError> {
    let mut out = Vec::new();
    for room in db.rooms_for_user(viewer)? {
        let kind = db
            .room_kind(&room)?
            .and_then(|k| MessageKind::parse(&k))
            .unwrap_or(MessageKind::Private);

        let title = match db.group_by_room(&room)? {
            Some(group) => group.title,
            None => match db.other_participant(&room, viewer)? {
                Some(other) => db.resolve_display_name(viewer, other, &room)?,
                None => room.clone(),
            },
        };

        let last_message = db.last_visible_wire(&room, viewer)?;
        let (unread, unread_mentions) = match kind {
            MessageKind::Group => (
                db.group_unread_count(&room, viewer)?,
                db.unread_mention_count(&room, viewer)?,
            ),
            _ => (db.private_unread_count(&room, viewer)?, 0),
        };
        let (pinned, muted) = db.room_flags(viewer, &room)?;
        let (message_count, updated_at) = db.room_counter(&room)?;

        out.push(RoomSummary {
            room,
            kind,
            title,
            last_message,
            unread,
            unread_mentions,
            pinned,
            muted,
            message_count,
            updated_at,
        });
    }
    out.sort_by(|a, b| b.pinned.cmp(&a.pinned).then(b.updated_at.cmp(&a.updated_at)));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use parley_db::NewMessage;
    use parley_gateway::Registry;
    use parley_gateway::ingest::{IngestInput, ingest};
    use parley_types::models::{GroupRole, MediaKind};

    fn setup() -> Arc<Database> {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.add_user(1, "alice", "Alice").unwrap();
        db.add_user(2, "bob", "Bob").unwrap();
        db.add_user(3, "carol", "Carol").unwrap();
        db.create_group(10, "g1", "Climbing", 2).unwrap();
        db.add_group_member(10, 1, GroupRole::Member, None).unwrap();
        db.add_group_member(10, 3, GroupRole::Member, None).unwrap();
        db
    }

    async fn send(db: &Arc<Database>, room: &str, kind: MessageKind, sender: i64, receiver: i64, content: &str) {
        ingest(
            db,
            &Registry::new(),
            IngestInput {
                room: room.into(),
                kind,
                sender_id: sender,
                receiver_id: receiver,
                media: MediaKind::Text,
                payload: content.into(),
                size: content.len() as i64,
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn summaries_cover_titles_unreads_and_counters() {
        let db = setup();
        db.add_contact(1, 2, None).unwrap();
        db.add_contact(2, 1, None).unwrap();
        send(&db, "p12", MessageKind::Private, 2, 1, "hey alice").await;
        send(&db, "g1", MessageKind::Group, 2, 10, "meet @Alice at 6").await;
        send(&db, "g1", MessageKind::Group, 3, 10, "works for me").await;

        let summaries = build_summaries(&db, 1).unwrap();
        assert_eq!(summaries.len(), 2);

        let group = summaries.iter().find(|s| s.room == "g1").unwrap();
        assert_eq!(group.kind, MessageKind::Group);
        assert_eq!(group.title, "Climbing");
        assert_eq!(group.unread, 2);
        assert_eq!(group.unread_mentions, 1);
        assert_eq!(group.message_count, 2);
        assert_eq!(group.last_message.as_ref().unwrap().content, "works for me");

        let private = summaries.iter().find(|s| s.room == "p12").unwrap();
        assert_eq!(private.kind, MessageKind::Private);
        assert_eq!(private.title, "Bob");
        assert_eq!(private.unread, 1);
        assert_eq!(private.unread_mentions, 0);
    }

    #[tokio::test]
    async fn pinned_rooms_sort_ahead_of_newer_activity() {
        let db = setup();
        send(&db, "p12", MessageKind::Private, 2, 1, "old").await;
        db.pin_room(1, "p12").unwrap();
        // g1 is more recent, but p12 is pinned.
        db.insert_message(&NewMessage::text("g1", MessageKind::Group, 2, 10, "new", i64::MAX / 2))
            .unwrap();
        db.bump_room_counter("g1", i64::MAX / 2).unwrap();

        let summaries = build_summaries(&db, 1).unwrap();
        assert_eq!(summaries[0].room, "p12");
        assert!(summaries[0].pinned);
        assert_eq!(summaries[1].room, "g1");
    }

    #[tokio::test]
    async fn gated_text_never_surfaces_in_the_receivers_summary() {
        let db = setup();
        db.add_contact(2, 1, None).unwrap(); // one-way: bob added alice
        send(&db, "p12", MessageKind::Private, 2, 1, "gated").await;

        let summaries = build_summaries(&db, 1).unwrap();
        let private = summaries.iter().find(|s| s.room == "p12").unwrap();
        // The receiver sees the room-visible verification notice, never the
        // gated text itself.
        let last = private.last_message.as_ref().unwrap();
        assert_eq!(last.media, MediaKind::System);
        assert_ne!(last.content, "gated");
        assert_eq!(private.message_count, 2);
    }
}
