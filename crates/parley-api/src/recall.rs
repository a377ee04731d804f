use std::sync::Arc;

use axum::{Extension, Json, extract::Path, extract::State};
use tracing::warn;

use parley_db::{Database, NewMessage};
use parley_gateway::Registry;
use parley_types::api::{Claims, Envelope};
use parley_types::error::{ChatError, StateKind};
use parley_types::frames::ServerFrame;
use parley_types::models::{GroupRole, MediaKind, MessageKind, NoticeCode, RECALL_WINDOW_SECS};

use crate::error::ApiResult;
use crate::AppState;

pub async fn recall_message(
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Envelope<()>>> {
    let now = chrono::Utc::now().timestamp();
    apply_recall(&state.db, &state.registry, message_id, claims.sub, now).await?;
    Ok(Json(Envelope::done()))
}

/// Recall state machine: Sent → Recalled, guarded by authorship/role and
/// the recall window. A failed guard leaves the row untouched. On success
/// the whole room gets a recall frame; if the recaller is not the author a
/// system notice naming them is persisted as well.
pub async fn apply_recall(
    db: &Arc<Database>,
    registry: &Registry,
    message_id: i64,
    operator_id: i64,
    now: i64,
) -> Result<(), ChatError> {
    let db_task = db.clone();
    let (room, frame) =
        tokio::task::spawn_blocking(move || recall_blocking(&db_task, message_id, operator_id, now))
            .await
            .map_err(|e| ChatError::Store(anyhow::anyhow!("recall task failed: {e}")))??;

    registry.broadcast(&room, frame).await;
    Ok(())
}

fn recall_blocking(
    db: &Database,
    message_id: i64,
    operator_id: i64,
    now: i64,
) -> Result<(String, ServerFrame), ChatError> {
    let row = db
        .get_message(message_id)?
        .ok_or(ChatError::State(StateKind::NotFound))?;
    if row.recalled {
        return Err(ChatError::State(StateKind::AlreadyRecalled));
    }
    if now - row.created_at > RECALL_WINDOW_SECS {
        return Err(ChatError::State(StateKind::WindowExpired));
    }

    let kind = MessageKind::parse(&row.kind)
        .ok_or_else(|| ChatError::Store(anyhow::anyhow!("corrupt kind on message {message_id}")))?;

    if operator_id != row.sender_id {
        check_role_guard(db, kind, &row.room, operator_id, row.sender_id)?;
    }

    // Conditional update: a racing recall or an expiring window loses here
    // even after the checks above passed.
    if !db.recall_message(message_id, now)? {
        let fresh = db
            .get_message(message_id)?
            .ok_or(ChatError::State(StateKind::NotFound))?;
        return Err(if fresh.recalled {
            ChatError::State(StateKind::AlreadyRecalled)
        } else {
            ChatError::State(StateKind::WindowExpired)
        });
    }

    let operator_name = db.resolve_display_name(operator_id, operator_id, &row.room)?;
    let sender_name = db.resolve_display_name(operator_id, row.sender_id, &row.room)?;

    // Bookkeeping: the durable notice naming a non-author recaller. Its
    // failure never undoes the recall that already happened.
    if operator_id != row.sender_id && kind == MessageKind::Group {
        let text = format!("{operator_name} recalled a message");
        let mut notice = NewMessage::text(&row.room, kind, operator_id, row.receiver_id, &text, now);
        notice.media = MediaKind::System;
        notice.notice_code = Some(NoticeCode::Recalled);
        let bookkeeping = db
            .insert_message(&notice)
            .and_then(|_| db.bump_room_counter(&row.room, now));
        if let Err(e) = bookkeeping {
            warn!("recall notice for message {message_id} failed: {e}");
        }
    }

    let frame = ServerFrame::Recall {
        message_id,
        room: row.room.clone(),
        sender_id: row.sender_id,
        operator_id,
        sender_name,
        operator_name,
    };
    Ok((row.room, frame))
}

/// Non-author recalls: room owner may recall anything inside the window;
/// an admin may recall only plain members' messages.
fn check_role_guard(
    db: &Database,
    kind: MessageKind,
    room: &str,
    operator_id: i64,
    sender_id: i64,
) -> Result<(), ChatError> {
    if kind != MessageKind::Group {
        return Err(ChatError::Permission("only the sender can recall this message".into()));
    }
    let group = db
        .group_by_room(room)?
        .ok_or_else(|| ChatError::Validation(format!("unknown group room {room}")))?;
    let operator_role = db
        .member_role(group.id, operator_id)?
        .ok_or_else(|| ChatError::Permission("not a member of this group".into()))?;
    let sender_role = db.member_role(group.id, sender_id)?.unwrap_or(GroupRole::Member);

    let allowed = match operator_role {
        GroupRole::Owner => true,
        GroupRole::Admin => sender_role == GroupRole::Member,
        GroupRole::Member => false,
    };
    if !allowed {
        return Err(ChatError::Permission("role does not allow recalling this message".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_gateway::ingest::{IngestInput, ingest};
    use parley_types::models::{MediaKind, MessageKind};

    fn setup() -> (Arc<Database>, Registry) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.add_user(1, "alice", "Alice").unwrap(); // owner
        db.add_user(2, "bob", "Bob").unwrap(); // admin
        db.add_user(3, "carol", "Carol").unwrap(); // member
        db.add_user(4, "dave", "Dave").unwrap(); // member
        db.create_group(10, "g1", "Climbing", 1).unwrap();
        db.add_group_member(10, 2, GroupRole::Admin, None).unwrap();
        db.add_group_member(10, 3, GroupRole::Member, None).unwrap();
        db.add_group_member(10, 4, GroupRole::Member, None).unwrap();
        (db, Registry::new())
    }

    async fn send(db: &Arc<Database>, registry: &Registry, sender: i64, content: &str) -> i64 {
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

    fn created_at(db: &Database, id: i64) -> i64 {
        db.get_message(id).unwrap().unwrap().created_at
    }

    #[tokio::test]
    async fn sender_recalls_inside_window_once() {
        let (db, registry) = setup();
        let id = send(&db, &registry, 3, "typo").await;
        let t0 = created_at(&db, id);

        apply_recall(&db, &registry, id, 3, t0 + 5).await.unwrap();
        assert!(db.get_message(id).unwrap().unwrap().recalled);

        let err = apply_recall(&db, &registry, id, 3, t0 + 6).await.unwrap_err();
        assert!(matches!(err, ChatError::State(StateKind::AlreadyRecalled)));
    }

    #[tokio::test]
    async fn window_expiry_leaves_row_unchanged() {
        let (db, registry) = setup();
        let id = send(&db, &registry, 3, "slow regret").await;
        let t0 = created_at(&db, id);

        let err = apply_recall(&db, &registry, id, 3, t0 + RECALL_WINDOW_SECS + 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::State(StateKind::WindowExpired)));
        assert!(!db.get_message(id).unwrap().unwrap().recalled);
    }

    #[tokio::test]
    async fn role_guards_owner_admin_member() {
        let (db, registry) = setup();

        // Admin can recall a member's message...
        let id = send(&db, &registry, 3, "member msg").await;
        let t0 = created_at(&db, id);
        apply_recall(&db, &registry, id, 2, t0 + 1).await.unwrap();

        // ...but not the owner's or another admin's.
        let id = send(&db, &registry, 1, "owner msg").await;
        let t0 = created_at(&db, id);
        let err = apply_recall(&db, &registry, id, 2, t0 + 1).await.unwrap_err();
        assert!(matches!(err, ChatError::Permission(_)));

        // Owner can recall anything.
        apply_recall(&db, &registry, id, 1, t0 + 2).await.unwrap();

        // A plain member cannot recall someone else's message.
        let id = send(&db, &registry, 4, "other member msg").await;
        let t0 = created_at(&db, id);
        let err = apply_recall(&db, &registry, id, 3, t0 + 1).await.unwrap_err();
        assert!(matches!(err, ChatError::Permission(_)));
    }

    #[tokio::test]
    async fn non_author_recall_persists_a_named_notice_and_broadcasts() {
        let (db, registry) = setup();
        let (_conn, mut rx) = registry.register("g1", 3).await;

        let id = send(&db, &registry, 3, "against the rules").await;
        let _ = rx.try_recv(); // drop the message frame

        let t0 = created_at(&db, id);
        apply_recall(&db, &registry, id, 1, t0 + 1).await.unwrap();

        match rx.try_recv().unwrap() {
            ServerFrame::Recall { message_id, operator_id, operator_name, .. } => {
                assert_eq!(message_id, id);
                assert_eq!(operator_id, 1);
                assert_eq!(operator_name, "Alice");
            }
            other => panic!("unexpected frame {other:?}"),
        }

        // The operator's durable notice exists and names them.
        let notices: Vec<_> = db
            .history("g1", 1)
            .unwrap()
            .into_iter()
            .filter(|m| m.media == "system")
            .collect();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].notice_code.as_deref(), Some("recalled"));
        assert!(notices[0].payload.contains("Alice"));

        // The notice counts toward the room's row total and recency.
        let (count, updated_at) = db.room_counter("g1").unwrap();
        assert_eq!(count, 2);
        assert!(updated_at >= t0);
    }

    #[tokio::test]
    async fn missing_message_is_not_found() {
        let (db, registry) = setup();
        let err = apply_recall(&db, &registry, 999, 1, 100).await.unwrap_err();
        assert!(matches!(err, ChatError::State(StateKind::NotFound)));
    }
}
