use axum::{Extension, Json, extract::Path, extract::Query, extract::State};

use parley_types::api::{Claims, Envelope, SearchQuery};
use parley_types::error::{ChatError, StateKind};
use parley_types::models::WireMessage;

use crate::error::{ApiResult, run_blocking};
use crate::AppState;

/// Per-user delete: drops the message from the caller's view only. Repeating
/// the call is a no-op, so clients can retry freely.
pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Envelope<()>>> {
    let db = state.db.clone();
    let viewer = claims.sub;
    run_blocking(move || {
        db.get_message(message_id)?
            .ok_or(ChatError::State(StateKind::NotFound))?;
        db.add_tombstone(message_id, viewer)?;
        Ok(())
    })
    .await?;
    Ok(Json(Envelope::done()))
}

/// Clears a disbanded group's history from the caller's view. Active groups
/// refuse; other members' views are untouched.
pub async fn delete_chat(
    State(state): State<AppState>,
    Path(room): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Envelope<()>>> {
    let db = state.db.clone();
    let viewer = claims.sub;
    run_blocking(move || {
        let group = db
            .group_by_room(&room)?
            .ok_or_else(|| ChatError::Validation(format!("{room} is not a group room")))?;
        if !group.disbanded {
            return Err(ChatError::State(StateKind::GroupActive));
        }
        db.tombstone_room(&room, viewer)?;
        Ok(())
    })
    .await?;
    Ok(Json(Envelope::done()))
}

/// Searches the caller's visible history of one room. The same visibility
/// predicate as replay applies, so a search can never surface a message the
/// room view would hide.
pub async fn search_room(
    State(state): State<AppState>,
    Path(room): Path<String>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Envelope<Vec<WireMessage>>>> {
    let db = state.db.clone();
    let viewer = claims.sub;
    let hits = run_blocking(move || Ok(db.search_wire(&room, viewer, &query)?)).await?;
    Ok(Json(Envelope::ok(hits)))
}

/// Acknowledges a mention. Succeeds whether or not a mention existed, so a
/// retried acknowledgement never surfaces an error.
pub async fn mention_read(
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Envelope<()>>> {
    let db = state.db.clone();
    let viewer = claims.sub;
    run_blocking(move || {
        db.mark_mention_read(message_id, viewer)?;
        Ok(())
    })
    .await?;
    Ok(Json(Envelope::done()))
}
