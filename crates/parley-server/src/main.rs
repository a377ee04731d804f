use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_api::middleware::{require_auth, verify_token};
use parley_api::{AppState, AppStateInner, forward, messages, recall, rooms};
use parley_gateway::connection::{self, ConnectionCtx};
use parley_gateway::upload::MediaStore;
use parley_gateway::Registry;
use parley_types::api::SocketQuery;

#[derive(Clone)]
struct ServerState {
    ctx: ConnectionCtx,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("PARLEY_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("PARLEY_DB_PATH").unwrap_or_else(|_| "parley.db".into());
    let media_dir = std::env::var("PARLEY_MEDIA_DIR").unwrap_or_else(|_| "media".into());
    let host = std::env::var("PARLEY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PARLEY_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init stores
    let db = Arc::new(parley_db::Database::open(&PathBuf::from(&db_path))?);
    let media = Arc::new(MediaStore::new(PathBuf::from(&media_dir)).await?);

    // Shared state
    let registry = Registry::new();
    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        registry: registry.clone(),
        jwt_secret: jwt_secret.clone(),
    });
    let server_state = ServerState {
        ctx: ConnectionCtx { db, registry, media },
        jwt_secret,
    };

    // Routes
    let protected_routes = Router::new()
        .route("/rooms", get(rooms::list_rooms))
        .route("/rooms/{room}/search", get(messages::search_room))
        .route("/rooms/{room}/delete-chat", post(messages::delete_chat))
        .route("/rooms/{room}/pin", post(rooms::pin_room))
        .route("/rooms/{room}/unpin", post(rooms::unpin_room))
        .route("/rooms/{room}/mute", post(rooms::mute_room))
        .route("/rooms/{room}/unmute", post(rooms::unmute_room))
        .route("/messages/{message_id}/delete", post(messages::delete_message))
        .route("/messages/{message_id}/recall", post(recall::recall_message))
        .route("/messages/{message_id}/mention-read", post(messages::mention_read))
        .route("/forward", post(forward::forward_messages))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/rooms/{room}/socket", get(ws_upgrade))
        .with_state(server_state);

    let app = Router::new()
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(
    State(state): State<ServerState>,
    Path(room): Path<String>,
    Query(query): Query<SocketQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    // Browsers cannot set headers on socket requests, so the token rides in
    // the query string and is checked before the upgrade completes.
    let Some(claims) = verify_token(&state.jwt_secret, &query.token) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.ctx, room, query.kind, claims.sub)
    })
}
