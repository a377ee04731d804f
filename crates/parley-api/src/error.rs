use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use parley_types::api::Envelope;
use parley_types::error::{ChatError, StateKind};

/// Adapter turning the engine taxonomy into HTTP failure envelopes with
/// the error's stable reason code.
pub struct ApiError(pub ChatError);

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        Self(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(ChatError::Store(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::Permission(_) => StatusCode::FORBIDDEN,
            ChatError::State(StateKind::NotFound) => StatusCode::NOT_FOUND,
            ChatError::State(_) => StatusCode::CONFLICT,
            ChatError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Envelope::<()>::fail(self.0.code(), self.0.to_string());
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Run a blocking store closure off the async runtime.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ChatError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError(ChatError::Store(anyhow::anyhow!("blocking task failed: {e}"))))?
        .map_err(ApiError)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_status_codes() {
        let cases = [
            (ChatError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (ChatError::Permission("x".into()), StatusCode::FORBIDDEN),
            (ChatError::State(StateKind::NotFound), StatusCode::NOT_FOUND),
            (ChatError::State(StateKind::WindowExpired), StatusCode::CONFLICT),
            (ChatError::Store(anyhow::anyhow!("x")), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).into_response().status(), expected);
        }
    }
}
