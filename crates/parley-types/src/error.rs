use thiserror::Error;

/// Engine error taxonomy. Validation/Permission/State failures are reported
/// to the caller with a stable reason code and never retried automatically;
/// Store failures abort the operation that hit them.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("not permitted: {0}")]
    Permission(String),

    #[error("{0}")]
    State(StateKind),

    #[error("store failure: {0}")]
    Store(#[from] anyhow::Error),
}

/// Lifecycle violations: the request was well-formed and permitted, but the
/// message or room is not in a state that allows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StateKind {
    #[error("message not found")]
    NotFound,
    #[error("message already recalled")]
    AlreadyRecalled,
    #[error("recall window expired")]
    WindowExpired,
    #[error("group disbanded")]
    GroupDisbanded,
    #[error("group is still active")]
    GroupActive,
    #[error("cannot forward a recalled message")]
    RecalledSource,
}

impl ChatError {
    /// Stable reason code surfaced in failure envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Permission(_) => "permission",
            Self::State(StateKind::NotFound) => "not-found",
            Self::State(StateKind::AlreadyRecalled) => "already-recalled",
            Self::State(StateKind::WindowExpired) => "recall-window-expired",
            Self::State(StateKind::GroupDisbanded) => "group-disbanded",
            Self::State(StateKind::GroupActive) => "group-active",
            Self::State(StateKind::RecalledSource) => "recalled-source",
            Self::Store(_) => "store",
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_are_stable() {
        assert_eq!(ChatError::State(StateKind::WindowExpired).code(), "recall-window-expired");
        assert_eq!(ChatError::Validation("x".into()).code(), "validation");
        assert_eq!(
            ChatError::Store(anyhow::anyhow!("disk full")).code(),
            "store"
        );
    }
}
