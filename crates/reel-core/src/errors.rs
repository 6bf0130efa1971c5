use std::time::Duration;

use crate::task::{GenerationMode, ReferenceKind, TaskStatus};

/// A task draft that cannot be submitted in its current shape.
/// Raised before any network call is made.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{mode} requires a non-empty prompt")]
    EmptyPrompt { mode: GenerationMode },
    #[error("{mode} requires {expected} input")]
    MissingReference {
        mode: GenerationMode,
        expected: ReferenceKind,
    },
    #[error("{mode} does not accept {found} input")]
    UnexpectedReference {
        mode: GenerationMode,
        found: ReferenceKind,
    },
}

/// Rejected task mutation. The task is left untouched.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
    #[error("completion requires an artifact url")]
    MissingArtifact,
    #[error("artifact url can only be set when an attempt completes")]
    UnexpectedArtifact,
    #[error("thumbnail requires a completed artifact")]
    ThumbnailWithoutArtifact,
}

/// Failure of a single generation attempt.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GenerationError {
    // Rejected locally, nothing was sent
    #[error("invalid task: {0}")]
    Validation(#[from] ValidationError),

    // Rejected by the server before streaming
    #[error("server returned {status}: {body}")]
    Http { status: u16, body: String },

    // Transport
    #[error("network error: {0}")]
    Transport(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
    #[error("no data received for {0:?}")]
    IdleTimeout(Duration),

    // Policy
    #[error("stream finished without producing an artifact")]
    NoArtifact,
}

impl GenerationError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Http { .. } => "http_status",
            Self::Transport(_) => "transport",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::IdleTimeout(_) => "idle_timeout",
            Self::NoArtifact => "no_artifact",
        }
    }

    /// Whether the error came from the connection rather than the server's answer.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::StreamInterrupted(_) | Self::IdleTimeout(_)
        )
    }

    /// Text shown to the user before any classifier rewriting.
    /// Server rejections surface their body verbatim.
    pub fn user_message(&self) -> String {
        match self {
            Self::Http { status, body } if body.trim().is_empty() => {
                format!("HTTP error {status}")
            }
            Self::Http { body, .. } => body.clone(),
            Self::StreamInterrupted(_) | Self::IdleTimeout(_) => {
                "Connection interrupted - video generation may still be in progress on server"
                    .to_string()
            }
            other => other.to_string(),
        }
    }
}
