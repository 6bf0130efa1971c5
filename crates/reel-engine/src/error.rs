use reel_core::errors::{TransitionError, ValidationError};
use reel_core::ids::TaskId;
use reel_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid task: {0}")]
    Validation(#[from] ValidationError),

    #[error("rejected update: {0}")]
    Transition(#[from] TransitionError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("task {0} is already generating")]
    AlreadyRunning(TaskId),
}
