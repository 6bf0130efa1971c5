use async_trait::async_trait;

use crate::errors::{GenerationError, ValidationError};
use crate::ids::TaskId;
use crate::task::{GenerationMode, GenerationTask, TaskPayload};

/// What a generator needs to run one attempt. Detached from the task record
/// so the in-flight stream never holds a reference into the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationRequest {
    pub task_id: TaskId,
    pub mode: GenerationMode,
    pub model: String,
    pub payload: TaskPayload,
}

impl GenerationRequest {
    pub fn from_task(task: &GenerationTask) -> Self {
        Self {
            task_id: task.id.clone(),
            mode: task.mode,
            model: task.model.clone(),
            payload: task.payload.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.payload.validate_for(self.mode)
    }
}

/// Observer of one generation attempt.
///
/// `on_progress` may fire any number of times. Exactly one of `on_complete`
/// and `on_error` fires per attempt, never both.
pub trait GenerationCallbacks: Send + Sync {
    fn on_progress(&self, percent: Option<u8>, message: &str);
    fn on_complete(&self, artifact_url: &str);
    fn on_error(&self, message: &str);
}

/// Backend capable of turning a request into a media artifact.
#[async_trait]
pub trait VideoGenerator: Send + Sync {
    fn name(&self) -> &str;

    /// Run one attempt, reporting through `callbacks`. The returned value
    /// mirrors the terminal callback: the artifact url or the raw error.
    async fn generate(
        &self,
        request: &GenerationRequest,
        callbacks: &dyn GenerationCallbacks,
    ) -> Result<String, GenerationError>;

    /// Available model identifiers. Never fails; degrades to an empty list.
    async fn list_models(&self) -> Vec<String>;
}
