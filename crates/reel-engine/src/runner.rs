//! Drives generation attempts and folds their callbacks into the ledger.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use reel_core::errors::GenerationError;
use reel_core::ids::TaskId;
use reel_core::provider::{GenerationCallbacks, VideoGenerator};
use reel_core::task::{TaskUpdate, Transition};

use crate::error::EngineError;
use crate::ledger::LedgerHandle;
use crate::thumbnail::{NoThumbnails, Thumbnailer};

const EVENT_CAPACITY: usize = 256;

/// Ledger changes made by a run, for anyone watching progress.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunEvent {
    Started {
        task_id: TaskId,
        attempt: u32,
    },
    Progress {
        task_id: TaskId,
        percent: Option<u8>,
        message: String,
    },
    Completed {
        task_id: TaskId,
        artifact_url: String,
    },
    Failed {
        task_id: TaskId,
        message: String,
    },
    ThumbnailReady {
        task_id: TaskId,
        path: String,
    },
}

/// How an attempt ended, as seen by the generator.
#[derive(Debug)]
pub enum RunOutcome {
    Completed { artifact_url: String },
    Failed(GenerationError),
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

pub struct GenerationRunner {
    generator: Arc<dyn VideoGenerator>,
    ledger: LedgerHandle,
    thumbnailer: Arc<dyn Thumbnailer>,
    events: broadcast::Sender<RunEvent>,
}

impl GenerationRunner {
    pub fn new(generator: Arc<dyn VideoGenerator>, ledger: LedgerHandle) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            generator,
            ledger,
            thumbnailer: Arc::new(NoThumbnails),
            events,
        }
    }

    pub fn with_thumbnailer(mut self, thumbnailer: Arc<dyn Thumbnailer>) -> Self {
        self.thumbnailer = thumbnailer;
        self
    }

    pub fn ledger(&self) -> &LedgerHandle {
        &self.ledger
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    /// Run one attempt on `id` to its end. Generation failures are an
    /// outcome, not an error; errors mean the attempt never started.
    #[instrument(skip(self), fields(task_id = %id, generator = self.generator.name()))]
    pub async fn run(&self, id: &TaskId) -> Result<RunOutcome, EngineError> {
        let started = self.ledger.lock().begin_attempt(id);
        let (request, attempt) = started?;
        emit(
            &self.events,
            RunEvent::Started {
                task_id: id.clone(),
                attempt,
            },
        );

        let callbacks = LedgerCallbacks {
            ledger: self.ledger.clone(),
            task_id: id.clone(),
            attempt,
            events: self.events.clone(),
        };

        match self.generator.generate(&request, &callbacks).await {
            Ok(artifact_url) => {
                info!(attempt, "generation completed");
                self.attach_thumbnail(id, attempt, &artifact_url).await;
                Ok(RunOutcome::Completed { artifact_url })
            }
            Err(e) => {
                warn!(attempt, error = %e, kind = e.error_kind(), "generation failed");
                Ok(RunOutcome::Failed(e))
            }
        }
    }

    /// Run several tasks concurrently; each keeps its own stream.
    pub async fn run_many(&self, ids: &[TaskId]) -> Vec<(TaskId, Result<RunOutcome, EngineError>)> {
        let runs = ids.iter().map(|id| async move { (id.clone(), self.run(id).await) });
        join_all(runs).await
    }

    /// Run on the runtime in the background.
    pub fn spawn(self: &Arc<Self>, id: TaskId) -> JoinHandle<Result<RunOutcome, EngineError>> {
        let runner = Arc::clone(self);
        tokio::spawn(async move { runner.run(&id).await })
    }

    async fn attach_thumbnail(&self, id: &TaskId, attempt: u32, artifact_url: &str) {
        let path = match self.thumbnailer.thumbnail(artifact_url, id).await {
            Ok(Some(path)) => path,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "thumbnail generation failed");
                return;
            }
        };

        let applied = self
            .ledger
            .lock()
            .update_attempt(id, attempt, &TaskUpdate::thumbnail(path.clone()));
        match applied {
            Ok(Some(_)) => emit(
                &self.events,
                RunEvent::ThumbnailReady {
                    task_id: id.clone(),
                    path,
                },
            ),
            Ok(None) => debug!("task gone or superseded, thumbnail dropped"),
            Err(e) => warn!(error = %e, "thumbnail rejected"),
        }
    }
}

/// Callbacks for one attempt. Holds the id and attempt number only.
struct LedgerCallbacks {
    ledger: LedgerHandle,
    task_id: TaskId,
    attempt: u32,
    events: broadcast::Sender<RunEvent>,
}

impl LedgerCallbacks {
    fn apply(&self, update: &TaskUpdate) -> Option<Transition> {
        let applied = self
            .ledger
            .lock()
            .update_attempt(&self.task_id, self.attempt, update);
        match applied {
            Ok(transition) => transition,
            Err(e) => {
                warn!(task_id = %self.task_id, error = %e, "generation update rejected");
                None
            }
        }
    }
}

impl GenerationCallbacks for LedgerCallbacks {
    fn on_progress(&self, percent: Option<u8>, message: &str) {
        if self.apply(&TaskUpdate::progress(percent, message)).is_some() {
            emit(
                &self.events,
                RunEvent::Progress {
                    task_id: self.task_id.clone(),
                    percent,
                    message: message.to_string(),
                },
            );
        }
    }

    fn on_complete(&self, artifact_url: &str) {
        let transition = self.apply(&TaskUpdate::completed(artifact_url));
        // The artifact exists whether or not the task is still listed.
        // The ledger counts it itself only when the transition lands.
        if !transition.is_some_and(|t| t.completed_now()) {
            debug!(task_id = %self.task_id, attempt = self.attempt, "counting artifact for detached attempt");
            self.ledger.lock().record_artifact();
        }
        if transition.is_some() {
            emit(
                &self.events,
                RunEvent::Completed {
                    task_id: self.task_id.clone(),
                    artifact_url: artifact_url.to_string(),
                },
            );
        }
    }

    fn on_error(&self, message: &str) {
        if self.apply(&TaskUpdate::failed(message)).is_some() {
            emit(
                &self.events,
                RunEvent::Failed {
                    task_id: self.task_id.clone(),
                    message: message.to_string(),
                },
            );
        }
    }
}

fn emit(events: &broadcast::Sender<RunEvent>, event: RunEvent) {
    if events.send(event).is_err() {
        debug!("no run event receivers");
    }
}
