//! The task ledger: newest-first tasks plus the usage counters.
//!
//! All mutation is keyed by task id. In-flight generations never hold a
//! reference into the ledger, only the id and their attempt number, so a
//! deleted task simply stops receiving updates.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

use reel_core::ids::TaskId;
use reel_core::provider::GenerationRequest;
use reel_core::task::{GenerationTask, TaskDraft, TaskStatus, TaskUpdate, Transition};
use reel_core::usage::{UsageCounters, UsageKind, UsageRecorder};
use reel_store::{LedgerSnapshot, LedgerStore};

use crate::error::EngineError;
use crate::summary::LedgerSummary;

pub struct Ledger {
    tasks: Vec<GenerationTask>,
    usage: UsageCounters,
    next_sequence: u64,
    store: Option<Arc<dyn LedgerStore>>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl Ledger {
    /// A ledger that persists nothing.
    pub fn in_memory() -> Self {
        Self::from_snapshot(LedgerSnapshot::default(), None)
    }

    /// Restore from `store`. Unreadable state yields an empty ledger that
    /// still writes through to the store.
    pub fn load(store: Arc<dyn LedgerStore>) -> Self {
        let snapshot = match store.load() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "failed to load ledger, starting empty");
                LedgerSnapshot::default()
            }
        };
        info!(
            tasks = snapshot.tasks.len(),
            next_sequence = snapshot.next_sequence,
            "ledger loaded"
        );
        Self::from_snapshot(snapshot, Some(store))
    }

    fn from_snapshot(snapshot: LedgerSnapshot, store: Option<Arc<dyn LedgerStore>>) -> Self {
        let mut tasks = snapshot.tasks;
        tasks.sort_by(|a, b| b.sequence_number.cmp(&a.sequence_number));
        let floor = tasks.first().map_or(1, |t| t.sequence_number + 1);
        Self {
            tasks,
            usage: snapshot.usage,
            next_sequence: snapshot.next_sequence.max(floor),
            store,
        }
    }

    /// Validate `draft` and put the resulting pending task at the front.
    #[instrument(skip(self, draft), fields(mode = %draft.mode))]
    pub fn submit(&mut self, draft: TaskDraft) -> Result<GenerationTask, EngineError> {
        let task = GenerationTask::from_draft(draft, self.next_sequence, Utc::now())?;
        self.next_sequence += 1;
        self.persist(|store| store.set_next_sequence(self.next_sequence));
        self.persist(|store| store.save_task(&task));
        info!(task_id = %task.id, sequence = task.sequence_number, "task submitted");
        self.tasks.insert(0, task.clone());
        Ok(task)
    }

    pub fn get(&self, id: &TaskId) -> Option<&GenerationTask> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    /// Newest first.
    pub fn tasks(&self) -> &[GenerationTask] {
        &self.tasks
    }

    pub fn usage(&self) -> &UsageCounters {
        &self.usage
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Apply a partial update. Unknown ids are a no-op and return `None`.
    pub fn update_task(
        &mut self,
        id: &TaskId,
        update: &TaskUpdate,
    ) -> Result<Option<Transition>, EngineError> {
        self.update_where(id, update, |_| true)
    }

    /// Like [`Ledger::update_task`], but only while the task is still on
    /// `attempt`. Updates from a superseded attempt are dropped.
    pub fn update_attempt(
        &mut self,
        id: &TaskId,
        attempt: u32,
        update: &TaskUpdate,
    ) -> Result<Option<Transition>, EngineError> {
        self.update_where(id, update, |task| {
            let current = task.attempt == attempt;
            if !current {
                debug!(task_id = %id, attempt, current = task.attempt, "dropping stale update");
            }
            current
        })
    }

    fn update_where(
        &mut self,
        id: &TaskId,
        update: &TaskUpdate,
        accept: impl FnOnce(&GenerationTask) -> bool,
    ) -> Result<Option<Transition>, EngineError> {
        let Some(task) = self.tasks.iter_mut().find(|t| &t.id == id) else {
            debug!(task_id = %id, "update for unknown task ignored");
            return Ok(None);
        };
        if !accept(&*task) {
            return Ok(None);
        }

        let transition = task.apply(update)?;
        let snapshot = task.clone();
        self.persist(|store| store.save_task(&snapshot));

        if transition.completed_now() {
            self.record_artifact_at(Utc::now());
        }
        Ok(Some(transition))
    }

    /// Open a new attempt on `id` and return what the generator needs.
    #[instrument(skip(self), fields(task_id = %id))]
    pub fn begin_attempt(&mut self, id: &TaskId) -> Result<(GenerationRequest, u32), EngineError> {
        let task = self
            .tasks
            .iter()
            .find(|t| &t.id == id)
            .ok_or_else(|| EngineError::TaskNotFound(id.clone()))?;
        if task.status == TaskStatus::Processing {
            return Err(EngineError::AlreadyRunning(id.clone()));
        }

        self.update_task(id, &TaskUpdate::started())?;
        let task = self
            .get(id)
            .ok_or_else(|| EngineError::TaskNotFound(id.clone()))?;
        info!(attempt = task.attempt, "attempt started");
        Ok((GenerationRequest::from_task(task), task.attempt))
    }

    /// Remove a task. Returns whether it existed. Counters are untouched.
    #[instrument(skip(self), fields(task_id = %id))]
    pub fn delete(&mut self, id: &TaskId) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| &t.id != id);
        let removed = self.tasks.len() != before;
        if removed {
            self.persist(|store| store.delete_task(id).map(|_| ()));
            info!("task deleted");
        }
        removed
    }

    pub fn record_api_call(&mut self) {
        self.record_api_call_at(Utc::now());
    }

    pub fn record_artifact(&mut self) {
        self.record_artifact_at(Utc::now());
    }

    pub fn record_api_call_at(&mut self, now: DateTime<Utc>) {
        self.record_usage(UsageKind::ApiCall, now);
    }

    pub fn record_artifact_at(&mut self, now: DateTime<Utc>) {
        self.record_usage(UsageKind::Artifact, now);
    }

    fn record_usage(&mut self, kind: UsageKind, now: DateTime<Utc>) {
        self.usage.record(kind, now);
        self.persist(|store| store.record_usage(kind, now));
    }

    pub fn summary(&self, now: DateTime<Utc>) -> LedgerSummary {
        LedgerSummary::compute(&self.tasks, &self.usage, now)
    }

    fn persist(&self, write: impl FnOnce(&dyn LedgerStore) -> Result<(), reel_store::StoreError>) {
        if let Some(store) = &self.store {
            if let Err(e) = write(store.as_ref()) {
                warn!(error = %e, "ledger write failed, keeping in-memory state");
            }
        }
    }
}

/// Shared handle to one ledger. The lock is never held across an await.
#[derive(Clone, Default)]
pub struct LedgerHandle(Arc<Mutex<Ledger>>);

impl LedgerHandle {
    pub fn new(ledger: Ledger) -> Self {
        Self(Arc::new(Mutex::new(ledger)))
    }

    pub fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.0.lock()
    }
}

impl UsageRecorder for LedgerHandle {
    fn record_api_call(&self) {
        self.lock().record_api_call();
    }

    fn record_artifact(&self) {
        self.lock().record_artifact();
    }
}
