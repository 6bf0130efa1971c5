use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use reel_client::{MockGenerator, MockScript};
use reel_core::ids::TaskId;
use reel_core::stream::StreamEvent;
use reel_core::task::{GenerationMode, Reference, TaskDraft, TaskStatus};
use reel_core::usage::{UsageKind, UsageRecorder};
use reel_engine::{
    EngineError, GenerationRunner, Ledger, LedgerHandle, RunEvent, RunOutcome, ThumbnailError,
    Thumbnailer,
};
use reel_store::{Database, LedgerStore, SqliteLedgerStore};

fn setup(scripts: Vec<MockScript>) -> (Arc<GenerationRunner>, Arc<MockGenerator>, LedgerHandle) {
    let ledger = LedgerHandle::new(Ledger::in_memory());
    let generator = Arc::new(
        MockGenerator::new(scripts).with_usage(Arc::new(ledger.clone()) as Arc<dyn UsageRecorder>),
    );
    let runner = Arc::new(GenerationRunner::new(generator.clone(), ledger.clone()));
    (runner, generator, ledger)
}

fn submit(ledger: &LedgerHandle, prompt: &str) -> TaskId {
    ledger
        .lock()
        .submit(TaskDraft::new(GenerationMode::TextToVideo, prompt))
        .unwrap()
        .id
}

async fn wait_for_status(ledger: &LedgerHandle, id: &TaskId, status: TaskStatus) {
    for _ in 0..100 {
        if ledger.lock().get(id).map(|t| t.status) == Some(status) {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("task never reached {status}");
}

#[tokio::test]
async fn submit_generate_complete() {
    let (runner, generator, ledger) = setup(vec![MockScript::success("https://cdn.example/a.mp4")]);
    let mut events = runner.subscribe();
    let id = submit(&ledger, "a lighthouse at dusk");

    let outcome = runner.run(&id).await.unwrap();
    assert!(outcome.is_completed());

    {
        let ledger = ledger.lock();
        let task = ledger.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 100);
        assert_eq!(task.progress_message.as_deref(), Some("Generation completed!"));
        assert_eq!(task.current_artifact(), Some("https://cdn.example/a.mp4"));
        assert_eq!(ledger.usage().total(UsageKind::ApiCall), 1);
        assert_eq!(ledger.usage().total(UsageKind::Artifact), 1);
    }
    assert_eq!(generator.call_count(), 1);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(
        seen.first(),
        Some(&RunEvent::Started {
            task_id: id.clone(),
            attempt: 1
        })
    );
    assert!(seen.contains(&RunEvent::Progress {
        task_id: id.clone(),
        percent: Some(30),
        message: "30% rendering".into(),
    }));
    assert_eq!(
        seen.last(),
        Some(&RunEvent::Completed {
            task_id: id,
            artifact_url: "https://cdn.example/a.mp4".into()
        })
    );
}

#[tokio::test]
async fn disconnect_after_artifact_completes() {
    let (runner, _, ledger) = setup(vec![MockScript::Disconnect(
        vec![StreamEvent::ArtifactReady {
            url: "https://cdn.example/b.mp4".into(),
        }],
        "connection reset by peer".into(),
    )]);
    let id = submit(&ledger, "tide pools");

    let outcome = runner.run(&id).await.unwrap();
    assert!(outcome.is_completed());
    let ledger = ledger.lock();
    let task = ledger.get(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.artifact_url.as_deref(), Some("https://cdn.example/b.mp4"));
}

#[tokio::test]
async fn disconnect_before_artifact_fails() {
    let (runner, _, ledger) = setup(vec![MockScript::Disconnect(
        vec![StreamEvent::Progress {
            percent: Some(10),
            message: "10%".into(),
        }],
        "connection reset by peer".into(),
    )]);
    let id = submit(&ledger, "tide pools");

    let outcome = runner.run(&id).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Failed(ref e) if e.is_transport()));
    let ledger = ledger.lock();
    let task = ledger.get(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.artifact_url.is_none());
    assert_eq!(
        task.progress_message.as_deref(),
        Some("Error: Connection interrupted - video generation may still be in progress on server")
    );
    assert_eq!(ledger.usage().total(UsageKind::Artifact), 0);
    assert_eq!(ledger.usage().total(UsageKind::ApiCall), 1);
}

#[tokio::test]
async fn restriction_signature_is_rewritten() {
    let (runner, _, ledger) = setup(vec![MockScript::Disconnect(
        vec![],
        "error decoding response body".into(),
    )]);
    let id = submit(&ledger, "famous cartoon mouse");

    runner.run(&id).await.unwrap();
    let ledger = ledger.lock();
    let message = ledger.get(&id).unwrap().progress_message.clone().unwrap();
    assert!(message.contains("content restrictions"), "{message}");
}

#[tokio::test]
async fn server_rejection_fails_with_body() {
    let (runner, _, ledger) = setup(vec![MockScript::Reject {
        status: 429,
        body: "rate limited".into(),
    }]);
    let id = submit(&ledger, "x");

    runner.run(&id).await.unwrap();
    let ledger = ledger.lock();
    assert_eq!(
        ledger.get(&id).unwrap().progress_message.as_deref(),
        Some("Error: rate limited")
    );
}

#[tokio::test]
async fn delete_mid_stream_still_counts_artifact() {
    let gate = Arc::new(Notify::new());
    let (runner, generator, ledger) = setup(vec![MockScript::gated(
        gate.clone(),
        MockScript::success("https://cdn.example/late.mp4"),
    )]);
    let id = submit(&ledger, "slow one");

    let handle = runner.spawn(id.clone());
    wait_for_status(&ledger, &id, TaskStatus::Processing).await;
    assert!(ledger.lock().delete(&id));

    gate.notify_one();
    let outcome = handle.await.unwrap().unwrap();
    assert!(outcome.is_completed(), "the generator itself still finished");

    let ledger = ledger.lock();
    assert!(ledger.get(&id).is_none());
    assert!(ledger.tasks().is_empty());
    assert_eq!(ledger.usage().total(UsageKind::Artifact), 1);
    assert_eq!(ledger.usage().total(UsageKind::ApiCall), 1);
    assert_eq!(generator.call_count(), 1);
}

#[tokio::test]
async fn superseded_attempt_cannot_overwrite() {
    let gate = Arc::new(Notify::new());
    let (runner, _, ledger) = setup(vec![
        MockScript::gated(gate.clone(), MockScript::success("https://cdn.example/old.mp4")),
        MockScript::success("https://cdn.example/new.mp4"),
    ]);
    let id = submit(&ledger, "two tries");

    let first = runner.spawn(id.clone());
    wait_for_status(&ledger, &id, TaskStatus::Processing).await;
    ledger
        .lock()
        .update_task(&id, &reel_core::task::TaskUpdate::failed("abandoned"))
        .unwrap();

    let second = runner.run(&id).await.unwrap();
    assert!(second.is_completed());

    gate.notify_one();
    first.await.unwrap().unwrap();

    let ledger = ledger.lock();
    let task = ledger.get(&id).unwrap();
    assert_eq!(task.attempt, 2);
    assert_eq!(task.current_artifact(), Some("https://cdn.example/new.mp4"));
    // Both attempts produced a video, so both count.
    assert_eq!(ledger.usage().total(UsageKind::Artifact), 2);
}

#[tokio::test]
async fn completed_artifact_counts_once() {
    let (runner, _, ledger) = setup(vec![
        MockScript::success("https://cdn.example/a.mp4"),
        MockScript::success("https://cdn.example/b.mp4"),
    ]);
    let id = submit(&ledger, "counted");

    runner.run(&id).await.unwrap();
    assert_eq!(ledger.lock().usage().total(UsageKind::Artifact), 1);
    runner.run(&id).await.unwrap();
    assert_eq!(ledger.lock().usage().total(UsageKind::Artifact), 2);
}

#[tokio::test]
async fn regenerate_after_failure() {
    let (runner, _, ledger) = setup(vec![
        MockScript::Stream(vec![StreamEvent::Terminal]),
        MockScript::success("https://cdn.example/second.mp4"),
    ]);
    let id = submit(&ledger, "retry me");

    let first = runner.run(&id).await.unwrap();
    assert!(matches!(
        first,
        RunOutcome::Failed(reel_core::errors::GenerationError::NoArtifact)
    ));
    assert_eq!(ledger.lock().get(&id).unwrap().status, TaskStatus::Failed);

    assert!(runner.run(&id).await.unwrap().is_completed());
    let ledger = ledger.lock();
    let task = ledger.get(&id).unwrap();
    assert_eq!(task.attempt, 2);
    assert_eq!(task.sequence_number, 1);
    assert_eq!(ledger.tasks().len(), 1);
}

#[tokio::test]
async fn processing_task_is_not_restarted() {
    let gate = Arc::new(Notify::new());
    let (runner, generator, ledger) = setup(vec![MockScript::gated(
        gate.clone(),
        MockScript::success("https://cdn.example/g.mp4"),
    )]);
    let id = submit(&ledger, "busy");

    let handle = runner.spawn(id.clone());
    wait_for_status(&ledger, &id, TaskStatus::Processing).await;
    assert!(matches!(
        runner.run(&id).await,
        Err(EngineError::AlreadyRunning(_))
    ));

    gate.notify_one();
    handle.await.unwrap().unwrap();
    assert_eq!(generator.call_count(), 1);
}

#[tokio::test]
async fn validation_blocks_before_any_call() {
    let (runner, generator, ledger) = setup(vec![]);
    let rejected = ledger
        .lock()
        .submit(TaskDraft::new(GenerationMode::ImageToVideo, "animate the photo"));
    assert!(matches!(rejected, Err(EngineError::Validation(_))));
    assert!(ledger.lock().tasks().is_empty());

    assert!(matches!(
        runner.run(&TaskId::new()).await,
        Err(EngineError::TaskNotFound(_))
    ));
    assert_eq!(generator.call_count(), 0);
    assert_eq!(ledger.lock().usage().total(UsageKind::ApiCall), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_runs_stay_separate() {
    let (runner, generator, ledger) = setup(vec![
        MockScript::delayed(
            Duration::from_secs(5),
            MockScript::success("https://cdn.example/slow.mp4"),
        ),
        MockScript::delayed(
            Duration::from_secs(1),
            MockScript::success("https://cdn.example/fast.mp4"),
        ),
    ]);
    let slow = submit(&ledger, "slow");
    let fast = ledger
        .lock()
        .submit(
            TaskDraft::new(GenerationMode::Remix, "make it night")
                .reference(Reference::RemixSource("https://share.example/s_9".into())),
        )
        .unwrap()
        .id;

    let results = runner.run_many(&[slow.clone(), fast.clone()]).await;
    assert!(results.iter().all(|(_, r)| matches!(r, Ok(o) if o.is_completed())));

    let ledger = ledger.lock();
    assert_eq!(
        ledger.get(&slow).unwrap().current_artifact(),
        Some("https://cdn.example/slow.mp4")
    );
    assert_eq!(
        ledger.get(&fast).unwrap().current_artifact(),
        Some("https://cdn.example/fast.mp4")
    );
    assert_eq!(ledger.usage().total(UsageKind::Artifact), 2);
    assert_eq!(generator.requests()[1].payload.remix_source(), Some("https://share.example/s_9"));
}

struct FixedThumbs(Option<&'static str>);

#[async_trait]
impl Thumbnailer for FixedThumbs {
    async fn thumbnail(&self, _: &str, _: &TaskId) -> Result<Option<String>, ThumbnailError> {
        match self.0 {
            Some(path) => Ok(Some(path.to_string())),
            None => Err(ThumbnailError::Timeout(Duration::from_secs(10))),
        }
    }
}

#[tokio::test]
async fn thumbnail_attached_after_completion() {
    let ledger = LedgerHandle::new(Ledger::in_memory());
    let generator = Arc::new(MockGenerator::new(vec![MockScript::success(
        "https://cdn.example/t.mp4",
    )]));
    let runner = GenerationRunner::new(generator, ledger.clone())
        .with_thumbnailer(Arc::new(FixedThumbs(Some("/thumbs/t.jpg"))));
    let id = submit(&ledger, "thumb");

    runner.run(&id).await.unwrap();
    assert_eq!(
        ledger.lock().get(&id).unwrap().thumbnail.as_deref(),
        Some("/thumbs/t.jpg")
    );
}

#[tokio::test]
async fn thumbnail_failure_keeps_completion() {
    let ledger = LedgerHandle::new(Ledger::in_memory());
    let generator = Arc::new(MockGenerator::new(vec![MockScript::success(
        "https://cdn.example/t.mp4",
    )]));
    let runner = GenerationRunner::new(generator, ledger.clone())
        .with_thumbnailer(Arc::new(FixedThumbs(None)));
    let id = submit(&ledger, "thumb");

    assert!(runner.run(&id).await.unwrap().is_completed());
    let ledger = ledger.lock();
    let task = ledger.get(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.thumbnail.is_none());
}

#[tokio::test]
async fn persisted_pipeline_reloads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reel.db");
    let open = || -> Arc<dyn LedgerStore> {
        Arc::new(SqliteLedgerStore::new(Database::open(&path).unwrap()))
    };

    let id = {
        let ledger = LedgerHandle::new(Ledger::load(open()));
        let generator = Arc::new(
            MockGenerator::new(vec![MockScript::success("https://cdn.example/p.mp4")])
                .with_usage(Arc::new(ledger.clone())),
        );
        let runner = GenerationRunner::new(generator, ledger.clone());
        let id = submit(&ledger, "persist me");
        runner.run(&id).await.unwrap();
        id
    };

    let ledger = Ledger::load(open());
    let task = ledger.get(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.current_artifact(), Some("https://cdn.example/p.mp4"));
    assert_eq!(ledger.usage().total(UsageKind::ApiCall), 1);
    assert_eq!(ledger.usage().total(UsageKind::Artifact), 1);
}
