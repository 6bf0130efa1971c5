use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

use reel_core::errors::GenerationError;
use reel_core::provider::{GenerationCallbacks, GenerationRequest, VideoGenerator};
use reel_core::stream::StreamEvent;
use reel_core::usage::{NoopRecorder, UsageRecorder};

use crate::classifier::ErrorClassifier;
use crate::codec::TERMINAL_LINE;
use crate::stream::{self, StreamOutcome};

/// Pre-programmed backend behavior for one `generate` call.
pub enum MockScript {
    /// Deliver these events, then end the body cleanly.
    Stream(Vec<StreamEvent>),
    /// Deliver these events, then fail the read with this detail.
    Disconnect(Vec<StreamEvent>, String),
    /// Answer with a non-success status before streaming.
    Reject { status: u16, body: String },
    /// Sleep, then play the inner script.
    Delay(Duration, Box<MockScript>),
    /// Block until the notify fires, then play the inner script.
    WaitFor(Arc<Notify>, Box<MockScript>),
}

impl MockScript {
    /// Progress ticks, an artifact, then the terminal marker.
    pub fn success(url: &str) -> Self {
        Self::Stream(vec![
            StreamEvent::Progress {
                percent: Some(30),
                message: "30% rendering".into(),
            },
            StreamEvent::Progress {
                percent: Some(90),
                message: "90% encoding".into(),
            },
            StreamEvent::ArtifactReady { url: url.into() },
            StreamEvent::Terminal,
        ])
    }

    pub fn delayed(delay: Duration, inner: MockScript) -> Self {
        Self::Delay(delay, Box::new(inner))
    }

    pub fn gated(gate: Arc<Notify>, inner: MockScript) -> Self {
        Self::WaitFor(gate, Box::new(inner))
    }
}

/// Render an event as the wire line the backend would send.
pub fn encode_event(event: &StreamEvent) -> String {
    let delta = match event {
        StreamEvent::Terminal => return format!("{TERMINAL_LINE}\n"),
        StreamEvent::Progress { message, .. } => {
            serde_json::json!({ "reasoning_content": message })
        }
        StreamEvent::ArtifactReady { url } => {
            serde_json::json!({ "content": format!("<video src='{url}' controls></video>") })
        }
    };
    format!("data: {}\n", serde_json::json!({ "choices": [{ "delta": delta }] }))
}

/// Generator that replays scripts in order through the real read loop.
pub struct MockGenerator {
    scripts: Mutex<VecDeque<MockScript>>,
    models: Vec<String>,
    requests: Mutex<Vec<GenerationRequest>>,
    call_count: AtomicUsize,
    usage: Arc<dyn UsageRecorder>,
    classifier: ErrorClassifier,
}

impl MockGenerator {
    pub fn new(scripts: Vec<MockScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            models: Vec::new(),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
            usage: Arc::new(NoopRecorder),
            classifier: ErrorClassifier::default(),
        }
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    pub fn with_usage(mut self, usage: Arc<dyn UsageRecorder>) -> Self {
        self.usage = usage;
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl VideoGenerator for MockGenerator {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        callbacks: &dyn GenerationCallbacks,
    ) -> Result<String, GenerationError> {
        if let Err(e) = request.validate() {
            let err = GenerationError::from(e);
            callbacks.on_error(&err.user_message());
            return Err(err);
        }

        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());
        self.usage.record_api_call();

        let script = self.scripts.lock().pop_front();
        let Some(mut script) = script else {
            let err = GenerationError::Transport(format!("mock: no script for call {idx}"));
            callbacks.on_error(&err.user_message());
            return Err(err);
        };

        let (events, failure) = loop {
            match script {
                MockScript::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    script = *inner;
                }
                MockScript::WaitFor(gate, inner) => {
                    gate.notified().await;
                    script = *inner;
                }
                MockScript::Stream(events) => break (events, None),
                MockScript::Disconnect(events, detail) => break (events, Some(detail)),
                MockScript::Reject { status, body } => {
                    let outcome = StreamOutcome {
                        failure: Some(GenerationError::Http { status, body }),
                        ..Default::default()
                    };
                    return outcome.settle(&self.classifier, callbacks);
                }
            }
        };

        let mut chunks: Vec<Result<Bytes, String>> = events
            .iter()
            .map(|e| Ok(Bytes::from(encode_event(e))))
            .collect();
        if let Some(detail) = failure {
            chunks.push(Err(detail));
        }

        let outcome = stream::read_events(
            futures::stream::iter(chunks),
            Duration::from_secs(300),
            callbacks,
        )
        .await;
        outcome.settle(&self.classifier, callbacks)
    }

    async fn list_models(&self) -> Vec<String> {
        self.models.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_line;
    use reel_core::ids::TaskId;
    use reel_core::task::{GenerationMode, TaskPayload};

    #[derive(Default)]
    struct Tally {
        progress: AtomicUsize,
        complete: Mutex<Option<String>>,
        error: Mutex<Option<String>>,
    }

    impl GenerationCallbacks for Tally {
        fn on_progress(&self, _percent: Option<u8>, _message: &str) {
            self.progress.fetch_add(1, Ordering::Relaxed);
        }
        fn on_complete(&self, artifact_url: &str) {
            *self.complete.lock() = Some(artifact_url.to_string());
        }
        fn on_error(&self, message: &str) {
            *self.error.lock() = Some(message.to_string());
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            task_id: TaskId::new(),
            mode: GenerationMode::TextToVideo,
            model: "sora-video-landscape-10s".into(),
            payload: TaskPayload::text("waves"),
        }
    }

    #[test]
    fn encoded_events_decode_back() {
        let events = [
            StreamEvent::Progress {
                percent: Some(40),
                message: "40% done".into(),
            },
            StreamEvent::ArtifactReady {
                url: "https://cdn/a.mp4".into(),
            },
            StreamEvent::Terminal,
        ];
        for event in events {
            assert_eq!(decode_line(&encode_event(&event)), Some(event));
        }
    }

    #[tokio::test]
    async fn success_script() {
        let mock = MockGenerator::new(vec![MockScript::success("https://cdn/ok.mp4")]);
        let tally = Tally::default();
        let url = mock.generate(&request(), &tally).await.unwrap();
        assert_eq!(url, "https://cdn/ok.mp4");
        assert_eq!(tally.progress.load(Ordering::Relaxed), 2);
        assert_eq!(tally.complete.lock().as_deref(), Some("https://cdn/ok.mp4"));
        assert!(tally.error.lock().is_none());
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn disconnect_after_artifact_completes() {
        let mock = MockGenerator::new(vec![MockScript::Disconnect(
            vec![StreamEvent::ArtifactReady {
                url: "https://cdn/late.mp4".into(),
            }],
            "connection reset".into(),
        )]);
        let tally = Tally::default();
        assert!(mock.generate(&request(), &tally).await.is_ok());
        assert!(tally.error.lock().is_none());
    }

    #[tokio::test]
    async fn reject_surfaces_body() {
        let mock = MockGenerator::new(vec![MockScript::Reject {
            status: 400,
            body: "prompt rejected".into(),
        }]);
        let tally = Tally::default();
        let result = mock.generate(&request(), &tally).await;
        assert!(matches!(result, Err(GenerationError::Http { status: 400, .. })));
        assert_eq!(tally.error.lock().as_deref(), Some("prompt rejected"));
    }

    #[tokio::test]
    async fn exhausted_scripts_fail() {
        let mock = MockGenerator::new(vec![]);
        let tally = Tally::default();
        assert!(mock.generate(&request(), &tally).await.is_err());
        assert!(tally.error.lock().is_some());
    }

    #[tokio::test]
    async fn delayed_script_waits() {
        tokio::time::pause();
        let mock = MockGenerator::new(vec![MockScript::delayed(
            Duration::from_secs(10),
            MockScript::success("https://cdn/slow.mp4"),
        )]);
        let tally = Tally::default();
        let start = tokio::time::Instant::now();
        mock.generate(&request(), &tally).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test]
    async fn invalid_request_never_consumes_script() {
        let mock = MockGenerator::new(vec![MockScript::success("u")]);
        let mut req = request();
        req.mode = GenerationMode::ImageToVideo;
        let tally = Tally::default();
        assert!(matches!(
            mock.generate(&req, &tally).await,
            Err(GenerationError::Validation(_))
        ));
        assert_eq!(mock.call_count(), 0);
    }
}
