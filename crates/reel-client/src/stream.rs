//! Read loop over the response body.
//!
//! Splits the incoming bytes into lines, feeds them to the codec, forwards
//! progress, and settles the attempt into exactly one of `on_complete` or
//! `on_error` once the body has been released.

use std::fmt::Display;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tracing::{debug, info, warn};

use reel_core::errors::GenerationError;
use reel_core::provider::GenerationCallbacks;
use reel_core::stream::StreamEvent;

use crate::classifier::ErrorClassifier;
use crate::codec;

/// Accumulates raw bytes and yields complete lines. The trailing fragment
/// stays buffered until its newline arrives, so multi-byte characters split
/// across reads decode intact.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let Some(last_newline) = self.pending.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);
        complete
            .split(|b| *b == b'\n')
            .map(|line| String::from_utf8_lossy(line).trim().to_string())
            .filter(|line| !line.is_empty())
            .collect()
    }

    /// Whatever is left without a trailing newline.
    pub fn take_remainder(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let text = String::from_utf8_lossy(&rest).trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

/// What one read loop observed.
#[derive(Debug, Default)]
pub struct StreamOutcome {
    pub artifact_url: Option<String>,
    pub saw_terminal: bool,
    pub failure: Option<GenerationError>,
}

impl StreamOutcome {
    fn observe(&mut self, line: &str, callbacks: &dyn GenerationCallbacks) {
        if self.saw_terminal {
            return;
        }
        match codec::decode_line(line) {
            Some(StreamEvent::Progress { percent, message }) => {
                callbacks.on_progress(percent, &message);
            }
            Some(StreamEvent::ArtifactReady { url }) => {
                if self.artifact_url.is_none() {
                    info!(%url, "artifact url received");
                    self.artifact_url = Some(url);
                } else {
                    debug!(%url, "ignoring additional artifact url");
                }
            }
            Some(StreamEvent::Terminal) => self.saw_terminal = true,
            None => {}
        }
    }

    /// Reconcile the loop's observations into a single terminal callback.
    ///
    /// A captured artifact wins over any transport failure that followed it.
    pub fn settle(
        self,
        classifier: &ErrorClassifier,
        callbacks: &dyn GenerationCallbacks,
    ) -> Result<String, GenerationError> {
        match (self.artifact_url, self.failure) {
            (Some(url), failure) => {
                if let Some(err) = failure {
                    warn!(error = %err, "stream failed after artifact was captured, completing");
                }
                callbacks.on_complete(&url);
                Ok(url)
            }
            (None, failure) => {
                let err = failure.unwrap_or(GenerationError::NoArtifact);
                let message = classifier.classify(&err);
                warn!(kind = err.error_kind(), error = %err, "generation failed");
                callbacks.on_error(&message);
                Err(err)
            }
        }
    }
}

/// Drain `body` until the terminal marker, end of stream, a read error, or
/// `idle_timeout` of silence. The body is consumed and dropped before this
/// returns.
pub async fn read_events<S, E>(
    body: S,
    idle_timeout: Duration,
    callbacks: &dyn GenerationCallbacks,
) -> StreamOutcome
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    let mut body = body;
    let mut lines = LineBuffer::default();
    let mut outcome = StreamOutcome::default();

    loop {
        let next = match tokio::time::timeout(idle_timeout, body.next()).await {
            Ok(next) => next,
            Err(_) => {
                outcome.failure = Some(GenerationError::IdleTimeout(idle_timeout));
                break;
            }
        };
        match next {
            Some(Ok(chunk)) => {
                for line in lines.push(&chunk) {
                    outcome.observe(&line, callbacks);
                }
                if outcome.saw_terminal {
                    break;
                }
            }
            Some(Err(e)) => {
                outcome.failure = Some(GenerationError::StreamInterrupted(e.to_string()));
                break;
            }
            None => break,
        }
    }
    drop(body);

    if let Some(rest) = lines.take_remainder() {
        outcome.observe(&rest, callbacks);
    }
    outcome
}
