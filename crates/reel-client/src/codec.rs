//! Line decoder for the generation stream.
//!
//! Each meaningful line looks like `data: <json>` where the JSON carries
//! `choices[0].delta`. The delta holds either `reasoning_content` (status
//! text, sometimes with a percentage) or `content` (HTML that embeds the
//! artifact as `src='<url>'`). The stream ends with `data: [DONE]`.
//!
//! Decoding is stateless and fail-soft: anything unrecognized yields `None`.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use reel_core::stream::StreamEvent;

pub const DATA_PREFIX: &str = "data: ";
pub const TERMINAL_LINE: &str = "data: [DONE]";

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)%").expect("valid regex"));
static SOURCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"src='([^']+)'").expect("valid regex"));

/// Decode one line into at most one event.
pub fn decode_line(line: &str) -> Option<StreamEvent> {
    let line = line.trim();
    if line == TERMINAL_LINE {
        return Some(StreamEvent::Terminal);
    }
    let payload = line.strip_prefix(DATA_PREFIX)?;

    let value: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "skipping malformed stream payload");
            return None;
        }
    };
    let delta = value.get("choices")?.get(0)?.get("delta")?;

    if let Some(reasoning) = non_empty_str(delta, "reasoning_content") {
        return Some(StreamEvent::Progress {
            percent: extract_percent(reasoning),
            message: reasoning.trim().to_string(),
        });
    }

    if let Some(content) = non_empty_str(delta, "content") {
        return extract_source(content).map(|url| StreamEvent::ArtifactReady { url });
    }

    None
}

fn non_empty_str<'a>(delta: &'a Value, key: &str) -> Option<&'a str> {
    delta.get(key)?.as_str().filter(|s| !s.is_empty())
}

/// First `N%` in the text, clamped to 100. Numbers too large for a `u8`
/// count as 100.
pub fn extract_percent(text: &str) -> Option<u8> {
    let digits = PERCENT_RE.captures(text)?.get(1)?.as_str();
    let value = digits.parse::<u64>().unwrap_or(u64::MAX);
    Some(value.min(100) as u8)
}

pub fn extract_source(content: &str) -> Option<String> {
    SOURCE_RE
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}
