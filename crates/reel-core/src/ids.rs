use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const TASK_PREFIX: &str = "task";
const SHORT_LEN: usize = 8;

/// Opaque task identifier. Time-ordered so that ids sort by creation.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new() -> Self {
        Self(format!("{TASK_PREFIX}_{}", Uuid::now_v7()))
    }

    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last eight characters of the id body, for listings and file names.
    ///
    /// The head of a v7 uuid is its timestamp and repeats for ids made
    /// close together. The tail is random.
    pub fn short(&self) -> &str {
        let body = self
            .0
            .strip_prefix(TASK_PREFIX)
            .and_then(|rest| rest.strip_prefix('_'))
            .unwrap_or(&self.0);
        match body.char_indices().rev().nth(SHORT_LEN - 1) {
            Some((start, _)) => &body[start..],
            None => body,
        }
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TaskId {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_owned()))
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
