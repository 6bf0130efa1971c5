//! Generation tasks and their lifecycle.
//!
//! A task moves `pending -> processing -> {completed, failed}`. Terminal tasks
//! may be regenerated, which re-enters `processing` on the same record under a
//! new attempt number. All mutation goes through [`GenerationTask::apply`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{TransitionError, ValidationError};
use crate::ids::TaskId;

pub const STARTING_MESSAGE: &str = "Starting generation...";
pub const COMPLETED_MESSAGE: &str = "Generation completed!";
pub const CHARACTER_PROMPT_PLACEHOLDER: &str = "Create character from video";

// ─────────────────────────────────────────────────────────────────────────────
// Modes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GenerationMode {
    TextToVideo,
    ImageToVideo,
    Remix,
    CreateCharacter,
    CharacterToVideo,
}

impl GenerationMode {
    pub const ALL: [GenerationMode; 5] = [
        Self::TextToVideo,
        Self::ImageToVideo,
        Self::Remix,
        Self::CreateCharacter,
        Self::CharacterToVideo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextToVideo => "text-to-video",
            Self::ImageToVideo => "image-to-video",
            Self::Remix => "remix",
            Self::CreateCharacter => "create-character",
            Self::CharacterToVideo => "character-to-video",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::TextToVideo => "Text to Video",
            Self::ImageToVideo => "Image to Video",
            Self::Remix => "Remix",
            Self::CreateCharacter => "Create Character",
            Self::CharacterToVideo => "Character to Video",
        }
    }

    pub fn requires_prompt(&self) -> bool {
        matches!(self, Self::TextToVideo | Self::CharacterToVideo)
    }

    /// The reference input this mode needs, if any.
    pub fn required_reference(&self) -> Option<ReferenceKind> {
        match self {
            Self::TextToVideo => None,
            Self::ImageToVideo => Some(ReferenceKind::Image),
            Self::Remix => Some(ReferenceKind::RemixSource),
            Self::CreateCharacter | Self::CharacterToVideo => Some(ReferenceKind::Video),
        }
    }
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| format!("unknown generation mode: {s}"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `self -> next` is a legal move. Staying in a terminal state is
    /// allowed so that metadata updates can restate the status.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, Processing) => true,
            (Processing, Processing | Completed | Failed) => true,
            (Completed | Failed, Processing) => true,
            (Completed, Completed) | (Failed, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Payload
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Image,
    Video,
    RemixSource,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Video => write!(f, "video"),
            Self::RemixSource => write!(f, "remix source"),
        }
    }
}

/// Reference media attached to a prompt. Images and videos are data URLs,
/// remix sources are plain URLs or share ids understood by the backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Reference {
    Image(String),
    Video(String),
    RemixSource(String),
}

impl Reference {
    pub fn kind(&self) -> ReferenceKind {
        match self {
            Self::Image(_) => ReferenceKind::Image,
            Self::Video(_) => ReferenceKind::Video,
            Self::RemixSource(_) => ReferenceKind::RemixSource,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Self::Image(v) | Self::Video(v) | Self::RemixSource(v) => v,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub prompt: String,
    pub reference: Option<Reference>,
}

impl TaskPayload {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            reference: None,
        }
    }

    pub fn with_reference(prompt: impl Into<String>, reference: Reference) -> Self {
        Self {
            prompt: prompt.into(),
            reference: Some(reference),
        }
    }

    pub fn image(&self) -> Option<&str> {
        match &self.reference {
            Some(Reference::Image(v)) => Some(v),
            _ => None,
        }
    }

    pub fn video(&self) -> Option<&str> {
        match &self.reference {
            Some(Reference::Video(v)) => Some(v),
            _ => None,
        }
    }

    pub fn remix_source(&self) -> Option<&str> {
        match &self.reference {
            Some(Reference::RemixSource(v)) => Some(v),
            _ => None,
        }
    }

    /// Check the payload against what `mode` requires.
    pub fn validate_for(&self, mode: GenerationMode) -> Result<(), ValidationError> {
        if mode.requires_prompt() && self.prompt.trim().is_empty() {
            return Err(ValidationError::EmptyPrompt { mode });
        }

        let present = self
            .reference
            .as_ref()
            .filter(|r| !r.value().trim().is_empty());

        match (mode.required_reference(), present) {
            (Some(expected), None) => Err(ValidationError::MissingReference { mode, expected }),
            (Some(expected), Some(r)) if r.kind() != expected => {
                Err(ValidationError::UnexpectedReference {
                    mode,
                    found: r.kind(),
                })
            }
            (None, Some(r)) => Err(ValidationError::UnexpectedReference {
                mode,
                found: r.kind(),
            }),
            _ => Ok(()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Video format
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    #[default]
    Landscape,
    Portrait,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClipLength {
    #[default]
    #[serde(rename = "10s")]
    Ten,
    #[serde(rename = "15s")]
    Fifteen,
}

impl ClipLength {
    pub fn seconds(&self) -> u32 {
        match self {
            Self::Ten => 10,
            Self::Fifteen => 15,
        }
    }
}

/// Output shape of a video. Maps onto the backend's model naming scheme.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFormat {
    pub orientation: Orientation,
    pub length: ClipLength,
}

impl VideoFormat {
    pub fn model_id(&self) -> String {
        let orientation = match self.orientation {
            Orientation::Landscape => "landscape",
            Orientation::Portrait => "portrait",
        };
        format!("sora-video-{orientation}-{}s", self.length.seconds())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Task
// ─────────────────────────────────────────────────────────────────────────────

/// User input for a new task, checked by [`GenerationTask::from_draft`].
#[derive(Clone, Debug)]
pub struct TaskDraft {
    pub mode: GenerationMode,
    pub prompt: String,
    pub reference: Option<Reference>,
    pub format: VideoFormat,
    /// Overrides the model derived from `format`.
    pub model: Option<String>,
}

impl TaskDraft {
    pub fn new(mode: GenerationMode, prompt: impl Into<String>) -> Self {
        Self {
            mode,
            prompt: prompt.into(),
            reference: None,
            format: VideoFormat::default(),
            model: None,
        }
    }

    pub fn reference(mut self, reference: Reference) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn format(mut self, format: VideoFormat) -> Self {
        self.format = format;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationTask {
    pub id: TaskId,
    pub sequence_number: u64,
    pub mode: GenerationMode,
    pub status: TaskStatus,
    pub payload: TaskPayload,
    pub model: String,
    pub format: VideoFormat,
    pub progress: u8,
    pub progress_message: Option<String>,
    pub artifact_url: Option<String>,
    pub thumbnail: Option<String>,
    /// Number of generation attempts started on this record.
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
}

impl GenerationTask {
    /// Build a pending task, rejecting drafts that miss mode-required input.
    pub fn from_draft(
        draft: TaskDraft,
        sequence_number: u64,
        created_at: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let mut payload = TaskPayload {
            prompt: draft.prompt.trim().to_string(),
            reference: draft.reference,
        };
        payload.validate_for(draft.mode)?;

        if draft.mode == GenerationMode::CreateCharacter && payload.prompt.is_empty() {
            payload.prompt = CHARACTER_PROMPT_PLACEHOLDER.to_string();
        }

        Ok(Self {
            id: TaskId::new(),
            sequence_number,
            mode: draft.mode,
            status: TaskStatus::Pending,
            payload,
            model: draft.model.unwrap_or_else(|| draft.format.model_id()),
            format: draft.format,
            progress: 0,
            progress_message: None,
            artifact_url: None,
            thumbnail: None,
            attempt: 0,
            created_at,
        })
    }

    /// The artifact of the latest attempt, only while that attempt stands completed.
    pub fn current_artifact(&self) -> Option<&str> {
        match self.status {
            TaskStatus::Completed => self.artifact_url.as_deref(),
            _ => None,
        }
    }

    /// Apply a partial update atomically: either every field lands or none does.
    pub fn apply(&mut self, update: &TaskUpdate) -> Result<Transition, TransitionError> {
        let from = self.status;
        let to = update.status.unwrap_or(from);

        if to != from && !from.can_transition_to(to) {
            return Err(TransitionError::InvalidTransition { from, to });
        }

        let completing = to == TaskStatus::Completed && from != TaskStatus::Completed;
        if update.artifact_url.is_some() && !completing {
            return Err(TransitionError::UnexpectedArtifact);
        }
        if completing && update.artifact_url.is_none() {
            return Err(TransitionError::MissingArtifact);
        }
        if update.thumbnail.is_some() && self.artifact_url.is_none() && !completing {
            return Err(TransitionError::ThumbnailWithoutArtifact);
        }

        let starting = to == TaskStatus::Processing && from != TaskStatus::Processing;
        if starting {
            self.attempt += 1;
        }
        if let Some(url) = &update.artifact_url {
            self.artifact_url = Some(url.clone());
            self.thumbnail = None;
        }
        if let Some(progress) = update.progress {
            self.progress = progress.min(100);
        }
        if let Some(message) = &update.progress_message {
            self.progress_message = Some(message.clone());
        }
        if let Some(thumbnail) = &update.thumbnail {
            self.thumbnail = Some(thumbnail.clone());
        }
        self.status = to;

        Ok(Transition { from, to })
    }
}

/// Partial update of a task's mutable fields. `None` leaves a field as is.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub progress: Option<u8>,
    pub progress_message: Option<String>,
    pub artifact_url: Option<String>,
    pub thumbnail: Option<String>,
}

impl TaskUpdate {
    pub fn started() -> Self {
        Self {
            status: Some(TaskStatus::Processing),
            progress: Some(0),
            progress_message: Some(STARTING_MESSAGE.to_string()),
            ..Default::default()
        }
    }

    pub fn progress(percent: Option<u8>, message: impl Into<String>) -> Self {
        Self {
            progress: percent,
            progress_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn completed(artifact_url: impl Into<String>) -> Self {
        Self {
            status: Some(TaskStatus::Completed),
            progress: Some(100),
            progress_message: Some(COMPLETED_MESSAGE.to_string()),
            artifact_url: Some(artifact_url.into()),
            ..Default::default()
        }
    }

    pub fn failed(message: &str) -> Self {
        Self {
            status: Some(TaskStatus::Failed),
            progress_message: Some(format!("Error: {message}")),
            ..Default::default()
        }
    }

    pub fn thumbnail(thumbnail: impl Into<String>) -> Self {
        Self {
            thumbnail: Some(thumbnail.into()),
            ..Default::default()
        }
    }
}

/// Status change produced by a successful [`GenerationTask::apply`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

impl Transition {
    pub fn completed_now(&self) -> bool {
        self.to == TaskStatus::Completed && self.from != TaskStatus::Completed
    }

    pub fn started_attempt(&self) -> bool {
        self.to == TaskStatus::Processing && self.from != TaskStatus::Processing
    }
}
