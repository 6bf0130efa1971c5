//! Settings type definitions.
//!
//! Field names are camelCase on disk. Every section has `#[serde(default)]`
//! so partial files fill in the rest from the compiled defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::loader::reel_home;

/// Substrings of transport errors that the backend produces when it kills a
/// stream over a content policy.
pub const DEFAULT_RESTRICTION_SIGNATURES: &[&str] = &[
    "network error",
    "INCOMPLETE_CHUNKED_ENCODING",
    "error decoding response body",
    "connection closed before message completed",
];

pub const DEFAULT_RESTRICTION_MESSAGE: &str = "Video generation failed. This may be due to content restrictions or copyright issues. Please try a different prompt or style.";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReelSettings {
    pub api: ApiSettings,
    pub generation: GenerationSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

/// Backend endpoint and credential.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiSettings {
    /// Base URL, without the `/v1/...` suffix.
    pub base_url: String,
    /// Bearer credential. Empty means no `Authorization` header.
    pub api_key: String,
    /// Model used when a task does not name one.
    pub default_model: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationSettings {
    pub connect_timeout_secs: u64,
    /// Longest silence tolerated on an open stream.
    pub idle_timeout_secs: u64,
    pub content_restriction: ContentRestrictionSettings,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            idle_timeout_secs: 300,
            content_restriction: ContentRestrictionSettings::default(),
        }
    }
}

/// Rewrites opaque transport failures into a policy explanation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContentRestrictionSettings {
    pub signatures: Vec<String>,
    pub message: String,
}

impl Default for ContentRestrictionSettings {
    fn default() -> Self {
        Self {
            signatures: DEFAULT_RESTRICTION_SIGNATURES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            message: DEFAULT_RESTRICTION_MESSAGE.to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    pub database_path: PathBuf,
    pub thumbnail_dir: PathBuf,
    pub download_dir: PathBuf,
    /// Grab a still frame after each completion.
    pub thumbnails: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        let home = reel_home();
        Self {
            database_path: home.join("database").join("reel.db"),
            thumbnail_dir: home.join("thumbnails"),
            download_dir: PathBuf::from("."),
            thumbnails: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    /// Persist warn+ records to `log_db_path`.
    pub log_to_sqlite: bool,
    pub log_db_path: PathBuf,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_to_sqlite: true,
            log_db_path: reel_home().join("database").join("logs.db"),
        }
    }
}
