use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use reel_core::ids::TaskId;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const FRAME_OFFSET_SECS: &str = "0.1";
const MAX_STDERR_CHARS: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum ThumbnailError {
    #[error("failed to start {binary}: {source}")]
    Spawn {
        binary: String,
        source: std::io::Error,
    },
    #[error("thumbnail timed out after {0:?}")]
    Timeout(Duration),
    #[error("ffmpeg exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Produces a still image for a finished artifact. `Ok(None)` means the
/// feature is off.
#[async_trait]
pub trait Thumbnailer: Send + Sync {
    async fn thumbnail(
        &self,
        artifact_url: &str,
        task_id: &TaskId,
    ) -> Result<Option<String>, ThumbnailError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoThumbnails;

#[async_trait]
impl Thumbnailer for NoThumbnails {
    async fn thumbnail(&self, _: &str, _: &TaskId) -> Result<Option<String>, ThumbnailError> {
        Ok(None)
    }
}

/// Grabs one early frame with the `ffmpeg` binary into a JPEG.
pub struct FfmpegThumbnailer {
    binary: String,
    output_dir: PathBuf,
    timeout: Duration,
}

impl FfmpegThumbnailer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: "ffmpeg".into(),
            output_dir: output_dir.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn output_path(&self, task_id: &TaskId) -> PathBuf {
        self.output_dir.join(format!("{task_id}.jpg"))
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

#[async_trait]
impl Thumbnailer for FfmpegThumbnailer {
    #[instrument(skip(self, artifact_url), fields(task_id = %task_id))]
    async fn thumbnail(
        &self,
        artifact_url: &str,
        task_id: &TaskId,
    ) -> Result<Option<String>, ThumbnailError> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let out = self.output_path(task_id);

        let child = tokio::process::Command::new(&self.binary)
            .args(["-y", "-loglevel", "error", "-ss", FRAME_OFFSET_SECS, "-i"])
            .arg(artifact_url)
            .args(["-frames:v", "1", "-q:v", "3"])
            .arg(&out)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ThumbnailError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ThumbnailError::Timeout(self.timeout))??;

        if !output.status.success() {
            let stderr: String = String::from_utf8_lossy(&output.stderr)
                .trim()
                .chars()
                .take(MAX_STDERR_CHARS)
                .collect();
            return Err(ThumbnailError::Failed {
                status: output.status.to_string(),
                stderr,
            });
        }

        debug!(path = %out.display(), "thumbnail written");
        Ok(Some(out.to_string_lossy().into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_yields_nothing() {
        let result = NoThumbnails
            .thumbnail("https://cdn/v.mp4", &TaskId::new())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn output_named_after_task() {
        let thumbs = FfmpegThumbnailer::new("/tmp/thumbs");
        let id = TaskId::from_raw("task_abc");
        assert_eq!(thumbs.output_path(&id), PathBuf::from("/tmp/thumbs/task_abc.jpg"));
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let thumbs =
            FfmpegThumbnailer::new(dir.path()).with_binary("definitely-not-a-real-ffmpeg-binary");
        let err = thumbs
            .thumbnail("https://cdn/v.mp4", &TaskId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ThumbnailError::Spawn { .. }));
    }
}
