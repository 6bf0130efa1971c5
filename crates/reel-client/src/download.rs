use std::path::{Path, PathBuf};

use futures::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument};

use reel_core::ids::TaskId;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("artifact request returned {0}")]
    Status(u16),
    #[error("artifact transfer failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("artifact write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// `sora-video-<short id>.mp4`
pub fn artifact_file_name(task_id: &TaskId) -> String {
    format!("sora-video-{}.mp4", task_id.short())
}

/// Stream `url` into `dir`, creating the directory when needed.
#[instrument(skip(http, task_id), fields(task_id = %task_id))]
pub async fn download_artifact(
    http: &Client,
    url: &str,
    dir: &Path,
    task_id: &TaskId,
) -> Result<PathBuf, DownloadError> {
    let resp = http.get(url).send().await?;
    if !resp.status().is_success() {
        return Err(DownloadError::Status(resp.status().as_u16()));
    }

    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(artifact_file_name(task_id));
    let mut file = tokio::fs::File::create(&path).await?;

    let mut body = Box::pin(resp.bytes_stream());
    let mut written = 0usize;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        written += chunk.len();
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    info!(path = %path.display(), bytes = written, "artifact downloaded");
    Ok(path)
}
