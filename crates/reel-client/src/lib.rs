pub mod classifier;
pub mod client;
pub mod codec;
pub mod content;
pub mod download;
pub mod stream;

pub mod mock;

pub use classifier::ErrorClassifier;
pub use client::{ClientConfig, GenerationClient};
pub use download::{artifact_file_name, download_artifact, DownloadError};
pub use mock::{MockGenerator, MockScript};
