pub mod error;
pub mod ledger;
pub mod runner;
pub mod summary;
pub mod thumbnail;

pub use error::EngineError;
pub use ledger::{Ledger, LedgerHandle};
pub use runner::{GenerationRunner, RunEvent, RunOutcome};
pub use summary::LedgerSummary;
pub use thumbnail::{FfmpegThumbnailer, NoThumbnails, ThumbnailError, Thumbnailer};
