mod media;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::error::RecvError;

use reel_client::{ClientConfig, GenerationClient};
use reel_core::ids::TaskId;
use reel_core::provider::VideoGenerator;
use reel_core::task::{
    ClipLength, GenerationMode, GenerationTask, Orientation, Reference, TaskDraft, TaskStatus,
    VideoFormat,
};
use reel_engine::{
    FfmpegThumbnailer, GenerationRunner, Ledger, LedgerHandle, NoThumbnails, RunEvent, RunOutcome,
    Thumbnailer,
};
use reel_settings::ReelSettings;
use reel_store::{Database, SqliteLedgerStore};
use reel_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser)]
#[command(name = "reel", version, about = "Queue and follow video generation jobs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Add a pending task to the ledger.
    Add {
        #[arg(long, value_parser = parse_mode)]
        mode: GenerationMode,
        #[arg(long, default_value = "")]
        prompt: String,
        /// Reference image for image-to-video.
        #[arg(long)]
        image: Option<PathBuf>,
        /// Reference video for the character modes.
        #[arg(long)]
        video: Option<PathBuf>,
        /// Source video url or share id for remix.
        #[arg(long)]
        remix_url: Option<String>,
        /// Defaults to landscape.
        #[arg(long, value_enum)]
        orientation: Option<OrientationArg>,
        /// Clip length in seconds. Defaults to 10.
        #[arg(long, value_enum)]
        length: Option<LengthArg>,
        /// Use this model instead of the one derived from the format.
        #[arg(long)]
        model: Option<String>,
        /// Start generating right away.
        #[arg(long)]
        run: bool,
    },
    /// Run generation for the given tasks, concurrently.
    Generate {
        ids: Vec<String>,
        /// Every task still pending.
        #[arg(long)]
        pending: bool,
    },
    /// Show the ledger, newest first.
    List,
    Delete {
        id: String,
    },
    /// Dashboard figures.
    Stats,
    /// Models offered by the backend.
    Models {
        /// Include non-video models.
        #[arg(long)]
        all: bool,
    },
    /// Save a completed task's video.
    Download {
        id: String,
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OrientationArg {
    Landscape,
    Portrait,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LengthArg {
    #[value(name = "10")]
    Ten,
    #[value(name = "15")]
    Fifteen,
}

fn parse_mode(raw: &str) -> Result<GenerationMode, String> {
    raw.parse()
}

struct App {
    settings: ReelSettings,
    ledger: LedgerHandle,
    client: Arc<GenerationClient>,
}

impl App {
    fn open(settings: ReelSettings) -> anyhow::Result<Self> {
        let db = match Database::open(&settings.storage.database_path) {
            Ok(db) => db,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %settings.storage.database_path.display(),
                    "database unavailable, ledger will not persist"
                );
                Database::in_memory()?
            }
        };
        let ledger = LedgerHandle::new(Ledger::load(Arc::new(SqliteLedgerStore::new(db))));
        let client = GenerationClient::new(ClientConfig::from_settings(&settings))?
            .with_usage(Arc::new(ledger.clone()));
        Ok(Self {
            settings,
            ledger,
            client: Arc::new(client),
        })
    }

    fn runner(&self) -> GenerationRunner {
        let thumbnailer: Arc<dyn Thumbnailer> = if self.settings.storage.thumbnails {
            Arc::new(FfmpegThumbnailer::new(&self.settings.storage.thumbnail_dir))
        } else {
            Arc::new(NoThumbnails)
        };
        GenerationRunner::new(self.client.clone(), self.ledger.clone())
            .with_thumbnailer(thumbnailer)
    }

    /// Exact id, or the short form shown by `list`.
    fn resolve(&self, raw: &str) -> anyhow::Result<TaskId> {
        let ledger = self.ledger.lock();
        let matches: Vec<&GenerationTask> = ledger
            .tasks()
            .iter()
            .filter(|t| t.id.as_str() == raw || t.id.short() == raw)
            .collect();
        match matches.as_slice() {
            [task] => Ok(task.id.clone()),
            [] => bail!("no task matches {raw}"),
            _ => bail!("{raw} is ambiguous"),
        }
    }

    async fn generate(&self, ids: Vec<TaskId>) -> anyhow::Result<()> {
        if ids.is_empty() {
            println!("nothing to generate");
            return Ok(());
        }
        let runner = self.runner();
        let mut events = runner.subscribe();
        let printer = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => print_event(&event),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let results = runner.run_many(&ids).await;
        drop(runner);
        printer.await.ok();

        let mut failed = 0;
        for (id, result) in results {
            match result {
                Ok(RunOutcome::Completed { .. }) => {}
                Ok(RunOutcome::Failed(_)) => failed += 1,
                Err(e) => {
                    failed += 1;
                    eprintln!("{}: {e}", id.short());
                }
            }
        }
        if failed > 0 {
            bail!("{failed} of {} generations failed", ids.len());
        }
        Ok(())
    }
}

fn print_event(event: &RunEvent) {
    match event {
        RunEvent::Started { task_id, attempt } => {
            println!("[{}] started (attempt {attempt})", task_id.short())
        }
        RunEvent::Progress {
            task_id,
            percent,
            message,
        } => match percent {
            Some(p) => println!("[{}] {p:>3}% {message}", task_id.short()),
            None => println!("[{}]      {message}", task_id.short()),
        },
        RunEvent::Completed {
            task_id,
            artifact_url,
        } => println!("[{}] completed: {artifact_url}", task_id.short()),
        RunEvent::Failed { task_id, message } => {
            println!("[{}] failed: {message}", task_id.short())
        }
        RunEvent::ThumbnailReady { task_id, path } => {
            println!("[{}] thumbnail: {path}", task_id.short())
        }
    }
}

fn print_task(task: &GenerationTask) {
    let detail = match task.status {
        TaskStatus::Completed => task.current_artifact().unwrap_or_default().to_string(),
        _ => task.progress_message.clone().unwrap_or_default(),
    };
    println!(
        "#{:<4} {:<8} {:<18} {:<10} {:>3}%  {}",
        task.sequence_number,
        task.id.short(),
        task.mode.as_str(),
        task.status.to_string(),
        task.progress,
        detail
    );
}

#[allow(clippy::too_many_arguments)]
fn build_draft(
    mode: GenerationMode,
    prompt: String,
    image: Option<PathBuf>,
    video: Option<PathBuf>,
    remix_url: Option<String>,
    orientation: Option<OrientationArg>,
    length: Option<LengthArg>,
    model: Option<String>,
) -> anyhow::Result<TaskDraft> {
    let reference = match (image, video, remix_url) {
        (None, None, None) => None,
        (Some(path), None, None) => Some(Reference::Image(media::data_url(&path)?)),
        (None, Some(path), None) => Some(Reference::Video(media::data_url(&path)?)),
        (None, None, Some(url)) => Some(Reference::RemixSource(url)),
        _ => bail!("pass at most one of --image, --video, --remix-url"),
    };
    let format = VideoFormat {
        orientation: match orientation.unwrap_or(OrientationArg::Landscape) {
            OrientationArg::Landscape => Orientation::Landscape,
            OrientationArg::Portrait => Orientation::Portrait,
        },
        length: match length.unwrap_or(LengthArg::Ten) {
            LengthArg::Ten => ClipLength::Ten,
            LengthArg::Fifteen => ClipLength::Fifteen,
        },
    };

    let mut draft = TaskDraft::new(mode, prompt).format(format);
    if let Some(reference) = reference {
        draft = draft.reference(reference);
    }
    draft.model = model;
    Ok(draft)
}

/// An explicit `--model` wins. The configured default only applies when no
/// format flag was given, so `--orientation`/`--length` always pick the model.
fn pick_model(
    model: Option<String>,
    format_given: bool,
    default_model: Option<&str>,
) -> Option<String> {
    match (model, format_given) {
        (Some(model), _) => Some(model),
        (None, true) => None,
        (None, false) => default_model.map(str::to_string),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = reel_settings::load_settings().context("loading settings")?;

    let _telemetry = init_telemetry(TelemetryConfig {
        log_to_sqlite: settings.logging.log_to_sqlite,
        log_db_path: settings.logging.log_db_path.clone(),
        ..TelemetryConfig::default().with_level_name(&settings.logging.level)
    });

    let app = App::open(settings)?;

    match cli.command {
        Command::Add {
            mode,
            prompt,
            image,
            video,
            remix_url,
            orientation,
            length,
            model,
            run,
        } => {
            let model = pick_model(
                model,
                orientation.is_some() || length.is_some(),
                app.settings.api.default_model.as_deref(),
            );
            let draft = build_draft(mode, prompt, image, video, remix_url, orientation, length, model)?;
            let task = app.ledger.lock().submit(draft)?;
            println!("added #{} {} ({})", task.sequence_number, task.id, task.model);
            if run {
                app.generate(vec![task.id]).await?;
            }
        }
        Command::Generate { ids, pending } => {
            let mut targets = ids
                .iter()
                .map(|raw| app.resolve(raw))
                .collect::<anyhow::Result<Vec<_>>>()?;
            if pending {
                let ledger = app.ledger.lock();
                targets.extend(
                    ledger
                        .tasks()
                        .iter()
                        .filter(|t| t.status == TaskStatus::Pending)
                        .map(|t| t.id.clone()),
                );
            }
            let mut seen = HashSet::new();
            targets.retain(|id| seen.insert(id.clone()));
            app.generate(targets).await?;
        }
        Command::List => {
            let ledger = app.ledger.lock();
            if ledger.tasks().is_empty() {
                println!("no tasks");
            }
            for task in ledger.tasks() {
                print_task(task);
            }
        }
        Command::Delete { id } => {
            let id = app.resolve(&id)?;
            app.ledger.lock().delete(&id);
            println!("deleted {id}");
        }
        Command::Stats => {
            let summary = app.ledger.lock().summary(Utc::now());
            println!("videos (24h/total):    {}", summary.artifacts_display());
            println!("api calls (24h/total): {}", summary.api_calls_display());
            println!("processing:            {}", summary.processing);
            println!("completed:             {}", summary.completed);
            println!("failed:                {}", summary.failed);
            println!("estimated storage:     {}", summary.storage_display());
        }
        Command::Models { all } => {
            let models = if all {
                app.client.list_models().await
            } else {
                app.client.video_models().await
            };
            if models.is_empty() {
                println!("no models available");
            }
            for model in models {
                println!("{model}");
            }
        }
        Command::Download { id, dir } => {
            let id = app.resolve(&id)?;
            let url = app
                .ledger
                .lock()
                .get(&id)
                .and_then(|t| t.current_artifact().map(str::to_string))
                .ok_or_else(|| anyhow!("task {} has no completed video", id.short()))?;
            let dir = dir.unwrap_or_else(|| app.settings.storage.download_dir.clone());
            let saved = app.client.download(&url, &dir, &id).await?;
            println!("saved {}", saved.display());
        }
    }
    Ok(())
}
