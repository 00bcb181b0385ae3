//! NoelUpload desktop shell: uploads images to NoelShack and manages the
//! local upload history.
//!
//! Settings come from an optional JSON file and `NOELUPLOAD_*` variables.
//! Set `RUST_LOG=debug` for verbose logs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use shared::{
    App, AppConfig, Effect, Event, FsImageLoader, HistoryEntryRepository, HttpUploader, ImageRef, MessageKind,
    SqliteStorage, UploadStatus,
};
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "noelupload", version, about = "Upload images to NoelShack")]
struct Cli {
    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// History database, overrides the config file
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload an image and print its direct link
    Upload {
        /// Path to the image
        file: PathBuf,
    },
    /// List past uploads
    History,
    /// Print the direct link of a history entry
    Link {
        /// Position in the history, as shown by `history`
        index: usize,
    },
    /// Remove one history entry
    Delete { index: usize },
    /// Remove every history entry
    Clear,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };
    let mut config = config.with_env_overrides()?;

    if let Some(db) = &cli.db {
        config.database_path = Some(db.clone());
    }
    if config.database_path.is_none() {
        config.database_path = Some(default_database_path()?);
    }
    Ok(config)
}

fn default_database_path() -> anyhow::Result<PathBuf> {
    let dirs = ProjectDirs::from("com", "franckrj", "noelupload")
        .context("could not determine a data directory, pass --db")?;
    Ok(dirs.data_dir().join("history.db"))
}

fn open_storage(path: &Path) -> anyhow::Result<SqliteStorage> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    SqliteStorage::open(path).with_context(|| format!("failed to open history at {}", path.display()))
}

/// Carries out effects the way a terminal can. Returns the first error
/// message shown, if any.
fn perform(effects: Vec<Effect>) -> Option<String> {
    let mut error = None;
    for effect in effects {
        match effect {
            Effect::CopyToClipboard { text } => println!("{text}"),
            Effect::ShowMessage(message) => match message.kind {
                MessageKind::Info => info!("{}", message.text),
                MessageKind::Error => {
                    eprintln!("error: {}", message.text);
                    error.get_or_insert(message.text);
                }
            },
            Effect::Render | Effect::ScrollTo { .. } | Effect::PickImage => {
                debug!(?effect, "ignored by the terminal shell");
            }
        }
    }
    error
}

fn print_history(app: &App<SqliteStorage>) {
    let view = app.view();
    if view.entries.is_empty() {
        println!("no uploads yet");
        return;
    }
    for (index, entry) in view.entries.iter().enumerate() {
        let link = if entry.direct_link.is_empty() {
            entry.status_message.as_str()
        } else {
            entry.direct_link.as_str()
        };
        println!("{index:>4}  {:<9} {:<32} {link}", entry.status.as_str(), entry.image_name);
    }
}

async fn upload(app: &mut App<SqliteStorage>, file: &Path) -> anyhow::Result<()> {
    let path = file
        .canonicalize()
        .with_context(|| format!("cannot read {}", file.display()))?;
    let mut status = app.pipeline().status_receiver();

    let effects = app
        .update(Event::ShareImage {
            image: Some(ImageRef::new(path.to_string_lossy().into_owned())),
        })
        .await;
    if let Some(message) = perform(effects) {
        bail!(message);
    }

    let finished = status
        .wait_for(|s| s.as_ref().is_some_and(|s| s.status.is_terminal()))
        .await
        .context("upload task stopped")?
        .clone()
        .context("upload ended without a status")?;
    perform(app.update(Event::UploadStatusChanged(finished.clone())).await);

    match finished.status {
        UploadStatus::Finished => {
            println!("{}", shared::links::noelshack_to_direct_link(&finished.message));
            Ok(())
        }
        _ => bail!(finished.message),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let database = config
        .database_path
        .clone()
        .context("no history database configured")?;
    debug!(database = %database.display(), "opening history");

    let storage = Arc::new(open_storage(&database)?);
    let repository = Arc::new(HistoryEntryRepository::load(storage).await?);
    let uploader = Arc::new(HttpUploader::new(&config)?);
    let loader = Arc::new(FsImageLoader::new(config.max_image_bytes));
    let mut app = App::new(repository, uploader, loader).await?;
    perform(app.update(Event::Started).await);

    match cli.command {
        Commands::Upload { file } => upload(&mut app, &file).await?,
        Commands::History => print_history(&app),
        Commands::Link { index } => {
            if let Some(message) = perform(app.update(Event::HistoryEntryTapped { index }).await) {
                bail!(message);
            }
        }
        Commands::Delete { index } => {
            if let Some(message) = perform(app.update(Event::DeleteHistoryEntry { index }).await) {
                bail!(message);
            }
            print_history(&app);
        }
        Commands::Clear => {
            if let Some(message) = perform(app.update(Event::ClearHistory).await) {
                bail!(message);
            }
            println!("history cleared");
        }
    }

    Ok(())
}
