use std::{panic, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use taskboard::{
    cli::{self, RootCommand},
    logging::init_logging,
    session::SessionOptions,
    settings::Settings,
    store::{BoardStore, ChangeFeed, SqliteStore},
};

#[derive(Parser, Debug)]
#[command(
    name = "taskboard",
    about = "Collaborative kanban task board",
    long_about = "A kanban board whose columns, tasks and edits stay consistent across clients sharing one store.",
    version,
    author
)]
struct Cli {
    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    quiet: bool,

    /// Use this database file instead of the configured one.
    #[arg(long, global = true, value_name = "PATH")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: RootCommand,
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_path = match init_logging() {
        Ok(path) => Some(path),
        Err(err) => {
            eprintln!("warning: failed to initialize logging: {err}");
            None
        }
    };
    if let Some(path) = log_path {
        install_panic_hook_with_log(path);
    }

    let cli = Cli::parse();
    let mut settings = Settings::load();
    if let Some(path) = cli.database {
        settings.database_path = Some(path);
    }

    let store = open_store(&settings).await?;
    let code = cli::run(
        store,
        SessionOptions::from_settings(&settings),
        cli.command,
        cli.json,
        cli.quiet,
    )
    .await;
    std::process::exit(code);
}

async fn open_store(settings: &Settings) -> Result<Arc<dyn BoardStore>> {
    let path = settings.resolved_database_path()?;
    let store = SqliteStore::open_with_feed(&path, ChangeFeed::new(settings.change_buffer))
        .await
        .with_context(|| format!("failed to open database '{}'", path.display()))?;
    info!(path = %path.display(), "database opened");
    Ok(Arc::new(store))
}

fn install_panic_hook_with_log(log_path: PathBuf) {
    let previous_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        eprintln!();
        eprintln!("  Log file: {}", log_path.display());
        eprintln!();
        previous_hook(panic_info);
    }));
}
