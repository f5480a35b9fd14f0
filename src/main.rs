use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

mod agent;
mod cli;
mod config;
mod heal;
mod index;
mod indexer;

use config::{Config, LoggingConfig};

#[derive(Parser)]
#[command(name = "pkgraph")]
#[command(version)]
#[command(about = "Project knowledge graph and self-healing AI agent", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project directory
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Offer an AI fix when the command fails
    #[arg(long, global = true)]
    heal: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Index the project and map relationships
    Index {
        /// Keep watching for changes
        #[arg(short, long)]
        watch: bool,

        /// Rebuild the entire index
        #[arg(short, long)]
        rebuild: bool,
    },

    /// Search symbols by name or kind
    Search {
        /// Substring of the name or kind
        #[arg(required_unless_present = "kind")]
        query: Option<String>,

        /// Only symbols of this kind (function, class, interface, ...)
        #[arg(short, long)]
        kind: Option<String>,
    },

    /// Show symbols related to a symbol id
    Related {
        id: i64,
    },

    /// Show index statistics (with --verbose, a per-kind and per-language breakdown)
    Stats,

    /// Ask the project-aware agent
    Ai {
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,
    },

    /// Run a command and heal it if it fails
    Run {
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

fn init_logging(config: &LoggingConfig, project: &Path, debug: bool, verbose: bool) {
    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        config.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console = if config.format == "pretty" {
        fmt::layer().pretty().with_target(false).with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().compact().with_target(false).with_writer(std::io::stderr).boxed()
    };

    let mut file_error = None;
    let file = if config.file {
        match open_log_file(project) {
            Ok(file) => Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file))),
            Err(e) => {
                file_error = Some(e);
                None
            }
        }
    } else {
        None
    };

    tracing_subscriber::registry().with(filter).with(console).with(file).init();

    if let Some(e) = file_error {
        warn!("File logging disabled: {:#}", e);
    }
}

fn open_log_file(project: &Path) -> Result<std::fs::File> {
    let dir = project.join(index::db::STATE_DIR).join("logs");
    std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join("cli.log");
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open {}", path.display()))
}

/// First Ctrl+C cancels in-flight work, a second one exits
fn install_interrupt(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        cancel.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
}

/// The current invocation, with the program resolved so it can be re-run
fn own_argv() -> Vec<String> {
    let mut argv: Vec<String> = std::env::args().collect();
    if let (Some(first), Ok(exe)) = (argv.first_mut(), std::env::current_exe()) {
        *first = exe.display().to_string();
    }
    argv
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, config_error) = Config::from_project_dir(&cli.project);
    init_logging(&config.logging, &cli.project, cli.debug, cli.verbose);
    if let Some(e) = config_error {
        warn!("Could not load configuration, using defaults: {:#}", e);
    }
    info!("pkgraph v{} starting...", env!("CARGO_PKG_VERSION"));

    let cancel = CancellationToken::new();
    install_interrupt(cancel.clone());

    let verbose = cli.verbose;
    let heal_on_failure = (cli.heal || config.heal.enabled) && !heal::inside_healing();
    let session = cli::Session::new(&cli.project, config, cancel)?;

    // `run` owns its healing flow
    let self_heal = heal_on_failure && !matches!(cli.command, Commands::Run { .. });

    let result = match cli.command {
        Commands::Index { watch, rebuild } => cli::index::index_project(&session, watch, rebuild).await,
        Commands::Search { query, kind } => cli::search::search(&session, query.as_deref(), kind.as_deref()),
        Commands::Related { id } => cli::search::related(&session, id),
        Commands::Stats => cli::stats::show_stats(&session, verbose),
        Commands::Ai { prompt } => cli::ai::ask(&session, &prompt.join(" ")).await,
        Commands::Run { command } => cli::run::run_command(&session, command).await,
    };

    let Err(error) = result else {
        return Ok(());
    };
    if !self_heal {
        return Err(error);
    }

    match session.heal(own_argv(), &format!("{:#}", error)).await {
        Ok(heal::HealOutcome::Recovered { .. }) => Ok(()),
        Ok(_) => Err(error),
        Err(heal_error) => {
            warn!("Self-healing unavailable: {:#}", heal_error);
            Err(error)
        }
    }
}
