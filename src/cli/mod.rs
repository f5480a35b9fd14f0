// CLI command implementations

pub mod ai;
pub mod index;
pub mod run;
pub mod search;
pub mod stats;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::agent::provider::select_model;
use crate::agent::tools::ToolBox;
use crate::agent::{Agent, AgentEvent, Reporter};
use crate::config::Config;
use crate::heal::gate::TerminalGate;
use crate::heal::runner::ProcessRunner;
use crate::heal::{HealOutcome, Healer};
use crate::index::Store;

/// Tool output lines echoed to the terminal
const ECHO_LINES: usize = 8;

/// Everything a command needs about the project it runs against
pub struct Session {
    pub project: PathBuf,
    pub config: Config,
    pub cancel: CancellationToken,
}

impl Session {
    pub fn new(project: &Path, config: Config, cancel: CancellationToken) -> Result<Self> {
        let project = project
            .canonicalize()
            .with_context(|| format!("Project directory not found: {}", project.display()))?;
        Ok(Self {
            project,
            config,
            cancel,
        })
    }

    pub fn open_store(&self) -> Result<Store> {
        Store::open(&self.project)
    }

    pub fn agent(&self, store: Option<Store>, reporter: Reporter) -> Result<Agent> {
        let model = select_model(&self.config.agent)?;
        Ok(Agent::new(model, ToolBox::new(&self.project, store))
            .with_cancel(self.cancel.clone())
            .with_request_timeout(Duration::from_secs(self.config.agent.request_timeout_secs))
            .with_reporter(reporter))
    }

    /// Healing still runs when the store cannot be opened
    fn healing_store(&self) -> Option<Store> {
        match self.open_store() {
            Ok(store) => Some(store),
            Err(e) => {
                warn!("Healing without the knowledge store: {:#}", e);
                None
            }
        }
    }

    /// Interactive healing flow for a command that failed with `error`
    pub async fn heal(&self, argv: Vec<String>, error: &str) -> Result<HealOutcome> {
        let agent = self.agent(self.healing_store(), Box::new(print_event))?;
        let cwd = std::env::current_dir().context("Failed to read working directory")?;

        let healer = Healer::new(
            agent,
            Arc::new(TerminalGate::new()),
            Arc::new(ProcessRunner::new(cwd)),
            &self.project,
        )
        .with_cancel(self.cancel.clone());

        Ok(healer.heal(&argv, error).await?)
    }
}

/// Terminal trace of agent activity
pub fn print_event(event: &AgentEvent<'_>) {
    match event {
        AgentEvent::Thinking { turn } => eprintln!("{}", style(format!("🤖 Thinking... (step {})", turn)).dim()),
        AgentEvent::ToolInvoked { name, arguments } => eprintln!("🛠️  {}({})", style(name).bold(), arguments),
        AgentEvent::ToolSucceeded { name, output } => {
            let lines: Vec<&str> = output.lines().collect();
            debug!("{} returned {} lines", name, lines.len());
            for line in lines.iter().take(ECHO_LINES) {
                eprintln!("   {}", style(line).dim());
            }
            if lines.len() > ECHO_LINES {
                eprintln!("   {}", style(format!("... ({} more lines)", lines.len() - ECHO_LINES)).dim());
            }
        }
        AgentEvent::ToolFailed { name, error } => eprintln!("❌ {} failed: {}", name, error),
        AgentEvent::Answer(_) => {}
    }
}
