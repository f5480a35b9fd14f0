use anyhow::{bail, Context, Result};
use tracing::info;

use crate::cli::Session;
use crate::heal::runner::{ProcessRunner, RunOutcome};
use crate::heal::{inside_healing, HealOutcome};

/// Run `argv`; a failure starts the healing flow with the captured stderr
pub async fn run_command(session: &Session, argv: Vec<String>) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to read working directory")?;
    let runner = ProcessRunner::new(cwd);

    let error = match runner.run_capturing(&argv, &session.cancel).await {
        RunOutcome::Succeeded => return Ok(()),
        RunOutcome::Cancelled => bail!("Interrupted"),
        RunOutcome::Failed(error) => error,
    };

    if inside_healing() {
        bail!("{}", error);
    }

    match session.heal(argv, &error).await? {
        HealOutcome::Recovered { attempts } => {
            info!("Recovered after {} healing attempt(s)", attempts);
            Ok(())
        }
        HealOutcome::Rejected => bail!("Command failed: {}", error),
        HealOutcome::PersistentFailure { attempts, last_error } => {
            bail!("Command still failing after {} attempts: {}", attempts, last_error)
        }
    }
}
