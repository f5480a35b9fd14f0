// Self-healing: diagnose a failed command, confirm a fix, apply it, re-run

pub mod classify;
pub mod gate;
pub mod runner;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use console::style;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::tools::write_with_parents;
use crate::agent::{Agent, AgentError, FileEdit};
use classify::{classify, ErrorCategory};
use gate::{render_edit_preview, ConfirmGate, Review};
use runner::{CommandRunner, RunOutcome};

/// Set for re-executed commands so they never start a nested healing flow
pub const HEALING_ENV: &str = "PKGRAPH_HEALING";

/// Diagnose-and-rerun cycles before giving up
pub const MAX_ATTEMPTS: usize = 3;

const NO_PROPOSAL: &str = "No specific proposal. Check the error above.";

#[derive(Debug, Error)]
pub enum HealError {
    #[error("AI diagnosis failed: {0}")]
    Diagnosis(#[source] AgentError),

    #[error("confirmation failed: {0:#}")]
    Confirmation(anyhow::Error),

    #[error("cannot re-run: no command arguments")]
    NoCommand,

    #[error("re-execution cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealOutcome {
    /// The command succeeded after `attempts` re-runs
    Recovered { attempts: usize },
    /// The user declined a fix; nothing was written or re-run
    Rejected,
    PersistentFailure { attempts: usize, last_error: String },
}

#[derive(Debug)]
pub struct EditFailure {
    pub path: String,
    pub error: String,
}

/// True inside a command started by a healing flow
pub fn inside_healing() -> bool {
    std::env::var_os(HEALING_ENV).is_some()
}

pub fn diagnosis_prompt(error: &str, category: ErrorCategory) -> String {
    format!(
        "The command failed with error: \"{}\".\n\
         Error category: {} (infrastructure=network/docker, code=syntax/module, auth=401/api key).\n\
         Analyze the project context and this error.\n\
         Explain what went wrong and propose a fix.\n\
         If the fix involves editing a file, use the 'write_file' tool with the full corrected file content.\n\
         Use read_file and list_dir to gather context first. Be concise.",
        error.trim(),
        category
    )
}

/// Write every edit under `root`; one failure does not stop the rest
pub fn apply_edits(root: &Path, edits: &[FileEdit]) -> Vec<EditFailure> {
    let mut failures = Vec::new();
    for edit in edits {
        match write_with_parents(&root.join(&edit.path), &edit.content) {
            Ok(()) => {
                info!("Applied fix to {}", edit.path);
                eprintln!("{} Applied fix to {}", style("✓").green(), edit.path);
            }
            Err(e) => {
                eprintln!("{} Failed to write {}: {}", style("!").yellow(), edit.path, e);
                failures.push(EditFailure {
                    path: edit.path.clone(),
                    error: e.to_string(),
                });
            }
        }
    }
    failures
}

pub struct Healer {
    agent: Agent,
    gate: Arc<dyn ConfirmGate>,
    runner: Arc<dyn CommandRunner>,
    root: PathBuf,
    cancel: CancellationToken,
}

impl Healer {
    pub fn new(
        agent: Agent,
        gate: Arc<dyn ConfirmGate>,
        runner: Arc<dyn CommandRunner>,
        root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            agent,
            gate,
            runner,
            root: root.into(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the classify, diagnose, confirm, apply, re-run cycle for `argv`,
    /// which just failed with `error`
    pub async fn heal(&self, argv: &[String], error: &str) -> Result<HealOutcome, HealError> {
        if argv.is_empty() {
            return Err(HealError::NoCommand);
        }

        let mut error = error.to_string();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let category = classify(&error);
            info!("Healing attempt {}/{} ({})", attempt, MAX_ATTEMPTS, category);
            eprintln!(
                "\n{} Command failed: {}\n   (classified as: {})",
                style("✗").red().bold(),
                error.trim(),
                category
            );
            eprintln!("{}", style("Analyzing the error...").cyan());

            let proposal = self
                .agent
                .resolve_for_healing(&diagnosis_prompt(&error, category))
                .await
                .map_err(HealError::Diagnosis)?;

            let text = match proposal.text.trim() {
                "" => NO_PROPOSAL.to_string(),
                text => text.to_string(),
            };
            let review = Review {
                error: error.clone(),
                category,
                proposal: text,
                preview: render_edit_preview(&proposal.edits),
            };

            if !self.gate.confirm(&review).map_err(HealError::Confirmation)? {
                eprintln!("\nFix not applied. Exiting.");
                return Ok(HealOutcome::Rejected);
            }

            let failures = apply_edits(&self.root, &proposal.edits);
            if !failures.is_empty() {
                let detail: Vec<String> = failures.iter().map(|f| format!("{} ({})", f.path, f.error)).collect();
                warn!("{} of {} edits not applied: {}", failures.len(), proposal.edits.len(), detail.join(", "));
            }

            eprintln!("\n{}", style("Re-running command...").cyan());
            match self.runner.run(argv, &self.cancel).await {
                RunOutcome::Succeeded => {
                    eprintln!("\n{} Command succeeded after fix!", style("✓").green().bold());
                    return Ok(HealOutcome::Recovered { attempts: attempt });
                }
                RunOutcome::Cancelled => return Err(HealError::Cancelled),
                RunOutcome::Failed(next) if attempt >= MAX_ATTEMPTS => {
                    eprintln!(
                        "\n{} Command still failing after {} attempts: {}",
                        style("✗").red().bold(),
                        MAX_ATTEMPTS,
                        next
                    );
                    return Ok(HealOutcome::PersistentFailure {
                        attempts: attempt,
                        last_error: next,
                    });
                }
                RunOutcome::Failed(next) => {
                    eprintln!(
                        "\n{} Command failed again. Retrying (attempt {}/{})...",
                        style("!").yellow(),
                        attempt + 1,
                        MAX_ATTEMPTS
                    );
                    error = next;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::model::AssistantReply;
    use crate::agent::testing::{call, tool_turn, ScriptedModel};
    use crate::agent::tools::ToolBox;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tempfile::tempdir;

    struct FakeGate {
        accept: bool,
        reviews: Mutex<Vec<Review>>,
    }

    impl FakeGate {
        fn new(accept: bool) -> Arc<Self> {
            Arc::new(Self {
                accept,
                reviews: Mutex::new(Vec::new()),
            })
        }
    }

    impl ConfirmGate for FakeGate {
        fn confirm(&self, review: &Review) -> anyhow::Result<bool> {
            self.reviews.lock().push(review.clone());
            Ok(self.accept)
        }
    }

    /// Fails with "still broken" once the script runs out
    #[derive(Default)]
    struct FakeRunner {
        script: Mutex<VecDeque<RunOutcome>>,
        runs: Mutex<Vec<Vec<String>>>,
    }

    impl FakeRunner {
        fn new(script: Vec<RunOutcome>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                runs: Mutex::default(),
            })
        }
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(&self, argv: &[String], _cancel: &CancellationToken) -> RunOutcome {
            self.runs.lock().push(argv.to_vec());
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| RunOutcome::Failed("still broken".to_string()))
        }
    }

    fn argv() -> Vec<String> {
        vec!["npm".to_string(), "run".to_string(), "dev".to_string()]
    }

    fn healer(model: Arc<ScriptedModel>, gate: Arc<FakeGate>, runner: Arc<FakeRunner>, root: &Path) -> Healer {
        let agent = Agent::new(model, ToolBox::new(root, None));
        Healer::new(agent, gate, runner, root)
    }

    #[tokio::test]
    async fn test_persistent_failure_stops_after_three_runs() {
        let dir = tempdir().unwrap();
        let model = Arc::new(ScriptedModel::repeating(AssistantReply::text("Try restarting.")));
        let gate = FakeGate::new(true);
        let runner = FakeRunner::new(vec![]);

        let outcome = healer(model.clone(), gate.clone(), runner.clone(), dir.path())
            .heal(&argv(), "connection refused")
            .await
            .unwrap();

        assert_eq!(
            outcome,
            HealOutcome::PersistentFailure {
                attempts: 3,
                last_error: "still broken".into(),
            }
        );
        assert_eq!(runner.runs.lock().len(), MAX_ATTEMPTS);
        assert!(runner.runs.lock().iter().all(|r| *r == argv()));
        assert_eq!(model.calls(), MAX_ATTEMPTS);
        assert_eq!(gate.reviews.lock().len(), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_rejection_writes_nothing_and_runs_nothing() {
        let dir = tempdir().unwrap();
        let model = Arc::new(ScriptedModel::new(vec![
            tool_turn(vec![call("w", "write_file", r#"{"path":"src/index.ts","content":"fixed"}"#)]),
            AssistantReply::text("Rewrote the entry point."),
        ]));
        let gate = FakeGate::new(false);
        let runner = FakeRunner::new(vec![]);

        let outcome = healer(model, gate.clone(), runner.clone(), dir.path())
            .heal(&argv(), "SyntaxError: unexpected token")
            .await
            .unwrap();

        assert_eq!(outcome, HealOutcome::Rejected);
        assert!(runner.runs.lock().is_empty());
        assert!(!dir.path().join("src").exists());

        let review = &gate.reviews.lock()[0];
        assert_eq!(review.category, ErrorCategory::Code);
        assert_eq!(review.proposal, "Rewrote the entry point.");
        assert_eq!(review.preview, "--- src/index.ts ---\n+ fixed\n\n");
    }

    #[tokio::test]
    async fn test_recovers_on_second_attempt() {
        let dir = tempdir().unwrap();
        let model = Arc::new(ScriptedModel::new(vec![
            AssistantReply::text(""),
            tool_turn(vec![call("w", "write_file", r#"{"path":"config/app.json","content":"{}"}"#)]),
            AssistantReply::text("Added the missing config."),
        ]));
        let gate = FakeGate::new(true);
        let runner = FakeRunner::new(vec![
            RunOutcome::Failed("Error: Cannot find module './config/app.json'".into()),
            RunOutcome::Succeeded,
        ]);

        let outcome = healer(model.clone(), gate.clone(), runner.clone(), dir.path())
            .heal(&argv(), "401 Unauthorized")
            .await
            .unwrap();

        assert_eq!(outcome, HealOutcome::Recovered { attempts: 2 });
        assert_eq!(std::fs::read_to_string(dir.path().join("config/app.json")).unwrap(), "{}");

        let reviews = gate.reviews.lock();
        assert_eq!(reviews[0].category, ErrorCategory::Auth);
        assert_eq!(reviews[0].proposal, NO_PROPOSAL);
        assert_eq!(reviews[1].category, ErrorCategory::Code);

        // Second diagnosis is about the new error
        let second_intent = model.transcripts.lock()[1][1].text();
        assert!(second_intent.contains("Cannot find module"));
        assert!(second_intent.contains("Error category: code"));
    }

    #[tokio::test]
    async fn test_diagnosis_failure_is_an_error() {
        let dir = tempdir().unwrap();
        let model = Arc::new(ScriptedModel::new(vec![]));
        let runner = FakeRunner::new(vec![]);

        let err = healer(model, FakeGate::new(true), runner.clone(), dir.path())
            .heal(&argv(), "boom")
            .await
            .unwrap_err();

        assert!(matches!(err, HealError::Diagnosis(_)));
        assert!(err.to_string().starts_with("AI diagnosis failed"));
        assert!(runner.runs.lock().is_empty());
    }

    #[tokio::test]
    async fn test_empty_command_is_rejected() {
        let dir = tempdir().unwrap();
        let model = Arc::new(ScriptedModel::new(vec![]));
        let err = healer(model.clone(), FakeGate::new(true), FakeRunner::new(vec![]), dir.path())
            .heal(&[], "boom")
            .await
            .unwrap_err();
        assert!(matches!(err, HealError::NoCommand));
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn test_failed_write_does_not_stop_others() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("blocker"), "a file, not a directory").unwrap();

        let failures = apply_edits(
            dir.path(),
            &[
                FileEdit {
                    path: "blocker/inner.txt".into(),
                    content: "x".into(),
                },
                FileEdit {
                    path: "ok.txt".into(),
                    content: "y".into(),
                },
            ],
        );

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].path, "blocker/inner.txt");
        assert_eq!(std::fs::read_to_string(dir.path().join("ok.txt")).unwrap(), "y");
    }

    #[test]
    fn test_diagnosis_prompt() {
        let prompt = diagnosis_prompt("ECONNRESET\n", ErrorCategory::Infrastructure);
        assert!(prompt.starts_with("The command failed with error: \"ECONNRESET\".\n"));
        assert!(prompt.contains("Error category: infrastructure ("));
        assert!(prompt.ends_with("Be concise."));
    }
}
