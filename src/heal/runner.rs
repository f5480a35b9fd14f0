// Command execution for the initial run and healing re-runs

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::heal::HEALING_ENV;

/// Stderr kept for the error text of a failed run
const MAX_CAPTURED_STDERR: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    /// Holds the error text handed to the next diagnosis
    Failed(String),
    Cancelled,
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `argv` with inherited stdio
    async fn run(&self, argv: &[String], cancel: &CancellationToken) -> RunOutcome;
}

/// Runs real child processes in a fixed working directory
pub struct ProcessRunner {
    cwd: PathBuf,
}

impl ProcessRunner {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self { cwd: cwd.into() }
    }

    fn command(&self, argv: &[String]) -> Option<Command> {
        let (program, args) = argv.split_first()?;
        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&self.cwd)
            .env(HEALING_ENV, "1")
            .kill_on_drop(true);
        Some(command)
    }

    /// Like `run`, but stderr is echoed and also captured as the error text
    pub async fn run_capturing(&self, argv: &[String], cancel: &CancellationToken) -> RunOutcome {
        let Some(mut command) = self.command(argv) else {
            return RunOutcome::Failed("no command given".to_string());
        };
        command.stdin(Stdio::inherit()).stdout(Stdio::inherit()).stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => return RunOutcome::Failed(format!("failed to start {}: {}", argv[0], e)),
        };

        let capture = capture_stderr(child.stderr.take());
        let (status, captured) = tokio::join!(wait_or_kill(&mut child, cancel), capture);
        match status {
            None => RunOutcome::Cancelled,
            Some(Ok(status)) if status.success() => RunOutcome::Succeeded,
            Some(Ok(status)) => {
                let captured = captured.trim();
                if captured.is_empty() {
                    RunOutcome::Failed(describe_exit(status))
                } else {
                    RunOutcome::Failed(captured.to_string())
                }
            }
            Some(Err(e)) => RunOutcome::Failed(format!("failed to wait for {}: {}", argv[0], e)),
        }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, argv: &[String], cancel: &CancellationToken) -> RunOutcome {
        let Some(mut command) = self.command(argv) else {
            return RunOutcome::Failed("no command given".to_string());
        };
        command.stdin(Stdio::inherit()).stdout(Stdio::inherit()).stderr(Stdio::inherit());

        debug!("Running {:?} in {}", argv, self.cwd.display());
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => return RunOutcome::Failed(format!("failed to start {}: {}", argv[0], e)),
        };

        match wait_or_kill(&mut child, cancel).await {
            None => RunOutcome::Cancelled,
            Some(Ok(status)) if status.success() => RunOutcome::Succeeded,
            Some(Ok(status)) => RunOutcome::Failed(describe_exit(status)),
            Some(Err(e)) => RunOutcome::Failed(format!("failed to wait for {}: {}", argv[0], e)),
        }
    }
}

/// Echo the child's stderr byte for byte and keep its tail as text.
///
/// Reads until EOF even past undecodable or failed reads so the child never
/// sees a closed pipe.
async fn capture_stderr<R: AsyncRead + Unpin>(stderr: Option<R>) -> String {
    let mut captured = String::new();
    let Some(stderr) = stderr else {
        return captured;
    };
    let mut echo = tokio::io::stderr();
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let _ = echo.write_all(&buf).await;
                captured.push_str(&String::from_utf8_lossy(&buf));
                if captured.len() > MAX_CAPTURED_STDERR {
                    let cut = captured.len() - MAX_CAPTURED_STDERR;
                    let cut = (cut..captured.len()).find(|i| captured.is_char_boundary(*i)).unwrap_or(0);
                    captured.drain(..cut);
                }
            }
            Err(e) => {
                debug!("Reading child stderr failed: {}", e);
                // Keep the pipe open and drained
                let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
                break;
            }
        }
    }
    let _ = echo.flush().await;
    captured
}

/// `None` when cancelled; the child is killed first
async fn wait_or_kill(child: &mut Child, cancel: &CancellationToken) -> Option<std::io::Result<ExitStatus>> {
    tokio::select! {
        status = child.wait() => Some(status),
        _ = cancel.cancelled() => {
            debug!("Killing child process");
            let _ = child.kill().await;
            None
        }
    }
}

fn describe_exit(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit status {}", code),
        None => "terminated by signal".to_string(),
    }
}
