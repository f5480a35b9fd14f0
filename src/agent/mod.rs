// Tool-calling agent runtime

pub mod anthropic;
pub mod backend;
pub mod model;
pub mod openai;
pub mod provider;
pub mod tools;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use model::{AssistantReply, ChatModel, Message, ModelError, ToolCall, ToolResult, ToolSpec};
use tools::{Tool, ToolBox};

/// Model round-trips allowed per request
pub const MAX_TURNS: usize = 15;

const RESOLVE_PROMPT: &str = "You are the project assistant of a \"Project-Aware\" CLI tool.
Your goal is to help the user understand and modify their project.
You have access to tools to read files, list directories, search for symbols, and write files.
Use these tools to gather information before answering.
If you need to explore the code, start by listing files or searching for relevant symbols.
Be concise and direct.";

const HEALING_PROMPT: &str = "You are the project assistant helping fix a failed command.
Analyze the error and project context. If the fix requires editing files, use the write_file tool.
Use read_file and list_dir to gather context first. Be concise.";

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Model(#[from] ModelError),

    #[error("max turns exceeded")]
    MaxTurnsExceeded,

    #[error("cancelled")]
    Cancelled,

    #[error("model request timed out after {0:?}")]
    DeadlineExceeded(Duration),
}

/// A file write captured instead of applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEdit {
    pub path: String,
    pub content: String,
}

/// Final answer plus any edits captured in healing mode
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Proposal {
    pub text: String,
    pub edits: Vec<FileEdit>,
}

/// Progress notifications for interactive callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentEvent<'a> {
    Thinking { turn: usize },
    ToolInvoked { name: &'a str, arguments: &'a str },
    ToolSucceeded { name: &'a str, output: &'a str },
    ToolFailed { name: &'a str, error: &'a str },
    Answer(&'a str),
}

pub type Reporter = Box<dyn Fn(&AgentEvent<'_>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Resolve,
    Healing,
}

impl Mode {
    fn system_prompt(&self) -> &'static str {
        match self {
            Mode::Resolve => RESOLVE_PROMPT,
            Mode::Healing => HEALING_PROMPT,
        }
    }
}

enum TurnState {
    AwaitingModel,
    ToolsRequested(Vec<ToolCall>),
    ToolsExecuted,
    Done(String),
}

pub struct Agent {
    model: Arc<dyn ChatModel>,
    tools: ToolBox,
    cancel: CancellationToken,
    request_timeout: Option<Duration>,
    reporter: Option<Reporter>,
}

impl Agent {
    pub fn new(model: Arc<dyn ChatModel>, tools: ToolBox) -> Self {
        Self {
            model,
            tools,
            cancel: CancellationToken::new(),
            request_timeout: None,
            reporter: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Upper bound on each individual model call
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Answer a user request, executing every tool call for real
    pub async fn resolve(&self, intent: &str) -> Result<String, AgentError> {
        self.run(Mode::Resolve, intent).await.map(|p| p.text)
    }

    /// Like `resolve`, but `write_file` calls are captured as edits and not
    /// applied
    pub async fn resolve_for_healing(&self, intent: &str) -> Result<Proposal, AgentError> {
        self.run(Mode::Healing, intent).await
    }

    async fn run(&self, mode: Mode, intent: &str) -> Result<Proposal, AgentError> {
        let catalogue = Tool::catalogue();
        let mut transcript = vec![Message::system(mode.system_prompt()), Message::human(intent)];
        let mut edits = Vec::new();
        let mut turns = 0;
        let mut state = TurnState::AwaitingModel;

        loop {
            state = match state {
                TurnState::AwaitingModel => {
                    if turns == MAX_TURNS {
                        warn!("Agent stopped after {} model round-trips", MAX_TURNS);
                        return Err(AgentError::MaxTurnsExceeded);
                    }
                    turns += 1;
                    self.report(AgentEvent::Thinking { turn: turns });

                    let reply = self.call_model(&transcript, &catalogue).await?;
                    debug!("Turn {}: {} tool calls", turns, reply.tool_calls.len());

                    if reply.tool_calls.is_empty() {
                        TurnState::Done(reply.text)
                    } else {
                        transcript.push(Message::assistant(&reply));
                        TurnState::ToolsRequested(reply.tool_calls)
                    }
                }
                TurnState::ToolsRequested(calls) => {
                    for call in calls {
                        let content = self.execute(mode, &call, &mut edits);
                        transcript.push(Message::tool(ToolResult {
                            tool_call_id: call.id,
                            name: call.name,
                            content,
                        }));
                    }
                    TurnState::ToolsExecuted
                }
                TurnState::ToolsExecuted => {
                    if self.cancel.is_cancelled() {
                        return Err(AgentError::Cancelled);
                    }
                    TurnState::AwaitingModel
                }
                TurnState::Done(text) => {
                    self.report(AgentEvent::Answer(&text));
                    return Ok(Proposal { text, edits });
                }
            };
        }
    }

    async fn call_model(
        &self,
        transcript: &[Message],
        catalogue: &[ToolSpec],
    ) -> Result<AssistantReply, AgentError> {
        let request = async {
            let call = self.model.complete(transcript, catalogue);
            match self.request_timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(result) => result.map_err(AgentError::Model),
                    Err(_) => Err(AgentError::DeadlineExceeded(limit)),
                },
                None => call.await.map_err(AgentError::Model),
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AgentError::Cancelled),
            result = request => result,
        }
    }

    fn execute(&self, mode: Mode, call: &ToolCall, edits: &mut Vec<FileEdit>) -> String {
        self.report(AgentEvent::ToolInvoked {
            name: &call.name,
            arguments: &call.arguments,
        });

        let outcome = Tool::parse(&call.name, &call.arguments).and_then(|tool| match (mode, tool) {
            (Mode::Healing, Tool::WriteFile { path, content }) => {
                let ack = tools::write_ack(&path, &content);
                edits.push(FileEdit { path, content });
                Ok(ack)
            }
            (_, tool) => self.tools.run(&tool),
        });

        match outcome {
            Ok(output) => {
                self.report(AgentEvent::ToolSucceeded {
                    name: &call.name,
                    output: &output,
                });
                output
            }
            Err(e) => {
                let error = e.to_string();
                debug!("Tool {} failed: {}", call.name, error);
                self.report(AgentEvent::ToolFailed {
                    name: &call.name,
                    error: &error,
                });
                format!("Error: {}", error)
            }
        }
    }

    fn report(&self, event: AgentEvent<'_>) {
        if let Some(reporter) = &self.reporter {
            reporter(&event);
        }
    }
}
