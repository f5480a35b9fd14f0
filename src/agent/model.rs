// Conversation types and the model collaborator seam

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{label} error ({status}): {message}")]
    Status {
        label: &'static str,
        status: u16,
        message: String,
    },

    #[error("malformed model response: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    Human,
    Assistant,
    Tool,
}

impl Role {
    /// Chat-completions role name
    pub fn wire_name(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::Human => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON object text as produced by the model
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text(String),
    ToolCall(ToolCall),
    ToolResult(ToolResult),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            parts: vec![Part::Text(text.into())],
        }
    }

    pub fn human(text: impl Into<String>) -> Self {
        Self {
            role: Role::Human,
            parts: vec![Part::Text(text.into())],
        }
    }

    pub fn assistant(reply: &AssistantReply) -> Self {
        let mut parts = Vec::with_capacity(reply.tool_calls.len() + 1);
        if !reply.text.is_empty() {
            parts.push(Part::Text(reply.text.clone()));
        }
        parts.extend(reply.tool_calls.iter().cloned().map(Part::ToolCall));

        Self {
            role: Role::Assistant,
            parts,
        }
    }

    pub fn tool(result: ToolResult) -> Self {
        Self {
            role: Role::Tool,
            parts: vec![Part::ToolResult(result)],
        }
    }

    /// Concatenated text parts
    #[cfg(test)]
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text(t) => Some(t.as_str()),
                Part::ToolResult(r) => Some(r.content.as_str()),
                Part::ToolCall(_) => None,
            })
            .collect()
    }

    /// Chat-completions message object
    pub fn to_wire(&self) -> Value {
        let mut msg = json!({ "role": self.role.wire_name() });

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for part in &self.parts {
            match part {
                Part::Text(t) => text.push_str(t),
                Part::ToolCall(call) => tool_calls.push(json!({
                    "id": call.id,
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": call.arguments,
                    },
                })),
                Part::ToolResult(result) => {
                    msg["tool_call_id"] = json!(result.tool_call_id);
                    text.push_str(&result.content);
                }
            }
        }

        if self.role != Role::Assistant || !text.is_empty() {
            msg["content"] = json!(text);
        }
        if !tool_calls.is_empty() {
            msg["tool_calls"] = Value::Array(tool_calls);
        }
        msg
    }
}

/// A tool the model may call
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    /// JSON schema of the arguments object
    pub parameters: Value,
}

impl ToolSpec {
    pub fn to_wire(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            },
        })
    }
}

/// One model turn: text, tool calls, or both
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssistantReply {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

impl AssistantReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }
}

/// Sends a transcript and the tool catalogue, returns the next assistant turn
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<AssistantReply, ModelError>;
}

/// Request body shared by the chat-completions style providers
pub fn request_body(messages: &[Message], tools: &[ToolSpec]) -> Value {
    let mut body = json!({
        "messages": messages.iter().map(Message::to_wire).collect::<Vec<_>>(),
    });
    if !tools.is_empty() {
        body["tools"] = Value::Array(tools.iter().map(ToolSpec::to_wire).collect());
    }
    body
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
}

/// `error.message` from a JSON error body, else the raw body
pub fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .map(|b| b.error.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.trim().to_string())
}
