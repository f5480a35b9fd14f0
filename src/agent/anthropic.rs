// Anthropic Messages API provider

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::agent::model::{self, AssistantReply, ChatModel, Message, ModelError, Part, Role, ToolCall, ToolSpec};

const API_VERSION: &str = "2023-06-01";

/// Messages API requires an output cap
const MAX_TOKENS: u32 = 4096;

pub struct AnthropicModel {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl AnthropicModel {
    pub fn new(base_url: &str, api_key: String, model: String, timeout: Duration) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }
}

#[async_trait]
impl ChatModel for AnthropicModel {
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<AssistantReply, ModelError> {
        let body = messages_body(&self.model, messages, tools);
        let url = format!("{}/messages", self.base_url);
        debug!("POST {} ({} messages)", url, messages.len());

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ModelError::Status {
                label: "Anthropic API",
                status: status.as_u16(),
                message: model::error_message(&text),
            });
        }

        parse_messages_response(&text)
    }
}

/// Request body: system text is lifted out and tool results ride in user turns
pub fn messages_body(model: &str, messages: &[Message], tools: &[ToolSpec]) -> Value {
    let mut system = Vec::new();
    let mut turns: Vec<(&'static str, Vec<Value>)> = Vec::new();

    for message in messages {
        let role = match message.role {
            Role::System => {
                system.extend(message.parts.iter().filter_map(|p| match p {
                    Part::Text(t) => Some(t.as_str()),
                    _ => None,
                }));
                continue;
            }
            Role::Assistant => "assistant",
            Role::Human | Role::Tool => "user",
        };

        let blocks: Vec<Value> = message.parts.iter().filter_map(content_block).collect();
        if blocks.is_empty() {
            continue;
        }
        // Consecutive turns of one role are merged
        match turns.last_mut() {
            Some((last, content)) if *last == role => content.extend(blocks),
            _ => turns.push((role, blocks)),
        }
    }

    let mut body = json!({
        "model": model,
        "max_tokens": MAX_TOKENS,
        "messages": turns
            .into_iter()
            .map(|(role, content)| json!({ "role": role, "content": content }))
            .collect::<Vec<_>>(),
    });
    if !system.is_empty() {
        body["system"] = json!(system.join("\n\n"));
    }
    if !tools.is_empty() {
        body["tools"] = Value::Array(
            tools
                .iter()
                .map(|t| json!({ "name": t.name, "description": t.description, "input_schema": t.parameters }))
                .collect(),
        );
    }
    body
}

fn content_block(part: &Part) -> Option<Value> {
    match part {
        Part::Text(text) if text.is_empty() => None,
        Part::Text(text) => Some(json!({ "type": "text", "text": text })),
        Part::ToolCall(call) => {
            let input = serde_json::from_str::<Value>(&call.arguments)
                .ok()
                .filter(Value::is_object)
                .unwrap_or_else(|| Value::Object(Map::new()));
            Some(json!({ "type": "tool_use", "id": call.id, "name": call.name, "input": input }))
        }
        Part::ToolResult(result) => Some(json!({
            "type": "tool_result",
            "tool_use_id": result.tool_call_id,
            "content": result.content,
        })),
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

pub fn parse_messages_response(body: &str) -> Result<AssistantReply, ModelError> {
    let response: MessagesResponse =
        serde_json::from_str(body).map_err(|e| ModelError::Malformed(format!("parse response: {}", e)))?;

    let mut reply = AssistantReply::default();
    for block in response.content {
        match block {
            ContentBlock::Text { text } => reply.text.push_str(&text),
            ContentBlock::ToolUse { id, name, input } => {
                let arguments = if input.is_null() { "{}".to_string() } else { input.to_string() };
                reply.tool_calls.push(ToolCall { id, name, arguments });
            }
            ContentBlock::Other => {}
        }
    }
    Ok(reply)
}
