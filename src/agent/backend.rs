// Hosted AI proxy provider, authenticated with an account API key

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::agent::model::{self, AssistantReply, ChatModel, Message, ModelError, ToolCall, ToolSpec};

const COMPLETE_PATH: &str = "/api/v1/cli/ai/complete";

pub struct BackendModel {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl BackendModel {
    pub fn new(base_url: &str, api_key: String, timeout: Duration) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl ChatModel for BackendModel {
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<AssistantReply, ModelError> {
        let url = format!("{}{}", self.base_url, COMPLETE_PATH);
        debug!("POST {} ({} messages)", url, messages.len());

        let response = self
            .client
            .post(&url)
            .header("X-API-Key", &self.api_key)
            .json(&model::request_body(messages, tools))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if status.as_u16() != 200 {
            return Err(ModelError::Status {
                label: "AI proxy",
                status: status.as_u16(),
                message: model::error_message(&text),
            });
        }

        parse_proxy_response(&text)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProxyResponse {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<ProxyToolCall>,
}

#[derive(Deserialize)]
struct ProxyToolCall {
    id: String,
    name: String,
    #[serde(default)]
    arguments: String,
}

pub fn parse_proxy_response(body: &str) -> Result<AssistantReply, ModelError> {
    let response: ProxyResponse =
        serde_json::from_str(body).map_err(|e| ModelError::Malformed(format!("parse response: {}", e)))?;

    Ok(AssistantReply {
        text: response.content,
        tool_calls: response
            .tool_calls
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.name,
                arguments: tc.arguments,
            })
            .collect(),
    })
}
