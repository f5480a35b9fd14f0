// OpenAI-compatible chat completions provider

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::agent::model::{self, AssistantReply, ChatModel, Message, ModelError, ToolCall, ToolSpec};

pub struct OpenAiModel {
    client: reqwest::Client,
    url: String,
    api_key: String,
    flavor: Flavor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Flavor {
    /// Bearer auth, model named in the body
    OpenAi { model: String },
    /// `api-key` auth, the deployment in the URL picks the model
    Azure,
}

impl OpenAiModel {
    pub fn new(base_url: &str, api_key: String, model: String, timeout: Duration) -> Result<Self, ModelError> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            flavor: Flavor::OpenAi { model },
        })
    }

    /// Azure OpenAI deployment of the same API
    pub fn azure(
        endpoint: &str,
        api_key: String,
        deployment: &str,
        api_version: &str,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            url: azure_completions_url(endpoint, deployment, api_version),
            api_key,
            flavor: Flavor::Azure,
        })
    }
}

fn azure_completions_url(endpoint: &str, deployment: &str, api_version: &str) -> String {
    format!(
        "{}/openai/deployments/{}/chat/completions?api-version={}",
        endpoint.trim_end_matches('/'),
        deployment,
        api_version
    )
}

#[async_trait]
impl ChatModel for OpenAiModel {
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<AssistantReply, ModelError> {
        let mut body = model::request_body(messages, tools);
        debug!("POST {} ({} messages)", self.url, messages.len());

        let request = match &self.flavor {
            Flavor::OpenAi { model } => {
                body["model"] = serde_json::json!(model);
                self.client
                    .post(&self.url)
                    .header("Authorization", format!("Bearer {}", self.api_key))
            }
            Flavor::Azure => self.client.post(&self.url).header("api-key", &self.api_key),
        };
        let response = request.json(&body).send().await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ModelError::Status {
                label: match self.flavor {
                    Flavor::OpenAi { .. } => "OpenAI API",
                    Flavor::Azure => "Azure OpenAI API",
                },
                status: status.as_u16(),
                message: model::error_message(&text),
            });
        }

        parse_chat_completion(&text)
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

/// Reply from the first choice of a chat completion
pub fn parse_chat_completion(body: &str) -> Result<AssistantReply, ModelError> {
    let completion: ChatCompletion =
        serde_json::from_str(body).map_err(|e| ModelError::Malformed(format!("parse response: {}", e)))?;

    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ModelError::Malformed("no choices in response".to_string()))?;

    Ok(AssistantReply {
        text: choice.message.content.unwrap_or_default(),
        tool_calls: choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_reply() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"All good."}}]}"#;
        assert_eq!(parse_chat_completion(body).unwrap(), AssistantReply::text("All good."));
    }

    #[test]
    fn test_parse_tool_calls() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":null,"tool_calls":[
            {"id":"call_a","type":"function","function":{"name":"list_dir","arguments":"{\"path\":\".\"}"}},
            {"id":"call_b","type":"function","function":{"name":"read_file","arguments":"{\"path\":\"go.mod\"}"}}
        ]}}]}"#;

        let reply = parse_chat_completion(body).unwrap();
        assert_eq!(reply.text, "");
        assert_eq!(reply.tool_calls.len(), 2);
        assert_eq!(reply.tool_calls[0].name, "list_dir");
        assert_eq!(reply.tool_calls[1].id, "call_b");
        assert_eq!(reply.tool_calls[1].arguments, r#"{"path":"go.mod"}"#);
    }

    #[test]
    fn test_endpoints() {
        let timeout = Duration::from_secs(5);
        let openai = OpenAiModel::new("https://api.openai.com/v1/", "sk".into(), "gpt-4o-mini".into(), timeout).unwrap();
        assert_eq!(openai.url, "https://api.openai.com/v1/chat/completions");
        assert_eq!(openai.flavor, Flavor::OpenAi { model: "gpt-4o-mini".into() });

        let azure =
            OpenAiModel::azure("https://shop.openai.azure.com/", "k".into(), "assistant", "2024-04-01-preview", timeout)
                .unwrap();
        assert_eq!(
            azure.url,
            "https://shop.openai.azure.com/openai/deployments/assistant/chat/completions?api-version=2024-04-01-preview"
        );
        assert_eq!(azure.flavor, Flavor::Azure);
    }

    #[test]
    fn test_parse_rejects_empty_and_invalid() {
        assert!(matches!(
            parse_chat_completion(r#"{"choices":[]}"#),
            Err(ModelError::Malformed(_))
        ));
        assert!(matches!(parse_chat_completion("<html>"), Err(ModelError::Malformed(_))));
    }
}
