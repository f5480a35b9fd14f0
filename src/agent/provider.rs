// Model provider selection from configuration and environment

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::agent::anthropic::AnthropicModel;
use crate::agent::backend::BackendModel;
use crate::agent::model::ChatModel;
use crate::agent::openai::OpenAiModel;
use crate::config::{AgentConfig, ProviderKind};

const AZURE_ENDPOINT: &str = "AZURE_OPENAI_ENDPOINT";
const AZURE_API_KEY: &str = "AZURE_OPENAI_API_KEY";
/// Deployment variables, in lookup order
const AZURE_DEPLOYMENTS: [&str; 2] = ["AZURE_OPENAI_DEPLOYMENT_ASSISTANT", "AZURE_OPENAI_DEPLOYMENT_VISION"];
const AZURE_API_VERSION: &str = "AZURE_OPENAI_API_VERSION";
const DEFAULT_AZURE_DEPLOYMENT: &str = "gpt-4o-mini";
const DEFAULT_AZURE_API_VERSION: &str = "2024-04-01-preview";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderChoice {
    Azure {
        endpoint: String,
        api_key: String,
        deployment: String,
        api_version: String,
    },
    Anthropic { api_key: String },
    OpenAi { api_key: String },
    Backend { api_key: String },
}

/// Decide which provider to use; `lookup` reads an environment variable
pub fn choose_provider(config: &AgentConfig, lookup: impl Fn(&str) -> Option<String>) -> Result<ProviderChoice> {
    let key = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    let azure = || {
        let endpoint = key(AZURE_ENDPOINT)?;
        let api_key = key(AZURE_API_KEY)?;
        Some(ProviderChoice::Azure {
            endpoint,
            api_key,
            deployment: AZURE_DEPLOYMENTS
                .iter()
                .find_map(|name| key(*name))
                .unwrap_or_else(|| DEFAULT_AZURE_DEPLOYMENT.to_string()),
            api_version: key(AZURE_API_VERSION).unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
        })
    };
    let anthropic = || key(&config.anthropic_api_key_env).map(|api_key| ProviderChoice::Anthropic { api_key });
    let openai = || key(&config.openai_api_key_env).map(|api_key| ProviderChoice::OpenAi { api_key });
    let backend = || key(&config.backend_api_key_env).map(|api_key| ProviderChoice::Backend { api_key });

    let choice = match config.provider {
        ProviderKind::Auto => azure().or_else(anthropic).or_else(openai).or_else(backend),
        ProviderKind::Azure => azure(),
        ProviderKind::Anthropic => anthropic(),
        ProviderKind::OpenAi => openai(),
        ProviderKind::Backend => backend(),
    };

    choice.ok_or_else(|| {
        let azure_vars = format!("{} + {}", AZURE_ENDPOINT, AZURE_API_KEY);
        let wanted = match config.provider {
            ProviderKind::Auto => format!(
                "{}, or {}, or {}, or {}",
                azure_vars, config.anthropic_api_key_env, config.openai_api_key_env, config.backend_api_key_env
            ),
            ProviderKind::Azure => azure_vars,
            ProviderKind::Anthropic => config.anthropic_api_key_env.clone(),
            ProviderKind::OpenAi => config.openai_api_key_env.clone(),
            ProviderKind::Backend => config.backend_api_key_env.clone(),
        };
        anyhow::anyhow!("No API key found. Set {}", wanted)
    })
}

/// Build the configured model client
pub fn select_model(config: &AgentConfig) -> Result<Arc<dyn ChatModel>> {
    let timeout = Duration::from_secs(config.request_timeout_secs);

    let model: Arc<dyn ChatModel> = match choose_provider(config, |name| std::env::var(name).ok())? {
        ProviderChoice::Azure {
            endpoint,
            api_key,
            deployment,
            api_version,
        } => {
            info!("Using Azure OpenAI deployment {} at {}", deployment, endpoint);
            Arc::new(
                OpenAiModel::azure(&endpoint, api_key, &deployment, &api_version, timeout)
                    .context("Failed to initialize model client")?,
            )
        }
        ProviderChoice::Anthropic { api_key } => {
            info!("Using Anthropic model {}", config.anthropic_model);
            Arc::new(
                AnthropicModel::new(&config.anthropic_base_url, api_key, config.anthropic_model.clone(), timeout)
                    .context("Failed to initialize model client")?,
            )
        }
        ProviderChoice::OpenAi { api_key } => {
            info!("Using OpenAI-compatible provider at {}", config.openai_base_url);
            Arc::new(
                OpenAiModel::new(&config.openai_base_url, api_key, config.model.clone(), timeout)
                    .context("Failed to initialize model client")?,
            )
        }
        ProviderChoice::Backend { api_key } => {
            info!("Using AI proxy at {}", config.backend_url);
            Arc::new(BackendModel::new(&config.backend_url, api_key, timeout).context("Failed to initialize model client")?)
        }
    };
    Ok(model)
}
