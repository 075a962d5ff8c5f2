use std::env;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Openrouter,
    Openai,
    Fireworks,
}

impl Provider {
    pub const SUPPORTED: &'static str = "openrouter, openai, fireworks";

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Openrouter => "openrouter",
            Self::Openai => "openai",
            Self::Fireworks => "fireworks",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "openrouter" => Some(Self::Openrouter),
            "openai" => Some(Self::Openai),
            "fireworks" => Some(Self::Fireworks),
            _ => None,
        }
    }
}

pub fn endpoint(provider: Provider) -> &'static str {
    match provider {
        Provider::Openrouter => "https://openrouter.ai/api/v1/chat/completions",
        Provider::Openai => "https://api.openai.com/v1/chat/completions",
        Provider::Fireworks => "https://api.fireworks.ai/inference/v1/chat/completions",
    }
}

pub fn api_key_env(provider: Provider) -> &'static str {
    match provider {
        Provider::Openrouter => "OPENROUTER_API_KEY",
        Provider::Openai => "OPENAI_API_KEY",
        Provider::Fireworks => "FIREWORKS_API_KEY",
    }
}

pub fn is_api_key_present(provider: Provider) -> bool {
    env::var(api_key_env(provider))
        .ok()
        .is_some_and(|value| !value.trim().is_empty())
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{key_env} is not set in the environment")]
    MissingApiKey {
        provider: Provider,
        key_env: &'static str,
    },
    #[error("{} request failed: {source}", .provider.as_str())]
    Request {
        provider: Provider,
        #[source]
        source: reqwest::Error,
    },
    #[error("{} API error {status}: {body}", .provider.as_str())]
    Api {
        provider: Provider,
        status: StatusCode,
        body: String,
    },
    #[error("{} request timed out; giving up after {attempts} attempts", .provider.as_str())]
    RetriesExhausted { provider: Provider, attempts: u32 },
    #[error("{} response did not contain message content", .provider.as_str())]
    EmptyResponse { provider: Provider },
}

/// Single-turn chat completion against a named model.
///
/// Implementations return the raw content of the first choice; callers trim.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, model: &str, prompt: &str) -> Result<String, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::{Provider, api_key_env, endpoint};

    #[test]
    fn provider_names_round_trip() {
        for provider in [Provider::Openrouter, Provider::Openai, Provider::Fireworks] {
            assert_eq!(Provider::from_name(provider.as_str()), Some(provider));
        }
        assert_eq!(Provider::from_name(" OpenRouter "), Some(Provider::Openrouter));
        assert_eq!(Provider::from_name("bad"), None);
    }

    #[test]
    fn openrouter_uses_its_own_endpoint_and_key() {
        assert_eq!(
            endpoint(Provider::Openrouter),
            "https://openrouter.ai/api/v1/chat/completions"
        );
        assert_eq!(api_key_env(Provider::Openrouter), "OPENROUTER_API_KEY");
    }
}
