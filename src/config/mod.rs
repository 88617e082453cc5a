//! Environment configuration for the relay server and the terminal client.
//!
//! Both configs are read once at startup. `from_env` reads the process
//! environment; `from_lookup` takes any key lookup so callers (and tests)
//! can supply values without touching the environment.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::llm::Provider;
use crate::llm::dispatcher::DEFAULT_SYSTEM_PROMPT;

pub const BIND_ENV: &str = "RELAYCHAT_BIND";
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const OPENAI_BASE_URL_ENV: &str = "OPENAI_BASE_URL";
pub const OLLAMA_HOST_ENV: &str = "OLLAMA_HOST";
pub const DATA_DIR_ENV: &str = "RELAYCHAT_DATA_DIR";

pub const ENDPOINT_ENV: &str = "RELAYCHAT_ENDPOINT";
pub const MODEL_ENV: &str = "CHATBOT_MODEL_NAME";
pub const PROVIDER_ENV: &str = "RELAYCHAT_PROVIDER";
pub const SYSTEM_PROMPT_ENV: &str = "RELAYCHAT_SYSTEM_PROMPT";

pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:3000/api/chat";
pub const DEFAULT_MODEL: &str = "llama3";
pub const DEFAULT_PROVIDER: Provider = Provider::Ollama;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{key} is not a valid socket address: {value}")]
    InvalidBind { key: &'static str, value: String },

    #[error("{key}: unknown provider {value:?} (expected openai or ollama)")]
    InvalidProvider { key: &'static str, value: String },

    #[error("{key} must be an http:// or https:// URL, got {value:?}")]
    InvalidUrl { key: &'static str, value: String },

    #[error("{key} must not be empty")]
    Empty { key: &'static str },
}

/// Unset and empty variables are treated alike.
fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
}

fn check_url(key: &'static str, value: String) -> Result<String, ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(value)
    } else {
        Err(ConfigError::InvalidUrl { key, value })
    }
}

/// Settings for `relaychat-server`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Without a key, OpenAI requests are answered with 500.
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    /// Without a host, Ollama requests are answered with 500.
    pub ollama_host: Option<String>,
    /// Enables the JSON-lines record store under this directory.
    pub data_dir: Option<PathBuf>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_value = non_empty(lookup(BIND_ENV)).unwrap_or_else(|| DEFAULT_BIND.to_owned());
        let bind = bind_value.parse::<SocketAddr>().map_err(|_| ConfigError::InvalidBind {
            key: BIND_ENV,
            value: bind_value.clone(),
        })?;

        let openai_base_url = match non_empty(lookup(OPENAI_BASE_URL_ENV)) {
            Some(url) => check_url(OPENAI_BASE_URL_ENV, url)?,
            None => DEFAULT_OPENAI_BASE_URL.to_owned(),
        };
        let ollama_host = non_empty(lookup(OLLAMA_HOST_ENV))
            .map(|host| check_url(OLLAMA_HOST_ENV, host))
            .transpose()?;

        Ok(Self {
            bind,
            openai_api_key: non_empty(lookup(OPENAI_API_KEY_ENV)),
            openai_base_url,
            ollama_host,
            data_dir: non_empty(lookup(DATA_DIR_ENV)).map(PathBuf::from),
        })
    }
}

/// Settings for the `relaychat` terminal client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub endpoint: String,
    pub model: String,
    pub provider: Provider,
    pub system_prompt: String,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let endpoint = non_empty(lookup(ENDPOINT_ENV)).unwrap_or_else(|| DEFAULT_ENDPOINT.to_owned());
        let provider = match non_empty(lookup(PROVIDER_ENV)) {
            Some(value) => parse_provider(PROVIDER_ENV, &value)?,
            None => DEFAULT_PROVIDER,
        };

        Self {
            endpoint,
            model: non_empty(lookup(MODEL_ENV)).unwrap_or_else(|| DEFAULT_MODEL.to_owned()),
            provider,
            system_prompt: lookup(SYSTEM_PROMPT_ENV)
                .filter(|prompt| !prompt.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_owned()),
        }
        .validated()
    }

    /// Re-checks the settings after command-line overrides were applied.
    pub fn validated(self) -> Result<Self, ConfigError> {
        let endpoint = check_url(ENDPOINT_ENV, self.endpoint)?;
        if self.model.trim().is_empty() {
            return Err(ConfigError::Empty { key: MODEL_ENV });
        }
        Ok(Self { endpoint, ..self })
    }
}

pub fn parse_provider(key: &'static str, value: &str) -> Result<Provider, ConfigError> {
    value.parse::<Provider>().map_err(|_| ConfigError::InvalidProvider {
        key,
        value: value.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn server_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind, "127.0.0.1:3000".parse().unwrap());
        assert_eq!(config.openai_base_url, DEFAULT_OPENAI_BASE_URL);
        assert_eq!(config.openai_api_key, None);
        assert_eq!(config.ollama_host, None);
        assert_eq!(config.data_dir, None);
    }

    #[test]
    fn server_reads_values() {
        let config = ServerConfig::from_lookup(lookup(&[
            (BIND_ENV, "0.0.0.0:8080"),
            (OPENAI_API_KEY_ENV, "sk-abc"),
            (OLLAMA_HOST_ENV, "http://localhost:11434"),
            (DATA_DIR_ENV, "/var/lib/relaychat"),
        ]))
        .unwrap();
        assert_eq!(config.bind.port(), 8080);
        assert_eq!(config.openai_api_key.as_deref(), Some("sk-abc"));
        assert_eq!(config.ollama_host.as_deref(), Some("http://localhost:11434"));
        assert_eq!(config.data_dir, Some(PathBuf::from("/var/lib/relaychat")));
    }

    #[test]
    fn empty_key_counts_as_unset() {
        let config = ServerConfig::from_lookup(lookup(&[(OPENAI_API_KEY_ENV, "  ")])).unwrap();
        assert_eq!(config.openai_api_key, None);
    }

    #[test]
    fn server_rejects_bad_values() {
        let err = ServerConfig::from_lookup(lookup(&[(BIND_ENV, "localhost")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBind { .. }));

        let err = ServerConfig::from_lookup(lookup(&[(OLLAMA_HOST_ENV, "localhost:11434")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { key: OLLAMA_HOST_ENV, .. }));
    }

    #[test]
    fn client_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.model, "llama3");
        assert_eq!(config.provider, Provider::Ollama);
        assert_eq!(config.system_prompt, DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn client_reads_values() {
        let config = ClientConfig::from_lookup(lookup(&[
            (ENDPOINT_ENV, "https://relay.example/api/chat"),
            (MODEL_ENV, "gpt-4o"),
            (PROVIDER_ENV, "openai"),
            (SYSTEM_PROMPT_ENV, "Answer in French."),
        ]))
        .unwrap();
        assert_eq!(config.provider, Provider::OpenAi);
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.system_prompt, "Answer in French.");
    }

    #[test]
    fn client_rejects_bad_values() {
        let err = ClientConfig::from_lookup(lookup(&[(PROVIDER_ENV, "claude")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidProvider {
                key: PROVIDER_ENV,
                value: "claude".into()
            }
        );

        let err = ClientConfig::from_lookup(lookup(&[(ENDPOINT_ENV, "relay:3000")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    }

    #[test]
    fn overrides_are_revalidated() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        let err = ClientConfig {
            model: " ".into(),
            ..config
        }
        .validated()
        .unwrap_err();
        assert_eq!(err, ConfigError::Empty { key: MODEL_ENV });
    }
}
