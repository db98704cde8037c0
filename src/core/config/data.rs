use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::chat_stream::{RequestBinding, RetryPolicy};
use crate::core::provider::{ProviderKind, DEFAULT_SYSTEM_PROMPT};
use crate::core::relay::CredentialMode;

pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:3000/api/converse";
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub relay: RelayConfig,
    pub client: ClientConfig,
}

/// Server-side settings for `chatrelay serve`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Socket address the relay listens on
    pub bind: String,
    pub provider: ProviderKind,
    /// Upstream API base URL; defaults to the provider's public endpoint
    pub upstream_url: Option<String>,
    pub model: Option<String>,
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
    /// Where the upstream credential comes from
    pub credential: CredentialMode,
    /// Keep the upstream status on failures instead of answering 400
    pub forward_upstream_status: bool,
    pub connect_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            provider: ProviderKind::default(),
            upstream_url: None,
            model: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            system_prompt: None,
            credential: CredentialMode::default(),
            forward_upstream_status: false,
            connect_timeout_secs: 10,
        }
    }
}

impl RelayConfig {
    pub fn upstream_url(&self) -> &str {
        self.upstream_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
    }

    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    pub fn system_prompt(&self) -> &str {
        self.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

/// Settings for the `say` and `chat` front ends.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub relay_url: String,
    /// Upstream dialect the relay forwards; decides how fragments are read
    pub provider: ProviderKind,
    pub temperature: f64,
    pub method: RequestBinding,
    pub model: Option<String>,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
    /// Give up after this many reconnects; unlimited when unset
    pub max_attempts: Option<u32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            provider: ProviderKind::default(),
            temperature: DEFAULT_TEMPERATURE,
            method: RequestBinding::default(),
            model: None,
            retry_initial_ms: retry.initial_delay.as_millis() as u64,
            retry_max_ms: retry.max_delay.as_millis() as u64,
            max_attempts: retry.max_attempts,
        }
    }
}

impl ClientConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(self.retry_initial_ms),
            max_delay: Duration::from_millis(self.retry_max_ms),
            max_attempts: self.max_attempts,
        }
    }
}

impl Config {
    /// Applies environment overrides. `lookup` is `std::env::var` outside tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("CHATRELAY_UPSTREAM_URL").or_else(|| lookup("OPENAI_BASE_URL")) {
            self.relay.upstream_url = Some(url);
        }
        if let Some(model) = lookup("CHATRELAY_MODEL") {
            self.relay.model = Some(model);
        }
        if let Some(bind) = lookup("CHATRELAY_BIND") {
            self.relay.bind = bind;
        }
        if let Some(url) = lookup("CHATRELAY_RELAY_URL") {
            self.client.relay_url = url;
        }
    }
}

pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
