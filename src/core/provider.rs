//! Upstream provider adaptation.
//!
//! The relay never interprets the upstream stream, but it has to speak the
//! provider's request dialect, and the consumer has to know where the text
//! lives inside each frame. Both halves sit behind [`ProviderStrategy`].

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::{
    ChatMessage, ChatRequest, ChatResponse, CompletionRequest, CompletionResponse,
    UpstreamPayload,
};
use crate::core::message::{Conversation, Speaker};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
const HUMAN_PROMPT: &str = "\n\nHuman:";
const ASSISTANT_PROMPT: &str = "\n\nAssistant:";

#[derive(Debug, Error)]
pub enum FrameDecodeError {
    #[error("frame payload is not a recognised completion chunk: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sampling {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub system_prompt: String,
}

pub trait ProviderStrategy: Send + Sync {
    /// Path appended to the upstream base URL.
    fn endpoint(&self) -> &'static str;

    fn build_upstream_payload(
        &self,
        conversation: &Conversation,
        sampling: &Sampling,
    ) -> UpstreamPayload;

    fn authorize(&self, request: reqwest::RequestBuilder, api_key: &str)
        -> reqwest::RequestBuilder;

    /// Pulls the incremental text out of one frame's data. `Ok(None)` means
    /// the frame was well formed but carried no text.
    fn extract_fragment(&self, data: &str) -> Result<Option<String>, FrameDecodeError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    #[default]
    OpenaiChat,
    AnthropicComplete,
}

impl ProviderKind {
    pub fn strategy(self) -> Arc<dyn ProviderStrategy> {
        match self {
            ProviderKind::OpenaiChat => Arc::new(OpenAiChat),
            ProviderKind::AnthropicComplete => Arc::new(AnthropicComplete),
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderKind::OpenaiChat => "https://api.openai.com/v1",
            ProviderKind::AnthropicComplete => "https://api.anthropic.com/v1",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::OpenaiChat => "gpt-3.5-turbo",
            ProviderKind::AnthropicComplete => "claude-v1",
        }
    }

    /// Environment variable holding the server-side key for this provider.
    pub fn api_key_env(self) -> &'static str {
        match self {
            ProviderKind::OpenaiChat => "OPENAI_API_KEY",
            ProviderKind::AnthropicComplete => "ANTHROPIC_API_KEY",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::OpenaiChat => write!(f, "openai-chat"),
            ProviderKind::AnthropicComplete => write!(f, "anthropic-complete"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "openai-chat" | "openai" => Ok(ProviderKind::OpenaiChat),
            "anthropic-complete" | "anthropic" => Ok(ProviderKind::AnthropicComplete),
            _ => Err(format!("unknown provider: {value}")),
        }
    }
}

/// Role-tagged chat messages with a leading system instruction.
pub struct OpenAiChat;

impl OpenAiChat {
    pub fn messages(conversation: &Conversation, system_prompt: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(conversation.len() + 1);
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: system_prompt.to_string(),
        });
        messages.extend(conversation.history().iter().map(|turn| ChatMessage {
            role: turn.speaker.to_api_role().to_string(),
            content: turn.text.clone(),
        }));
        messages
    }
}

impl ProviderStrategy for OpenAiChat {
    fn endpoint(&self) -> &'static str {
        "chat/completions"
    }

    fn build_upstream_payload(
        &self,
        conversation: &Conversation,
        sampling: &Sampling,
    ) -> UpstreamPayload {
        UpstreamPayload::Chat(ChatRequest {
            model: sampling.model.clone(),
            messages: Self::messages(conversation, &sampling.system_prompt),
            max_tokens: sampling.max_tokens,
            temperature: sampling.temperature,
            stream: true,
        })
    }

    fn authorize(
        &self,
        request: reqwest::RequestBuilder,
        api_key: &str,
    ) -> reqwest::RequestBuilder {
        request.header("Authorization", format!("Bearer {api_key}"))
    }

    fn extract_fragment(&self, data: &str) -> Result<Option<String>, FrameDecodeError> {
        let response: ChatResponse = serde_json::from_str(data)?;
        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty()))
    }
}

/// Single flattened prompt in the `Human:` / `Assistant:` transcript style.
pub struct AnthropicComplete;

impl AnthropicComplete {
    pub fn prompt(conversation: &Conversation, system_prompt: &str) -> String {
        let mut prompt = String::from(system_prompt);
        for turn in conversation.history() {
            let marker = match turn.speaker {
                Speaker::Human => HUMAN_PROMPT,
                Speaker::Bot => ASSISTANT_PROMPT,
            };
            prompt.push_str(marker);
            prompt.push(' ');
            prompt.push_str(&turn.text);
        }
        prompt.push_str(ASSISTANT_PROMPT);
        prompt
    }
}

impl ProviderStrategy for AnthropicComplete {
    fn endpoint(&self) -> &'static str {
        "complete"
    }

    fn build_upstream_payload(
        &self,
        conversation: &Conversation,
        sampling: &Sampling,
    ) -> UpstreamPayload {
        UpstreamPayload::Completion(CompletionRequest {
            model: sampling.model.clone(),
            prompt: Self::prompt(conversation, &sampling.system_prompt),
            max_tokens_to_sample: sampling.max_tokens,
            stop_sequences: vec![HUMAN_PROMPT.to_string()],
            temperature: sampling.temperature,
            stream: true,
        })
    }

    fn authorize(
        &self,
        request: reqwest::RequestBuilder,
        api_key: &str,
    ) -> reqwest::RequestBuilder {
        request
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
    }

    fn extract_fragment(&self, data: &str) -> Result<Option<String>, FrameDecodeError> {
        let response: CompletionResponse = serde_json::from_str(data)?;
        Ok(response.completion.filter(|text| !text.is_empty()))
    }
}
