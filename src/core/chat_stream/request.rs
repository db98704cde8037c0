use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::RelayRequestBody;
use crate::core::message::Conversation;
use crate::core::relay::CREDENTIAL_HEADER;

/// How the conversation travels to the relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestBinding {
    /// JSON body on a POST
    #[default]
    Post,
    /// Query parameters on a GET, for clients limited to GET event streams
    Get,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StreamRequestError {
    #[error("Invalid temperature")]
    InvalidTemperature(f64),
}

/// One streamed reply request: the full conversation so far plus sampling.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    pub conversation: Conversation,
    pub temperature: f64,
    pub model: Option<String>,
}

impl StreamRequest {
    pub fn new(conversation: Conversation, temperature: f64) -> Result<Self, StreamRequestError> {
        if !temperature.is_finite() || !(0.0..=1.0).contains(&temperature) {
            return Err(StreamRequestError::InvalidTemperature(temperature));
        }
        Ok(Self {
            conversation,
            temperature,
            model: None,
        })
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model.filter(|model| !model.trim().is_empty());
        self
    }

    pub(crate) fn body(&self) -> Result<RelayRequestBody, serde_json::Error> {
        Ok(RelayRequestBody {
            conversation: self.conversation.to_json()?,
            temperature: self.temperature.to_string(),
            model: self.model.clone(),
        })
    }
}

pub(crate) fn build_http_request(
    client: &reqwest::Client,
    url: &str,
    binding: RequestBinding,
    credential: Option<&str>,
    body: &RelayRequestBody,
) -> reqwest::RequestBuilder {
    let request = match binding {
        RequestBinding::Post => client.post(url).json(body),
        RequestBinding::Get => client.get(url).query(body),
    };
    let request = request
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .header(reqwest::header::CACHE_CONTROL, "no-cache");
    match credential {
        Some(key) => request.header(CREDENTIAL_HEADER, key),
        None => request,
    }
}
