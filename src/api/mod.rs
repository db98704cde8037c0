use serde::{Deserialize, Serialize};

/// Body the client sends to the relay. `conversation` is itself a JSON
/// document, encoded as a string so the same fields work as query parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayRequestBody {
    pub conversation: String,
    pub temperature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Final, non-streamed error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f64,
    pub stream: bool,
}

#[derive(Deserialize)]
pub struct ChatResponseDelta {
    pub content: Option<String>,
}

#[derive(Deserialize)]
pub struct ChatResponseChoice {
    pub delta: ChatResponseDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<ChatResponseChoice>,
}

/// Legacy prompt-style completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens_to_sample: u32,
    pub stop_sequences: Vec<String>,
    pub temperature: f64,
    pub stream: bool,
}

#[derive(Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub completion: Option<String>,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum UpstreamPayload {
    Chat(ChatRequest),
    Completion(CompletionRequest),
}

/// Short human-readable summary of an error body. Understands the common
/// `{"error":{"message":…}}`, `{"error":"…"}` and `{"message":…}` shapes and
/// falls back to the trimmed text.
pub fn error_summary(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    let summary = serde_json::from_str::<serde_json::Value>(trimmed)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(|v| v.as_str())
                .map(str::to_owned)
                .or_else(|| {
                    value.get("error").and_then(|v| match v {
                        serde_json::Value::String(s) => Some(s.to_string()),
                        _ => None,
                    })
                })
                .or_else(|| {
                    value
                        .get("message")
                        .and_then(|v| v.as_str().map(str::to_owned))
                })
        })
        .unwrap_or_else(|| trimmed.to_string());

    summary.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_summary_reads_nested_message() {
        let raw = r#"{"error":{"message":"model   overloaded","type":"server_error"}}"#;
        assert_eq!(error_summary(raw), "model overloaded");
    }

    #[test]
    fn error_summary_reads_relay_error_body() {
        let body = serde_json::to_string(&ErrorBody {
            message: "Invalid temperature".to_string(),
        })
        .expect("serialize");
        assert_eq!(error_summary(&body), "Invalid temperature");
    }

    #[test]
    fn error_summary_handles_plain_and_empty_text() {
        assert_eq!(error_summary("  bad gateway \n"), "bad gateway");
        assert_eq!(error_summary(""), "<empty>");
        assert_eq!(error_summary(r#"{"error":"quota"}"#), "quota");
    }

    #[test]
    fn relay_body_omits_missing_model() {
        let body = RelayRequestBody {
            conversation: "{}".to_string(),
            temperature: "0.7".to_string(),
            model: None,
        };
        assert_eq!(
            serde_json::to_string(&body).expect("serialize"),
            r#"{"conversation":"{}","temperature":"0.7"}"#
        );
    }
}
