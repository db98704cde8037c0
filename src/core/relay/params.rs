//! Request parameter decoding for the relay endpoint.
//!
//! The same two fields arrive either in a JSON body or as query parameters.
//! Both shapes are normalised into [`RawParams`] before validation so the
//! rules live in one place.

use std::collections::HashMap;

use serde_json::Value;

use super::RelayError;
use crate::core::message::Conversation;

const INVALID_PARAMETER: &str = "Invalid parameter";
const INVALID_CONVERSATION: &str = "Invalid conversation";
const INVALID_TEMPERATURE: &str = "Invalid temperature";

#[derive(Debug, Default, Clone, PartialEq)]
pub struct RawParams {
    pub conversation: Option<Value>,
    pub temperature: Option<Value>,
    pub model: Option<String>,
}

impl RawParams {
    pub fn from_json_body(body: &[u8]) -> Result<Self, RelayError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|_| RelayError::invalid(INVALID_PARAMETER))?;
        let Value::Object(mut fields) = value else {
            return Err(RelayError::invalid(INVALID_PARAMETER));
        };
        Ok(Self {
            conversation: fields.remove("conversation"),
            temperature: fields.remove("temperature"),
            model: fields
                .remove("model")
                .and_then(|value| value.as_str().map(str::to_owned)),
        })
    }

    pub fn from_query(mut query: HashMap<String, String>) -> Self {
        Self {
            conversation: query.remove("conversation").map(Value::String),
            temperature: query.remove("temperature").map(Value::String),
            model: query.remove("model"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelayParams {
    pub conversation: Conversation,
    pub temperature: f64,
    pub model: Option<String>,
}

/// Checks the conversation first, then the temperature.
pub fn validate(raw: RawParams) -> Result<RelayParams, RelayError> {
    let conversation = parse_conversation(raw.conversation)?;
    let temperature = parse_temperature(raw.temperature)?;
    Ok(RelayParams {
        conversation,
        temperature,
        model: raw.model.filter(|model| !model.trim().is_empty()),
    })
}

fn parse_conversation(value: Option<Value>) -> Result<Conversation, RelayError> {
    let parsed = match value {
        Some(Value::String(encoded)) => serde_json::from_str::<Conversation>(&encoded),
        Some(object @ Value::Object(_)) => serde_json::from_value::<Conversation>(object),
        _ => return Err(RelayError::invalid(INVALID_CONVERSATION)),
    };
    parsed.map_err(|_| RelayError::invalid(INVALID_CONVERSATION))
}

pub fn parse_temperature(value: Option<Value>) -> Result<f64, RelayError> {
    let temperature = match value {
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        Some(Value::Number(number)) => number.as_f64(),
        _ => None,
    };
    match temperature {
        Some(t) if t.is_finite() && (0.0..=1.0).contains(&t) => Ok(t),
        _ => Err(RelayError::invalid(INVALID_TEMPERATURE)),
    }
}
