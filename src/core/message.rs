use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Speaker {
    Human,
    Bot,
}

impl Speaker {
    pub fn as_str(self) -> &'static str {
        match self {
            Speaker::Human => "human",
            Speaker::Bot => "bot",
        }
    }

    /// Role name used by chat-style completion APIs.
    pub fn to_api_role(self) -> &'static str {
        match self {
            Speaker::Human => "user",
            Speaker::Bot => "assistant",
        }
    }

    pub fn is_human(self) -> bool {
        self == Speaker::Human
    }
}

impl AsRef<str> for Speaker {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl TryFrom<&str> for Speaker {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "human" => Ok(Speaker::Human),
            "bot" => Ok(Speaker::Bot),
            _ => Err(format!("invalid speaker: {value}")),
        }
    }
}

impl TryFrom<String> for Speaker {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<Speaker> for String {
    fn from(value: Speaker) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
}

impl Turn {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
        }
    }

    pub fn human(text: impl Into<String>) -> Self {
        Self::new(Speaker::Human, text)
    }

    pub fn bot(text: impl Into<String>) -> Self {
        Self::new(Speaker::Bot, text)
    }
}

/// Ordered turn list. Cloning is cheap and appends always build a new list,
/// so a value handed to a renderer never changes underneath it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    history: Arc<[Turn]>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self {
            history: Arc::from(Vec::new()),
        }
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_turns(turns: Vec<Turn>) -> Self {
        Self {
            history: Arc::from(turns),
        }
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.history.last()
    }

    pub(crate) fn with_turn(&self, turn: Turn) -> Self {
        let mut turns = Vec::with_capacity(self.history.len() + 1);
        turns.extend_from_slice(&self.history);
        turns.push(turn);
        Self::from_turns(turns)
    }

    /// Wire form expected by the relay: the conversation as a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
