//! Turn bookkeeping for a chat session.
//!
//! [`Conversation`] appends are pure: every append returns a new value. The
//! bot-side append only succeeds while the last turn is a human turn, which
//! makes a repeated stream close harmless.

use crate::core::chat_stream::{StreamRequest, StreamRequestError};
use crate::core::message::{Conversation, Turn};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppendError {
    #[error("a bot turn needs a preceding human turn")]
    NoPendingHumanTurn,
}

impl Conversation {
    pub fn append_human(&self, text: impl Into<String>) -> Conversation {
        self.with_turn(Turn::human(text))
    }

    pub fn append_bot(&self, text: impl Into<String>) -> Result<Conversation, AppendError> {
        if !self.awaiting_reply() {
            return Err(AppendError::NoPendingHumanTurn);
        }
        Ok(self.with_turn(Turn::bot(text)))
    }

    /// True while the newest turn is a human message with no reply yet.
    pub fn awaiting_reply(&self) -> bool {
        self.last()
            .is_some_and(|turn| turn.speaker.is_human())
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a response is still streaming")]
    AwaitingResponse,
    #[error("message is empty")]
    EmptyMessage,
    #[error(transparent)]
    Request(#[from] StreamRequestError),
}

/// Owns the live conversation for one front end.
///
/// `submit` appends the human turn and hands back the request to stream;
/// `complete` appends the reply at most once per submit.
#[derive(Debug, Default)]
pub struct ConversationSession {
    conversation: Conversation,
    awaiting: bool,
    model: Option<String>,
}

impl ConversationSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(model: Option<String>) -> Self {
        Self {
            model,
            ..Self::default()
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn history(&self) -> &[Turn] {
        self.conversation.history()
    }

    pub fn is_awaiting(&self) -> bool {
        self.awaiting
    }

    pub fn submit(
        &mut self,
        text: &str,
        temperature: f64,
    ) -> Result<StreamRequest, SessionError> {
        if self.awaiting {
            return Err(SessionError::AwaitingResponse);
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyMessage);
        }

        let next = self.conversation.append_human(text);
        let request = StreamRequest::new(next.clone(), temperature)?
            .with_model(self.model.clone());
        self.conversation = next;
        self.awaiting = true;
        Ok(request)
    }

    /// Appends the finished reply. Returns `false` when there is nothing to
    /// complete, e.g. on a second close for the same submit.
    pub fn complete(&mut self, text: impl Into<String>) -> bool {
        if !self.awaiting {
            debug!("ignoring completion with no pending submit");
            return false;
        }
        match self.conversation.append_bot(text) {
            Ok(next) => {
                self.conversation = next;
                self.awaiting = false;
                true
            }
            Err(err) => {
                debug!("ignoring completion: {err}");
                self.awaiting = false;
                false
            }
        }
    }

    /// Gives up on the pending reply without recording it. The human turn
    /// stays in the history.
    pub fn abandon(&mut self) {
        self.awaiting = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_human_returns_new_conversation() {
        let empty = Conversation::new();
        let next = empty.append_human("Hello");
        assert!(empty.is_empty());
        assert_eq!(next.history(), &[Turn::human("Hello")]);
    }

    #[test]
    fn append_bot_requires_pending_human_turn() {
        let empty = Conversation::new();
        assert!(!empty.awaiting_reply());
        assert_eq!(
            empty.append_bot("hi").unwrap_err(),
            AppendError::NoPendingHumanTurn
        );

        let pending = empty.append_human("Hello");
        assert!(pending.awaiting_reply());
        let answered = pending.append_bot("Hi there").expect("first bot append");
        assert!(!answered.awaiting_reply());
        assert_eq!(
            answered.append_bot("Hi there").unwrap_err(),
            AppendError::NoPendingHumanTurn
        );
    }

    #[test]
    fn duplicate_completion_appends_single_bot_turn() {
        let mut session = ConversationSession::new();
        session.submit("Hello", 0.7).expect("submit");

        assert!(session.complete("Hi there"));
        assert!(!session.complete("Hi there"));

        assert_eq!(
            session.history(),
            &[Turn::human("Hello"), Turn::bot("Hi there")]
        );
    }

    #[test]
    fn submit_is_refused_while_awaiting() {
        let mut session = ConversationSession::new();
        session.submit("first", 0.5).expect("submit");
        assert!(matches!(
            session.submit("second", 0.5),
            Err(SessionError::AwaitingResponse)
        ));
        assert_eq!(session.history().len(), 1);
    }

    #[test]
    fn invalid_temperature_leaves_history_untouched() {
        let mut session = ConversationSession::new();
        let result = session.submit("Hello", 1.5);
        assert!(matches!(result, Err(SessionError::Request(_))));
        assert!(session.history().is_empty());
        assert!(!session.is_awaiting());
    }

    #[test]
    fn abandon_keeps_human_turn_without_reply() {
        let mut session = ConversationSession::new();
        session.submit("Hello", 0.7).expect("submit");
        session.abandon();
        assert!(!session.complete("late"));
        assert_eq!(session.history(), &[Turn::human("Hello")]);

        // The next submit follows a human turn that never got a reply.
        let request = session.submit("Again?", 0.7).expect("resubmit");
        assert_eq!(request.conversation.len(), 2);
    }

    #[test]
    fn submitted_request_carries_full_history() {
        let mut session = ConversationSession::with_model(Some("gpt-test".into()));
        session.submit("Hello", 0.7).expect("submit");
        session.complete("Hi there");
        let request = session.submit("How are you?", 0.2).expect("submit");
        assert_eq!(request.conversation.len(), 3);
        assert_eq!(request.model.as_deref(), Some("gpt-test"));
        assert!((request.temperature - 0.2).abs() < f64::EPSILON);
    }
}
