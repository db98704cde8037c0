//! Connection lifecycle for the stream consumer.
//!
//! [`StreamMachine`] is the pure half of the consumer: it takes the things
//! that happen on the wire (open, fragment, end, failure) and decides which
//! events to emit and whether to reconnect. The async worker in the parent
//! module only performs I/O and sleeps.

use std::time::Duration;

use thiserror::Error;
use tracing::debug;

pub const EXPECTED_CONTENT_TYPE: &str = "text/event-stream;charset=utf-8";
const MIN_RETRY_DELAY: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedKind {
    /// Completed, cancelled or closed by the caller
    Normal,
    /// Stopped by a fatal error
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    /// Waiting out the backoff before the next connect
    Retrying,
    Closing,
    Closed(ClosedKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Reconnects allowed per request. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Backoff before reconnect number `attempt` (1-based): the initial delay
    /// doubled per attempt, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let floor = self.initial_delay.max(MIN_RETRY_DELAY);
        let cap = self.max_delay.max(floor);
        let shift = attempt.saturating_sub(1).min(20);
        floor.saturating_mul(1_u32 << shift).min(cap)
    }

    fn exhausted(&self, reconnects: u32) -> bool {
        self.max_attempts.is_some_and(|max| reconnects > max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The consumer stops for good
    Fatal,
    /// The consumer reconnects after a backoff
    Retriable,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StreamErrorCause {
    #[error("relay returned {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("unexpected content type: {}", .0.as_deref().unwrap_or("<none>"))]
    ContentType(Option<String>),

    #[error("connection failed: {0}")]
    Transport(String),

    #[error("stream reported a fatal error: {0}")]
    InBand(String),

    #[error("gave up after {attempts} reconnects: {last}")]
    RetriesExhausted { attempts: u32, last: Box<StreamError> },
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{cause}")]
pub struct StreamError {
    pub kind: ErrorKind,
    pub cause: StreamErrorCause,
}

impl StreamError {
    pub fn fatal(cause: StreamErrorCause) -> Self {
        Self {
            kind: ErrorKind::Fatal,
            cause,
        }
    }

    pub fn retriable(cause: StreamErrorCause) -> Self {
        Self {
            kind: ErrorKind::Retriable,
            cause,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind == ErrorKind::Fatal
    }

    /// Status code behind this error, if the relay answered at all.
    pub fn status(&self) -> Option<u16> {
        match &self.cause {
            StreamErrorCause::Status { status, .. } => Some(*status),
            StreamErrorCause::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }
}

/// Decides whether a response can be read as an event stream.
///
/// Client errors other than 429 will not improve on retry and are fatal.
/// Everything else that is not a 2xx event stream is retriable.
pub fn classify_response(status: u16, content_type: Option<&str>) -> Result<(), StreamError> {
    if (200..300).contains(&status) {
        // Whitespace is ignored; media type names are case-insensitive (RFC 9110).
        let normalized = content_type.map(|value| {
            value
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_ascii_lowercase()
        });
        return match normalized.as_deref() {
            Some(EXPECTED_CONTENT_TYPE) => Ok(()),
            _ => Err(StreamError::retriable(StreamErrorCause::ContentType(
                content_type.map(str::to_owned),
            ))),
        };
    }

    let cause = StreamErrorCause::Status {
        status,
        detail: String::new(),
    };
    if (400..500).contains(&status) && status != 429 {
        Err(StreamError::fatal(cause))
    } else {
        Err(StreamError::retriable(cause))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A connection is established. After a reconnect the reply starts over,
    /// so fragments shown so far should be discarded.
    Open,
    /// One text fragment of the reply.
    Data(String),
    /// The reply is complete. `text` is the concatenation of every fragment
    /// since the last `Open`.
    Close { text: String },
    Error(StreamError),
}

impl StreamEvent {
    /// No further events follow a terminal one.
    pub fn is_terminal(&self) -> bool {
        match self {
            StreamEvent::Close { .. } => true,
            StreamEvent::Error(err) => err.is_fatal(),
            StreamEvent::Open | StreamEvent::Data(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Retry { attempt: u32, delay: Duration },
    Stop,
}

#[derive(Debug)]
pub struct StreamMachine {
    state: ConnectionState,
    policy: RetryPolicy,
    reconnects: u32,
    text: String,
}

impl StreamMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: ConnectionState::Idle,
            policy,
            reconnects: 0,
            text: String::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn reconnects(&self) -> u32 {
        self.reconnects
    }

    pub fn connect(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    pub fn open(&mut self) -> StreamEvent {
        self.state = ConnectionState::Open;
        self.text.clear();
        StreamEvent::Open
    }

    pub fn data(&mut self, fragment: String) -> Option<StreamEvent> {
        if self.state != ConnectionState::Open || fragment.is_empty() {
            return None;
        }
        self.text.push_str(&fragment);
        Some(StreamEvent::Data(fragment))
    }

    /// The sentinel arrived or the body ended cleanly.
    pub fn finish(&mut self) -> StreamEvent {
        self.state = ConnectionState::Closed(ClosedKind::Normal);
        debug!(bytes = self.text.len(), "reply complete");
        StreamEvent::Close {
            text: std::mem::take(&mut self.text),
        }
    }

    pub fn fail(&mut self, error: StreamError) -> (StreamEvent, Transition) {
        if error.is_fatal() {
            self.state = ConnectionState::Closed(ClosedKind::Fatal);
            return (StreamEvent::Error(error), Transition::Stop);
        }

        self.reconnects += 1;
        if self.policy.exhausted(self.reconnects) {
            self.state = ConnectionState::Closed(ClosedKind::Fatal);
            let attempts = self.reconnects - 1;
            let error = StreamError::fatal(StreamErrorCause::RetriesExhausted {
                attempts,
                last: Box::new(error),
            });
            return (StreamEvent::Error(error), Transition::Stop);
        }

        self.state = ConnectionState::Retrying;
        let delay = self.policy.delay_for(self.reconnects);
        (
            StreamEvent::Error(error),
            Transition::Retry {
                attempt: self.reconnects,
                delay,
            },
        )
    }

}
