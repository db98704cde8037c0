//! Reconnecting consumer for the relay's event stream.
//!
//! [`StreamConsumer::open`] spawns one worker per request. The worker talks
//! HTTP, feeds what it sees into a [`StreamMachine`], and hands the resulting
//! [`StreamEvent`]s to the [`StreamHandle`] over a channel. Cancelling the
//! handle drops the worker future, which closes the connection.

mod request;
mod state;


use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{error_summary, RelayRequestBody};
use crate::core::config::ClientConfig;
use crate::core::frame::{frame_stream, ParsedFrame};
use crate::core::provider::{ProviderKind, ProviderStrategy};

pub use request::{RequestBinding, StreamRequest, StreamRequestError};
pub use state::{
    classify_response, ClosedKind, ConnectionState, ErrorKind, RetryPolicy, StreamError,
    StreamErrorCause, StreamEvent, StreamMachine, Transition, EXPECTED_CONTENT_TYPE,
};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Full relay endpoint URL
    pub url: String,
    pub binding: RequestBinding,
    /// Sent as `x-api-key` when set
    pub credential: Option<String>,
    /// Dialect of the frames the relay forwards
    pub provider: ProviderKind,
    pub retry: RetryPolicy,
    pub connect_timeout: Duration,
}

impl ConsumerConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            binding: RequestBinding::default(),
            credential: None,
            provider: ProviderKind::default(),
            retry: RetryPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn from_client_config(config: &ClientConfig, credential: Option<String>) -> Self {
        Self {
            url: config.relay_url.clone(),
            binding: config.method,
            credential: credential.filter(|key| !key.trim().is_empty()),
            provider: config.provider,
            retry: config.retry_policy(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("a stream is already open on this consumer")]
    AlreadyStreaming,
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Callbacks for [`StreamHandle::run`].
pub trait StreamHandler {
    fn on_open(&mut self) {}
    fn on_data(&mut self, fragment: &str);
    fn on_close(&mut self, text: &str);
    fn on_error(&mut self, error: &StreamError) {
        let _ = error;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    Completed(String),
    Failed(StreamError),
    Cancelled,
}

/// Opens streams against one relay endpoint, one at a time.
pub struct StreamConsumer {
    client: reqwest::Client,
    config: Arc<ConsumerConfig>,
    strategy: Arc<dyn ProviderStrategy>,
    busy: Arc<AtomicBool>,
}

impl StreamConsumer {
    pub fn new(config: ConsumerConfig) -> Result<Self, ConsumerError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        let strategy = config.provider.strategy();
        Ok(Self {
            client,
            config: Arc::new(config),
            strategy,
            busy: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Whether a handle from this consumer is still live.
    pub fn is_streaming(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Starts streaming a reply. Must be called inside a Tokio runtime.
    pub fn open(&self, request: &StreamRequest) -> Result<StreamHandle, ConsumerError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ConsumerError::AlreadyStreaming);
        }
        let guard = ActiveGuard(Arc::clone(&self.busy));
        let body = request.body()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let cancel = CancellationToken::new();

        let worker = Worker {
            client: self.client.clone(),
            config: Arc::clone(&self.config),
            strategy: Arc::clone(&self.strategy),
            body,
            events: events_tx,
            state: state_tx,
        };
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = worker.run() => {}
                _ = token.cancelled() => {
                    debug!("stream cancelled; connection dropped");
                }
            }
        });

        Ok(StreamHandle {
            events: events_rx,
            state: state_rx,
            cancel,
            task,
            guard: Some(guard),
            finished: false,
        })
    }
}

struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The caller's side of one open stream.
///
/// Events stop after a terminal one (a `Close` or a fatal `Error`) and
/// immediately after [`cancel`](Self::cancel). Dropping the handle cancels.
pub struct StreamHandle {
    events: mpsc::UnboundedReceiver<StreamEvent>,
    state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    guard: Option<ActiveGuard>,
    finished: bool,
}

impl StreamHandle {
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        if self.finished || self.cancel.is_cancelled() {
            self.guard.take();
            return None;
        }

        let event = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            event = self.events.recv() => event,
        };
        if self.cancel.is_cancelled() {
            self.guard.take();
            return None;
        }

        match event {
            Some(event) => {
                if event.is_terminal() {
                    self.finished = true;
                    self.guard.take();
                }
                Some(event)
            }
            None => {
                self.finished = true;
                self.guard.take();
                None
            }
        }
    }

    /// Stops the stream. No events are delivered after this returns.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.events.close();
        self.guard.take();
    }

    pub fn close(mut self) {
        self.cancel();
    }

    /// Token that cancels this stream from elsewhere, e.g. a signal handler.
    pub fn canceller(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> ConnectionState {
        if self.cancel.is_cancelled() {
            return if self.task.is_finished() {
                ConnectionState::Closed(ClosedKind::Normal)
            } else {
                ConnectionState::Closing
            };
        }
        *self.state.borrow()
    }

    /// Drives the stream to its end, reporting to `handler`.
    pub async fn run<H>(mut self, handler: &mut H) -> StreamOutcome
    where
        H: StreamHandler + ?Sized,
    {
        while let Some(event) = self.next_event().await {
            match event {
                StreamEvent::Open => handler.on_open(),
                StreamEvent::Data(fragment) => handler.on_data(&fragment),
                StreamEvent::Close { text } => {
                    handler.on_close(&text);
                    return StreamOutcome::Completed(text);
                }
                StreamEvent::Error(error) => {
                    handler.on_error(&error);
                    if error.is_fatal() {
                        return StreamOutcome::Failed(error);
                    }
                }
            }
        }
        StreamOutcome::Cancelled
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Worker {
    client: reqwest::Client,
    config: Arc<ConsumerConfig>,
    strategy: Arc<dyn ProviderStrategy>,
    body: RelayRequestBody,
    events: mpsc::UnboundedSender<StreamEvent>,
    state: watch::Sender<ConnectionState>,
}

impl Worker {
    fn emit(&self, event: StreamEvent) {
        let _ = self.events.send(event);
    }

    fn publish(&self, machine: &StreamMachine) {
        self.state.send_replace(machine.state());
    }

    async fn run(self) {
        let mut machine = StreamMachine::new(self.config.retry.clone());
        loop {
            machine.connect();
            self.publish(&machine);

            let error = match self.attempt(&mut machine).await {
                Ok(close) => {
                    debug!(reconnects = machine.reconnects(), "stream closed");
                    self.publish(&machine);
                    self.emit(close);
                    return;
                }
                Err(error) => error,
            };

            let (event, transition) = machine.fail(error);
            self.publish(&machine);
            self.emit(event);
            match transition {
                Transition::Stop => return,
                Transition::Retry { attempt, delay } => {
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "stream interrupted; reconnecting"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One connection. Returns the `Close` event on a clean finish.
    async fn attempt(&self, machine: &mut StreamMachine) -> Result<StreamEvent, StreamError> {
        let response = request::build_http_request(
            &self.client,
            &self.config.url,
            self.config.binding,
            self.config.credential.as_deref(),
            &self.body,
        )
        .send()
        .await
        .map_err(|err| {
            StreamError::retriable(StreamErrorCause::Transport(err.without_url().to_string()))
        })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        if let Err(mut error) = classify_response(status, content_type.as_deref()) {
            if let StreamErrorCause::Status { detail, .. } = &mut error.cause {
                let body = response.text().await.unwrap_or_default();
                *detail = error_summary(&body);
            }
            debug!(status, "relay refused stream: {error}");
            return Err(error);
        }

        self.emit(machine.open());
        self.publish(machine);

        let mut frames = Box::pin(frame_stream(response.bytes_stream()));
        while let Some(frame) = frames.next().await {
            match frame {
                Ok(ParsedFrame::Done) => return Ok(machine.finish()),
                Ok(ParsedFrame::Frame(frame)) if frame.is_fatal_error() => {
                    return Err(StreamError::fatal(StreamErrorCause::InBand(
                        error_summary(&frame.data),
                    )));
                }
                Ok(ParsedFrame::Frame(frame)) => {
                    match self.strategy.extract_fragment(&frame.data) {
                        Ok(Some(fragment)) => {
                            if let Some(event) = machine.data(fragment) {
                                self.emit(event);
                            }
                        }
                        Ok(None) => {}
                        Err(err) => warn!(event = %frame.event, "skipping frame: {err}"),
                    }
                }
                Err(err) => {
                    return Err(StreamError::retriable(StreamErrorCause::Transport(
                        err.without_url().to_string(),
                    )));
                }
            }
        }
        Ok(machine.finish())
    }
}
