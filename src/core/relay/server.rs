use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::Stream;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};

use super::params::{validate, RawParams};
use super::{CredentialMode, RelayError};
use crate::api::error_summary;
use crate::core::config::RelayConfig;
use crate::core::provider::{ProviderStrategy, Sampling};
use crate::utils::url::construct_api_url;

pub const CONVERSE_PATH: &str = "/api/converse";
pub const CREDENTIAL_HEADER: &str = "x-api-key";
pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream;charset=utf-8";

/// Immutable per-process relay state. Requests share nothing mutable.
#[derive(Clone)]
pub struct RelayState {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    client: reqwest::Client,
    config: RelayConfig,
    strategy: Arc<dyn ProviderStrategy>,
    server_key: Option<String>,
}

impl RelayState {
    pub fn new(config: RelayConfig, server_key: Option<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;
        let strategy = config.provider.strategy();
        Ok(Self {
            inner: Arc::new(RelayInner {
                client,
                config,
                strategy,
                server_key: server_key.filter(|key| !key.trim().is_empty()),
            }),
        })
    }

    /// Builds state reading the server-side key from the provider's
    /// environment variable when the relay does not take caller keys.
    pub fn from_env(config: RelayConfig) -> Result<Self, reqwest::Error> {
        let server_key = match config.credential {
            CredentialMode::Environment => std::env::var(config.provider.api_key_env()).ok(),
            CredentialMode::Header => None,
        };
        Self::new(config, server_key)
    }

    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    fn credential(&self, headers: &HeaderMap) -> Result<String, RelayError> {
        match self.inner.config.credential {
            CredentialMode::Header => headers
                .get(CREDENTIAL_HEADER)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_owned)
                .ok_or(RelayError::MissingCredential),
            CredentialMode::Environment => self
                .inner
                .server_key
                .clone()
                .ok_or(RelayError::MissingCredential),
        }
    }
}

pub fn router(state: RelayState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(CREDENTIAL_HEADER),
        ]);

    Router::new()
        .route("/health", get(health))
        .route(CONVERSE_PATH, get(converse_query).post(converse_body))
        .layer(cors)
        .with_state(state)
}

#[derive(serde::Serialize)]
struct Health {
    status: &'static str,
}

async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

async fn converse_body(State(state): State<RelayState>, headers: HeaderMap, body: Bytes) -> Response {
    let forward = state.config().forward_upstream_status;
    let result = match state.credential(&headers) {
        Ok(api_key) => match RawParams::from_json_body(&body) {
            Ok(raw) => relay(&state, api_key, raw).await,
            Err(err) => Err(err),
        },
        Err(err) => Err(err),
    };
    result.unwrap_or_else(|err| reject(err, forward))
}

async fn converse_query(
    State(state): State<RelayState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let forward = state.config().forward_upstream_status;
    let result = match state.credential(&headers) {
        Ok(api_key) => relay(&state, api_key, RawParams::from_query(query)).await,
        Err(err) => Err(err),
    };
    result.unwrap_or_else(|err| reject(err, forward))
}

fn reject(err: RelayError, forward_upstream_status: bool) -> Response {
    match &err {
        RelayError::MissingCredential | RelayError::InvalidParameter(_) => {
            debug!("rejecting relay request: {err}")
        }
        RelayError::UpstreamTransport(_) | RelayError::UpstreamProtocol { .. } => {
            error!("upstream failure: {err}")
        }
    }
    err.into_response_with(forward_upstream_status)
}

async fn relay(state: &RelayState, api_key: String, raw: RawParams) -> Result<Response, RelayError> {
    let params = validate(raw)?;
    let inner = &state.inner;
    let config = &inner.config;

    let sampling = Sampling {
        model: params
            .model
            .unwrap_or_else(|| config.model().to_string()),
        temperature: params.temperature,
        max_tokens: config.max_tokens,
        system_prompt: config.system_prompt().to_string(),
    };
    let payload = inner
        .strategy
        .build_upstream_payload(&params.conversation, &sampling);
    let url = construct_api_url(config.upstream_url(), inner.strategy.endpoint());

    debug!(
        provider = %config.provider,
        model = %sampling.model,
        turns = params.conversation.len(),
        "opening upstream stream"
    );

    let request = inner
        .client
        .post(url)
        .header(header::CONTENT_TYPE, "application/json");
    let response = inner
        .strategy
        .authorize(request, &api_key)
        .json(&payload)
        .send()
        .await
        .map_err(|err| RelayError::UpstreamTransport(err.without_url().to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let status = StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
        return Err(RelayError::UpstreamProtocol {
            status,
            detail: error_summary(&body),
        });
    }

    Ok(event_stream_response(ForwardedBody::new(response.bytes_stream())))
}

fn event_stream_response<S>(body: ForwardedBody<S>) -> Response
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    let mut response = Body::from_stream(body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(EVENT_STREAM_CONTENT_TYPE),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-transform"),
    );
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

/// Passes upstream chunks through untouched and notes how the stream ended.
struct ForwardedBody<S> {
    inner: Pin<Box<S>>,
    forwarded: usize,
    finished: bool,
}

impl<S> ForwardedBody<S> {
    fn new(inner: S) -> Self {
        Self {
            inner: Box::pin(inner),
            forwarded: 0,
            finished: false,
        }
    }
}

impl<S> Stream for ForwardedBody<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>>,
{
    type Item = Result<Bytes, reqwest::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.forwarded += chunk.len();
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                warn!("upstream stream failed after {} bytes: {err}", this.forwarded);
                this.finished = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                debug!(bytes = this.forwarded, "upstream stream complete");
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S> Drop for ForwardedBody<S> {
    fn drop(&mut self) {
        if !self.finished {
            debug!(
                bytes = self.forwarded,
                "caller went away; releasing upstream connection"
            );
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("relay I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Binds `config.bind` and serves until Ctrl+C.
pub async fn serve(config: RelayConfig) -> Result<(), ServeError> {
    let state = RelayState::from_env(config)?;
    let listener = TcpListener::bind(&state.config().bind).await?;
    info!(
        provider = %state.config().provider,
        upstream = state.config().upstream_url(),
        "relay listening on http://{}{}",
        listener.local_addr()?,
        CONVERSE_PATH
    );
    if state.config().credential == CredentialMode::Environment && state.inner.server_key.is_none()
    {
        warn!(
            "{} is not set; every request will be rejected",
            state.config().provider.api_key_env()
        );
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down relay");
        })
        .await?;
    Ok(())
}
