//! Authenticated HTTP client for the consultation backend.
//!
//! Every non-streaming call goes through one classification path: 401 is a
//! system-wide credential signal, 500 gets its `detail` dug out of the body
//! even when the body is malformed, and anything else non-2xx becomes an
//! `Api` error with the backend's detail string. Successful bodies are
//! parsed into typed payloads; a shape mismatch is a `Decode` failure, not
//! a silent `null`.

use std::pin::Pin;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::api::{
    AppendMessageRequest, ChatCreated, ChatDetail, ChatSummary, CreateChatRequest, Message,
    PairwiseFeedback,
};
use crate::error::{ClientError, Result};

/// Shown when a non-500 error body carries no usable `detail`.
const API_FALLBACK_DETAIL: &str = "API call failed";
/// Shown when a 500 body carries no usable `detail`.
const SERVER_FALLBACK_DETAIL: &str = "Internal server error";

/// Scan for a `"detail":"..."` fragment inside a malformed or partial 500
/// body that did not survive a JSON parse.
static DETAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""detail":"([^"]+)""#).expect("detail pattern is valid")
});

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for [`ApiClient`].
pub struct ApiClientBuilder {
    base_url: String,
    token: Option<String>,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl ApiClientBuilder {
    /// Create a builder targeting `base_url`.
    ///
    /// Defaults: connect timeout 10 s, request timeout 30 s. The request
    /// timeout applies to non-streaming calls only; a streamed reply has no
    /// overall deadline because generation length is unbounded.
    pub fn new(base_url: impl Into<String>) -> Self {
        ApiClientBuilder {
            base_url: base_url.into(),
            token: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Attach the bearer credential. Calls without one fail with
    /// `Unauthenticated` before any request is issued.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Override the TCP connect timeout (default 10 s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override the total timeout for non-streaming calls (default 30 s).
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn build(self) -> ApiClient {
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .build()
            .unwrap_or_default();

        ApiClient {
            base_url: self.base_url.trim_end_matches('/').to_string(),
            token: self.token,
            request_timeout: self.request_timeout,
            client,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client for the chat backend. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    token: Option<String>,
    request_timeout: Duration,
    client: reqwest::Client,
}

impl ApiClient {
    /// Start building a client aimed at `base_url`.
    pub fn builder(base_url: impl Into<String>) -> ApiClientBuilder {
        ApiClientBuilder::new(base_url)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn bearer(&self) -> Result<&str> {
        self.token.as_deref().ok_or(ClientError::Unauthenticated)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // -----------------------------------------------------------------------
    // Typed endpoint methods
    // -----------------------------------------------------------------------

    /// `GET /api/chats` — the sidebar/history listing.
    pub async fn list_chats(&self) -> Result<Vec<ChatSummary>> {
        self.get_json("/api/chats", "chat list").await
    }

    /// `POST /api/chats` — create a chat and obtain its id.
    pub async fn create_chat(&self, title: &str) -> Result<ChatCreated> {
        let body = CreateChatRequest {
            title: title.to_string(),
        };
        self.post_json("/api/chats", &body, "chat creation").await
    }

    /// `GET /api/chats/{chat_id}` — full stored chat state.
    pub async fn fetch_chat(&self, chat_id: &str) -> Result<ChatDetail> {
        self.get_json(&format!("/api/chats/{chat_id}"), "chat detail")
            .await
    }

    /// `POST /api/chats/{chat_id}/messages` — persist one queued message.
    /// The ack body is ignored; only the status matters.
    pub async fn append_message(&self, chat_id: &str, message: &Message) -> Result<()> {
        let token = self.bearer()?;
        let body = AppendMessageRequest {
            message: message.clone(),
        };
        let response = self
            .client
            .post(self.url(&format!("/api/chats/{chat_id}/messages")))
            .bearer_auth(token)
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(connect_error)?;

        if !response.status().is_success() {
            return Err(classify_failure(response).await);
        }
        Ok(())
    }

    /// `POST /api/feedback/pairwise` — preference record from a resolved
    /// dual round. Callers treat the result as best-effort.
    pub async fn submit_pairwise(&self, feedback: &PairwiseFeedback) -> Result<()> {
        let token = self.bearer()?;
        let response = self
            .client
            .post(self.url("/api/feedback/pairwise"))
            .bearer_auth(token)
            .timeout(self.request_timeout)
            .json(feedback)
            .send()
            .await
            .map_err(connect_error)?;

        if !response.status().is_success() {
            return Err(classify_failure(response).await);
        }
        Ok(())
    }

    /// `POST /api/chat` — stream a reply for the full conversation.
    ///
    /// A non-success status fails here, classified like any other call,
    /// before a single chunk is yielded. No total deadline applies to the
    /// stream itself.
    pub async fn stream_chat(&self, conversation: &[Message]) -> Result<ReplyStream> {
        let token = self.bearer()?;
        let response = self
            .client
            .post(self.url("/api/chat"))
            .bearer_auth(token)
            .json(&conversation)
            .send()
            .await
            .map_err(connect_error)?;

        if !response.status().is_success() {
            return Err(classify_failure(response).await);
        }

        debug!(messages = conversation.len(), "reply stream opened");
        Ok(ReplyStream::new(
            response
                .bytes_stream()
                .map(|item| match item {
                    Ok(bytes) => Ok(bytes.to_vec()),
                    Err(e) => Err(ClientError::generation(e.to_string())),
                }),
        ))
    }

    // -----------------------------------------------------------------------
    // Request plumbing
    // -----------------------------------------------------------------------

    async fn get_json<T: DeserializeOwned>(&self, path: &str, context: &'static str) -> Result<T> {
        let token = self.bearer()?;
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(token)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(connect_error)?;
        decode_response(response, context).await
    }

    async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
        context: &'static str,
    ) -> Result<T> {
        let token = self.bearer()?;
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(token)
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await
            .map_err(connect_error)?;
        decode_response(response, context).await
    }
}

fn connect_error(err: reqwest::Error) -> ClientError {
    warn!(error = %err, "request never reached the backend");
    ClientError::transport(err.to_string())
}

async fn decode_response<T: DeserializeOwned>(
    response: reqwest::Response,
    context: &'static str,
) -> Result<T> {
    if !response.status().is_success() {
        return Err(classify_failure(response).await);
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ClientError::decode(context, e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| ClientError::decode(context, e.to_string()))
}

/// Turn a non-2xx response into the matching `ClientError`.
async fn classify_failure(response: reqwest::Response) -> ClientError {
    let status = response.status();

    if status.as_u16() == 401 {
        return ClientError::Unauthenticated;
    }

    let body = response.text().await.unwrap_or_default();

    if status.as_u16() == 500 {
        warn!(%status, body = %body, "server error");
        return ClientError::server(server_detail(&body));
    }

    // Other non-success: the backend's detail field, or a generic message.
    let detail = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(String::from))
        .unwrap_or_else(|| API_FALLBACK_DETAIL.to_string());
    warn!(%status, %detail, "api error");
    ClientError::api(detail)
}

/// Dig the human-readable detail out of a 500 body: JSON parse first, then
/// a regex scan over malformed/partial text, then the fixed fallback.
fn server_detail(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(detail) = value.get("detail").and_then(|d| d.as_str()) {
            return detail.to_string();
        }
    }
    if let Some(caps) = DETAIL_RE.captures(body) {
        if let Some(m) = caps.get(1) {
            return m.as_str().to_string();
        }
    }
    SERVER_FALLBACK_DETAIL.to_string()
}

// ---------------------------------------------------------------------------
// Reply stream
// ---------------------------------------------------------------------------

/// Lazy chunk reader over a streamed reply body.
///
/// Yields decoded UTF-8 text; a multi-byte character split across chunk
/// boundaries is carried over and completed by the next chunk instead of
/// being mangled. The stream is finite and not restartable.
pub struct ReplyStream {
    inner: Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>,
    carry: Vec<u8>,
}

impl std::fmt::Debug for ReplyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyStream")
            .field("carry_bytes", &self.carry.len())
            .finish_non_exhaustive()
    }
}

impl ReplyStream {
    pub fn new(stream: impl Stream<Item = Result<Vec<u8>>> + Send + 'static) -> Self {
        ReplyStream {
            inner: Box::pin(stream),
            carry: Vec::new(),
        }
    }

    /// Next decoded text chunk, or `None` at end-of-body.
    pub async fn next_chunk(&mut self) -> Result<Option<String>> {
        loop {
            match self.inner.next().await {
                Some(Ok(bytes)) => {
                    self.carry.extend_from_slice(&bytes);
                    let decoded = self.take_decoded();
                    // A chunk may end mid-character and decode to nothing.
                    if !decoded.is_empty() {
                        return Ok(Some(decoded));
                    }
                }
                Some(Err(err)) => return Err(err),
                None => {
                    if self.carry.is_empty() {
                        return Ok(None);
                    }
                    // Truncated trailing sequence at end-of-body.
                    let rest = String::from_utf8_lossy(&self.carry).into_owned();
                    self.carry.clear();
                    return Ok(Some(rest));
                }
            }
        }
    }

    /// Decode the longest valid UTF-8 prefix of the carry buffer, keeping
    /// an incomplete trailing sequence for the next chunk.
    fn take_decoded(&mut self) -> String {
        match std::str::from_utf8(&self.carry) {
            Ok(text) => {
                let out = text.to_string();
                self.carry.clear();
                out
            }
            Err(err) if err.error_len().is_none() => {
                let valid = err.valid_up_to();
                let out = String::from_utf8_lossy(&self.carry[..valid]).into_owned();
                self.carry.drain(..valid);
                out
            }
            // Invalid bytes mid-stream: decode lossily rather than stall.
            Err(_) => {
                let out = String::from_utf8_lossy(&self.carry).into_owned();
                self.carry.clear();
                out
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
