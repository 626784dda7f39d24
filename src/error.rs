//! Crate-wide error type for the chat client engine.

use thiserror::Error;

/// Fallback detail shown when a request never reached the backend.
pub const CONNECT_FALLBACK_DETAIL: &str = "Could not connect to the assistant";

/// Errors surfaced by the chat client engine.
///
/// Variants carry the human-readable `detail` the presentation layer shows
/// in a system message; low-level causes go to the log, not the transcript.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Bearer credential missing, or rejected by the backend (HTTP 401).
    /// Propagates to the top of the turn; the caller re-authenticates.
    #[error("not authenticated")]
    Unauthenticated,

    /// Backend 500, with the `detail` extracted from the response body.
    #[error("{0}")]
    Server(String),

    /// Any other non-success HTTP status.
    #[error("{0}")]
    Api(String),

    /// Connection-level failure before any HTTP status was received.
    #[error("connection failed: {0}")]
    Transport(String),

    /// Response body did not match the expected payload shape.
    #[error("malformed {context} payload: {detail}")]
    Decode {
        context: &'static str,
        detail: String,
    },

    /// A streamed reply failed mid-flight.
    #[error("{0}")]
    Generation(String),

    /// A queued message could not be persisted. The message stays at the
    /// head of the queue; the next drain retries it.
    #[error("failed to persist queued message ({pending} still pending)")]
    Persistence {
        pending: usize,
        #[source]
        source: Box<ClientError>,
    },
}

impl ClientError {
    pub fn server(detail: impl Into<String>) -> Self {
        ClientError::Server(detail.into())
    }

    pub fn api(detail: impl Into<String>) -> Self {
        ClientError::Api(detail.into())
    }

    pub fn transport(detail: impl Into<String>) -> Self {
        ClientError::Transport(detail.into())
    }

    pub fn generation(detail: impl Into<String>) -> Self {
        ClientError::Generation(detail.into())
    }

    pub fn decode(context: &'static str, detail: impl Into<String>) -> Self {
        ClientError::Decode {
            context,
            detail: detail.into(),
        }
    }

    /// True for credential failures, which abort the turn instead of being
    /// rendered into the transcript. A persistence failure whose cause was
    /// a 401 counts: the credential is gone system-wide, not per-endpoint.
    pub fn is_unauthenticated(&self) -> bool {
        match self {
            ClientError::Unauthenticated => true,
            ClientError::Persistence { source, .. } => source.is_unauthenticated(),
            _ => false,
        }
    }

    /// The detail string shown to the user as `Error: <detail>`.
    ///
    /// Connection-level failures collapse to a fixed friendly message; the
    /// underlying cause is only useful in the log.
    pub fn user_detail(&self) -> String {
        match self {
            ClientError::Transport(_) => CONNECT_FALLBACK_DETAIL.to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
