//! Wire types for the consultation backend API.
//!
//! Shapes mirror the backend's JSON exactly; parsing them at the transport
//! boundary is what turns duck-typed payloads into typed `Decode` failures.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Author of a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

/// One transcript entry.
///
/// `message_id` and `signature` are present only on assistant messages whose
/// reply carried an authenticity block; they are omitted from wire JSON when
/// absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message {
            role: Role::User,
            content: content.into(),
            message_id: None,
            signature: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message {
            role: Role::Assistant,
            content: content.into(),
            message_id: None,
            signature: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Message {
            role: Role::System,
            content: content.into(),
            message_id: None,
            signature: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Chat listing / creation / loading
// ---------------------------------------------------------------------------

/// Sidebar listing entry from `GET /api/chats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSummary {
    pub chat_id: String,
    pub title: String,
}

/// Body for `POST /api/chats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChatRequest {
    pub title: String,
}

/// Response of `POST /api/chats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCreated {
    pub chat_id: String,
}

/// Full chat state from `GET /api/chats/{chat_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatDetail {
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Body for `POST /api/chats/{chat_id}/messages`, one queued message at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendMessageRequest {
    pub message: Message,
}

// ---------------------------------------------------------------------------
// Pairwise preference feedback
// ---------------------------------------------------------------------------

/// Body for `POST /api/feedback/pairwise`, emitted after a dual-response
/// round resolves. Submission is best-effort; the caller ignores the result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairwiseFeedback {
    pub prompt: String,
    pub chosen_response: String,
    pub rejected_response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Title rule
// ---------------------------------------------------------------------------

const MAX_TITLE_CHARS: usize = 30;

/// Derive a new chat's title from the first user message: the first 30
/// characters, ellipsized when the text is longer.
pub fn chat_title(text: &str) -> String {
    if text.chars().count() > MAX_TITLE_CHARS {
        let head: String = text.chars().take(MAX_TITLE_CHARS).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
