pub mod api;
pub mod cli;
pub mod dual;
pub mod error;
pub mod generate;
pub mod queue;
pub mod session;
pub mod signature;
pub mod transport;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

pub use api::{ChatSummary, Message, Role};
pub use error::{ClientError, Result};
pub use session::{ChatSession, SessionConfig, TurnOutcome};
pub use transport::ApiClient;

// ---------------------------------------------------------------------------
// Render handles
// ---------------------------------------------------------------------------

/// Opaque identity of one displayed message the presentation layer owns.
///
/// The engine creates handles and republishes cleaned content into them;
/// it never renders anything itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RenderHandle(Uuid);

impl RenderHandle {
    pub fn new() -> Self {
        RenderHandle(Uuid::new_v4())
    }
}

impl Default for RenderHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RenderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one dual-response round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoundId(Uuid);

impl RoundId {
    pub fn new() -> Self {
        RoundId(Uuid::new_v4())
    }
}

impl Default for RoundId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RoundId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Choice prompt
// ---------------------------------------------------------------------------

/// The user's pick in a dual-response round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    CandidateA,
    CandidateB,
}

/// Both finished candidates plus the responder that resolves the round.
///
/// Sending on `responder` picks a candidate; dropping it without sending
/// abandons the round (nothing is committed or submitted as feedback).
/// The responder travels inside the prompt, so a second concurrent round
/// cannot overwrite the first round's resolver.
#[derive(Debug)]
pub struct ChoicePrompt {
    pub round_id: RoundId,
    pub candidate_a: String,
    pub candidate_b: String,
    pub responder: oneshot::Sender<Choice>,
}

// ---------------------------------------------------------------------------
// Render events
// ---------------------------------------------------------------------------

/// One event on the engine → presentation channel.
///
/// `MessageUpdated` replaces the slot's content wholesale; the engine
/// re-cleans the full accumulator on every chunk, so the latest event is
/// always the canonical text for that slot.
#[derive(Debug)]
pub enum RenderEvent {
    MessageCreated {
        handle: RenderHandle,
        role: Role,
        content: String,
    },
    MessageUpdated {
        handle: RenderHandle,
        content: String,
    },
    /// The transcript was replaced (a chat was loaded or a new one started).
    TranscriptCleared,
    /// A dual round opened; both candidate slots stream independently.
    RoundOpened {
        round_id: RoundId,
        candidate_a: RenderHandle,
        candidate_b: RenderHandle,
    },
    /// The round settled. `kept` names the surviving slot, if any.
    RoundResolved {
        round_id: RoundId,
        kept: Option<RenderHandle>,
    },
    ChoiceRequested(ChoicePrompt),
}

/// Sending half of the render seam.
///
/// When connected, events are sent to the presentation layer; a
/// disconnected sink drops them, which keeps the engine usable headless
/// and in tests. Sends are best-effort — a closed receiver never fails
/// a turn.
#[derive(Debug, Clone)]
pub struct RenderSink {
    tx: Option<mpsc::UnboundedSender<RenderEvent>>,
}

impl RenderSink {
    /// A connected sink plus the receiver the presentation layer drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RenderEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (RenderSink { tx: Some(tx) }, rx)
    }

    /// A sink with no presentation layer attached.
    pub fn disconnected() -> Self {
        RenderSink { tx: None }
    }

    pub fn send(&self, event: RenderEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    /// Open a fresh slot holding `content` and return its handle.
    pub fn message_created(&self, role: Role, content: &str) -> RenderHandle {
        let handle = RenderHandle::new();
        self.send(RenderEvent::MessageCreated {
            handle,
            role,
            content: content.to_string(),
        });
        handle
    }

    pub fn message_updated(&self, handle: RenderHandle, content: &str) {
        self.send(RenderEvent::MessageUpdated {
            handle,
            content: content.to_string(),
        });
    }

    pub fn transcript_cleared(&self) {
        self.send(RenderEvent::TranscriptCleared);
    }

    pub fn round_opened(
        &self,
        round_id: RoundId,
        candidate_a: RenderHandle,
        candidate_b: RenderHandle,
    ) {
        self.send(RenderEvent::RoundOpened {
            round_id,
            candidate_a,
            candidate_b,
        });
    }

    pub fn round_resolved(&self, round_id: RoundId, kept: Option<RenderHandle>) {
        self.send(RenderEvent::RoundResolved { round_id, kept });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
