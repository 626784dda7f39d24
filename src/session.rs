//! Per-turn orchestration and chat lifecycle.
//!
//! `ChatSession` owns the transcript, the active chat identity, and the
//! pending-persistence queue; the caller holds the session, there is no
//! process-wide state. One turn runs: append user message, create the chat
//! if this is the first persisted message, drain, gate, generate (single
//! or dual), commit, drain again.

use rand::Rng;
use tracing::{debug, info, warn};

use crate::api::{chat_title, ChatSummary, Message, Role};
use crate::dual::{run_dual_round, DualOutcome};
use crate::error::Result;
use crate::generate::stream_reply;
use crate::queue::PendingQueue;
use crate::transport::ApiClient;
use crate::RenderSink;

/// Shown when the first turn of a new chat cannot create one.
const CREATE_CHAT_FAILED: &str = "Error: Could not create a new chat. Please try again.";

/// Title displayed before the first turn names the chat.
const NEW_CHAT_TITLE: &str = "New Medical Consultation";

/// Session-level knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Whether any turn may be routed to the dual-response flow.
    pub dual_enabled: bool,
    /// Per-turn probability of forking, evaluated independently each turn.
    pub dual_probability: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            dual_enabled: false,
            dual_probability: 0.5,
        }
    }
}

/// How one submitted turn ended.
#[derive(Debug)]
pub enum TurnOutcome {
    /// Empty or whitespace-only input; nothing happened.
    Ignored,
    /// The assistant reply settled and was committed.
    Completed(Message),
    /// The turn failed; a system message was rendered and nothing beyond
    /// the user message was committed.
    Aborted,
    /// A dual round was abandoned at the choice point; no assistant
    /// message was committed.
    Abandoned,
}

/// The aggregate driving one conversation.
pub struct ChatSession {
    client: ApiClient,
    events: RenderSink,
    config: SessionConfig,
    conversation: Vec<Message>,
    queue: PendingQueue,
    chat_id: Option<String>,
    title: String,
    is_new: bool,
}

impl ChatSession {
    pub fn new(client: ApiClient, events: RenderSink, config: SessionConfig) -> Self {
        ChatSession {
            client,
            events,
            config,
            conversation: Vec::new(),
            queue: PendingQueue::new(),
            chat_id: None,
            title: NEW_CHAT_TITLE.to_string(),
            is_new: true,
        }
    }

    pub fn conversation(&self) -> &[Message] {
        &self.conversation
    }

    pub fn chat_id(&self) -> Option<&str> {
        self.chat_id.as_deref()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// `GET /api/chats` — the history listing for the sidebar.
    pub async fn list_chats(&self) -> Result<Vec<ChatSummary>> {
        self.client.list_chats().await
    }

    /// Run one user turn through to a settled reply.
    ///
    /// Transport, server, and generation failures are rendered as a system
    /// message and end the turn as [`TurnOutcome::Aborted`]; only a
    /// credential failure propagates as an error, because the caller has
    /// to re-authenticate before anything else can work.
    pub async fn submit_turn(&mut self, text: &str) -> Result<TurnOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(TurnOutcome::Ignored);
        }

        let user = Message::user(text);
        self.conversation.push(user.clone());
        self.queue.enqueue(user);
        self.events.message_created(Role::User, text);

        if self.chat_id.is_none() {
            let title = chat_title(text);
            match self.client.create_chat(&title).await {
                Ok(created) => {
                    info!(chat_id = %created.chat_id, %title, "chat created");
                    self.chat_id = Some(created.chat_id);
                    self.title = title;
                    self.is_new = false;
                }
                Err(err) if err.is_unauthenticated() => return Err(err),
                Err(err) => {
                    // The user message stays visible, but nothing persists.
                    warn!(error = %err, "chat creation failed");
                    self.events.message_created(Role::System, CREATE_CHAT_FAILED);
                    return Ok(TurnOutcome::Aborted);
                }
            }
        }

        self.drain_pending().await?;

        let settled = if self.dual_gate_fires() {
            let outcome = run_dual_round(
                &self.client,
                &self.conversation,
                &self.events,
                text,
                self.chat_id.as_deref(),
            )
            .await;
            match outcome {
                DualOutcome::Chosen { message, .. } => message,
                DualOutcome::Survivor(message) => message,
                DualOutcome::Abandoned => return Ok(TurnOutcome::Abandoned),
                DualOutcome::Failed => {
                    // Blind fallback: one fresh single generation, no
                    // inspection of why the candidates died.
                    match self.single_reply().await? {
                        Some(message) => message,
                        None => return Ok(TurnOutcome::Aborted),
                    }
                }
            }
        } else {
            match self.single_reply().await? {
                Some(message) => message,
                None => return Ok(TurnOutcome::Aborted),
            }
        };

        // No await between these two pushes: a dropped future can never
        // leave the message in the conversation but outside the queue.
        self.conversation.push(settled.clone());
        self.queue.enqueue(settled.clone());
        self.drain_pending().await?;

        Ok(TurnOutcome::Completed(settled))
    }

    /// Replace the session state wholesale with a stored chat.
    pub async fn load_chat(&mut self, chat_id: &str) -> Result<()> {
        let detail = self.client.fetch_chat(chat_id).await?;

        self.conversation = detail.messages;
        self.queue.reset();
        self.chat_id = Some(chat_id.to_string());
        self.title = detail.title;
        self.is_new = false;

        self.events.transcript_cleared();
        for message in &self.conversation {
            // Stored system seeds are never displayed.
            if message.role != Role::System {
                self.events.message_created(message.role, &message.content);
            }
        }
        debug!(chat_id, messages = self.conversation.len(), "chat loaded");
        Ok(())
    }

    /// Reset to a fresh, unpersisted chat.
    pub fn start_new_chat(&mut self) {
        self.conversation.clear();
        self.queue.reset();
        self.chat_id = None;
        self.title = NEW_CHAT_TITLE.to_string();
        self.is_new = true;
        self.events.transcript_cleared();
    }

    /// The per-turn probabilistic gate, evaluated independently of prior
    /// turns.
    fn dual_gate_fires(&self) -> bool {
        if !self.config.dual_enabled {
            return false;
        }
        let p = self.config.dual_probability.clamp(0.0, 1.0);
        p > 0.0 && rand::thread_rng().gen_bool(p)
    }

    async fn single_reply(&mut self) -> Result<Option<Message>> {
        match stream_reply(&self.client, &self.conversation, &self.events, None).await {
            Ok(message) => Ok(Some(message)),
            Err(err) if err.is_unauthenticated() => Err(err),
            Err(err) => {
                warn!(error = %err, "turn failed");
                self.events
                    .message_created(Role::System, &format!("Error: {}", err.user_detail()));
                Ok(None)
            }
        }
    }

    /// Drain the pending queue. A persistence failure is not a turn
    /// failure: the queue keeps the messages and already logged the cause;
    /// only a credential rejection propagates.
    async fn drain_pending(&mut self) -> Result<()> {
        match self
            .queue
            .drain(&self.client, self.chat_id.as_deref())
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if err.is_unauthenticated() => Err(crate::ClientError::Unauthenticated),
            Err(_) => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
