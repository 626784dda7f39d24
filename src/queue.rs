//! Ordered, retry-safe persistence of transcript messages.
//!
//! The queue is always the suffix of the conversation the backend has not
//! yet acknowledged. Draining walks it front-to-back, one persist call per
//! message, and stops at the first failure; the failed message stays at the
//! head so the next drain retries it. Nothing is ever reordered, skipped,
//! or discarded.

use std::collections::VecDeque;

use tracing::{debug, error, warn};

use crate::api::Message;
use crate::error::{ClientError, Result};
use crate::transport::ApiClient;

/// Failed passes before the retry log escalates from warn to error.
const FAILURE_ESCALATION_THRESHOLD: u32 = 5;

/// Messages awaiting persistence confirmation, in transcript order.
#[derive(Debug, Default)]
pub struct PendingQueue {
    queue: VecDeque<Message>,
    consecutive_failures: u32,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message. No I/O happens here; the session decides when to
    /// drain.
    pub fn enqueue(&mut self, message: Message) {
        self.queue.push_back(message);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Content of the pending suffix, front to back. Test hook.
    pub fn pending_contents(&self) -> Vec<&str> {
        self.queue.iter().map(|m| m.content.as_str()).collect()
    }

    /// Discard everything, including retry state. Used when a different
    /// chat is loaded or a new one starts.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.consecutive_failures = 0;
    }

    /// Persist pending messages strictly in order.
    ///
    /// No-op when the queue is empty or no chat id is assigned yet.
    /// Exclusive access through `&mut self` rules out a second concurrent
    /// drain, and a drain future dropped mid-flight leaves the queue
    /// drainable: the in-flight message is still at the head and the next
    /// call retries it. On failure the head stays queued and the error
    /// wraps the cause; the caller retries by draining again later. There
    /// is no backoff and no attempt cap — drains only run on user-driven
    /// events, so a failing backend is reported through the log rather
    /// than hot-looped against.
    pub async fn drain(&mut self, client: &ApiClient, chat_id: Option<&str>) -> Result<()> {
        let Some(chat_id) = chat_id else {
            return Ok(());
        };
        if self.queue.is_empty() {
            return Ok(());
        }

        match self.drain_pass(client, chat_id).await {
            Ok(persisted) => {
                self.consecutive_failures = 0;
                debug!(persisted, chat_id, "pending queue drained");
                Ok(())
            }
            Err(source) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                let pending = self.queue.len();
                if self.consecutive_failures >= FAILURE_ESCALATION_THRESHOLD {
                    error!(
                        error = %source,
                        pending,
                        consecutive_failures = self.consecutive_failures,
                        "persist failed repeatedly, keeping messages queued"
                    );
                } else {
                    warn!(error = %source, pending, "persist failed, will retry on next drain");
                }
                Err(ClientError::Persistence {
                    pending,
                    source: Box::new(source),
                })
            }
        }
    }

    async fn drain_pass(
        &mut self,
        client: &ApiClient,
        chat_id: &str,
    ) -> std::result::Result<usize, ClientError> {
        let mut persisted = 0;
        while let Some(head) = self.queue.front() {
            client.append_message(chat_id, head).await?;
            // Removed only after the backend confirmed this exact message.
            self.queue.pop_front();
            persisted += 1;
        }
        Ok(persisted)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
