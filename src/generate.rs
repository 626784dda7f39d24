//! Single-response generation: one streaming exchange with the backend.

use tracing::debug;

use crate::api::{Message, Role};
use crate::error::Result;
use crate::signature::extract;
use crate::transport::ApiClient;
use crate::{RenderHandle, RenderSink};

/// Stream one assistant reply for `conversation` and return the finished
/// message.
///
/// Every arriving chunk is appended to a single accumulator, the signature
/// extractor re-runs on the whole accumulator, and the cleaned content is
/// republished into the render slot replace-in-place. Re-running on the
/// full text is what makes a marker block split across chunk boundaries
/// harmless: until the block is complete the extractor passes the text
/// through, and the first extraction after completion strips it.
///
/// When `slot` is `None` the generator opens its own assistant slot; a
/// dual-response candidate is handed the slot its orchestrator announced.
/// Committing the result to the conversation and persistence queue is the
/// caller's job in both cases.
pub async fn stream_reply(
    client: &ApiClient,
    conversation: &[Message],
    events: &RenderSink,
    slot: Option<RenderHandle>,
) -> Result<Message> {
    let handle = match slot {
        Some(handle) => handle,
        None => events.message_created(Role::Assistant, ""),
    };

    let mut reply = client.stream_chat(conversation).await?;
    let mut accumulator = String::new();

    while let Some(chunk) = reply.next_chunk().await? {
        accumulator.push_str(&chunk);
        let partial = extract(&accumulator);
        events.message_updated(handle, &partial.content);
    }

    // The authoritative pass over the final accumulator.
    let finished = extract(&accumulator);
    events.message_updated(handle, &finished.content);

    debug!(
        chars = finished.content.len(),
        signed = finished.signature.is_some(),
        "reply stream completed"
    );

    Ok(Message {
        role: Role::Assistant,
        content: finished.content,
        message_id: finished.message_id,
        signature: finished.signature,
    })
}
