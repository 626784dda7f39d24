//! Dual-response orchestration: two concurrent candidate generations
//! resolved into one message by asynchronous user choice.
//!
//! A round runs both generators against independent render slots over the
//! same conversation snapshot, joins them, and degrades gracefully: one
//! failure yields the survivor with no choice presented, two failures
//! yield [`DualOutcome::Failed`] and the caller falls back to a fresh
//! single-response generation.

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::api::{Message, PairwiseFeedback};
use crate::error::Result;
use crate::generate::stream_reply;
use crate::transport::ApiClient;
use crate::{Choice, ChoicePrompt, RenderEvent, RenderHandle, RenderSink, RoundId};

/// How a dual-response round settled.
#[derive(Debug)]
pub enum DualOutcome {
    /// Both candidates finished and the user picked one. The chosen message
    /// is committed by the caller exactly as a single response would be;
    /// the rejected one only feeds the preference record.
    Chosen {
        message: Message,
        rejected: Message,
    },
    /// Exactly one candidate survived; returned as if dual mode had not
    /// triggered. No choice was presented and no feedback is submitted.
    Survivor(Message),
    /// The presentation layer dropped the responder without answering.
    /// Nothing is committed and no feedback is submitted.
    Abandoned,
    /// Both candidates failed; the caller falls back to a single fresh
    /// generation.
    Failed,
}

/// Run one dual-response round over `conversation`.
///
/// `prompt` is the user text that opened the turn; it goes into the
/// pairwise feedback record together with the chosen and rejected
/// contents. Feedback submission is best-effort — a failure is logged and
/// never undoes the choice.
pub async fn run_dual_round(
    client: &ApiClient,
    conversation: &[Message],
    events: &RenderSink,
    prompt: &str,
    chat_id: Option<&str>,
) -> DualOutcome {
    let round_id = RoundId::new();
    let slot_a = RenderHandle::new();
    let slot_b = RenderHandle::new();
    events.round_opened(round_id, slot_a, slot_b);

    // Both candidates see the same pre-turn snapshot, never each other's
    // in-flight output. Their chunk reconciliation interleaves only at
    // await points; each slot's own update order is preserved.
    let (result_a, result_b) = tokio::join!(
        stream_reply(client, conversation, events, Some(slot_a)),
        stream_reply(client, conversation, events, Some(slot_b)),
    );

    match (result_a, result_b) {
        (Err(err_a), Err(err_b)) => {
            warn!(%round_id, error_a = %err_a, error_b = %err_b, "both candidates failed");
            events.round_resolved(round_id, None);
            DualOutcome::Failed
        }
        (Ok(message), Err(err)) => {
            warn!(%round_id, error = %err, "candidate B failed, keeping A without a choice");
            events.round_resolved(round_id, Some(slot_a));
            DualOutcome::Survivor(message)
        }
        (Err(err), Ok(message)) => {
            warn!(%round_id, error = %err, "candidate A failed, keeping B without a choice");
            events.round_resolved(round_id, Some(slot_b));
            DualOutcome::Survivor(message)
        }
        (Ok(candidate_a), Ok(candidate_b)) => {
            await_choice(
                client, events, round_id, slot_a, slot_b, candidate_a, candidate_b, prompt,
                chat_id,
            )
            .await
        }
    }
}

/// Publish the choice prompt and suspend until the presentation layer
/// answers or drops the responder. The wait is bounded only by user
/// action; no timeout applies.
#[allow(clippy::too_many_arguments)]
async fn await_choice(
    client: &ApiClient,
    events: &RenderSink,
    round_id: RoundId,
    slot_a: RenderHandle,
    slot_b: RenderHandle,
    candidate_a: Message,
    candidate_b: Message,
    prompt: &str,
    chat_id: Option<&str>,
) -> DualOutcome {
    let (responder, decision) = oneshot::channel();
    events.send(RenderEvent::ChoiceRequested(ChoicePrompt {
        round_id,
        candidate_a: candidate_a.content.clone(),
        candidate_b: candidate_b.content.clone(),
        responder,
    }));

    let choice = match decision.await {
        Ok(choice) => choice,
        Err(_) => {
            debug!(%round_id, "choice responder dropped, abandoning round");
            events.round_resolved(round_id, None);
            return DualOutcome::Abandoned;
        }
    };

    let (kept, message, rejected) = match choice {
        Choice::CandidateA => (slot_a, candidate_a, candidate_b),
        Choice::CandidateB => (slot_b, candidate_b, candidate_a),
    };
    debug!(%round_id, ?choice, "round resolved by user");

    if let Err(err) = submit_feedback(client, prompt, &message, &rejected, chat_id).await {
        // Best-effort: losing the preference record never undoes the choice.
        warn!(%round_id, error = %err, "pairwise feedback submission failed");
    }

    events.round_resolved(round_id, Some(kept));
    DualOutcome::Chosen { message, rejected }
}

async fn submit_feedback(
    client: &ApiClient,
    prompt: &str,
    chosen: &Message,
    rejected: &Message,
    chat_id: Option<&str>,
) -> Result<()> {
    let feedback = PairwiseFeedback {
        prompt: prompt.to_string(),
        chosen_response: chosen.content.clone(),
        rejected_response: rejected.content.clone(),
        chat_id: chat_id.map(String::from),
    };
    client.submit_pairwise(&feedback).await
}
