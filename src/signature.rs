//! Extraction of the trailing authenticity block from streamed replies.
//!
//! The backend appends two marker lines to the very end of a generated
//! reply: `__MESSAGE_ID__:<token>` followed by `__SIGNATURE__:<token>`.
//! The id marker may land mid-line, directly after the visible content.
//! Until the full block has arrived the accumulator simply does not match,
//! so callers re-run extraction on the whole accumulator after every chunk
//! and always display the latest result.

pub const MESSAGE_ID_MARKER: &str = "__MESSAGE_ID__:";
pub const SIGNATURE_MARKER: &str = "__SIGNATURE__:";

/// Result of scanning raw streamed text for the authenticity block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Extraction {
    /// Visible content with the marker block removed and whitespace trimmed.
    /// Equal to the input when no complete block is present.
    pub content: String,
    pub message_id: Option<String>,
    pub signature: Option<String>,
}

/// Split `raw` into visible content and authenticity tokens.
///
/// Pure and idempotent: marker-free text (including the `content` of a
/// previous extraction) passes through unchanged with both tokens `None`.
/// A message-id marker without a complete signature line after it does not
/// count as a block; that is the normal state mid-stream.
pub fn extract(raw: &str) -> Extraction {
    let Some(id_pos) = raw.rfind(MESSAGE_ID_MARKER) else {
        return Extraction {
            content: raw.to_string(),
            ..Default::default()
        };
    };

    let after_id = &raw[id_pos + MESSAGE_ID_MARKER.len()..];
    // The id token runs to end-of-line; without the line break the
    // signature line cannot have arrived yet.
    let Some(id_end) = after_id.find('\n') else {
        return Extraction {
            content: raw.to_string(),
            ..Default::default()
        };
    };
    let id_token = after_id[..id_end].trim_end_matches('\r');

    let rest = &after_id[id_end + 1..];
    let Some(sig_rest) = rest.strip_prefix(SIGNATURE_MARKER) else {
        return Extraction {
            content: raw.to_string(),
            ..Default::default()
        };
    };

    let (sig_token, trailing) = match sig_rest.find('\n') {
        Some(nl) => (&sig_rest[..nl], &sig_rest[nl + 1..]),
        None => (sig_rest, ""),
    };
    // The block is only ever appended at the very end of the reply.
    if !trailing.trim().is_empty() {
        return Extraction {
            content: raw.to_string(),
            ..Default::default()
        };
    }

    Extraction {
        content: raw[..id_pos].trim().to_string(),
        message_id: Some(id_token.to_string()),
        signature: Some(sig_token.trim_end_matches('\r').to_string()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
