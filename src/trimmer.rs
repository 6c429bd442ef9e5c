//! History trimming
//!
//! Keeps a history document under a token budget by evicting the oldest turns. The
//! whole document is serialized and counted on every step, since that is what gets
//! sent to the model. The seeded system turn is not protected.

use crate::turn::{serialize_history, Turn};
use crate::tokenizer::{TokenCounter, Tokenizer};
use tracing::debug;

/// Token count of a whole history document
pub fn history_tokens(
    tokenizer: &dyn Tokenizer,
    model: &str,
    history: &[Turn],
) -> serde_json::Result<usize> {
    Ok(tokenizer.count(model, &serialize_history(history)?))
}

/// Drop turns from the front until `history` fits in `max_history_tokens`
///
/// A single remaining turn is never evicted, even when it alone is over budget.
pub fn trim_history(
    tokenizer: &dyn Tokenizer,
    model: &str,
    max_history_tokens: usize,
    mut history: Vec<Turn>,
) -> serde_json::Result<Vec<Turn>> {
    let mut tokens = history_tokens(tokenizer, model, &history)?;
    if tokens <= max_history_tokens {
        return Ok(history);
    }

    let original_len = history.len();
    let mut evict = 0;
    while tokens > max_history_tokens && history.len() - evict > 1 {
        evict += 1;
        tokens = history_tokens(tokenizer, model, &history[evict..])?;
    }
    history.drain(..evict);

    debug!(
        "Trimmed history from {} to {} turns ({} tokens, budget {})",
        original_len,
        history.len(),
        TokenCounter::format_tokens(tokens),
        TokenCounter::format_tokens(max_history_tokens)
    );
    Ok(history)
}
