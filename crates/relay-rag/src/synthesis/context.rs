//! Token-budgeted context assembly

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::{RankedCandidate, RankedResult};

use super::collaborators::Compressor;

/// One candidate admitted to the context with its token allotment
#[derive(Debug, Clone)]
pub struct ContextSlot {
    pub candidate: RankedCandidate,
    /// Text as included (possibly compressed or truncated)
    pub text: String,
    /// Tokens allotted to this slot
    pub tokens: usize,
    pub truncated: bool,
}

/// The assembled context; sum of allotted tokens never exceeds the budget
#[derive(Debug, Clone, Default)]
pub struct SynthesisContext {
    pub slots: Vec<ContextSlot>,
    pub total_tokens: usize,
    pub budget: usize,
}

/// Rough token estimate: four characters per token
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Truncate text to roughly `max_tokens`, respecting char boundaries
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    let max_chars = max_tokens * 4;
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

/// Greedily fill the budget in rank order
///
/// Each candidate gets its full text unless that would exceed the remaining
/// budget; the first overflowing candidate is truncated to fit and filling
/// stops. With a compressor, each text is compressed before allotment so
/// more distinct candidates fit.
pub async fn build_context(
    ranked: &RankedResult,
    budget: usize,
    compressor: Option<&dyn Compressor>,
    cancel: &CancellationToken,
) -> Result<SynthesisContext> {
    let mut context = SynthesisContext {
        slots: Vec::new(),
        total_tokens: 0,
        budget,
    };

    // Equal-share compression target, floored so short texts pass through
    let compression_target = (budget / ranked.len().max(1)).max(64);

    for item in &ranked.items {
        let remaining = budget.saturating_sub(context.total_tokens);
        if remaining == 0 {
            break;
        }

        let mut text = item.candidate.text.clone();
        if let Some(compressor) = compressor {
            match compressor.compress(&text, compression_target, cancel).await {
                Ok(compressed) if !compressed.trim().is_empty() => text = compressed,
                Ok(_) => {}
                Err(crate::error::Error::Cancelled) => return Err(crate::error::Error::Cancelled),
                Err(e) => {
                    tracing::warn!("compression failed, using full text: {e}");
                }
            }
        }

        let tokens = estimate_tokens(&text);
        if tokens <= remaining {
            context.total_tokens += tokens;
            context.slots.push(ContextSlot {
                candidate: item.clone(),
                text,
                tokens,
                truncated: false,
            });
        } else {
            let truncated = truncate_to_tokens(&text, remaining);
            let tokens = estimate_tokens(&truncated);
            context.total_tokens += tokens;
            context.slots.push(ContextSlot {
                candidate: item.clone(),
                text: truncated,
                tokens,
                truncated: true,
            });
            break;
        }
    }

    debug_assert!(context.total_tokens <= budget);
    Ok(context)
}
