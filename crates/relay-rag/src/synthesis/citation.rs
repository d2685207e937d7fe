//! Citation extraction from model output

use regex::Regex;
use std::sync::OnceLock;
use unicode_segmentation::UnicodeSegmentation;

use crate::types::Citation;

use super::context::SynthesisContext;

/// Result of parsing citation markers out of a model answer
///
/// Model output is never assumed well-formed: an answer with citations
/// requested but no usable markers is `Unparsable`, which the synthesizer
/// degrades to an empty citation list.
#[derive(Debug, Clone)]
pub enum CitationParse {
    Parsed(Vec<Citation>),
    Unparsable,
}

fn marker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[(\d+)\]").expect("valid regex"))
}

/// Parse `[n]` markers, linking each to the n-th context slot
///
/// Markers with out-of-range indices are skipped. Spans are character
/// offsets of the marker in the answer text.
pub fn parse_citations(answer: &str, context: &SynthesisContext) -> CitationParse {
    let mut citations = Vec::new();

    for capture in marker_pattern().captures_iter(answer) {
        let Some(marker) = capture.get(0) else {
            continue;
        };
        let Some(index) = capture
            .get(1)
            .and_then(|m| m.as_str().parse::<usize>().ok())
        else {
            continue;
        };
        if index == 0 || index > context.slots.len() {
            tracing::debug!("citation marker [{index}] out of range, skipping");
            continue;
        }

        let slot = &context.slots[index - 1];
        let span_start = answer[..marker.start()].chars().count();
        let span_len = marker.as_str().chars().count();
        citations.push(Citation {
            candidate: slot.candidate.candidate.key(),
            span: (span_start, span_start + span_len),
            fused_score: slot.candidate.candidate.fused_score,
            rank: slot.candidate.rank,
        });
    }

    if citations.is_empty() {
        CitationParse::Unparsable
    } else {
        CitationParse::Parsed(citations)
    }
}

/// Confidence heuristic: fraction of sentences carrying at least one
/// citation, weighted by the top candidate's fused score
pub fn confidence(answer: &str, citations: &[Citation], top_fused_score: f32) -> f32 {
    if citations.is_empty() {
        return 0.0;
    }

    let sentences: Vec<&str> = answer.unicode_sentences().collect();
    if sentences.is_empty() {
        return 0.0;
    }

    let cited = sentences
        .iter()
        .filter(|s| marker_pattern().is_match(s))
        .count();
    let fraction = cited as f32 / sentences.len() as f32;

    (fraction * top_fused_score).clamp(0.0, 1.0)
}
