//! Query term expansion

use std::collections::HashMap;
use unicode_segmentation::UnicodeSegmentation;

/// Common words that carry no retrieval signal
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from", "how",
    "i", "in", "is", "it", "its", "of", "on", "or", "our", "that", "the", "their", "this", "to",
    "was", "we", "were", "what", "when", "where", "which", "who", "why", "will", "with", "you",
    "your",
];

/// Domain synonym map: term -> related expansions
fn synonym_map() -> HashMap<&'static str, &'static [&'static str]> {
    let mut m = HashMap::new();
    m.insert("refund", &["reimbursement", "return", "repayment"][..]);
    m.insert("policy", &["rule", "guideline", "procedure"]);
    m.insert("price", &["cost", "fee", "pricing", "rate"]);
    m.insert("cancel", &["cancellation", "terminate", "revoke"]);
    m.insert("delivery", &["shipping", "shipment", "dispatch"]);
    m.insert("warranty", &["guarantee", "coverage"]);
    m.insert("contract", &["agreement", "terms"]);
    m.insert("invoice", &["bill", "billing", "receipt"]);
    m.insert("deadline", &["due", "cutoff", "expiry"]);
    m.insert("error", &["failure", "fault", "issue"]);
    m.insert("config", &["configuration", "settings"]);
    m.insert("login", &["authentication", "signin", "credentials"]);
    m
}

/// Compute up to `max_terms` expansion terms for a query
///
/// Terms are lowercase content words in order of first appearance; with
/// `include_synonyms` each term may pull related words from the synonym
/// table. Output is deterministic for a given input.
pub fn expand_terms(text: &str, max_terms: usize, include_synonyms: bool) -> Vec<String> {
    if max_terms == 0 {
        return Vec::new();
    }

    let synonyms = if include_synonyms {
        Some(synonym_map())
    } else {
        None
    };

    let mut terms: Vec<String> = Vec::new();
    let mut seen = std::collections::HashSet::new();

    let push = |term: String,
                terms: &mut Vec<String>,
                seen: &mut std::collections::HashSet<String>| {
        if terms.len() < max_terms && !seen.contains(&term) {
            seen.insert(term.clone());
            terms.push(term);
        }
    };

    for word in text.unicode_words() {
        let lower = word.to_lowercase();
        if lower.len() < 2 || STOPWORDS.contains(&lower.as_str()) {
            continue;
        }

        push(lower.clone(), &mut terms, &mut seen);

        if let Some(map) = &synonyms {
            if let Some(related) = map.get(lower.as_str()) {
                for syn in *related {
                    push(syn.to_string(), &mut terms, &mut seen);
                }
            }
        }

        if terms.len() >= max_terms {
            break;
        }
    }

    terms
}
