//! Prompt assembly for answer synthesis

use crate::providers::ChatMessage;

use super::context::SynthesisContext;

/// Builds the grounded answer prompt from the assembled context
pub struct PromptBuilder;

impl PromptBuilder {
    /// Render the context as numbered source blocks
    pub fn render_context(context: &SynthesisContext) -> String {
        let mut rendered = String::new();
        for (i, slot) in context.slots.iter().enumerate() {
            rendered.push_str(&format!("[{}]\n{}\n\n---\n\n", i + 1, slot.text));
        }
        rendered
    }

    /// Build the synthesis messages
    ///
    /// `refinement_hint` is set on refinement attempts when the previous
    /// answer scored below the confidence threshold.
    pub fn build_messages(
        question: &str,
        rendered_context: &str,
        include_citations: bool,
        refinement_hint: Option<&str>,
    ) -> Vec<ChatMessage> {
        let citation_rules = if include_citations {
            "Every claim must cite its source by marking the source number \
             in square brackets, like [1] or [3], immediately after the claim. \
             Use only the numbered sources below.\n"
        } else {
            ""
        };

        let system = format!(
            "You are a document-grounded assistant that ONLY uses information \
             from the provided sources.\n\
             Rules:\n\
             1. Use only information explicitly stated in the sources.\n\
             2. If the sources do not contain the answer, say so plainly.\n\
             3. Never use external knowledge or make inferences beyond the sources.\n\
             {citation_rules}"
        );

        let mut user = format!("SOURCES:\n\n{rendered_context}QUESTION: {question}");
        if let Some(hint) = refinement_hint {
            user.push_str(&format!("\n\n{hint}"));
        }

        vec![ChatMessage::system(system), ChatMessage::user(user)]
    }

    /// Hint appended on refinement attempts
    pub fn refinement_hint(attempt: usize) -> String {
        format!(
            "Your previous answer (attempt {attempt}) lacked source support. \
             Answer again, keeping strictly to the sources and citing a source \
             number for every sentence."
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthesis::context::{ContextSlot, SynthesisContext};
    use crate::types::{Candidate, RankedCandidate};
    use uuid::Uuid;

    fn context_with(texts: &[&str]) -> SynthesisContext {
        let doc = Uuid::new_v4();
        let slots = texts
            .iter()
            .enumerate()
            .map(|(i, text)| ContextSlot {
                candidate: RankedCandidate {
                    candidate: Candidate {
                        document_id: doc,
                        chunk_index: i as u32,
                        text: text.to_string(),
                        embedding: Vec::new(),
                        vector_score: Some(0.9),
                        keyword_score: None,
                        fused_score: 0.9,
                        modified_at: None,
                    },
                    rank: i,
                    relevance: 0.9,
                    diversity_penalty: 0.0,
                    mmr_score: 0.9,
                },
                text: text.to_string(),
                tokens: 10,
                truncated: false,
            })
            .collect();
        SynthesisContext {
            slots,
            total_tokens: 20,
            budget: 100,
        }
    }

    #[test]
    fn context_blocks_are_numbered_from_one() {
        let rendered = PromptBuilder::render_context(&context_with(&["alpha", "beta"]));
        assert!(rendered.contains("[1]\nalpha"));
        assert!(rendered.contains("[2]\nbeta"));
    }

    #[test]
    fn citation_rules_follow_the_flag() {
        let with = PromptBuilder::build_messages("q", "ctx", true, None);
        assert!(with[0].content.contains("square brackets"));

        let without = PromptBuilder::build_messages("q", "ctx", false, None);
        assert!(!without[0].content.contains("square brackets"));
    }

    #[test]
    fn refinement_hint_lands_in_user_message() {
        let hint = PromptBuilder::refinement_hint(1);
        let messages = PromptBuilder::build_messages("q", "ctx", true, Some(&hint));
        assert!(messages[1].content.contains("attempt 1"));
    }
}
