//! Message-list assembly from the masked prompt and retrieved context.

use tiktoken_rs::CoreBPE;

use super::count_message_tokens;
use crate::models::schemas::ChatMessage;

pub const SYSTEM_PROMPT: &str = "You are an AI assistant. Be helpful, accurate, and concise. \
     Respect user privacy — never ask for personal information.";

const CONTEXT_SEPARATOR: &str = "\n---\n";

pub struct PromptBuilder {
    bpe: CoreBPE,
}

impl PromptBuilder {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            bpe: tiktoken_rs::cl100k_base()?,
        })
    }

    /// Assemble the outbound message list: the fixed system preamble, an
    /// optional context message, and the (already masked) user prompt.
    /// Returns the messages and their token count.
    pub fn build(
        &self,
        masked_prompt: &str,
        context: Option<&[String]>,
    ) -> (Vec<ChatMessage>, usize) {
        let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT)];

        if let Some(snippets) = context {
            if !snippets.is_empty() {
                let block = snippets.join(CONTEXT_SEPARATOR);
                messages.push(ChatMessage::system(format!("Relevant context:\n{}", block)));
            }
        }

        messages.push(ChatMessage::user(masked_prompt));

        let token_count = count_message_tokens(&self.bpe, &messages);
        (messages, token_count)
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}
