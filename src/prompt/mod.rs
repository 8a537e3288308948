//! Prompt assembly and compression.
//!
//! Both halves share the chat-model token accounting used by
//! OpenAI-style APIs: 4 tokens of role framing per message plus the
//! encoded content length, plus 2 tokens of reply priming. Keeping the
//! constants identical on both sides makes the before/after stats
//! directly comparable.

pub mod builder;
pub mod shrinker;

use tiktoken_rs::CoreBPE;

use crate::models::schemas::ChatMessage;

pub(crate) const MESSAGE_OVERHEAD_TOKENS: usize = 4;
pub(crate) const REPLY_PRIMING_TOKENS: usize = 2;

pub(crate) fn count_message_tokens(bpe: &CoreBPE, messages: &[ChatMessage]) -> usize {
    let mut total = 0;
    for msg in messages {
        total += MESSAGE_OVERHEAD_TOKENS;
        total += bpe.encode_with_special_tokens(&msg.content).len();
    }
    total + REPLY_PRIMING_TOKENS
}
