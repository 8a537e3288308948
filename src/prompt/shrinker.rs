//! Stop-word prompt compression.
//!
//! System messages pass through verbatim; user/assistant content is
//! reduced toward 60% of its word count by dropping common English
//! stop-words. A semantic compressor can replace this module behind the
//! same contract.

use once_cell::sync::Lazy;
use std::collections::HashSet;
use tiktoken_rs::CoreBPE;

use super::count_message_tokens;
use crate::models::schemas::ChatMessage;

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "the", "is", "are", "was", "were", "be", "been", "being",
        "have", "has", "had", "do", "does", "did", "will", "would", "shall",
        "should", "may", "might", "must", "can", "could", "am", "it", "its",
        "this", "that", "these", "those", "i", "you", "he", "she", "we",
        "they", "me", "him", "her", "us", "them", "my", "your", "his",
        "our", "their", "of", "in", "to", "for", "with", "on", "at", "from",
        "by", "as", "into", "about", "between", "through", "during", "just",
        "also", "very", "really", "quite", "rather", "too", "so", "then",
    ]
    .into_iter()
    .collect()
});

const TARGET_RATIO: f64 = 0.6;

/// Drop stop-words until the kept count reaches ⌈0.6·N⌉ words.
fn lightweight_compress(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return text.to_string();
    }

    let target_len = ((words.len() as f64 * TARGET_RATIO).ceil() as usize).max(1);
    let mut kept: Vec<&str> = Vec::with_capacity(target_len);

    for word in &words {
        let bare = word
            .trim_matches(|c| ".,!?;:".contains(c))
            .to_lowercase();
        if STOP_WORDS.contains(bare.as_str()) {
            continue;
        }
        kept.push(word);
        if kept.len() >= target_len {
            break;
        }
    }

    // All stop-words: keep the leading slice unfiltered.
    if kept.is_empty() {
        kept.extend(&words[..target_len]);
    }

    kept.join(" ").trim().to_string()
}

pub struct PromptShrinker {
    bpe: CoreBPE,
}

impl PromptShrinker {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            bpe: tiktoken_rs::cl100k_base()?,
        })
    }

    /// Returns `(compressed_messages, tokens_after, tokens_saved)`.
    pub fn compress(
        &self,
        messages: &[ChatMessage],
        original_token_count: usize,
    ) -> (Vec<ChatMessage>, usize, usize) {
        let compressed: Vec<ChatMessage> = messages
            .iter()
            .map(|msg| {
                if msg.role == "system" {
                    msg.clone()
                } else {
                    ChatMessage {
                        role: msg.role.clone(),
                        content: lightweight_compress(&msg.content),
                    }
                }
            })
            .collect();

        let after = count_message_tokens(&self.bpe, &compressed);
        let saved = original_token_count.saturating_sub(after);
        (compressed, after, saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_messages_pass_through_verbatim() {
        let shrinker = PromptShrinker::new().unwrap();
        let messages = vec![
            ChatMessage::system("You are a helpful assistant with the rules."),
            ChatMessage::user("the quick brown fox is in the garden with a hat"),
        ];
        let (compressed, _, _) = shrinker.compress(&messages, 100);
        assert_eq!(compressed[0].content, messages[0].content);
        assert_ne!(compressed[1].content, messages[1].content);
    }

    #[test]
    fn test_stop_words_dropped_from_user_content() {
        let out = lightweight_compress("the cat is on the mat with a hat");
        assert!(!out.split_whitespace().any(|w| w == "the" || w == "is"));
        assert!(out.contains("cat"));
        assert!(out.contains("mat"));
    }

    #[test]
    fn test_target_caps_kept_words() {
        // 10 content-heavy words, none of which are stop-words: the output
        // stops at ⌈0.6·10⌉ = 6 words.
        let out = lightweight_compress(
            "alpha bravo charlie delta echo foxtrot golf hotel india juliet",
        );
        assert_eq!(out.split_whitespace().count(), 6);
        assert!(out.starts_with("alpha bravo"));
    }

    #[test]
    fn test_all_stop_words_falls_back_to_leading_slice() {
        let out = lightweight_compress("the a an is are was");
        assert_eq!(out, "the a an is");
    }

    #[test]
    fn test_empty_content_unchanged() {
        assert_eq!(lightweight_compress(""), "");
    }

    #[test]
    fn test_saved_never_negative() {
        let shrinker = PromptShrinker::new().unwrap();
        let messages = vec![ChatMessage::user("short")];
        // Claimed original smaller than the recount: saved clamps to 0.
        let (_, after, saved) = shrinker.compress(&messages, 1);
        assert!(after >= 1);
        assert_eq!(saved, 0);
    }

    #[test]
    fn test_compression_accounting_balances() {
        let shrinker = PromptShrinker::new().unwrap();
        let messages = vec![ChatMessage::user(
            "this is a very long sentence that we would like to see compressed \
             because it is full of the most common stop words in the language",
        )];
        let original = 60;
        let (_, after, saved) = shrinker.compress(&messages, original);
        assert_eq!(saved, original.saturating_sub(after));
    }

    #[test]
    fn test_punctuation_stripped_for_stopword_check() {
        let out = lightweight_compress("Look, the. dog; barked! loudly? today");
        assert!(!out.contains("the."));
    }
}
