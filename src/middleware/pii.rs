//! Reversible PII masking.
//!
//! Detected spans are replaced with `<TYPE_N>` placeholders; the
//! placeholder → original map lives in a process-wide store keyed by
//! request id, created at mask time and deleted right after unmask.
//! Two passes: a fixed regex bank, then an optional NER model over the
//! text already carrying placeholders.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::models::schemas::RedactionInfo;

/// Regex-detected entity types, in pass order. Order matters: each pass
/// sees the text as left by the previous one.
static REGEX_PATTERNS: &[(&str, &str)] = &[
    ("EMAIL", r"\b[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}\b"),
    (
        "PHONE",
        r"\b(\+?\d{1,3}[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b",
    ),
    ("SSN", r"\b\d{3}-\d{2}-\d{4}\b"),
    ("CREDIT_CARD", r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b"),
    ("IP_ADDRESS", r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b"),
];

static REGEX_BANK: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    REGEX_PATTERNS
        .iter()
        .map(|(ty, pattern)| (*ty, Regex::new(pattern).expect("invalid PII regex")))
        .collect()
});

/// A named entity span reported by the NER model.
#[derive(Debug, Clone)]
pub struct Entity {
    pub label: String,
    pub text: String,
}

/// Pluggable named-entity recognizer (spaCy-style: pure text → spans).
/// The gateway degrades to regex-only detection when none is wired.
pub trait NerModel: Send + Sync {
    fn entities(&self, text: &str) -> Vec<Entity>;
}

fn map_ner_label(label: &str) -> Option<&'static str> {
    match label {
        "PERSON" => Some("NAME"),
        "ORG" => Some("ORG"),
        "GPE" => Some("LOCATION"),
        _ => None,
    }
}

struct StoredMap {
    /// Ordered placeholder → original pairs; unmask substitutes in this
    /// exact order.
    pairs: Vec<(String, String)>,
    created_at: Instant,
}

pub struct PiiGuard {
    ner: Option<Box<dyn NerModel>>,
    store: DashMap<Uuid, StoredMap>,
}

impl PiiGuard {
    pub fn new(ner: Option<Box<dyn NerModel>>) -> Self {
        if ner.is_none() {
            tracing::warn!(
                "NER model not available - falling back to regex-only PII detection"
            );
        }
        Self {
            ner,
            store: DashMap::new(),
        }
    }

    /// Replace PII spans with placeholders and remember the mapping under
    /// `request_id`. Repeated literals map to a single placeholder.
    pub fn mask(&self, text: &str, request_id: Uuid) -> (String, RedactionInfo) {
        let mut pairs: Vec<(String, String)> = Vec::new();
        let mut counters: BTreeMap<String, usize> = BTreeMap::new();
        let mut masked = text.to_string();

        for (entity_type, pattern) in REGEX_BANK.iter() {
            // Matches are collected on the text as it stood when this
            // type's pass began; replacement mutates the evolving copy.
            let snapshot = masked.clone();
            for m in pattern.find_iter(&snapshot) {
                let original = m.as_str();
                if pairs.iter().any(|(_, o)| o.as_str() == original) {
                    continue;
                }
                let placeholder = next_placeholder(&mut counters, entity_type);
                masked = masked.replacen(original, &placeholder, 1);
                pairs.push((placeholder, original.to_string()));
            }
        }

        if let Some(ner) = &self.ner {
            for entity in ner.entities(&masked) {
                let Some(mapped_type) = map_ner_label(&entity.label) else {
                    continue;
                };
                // Spans shaped like placeholders are already masked.
                if entity.text.starts_with('<') && entity.text.ends_with('>') {
                    continue;
                }
                let placeholder = next_placeholder(&mut counters, mapped_type);
                masked = masked.replacen(&entity.text, &placeholder, 1);
                pairs.push((placeholder, entity.text.clone()));
            }
        }

        let info = RedactionInfo {
            count: pairs.len(),
            types: counters,
        };
        self.store.insert(
            request_id,
            StoredMap {
                pairs,
                created_at: Instant::now(),
            },
        );
        (masked, info)
    }

    /// Substitute every remembered placeholder back with its original, in
    /// insertion order. A cleared or unknown id leaves the text untouched.
    pub fn unmask(&self, text: &str, request_id: Uuid) -> String {
        let Some(stored) = self.store.get(&request_id) else {
            return text.to_string();
        };
        let mut result = text.to_string();
        for (placeholder, original) in &stored.pairs {
            result = result.replace(placeholder, original);
        }
        result
    }

    /// Drop the mapping for a finished request. Must run in a
    /// guaranteed-execution scope so the store cannot grow.
    pub fn clear(&self, request_id: Uuid) {
        self.store.remove(&request_id);
    }

    /// Reap mappings whose request never reached unmask (crashed tasks,
    /// cancelled connections). Returns the number of entries removed.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let before = self.store.len();
        self.store
            .retain(|_, stored| stored.created_at.elapsed() < max_age);
        before - self.store.len()
    }

    #[cfg(test)]
    fn stored_count(&self) -> usize {
        self.store.len()
    }
}

fn next_placeholder(counters: &mut BTreeMap<String, usize>, entity_type: &str) -> String {
    let count = counters
        .entry(entity_type.to_string())
        .and_modify(|c| *c += 1)
        .or_insert(1);
    format!("<{}_{}>", entity_type, count)
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> PiiGuard {
        PiiGuard::new(None)
    }

    #[test]
    fn test_mask_email_and_phone() {
        let guard = guard();
        let id = Uuid::new_v4();
        let (masked, info) =
            guard.mask("Email me at alice@example.com about 555-123-4567", id);
        assert!(masked.contains("<EMAIL_1>"));
        assert!(masked.contains("<PHONE_1>"));
        assert!(!masked.contains("alice@example.com"));
        assert_eq!(info.count, 2);
        assert_eq!(info.types["EMAIL"], 1);
        assert_eq!(info.types["PHONE"], 1);
    }

    #[test]
    fn test_mask_unmask_round_trip_all_types() {
        let guard = guard();
        let id = Uuid::new_v4();
        let original = "Reach bob.smith@corp.io or 555-867-5309. SSN 123-45-6789, \
                        card 4111 1111 1111 1111, host 192.168.1.20.";
        let (masked, info) = guard.mask(original, id);
        assert_eq!(info.count, 5);
        assert!(!masked.contains("bob.smith@corp.io"));
        assert!(!masked.contains("123-45-6789"));
        assert_eq!(guard.unmask(&masked, id), original);
    }

    #[test]
    fn test_repeated_literal_shares_placeholder() {
        let guard = guard();
        let id = Uuid::new_v4();
        let (masked, info) =
            guard.mask("ping alice@example.com, then alice@example.com again", id);
        assert_eq!(info.count, 1);
        // First occurrence replaced; the duplicate literal is skipped, so
        // unmask still restores the full text.
        assert_eq!(masked.matches("<EMAIL_1>").count(), 1);
        assert!(guard.unmask(&masked, id).contains("alice@example.com, then alice@example.com"));
    }

    #[test]
    fn test_per_type_counters_are_independent() {
        let guard = guard();
        let id = Uuid::new_v4();
        let (masked, info) = guard.mask(
            "a@x.com then b@y.org from 10.0.0.1",
            id,
        );
        assert!(masked.contains("<EMAIL_1>"));
        assert!(masked.contains("<EMAIL_2>"));
        assert!(masked.contains("<IP_ADDRESS_1>"));
        assert_eq!(info.types["EMAIL"], 2);
    }

    #[test]
    fn test_unmask_after_clear_is_identity() {
        let guard = guard();
        let id = Uuid::new_v4();
        let (masked, _) = guard.mask("mail me: carol@site.net", id);
        guard.clear(id);
        assert_eq!(guard.unmask(&masked, id), masked);
        assert_eq!(guard.stored_count(), 0);
    }

    #[test]
    fn test_unknown_request_id_is_identity() {
        let guard = guard();
        assert_eq!(guard.unmask("<EMAIL_1> hello", Uuid::new_v4()), "<EMAIL_1> hello");
    }

    #[test]
    fn test_literal_placeholder_in_prompt_round_trips_as_literal() {
        // A prompt containing the literal string <EMAIL_1> is not PII; the
        // regex bank ignores it and unmask substitutes only stored pairs.
        let guard = guard();
        let id = Uuid::new_v4();
        let (masked, info) = guard.mask("the token <EMAIL_1> is literal", id);
        assert_eq!(info.count, 0);
        assert_eq!(guard.unmask(&masked, id), "the token <EMAIL_1> is literal");
    }

    #[test]
    fn test_sweep_reaps_only_old_entries() {
        let guard = guard();
        let old = Uuid::new_v4();
        let fresh = Uuid::new_v4();
        guard.mask("a@x.com", old);
        std::thread::sleep(Duration::from_millis(30));
        guard.mask("b@y.com", fresh);
        let reaped = guard.sweep(Duration::from_millis(20));
        assert_eq!(reaped, 1);
        assert_eq!(guard.stored_count(), 1);
    }

    struct StubNer;

    impl NerModel for StubNer {
        fn entities(&self, text: &str) -> Vec<Entity> {
            let mut out = Vec::new();
            if text.contains("Alice Johnson") {
                out.push(Entity { label: "PERSON".into(), text: "Alice Johnson".into() });
            }
            if text.contains("Acme Corp") {
                out.push(Entity { label: "ORG".into(), text: "Acme Corp".into() });
            }
            if text.contains("<EMAIL_1>") {
                // A model may report placeholders as entities; they must
                // be skipped.
                out.push(Entity { label: "PERSON".into(), text: "<EMAIL_1>".into() });
            }
            out.push(Entity { label: "DATE".into(), text: "tomorrow".into() });
            out
        }
    }

    #[test]
    fn test_ner_pass_maps_labels_and_skips_placeholders() {
        let guard = PiiGuard::new(Some(Box::new(StubNer)));
        let id = Uuid::new_v4();
        let (masked, info) = guard.mask(
            "Alice Johnson of Acme Corp wrote to alice@example.com tomorrow",
            id,
        );
        assert!(masked.contains("<NAME_1>"));
        assert!(masked.contains("<ORG_1>"));
        assert!(masked.contains("<EMAIL_1>"));
        // Unmapped labels (DATE) are ignored.
        assert!(masked.contains("tomorrow"));
        assert_eq!(info.count, 3);
        let restored = guard.unmask(&masked, id);
        assert!(restored.contains("Alice Johnson of Acme Corp"));
        assert!(restored.contains("alice@example.com"));
    }
}
