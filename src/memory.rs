//! Conversation memory.
//!
//! The core only depends on the `MemoryStore` seam; the shipped
//! implementation is a bounded recency list (upsert by doc id, newest
//! wins, oldest evicted). A vector store can be swapped in behind the
//! same trait. Retrieval failures are treated as empty context by the
//! pipeline, never as request failures.

use std::collections::VecDeque;
use std::sync::Mutex;

pub trait MemoryStore: Send + Sync {
    fn retrieve(&self, query: &str, top_k: usize) -> Vec<String>;
    fn store(&self, text: &str, doc_id: &str, metadata: serde_json::Value);
    fn count(&self) -> usize;
}

struct MemoryEntry {
    doc_id: String,
    text: String,
    #[allow(dead_code)]
    metadata: serde_json::Value,
}

pub struct RecencyMemory {
    capacity: usize,
    entries: Mutex<VecDeque<MemoryEntry>>,
}

impl RecencyMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::new()),
        }
    }
}

impl MemoryStore for RecencyMemory {
    fn retrieve(&self, _query: &str, top_k: usize) -> Vec<String> {
        let Ok(entries) = self.entries.lock() else {
            return Vec::new();
        };
        let skip = entries.len().saturating_sub(top_k);
        entries.iter().skip(skip).map(|e| e.text.clone()).collect()
    }

    fn store(&self, text: &str, doc_id: &str, metadata: serde_json::Value) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        // Upsert: a re-stored doc id moves to the newest slot.
        entries.retain(|e| e.doc_id != doc_id);
        entries.push_back(MemoryEntry {
            doc_id: doc_id.to_string(),
            text: text.to_string(),
            metadata,
        });
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    fn count(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_retrieve_returns_most_recent() {
        let mem = RecencyMemory::new(10);
        for i in 0..5 {
            mem.store(&format!("doc {}", i), &format!("id-{}", i), json!({}));
        }
        assert_eq!(mem.retrieve("anything", 2), vec!["doc 3", "doc 4"]);
        assert_eq!(mem.count(), 5);
    }

    #[test]
    fn test_upsert_moves_entry_to_newest() {
        let mem = RecencyMemory::new(10);
        mem.store("first", "a", json!({}));
        mem.store("second", "b", json!({}));
        mem.store("first updated", "a", json!({}));
        assert_eq!(mem.count(), 2);
        assert_eq!(mem.retrieve("q", 1), vec!["first updated"]);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mem = RecencyMemory::new(2);
        mem.store("one", "1", json!({}));
        mem.store("two", "2", json!({}));
        mem.store("three", "3", json!({}));
        assert_eq!(mem.count(), 2);
        assert_eq!(mem.retrieve("q", 5), vec!["two", "three"]);
    }

    #[test]
    fn test_empty_store_retrieves_nothing() {
        let mem = RecencyMemory::new(4);
        assert!(mem.retrieve("q", 3).is_empty());
        assert_eq!(mem.count(), 0);
    }
}
