//! Per-request pipeline state and the structured audit trail.
//!
//! A `RequestContext` is owned by exactly one request task for its whole
//! lifetime; stages populate it in order and every stage appends one
//! `AuditEntry`. The append order of the trail IS the trace.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::schemas::{
    ChatMessage, LatencyStats, RedactionInfo, Route, TokenStats,
};

/// Canonical stage names, shared by the orchestrator, the audit trail,
/// and the tests that assert on trail contents.
pub mod stages {
    pub const POLICY_FETCH: &str = "policy_fetch";
    pub const INPUT_GUARDRAILS: &str = "input_guardrails";
    pub const PII_GUARD: &str = "pii_guard";
    pub const MEMORY_RETRIEVAL: &str = "memory_retrieval";
    pub const PROMPT_BUILD: &str = "prompt_build";
    pub const PROMPT_COMPRESS: &str = "prompt_compress";
    pub const ROUTING: &str = "routing";
    pub const INFERENCE: &str = "inference";
    pub const OUTPUT_GUARDRAILS: &str = "output_guardrails";
    pub const POST_PROCESS: &str = "post_process";
    pub const FALLBACK: &str = "fallback";
    pub const MEMORY_STORE: &str = "memory_store";
    pub const DATAHAVEN_LOG: &str = "datahaven_log";
}

/// Structured audit trail entry. Append-only, ordered by append position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub stage: String,
    pub timestamp: String,
    pub duration_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_decision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_count: Option<usize>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

impl AuditEntry {
    pub fn new(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms: 0.0,
            route_decision: None,
            provider: None,
            token_count: None,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn duration(mut self, ms: f64) -> Self {
        self.duration_ms = round2(ms);
        self
    }

    pub fn route(mut self, route: Route) -> Self {
        self.route_decision = Some(route.to_string());
        self
    }

    pub fn provider(mut self, provider: &str) -> Self {
        self.provider = Some(provider.to_string());
        self
    }

    pub fn tokens(mut self, count: usize) -> Self {
        self.token_count = Some(count);
        self
    }

    pub fn meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Marks the stage as soft-failed; the pipeline continued anyway.
    pub fn error(self, error: impl std::fmt::Display) -> Self {
        self.meta("status", "error").meta("error", error.to_string())
    }
}

pub fn round2(ms: f64) -> f64 {
    (ms * 100.0).round() / 100.0
}

/// The value threaded through all pipeline stages.
#[derive(Debug)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub user_id: Option<String>,

    pub raw_prompt: String,
    pub masked_prompt: String,
    pub redaction: RedactionInfo,
    pub context_snippets: Vec<String>,
    pub messages: Vec<ChatMessage>,
    pub compressed_messages: Vec<ChatMessage>,

    pub route: Option<Route>,
    pub provider: Option<String>,
    pub model: String,

    pub token_stats: TokenStats,
    /// Total tokens reported by the provider that answered.
    pub inference_tokens: usize,
    pub latency: LatencyStats,

    pub audit_trail: Vec<AuditEntry>,
}

impl RequestContext {
    pub fn new(request_id: Uuid, user_id: Option<String>, raw_prompt: String) -> Self {
        Self {
            request_id,
            user_id,
            raw_prompt,
            masked_prompt: String::new(),
            redaction: RedactionInfo::default(),
            context_snippets: Vec::new(),
            messages: Vec::new(),
            compressed_messages: Vec::new(),
            route: None,
            provider: None,
            model: String::new(),
            token_stats: TokenStats::default(),
            inference_tokens: 0,
            latency: LatencyStats::default(),
            audit_trail: Vec::new(),
        }
    }

    /// Append a trail entry and mirror it to the process log.
    pub fn record(&mut self, entry: AuditEntry) {
        tracing::debug!(
            request_id = %short_id(&self.request_id),
            stage = %entry.stage,
            duration_ms = entry.duration_ms,
            route = entry.route_decision.as_deref().unwrap_or("-"),
            provider = entry.provider.as_deref().unwrap_or("-"),
            "audit"
        );
        self.audit_trail.push(entry);
    }

    /// Record a provider switch mid-inference.
    pub fn record_fallback(&mut self, from: &str, to: &str, reason: &str) {
        tracing::info!(
            request_id = %short_id(&self.request_id),
            from_provider = from,
            to_provider = to,
            reason,
            "provider fallback"
        );
        self.record(
            AuditEntry::new(stages::FALLBACK)
                .meta("from_provider", from)
                .meta("to_provider", to)
                .meta("reason", reason),
        );
    }

    /// Messages actually sent to the provider: compressed when available.
    pub fn outbound_messages(&self) -> &[ChatMessage] {
        if self.compressed_messages.is_empty() {
            &self.messages
        } else {
            &self.compressed_messages
        }
    }
}

fn short_id(id: &Uuid) -> String {
    id.to_string().chars().take(8).collect()
}
