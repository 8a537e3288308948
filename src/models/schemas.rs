//! Wire types for the gateway HTTP surface.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::context::AuditEntry;
use crate::models::policy::Policy;

/// Client-requested privacy/performance preference. May be overridden by
/// the enterprise policy (a STRICT policy always wins).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserMode {
    Strict,
    Balanced,
    Performance,
}

impl Default for UserMode {
    fn default() -> Self {
        UserMode::Balanced
    }
}

/// Cloud providers a client may prefer for CLOUD-routed requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CloudProvider {
    Groq,
    Openai,
    Mistral,
    Openrouter,
}

impl Default for CloudProvider {
    fn default() -> Self {
        CloudProvider::Groq
    }
}

impl CloudProvider {
    /// Registry name for this selection.
    pub fn provider_name(&self) -> &'static str {
        match self {
            CloudProvider::Groq => "groq",
            CloudProvider::Openai => "openai",
            CloudProvider::Mistral => "mistral",
            CloudProvider::Openrouter => "openrouter",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Route {
    Local,
    Cloud,
    Blocked,
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Route::Local => write!(f, "LOCAL"),
            Route::Cloud => write!(f, "CLOUD"),
            Route::Blocked => write!(f, "BLOCKED"),
        }
    }
}

/// One chat turn, OpenAI wire shape. All providers consume this and
/// translate at their own boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }
}

// ── Request / Response ────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayRequest {
    pub prompt: String,
    #[serde(default)]
    pub mode: UserMode,
    #[serde(default)]
    pub cloud_provider: CloudProvider,
}

pub const PROMPT_MAX_CHARS: usize = 10_000;

impl GatewayRequest {
    /// Enforces the 1..10000 char contract before the pipeline runs.
    pub fn validate(&self) -> Result<(), String> {
        if self.prompt.is_empty() {
            return Err("prompt must not be empty".into());
        }
        if self.prompt.chars().count() > PROMPT_MAX_CHARS {
            return Err(format!("prompt exceeds {} characters", PROMPT_MAX_CHARS));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenStats {
    pub original: usize,
    pub compressed: usize,
    pub saved: usize,
    pub compression_ratio: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencyStats {
    pub policy_fetch_ms: f64,
    pub input_guardrails_ms: f64,
    pub pii_ms: f64,
    pub memory_ms: f64,
    pub prompt_build_ms: f64,
    pub compression_ms: f64,
    pub routing_ms: f64,
    pub inference_ms: f64,
    pub output_guardrails_ms: f64,
    pub post_process_ms: f64,
    pub total_ms: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardrailInfo {
    pub input_blocked: bool,
    pub output_filtered: bool,
    pub input_reason: String,
    pub output_reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedactionInfo {
    pub count: usize,
    pub types: BTreeMap<String, usize>,
}

/// Cryptographic verification proof from DataHaven.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataHavenVerification {
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub log_id: String,
    #[serde(default)]
    pub content_hash: String,
    #[serde(default)]
    pub merkle_leaf: String,
    #[serde(default)]
    pub merkle_root: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub algorithm: String,
    #[serde(default)]
    pub chain: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default = "default_proof_status")]
    pub status: String,
}

fn default_proof_status() -> String {
    "pending".into()
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayResponse {
    pub request_id: String,
    pub response: String,
    pub route: Route,
    pub model_used: String,
    pub token_stats: TokenStats,
    pub latency: LatencyStats,
    pub estimated_cost: f64,
    pub redaction: RedactionInfo,
    pub privacy_level: String,
    pub guardrails: GuardrailInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datahaven_proof: Option<DataHavenVerification>,
}

/// MCP-surface response: the gateway response plus the full audit trail
/// and the policy that governed the request.
#[derive(Debug, Clone, Serialize)]
pub struct McpGatewayResponse {
    pub request_id: String,
    pub response: String,
    pub route: Route,
    pub provider: String,
    pub model_used: String,
    pub token_stats: TokenStats,
    pub latency: LatencyStats,
    pub estimated_cost: f64,
    pub redaction: RedactionInfo,
    pub privacy_level: String,
    pub guardrails: GuardrailInfo,
    pub audit_trail: Vec<AuditEntry>,
    pub policy_applied: Policy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datahaven_proof: Option<DataHavenVerification>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub memory_entries: usize,
    pub datahaven_available: bool,
    pub providers_available: Vec<String>,
}
