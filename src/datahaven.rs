//! HTTP client for the DataHaven policy/audit microservice.
//!
//! Never sends raw prompts or PII — only request metadata flows through
//! these endpoints. Every operation degrades gracefully: a missing or
//! failing service yields the default policy and skips proof generation.

use reqwest::Client;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use std::time::Duration;

use crate::models::policy::Policy;
use crate::models::schemas::DataHavenVerification;

pub struct DataHavenClient {
    base_url: String,
    client: Client,
    /// Reachability, cached after the first probe.
    available: OnceLock<bool>,
}

/// Metadata-only audit record posted to `/log`.
#[derive(Debug, Clone, Serialize)]
pub struct InferenceRecord {
    pub request_id: String,
    pub user_id: String,
    pub route: String,
    pub provider: String,
    pub model: String,
    pub token_count: usize,
    pub latency_ms: f64,
    pub privacy_level: String,
    pub cost_estimate: f64,
    pub policy_mode: String,
    /// SHA-256 of the response text, computed gateway-side so DataHaven
    /// can anchor the proof without ever seeing the content.
    pub content_hash: String,
}

impl DataHavenClient {
    pub fn new(base_url: &str, timeout_secs: f64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs_f64(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            available: OnceLock::new(),
        }
    }

    pub async fn is_available(&self) -> bool {
        if let Some(cached) = self.available.get() {
            return *cached;
        }
        let reachable = match self.client.get(format!("{}/health", self.base_url)).send().await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        };
        let _ = self.available.set(reachable);
        reachable
    }

    /// Fetch the policy for a user. Any failure — network, non-200,
    /// malformed body — falls back to the default permissive policy; the
    /// error string is returned alongside so callers can audit it.
    pub async fn fetch_policy(&self, user_id: Option<&str>) -> (Policy, Option<String>) {
        match self.try_fetch_policy(user_id).await {
            Ok(policy) => (policy, None),
            Err(e) => {
                tracing::warn!("DataHaven policy fetch failed, using default policy: {}", e);
                (Policy::default(), Some(e))
            }
        }
    }

    async fn try_fetch_policy(&self, user_id: Option<&str>) -> Result<Policy, String> {
        let user = user_id.unwrap_or("default");
        let url = format!("{}/policy/{}", self.base_url, user);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("service not reachable: {}", e))?;

        if !resp.status().is_success() {
            return Err(format!("policy fetch returned HTTP {}", resp.status()));
        }

        let body = resp
            .json::<serde_json::Value>()
            .await
            .map_err(|e| format!("malformed policy body: {}", e))?;

        let success = body.get("success").and_then(|v| v.as_bool()).unwrap_or(false);
        if !success {
            return Err("policy envelope reported failure".to_string());
        }
        let policy = body
            .get("policy")
            .cloned()
            .ok_or_else(|| "policy envelope missing policy object".to_string())?;
        serde_json::from_value::<Policy>(policy)
            .map_err(|e| format!("malformed policy object: {}", e))
    }

    /// Post an inference audit record. Returns the verification proof when
    /// the service produced one.
    pub async fn log_inference(
        &self,
        record: &InferenceRecord,
    ) -> Option<DataHavenVerification> {
        let url = format!("{}/log", self.base_url);
        let resp = match self.client.post(&url).json(record).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("DataHaven not reachable for logging: {}", e);
                return None;
            }
        };

        if !resp.status().is_success() {
            tracing::warn!(status = %resp.status(), "DataHaven log returned non-200");
            return None;
        }

        let body = resp.json::<serde_json::Value>().await.ok()?;
        body.get("verification")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }
}

/// Hex SHA-256 of the response content sent alongside audit records.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

// ── Tests ─────────────────────────────────────────────────────
