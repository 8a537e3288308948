//! Policy-driven routing decisions.
//!
//! Policies come from DataHaven (default permissive on any failure) and
//! constrain routing, compression, provider access, and token limits.
//! A STRICT policy always overrides the client's requested mode.

use std::sync::Arc;

use crate::config::Config;
use crate::datahaven::DataHavenClient;
use crate::models::policy::{Policy, PolicyMode};
use crate::models::schemas::{CloudProvider, Route, UserMode};

/// Cloud provider names eligible for policy whitelisting and routing.
/// Gemini is selectable only through the whitelist — it is not part of
/// the client-facing `cloud_provider` field.
const CLOUD_PROVIDERS: &[&str] = &["groq", "openai", "mistral", "openrouter", "gemini"];

#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub route: Route,
    pub provider: String,
    pub model: String,
}

pub struct PolicyEngine {
    datahaven: Arc<DataHavenClient>,
    token_threshold: usize,
    local_model: String,
    groq_model: String,
    openai_model: String,
    mistral_model: String,
    openrouter_model: String,
    gemini_model: String,
}

impl PolicyEngine {
    pub fn new(config: &Config, datahaven: Arc<DataHavenClient>) -> Self {
        Self {
            datahaven,
            token_threshold: config.token_threshold,
            local_model: config.local_model.clone(),
            groq_model: config.groq_model.clone(),
            openai_model: config.openai_model.clone(),
            mistral_model: config.mistral_model.clone(),
            openrouter_model: config.openrouter_model.clone(),
            gemini_model: config.gemini_model.clone(),
        }
    }

    /// Fetch the policy for a user; default permissive policy on any error,
    /// with the error string surfaced for the audit trail.
    pub async fn fetch_policy(&self, user_id: Option<&str>) -> (Policy, Option<String>) {
        self.datahaven.fetch_policy(user_id).await
    }

    /// The mode the pipeline actually runs under: a STRICT policy wins over
    /// whatever the client asked for; otherwise the client's choice stands.
    pub fn effective_mode(policy: &Policy, client_mode: UserMode) -> UserMode {
        if policy.mode == PolicyMode::Strict {
            UserMode::Strict
        } else {
            client_mode
        }
    }

    /// Routing decision table. STRICT pins local; BALANCED goes cloud only
    /// above the token threshold; PERFORMANCE prefers cloud whenever the
    /// policy allows it.
    pub fn decide_route(
        &self,
        policy: &Policy,
        client_mode: UserMode,
        token_count: usize,
        preferred_cloud: CloudProvider,
    ) -> RouteDecision {
        let mode = Self::effective_mode(policy, client_mode);
        let cloud_allowed = policy.allow_cloud
            && CLOUD_PROVIDERS.iter().any(|p| policy.allows_provider(p));

        match mode {
            UserMode::Strict => self.local_decision(),
            UserMode::Balanced => {
                let is_lightweight = token_count < self.token_threshold;
                if is_lightweight || !cloud_allowed {
                    self.local_decision()
                } else {
                    self.cloud_decision(policy, preferred_cloud)
                }
            }
            UserMode::Performance => {
                if cloud_allowed {
                    self.cloud_decision(policy, preferred_cloud)
                } else {
                    self.local_decision()
                }
            }
        }
    }

    fn local_decision(&self) -> RouteDecision {
        RouteDecision {
            route: Route::Local,
            provider: "local".to_string(),
            model: self.local_model.clone(),
        }
    }

    fn cloud_decision(&self, policy: &Policy, preferred: CloudProvider) -> RouteDecision {
        let provider = self.select_cloud_provider(policy, preferred);
        RouteDecision {
            model: self.model_for(&provider),
            route: Route::Cloud,
            provider,
        }
    }

    /// Preferred provider when whitelisted, else groq → openai, else the
    /// first whitelisted cloud provider of any kind.
    fn select_cloud_provider(&self, policy: &Policy, preferred: CloudProvider) -> String {
        let preferred_name = preferred.provider_name();
        if policy.allows_provider(preferred_name) {
            return preferred_name.to_string();
        }
        for candidate in ["groq", "openai"] {
            if policy.allows_provider(candidate) {
                return candidate.to_string();
            }
        }
        CLOUD_PROVIDERS
            .iter()
            .find(|p| policy.allows_provider(p))
            .map(|p| p.to_string())
            .unwrap_or_else(|| preferred_name.to_string())
    }

    /// Resolved model identifier for a registry provider name.
    pub fn model_for(&self, provider: &str) -> String {
        match provider {
            "local" => self.local_model.clone(),
            "groq" => self.groq_model.clone(),
            "openai" => self.openai_model.clone(),
            "mistral" => self.mistral_model.clone(),
            "openrouter" => self.openrouter_model.clone(),
            "gemini" => self.gemini_model.clone(),
            _ => self.local_model.clone(),
        }
    }

    pub fn should_compress(policy: &Policy) -> bool {
        policy.compression_enabled
    }

    pub fn validate_provider(policy: &Policy, provider: &str) -> Result<(), String> {
        if policy.allows_provider(provider) {
            Ok(())
        } else {
            Err(format!("Provider '{}' is not in policy whitelist", provider))
        }
    }

    pub fn enforce_token_limit(policy: &Policy, token_count: usize) -> Result<(), String> {
        if token_count > policy.max_tokens {
            return Err(format!(
                "Token count ({}) exceeds policy limit ({}). Please reduce prompt size.",
                token_count, policy.max_tokens
            ));
        }
        Ok(())
    }

    /// Whether a failed inference may switch to a cloud provider.
    pub fn can_fallback_to_cloud(policy: &Policy, effective_mode: UserMode) -> bool {
        policy.allow_cloud
            && effective_mode != UserMode::Strict
            && CLOUD_PROVIDERS.iter().any(|p| policy.allows_provider(p))
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> PolicyEngine {
        let config = Config::default();
        let datahaven = Arc::new(DataHavenClient::new(
            &config.datahaven_service_url,
            config.datahaven_timeout_secs,
        ));
        PolicyEngine::new(&config, datahaven)
    }

    fn strict_policy() -> Policy {
        Policy {
            mode: PolicyMode::Strict,
            ..Policy::default()
        }
    }

    #[test]
    fn test_strict_mode_always_local() {
        let engine = engine();
        let decision = engine.decide_route(
            &Policy::default(),
            UserMode::Strict,
            100_000,
            CloudProvider::Groq,
        );
        assert_eq!(decision.route, Route::Local);
        assert_eq!(decision.provider, "local");
        assert_eq!(decision.model, "llama3.2");
    }

    #[test]
    fn test_strict_policy_overrides_performance_client() {
        let engine = engine();
        let decision = engine.decide_route(
            &strict_policy(),
            UserMode::Performance,
            10,
            CloudProvider::Groq,
        );
        assert_eq!(decision.route, Route::Local);
    }

    #[test]
    fn test_balanced_under_threshold_stays_local() {
        let engine = engine();
        let decision =
            engine.decide_route(&Policy::default(), UserMode::Balanced, 499, CloudProvider::Groq);
        assert_eq!(decision.route, Route::Local);
    }

    #[test]
    fn test_balanced_over_threshold_goes_cloud() {
        let engine = engine();
        let decision =
            engine.decide_route(&Policy::default(), UserMode::Balanced, 500, CloudProvider::Groq);
        assert_eq!(decision.route, Route::Cloud);
        assert_eq!(decision.provider, "groq");
        assert_eq!(decision.model, "llama-3.3-70b-versatile");
    }

    #[test]
    fn test_balanced_cloud_disallowed_stays_local() {
        let engine = engine();
        let policy = Policy {
            allow_cloud: false,
            ..Policy::default()
        };
        let decision =
            engine.decide_route(&policy, UserMode::Balanced, 5000, CloudProvider::Groq);
        assert_eq!(decision.route, Route::Local);
    }

    #[test]
    fn test_performance_prefers_cloud_regardless_of_size() {
        let engine = engine();
        let decision = engine.decide_route(
            &Policy::default(),
            UserMode::Performance,
            1,
            CloudProvider::Mistral,
        );
        assert_eq!(decision.route, Route::Cloud);
        assert_eq!(decision.provider, "mistral");
        assert_eq!(decision.model, "mistral-small-latest");
    }

    #[test]
    fn test_non_whitelisted_preference_falls_back_to_groq() {
        let engine = engine();
        let policy = Policy {
            whitelisted_providers: vec!["local".into(), "groq".into(), "openai".into()],
            ..Policy::default()
        };
        let decision = engine.decide_route(
            &policy,
            UserMode::Performance,
            10,
            CloudProvider::Openrouter,
        );
        assert_eq!(decision.provider, "groq");
    }

    #[test]
    fn test_gemini_reachable_through_whitelist() {
        let engine = engine();
        let policy = Policy {
            whitelisted_providers: vec!["local".into(), "gemini".into()],
            ..Policy::default()
        };
        let decision =
            engine.decide_route(&policy, UserMode::Performance, 10, CloudProvider::Groq);
        assert_eq!(decision.route, Route::Cloud);
        assert_eq!(decision.provider, "gemini");
        assert_eq!(decision.model, "gemini-2.0-flash");
    }

    #[test]
    fn test_whitelist_without_groq_openai_uses_remaining_cloud() {
        let engine = engine();
        let policy = Policy {
            whitelisted_providers: vec!["local".into(), "openrouter".into()],
            ..Policy::default()
        };
        let decision =
            engine.decide_route(&policy, UserMode::Performance, 10, CloudProvider::Groq);
        assert_eq!(decision.route, Route::Cloud);
        assert_eq!(decision.provider, "openrouter");
    }

    #[test]
    fn test_token_limit_enforcement() {
        let policy = Policy {
            max_tokens: 100,
            ..Policy::default()
        };
        assert!(PolicyEngine::enforce_token_limit(&policy, 100).is_ok());
        assert!(PolicyEngine::enforce_token_limit(&policy, 101).is_err());
    }

    #[test]
    fn test_fallback_gate() {
        assert!(PolicyEngine::can_fallback_to_cloud(
            &Policy::default(),
            UserMode::Balanced
        ));
        assert!(!PolicyEngine::can_fallback_to_cloud(
            &Policy::default(),
            UserMode::Strict
        ));
        let no_cloud = Policy {
            allow_cloud: false,
            ..Policy::default()
        };
        assert!(!PolicyEngine::can_fallback_to_cloud(&no_cloud, UserMode::Performance));
    }

    #[test]
    fn test_validate_provider_against_whitelist() {
        let policy = Policy {
            whitelisted_providers: vec!["local".into(), "groq".into()],
            ..Policy::default()
        };
        assert!(PolicyEngine::validate_provider(&policy, "groq").is_ok());
        assert!(PolicyEngine::validate_provider(&policy, "openai").is_err());
    }
}
