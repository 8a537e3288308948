//! Inference providers and the failover registry.
//!
//! Every upstream is exposed honestly under its own name; routing and the
//! policy whitelist decide which one answers. The `infer` contract never
//! errors across the boundary: transport failures come back as a
//! bracketed `[Error] …` string with zero tokens, and the orchestrator
//! decides whether to fail over.

pub mod gemini;
pub mod mistral;
pub mod ollama;
pub mod openai_compat;
pub mod upstream;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::schemas::{ChatMessage, Route};

#[async_trait]
pub trait Provider: Send + Sync {
    /// Lowercase registry name (`local`, `groq`, …).
    fn name(&self) -> &str;

    /// Default model identifier for this provider.
    fn model(&self) -> &str;

    /// Local: a reachable Ollama within a short timeout. Cloud: an API
    /// key is configured.
    async fn is_available(&self) -> bool;

    /// Execute inference. Returns `(text, tokens_used)`; failures yield an
    /// `[Error] …` string and 0 tokens.
    async fn infer(&self, messages: &[ChatMessage], model: &str) -> (String, usize);
}

/// Providers tried after a failure, in order, starting after the failing
/// entry. Whitelist and availability filter the walk.
pub const FALLBACK_ORDER: &[&str] = &["local", "groq", "mistral", "openrouter", "openai"];

#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers
            .insert(provider.name().to_lowercase(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(&name.to_lowercase()).cloned()
    }

    /// Provider for a route decision: `local` for LOCAL, the requested
    /// cloud provider otherwise.
    pub fn get_for_route(&self, route: Route, cloud_provider: &str) -> Option<Arc<dyn Provider>> {
        match route {
            Route::Local => self.get("local"),
            _ => self.get(cloud_provider),
        }
    }

    /// Next fallback candidate after `current`, restricted to the policy
    /// whitelist and to providers that report themselves available.
    pub async fn next_fallback(
        &self,
        current: &str,
        whitelist: &[String],
    ) -> Option<Arc<dyn Provider>> {
        let current_idx = FALLBACK_ORDER
            .iter()
            .position(|name| name.eq_ignore_ascii_case(current));
        let start = current_idx.map(|i| i + 1).unwrap_or(0);

        for name in &FALLBACK_ORDER[start..] {
            if !whitelist.iter().any(|w| w.eq_ignore_ascii_case(name)) {
                continue;
            }
            if let Some(provider) = self.get(name) {
                if provider.is_available().await {
                    return Some(provider);
                }
            }
        }
        None
    }

    /// Names of all registered providers currently available.
    pub async fn list_available(&self) -> Vec<String> {
        let mut available = Vec::new();
        for (name, provider) in &self.providers {
            if provider.is_available().await {
                available.push(name.clone());
            }
        }
        available.sort();
        available
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeProvider {
        name: &'static str,
        available: bool,
    }

    #[async_trait]
    impl Provider for FakeProvider {
        fn name(&self) -> &str {
            self.name
        }
        fn model(&self) -> &str {
            "fake-model"
        }
        async fn is_available(&self) -> bool {
            self.available
        }
        async fn infer(&self, _messages: &[ChatMessage], _model: &str) -> (String, usize) {
            ("ok".into(), 1)
        }
    }

    fn registry(entries: &[(&'static str, bool)]) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        for (name, available) in entries {
            registry.register(Arc::new(FakeProvider {
                name,
                available: *available,
            }));
        }
        registry
    }

    fn full_whitelist() -> Vec<String> {
        ["local", "groq", "openai", "mistral", "openrouter"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    #[tokio::test]
    async fn test_fallback_walks_order_after_current() {
        let registry = registry(&[("local", true), ("groq", true), ("openai", true)]);
        let next = registry
            .next_fallback("groq", &full_whitelist())
            .await
            .unwrap();
        // mistral/openrouter are not registered, so openai is next.
        assert_eq!(next.name(), "openai");
    }

    #[tokio::test]
    async fn test_fallback_skips_unavailable_and_unwhitelisted() {
        let registry = registry(&[
            ("local", true),
            ("groq", false),
            ("mistral", true),
            ("openai", true),
        ]);
        let whitelist: Vec<String> = vec!["local".into(), "groq".into(), "openai".into()];
        let next = registry.next_fallback("local", &whitelist).await.unwrap();
        // groq is down, mistral is off-whitelist.
        assert_eq!(next.name(), "openai");
    }

    #[tokio::test]
    async fn test_fallback_exhausted_returns_none() {
        let registry = registry(&[("local", true), ("openai", false)]);
        assert!(registry
            .next_fallback("openai", &full_whitelist())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_get_for_route() {
        let registry = registry(&[("local", true), ("groq", true)]);
        assert_eq!(
            registry.get_for_route(Route::Local, "groq").unwrap().name(),
            "local"
        );
        assert_eq!(
            registry.get_for_route(Route::Cloud, "groq").unwrap().name(),
            "groq"
        );
    }

    #[tokio::test]
    async fn test_list_available_sorted() {
        let registry = registry(&[("openai", true), ("local", true), ("groq", false)]);
        assert_eq!(registry.list_available().await, vec!["local", "openai"]);
    }
}
