//! Shared harness for integration tests: builds an `AppState` whose
//! providers point at wiremock upstreams instead of real endpoints.

use std::sync::Arc;

use gateway::config::Config;
use gateway::datahaven::DataHavenClient;
use gateway::jobs::TaskQueue;
use gateway::memory::RecencyMemory;
use gateway::middleware::pii::PiiGuard;
use gateway::middleware::policy::PolicyEngine;
use gateway::middleware::rate_limit::SlidingWindowRateLimiter;
use gateway::prompt::builder::PromptBuilder;
use gateway::prompt::shrinker::PromptShrinker;
use gateway::proxy::gemini::GeminiProvider;
use gateway::proxy::mistral::MistralProvider;
use gateway::proxy::ollama::LocalProvider;
use gateway::proxy::openai_compat::OpenAiCompatProvider;
use gateway::proxy::upstream::UpstreamClient;
use gateway::proxy::ProviderRegistry;
use gateway::AppState;

/// Cloud endpoints to stand in for the real services. `None` leaves the
/// provider keyless (unavailable).
#[derive(Default)]
pub struct Upstreams<'a> {
    pub ollama: Option<&'a str>,
    pub groq: Option<&'a str>,
    pub openai: Option<&'a str>,
    pub gemini: Option<&'a str>,
    pub datahaven: Option<&'a str>,
}

pub fn test_config(upstreams: &Upstreams) -> Config {
    let mut config = Config::default();
    if let Some(url) = upstreams.ollama {
        config.ollama_base_url = url.to_string();
    }
    if let Some(url) = upstreams.datahaven {
        config.datahaven_service_url = url.to_string();
    } else {
        // Unroutable port: policy fetch fails fast to the default policy.
        config.datahaven_service_url = "http://127.0.0.1:9".to_string();
    }
    config.datahaven_timeout_secs = 0.5;
    if upstreams.groq.is_some() {
        config.groq_api_key = "test-groq-key".to_string();
    }
    if upstreams.openai.is_some() {
        config.openai_api_key = "test-openai-key".to_string();
    }
    if upstreams.gemini.is_some() {
        config.gemini_api_key = "test-gemini-key".to_string();
    }
    config
}

pub fn make_state(config: Config, upstreams: &Upstreams) -> Arc<AppState> {
    let datahaven = Arc::new(DataHavenClient::new(
        &config.datahaven_service_url,
        config.datahaven_timeout_secs,
    ));
    let upstream = UpstreamClient::new().unwrap();

    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(LocalProvider::new(
        &config.ollama_base_url,
        &config.local_model,
    )));
    if let Some(url) = upstreams.groq {
        registry.register(Arc::new(OpenAiCompatProvider::new(
            "groq",
            "Groq",
            url,
            &config.groq_api_key,
            &config.groq_model,
            vec![],
            upstream.client(),
        )));
    }
    if let Some(url) = upstreams.openai {
        registry.register(Arc::new(OpenAiCompatProvider::new(
            "openai",
            "OpenAI",
            url,
            &config.openai_api_key,
            &config.openai_model,
            vec![],
            upstream.client(),
        )));
    }
    if let Some(url) = upstreams.gemini {
        registry.register(Arc::new(GeminiProvider::new(
            url,
            &config.gemini_api_key,
            &config.gemini_model,
        )));
    }
    // Mistral/OpenRouter stay keyless: whitelisted but unavailable.
    registry.register(Arc::new(MistralProvider::new(
        &config.mistral_base_url,
        "",
        &config.mistral_model,
        upstream.client(),
    )));

    Arc::new(AppState {
        rate_limiter: SlidingWindowRateLimiter::new(
            config.rate_limit_requests,
            config.rate_limit_window_sec,
        ),
        pii_guard: Arc::new(PiiGuard::new(None)),
        memory: Arc::new(RecencyMemory::new(64)),
        policy_engine: PolicyEngine::new(&config, datahaven.clone()),
        datahaven,
        registry,
        prompt_builder: PromptBuilder::new().unwrap(),
        shrinker: PromptShrinker::new().unwrap(),
        tasks: TaskQueue::new(64),
        config,
    })
}

pub mod http {
    use axum::body::Body;
    use axum::http::{Request, Response};
    use serde_json::Value;
    use tower::ServiceExt;

    pub async fn post_json(
        router: &axum::Router,
        path: &str,
        body: Value,
        client_ip: &str,
    ) -> Response<Body> {
        router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(path)
                    .header("content-type", "application/json")
                    .header("x-forwarded-for", client_ip)
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    pub async fn body_json(response: Response<Body>) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}
