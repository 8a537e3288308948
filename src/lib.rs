//! Metamorphosis Gateway — library crate for integration testing.
//!
//! Re-exports the pipeline modules and the shared `AppState` needed by
//! the integration tests in `tests/`.

pub mod api;
pub mod config;
pub mod datahaven;
pub mod errors;
pub mod jobs;
pub mod memory;
pub mod middleware;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod proxy;

use std::sync::Arc;

use datahaven::DataHavenClient;
use jobs::TaskQueue;
use memory::{MemoryStore, RecencyMemory};
use middleware::pii::{NerModel, PiiGuard};
use middleware::policy::PolicyEngine;
use middleware::rate_limit::SlidingWindowRateLimiter;
use prompt::builder::PromptBuilder;
use prompt::shrinker::PromptShrinker;
use proxy::gemini::{GeminiProvider, GEMINI_BASE_URL};
use proxy::mistral::MistralProvider;
use proxy::ollama::LocalProvider;
use proxy::openai_compat::OpenAiCompatProvider;
use proxy::upstream::UpstreamClient;
use proxy::ProviderRegistry;

/// Bounded size of the in-process conversation memory.
const MEMORY_CAPACITY: usize = 512;
/// Bounded size of the background task queue.
const TASK_QUEUE_CAPACITY: usize = 1024;
const TASK_WORKERS: usize = 2;

/// Shared application state passed to handlers and the pipeline.
/// Constructed once at server start; no ambient globals.
pub struct AppState {
    pub config: config::Config,
    pub rate_limiter: SlidingWindowRateLimiter,
    pub pii_guard: Arc<PiiGuard>,
    pub memory: Arc<dyn MemoryStore>,
    pub policy_engine: PolicyEngine,
    pub datahaven: Arc<DataHavenClient>,
    pub registry: ProviderRegistry,
    pub prompt_builder: PromptBuilder,
    pub shrinker: PromptShrinker,
    pub tasks: TaskQueue,
}

impl AppState {
    /// Wire every component from configuration. The NER model is injected
    /// by the caller; `None` degrades the PII guard to regex-only.
    pub fn from_config(
        config: config::Config,
        ner: Option<Box<dyn NerModel>>,
    ) -> anyhow::Result<Arc<Self>> {
        let datahaven = Arc::new(DataHavenClient::new(
            &config.datahaven_service_url,
            config.datahaven_timeout_secs,
        ));
        let upstream = UpstreamClient::new()?;

        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(LocalProvider::new(
            &config.ollama_base_url,
            &config.local_model,
        )));
        registry.register(Arc::new(OpenAiCompatProvider::groq(
            &config.groq_api_key,
            &config.groq_model,
            upstream.client(),
        )));
        registry.register(Arc::new(OpenAiCompatProvider::openai(
            &config.openai_api_key,
            &config.openai_model,
            upstream.client(),
        )));
        registry.register(Arc::new(MistralProvider::new(
            &config.mistral_base_url,
            &config.mistral_api_key,
            &config.mistral_model,
            upstream.client(),
        )));
        registry.register(Arc::new(OpenAiCompatProvider::openrouter(
            &config.openrouter_base_url,
            &config.openrouter_api_key,
            &config.openrouter_model,
            &config.openrouter_site_url,
            &config.openrouter_app_name,
            upstream.client(),
        )));
        registry.register(Arc::new(GeminiProvider::new(
            GEMINI_BASE_URL,
            &config.gemini_api_key,
            &config.gemini_model,
        )));

        Ok(Arc::new(Self {
            rate_limiter: SlidingWindowRateLimiter::new(
                config.rate_limit_requests,
                config.rate_limit_window_sec,
            ),
            pii_guard: Arc::new(PiiGuard::new(ner)),
            memory: Arc::new(RecencyMemory::new(MEMORY_CAPACITY)),
            policy_engine: PolicyEngine::new(&config, datahaven.clone()),
            datahaven,
            registry,
            prompt_builder: PromptBuilder::new()?,
            shrinker: PromptShrinker::new()?,
            tasks: TaskQueue::new(TASK_QUEUE_CAPACITY),
            config,
        }))
    }

    /// Start the background workers and the PII orphan sweep. Call once,
    /// inside a Tokio runtime.
    pub fn start_background(self: &Arc<Self>) {
        self.tasks
            .spawn_workers(TASK_WORKERS, self.memory.clone(), self.datahaven.clone());
        jobs::spawn_pii_sweep(self.pii_guard.clone());
    }
}
