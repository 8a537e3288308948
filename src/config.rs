use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,

    // ── Provider credentials ──────────────────────────────────
    pub openai_api_key: String,
    pub groq_api_key: String,
    pub gemini_api_key: String,
    pub mistral_api_key: String,
    pub openrouter_api_key: String,

    // ── Provider endpoints & models ───────────────────────────
    pub ollama_base_url: String,
    pub local_model: String,
    pub openai_model: String,
    pub groq_model: String,
    pub gemini_model: String,
    pub mistral_model: String,
    pub mistral_base_url: String,
    pub openrouter_model: String,
    pub openrouter_base_url: String,
    /// Optional attribution headers for OpenRouter rankings.
    pub openrouter_site_url: String,
    pub openrouter_app_name: String,

    // ── Routing & pipeline tuning ─────────────────────────────
    /// Token count below which BALANCED mode stays local.
    pub token_threshold: usize,
    pub memory_top_k: usize,
    pub cost_per_1k_input: f64,
    pub cost_per_1k_output: f64,

    // ── NER model for the PII guard ───────────────────────────
    pub spacy_model: String,

    // ── Rate limiting ─────────────────────────────────────────
    pub rate_limit_requests: usize,
    pub rate_limit_window_sec: f64,

    // ── DataHaven policy/audit service ────────────────────────
    pub datahaven_service_url: String,
    pub datahaven_timeout_secs: f64,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let openai_api_key = env_or("OPENAI_API_KEY", "");

    Ok(Config {
        port: env_parse("GATEWAY_PORT", 8000),

        // GEMINI_API_KEY may be provided via OPENAI_API_KEY for older
        // deployments that predate the dedicated variable.
        gemini_api_key: std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| openai_api_key.clone()),
        openai_api_key,
        groq_api_key: env_or("GROQ_API_KEY", ""),
        mistral_api_key: env_or("MISTRAL_API_KEY", ""),
        openrouter_api_key: env_or("OPENROUTER_API_KEY", ""),

        ollama_base_url: env_or("OLLAMA_BASE_URL", "http://localhost:11434"),
        local_model: env_or("LOCAL_MODEL", "llama3.2"),
        openai_model: env_or("OPENAI_MODEL", "gpt-3.5-turbo"),
        groq_model: env_or("GROQ_MODEL", "llama-3.3-70b-versatile"),
        gemini_model: env_or("GEMINI_MODEL", "gemini-2.0-flash"),
        mistral_model: env_or("MISTRAL_MODEL", "mistral-small-latest"),
        mistral_base_url: env_or("MISTRAL_BASE_URL", "https://api.mistral.ai/v1"),
        openrouter_model: env_or("OPENROUTER_MODEL", "mistralai/mistral-small"),
        openrouter_base_url: env_or("OPENROUTER_BASE_URL", "https://openrouter.ai/api/v1"),
        openrouter_site_url: env_or("OPENROUTER_SITE_URL", ""),
        openrouter_app_name: env_or("OPENROUTER_APP_NAME", "Metamorphosis"),

        token_threshold: env_parse("TOKEN_THRESHOLD", 500),
        memory_top_k: env_parse("MEMORY_TOP_K", 3),
        cost_per_1k_input: env_parse("COST_PER_1K_INPUT", 0.0005),
        cost_per_1k_output: env_parse("COST_PER_1K_OUTPUT", 0.0015),

        spacy_model: env_or("SPACY_MODEL", "en_core_web_sm"),

        rate_limit_requests: env_parse("RATE_LIMIT_REQUESTS", 60),
        rate_limit_window_sec: env_parse("RATE_LIMIT_WINDOW_SEC", 60.0),

        datahaven_service_url: env_or("DATAHAVEN_SERVICE_URL", "http://localhost:3001"),
        datahaven_timeout_secs: env_parse("DATAHAVEN_TIMEOUT", 5.0),
    })
}

impl Default for Config {
    /// Every knob at its documented default, no credentials. Used by tests
    /// that build an AppState without touching the process environment.
    fn default() -> Self {
        Self {
            port: 8000,
            openai_api_key: String::new(),
            groq_api_key: String::new(),
            gemini_api_key: String::new(),
            mistral_api_key: String::new(),
            openrouter_api_key: String::new(),
            ollama_base_url: "http://localhost:11434".into(),
            local_model: "llama3.2".into(),
            openai_model: "gpt-3.5-turbo".into(),
            groq_model: "llama-3.3-70b-versatile".into(),
            gemini_model: "gemini-2.0-flash".into(),
            mistral_model: "mistral-small-latest".into(),
            mistral_base_url: "https://api.mistral.ai/v1".into(),
            openrouter_model: "mistralai/mistral-small".into(),
            openrouter_base_url: "https://openrouter.ai/api/v1".into(),
            openrouter_site_url: String::new(),
            openrouter_app_name: "Metamorphosis".into(),
            token_threshold: 500,
            memory_top_k: 3,
            cost_per_1k_input: 0.0005,
            cost_per_1k_output: 0.0015,
            spacy_model: "en_core_web_sm".into(),
            rate_limit_requests: 60,
            rate_limit_window_sec: 60.0,
            datahaven_service_url: "http://localhost:3001".into(),
            datahaven_timeout_secs: 5.0,
        }
    }
}
