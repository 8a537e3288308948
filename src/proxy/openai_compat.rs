//! OpenAI-compatible chat completions transport.
//!
//! Covers Groq, OpenAI, and OpenRouter — identical wire shape, different
//! base URLs, credentials, and (for OpenRouter) optional attribution
//! headers.

use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use serde_json::json;

use super::Provider;
use crate::models::schemas::ChatMessage;

pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiCompatProvider {
    name: String,
    /// Human-facing name used in error strings ("Groq", "OpenAI", …).
    display_name: String,
    base_url: String,
    api_key: String,
    model: String,
    extra_headers: Vec<(String, String)>,
    client: ClientWithMiddleware,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: usize,
}

impl OpenAiCompatProvider {
    pub fn new(
        name: &str,
        display_name: &str,
        base_url: &str,
        api_key: &str,
        model: &str,
        extra_headers: Vec<(String, String)>,
        client: ClientWithMiddleware,
    ) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            extra_headers,
            client,
        }
    }

    pub fn groq(api_key: &str, model: &str, client: ClientWithMiddleware) -> Self {
        Self::new("groq", "Groq", GROQ_BASE_URL, api_key, model, vec![], client)
    }

    pub fn openai(api_key: &str, model: &str, client: ClientWithMiddleware) -> Self {
        Self::new("openai", "OpenAI", OPENAI_BASE_URL, api_key, model, vec![], client)
    }

    /// OpenRouter attribution headers are optional; empty values are
    /// simply not sent.
    pub fn openrouter(
        base_url: &str,
        api_key: &str,
        model: &str,
        site_url: &str,
        app_name: &str,
        client: ClientWithMiddleware,
    ) -> Self {
        let mut headers = Vec::new();
        if !site_url.is_empty() {
            headers.push(("HTTP-Referer".to_string(), site_url.to_string()));
        }
        if !app_name.is_empty() {
            headers.push(("X-Title".to_string(), app_name.to_string()));
        }
        Self::new("openrouter", "OpenRouter", base_url, api_key, model, headers, client)
    }

    fn missing_key_error(&self) -> String {
        format!(
            "[Error] No {}_API_KEY configured. Set it in your .env file to use {} cloud routing.",
            self.name.to_uppercase(),
            self.display_name
        )
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn infer(&self, messages: &[ChatMessage], model: &str) -> (String, usize) {
        if self.api_key.is_empty() {
            return (self.missing_key_error(), 0);
        }

        let model = if model.is_empty() { &self.model } else { model };
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": model,
            "messages": messages,
        });

        let mut request = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body);
        for (name, value) in &self.extra_headers {
            request = request.header(name, value);
        }

        let resp = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(provider = %self.name, "inference request failed: {}", e);
                return (
                    format!("[Error] {} inference failed: {}", self.display_name, e),
                    0,
                );
            }
        };

        if !resp.status().is_success() {
            let status = resp.status();
            tracing::error!(provider = %self.name, status = %status, "inference failed");
            return (
                format!("[Error] {} inference failed: HTTP {}", self.display_name, status),
                0,
            );
        }

        match resp.json::<ChatCompletionResponse>().await {
            Ok(data) => {
                let content = data
                    .choices
                    .first()
                    .and_then(|c| c.message.content.clone())
                    .unwrap_or_default();
                let tokens = data.usage.map(|u| u.total_tokens).unwrap_or(0);
                (content, tokens)
            }
            Err(e) => (
                format!("[Error] {} inference failed: {}", self.display_name, e),
                0,
            ),
        }
    }
}
