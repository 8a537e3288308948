//! Local inference via Ollama. Maximum privacy: nothing leaves the host.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::Provider;
use crate::models::schemas::ChatMessage;

/// Local chat completions take a while on CPU hosts.
const INFER_TIMEOUT: Duration = Duration::from_secs(120);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct LocalProvider {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: OllamaMessage,
    #[serde(default)]
    eval_count: usize,
}

#[derive(Debug, Default, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

impl LocalProvider {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Provider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn infer(&self, messages: &[ChatMessage], model: &str) -> (String, usize) {
        let model = if model.is_empty() { &self.model } else { model };
        let url = format!("{}/api/chat", self.base_url);
        let body = json!({
            "model": model,
            "messages": messages,
            "stream": false,
        });

        let resp = match self
            .client
            .post(&url)
            .timeout(INFER_TIMEOUT)
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) if e.is_connect() => {
                tracing::error!("Ollama is not reachable at {}", self.base_url);
                return (
                    "[Error] Local model unavailable — Ollama is not running. \
                     Start it with `ollama serve` and pull a model."
                        .to_string(),
                    0,
                );
            }
            Err(e) => {
                tracing::error!("Ollama inference failed: {}", e);
                return (format!("[Error] Local inference failed: {}", e), 0);
            }
        };

        if !resp.status().is_success() {
            let status = resp.status();
            tracing::error!(status = %status, "Ollama inference failed");
            return (
                format!("[Error] Local inference failed: HTTP {}", status),
                0,
            );
        }

        match resp.json::<OllamaChatResponse>().await {
            Ok(data) => (data.message.content, data.eval_count),
            Err(e) => (format!("[Error] Local inference failed: {}", e), 0),
        }
    }
}
