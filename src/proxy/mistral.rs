//! Mistral chat completions.
//!
//! Same wire shape as OpenAI with one twist: `message.content` may be a
//! list of typed blocks instead of a string, and tool-call responses may
//! omit content entirely. Both are normalized to a single string at this
//! boundary.

use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use serde_json::{json, Value};

use super::Provider;
use crate::models::schemas::ChatMessage;

pub struct MistralProvider {
    base_url: String,
    api_key: String,
    model: String,
    client: ClientWithMiddleware,
}

#[derive(Debug, Deserialize)]
struct MistralResponse {
    #[serde(default)]
    choices: Vec<MistralChoice>,
    usage: Option<MistralUsage>,
}

#[derive(Debug, Deserialize)]
struct MistralChoice {
    message: MistralMessage,
}

#[derive(Debug, Deserialize)]
struct MistralMessage {
    content: Option<MistralContent>,
    tool_calls: Option<Value>,
}

/// `content` is either a plain string or structured blocks.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MistralContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct MistralUsage {
    #[serde(default)]
    total_tokens: usize,
}

/// Flatten a Mistral message to plain text. Tool calls without content
/// are surfaced as their JSON encoding so callers still see a response.
fn normalize_message(message: &MistralMessage) -> String {
    match &message.content {
        Some(MistralContent::Text(text)) => text.clone(),
        Some(MistralContent::Blocks(blocks)) => blocks
            .iter()
            .filter(|b| b.kind == "text" || b.kind.is_empty())
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join(""),
        None => message
            .tool_calls
            .as_ref()
            .and_then(|tc| serde_json::to_string(tc).ok())
            .unwrap_or_default(),
    }
}

impl MistralProvider {
    pub fn new(base_url: &str, api_key: &str, model: &str, client: ClientWithMiddleware) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            client,
        }
    }
}

#[async_trait]
impl Provider for MistralProvider {
    fn name(&self) -> &str {
        "mistral"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn infer(&self, messages: &[ChatMessage], model: &str) -> (String, usize) {
        if self.api_key.is_empty() {
            return (
                "[Error] No MISTRAL_API_KEY configured. Set it in your .env file to use \
                 Mistral cloud routing."
                    .to_string(),
                0,
            );
        }

        let model = if model.is_empty() { &self.model } else { model };
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": model,
            "messages": messages,
        });

        let resp = match self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("Mistral inference request failed: {}", e);
                return (format!("[Error] Mistral inference failed: {}", e), 0);
            }
        };

        if !resp.status().is_success() {
            let status = resp.status();
            tracing::error!(status = %status, "Mistral inference failed");
            return (format!("[Error] Mistral inference failed: HTTP {}", status), 0);
        }

        match resp.json::<MistralResponse>().await {
            Ok(data) => {
                let content = data
                    .choices
                    .first()
                    .map(|c| normalize_message(&c.message))
                    .unwrap_or_default();
                let tokens = data.usage.map(|u| u.total_tokens).unwrap_or(0);
                (content, tokens)
            }
            Err(e) => (format!("[Error] Mistral inference failed: {}", e), 0),
        }
    }
}
