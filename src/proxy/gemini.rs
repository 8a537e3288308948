//! Google Gemini provider.
//!
//! Gemini's wire format differs from the OpenAI shape everywhere it
//! matters: system messages collapse into a single `system_instruction`,
//! the `assistant` role is called `model`, and message content is a
//! `parts` array. Model ids that don't look like Gemini models are
//! coerced to the configured one.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::Provider;
use crate::models::schemas::ChatMessage;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "totalTokenCount", default)]
    total_token_count: usize,
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: usize,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: usize,
}

/// Split OpenAI-style messages into `(system_instruction, contents)`.
fn convert_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<Value>) {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut contents: Vec<Value> = Vec::new();

    for msg in messages {
        if msg.role == "system" {
            system_parts.push(&msg.content);
        } else {
            let role = if msg.role == "assistant" { "model" } else { "user" };
            contents.push(json!({
                "role": role,
                "parts": [{"text": msg.content}],
            }));
        }
    }

    let system_instruction = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n"))
    };
    (system_instruction, contents)
}

fn looks_like_gemini_model(model: &str) -> bool {
    let lower = model.to_lowercase();
    lower.starts_with("gemini") || lower.starts_with("models/")
}

impl GeminiProvider {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            client,
        }
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
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
                "[Error] No GEMINI_API_KEY configured. Set it in your .env file to use \
                 Gemini cloud routing."
                    .to_string(),
                0,
            );
        }

        let requested = model.trim();
        let model = if requested.is_empty() || !looks_like_gemini_model(requested) {
            &self.model
        } else {
            requested
        };

        let (system_instruction, contents) = convert_messages(messages);
        let mut body = json!({ "contents": contents });
        if let Some(instruction) = system_instruction {
            body["system_instruction"] = json!({ "parts": [{"text": instruction}] });
        }

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        );

        let resp = match self.client.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("Gemini inference request failed: {}", e);
                return (format!("[Error] Gemini inference failed: {}", e), 0);
            }
        };

        if !resp.status().is_success() {
            let status = resp.status();
            tracing::error!(status = %status, "Gemini inference failed");
            return (format!("[Error] Gemini inference failed: HTTP {}", status), 0);
        }

        match resp.json::<GeminiResponse>().await {
            Ok(data) => {
                let content = data
                    .candidates
                    .first()
                    .and_then(|c| c.content.as_ref())
                    .map(|c| {
                        c.parts
                            .iter()
                            .map(|p| p.text.as_str())
                            .collect::<Vec<_>>()
                            .join("")
                    })
                    .unwrap_or_default();
                let tokens = data
                    .usage_metadata
                    .map(|u| {
                        if u.total_token_count > 0 {
                            u.total_token_count
                        } else {
                            u.prompt_token_count + u.candidates_token_count
                        }
                    })
                    .unwrap_or(0);
                (content, tokens)
            }
            Err(e) => (format!("[Error] Gemini inference failed: {}", e), 0),
        }
    }
}
