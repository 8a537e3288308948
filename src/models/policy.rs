use serde::{Deserialize, Serialize};

/// Enterprise policy object fetched from DataHaven.
///
/// Controls routing, compression, provider access, and token limits.
/// Defaults are permissive; a failed fetch always degrades to `default()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub mode: PolicyMode,
    #[serde(default = "default_true")]
    pub allow_cloud: bool,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_true")]
    pub require_pii_masking: bool,
    #[serde(default = "default_true")]
    pub compression_enabled: bool,
    #[serde(default = "default_whitelist")]
    pub whitelisted_providers: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolicyMode {
    Strict,
    Balanced,
    Performance,
}

impl Default for PolicyMode {
    fn default() -> Self {
        PolicyMode::Balanced
    }
}

fn default_true() -> bool {
    true
}

fn default_max_tokens() -> usize {
    4096
}

fn default_whitelist() -> Vec<String> {
    ["local", "groq", "openai", "mistral", "openrouter"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            mode: PolicyMode::Balanced,
            allow_cloud: true,
            max_tokens: 4096,
            require_pii_masking: true,
            compression_enabled: true,
            whitelisted_providers: default_whitelist(),
        }
    }
}

impl Policy {
    /// Whitelist membership, case-insensitive.
    pub fn allows_provider(&self, provider: &str) -> bool {
        self.whitelisted_providers
            .iter()
            .any(|p| p.eq_ignore_ascii_case(provider))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_permissive() {
        let p = Policy::default();
        assert_eq!(p.mode, PolicyMode::Balanced);
        assert!(p.allow_cloud);
        assert_eq!(p.max_tokens, 4096);
        assert!(p.require_pii_masking);
        assert!(p.compression_enabled);
        assert!(p.allows_provider("groq"));
        assert!(p.allows_provider("OPENROUTER"));
        assert!(!p.allows_provider("gemini"));
    }

    #[test]
    fn test_partial_policy_body_fills_defaults() {
        let p: Policy = serde_json::from_str(r#"{"mode":"STRICT"}"#).unwrap();
        assert_eq!(p.mode, PolicyMode::Strict);
        assert!(p.allow_cloud);
        assert_eq!(p.whitelisted_providers.len(), 5);
    }
}
