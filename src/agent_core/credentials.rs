//! Credential lookup for the completion provider.
//!
//! The settings layer that persists keys lives outside this crate. The agent
//! only asks it for a provider → API key mapping.

use std::collections::HashMap;

/// Source of provider API keys.
pub trait CredentialStore: Send + Sync {
    /// Provider name → API key.
    fn get_credentials(&self) -> HashMap<String, String>;

    /// The non-empty key for `provider`, if any.
    fn api_key(&self, provider: &str) -> Option<String> {
        self.get_credentials()
            .remove(provider)
            .filter(|key| !key.trim().is_empty())
    }
}

/// Name of the environment variable holding `provider`'s key,
/// e.g. `openrouter` → `OPENROUTER_API_KEY`.
pub fn env_var_for(provider: &str) -> String {
    let upper: String = provider
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{upper}_API_KEY")
}

// ─── EnvCredentials ──────────────────────────────────────────────────────────

/// Reads `<PROVIDER>_API_KEY` for each listed provider.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    providers: Vec<String>,
}

impl EnvCredentials {
    pub fn new(providers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            providers: providers.into_iter().map(Into::into).collect(),
        }
    }
}

impl CredentialStore for EnvCredentials {
    fn get_credentials(&self) -> HashMap<String, String> {
        self.providers
            .iter()
            .filter_map(|p| std::env::var(env_var_for(p)).ok().map(|key| (p.clone(), key)))
            .collect()
    }
}

// ─── StaticCredentials ───────────────────────────────────────────────────────

/// A fixed in-memory map. Used by hosts that already hold the key, and by tests.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials(HashMap<String, String>);

impl StaticCredentials {
    pub fn new(credentials: HashMap<String, String>) -> Self {
        Self(credentials)
    }

    pub fn single(provider: impl Into<String>, key: impl Into<String>) -> Self {
        Self(HashMap::from([(provider.into(), key.into())]))
    }
}

impl CredentialStore for StaticCredentials {
    fn get_credentials(&self) -> HashMap<String, String> {
        self.0.clone()
    }
}
