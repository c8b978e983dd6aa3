//! Orchestrator configuration loading.
//!
//! Reads `agent-orchestrator.yaml` and resolves environment variables.
//! Every field has a default, so a missing file or an empty document yields
//! a working configuration (minus the API key, which comes from credentials).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::agent_core::OrchestratorSettings;
use crate::inference::{CompletionSettings, RetryPolicy};
use crate::mcp_client::{McpTimeouts, ServerConfig};

/// File name searched for when no explicit path is given.
pub const CONFIG_FILE_NAME: &str = "agent-orchestrator.yaml";

/// Environment variable holding an explicit config file path.
pub const CONFIG_PATH_ENV: &str = "AGENT_ORCHESTRATOR_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },
}

// ─── Public Types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Key into the credential map, e.g. `openrouter`.
    pub provider: String,
    /// Requests go to `{base_url}/completions`.
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_turns: u32,
    /// Messages kept after the system prompt once history is trimmed.
    pub history_window: usize,
    /// Wall-clock limit for one `bash` tool call.
    pub bash_timeout_secs: u64,
    pub retry: RetryConfig,
    pub mcp_timeouts: McpTimeoutsConfig,
    pub mcp_servers: BTreeMap<String, ServerConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: "openrouter".into(),
            base_url: "https://openrouter.ai/api/v1/chat".into(),
            model: "anthropic/claude-sonnet-4".into(),
            temperature: 0.7,
            max_tokens: 4096,
            max_turns: 50,
            history_window: 40,
            bash_timeout_secs: 30,
            retry: RetryConfig::default(),
            mcp_timeouts: McpTimeoutsConfig::default(),
            mcp_servers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub attempt_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            attempt_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct McpTimeoutsConfig {
    pub connect_secs: u64,
    pub list_tools_secs: u64,
    pub call_secs: u64,
}

impl Default for McpTimeoutsConfig {
    fn default() -> Self {
        Self {
            connect_secs: 30,
            list_tools_secs: 30,
            call_secs: 60,
        }
    }
}

impl AppConfig {
    pub fn completion_settings(&self) -> CompletionSettings {
        CompletionSettings {
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            retry: RetryPolicy {
                max_attempts: self.retry.max_attempts,
                base_delay: Duration::from_millis(self.retry.base_delay_ms),
            },
            attempt_timeout: Duration::from_secs(self.retry.attempt_timeout_secs),
        }
    }

    pub fn mcp_timeouts(&self) -> McpTimeouts {
        McpTimeouts {
            connect: Duration::from_secs(self.mcp_timeouts.connect_secs),
            list_tools: Duration::from_secs(self.mcp_timeouts.list_tools_secs),
            call: Duration::from_secs(self.mcp_timeouts.call_secs),
        }
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            provider: self.provider.clone(),
            max_turns: self.max_turns,
            history_window: self.history_window,
            bash_timeout: Duration::from_secs(self.bash_timeout_secs),
        }
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// `AGENT_ORCHESTRATOR_CONFIG` wins when it names an existing file; otherwise
/// searches upward from `start` for `agent-orchestrator.yaml`.
pub fn find_config_path(start: &Path) -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var(CONFIG_PATH_ENV) {
        let candidate = PathBuf::from(expand_tilde(&explicit));
        if candidate.is_file() {
            return Some(candidate);
        }
        tracing::warn!(path = %candidate.display(), "AGENT_ORCHESTRATOR_CONFIG does not name a file, searching instead");
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// Load and parse a config file.
///
/// `${VAR_NAME}` and `${VAR_NAME:-default}` are interpolated before parsing.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let interpolated = interpolate_env_vars(&raw);
    if interpolated.trim().is_empty() {
        return Ok(AppConfig::default());
    }

    serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Find and load the config, or fall back to defaults when there is none.
pub fn load(start: &Path) -> Result<AppConfig, ConfigError> {
    match find_config_path(start) {
        Some(path) => {
            let config = load_config(&path)?;
            tracing::info!(
                path = %path.display(),
                model = %config.model,
                mcp_servers = config.mcp_servers.len(),
                "loaded config"
            );
            Ok(config)
        }
        None => {
            tracing::info!("no agent-orchestrator.yaml found, using defaults");
            Ok(AppConfig::default())
        }
    }
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// `VAR` or `VAR:-default`. Defaults are tilde-expanded.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => std::env::var(name).unwrap_or_else(|_| expand_tilde(default)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
