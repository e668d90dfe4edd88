//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.pagebridge/config.json`) and environment.
//! Secrets (verify token, page access token, Gemini API key) may come from either; env wins.
//! [`Settings::resolve`] validates everything once at startup so request handlers never
//! look at the environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::dispatch::EventPolicy;
use crate::llm::ResponseMode;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Messenger page settings (verify token, access token, Graph API endpoint).
    #[serde(default)]
    pub messenger: MessengerConfig,

    /// Gemini completion settings.
    #[serde(default)]
    pub completion: CompletionConfig,
}

/// Gateway bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for the webhook HTTP server (default 8888).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1"). Use "0.0.0.0" behind a reverse proxy.
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    8888
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

/// Messenger page config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessengerConfig {
    /// Secret compared against `hub.verify_token` on subscription. Overridden by VERIFY_TOKEN env.
    pub verify_token: Option<String>,
    /// Page access token for the Send API. Overridden by PAGE_ACCESS_TOKEN env.
    pub page_access_token: Option<String>,
    /// Graph API base URL (default https://graph.facebook.com). Tests point this at a local mock.
    pub graph_api_base: Option<String>,
    /// Graph API version segment (default "v16.0").
    pub graph_api_version: Option<String>,
    /// Which messaging events of each entry are handled: "firstOnly" (default) or "all".
    #[serde(default)]
    pub event_policy: EventPolicy,
    /// Whole-request timeout for Send API calls, in seconds (default 10).
    pub request_timeout_secs: Option<u64>,
}

/// Gemini completion config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionConfig {
    /// Gemini API key. Overridden by API_KEY env.
    pub api_key: Option<String>,
    /// Base URL (default https://generativelanguage.googleapis.com).
    pub base_url: Option<String>,
    /// Model id used in `models/{model}:generateContent`.
    pub model: Option<String>,
    /// "structured" (default): the model answers as JSON title/body/question. "plain": free text, markdown stripped.
    #[serde(default)]
    pub mode: ResponseMode,
    /// Replaces the built-in persona prompt for the selected mode.
    pub system_instruction: Option<String>,
    /// Upper bound on upstream attempts per message (default 3).
    pub max_attempts: Option<u32>,
    /// Delay before the first retry after a 503, doubled on each further retry (default 1000).
    pub initial_backoff_ms: Option<u64>,
    /// Timeout for one generateContent attempt, in seconds (default 15). A timeout counts as a transport failure.
    pub request_timeout_secs: Option<u64>,
}

pub const DEFAULT_GRAPH_API_BASE: &str = "https://graph.facebook.com";
pub const DEFAULT_GRAPH_API_VERSION: &str = "v16.0";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash-preview-05-20";
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1000;
const DEFAULT_SEND_TIMEOUT_SECS: u64 = 10;
const DEFAULT_COMPLETION_TIMEOUT_SECS: u64 = 15;

/// Trimmed, non-empty env var value.
fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Trimmed, non-empty config value.
fn config_value(value: Option<&String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Resolve the webhook verify token: env VERIFY_TOKEN overrides config.
pub fn resolve_verify_token(config: &Config) -> Option<String> {
    env_value("VERIFY_TOKEN").or_else(|| config_value(config.messenger.verify_token.as_ref()))
}

/// Resolve the page access token: env PAGE_ACCESS_TOKEN overrides config.
pub fn resolve_page_access_token(config: &Config) -> Option<String> {
    env_value("PAGE_ACCESS_TOKEN")
        .or_else(|| config_value(config.messenger.page_access_token.as_ref()))
}

/// Resolve the Gemini API key: env API_KEY overrides config.
pub fn resolve_api_key(config: &Config) -> Option<String> {
    env_value("API_KEY").or_else(|| config_value(config.completion.api_key.as_ref()))
}

/// Retry bounds for the upstream completion call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (0-based): initial * 2^attempt.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Validated runtime settings. Built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind: String,
    pub port: u16,
    pub verify_token: String,
    pub page_access_token: String,
    pub graph_api_base: String,
    pub graph_api_version: String,
    pub event_policy: EventPolicy,
    pub api_key: String,
    pub gemini_base_url: String,
    pub model: String,
    pub mode: ResponseMode,
    pub system_instruction: String,
    pub retry: RetryPolicy,
    /// Per-attempt timeout of the Gemini client.
    pub completion_timeout: Duration,
    /// Per-call timeout of the Send API client.
    pub send_timeout: Duration,
}

impl Settings {
    /// Resolve secrets and defaults. Fails listing every missing required value.
    pub fn resolve(config: &Config) -> Result<Self> {
        let verify_token = resolve_verify_token(config);
        let page_access_token = resolve_page_access_token(config);
        let api_key = resolve_api_key(config);

        let mut missing = Vec::new();
        if verify_token.is_none() {
            missing.push("VERIFY_TOKEN (messenger.verifyToken)");
        }
        if page_access_token.is_none() {
            missing.push("PAGE_ACCESS_TOKEN (messenger.pageAccessToken)");
        }
        if api_key.is_none() {
            missing.push("API_KEY (completion.apiKey)");
        }
        let (Some(verify_token), Some(page_access_token), Some(api_key)) =
            (verify_token, page_access_token, api_key)
        else {
            anyhow::bail!("missing required configuration: {}", missing.join(", "));
        };

        let completion = &config.completion;
        let max_attempts = completion.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
        if max_attempts == 0 {
            anyhow::bail!("completion.maxAttempts must be at least 1");
        }
        let completion_timeout = timeout_secs(
            completion.request_timeout_secs,
            DEFAULT_COMPLETION_TIMEOUT_SECS,
            "completion.requestTimeoutSecs",
        )?;
        let send_timeout = timeout_secs(
            config.messenger.request_timeout_secs,
            DEFAULT_SEND_TIMEOUT_SECS,
            "messenger.requestTimeoutSecs",
        )?;
        let mode = completion.mode;
        let system_instruction = config_value(completion.system_instruction.as_ref())
            .unwrap_or_else(|| mode.default_system_instruction().to_string());

        Ok(Self {
            bind: config.gateway.bind.trim().to_string(),
            port: config.gateway.port,
            verify_token,
            page_access_token,
            graph_api_base: config_value(config.messenger.graph_api_base.as_ref())
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_GRAPH_API_BASE.to_string()),
            graph_api_version: config_value(config.messenger.graph_api_version.as_ref())
                .unwrap_or_else(|| DEFAULT_GRAPH_API_VERSION.to_string()),
            event_policy: config.messenger.event_policy,
            api_key,
            gemini_base_url: config_value(completion.base_url.as_ref())
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
            model: config_value(completion.model.as_ref())
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            mode,
            system_instruction,
            retry: RetryPolicy {
                max_attempts,
                initial_backoff: Duration::from_millis(
                    completion
                        .initial_backoff_ms
                        .unwrap_or(DEFAULT_INITIAL_BACKOFF_MS),
                ),
            },
            completion_timeout,
            send_timeout,
        })
    }
}

fn timeout_secs(value: Option<u64>, default: u64, key: &str) -> Result<Duration> {
    match value.unwrap_or(default) {
        0 => anyhow::bail!("{} must be at least 1", key),
        secs => Ok(Duration::from_secs(secs)),
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("PAGEBRIDGE_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".pagebridge").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, PAGEBRIDGE_CONFIG_PATH, or the default. Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

/// Write a default config file (no secrets) if none exists. Returns true when a file was created.
pub fn init_config_file(path: &std::path::Path) -> Result<bool> {
    if path.exists() {
        log::debug!("config already exists at {}, skipping", path.display());
        return Ok(false);
    }
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating config directory {}", dir.display()))?;
    }
    let body = serde_json::to_string_pretty(&Config::default())
        .context("serializing default config")?;
    std::fs::write(path, body)
        .with_context(|| format!("writing default config to {}", path.display()))?;
    log::info!("created default config at {}", path.display());
    Ok(true)
}
