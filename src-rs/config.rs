//! Server configuration, read once from the environment at startup.

use std::time::Duration;

use crate::llm::openai_adapter::{DEFAULT_BASE_URL, DEFAULT_MODEL};

pub const DEFAULT_PROMPT: &str = "Studio Ghibli style husky";

/// How `POST /predictions` hands back its result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Answer 202 with a task ID at once; the client polls.
    Polling,
    /// Hold the request open until generation ends and answer with the task.
    Direct,
}

impl DeliveryMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "polling" | "poll" | "task" => Some(DeliveryMode::Polling),
            "direct" | "sync" => Some(DeliveryMode::Direct),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Upstream keys; empty means generation requests are refused.
    pub api_keys: Vec<String>,
    pub upstream_base_url: String,
    pub model: String,
    pub default_prompt: String,
    /// `memory://`, `file:///dir` or a bare directory path.
    pub store_url: String,
    /// Externally reachable origin used to build `poll_url`s.
    pub public_url: Option<String>,
    pub delivery: DeliveryMode,
    /// Shared secret required on prediction routes when set.
    pub access_token: Option<String>,
    pub generation_timeout: Duration,
    pub cleanup_delay: Duration,
    pub retention: Duration,
    pub sweep_interval: Duration,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            api_keys: Vec::new(),
            upstream_base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            default_prompt: DEFAULT_PROMPT.to_string(),
            store_url: "file://temp_storage".to_string(),
            public_url: None,
            delivery: DeliveryMode::Polling,
            access_token: None,
            generation_timeout: Duration::from_secs(300),
            cleanup_delay: Duration::from_secs(120),
            retention: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(300),
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let bind_address = match env_opt("IMAGEGEN_BIND") {
            Some(addr) => addr,
            None => match env_opt("PORT") {
                Some(port) => format!("0.0.0.0:{}", port),
                None => defaults.bind_address,
            },
        };
        let public_url = env_opt("IMAGEGEN_PUBLIC_URL")
            .or_else(|| env_opt("VERCEL_URL").map(|host| format!("https://{}", host)))
            .map(|url| url.trim_end_matches('/').to_string());

        Self {
            bind_address,
            api_keys: crate::helpers::load_upstream_keys(),
            upstream_base_url: env_or("OPENAI_BASE_URL", &defaults.upstream_base_url),
            model: env_or("IMAGEGEN_MODEL", &defaults.model),
            default_prompt: defaults.default_prompt,
            store_url: env_or("IMAGEGEN_STORE_URL", &defaults.store_url),
            public_url,
            delivery: env_opt("IMAGEGEN_DELIVERY")
                .and_then(|raw| DeliveryMode::parse(&raw))
                .unwrap_or(defaults.delivery),
            access_token: env_opt("IMAGEGEN_ACCESS_TOKEN"),
            generation_timeout: env_secs("IMAGEGEN_GENERATION_TIMEOUT_SECS", defaults.generation_timeout),
            cleanup_delay: env_secs("IMAGEGEN_CLEANUP_DELAY_SECS", defaults.cleanup_delay),
            retention: env_secs("IMAGEGEN_RETENTION_SECS", defaults.retention),
            sweep_interval: env_secs("IMAGEGEN_SWEEP_INTERVAL_SECS", defaults.sweep_interval),
            log_level: env_or("IMAGEGEN_LOG", &defaults.log_level),
            log_json: env_opt("IMAGEGEN_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }
}

fn env_or(key: &str, fallback: &str) -> String {
    env_opt(key).unwrap_or_else(|| fallback.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}

fn env_secs(key: &str, fallback: Duration) -> Duration {
    env_opt(key)
        .and_then(|raw| raw.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(fallback)
}
