use std::collections::HashSet;
use std::env;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::llm::{OpenAIAdapter, OpenAIConfig, ProviderAdapter, ProviderError};

fn split_keys(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
}

/// `PRIMARY` may hold a comma-separated list; `PREFIX_2` .. `PREFIX_10` add more.
fn load_keys_from_env(primary: &str, prefix: &str) -> Vec<String> {
    let mut keys: Vec<String> = env::var(primary)
        .map(|raw| split_keys(&raw).collect())
        .unwrap_or_default();
    for idx in 2..=10 {
        if let Ok(raw) = env::var(format!("{}_{}", prefix, idx)) {
            keys.extend(split_keys(&raw));
        }
    }
    let mut seen = HashSet::new();
    keys.retain(|key| seen.insert(key.clone()));
    keys
}

pub fn load_upstream_keys() -> Vec<String> {
    load_keys_from_env("OPENAI_API_KEY", "OPENAI_API_KEY")
}

/// Build the upstream adapter, or `None` when no key is configured. Requests
/// are then refused one by one instead of the server refusing to start.
pub fn build_provider(cfg: &ServerConfig) -> Result<Option<Arc<dyn ProviderAdapter>>, ProviderError> {
    if cfg.api_keys.is_empty() {
        return Ok(None);
    }
    let adapter = OpenAIAdapter::new(OpenAIConfig {
        api_keys: cfg.api_keys.clone(),
        base_url: cfg.upstream_base_url.clone(),
        model: cfg.model.clone(),
    })?;
    Ok(Some(Arc::new(adapter)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_comma_separated_keys() {
        let keys: Vec<String> = split_keys(" sk-a, ,sk-b ,").collect();
        assert_eq!(keys, vec!["sk-a".to_string(), "sk-b".to_string()]);
    }

    #[test]
    fn repeated_keys_across_variables_are_dropped() {
        std::env::set_var("IMAGEGEN_TEST_KEYS", "sk-a,sk-b");
        std::env::set_var("IMAGEGEN_TEST_KEYS_3", "sk-c, sk-a");
        std::env::set_var("IMAGEGEN_TEST_KEYS_4", "sk-b");
        let keys = load_keys_from_env("IMAGEGEN_TEST_KEYS", "IMAGEGEN_TEST_KEYS");
        assert_eq!(keys, vec!["sk-a".to_string(), "sk-b".to_string(), "sk-c".to_string()]);
    }

    #[test]
    fn no_keys_means_no_provider() {
        let cfg = ServerConfig::default();
        assert!(build_provider(&cfg).unwrap().is_none());
    }

    #[test]
    fn keys_build_a_provider() {
        let cfg = ServerConfig {
            api_keys: vec!["sk-test".into()],
            ..ServerConfig::default()
        };
        assert!(build_provider(&cfg).unwrap().is_some());
    }
}
