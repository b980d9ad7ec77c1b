use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::PollConfig;

const DEFAULT_URL: &str = "http://localhost:8080";
const DEFAULT_INTERVAL_SECS: u64 = 5;
const DEFAULT_MAX_POLLS: u32 = 120;

pub const USAGE: &str = "usage: imagegen-poll [--base URL] [--token TOKEN] [--image FILE] \
[--interval SECS] [--max-polls N] [PROMPT...]";

pub fn parse_config() -> Result<PollConfig, String> {
    let defaults = PollConfig {
        base_url: env_or("IMAGEGEN_URL", DEFAULT_URL),
        token: env_opt("IMAGEGEN_TOKEN"),
        prompt: None,
        image: None,
        interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
        max_polls: DEFAULT_MAX_POLLS,
    };
    let args: Vec<String> = env::args().skip(1).collect();
    parse_args(&args, defaults)
}

/// Flags override `cfg`; remaining words are joined into the prompt.
pub fn parse_args(args: &[String], mut cfg: PollConfig) -> Result<PollConfig, String> {
    let mut words: Vec<&str> = Vec::new();
    let mut idx = 0;
    while idx < args.len() {
        let arg = args[idx].as_str();
        match arg {
            "--base" | "--token" | "--image" | "--interval" | "--max-polls" => {
                let value = args
                    .get(idx + 1)
                    .ok_or_else(|| format!("{} needs a value", arg))?
                    .clone();
                idx += 1;
                match arg {
                    "--base" => cfg.base_url = value,
                    "--token" => cfg.token = Some(value),
                    "--image" => cfg.image = Some(PathBuf::from(value)),
                    "--interval" => {
                        let secs = value
                            .parse::<u64>()
                            .map_err(|_| format!("--interval expects whole seconds, got '{}'", value))?;
                        cfg.interval = Duration::from_secs(secs);
                    }
                    _ => {
                        cfg.max_polls = value
                            .parse::<u32>()
                            .map_err(|_| format!("--max-polls expects a number, got '{}'", value))?;
                    }
                }
            }
            "-h" | "--help" => return Err(USAGE.to_string()),
            other if other.starts_with("--") => return Err(format!("unknown flag {}\n{}", other, USAGE)),
            word => words.push(word),
        }
        idx += 1;
    }

    if !words.is_empty() {
        cfg.prompt = Some(words.join(" "));
    }
    Ok(cfg)
}

fn env_or(key: &str, fallback: &str) -> String {
    env_opt(key).unwrap_or_else(|| fallback.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> PollConfig {
        PollConfig {
            base_url: DEFAULT_URL.to_string(),
            token: None,
            prompt: None,
            image: None,
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            max_polls: DEFAULT_MAX_POLLS,
        }
    }

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn flags_and_prompt_words() {
        let cfg = parse_args(
            &args(&["--base", "http://relay:9000", "--interval", "2", "red", "balloon", "--max-polls", "10"]),
            defaults(),
        )
        .unwrap();
        assert_eq!(cfg.base_url, "http://relay:9000");
        assert_eq!(cfg.interval, Duration::from_secs(2));
        assert_eq!(cfg.max_polls, 10);
        assert_eq!(cfg.prompt.as_deref(), Some("red balloon"));
    }

    #[test]
    fn no_prompt_leaves_it_to_the_server() {
        let cfg = parse_args(&[], defaults()).unwrap();
        assert_eq!(cfg, defaults());
    }

    #[test]
    fn bad_values_are_reported() {
        assert!(parse_args(&args(&["--interval", "soon"]), defaults()).is_err());
        assert!(parse_args(&args(&["--token"]), defaults()).is_err());
        assert!(parse_args(&args(&["--verbose"]), defaults()).is_err());
    }
}
