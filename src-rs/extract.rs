//! Pulls the generated image URL and any JSON parameter block out of the
//! model's streamed text. Pure functions; a miss is `None`, never an error.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// `![图片](https://…)` / `![image](https://…)` as emitted by the image model.
static MARKDOWN_IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[(?:图片|image)\]\((https://[^)\s]+)\)").unwrap());

/// Bare link on the model's delivery bucket.
static DELIVERY_HOST_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(https://tokensceshi\.oss[^)\s]+)").unwrap());

static JSON_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json[ \t]*\r?\n(.*?)```").unwrap());

/// Tries each URL pattern in priority order; the first hit wins.
pub fn extract_image_url(text: &str) -> Option<String> {
    [&*MARKDOWN_IMAGE, &*DELIVERY_HOST_URL]
        .into_iter()
        .find_map(|pattern| pattern.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// First fenced `json` block, parsed. Unparseable blocks count as absent.
pub fn extract_params(text: &str) -> Option<Value> {
    let caps = JSON_FENCE.captures(text)?;
    serde_json::from_str(caps.get(1)?.as_str().trim()).ok()
}
