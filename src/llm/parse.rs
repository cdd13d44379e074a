//! Cleaning and JSON extraction for model replies.

use serde_json::Value;

/// Wrapper tokens some providers leave around the answer.
const WRAPPER_TOKENS: &[&str] = &[
    "<|begin_of_box|>",
    "<|end_of_box|>",
    "<|start_header_id|>",
    "<|end_header_id|>",
];

/// Strip `<think>` blocks, wrapper tokens and markdown fences from a reply.
///
/// Fences go last so a fenced answer after a reasoning block is unwrapped.
pub fn clean_response(response: &str) -> String {
    let mut cleaned = strip_tag_block(response, "<think>", "</think>");

    for token in WRAPPER_TOKENS {
        cleaned = cleaned.replace(token, "");
    }

    strip_fences(&cleaned)
}

fn strip_fences(response: &str) -> String {
    let mut cleaned = response.trim();
    if let Some(rest) = cleaned.strip_prefix("```json") {
        cleaned = rest;
    }
    if let Some(rest) = cleaned.strip_prefix("```") {
        cleaned = rest;
    }
    if let Some(rest) = cleaned.strip_suffix("```") {
        cleaned = rest;
    }
    cleaned.trim().to_string()
}

/// Remove every `start_tag ... end_tag` block (inclusive).
///
/// An unterminated block is left in place.
fn strip_tag_block(text: &str, start_tag: &str, end_tag: &str) -> String {
    let mut text = text.to_string();
    while let Some(start) = text.find(start_tag) {
        let search_from = start + start_tag.len();
        let Some(offset) = text[search_from..].find(end_tag) else {
            break;
        };
        let end = search_from + offset + end_tag.len();
        text.replace_range(start..end, "");
    }
    text
}

/// Extract the JSON object from a reply that may contain fences or prose.
pub fn extract_json(response: &str) -> String {
    let response = response.trim();

    if response.starts_with("```json") {
        if let Some(end) = response.rfind("```") {
            let start = "```json".len();
            if end > start {
                return response[start..end].trim().to_string();
            }
        }
    }

    if response.starts_with("```") {
        if let Some(end) = response.rfind("```") {
            let start = response.find('\n').map(|n| n + 1).unwrap_or(3);
            if end > start {
                return response[start..end].trim().to_string();
            }
        }
    }

    if let Some(start) = response.find('{') {
        if let Some(end) = response.rfind('}') {
            if end > start {
                return response[start..=end].to_string();
            }
        }
    }

    response.to_string()
}

/// Parse a reply into a JSON object, tolerating surrounding text.
///
/// Returns `None` when no object can be recovered.
pub fn parse_json_object(response: &str) -> Option<Value> {
    let cleaned = clean_response(response);

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&cleaned) {
        return Some(value);
    }

    match serde_json::from_str::<Value>(&extract_json(&cleaned)) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_response_strips_fences() {
        assert_eq!(clean_response("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(clean_response("```\nplain\n```"), "plain");
        assert_eq!(clean_response("  b, c  "), "b, c");
    }

    #[test]
    fn test_clean_response_strips_wrappers_and_thinking() {
        let raw = "<think>first I consider a</think><|begin_of_box|>a<|end_of_box|>";
        assert_eq!(clean_response(raw), "a");

        let two = "<think>x</think>answer<think>y</think>";
        assert_eq!(clean_response(two), "answer");
    }

    #[test]
    fn test_clean_response_unwraps_fence_after_thinking() {
        let raw = "<think>hmm</think>```json\n{\"a\": 1}\n```";
        assert_eq!(clean_response(raw), "{\"a\": 1}");

        let boxed = "<|begin_of_box|>```json\n{}\n```<|end_of_box|>";
        assert_eq!(clean_response(boxed), "{}");
    }

    #[test]
    fn test_unterminated_think_block_is_kept() {
        assert_eq!(clean_response("<think>never closed"), "<think>never closed");
    }

    #[test]
    fn test_extract_json_from_prose() {
        let reply = "Here is the grade: {\"points\": 2, \"feedback\": \"ok\"} Hope it helps.";
        assert_eq!(extract_json(reply), "{\"points\": 2, \"feedback\": \"ok\"}");
    }

    #[test]
    fn test_parse_json_object() {
        let value = parse_json_object("Sure!\n{\"questions\": []}").unwrap();
        assert!(value["questions"].as_array().unwrap().is_empty());

        assert!(parse_json_object("not json at all").is_none());
        assert!(parse_json_object("[1, 2, 3]").is_none());
    }
}
