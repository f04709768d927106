//! Post-processing of model output
//!
//! Models wrap their answers in reasoning markup, prose and markdown fences.
//! Structured steps need the first JSON object out of that text.

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;

use super::BackendError;

/// Largest JSON object a structured step will parse
pub const MAX_STRUCTURED_BYTES: usize = 256 * 1024;

static THINKING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(think|thinking)>.*?(</(think|thinking)>|\z)")
        .expect("thinking pattern is a valid regex")
});

/// Removes `<think>` and `<thinking>` blocks, including an unterminated
/// trailing one
pub fn strip_thinking(text: &str) -> String {
    THINKING.replace_all(text, "").trim().to_string()
}

/// The JSON object in a model answer: the content of a ```json fence when
/// present, otherwise the first balanced `{...}` span
pub fn extract_json_object(text: &str) -> Option<&str> {
    if let Some(fenced) = extract_from_code_block(text, "json")
        && let Some(object) = extract_balanced(fenced, '{', '}')
    {
        return Some(object);
    }
    extract_balanced(text, '{', '}')
}

/// Strips reasoning markup, extracts the JSON object and parses it as `T`
pub fn parse_structured<T: DeserializeOwned>(text: &str) -> Result<T, BackendError> {
    let cleaned = strip_thinking(text);
    let object = extract_json_object(&cleaned).ok_or_else(|| {
        tracing::warn!(response_length = cleaned.len(), "No JSON object in model response");
        BackendError::MalformedResponse(format!(
            "no JSON object found in response ({} bytes)",
            cleaned.len()
        ))
    })?;

    if object.len() > MAX_STRUCTURED_BYTES {
        return Err(BackendError::MalformedResponse(format!(
            "JSON object of {} bytes exceeds the {} byte limit",
            object.len(),
            MAX_STRUCTURED_BYTES
        )));
    }

    serde_json::from_str(object)
        .map_err(|e| BackendError::MalformedResponse(format!("invalid JSON object: {}", e)))
}

fn extract_from_code_block<'a>(text: &'a str, language: &str) -> Option<&'a str> {
    let fence = format!("```{}", language);
    let start = text.find(&fence)? + fence.len();
    let rest = &text[start..];
    match rest.find("```") {
        Some(end) => Some(rest[..end].trim()),
        // Truncated answer
        None => Some(rest.trim()),
    }
}

/// First span from `open` to its matching `close`, skipping delimiters
/// inside string literals
fn extract_balanced(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Pair {
        positive: String,
        negative: String,
    }

    #[test]
    fn test_strip_thinking() {
        assert_eq!(
            strip_thinking("<think>plan the story</think>\nOnce upon a time"),
            "Once upon a time"
        );
        assert_eq!(
            strip_thinking("A<THINKING>\nhidden\n</THINKING> B"),
            "A B"
        );
        assert_eq!(strip_thinking("Answer <think>never closed"), "Answer");
    }

    #[test]
    fn test_extract_first_balanced_object() {
        let text = r#"Sure! {"a": {"b": "}"}, "c": 1} and then {"d": 2}"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"a": {"b": "}"}, "c": 1}"#)
        );
        assert_eq!(extract_json_object("no braces here"), None);
        assert_eq!(extract_json_object("{ never closed"), None);
    }

    #[test]
    fn test_fenced_block_wins() {
        let text = "Example: {\"x\": 1}\n```json\n{\"y\": 2}\n```";
        assert_eq!(extract_json_object(text), Some("{\"y\": 2}"));
    }

    #[test]
    fn test_parse_structured() {
        let text = "<think>json time</think>Here you go:\n```json\n{\"positive\": \"a cat\", \"negative\": \"blurry\"}\n```";
        let pair: Pair = parse_structured(text).unwrap();
        assert_eq!(
            pair,
            Pair {
                positive: "a cat".to_string(),
                negative: "blurry".to_string()
            }
        );
    }

    #[test]
    fn test_non_json_is_malformed() {
        let result: Result<Pair, _> = parse_structured("The characters are Ann and Bob.");
        assert!(matches!(result, Err(BackendError::MalformedResponse(_))));

        let result: Result<Pair, _> = parse_structured("{\"positive\": 3}");
        assert!(matches!(result, Err(BackendError::MalformedResponse(_))));
    }
}
