//! Reading structured data out of free-form LLM replies.
//!
//! Models wrap their JSON in prose, markdown fences or reasoning blocks.
//! Instead of slicing on fence markers, every `{` is tried as the start of a
//! JSON value and the first one that deserializes to an object wins.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

/// A `<unusedN>thought` preamble (everything up to it), `<think>` blocks,
/// and stray `<unusedN>` tokens.
static REASONING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\A.*?<unused\d+>thought\n|<think>.*?</think>|<unused\d+>").expect("valid regex")
});

/// Remove model reasoning so only the answer remains.
pub fn strip_reasoning(raw: &str) -> Cow<'_, str> {
    REASONING_RE.replace_all(raw, "")
}

/// First JSON object in the answer part of `reply`.
pub fn first_json_object(reply: &str) -> Option<Map<String, Value>> {
    let answer = strip_reasoning(reply);
    answer.match_indices('{').find_map(|(start, _)| {
        let mut stream = serde_json::Deserializer::from_str(&answer[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(Value::Object(object))) => Some(object),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(reply: &str) -> Value {
        Value::Object(first_json_object(reply).unwrap())
    }

    #[test]
    fn thought_preamble_is_dropped() {
        let raw = "<unused94>thought\nThe girl is {maybe} four.\n<unused95>{\"fields\": {}}";
        assert_eq!(strip_reasoning(raw), "The girl is {maybe} four.\n{\"fields\": {}}");
    }

    #[test]
    fn braces_inside_think_blocks_are_ignored() {
        let raw = "<think>try {\"gene\": \"TTN\"}? no.</think>\n{\"gene\": \"SCN1A\"}";
        assert_eq!(object(raw), json!({"gene": "SCN1A"}));
    }

    #[test]
    fn fenced_answer_is_found() {
        let raw = "Here you go:\n```json\n{\"age\": 4, \"nested\": {\"a\": [1]}}\n```\nDone.";
        assert_eq!(object(raw), json!({"age": 4, "nested": {"a": [1]}}));
    }

    #[test]
    fn prose_braces_before_the_answer_are_skipped() {
        let raw = "Using the {field: value} layout: {\"sex\": \"male\"} as requested {end}";
        assert_eq!(object(raw), json!({"sex": "male"}));
    }

    #[test]
    fn clean_text_is_borrowed_unchanged() {
        let text = "{\"sex\": \"female\"}";
        assert!(matches!(strip_reasoning(text), Cow::Borrowed(t) if t == text));
    }

    #[test]
    fn no_object_returns_none() {
        assert!(first_json_object("I could not find anything.").is_none());
        assert!(first_json_object("[1, 2, 3]").is_none());
        assert!(first_json_object("{\"unterminated\": ").is_none());
    }
}
