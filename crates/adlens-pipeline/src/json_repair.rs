//! Recovery of almost-JSON model output.
//!
//! Models asked for JSON sometimes wrap it in markdown fences, break lines
//! inside string values, leave trailing commas or stop before the closing
//! braces. [`parse_lenient`] parses strictly first and only falls back to
//! [`repair`] when that fails, so well-formed input is never rewritten.
//!
//! Each step is total and the order is fixed:
//! strip fences, collapse newlines, strip trailing commas, balance braces.

use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| Regex::new(r"```[A-Za-z0-9_-]*").expect("valid fence regex"))
}

fn newline_regex() -> &'static Regex {
    static NEWLINE: OnceLock<Regex> = OnceLock::new();
    NEWLINE.get_or_init(|| Regex::new(r"\r?\n\s*").expect("valid newline regex"))
}

/// Remove markdown code fence markers and surrounding whitespace.
pub fn strip_fences(input: &str) -> String {
    fence_regex().replace_all(input, "").trim().to_string()
}

/// Replace every line break (and the indentation after it) with a space.
pub fn collapse_newlines(input: &str) -> String {
    newline_regex().replace_all(input, " ").into_owned()
}

/// Drop commas that directly precede a closing bracket or brace, or end
/// the input.
///
/// Commas inside string literals are left alone.
pub fn strip_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if !matches!(next, None | Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }

    out
}

/// Close an unterminated string, then append the closers of every bracket
/// and brace still open at the end of the input.
pub fn balance_braces(input: &str) -> String {
    let mut open = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in input.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => open.push('}'),
            '[' => open.push(']'),
            '}' | ']' => {
                if open.last() == Some(&c) {
                    open.pop();
                }
            }
            _ => {}
        }
    }

    let mut out = input.to_string();
    if in_string {
        out.push('"');
    }
    while let Some(closer) = open.pop() {
        out.push(closer);
    }
    out
}

/// Run every repair step in order.
pub fn repair(input: &str) -> String {
    let text = strip_fences(input);
    let text = collapse_newlines(&text);
    let text = strip_trailing_commas(&text);
    balance_braces(&text)
}

/// Parse strictly, falling back to the repaired text.
pub fn parse_lenient<T: DeserializeOwned>(input: &str) -> Result<T, serde_json::Error> {
    match serde_json::from_str(input) {
        Ok(value) => Ok(value),
        Err(_) => serde_json::from_str(&repair(input)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_trailing_comma_and_newline() {
        let value: Value = parse_lenient("{ \"a\": \"x\",\n \"b\": \"y\", }").unwrap();
        assert_eq!(value, json!({"a": "x", "b": "y"}));
    }

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_fences("{\"a\": 1}"), "{\"a\": 1}");
    }

    #[test]
    fn test_collapse_newlines_inside_string() {
        let value: Value = parse_lenient("{\"hook\": \"line one\n   line two\"}").unwrap();
        assert_eq!(value, json!({"hook": "line one line two"}));
    }

    #[test]
    fn test_strip_trailing_commas_ignores_strings() {
        assert_eq!(strip_trailing_commas(r#"["a,]", "b",]"#), r#"["a,]", "b"]"#);
        assert_eq!(strip_trailing_commas(r#"{"a": [1, 2, ], }"#), r#"{"a": [1, 2 ] }"#);
    }

    #[test]
    fn test_balance_braces() {
        assert_eq!(balance_braces(r#"{"a": [1, 2"#), r#"{"a": [1, 2]}"#);
        assert_eq!(balance_braces(r#"{"a": "unterminated"#), r#"{"a": "unterminated"}"#);
        assert_eq!(balance_braces(r#"{"a": "}"}"#), r#"{"a": "}"}"#);
    }

    #[test]
    fn test_fenced_truncated_payload() {
        let raw = "```json\n{\n  \"hook\": \"Paise wapas\",\n  \"power_phrases\": [\"guarantee\",\n";
        let value: Value = parse_lenient(raw).unwrap();
        assert_eq!(
            value,
            json!({"hook": "Paise wapas", "power_phrases": ["guarantee"]})
        );
    }

    #[test]
    fn test_well_formed_input_is_untouched() {
        let raw = r#"{"a": "x,]\n", "b": [1, 2]}"#;
        let value: Value = parse_lenient(raw).unwrap();
        assert_eq!(value, json!({"a": "x,]\n", "b": [1, 2]}));
    }

    #[test]
    fn test_unrecoverable_input_fails() {
        assert!(parse_lenient::<Value>("not json at all").is_err());
    }
}
