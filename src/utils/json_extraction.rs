//! JSON extraction for LLM replies.
//!
//! Model replies mix prose, markdown fences, commented JSON and trailing
//! commas. The extractor normalizes the text, then walks it left to right and
//! feeds every `{` position to a streaming JSON decoder. Every object that
//! decodes is kept; objects are shallow-merged in encounter order so later
//! keys win.
//!
//! # Example
//!
//! ```
//! use codeforge::utils::json_extraction::parse_llm_json;
//!
//! let reply = "noise {\"a\":1,} more {\"b\":2}";
//! let merged = parse_llm_json(reply).unwrap();
//! assert_eq!(merged["a"], 1);
//! assert_eq!(merged["b"], 2);
//! ```

use serde_json::{Map, Value};

use crate::error::SynthesisError;

/// Maximum number of characters echoed back in parse errors.
const PREVIEW_CHARS: usize = 120;

/// Parses a noisy model reply into one merged JSON object.
///
/// # Errors
///
/// Returns `SynthesisError::Parse` when no JSON object can be decoded.
pub fn parse_llm_json(content: &str) -> Result<Map<String, Value>, SynthesisError> {
    let cleaned = strip_trailing_commas(&strip_comments(content));
    let objects = extract_json_objects(&cleaned);

    if objects.is_empty() {
        return Err(SynthesisError::Parse {
            preview: preview(content),
        });
    }

    Ok(merge_json_objects(objects))
}

/// Collects every decodable JSON object in `text`, in order of appearance.
///
/// Objects nested inside an already-decoded object are not reported
/// separately.
pub fn extract_json_objects(text: &str) -> Vec<Map<String, Value>> {
    let bytes = text.as_bytes();
    let mut objects = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        if bytes[pos] != b'{' {
            pos += 1;
            continue;
        }

        let mut stream = serde_json::Deserializer::from_str(&text[pos..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(Value::Object(map))) => {
                objects.push(map);
                pos += stream.byte_offset().max(1);
            }
            _ => pos += 1,
        }
    }

    objects
}

/// Shallow-merges objects; keys from later objects replace earlier ones.
pub fn merge_json_objects(objects: Vec<Map<String, Value>>) -> Map<String, Value> {
    let mut merged = Map::new();
    for object in objects {
        for (key, value) in object {
            merged.insert(key, value);
        }
    }
    merged
}

/// Removes `//` line comments and `/* */` block comments outside string literals.
pub fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut escape_next = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escape_next {
                escape_next = false;
            } else if c == '\\' {
                escape_next = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match (c, chars.peek()) {
            ('"', _) => {
                in_string = true;
                out.push(c);
            }
            ('/', Some('/')) => {
                // Keep the newline so line structure survives.
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            _ => out.push(c),
        }
    }

    out
}

/// Drops commas that directly precede `}` or `]` (ignoring whitespace),
/// outside string literals.
pub fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escape_next = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escape_next {
                escape_next = false;
            } else if c == '\\' {
                escape_next = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        if c == '"' {
            in_string = true;
            out.push(c);
            continue;
        }

        if c == ',' {
            let next_significant = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if matches!(next_significant, Some('}') | Some(']')) {
                continue;
            }
        }

        out.push(c);
    }

    out
}

/// Counts braces left open at the end of `text`, outside string literals.
///
/// A positive count on a failed parse usually means the reply was cut off by
/// the token limit.
pub fn unclosed_braces(text: &str) -> usize {
    let mut depth: isize = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for c in text.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => depth -= 1,
            _ => {}
        }
    }

    depth.max(0) as usize
}

fn preview(content: &str) -> String {
    let trimmed = content.trim();
    let mut preview: String = trimmed.chars().take(PREVIEW_CHARS).collect();
    let open = unclosed_braces(trimmed);
    if open > 0 {
        preview.push_str(&format!("... ({} unclosed braces, reply looks truncated)", open));
    }
    preview
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merges_multiple_objects_with_trailing_comma() {
        let merged = parse_llm_json("noise {\"a\":1,} more {\"b\":2}").unwrap();
        assert_eq!(Value::Object(merged), json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_no_brace_is_parse_error() {
        let err = parse_llm_json("I could not write that function.").unwrap_err();
        assert!(err.is_parse_error());
        assert!(err.to_string().contains("SynthesisParseError"));
    }

    #[test]
    fn test_later_keys_win() {
        let merged = parse_llm_json(r#"{"code": "old", "x": 1} then {"code": "new"}"#).unwrap();
        assert_eq!(merged["code"], "new");
        assert_eq!(merged["x"], 1);
    }

    #[test]
    fn test_nested_objects_not_reported_twice() {
        let objects = extract_json_objects(r#"{"outer": {"inner": 1}}"#);
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0]["outer"]["inner"], 1);
    }

    #[test]
    fn test_markdown_fence_and_comments() {
        let reply = r#"Here you go:
```json
{
  // the generated function
  "code": "fn add(a, b) { a + b }", /* inline */
  "description": "adds",
}
```"#;
        let merged = parse_llm_json(reply).unwrap();
        assert_eq!(merged["code"], "fn add(a, b) { a + b }");
        assert_eq!(merged["description"], "adds");
    }

    #[test]
    fn test_comment_markers_inside_strings_preserved() {
        let text = r#"{"url": "http://example.com/*x*/", "note": "a // b"}"#;
        assert_eq!(strip_comments(text), text);
    }

    #[test]
    fn test_trailing_comma_inside_string_preserved() {
        let text = r#"{"code": "[1, 2,]"}"#;
        assert_eq!(strip_trailing_commas(text), text);
        assert_eq!(strip_trailing_commas("[1, 2, ]"), "[1, 2 ]");
    }

    #[test]
    fn test_invalid_brace_region_skipped() {
        let merged = parse_llm_json("{not json} {\"ok\": true}").unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged["ok"], true);
    }

    #[test]
    fn test_truncated_reply_reports_unclosed_braces() {
        let err = parse_llm_json(r#"{"code": "fn f() { 1 "#).unwrap_err();
        assert!(err.to_string().contains("unclosed braces"));
    }

    #[test]
    fn test_unclosed_braces_ignores_strings() {
        assert_eq!(unclosed_braces(r#"{"a": "{{{"}"#), 0);
        assert_eq!(unclosed_braces("{ {"), 2);
    }
}
