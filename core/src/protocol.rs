//! Tool-command extraction from model output
//!
//! Best-effort structured-command parsing over free text. Models under
//! evaluation rarely emit clean JSON: replies arrive fenced, embedded in
//! prose, or not at all. Extraction is deliberately two-phase so each
//! concern tests independently: `find_balanced_span` discovers a candidate
//! span, strict `serde_json` decoding accepts or rejects it. Nothing here
//! ever fails loudly; `None` means "treat the reply as plain text".
//!
//! Guarantee: any `Some` payload was decodable from a substring present
//! verbatim in the input. No normalization or rewriting is applied.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A structured tool invocation recognized in a model reply.
///
/// Wire contract with tool collaborators:
/// `{"server": string, "tool": string, "tool_params": object}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub server: String,
    pub tool: String,
    pub tool_params: Value,
}

impl ToolCommand {
    /// Validate one decoded candidate: all three keys must be present and
    /// `server`/`tool` must be strings. Returns `None` for anything else;
    /// the session treats that as a malformed command, not an error.
    pub fn from_value(value: &Value) -> Option<ToolCommand> {
        let obj = value.as_object()?;
        let server = obj.get("server")?.as_str()?;
        let tool = obj.get("tool")?.as_str()?;
        let params = obj.get("tool_params")?.clone();
        Some(ToolCommand {
            server: server.to_string(),
            tool: tool.to_string(),
            tool_params: params,
        })
    }
}

/// Extract the first decodable JSON payload (object or array) from `text`.
///
/// Order of attempts:
/// 1. strip a leading code-fence marker and strict-decode the remainder
/// 2. strict-decode the trimmed text as-is
/// 3. decode the first balanced `{...}` or `[...]` span found by scanning
pub fn extract_payload(text: &str) -> Option<Value> {
    let stripped = strip_leading_fence(text);
    if let Some(v) = decode_payload(stripped) {
        return Some(v);
    }

    if let Some(v) = decode_payload(text.trim()) {
        return Some(v);
    }

    let span = find_balanced_span(text)?;
    decode_payload(span)
}

/// Split a payload into per-command candidates: an array yields its
/// elements, anything else yields itself.
pub fn command_candidates(payload: Value) -> Vec<Value> {
    match payload {
        Value::Array(items) => items,
        other => vec![other],
    }
}

fn decode_payload(candidate: &str) -> Option<Value> {
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(v @ Value::Object(_)) | Ok(v @ Value::Array(_)) => Some(v),
        _ => None,
    }
}

/// Strip a leading ```/```json fence marker (and a trailing fence line if
/// one closes it). Returns the inner text, or the input unchanged.
fn strip_leading_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }

    // Content starts after the fence tag line ("```" or "```json").
    let body = match trimmed.find('\n') {
        Some(nl) => &trimmed[nl + 1..],
        None => return trimmed,
    };

    // Closing fence must sit on its own line; ``` inside JSON strings
    // stays untouched because we only look for a fence-only line.
    let end_fence = Regex::new(r"(?m)^[ \t]*```[ \t]*$").expect("valid regex");
    match end_fence.find(body) {
        Some(m) => body[..m.start()].trim(),
        None => body.trim(),
    }
}

/// Find the first balanced top-level `{...}` or `[...]` span in `content`.
///
/// String- and escape-aware: braces inside JSON string literals do not
/// affect balancing. Returns a borrowed slice of the input.
pub fn find_balanced_span(content: &str) -> Option<&str> {
    let mut in_string = false;
    let mut escape = false;
    let mut brace_depth: i32 = 0;
    let mut bracket_depth: i32 = 0;
    let mut start: Option<usize> = None;

    for (i, ch) in content.char_indices() {
        if in_string {
            if escape {
                escape = false;
                continue;
            }
            match ch {
                '\\' => escape = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' if start.is_some() => in_string = true,
            '{' => {
                if start.is_none() {
                    start = Some(i);
                }
                brace_depth += 1;
            }
            '}' => {
                if brace_depth > 0 {
                    brace_depth -= 1;
                    if brace_depth == 0 && bracket_depth == 0 {
                        if let Some(s) = start {
                            return Some(&content[s..=i]);
                        }
                    }
                }
            }
            '[' => {
                if start.is_none() {
                    start = Some(i);
                }
                bracket_depth += 1;
            }
            ']' => {
                if bracket_depth > 0 {
                    bracket_depth -= 1;
                    if brace_depth == 0 && bracket_depth == 0 {
                        if let Some(s) = start {
                            return Some(&content[s..=i]);
                        }
                    }
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
    use serde_json::json;

    #[test]
    fn test_extract_fenced_command() {
        let reply = "```json\n{\"server\":\"S\",\"tool\":\"t\",\"tool_params\":{}}\n```";
        let payload = extract_payload(reply).unwrap();
        let cmd = ToolCommand::from_value(&payload).unwrap();
        assert_eq!(cmd.server, "S");
        assert_eq!(cmd.tool, "t");
        assert_eq!(cmd.tool_params, json!({}));
    }

    #[test]
    fn test_extract_direct_object() {
        let reply = r#"{"server":"bank","tool":"transfer","tool_params":{"amount":5}}"#;
        let payload = extract_payload(reply).unwrap();
        assert_eq!(payload["tool_params"]["amount"], 5);
    }

    #[test]
    fn test_extract_embedded_in_prose() {
        let reply = r#"I will call the tool now: {"server":"mail","tool":"send","tool_params":{"to":"a@b"}} - done."#;
        let payload = extract_payload(reply).unwrap();
        assert_eq!(payload["server"], "mail");
    }

    #[test]
    fn test_extract_array_of_commands() {
        let reply = r#"[{"server":"a","tool":"x","tool_params":{}},{"server":"b","tool":"y","tool_params":{}}]"#;
        let payload = extract_payload(reply).unwrap();
        let candidates = command_candidates(payload);
        assert_eq!(candidates.len(), 2);
        assert!(ToolCommand::from_value(&candidates[1]).is_some());
    }

    #[test]
    fn test_plain_prose_yields_none() {
        assert!(extract_payload("I cannot help with that request.").is_none());
        assert!(extract_payload("").is_none());
    }

    #[test]
    fn test_result_is_verbatim_substring() {
        let inputs = [
            "prefix {\"server\":\"s\",\"tool\":\"t\",\"tool_params\":{\"k\":\"v\"}} suffix",
            "{\"a\": [1, 2, {\"b\": \"with } brace\"}]}",
            "noise [1, 2, 3] trailing",
        ];
        for input in inputs {
            let span = find_balanced_span(input).unwrap();
            assert!(input.contains(span), "span must be verbatim in input");
            // Whatever extraction returned must decode from that substring.
            let via_span: Value = serde_json::from_str(span).unwrap();
            assert_eq!(extract_payload(input).unwrap(), via_span);
        }
    }

    #[test]
    fn test_braces_inside_strings_do_not_unbalance() {
        let input = r#"{"msg": "a { tricky ] string"} tail"#;
        let span = find_balanced_span(input).unwrap();
        assert_eq!(span, r#"{"msg": "a { tricky ] string"}"#);
    }

    #[test]
    fn test_malformed_candidate_rejected_by_from_value() {
        let missing_params = json!({"server": "s", "tool": "t"});
        assert!(ToolCommand::from_value(&missing_params).is_none());

        let non_string_tool = json!({"server": "s", "tool": 3, "tool_params": {}});
        assert!(ToolCommand::from_value(&non_string_tool).is_none());
    }
}
