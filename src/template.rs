/// Template expansion for node configuration strings
///
/// Node configs reference prior results with `{{ Node Label.path.to.value }}`
/// or `{{ node-id.path[0].value }}` expressions. The expander is a small
/// hand-rolled scanner over the double-brace form; it deliberately is not a
/// general expression engine.

use std::collections::HashMap;
use std::sync::OnceLock;

use anyhow::Result;
use regex::Regex;
use serde_json::{Map, Value};

/// Replace every `{{ expr }}` occurrence in `template`
///
/// The head segment of an expression selects the data source: the literal
/// `input` reads the run's initial input, a node label or id reads that
/// node's entry in the result pool. An unknown source is replaced with a
/// visible error token; a path miss inside a known source becomes the empty
/// string with a warning log, and execution continues.
pub fn replace_templates(
    template: &str,
    input: &Value,
    label_to_id: &HashMap<String, String>,
    results: &Map<String, Value>,
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let Some(end_rel) = rest[start + 2..].find("}}") else {
            break;
        };
        let end = start + 2 + end_rel;
        out.push_str(&rest[..start]);

        let expr = rest[start + 2..end].trim();
        out.push_str(&resolve_expression(expr, input, label_to_id, results));

        rest = &rest[end + 2..];
    }
    out.push_str(rest);
    out
}

fn resolve_expression(
    expr: &str,
    input: &Value,
    label_to_id: &HashMap<String, String>,
    results: &Map<String, Value>,
) -> String {
    let (head, path) = match expr.split_once('.') {
        Some((head, path)) => (head, path),
        None => (expr, ""),
    };

    let source: &Value = if head == "input" {
        input
    } else {
        // Labels take precedence; an unknown label falls through to the raw id.
        let node_id = label_to_id.get(head).map(String::as_str).unwrap_or(head);
        match results.get(node_id) {
            Some(value) => value,
            None => {
                tracing::warn!("⚠️ Template: node '{}' (resolved to '{}') not found in results", head, node_id);
                return format!("{{{{ERROR: Node '{}' not found}}}}", head);
            }
        }
    };

    match lookup_path(source, path) {
        Some(value) if !value.is_null() => render_value(value),
        _ => {
            tracing::warn!("⚠️ Template: path '{}' not found, replacing with empty string", expr);
            String::new()
        }
    }
}

/// Walk a dotted/bracketed path like `output.text` or `json.items[0].name`
///
/// Mapping lookups go by key, sequence indexing by zero-based digit.
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }

    let mut current = root;
    for key in path.split(['.', '[', ']']).filter(|k| !k.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(key)?,
            Value::Array(items) if key.chars().all(|c| c.is_ascii_digit()) => {
                items.get(key.parse::<usize>().ok()?)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Render a resolved value into the surrounding template text
///
/// Objects and arrays serialize as compact JSON so the expansion can be
/// embedded inside a JSON body template; strings are inserted raw.
fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(_) | Value::Array(_) => {
            serde_json::to_string(value).unwrap_or_default()
        }
        other => other.to_string(),
    }
}

/// Parse JSON produced by template expansion
///
/// Expanded body templates are first parsed strictly; on failure a
/// permissive pass accepts single-quoted strings, Python-style literals
/// (`True`/`False`/`None`) and trailing commas before the error surfaces.
pub fn parse_loose(text: &str) -> Result<Value> {
    match serde_json::from_str(text) {
        Ok(value) => Ok(value),
        Err(strict_err) => {
            tracing::warn!("Strict JSON parse failed ({}), trying permissive parse", strict_err);
            let normalized = normalize_relaxed(text);
            serde_json::from_str(&normalized)
                .map_err(|e| anyhow::anyhow!("Failed to parse JSON (strict: {}; permissive: {})", strict_err, e))
        }
    }
}

/// Rewrite relaxed JSON into strict JSON
///
/// Handles three tolerances: single-quoted strings (inner double quotes get
/// escaped), bare Python literals, and trailing commas before a closing
/// bracket. Everything inside double-quoted strings is left untouched.
fn normalize_relaxed(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' => {
                // Copy a double-quoted string verbatim.
                out.push(c);
                i += 1;
                while i < chars.len() {
                    out.push(chars[i]);
                    if chars[i] == '\\' && i + 1 < chars.len() {
                        out.push(chars[i + 1]);
                        i += 2;
                        continue;
                    }
                    if chars[i] == '"' {
                        i += 1;
                        break;
                    }
                    i += 1;
                }
            }
            '\'' => {
                // Convert a single-quoted string to double quotes.
                out.push('"');
                i += 1;
                while i < chars.len() {
                    match chars[i] {
                        '\\' if i + 1 < chars.len() => {
                            out.push('\\');
                            out.push(chars[i + 1]);
                            i += 2;
                        }
                        '"' => {
                            out.push_str("\\\"");
                            i += 1;
                        }
                        '\'' => {
                            out.push('"');
                            i += 1;
                            break;
                        }
                        other => {
                            out.push(other);
                            i += 1;
                        }
                    }
                }
            }
            ',' => {
                // Drop the comma if the next non-whitespace char closes a scope.
                let mut j = i + 1;
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }
                if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                    i += 1;
                } else {
                    out.push(',');
                    i += 1;
                }
            }
            c if c.is_ascii_alphabetic() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.as_str() {
                    "True" => out.push_str("true"),
                    "False" => out.push_str("false"),
                    "None" => out.push_str("null"),
                    other => out.push_str(other),
                }
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    out
}

/// Strip a Markdown code fence (```json ... ```) around LLM output
///
/// Returns the inner text when a fenced block is found anywhere in the
/// input, otherwise the input unchanged.
pub fn strip_code_fences(text: &str) -> &str {
    static FENCE_RE: OnceLock<Regex> = OnceLock::new();
    let re = FENCE_RE
        .get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("fence regex"));
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn label_map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(l, id)| (l.to_string(), id.to_string())).collect()
    }

    fn pool(entries: &[(&str, Value)]) -> Map<String, Value> {
        entries.iter().map(|(id, v)| (id.to_string(), v.clone())).collect()
    }

    #[test]
    fn resolves_input_and_node_paths() {
        let input = json!({"query": "hello"});
        let results = pool(&[("node-1", json!({"text": "world", "meta": {"id_node": "node-1"}}))]);
        let labels = label_map(&[("Chat", "node-1")]);

        let out = replace_templates("{{input.query}} {{Chat.text}} {{node-1.meta.id_node}}", &input, &labels, &results);
        assert_eq!(out, "hello world node-1");
    }

    #[test]
    fn array_indexing_in_paths() {
        let results = pool(&[("a", json!({"json": {"items": [{"name": "first"}, {"name": "second"}]}}))]);
        let out = replace_templates("{{a.json.items[1].name}}", &Value::Null, &HashMap::new(), &results);
        assert_eq!(out, "second");
    }

    #[test]
    fn unknown_node_yields_error_token() {
        let out = replace_templates("{{ghost.text}}", &Value::Null, &HashMap::new(), &Map::new());
        assert_eq!(out, "{{ERROR: Node 'ghost' not found}}");
    }

    #[test]
    fn missing_path_yields_empty_string() {
        let results = pool(&[("a", json!({"text": "x"}))]);
        let out = replace_templates("-{{a.missing.deep}}-", &Value::Null, &HashMap::new(), &results);
        assert_eq!(out, "--");
    }

    #[test]
    fn objects_render_as_compact_json() {
        let results = pool(&[("a", json!({"json": {"k": 1}}))]);
        let out = replace_templates("{{a.json}}", &Value::Null, &HashMap::new(), &results);
        assert_eq!(out, r#"{"k":1}"#);
    }

    #[test]
    fn expansion_is_idempotent_without_braces_in_output() {
        let input = json!({"n": 3});
        let labels = HashMap::new();
        let results = Map::new();
        let once = replace_templates("value={{input.n}}", &input, &labels, &results);
        let twice = replace_templates(&once, &input, &labels, &results);
        assert_eq!(once, twice);
    }

    #[test]
    fn whitespace_inside_braces_is_stripped() {
        let input = json!({"q": "ok"});
        let out = replace_templates("{{  input.q  }}", &input, &HashMap::new(), &Map::new());
        assert_eq!(out, "ok");
    }

    #[test]
    fn parse_loose_accepts_strict_json() {
        let v = parse_loose(r#"{"a": 1}"#).unwrap();
        assert_eq!(v, json!({"a": 1}));
    }

    #[test]
    fn parse_loose_accepts_python_flavored_json() {
        let v = parse_loose(r#"{'ok': True, 'missing': None, 'items': [1, 2,], }"#).unwrap();
        assert_eq!(v, json!({"ok": true, "missing": null, "items": [1, 2]}));
    }

    #[test]
    fn parse_loose_keeps_double_quoted_content_untouched() {
        let v = parse_loose(r#"{"text": "it's True, trailing}"}"#).unwrap();
        assert_eq!(v, json!({"text": "it's True, trailing}"}));
    }

    #[test]
    fn parse_loose_rejects_garbage() {
        assert!(parse_loose("not json at all").is_err());
    }

    #[test]
    fn strips_json_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n[1,2]\n```"), "[1,2]");
        assert_eq!(strip_code_fences("plain text"), "plain text");
        assert_eq!(strip_code_fences("prefix ```json\n{}\n``` suffix"), "{}");
    }
}
