/// If/Else node executor
///
/// Evaluates one condition against a value at a field path and produces
/// `branch` (`"true"` / `"false"`), passing the input through. The head of
/// the field path may name a prior node (by label or id), otherwise the
/// path is read from the current input.

use anyhow::Result;
use serde_json::{json, Map, Value};

use crate::runtime::executors::NodeContext;
use crate::template;
use crate::workflow::types::Node;

pub fn execute(node: &Node, ctx: &NodeContext<'_>) -> Result<Value> {
    let condition_type = node.config_str("conditionType").unwrap_or("equals");
    let field_path = node.config_str("fieldPath").unwrap_or("output.text");
    let compare_value = node.config.get("compareValue").cloned().unwrap_or(Value::String(String::new()));
    let case_sensitive = node.config_bool("caseSensitive", false);

    tracing::info!("🔀 Executing if/else node: {}", node.id);
    tracing::info!("📋 Condition: {} {} {}", field_path, condition_type, compare_value);

    let actual_value = resolve_field(field_path, ctx).cloned();

    let condition_met = evaluate(
        condition_type,
        actual_value.as_ref(),
        &compare_value,
        case_sensitive,
    );
    let branch = if condition_met { "true" } else { "false" };

    tracing::info!("📊 Condition result: {} (branch: {})", condition_met, branch);

    // Pass the input through, augmented with the branch decision.
    let mut result = match ctx.input {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    result.insert("success".to_string(), json!(true));
    result.insert("branch".to_string(), json!(branch));
    result.insert(
        "if_else_result".to_string(),
        json!({
            "condition_met": condition_met,
            "checked_value": actual_value.as_ref().map(value_as_string).unwrap_or_default(),
            "condition": format!("{} {} {}", field_path, condition_type, value_as_string(&compare_value)),
            "node_id": node.id,
        }),
    );

    Ok(Value::Object(result))
}

/// Locate the value the condition checks
///
/// The first path segment is tried as a node label or id against the result
/// pool; the literal `input` head reads the current input (same grammar as
/// templates); otherwise the whole path is read from the current input.
fn resolve_field<'a>(field_path: &str, ctx: &'a NodeContext<'_>) -> Option<&'a Value> {
    let (head, rest) = field_path
        .split_once('.')
        .unwrap_or((field_path, ""));
    if let Some(node_id) = ctx.label_to_id.get(head) {
        if let Some(source) = ctx.results.get(node_id) {
            return template::lookup_path(source, rest);
        }
    }
    if head == "input" {
        return template::lookup_path(ctx.input, rest);
    }
    template::lookup_path(ctx.input, field_path)
}

fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn value_as_f64(value: Option<&Value>) -> Option<f64> {
    match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

fn evaluate(
    condition_type: &str,
    actual: Option<&Value>,
    compare: &Value,
    case_sensitive: bool,
) -> bool {
    // Nulls count as missing everywhere except the existence checks.
    let actual = actual.filter(|v| !v.is_null());

    match condition_type {
        "greater" | "greater_equal" | "less" | "less_equal" => {
            // When either operand fails to parse, both collapse to zero.
            let (a, c) = match (value_as_f64(actual), value_as_f64(Some(compare))) {
                (Some(a), Some(c)) => (a, c),
                _ => (0.0, 0.0),
            };
            match condition_type {
                "greater" => a > c,
                "greater_equal" => a >= c,
                "less" => a < c,
                _ => a <= c,
            }
        }
        "regex" => {
            let text = actual.map(value_as_string).unwrap_or_default();
            match regex::Regex::new(&value_as_string(compare)) {
                Ok(re) => re.is_match(&text),
                Err(_) => false,
            }
        }
        "exists" => actual.is_some(),
        "is_empty" => actual.map(value_as_string).unwrap_or_default().trim().is_empty(),
        "is_not_empty" => !actual.map(value_as_string).unwrap_or_default().trim().is_empty(),
        _ => {
            let mut a = actual.map(value_as_string).unwrap_or_default();
            let mut c = value_as_string(compare);
            if !case_sensitive {
                a = a.to_lowercase();
                c = c.to_lowercase();
            }
            match condition_type {
                "equals" => a == c,
                "not_equals" => a != c,
                "contains" => a.contains(&c),
                "not_contains" => !a.contains(&c),
                // Unknown condition types never match.
                _ => false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(condition: &str, actual: Option<Value>, compare: Value) -> bool {
        evaluate(condition, actual.as_ref(), &compare, false)
    }

    #[test]
    fn string_comparisons_default_case_insensitive() {
        assert!(eval("equals", Some(json!("Hello")), json!("hello")));
        assert!(!evaluate("equals", Some(&json!("Hello")), &json!("hello"), true));
        assert!(eval("contains", Some(json!("invoice due")), json!("INVOICE")));
        assert!(eval("not_contains", Some(json!("abc")), json!("xyz")));
    }

    #[test]
    fn numeric_comparisons_coerce_strings() {
        assert!(eval("less", Some(json!("2")), json!(3)));
        assert!(eval("greater_equal", Some(json!(3.5)), json!("3.5")));
        // Unparseable operands collapse both sides to zero.
        assert!(!eval("less", Some(json!("not a number")), json!(1)));
        assert!(eval("less_equal", Some(json!("nope")), json!(5)));
        assert!(!eval("greater", Some(json!("nope")), json!(0)));
    }

    #[test]
    fn null_input_produces_a_branch_for_every_condition() {
        for condition in [
            "equals", "not_equals", "contains", "not_contains", "greater", "greater_equal",
            "less", "less_equal", "regex", "exists", "is_empty", "is_not_empty",
        ] {
            // Must never panic, and must produce a boolean either way.
            let _ = eval(condition, Some(Value::Null), json!("x"));
            let _ = eval(condition, None, json!("x"));
        }
        assert!(!eval("exists", Some(Value::Null), json!("")));
        assert!(eval("is_empty", None, json!("")));
        assert!(!eval("is_not_empty", Some(Value::Null), json!("")));
    }

    #[test]
    fn regex_condition() {
        assert!(eval("regex", Some(json!("order-1234")), json!(r"order-\d+")));
        assert!(!eval("regex", Some(json!("plain")), json!(r"\d{4}")));
        // A broken pattern is a non-match, not a failure.
        assert!(!eval("regex", Some(json!("x")), json!("[unclosed")));
    }

    #[test]
    fn unknown_condition_is_false() {
        assert!(!eval("sounds_like", Some(json!("a")), json!("a")));
    }
}
