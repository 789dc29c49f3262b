//! Condition evaluators.
//!
//! A condition is `field operator value`.  The operator picks the evaluator
//! family ([`evaluator_for_operator`]); the evaluator resolves `field` as a
//! dot path into the evaluation context and compares it with `value`.

mod basic;
mod pattern;
mod time;

pub use basic::BasicEvaluator;
pub(crate) use basic::is_empty;
pub use pattern::RegexEvaluator;
pub use time::TimeEvaluator;

use serde_json::{Map, Value};

use crate::{models::ConditionDefinition, RuleError};

/// Evaluator family names, as registered in the plugin registry.
pub const BASIC: &str = "basic";
pub const TIME: &str = "time";
pub const REGEX: &str = "regex";

/// Decides whether a single condition holds for a context.
///
/// Implementations must be deterministic for a given input; time-based
/// evaluators are the exception since they read the clock.
pub trait ConditionEvaluator: Send + Sync {
    /// Registry key (`"basic"`, `"time"`, `"regex"`, or a custom name).
    fn condition_type(&self) -> &str;

    fn evaluate(
        &self,
        condition: &ConditionDefinition,
        context: &Map<String, Value>,
    ) -> Result<bool, RuleError>;
}

/// Map an operator to the evaluator family that owns it.
pub fn evaluator_for_operator(operator: &str) -> &'static str {
    match operator {
        "matches" | "regex" | "not_matches" => REGEX,
        "before" | "after" | "equals" | "older_than" | "newer_than" => TIME,
        _ => BASIC,
    }
}

/// Resolve a dot-separated path (`event.data.status`) in `context`.
///
/// Array elements may be addressed by index (`items.0.name`).  Returns
/// `None` as soon as a segment is missing.
pub fn lookup<'a>(context: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = context.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Deep equality where numbers compare by value (`1 == 1.0`).
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => left == right,
    }
}

/// String form used by the text operators: strings as-is, `null` as empty.
pub(crate) fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
