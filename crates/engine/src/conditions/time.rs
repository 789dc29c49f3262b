use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use super::{lookup, ConditionEvaluator, TIME};
use crate::{durations, models::ConditionDefinition, RuleError};

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Instant comparisons (`before`, `after`, `equals`) and age checks
/// (`older_than`, `newer_than`).
#[derive(Debug, Default)]
pub struct TimeEvaluator;

impl ConditionEvaluator for TimeEvaluator {
    fn condition_type(&self) -> &str {
        TIME
    }

    fn evaluate(
        &self,
        condition: &ConditionDefinition,
        context: &Map<String, Value>,
    ) -> Result<bool, RuleError> {
        let op = condition.operator.as_str();
        if !matches!(op, "before" | "after" | "equals" | "older_than" | "newer_than") {
            return Err(RuleError::UnknownOperator {
                evaluator: TIME.into(),
                operator: op.into(),
            });
        }

        let Some(raw) = lookup(context, &condition.field).filter(|v| !v.is_null()) else {
            return Ok(false);
        };
        let actual = parse_time(raw)?;

        match op {
            "before" => Ok(actual < parse_time(&condition.value)?),
            "after" => Ok(actual > parse_time(&condition.value)?),
            "equals" => Ok(actual == parse_time(&condition.value)?),
            _ => {
                let max_age = durations::from_value(&condition.value)
                    .ok_or_else(|| RuleError::InvalidDuration(condition.value.to_string()))?;
                let max_age = chrono::Duration::from_std(max_age)
                    .map_err(|_| RuleError::InvalidDuration(condition.value.to_string()))?;
                let age = Utc::now() - actual;
                Ok(if op == "older_than" {
                    age > max_age
                } else {
                    age < max_age
                })
            }
        }
    }
}

/// Parse a timestamp from a string or a number of Unix seconds.
pub(crate) fn parse_time(value: &Value) -> Result<DateTime<Utc>, RuleError> {
    let invalid = || RuleError::InvalidTime(super::as_text(value));
    match value {
        Value::Number(n) => {
            let secs = n.as_f64().ok_or_else(invalid)?;
            let whole = secs.floor();
            let nanos = ((secs - whole) * 1e9).round() as u32;
            Utc.timestamp_opt(whole as i64, nanos.min(999_999_999))
                .single()
                .ok_or_else(invalid)
        }
        Value::String(text) => parse_time_str(text.trim()).ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

fn parse_time_str(text: &str) -> Option<DateTime<Utc>> {
    // RFC 3339 covers fractional seconds as well.
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Some(t.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(text, format) {
            return Some(t.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
}
