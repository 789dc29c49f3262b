use serde_json::{Map, Value};

use super::{as_text, lookup, values_equal, ConditionEvaluator, BASIC};
use crate::{models::ConditionDefinition, RuleError};

/// Equality, numeric, text, membership and emptiness operators.
#[derive(Debug, Default)]
pub struct BasicEvaluator;

impl ConditionEvaluator for BasicEvaluator {
    fn condition_type(&self) -> &str {
        BASIC
    }

    fn evaluate(
        &self,
        condition: &ConditionDefinition,
        context: &Map<String, Value>,
    ) -> Result<bool, RuleError> {
        let actual = lookup(context, &condition.field);
        let expected = &condition.value;
        let op = condition.operator.as_str();

        match op {
            "eq" => Ok(actual.is_some_and(|v| values_equal(v, expected))),
            "ne" => Ok(!actual.is_some_and(|v| values_equal(v, expected))),

            "gt" | "gte" | "lt" | "lte" => {
                let left = numeric(op, actual)?;
                let right = numeric(op, Some(expected))?;
                Ok(match op {
                    "gt" => left > right,
                    "gte" => left >= right,
                    "lt" => left < right,
                    _ => left <= right,
                })
            }

            "contains" | "starts_with" | "ends_with" => {
                let Some(actual) = actual else {
                    return Ok(false);
                };
                if op == "contains" {
                    if let Value::Array(items) = actual {
                        return Ok(items.iter().any(|item| values_equal(item, expected)));
                    }
                }
                let haystack = as_text(actual);
                let needle = as_text(expected);
                Ok(match op {
                    "contains" => haystack.contains(&needle),
                    "starts_with" => haystack.starts_with(&needle),
                    _ => haystack.ends_with(&needle),
                })
            }

            "in" => {
                let Some(actual) = actual else {
                    return Ok(false);
                };
                Ok(match expected {
                    Value::Array(options) => options.iter().any(|o| values_equal(actual, o)),
                    Value::String(list) => {
                        let needle = as_text(actual);
                        list.split(',').any(|item| item.trim() == needle)
                    }
                    _ => false,
                })
            }

            "is_empty" => Ok(is_empty(actual)),
            "is_not_empty" => Ok(!is_empty(actual)),

            other => Err(RuleError::UnknownOperator {
                evaluator: BASIC.into(),
                operator: other.into(),
            }),
        }
    }
}

fn numeric(operator: &str, value: Option<&Value>) -> Result<f64, RuleError> {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| RuleError::NotNumeric {
        operator: operator.into(),
        value: value.map_or_else(|| "nothing".into(), Value::to_string),
    })
}

/// Missing, `null`, `""`, `[]` and `{}` are all empty.
pub(crate) fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        Some(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(field_value: Value, operator: &str, expected: Value) -> Result<bool, RuleError> {
        let ctx = json!({ "field": field_value }).as_object().cloned().unwrap();
        BasicEvaluator.evaluate(&ConditionDefinition::new("field", operator, expected), &ctx)
    }

    #[test]
    fn equality() {
        assert_eq!(check(json!("open"), "eq", json!("open")), Ok(true));
        assert_eq!(check(json!(2), "eq", json!(2.0)), Ok(true));
        assert_eq!(check(json!("open"), "ne", json!("closed")), Ok(true));
    }

    #[test]
    fn missing_field_is_not_equal() {
        let ctx = Map::new();
        let eq = ConditionDefinition::new("nope", "eq", json!(null));
        let ne = ConditionDefinition::new("nope", "ne", json!("x"));
        assert_eq!(BasicEvaluator.evaluate(&eq, &ctx), Ok(false));
        assert_eq!(BasicEvaluator.evaluate(&ne, &ctx), Ok(true));
    }

    #[test]
    fn numeric_comparisons_coerce_strings() {
        assert_eq!(check(json!(75), "gte", json!(50)), Ok(true));
        assert_eq!(check(json!("10"), "lt", json!(9.5)), Ok(false));
        assert_eq!(check(json!(3), "lte", json!("3")), Ok(true));
    }

    #[test]
    fn numeric_boundaries() {
        assert_eq!(check(json!(5), "gt", json!(5)), Ok(false));
        assert_eq!(check(json!(6), "gt", json!(5)), Ok(true));
        assert_eq!(check(json!(4.5), "gt", json!(5)), Ok(false));
        assert_eq!(check(json!(5), "gte", json!(5)), Ok(true));
        assert_eq!(check(json!(4), "gte", json!(5)), Ok(false));
        assert_eq!(check(json!(5), "lt", json!(5)), Ok(false));
        assert_eq!(check(json!(-1), "lt", json!(0)), Ok(true));
        assert_eq!(check(json!(5), "lte", json!(5.0)), Ok(true));
        assert_eq!(check(json!(6), "lte", json!(5)), Ok(false));
    }

    #[test]
    fn numeric_comparison_rejects_text() {
        assert!(matches!(
            check(json!("high"), "gt", json!(1)),
            Err(RuleError::NotNumeric { .. })
        ));
    }

    #[test]
    fn text_operators() {
        assert_eq!(check(json!("feature/login"), "starts_with", json!("feature/")), Ok(true));
        assert_eq!(check(json!("report.pdf"), "ends_with", json!(".pdf")), Ok(true));
        assert_eq!(check(json!("hello world"), "contains", json!("lo w")), Ok(true));
        assert_eq!(check(json!(["bug", "p1"]), "contains", json!("p1")), Ok(true));
    }

    #[test]
    fn membership() {
        assert_eq!(check(json!("closed"), "in", json!(["open", "pending"])), Ok(false));
        assert_eq!(check(json!("open"), "in", json!(["open", "pending"])), Ok(true));
        assert_eq!(check(json!("qa"), "in", json!("dev, qa, prod")), Ok(true));
        assert_eq!(check(json!("qa"), "in", json!(42)), Ok(false));
    }

    #[test]
    fn emptiness() {
        for empty in [Value::Null, json!(""), json!([]), json!({})] {
            assert_eq!(check(empty.clone(), "is_empty", Value::Null), Ok(true), "{empty}");
            assert_eq!(check(empty.clone(), "is_not_empty", Value::Null), Ok(false), "{empty}");
        }
        for filled in [json!(0), json!(false), json!(" "), json!([1]), json!({ "a": null })] {
            assert_eq!(check(filled.clone(), "is_empty", Value::Null), Ok(false), "{filled}");
            assert_eq!(check(filled.clone(), "is_not_empty", Value::Null), Ok(true), "{filled}");
        }

        let missing = ConditionDefinition::new("nope", "is_empty", Value::Null);
        assert_eq!(BasicEvaluator.evaluate(&missing, &Map::new()), Ok(true));
    }

    #[test]
    fn unknown_operator_is_an_error() {
        assert_eq!(
            check(json!(1), "between", json!([0, 2])),
            Err(RuleError::UnknownOperator {
                evaluator: "basic".into(),
                operator: "between".into()
            })
        );
    }
}
