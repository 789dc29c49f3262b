//! Action guard expressions.
//!
//! Two shapes are understood:
//!
//! - comparison: `priority eq high`, `progress gte 50`, `labels contains "needs review"`
//! - function call: `exists(assignee)`, `not_empty(event.data.labels)`
//!
//! Comparison values are read as JSON when they parse as JSON and as a bare
//! string otherwise.  Function arguments are quoted literals, numbers and
//! booleans, or otherwise field paths resolved against the context.

use serde_json::{Map, Value};

use crate::conditions::lookup;
use crate::models::ConditionDefinition;
use crate::RuleError;

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Comparison(ConditionDefinition),
    Call { name: String, args: Vec<Argument> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Literal(Value),
    Field(String),
}

impl Argument {
    pub fn resolve(&self, context: &Map<String, Value>) -> Value {
        match self {
            Self::Literal(value) => value.clone(),
            Self::Field(path) => lookup(context, path).cloned().unwrap_or(Value::Null),
        }
    }
}

pub fn parse(source: &str) -> Result<Expression, RuleError> {
    let text = source.trim();
    let invalid = || RuleError::InvalidExpression(source.to_owned());

    // A call is `identifier(...)`; anything else with a parenthesis, such as a
    // regex group, is a comparison value.
    if let Some((name, rest)) = text
        .split_once('(')
        .filter(|(name, _)| is_identifier(name))
    {
        let inner = rest.strip_suffix(')').ok_or_else(invalid)?;
        let args = if inner.trim().is_empty() {
            Vec::new()
        } else {
            split_arguments(inner)
                .ok_or_else(invalid)?
                .into_iter()
                .map(parse_argument)
                .collect()
        };
        return Ok(Expression::Call {
            name: name.to_owned(),
            args,
        });
    }

    let mut parts = text.splitn(3, char::is_whitespace);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(field), Some(operator), Some(value)) if !field.is_empty() && !operator.is_empty() => {
            Ok(Expression::Comparison(ConditionDefinition::new(
                field,
                operator,
                parse_value(value.trim()),
            )))
        }
        _ => Err(invalid()),
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Split on commas outside quoted literals. `None` on an unterminated quote.
fn split_arguments(inner: &str) -> Option<Vec<&str>> {
    let mut args = Vec::new();
    let mut quote = None;
    let mut start = 0;
    for (i, c) in inner.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, ',') => {
                args.push(&inner[start..i]);
                start = i + 1;
            }
            (None, _) => {}
        }
    }
    if quote.is_some() {
        return None;
    }
    args.push(&inner[start..]);
    Some(args)
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

fn parse_argument(raw: &str) -> Argument {
    let raw = raw.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = raw.strip_prefix(quote).and_then(|r| r.strip_suffix(quote)) {
            return Argument::Literal(Value::String(inner.to_owned()));
        }
    }
    match raw {
        "true" => Argument::Literal(Value::Bool(true)),
        "false" => Argument::Literal(Value::Bool(false)),
        _ => match raw.parse::<f64>() {
            Ok(_) => Argument::Literal(parse_value(raw)),
            Err(_) => Argument::Field(raw.to_owned()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_comparisons() {
        assert_eq!(
            parse("priority eq high").unwrap(),
            Expression::Comparison(ConditionDefinition::new("priority", "eq", json!("high")))
        );
        assert_eq!(
            parse("progress gte 50").unwrap(),
            Expression::Comparison(ConditionDefinition::new("progress", "gte", json!(50)))
        );
        assert_eq!(
            parse(r#"title contains "needs review""#).unwrap(),
            Expression::Comparison(ConditionDefinition::new("title", "contains", json!("needs review")))
        );
    }

    #[test]
    fn parses_calls() {
        assert_eq!(
            parse("exists(assignee)").unwrap(),
            Expression::Call {
                name: "exists".into(),
                args: vec![Argument::Field("assignee".into())],
            }
        );
        let Expression::Call { args, .. } = parse("check('a', 2, true, event.type)").unwrap() else {
            panic!("expected call");
        };
        assert_eq!(
            args,
            vec![
                Argument::Literal(json!("a")),
                Argument::Literal(json!(2)),
                Argument::Literal(json!(true)),
                Argument::Field("event.type".into()),
            ]
        );
    }

    #[test]
    fn parenthesised_values_stay_comparisons() {
        assert_eq!(
            parse("branch matches ^(feature|hotfix)/").unwrap(),
            Expression::Comparison(ConditionDefinition::new(
                "branch",
                "matches",
                json!("^(feature|hotfix)/")
            ))
        );
        assert_eq!(
            parse(r#"title contains "(draft)""#).unwrap(),
            Expression::Comparison(ConditionDefinition::new("title", "contains", json!("(draft)")))
        );
    }

    #[test]
    fn quoted_commas_stay_in_one_argument() {
        assert_eq!(
            parse("has_label('a,b', \"c, d\", labels)").unwrap(),
            Expression::Call {
                name: "has_label".into(),
                args: vec![
                    Argument::Literal(json!("a,b")),
                    Argument::Literal(json!("c, d")),
                    Argument::Field("labels".into()),
                ],
            }
        );
    }

    #[test]
    fn field_arguments_resolve_to_null_when_missing() {
        let ctx = json!({ "assignee": "alice" }).as_object().cloned().unwrap();
        assert_eq!(Argument::Field("assignee".into()).resolve(&ctx), json!("alice"));
        assert_eq!(Argument::Field("reviewer".into()).resolve(&ctx), Value::Null);
    }

    #[test]
    fn rejects_malformed_expressions() {
        for bad in ["", "priority", "priority eq", "exists(assignee", "bad name(x)", "has_label('a,b)"] {
            assert!(
                matches!(parse(bad), Err(RuleError::InvalidExpression(_))),
                "accepted {bad:?}"
            );
        }
    }
}
