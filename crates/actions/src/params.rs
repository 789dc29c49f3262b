//! Typed parameter extraction shared by the built-in executors.

use serde_json::{Map, Value};

use crate::ActionError;

/// Borrowed view over an action's parameters that produces descriptive
/// errors naming the owning action.
pub struct Params<'a> {
    action: &'a str,
    values: &'a Map<String, Value>,
}

impl<'a> Params<'a> {
    pub fn new(action: &'a str, values: &'a Map<String, Value>) -> Self {
        Self { action, values }
    }

    /// A non-empty string parameter.
    ///
    /// Numbers and booleans are accepted and rendered as strings.
    pub fn required_str(&self, key: &str) -> Result<String, ActionError> {
        match self.optional_str(key)? {
            Some(value) => Ok(value),
            None => Err(self.missing(key)),
        }
    }

    /// A string parameter that may be absent; empty strings count as absent.
    pub fn optional_str(&self, key: &str) -> Result<Option<String>, ActionError> {
        let rendered = match self.values.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.trim().to_owned()),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::Bool(b)) => Some(b.to_string()),
            Some(_) => return Err(self.invalid(key, "expected a string")),
        };
        Ok(rendered.filter(|s| !s.is_empty()))
    }

    pub fn str_or(&self, key: &str, default: &str) -> Result<String, ActionError> {
        Ok(self.optional_str(key)?.unwrap_or_else(|| default.to_owned()))
    }

    /// A list of strings; a single string is treated as a one-element list
    /// and a comma-separated string is split.
    pub fn string_list(&self, key: &str) -> Result<Vec<String>, ActionError> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::String(s)) => Ok(s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    _ => Err(self.invalid(key, "expected a list of strings")),
                })
                .collect(),
            Some(_) => Err(self.invalid(key, "expected a list of strings")),
        }
    }

    /// Like [`Params::string_list`] but fails when the list is empty.
    pub fn required_list(&self, key: &str) -> Result<Vec<String>, ActionError> {
        let list = self.string_list(key)?;
        if list.is_empty() {
            return Err(self.missing(key));
        }
        Ok(list)
    }

    pub fn optional_f64(&self, key: &str) -> Result<Option<f64>, ActionError> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| self.invalid(key, "expected a number")),
            Some(_) => Err(self.invalid(key, "expected a number")),
        }
    }

    /// Raw value passthrough.
    pub fn value(&self, key: &str) -> Option<&'a Value> {
        self.values.get(key)
    }

    fn missing(&self, key: &str) -> ActionError {
        ActionError::MissingParameter {
            action: self.action.to_owned(),
            parameter: key.to_owned(),
        }
    }

    fn invalid(&self, key: &str, reason: &str) -> ActionError {
        ActionError::InvalidParameter {
            action: self.action.to_owned(),
            parameter: key.to_owned(),
            reason: reason.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn empty_string_counts_as_missing() {
        let values = map(json!({ "title": "   " }));
        let params = Params::new("task", &values);
        assert_eq!(
            params.required_str("title"),
            Err(ActionError::MissingParameter {
                action: "task".into(),
                parameter: "title".into()
            })
        );
    }

    #[test]
    fn comma_separated_string_becomes_list() {
        let values = map(json!({ "to": "a@x.io, b@x.io" }));
        let params = Params::new("email", &values);
        assert_eq!(params.required_list("to").unwrap(), vec!["a@x.io", "b@x.io"]);
    }

    #[test]
    fn object_where_string_expected_is_invalid() {
        let values = map(json!({ "title": { "nested": true } }));
        let params = Params::new("task", &values);
        assert!(matches!(
            params.required_str("title"),
            Err(ActionError::InvalidParameter { .. })
        ));
    }
}
