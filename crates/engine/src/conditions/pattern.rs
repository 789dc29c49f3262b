use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use regex::Regex;
use serde_json::{Map, Value};

use super::{as_text, lookup, ConditionEvaluator, REGEX};
use crate::{models::ConditionDefinition, RuleError};

pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Compiled patterns keyed by source text; the oldest entry is evicted
/// once `capacity` is reached.
#[derive(Debug)]
struct PatternCache {
    capacity: usize,
    compiled: HashMap<String, Arc<Regex>>,
    order: VecDeque<String>,
}

impl PatternCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            compiled: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn insert(&mut self, pattern: &str, regex: Arc<Regex>) {
        while self.compiled.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.compiled.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(pattern.to_owned());
        self.compiled.insert(pattern.to_owned(), regex);
    }
}

/// `matches` / `regex` and `not_matches` against the text form of a field.
#[derive(Debug)]
pub struct RegexEvaluator {
    cache: Mutex<PatternCache>,
}

impl Default for RegexEvaluator {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }
}

impl RegexEvaluator {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(PatternCache::new(capacity)),
        }
    }

    /// Compile `pattern`, reusing a cached instance when one exists.
    pub fn compile(&self, pattern: &str) -> Result<Arc<Regex>, RuleError> {
        if let Some(hit) = self.cache.lock().compiled.get(pattern) {
            return Ok(Arc::clone(hit));
        }

        let regex = Regex::new(pattern)
            .map(Arc::new)
            .map_err(|e| RuleError::InvalidPattern {
                pattern: pattern.into(),
                reason: e.to_string(),
            })?;

        let mut cache = self.cache.lock();
        // Another caller may have compiled it while we were unlocked.
        if let Some(hit) = cache.compiled.get(pattern) {
            return Ok(Arc::clone(hit));
        }
        cache.insert(pattern, Arc::clone(&regex));
        Ok(regex)
    }

    pub fn cached_patterns(&self) -> usize {
        self.cache.lock().compiled.len()
    }
}

impl ConditionEvaluator for RegexEvaluator {
    fn condition_type(&self) -> &str {
        REGEX
    }

    fn evaluate(
        &self,
        condition: &ConditionDefinition,
        context: &Map<String, Value>,
    ) -> Result<bool, RuleError> {
        let negate = match condition.operator.as_str() {
            "matches" | "regex" => false,
            "not_matches" => true,
            other => {
                return Err(RuleError::UnknownOperator {
                    evaluator: REGEX.into(),
                    operator: other.into(),
                })
            }
        };

        let regex = self.compile(&as_text(&condition.value))?;
        let subject = lookup(context, &condition.field).map(as_text).unwrap_or_default();
        Ok(regex.is_match(&subject) != negate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Map<String, Value> {
        json!({ "branch": "feature/JIRA-123-login" }).as_object().cloned().unwrap()
    }

    #[test]
    fn matches_and_not_matches() {
        let evaluator = RegexEvaluator::default();
        let hit = ConditionDefinition::new("branch", "matches", json!(r"^feature/[A-Z]+-\d+"));
        let miss = ConditionDefinition::new("branch", "not_matches", json!("^hotfix/"));
        assert_eq!(evaluator.evaluate(&hit, &ctx()), Ok(true));
        assert_eq!(evaluator.evaluate(&miss, &ctx()), Ok(true));
    }

    #[test]
    fn compiled_patterns_are_reused() {
        let evaluator = RegexEvaluator::default();
        let first = evaluator.compile(r"\d+").unwrap();
        let second = evaluator.compile(r"\d+").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(evaluator.cached_patterns(), 1);
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let evaluator = RegexEvaluator::default();
        let condition = ConditionDefinition::new("branch", "regex", json!("(unclosed"));
        assert!(matches!(
            evaluator.evaluate(&condition, &ctx()),
            Err(RuleError::InvalidPattern { pattern, .. }) if pattern == "(unclosed"
        ));
        assert_eq!(evaluator.cached_patterns(), 0);
    }

    #[test]
    fn cache_evicts_oldest_pattern() {
        let evaluator = RegexEvaluator::with_capacity(2);
        let a = evaluator.compile("a").unwrap();
        evaluator.compile("b").unwrap();
        evaluator.compile("c").unwrap();
        assert_eq!(evaluator.cached_patterns(), 2);

        // "a" was evicted, so it is compiled afresh.
        let again = evaluator.compile("a").unwrap();
        assert!(!Arc::ptr_eq(&a, &again));
    }
}
