//! Flat filter DSL passed opaquely to repository adapters.
//!
//! # Responsibility
//! - Collect property constraints for one query.
//! - Carry LIKE-style pattern constraints in a recognizable marker shape.
//!
//! # Invariants
//! - Constraints on different properties are AND-combined.
//! - A later constraint on the same property replaces the earlier one.
//! - Serialized form is `{"prop": value}` for exact matches and
//!   `{"prop": {"$pattern": "..."}}` for pattern matches.

use regex::Regex;
use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Marker key adapters recognize to switch to pattern matching.
pub const PATTERN_KEY: &str = "$pattern";

pub(crate) const PATTERN_WILDCARD: char = '%';

/// One property constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// Property must equal the value.
    Exact(Value),
    /// Property must be a string matching the LIKE pattern.
    Pattern(String),
}

impl FilterValue {
    fn from_json(value: Value) -> Self {
        if let Value::Object(map) = &value {
            if map.len() == 1 {
                if let Some(Value::String(pattern)) = map.get(PATTERN_KEY) {
                    return Self::Pattern(pattern.clone());
                }
            }
        }
        Self::Exact(value)
    }

    /// JSON form of this constraint.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Exact(value) => value.clone(),
            Self::Pattern(pattern) => {
                let mut marker = Map::new();
                marker.insert(PATTERN_KEY.to_string(), Value::String(pattern.clone()));
                Value::Object(marker)
            }
        }
    }
}

impl Serialize for FilterValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Exact(value) => value.serialize(serializer),
            Self::Pattern(pattern) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(PATTERN_KEY, pattern)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for FilterValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from_json)
    }
}

/// Property → constraint map built per query.
///
/// Not validated against any schema. Safe to share for reading once built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter {
    conditions: BTreeMap<String, FilterValue>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an exact-match constraint.
    pub fn match_value(mut self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions
            .insert(property.into(), FilterValue::Exact(value.into()));
        self
    }

    /// Alias of [`Filter::match_value`].
    pub fn set(self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.match_value(property, value)
    }

    /// Adds a LIKE-style pattern constraint.
    ///
    /// `%a` matches values ending in `a`, `a%` values starting with `a`,
    /// `%ab%` values containing `ab`, and `ab` only `ab` itself.
    pub fn match_pattern(mut self, property: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.conditions
            .insert(property.into(), FilterValue::Pattern(pattern.into()));
        self
    }

    pub fn get(&self, property: &str) -> Option<&FilterValue> {
        self.conditions.get(property)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FilterValue)> {
        self.conditions
            .iter()
            .map(|(property, value)| (property.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// JSON object form of the whole filter.
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.conditions
                .iter()
                .map(|(property, value)| (property.clone(), value.to_json()))
                .collect(),
        )
    }

    /// Compiles pattern constraints for in-process evaluation.
    pub fn compile(&self) -> Result<CompiledFilter, regex::Error> {
        let conditions = self
            .conditions
            .iter()
            .map(|(property, value)| {
                let condition = match value {
                    FilterValue::Exact(expected) => Condition::Exact(expected.clone()),
                    FilterValue::Pattern(pattern) => Condition::Like(LikePattern::new(pattern)?),
                };
                Ok((property.clone(), condition))
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;

        Ok(CompiledFilter { conditions })
    }
}

#[derive(Debug, Clone)]
enum Condition {
    Exact(Value),
    Like(LikePattern),
}

/// Filter ready to evaluate against JSON records.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    conditions: Vec<(String, Condition)>,
}

impl CompiledFilter {
    /// Returns whether every constraint holds for `record`.
    ///
    /// A missing property compares equal to `null`; pattern constraints only
    /// match string values.
    pub fn matches(&self, record: &Map<String, Value>) -> bool {
        self.conditions.iter().all(|(property, condition)| {
            let actual = record.get(property).unwrap_or(&Value::Null);
            match condition {
                Condition::Exact(expected) => actual == expected,
                Condition::Like(pattern) => actual
                    .as_str()
                    .map(|text| pattern.is_match(text))
                    .unwrap_or(false),
            }
        })
    }
}

/// LIKE pattern compiled to an anchored regular expression.
#[derive(Debug, Clone)]
pub struct LikePattern {
    source: String,
    regex: Regex,
}

impl LikePattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let body = pattern
            .split(PATTERN_WILDCARD)
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = Regex::new(&format!("(?s)^{body}$"))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::{Filter, FilterValue, LikePattern};
    use serde_json::json;

    #[test]
    fn like_pattern_suffix_prefix_contains_and_exact() {
        let suffix = LikePattern::new("%a").unwrap();
        assert!(suffix.is_match("ba"));
        assert!(suffix.is_match("tada"));
        assert!(!suffix.is_match("ab"));

        let prefix = LikePattern::new("a%").unwrap();
        assert!(prefix.is_match("ab"));
        assert!(!prefix.is_match("ba"));

        let contains = LikePattern::new("%ab%").unwrap();
        assert!(contains.is_match("xxabyy"));
        assert!(contains.is_match("ab"));
        assert!(!contains.is_match("a-b"));

        let exact = LikePattern::new("ab").unwrap();
        assert!(exact.is_match("ab"));
        assert!(!exact.is_match("abc"));
    }

    #[test]
    fn like_pattern_treats_regex_metacharacters_literally() {
        let pattern = LikePattern::new("a.c%").unwrap();
        assert!(pattern.is_match("a.cdef"));
        assert!(!pattern.is_match("abcdef"));
    }

    #[test]
    fn later_constraint_replaces_earlier_one() {
        let filter = Filter::new().match_value("a", 1).match_pattern("a", "x%");
        assert_eq!(filter.len(), 1);
        assert_eq!(filter.get("a"), Some(&FilterValue::Pattern("x%".to_string())));
    }

    #[test]
    fn deserializes_pattern_marker() {
        let filter: Filter =
            serde_json::from_value(json!({"name": {"$pattern": "Jo%"}, "age": 3})).unwrap();
        assert_eq!(
            filter.get("name"),
            Some(&FilterValue::Pattern("Jo%".to_string()))
        );
        assert_eq!(filter.get("age"), Some(&FilterValue::Exact(json!(3))));
    }

    #[test]
    fn compiled_filter_matches_records() {
        let filter = Filter::new()
            .match_value("role", "user")
            .match_pattern("name", "John%")
            .compile()
            .unwrap();

        let hit = json!({"role": "user", "name": "Johnny"});
        let wrong_role = json!({"role": "admin", "name": "Johnny"});
        let not_string = json!({"role": "user", "name": 7});

        assert!(filter.matches(hit.as_object().unwrap()));
        assert!(!filter.matches(wrong_role.as_object().unwrap()));
        assert!(!filter.matches(not_string.as_object().unwrap()));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = Filter::new().compile().unwrap();
        assert!(filter.matches(json!({"any": 1}).as_object().unwrap()));
    }
}
