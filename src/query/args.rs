//! Typed access to stage arguments
//!
//! Stage constructors read the fields they know through an [`ArgReader`].
//! Every key that is read, present or not, is remembered; whatever is left
//! in the argument map afterwards is reported by [`ArgReader::unknown`] and
//! turned into a warning instead of an error.

use crate::query::error::BuildError;
use crate::types::parse_period;
use chrono::Duration;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Reader over one stage's argument map
#[derive(Debug)]
pub struct ArgReader<'a> {
    args: &'a BTreeMap<String, Value>,
    known: BTreeSet<&'static str>,
}

impl<'a> ArgReader<'a> {
    /// Wrap an argument map
    pub fn new(args: &'a BTreeMap<String, Value>) -> Self {
        Self {
            args,
            known: BTreeSet::new(),
        }
    }

    /// Raw value of a known field
    pub fn raw(&mut self, field: &'static str) -> Option<&'a Value> {
        self.known.insert(field);
        self.args.get(field)
    }

    /// Required number
    pub fn required_f64(&mut self, field: &'static str) -> Result<f64, BuildError> {
        self.optional_f64(field)?
            .ok_or_else(|| BuildError::missing_argument(field))
    }

    /// Optional number; numeric strings are accepted
    pub fn optional_f64(&mut self, field: &'static str) -> Result<Option<f64>, BuildError> {
        match self.raw(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_f64()
                .map(Some)
                .ok_or_else(|| BuildError::invalid_argument(field, "must be a finite number")),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| BuildError::invalid_argument(field, format!("'{}' is not a number", s))),
            Some(other) => Err(BuildError::invalid_argument(
                field,
                format!("must be a number, got {}", other),
            )),
        }
    }

    /// Required string
    pub fn required_str(&mut self, field: &'static str) -> Result<&'a str, BuildError> {
        self.optional_str(field)?
            .ok_or_else(|| BuildError::missing_argument(field))
    }

    /// Optional string
    pub fn optional_str(&mut self, field: &'static str) -> Result<Option<&'a str>, BuildError> {
        match self.raw(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(BuildError::invalid_argument(
                field,
                format!("must be a string, got {}", other),
            )),
        }
    }

    /// Optional non-negative integer
    pub fn optional_usize(&mut self, field: &'static str) -> Result<Option<usize>, BuildError> {
        match self.raw(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => match n.as_u64() {
                Some(v) => usize::try_from(v)
                    .map(Some)
                    .map_err(|_| BuildError::invalid_argument(field, "out of range")),
                None => Err(BuildError::invalid_argument(
                    field,
                    "must be a non-negative integer",
                )),
            },
            Some(Value::String(s)) => s.trim().parse::<usize>().map(Some).map_err(|_| {
                BuildError::invalid_argument(field, format!("'{}' is not a non-negative integer", s))
            }),
            Some(other) => Err(BuildError::invalid_argument(
                field,
                format!("must be an integer, got {}", other),
            )),
        }
    }

    /// Optional boolean; `"true"` / `"false"` strings are accepted
    pub fn optional_bool(&mut self, field: &'static str) -> Result<Option<bool>, BuildError> {
        match self.raw(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Some(true)),
                "false" => Ok(Some(false)),
                _ => Err(BuildError::invalid_argument(
                    field,
                    format!("'{}' is not a boolean", s),
                )),
            },
            Some(other) => Err(BuildError::invalid_argument(
                field,
                format!("must be a boolean, got {}", other),
            )),
        }
    }

    /// Optional non-negative period
    pub fn optional_period(&mut self, field: &'static str) -> Result<Option<Duration>, BuildError> {
        match self.raw(field) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => parse_period(value)
                .map(Some)
                .map_err(|reason| BuildError::invalid_argument(field, reason)),
        }
    }

    /// Optional string list; a single string is a one-element list
    pub fn optional_string_list(&mut self, field: &'static str) -> Result<Vec<String>, BuildError> {
        match self.raw(field) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(value) => string_list(value)
                .ok_or_else(|| BuildError::invalid_argument(field, "must be a string or a list of strings")),
        }
    }

    /// Optional tag multimap: `{"host": "a"}` or `{"host": ["a", "b"]}`
    pub fn optional_tag_filter(
        &mut self,
        field: &'static str,
    ) -> Result<BTreeMap<String, Vec<String>>, BuildError> {
        let map = match self.raw(field) {
            None | Some(Value::Null) => return Ok(BTreeMap::new()),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(BuildError::invalid_argument(
                    field,
                    format!("must be a map of tag values, got {}", other),
                ))
            }
        };

        let mut tags = BTreeMap::new();
        for (key, value) in map {
            let values = string_list(value).ok_or_else(|| {
                BuildError::invalid_argument(
                    field,
                    format!("tag '{}' must be a string or a list of strings", key),
                )
            })?;
            if values.is_empty() {
                return Err(BuildError::invalid_argument(
                    field,
                    format!("tag '{}' has no values", key),
                ));
            }
            tags.insert(key.clone(), values);
        }
        Ok(tags)
    }

    /// Argument keys that no accessor asked for
    pub fn unknown(&self) -> Vec<String> {
        self.args
            .keys()
            .filter(|key| !self.known.contains(key.as_str()))
            .cloned()
            .collect()
    }
}

fn string_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => None,
    }
}
