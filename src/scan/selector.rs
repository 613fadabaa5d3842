//! Result Selectors
//!
//! Two selector forms are supported:
//!
//! - `Name` – a top-level field lookup; a missing field yields `null`
//! - `.A.B[]` – a dot path. Each segment looks up a field, mapping over
//!   arrays it meets on the way; a trailing `[]` spreads the array found
//!   there. Path results are always collected into an array, mirroring
//!   `jq`'s "all outputs" form.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One step of a dot path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    pub field: String,
    pub spread: bool,
}

/// Extraction applied to a raw API response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ResultSelector {
    Field(String),
    Path(Vec<PathSegment>),
}

impl ResultSelector {
    /// Parse a selector expression
    pub fn parse(expression: &str) -> Result<Self, String> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Err("result selector is empty".to_string());
        }

        let Some(path) = expression.strip_prefix('.') else {
            if expression.chars().any(char::is_whitespace) {
                return Err(format!("invalid field selector '{}'", expression));
            }
            return Ok(ResultSelector::Field(expression.to_string()));
        };

        // "." alone selects the whole response
        if path.is_empty() {
            return Ok(ResultSelector::Path(Vec::new()));
        }

        let mut segments = Vec::new();
        for raw in path.split('.') {
            let (field, spread) = match raw.strip_suffix("[]") {
                Some(field) => (field, true),
                None => (raw, false),
            };
            let valid = !field.is_empty()
                && field
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '_' || c == '-');
            if !valid {
                return Err(format!(
                    "invalid path selector '{}': bad segment '{}'",
                    expression, raw
                ));
            }
            segments.push(PathSegment {
                field: field.to_string(),
                spread,
            });
        }

        Ok(ResultSelector::Path(segments))
    }

    /// Apply the selector to a response
    pub fn apply(&self, value: Value) -> Value {
        match self {
            ResultSelector::Field(name) => match value {
                Value::Object(mut map) => map.remove(name).unwrap_or(Value::Null),
                _ => Value::Null,
            },
            ResultSelector::Path(segments) => {
                let mut current = vec![value];
                for segment in segments {
                    let mut next = Vec::new();
                    for item in current {
                        lookup(item, &segment.field, &mut next);
                    }
                    if segment.spread {
                        next = next
                            .into_iter()
                            .flat_map(|v| match v {
                                Value::Array(items) => items,
                                _ => Vec::new(),
                            })
                            .collect();
                    }
                    current = next;
                }
                Value::Array(current)
            }
        }
    }
}

fn lookup(value: Value, field: &str, out: &mut Vec<Value>) {
    match value {
        Value::Object(mut map) => out.push(map.remove(field).unwrap_or(Value::Null)),
        Value::Array(items) => {
            for item in items {
                lookup(item, field, out);
            }
        }
        _ => {}
    }
}

impl std::fmt::Display for ResultSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultSelector::Field(name) => write!(f, "{}", name),
            ResultSelector::Path(segments) if segments.is_empty() => write!(f, "."),
            ResultSelector::Path(segments) => {
                for segment in segments {
                    write!(f, ".{}", segment.field)?;
                    if segment.spread {
                        write!(f, "[]")?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl TryFrom<String> for ResultSelector {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ResultSelector::parse(&value)
    }
}

impl From<ResultSelector> for String {
    fn from(selector: ResultSelector) -> Self {
        selector.to_string()
    }
}
