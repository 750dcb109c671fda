//! Query-string encoder.
//!
//! CouchDB expects query values to be JSON-encoded before percent-encoding
//! (`?startkey=%22_design%2F%22`, never `?startkey=_design/`). A query is
//! either a raw string appended verbatim or an insertion-ordered map of
//! key→value pairs; list values emit one pair per element and absent values
//! are skipped entirely.

use indexmap::IndexMap;
use serde_json::Value;

#[derive(Debug, Clone)]
pub enum Query {
    /// Appended after `?`/`&` exactly as given.
    Raw(String),
    /// Encoded pairs, iterated in insertion order.
    Pairs(IndexMap<String, QueryValue>),
}

#[derive(Debug, Clone)]
pub enum QueryValue {
    /// Skipped during encoding; distinguishes "not provided" from `null`.
    Absent,
    Single(Value),
    /// One `key=value` pair per element.
    Many(Vec<Value>),
}

impl Query {
    #[must_use]
    pub fn pairs() -> Self {
        Self::Pairs(IndexMap::new())
    }

    /// Add a pair, preserving insertion order
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        match &mut self {
            Self::Pairs(map) => {
                map.insert(key.into(), value.into());
            }
            Self::Raw(_) => {}
        }
        self
    }

    /// Render this query onto `url`, choosing `?` or `&` by whether the
    /// URL already carries a query string.
    pub fn append_to(&self, url: &mut String) {
        let rendered = match self {
            Self::Raw(raw) => raw.clone(),
            Self::Pairs(map) => {
                let mut pairs: Vec<String> = Vec::with_capacity(map.len());
                for (key, value) in map {
                    match value {
                        QueryValue::Absent => {}
                        QueryValue::Single(v) => pairs.push(encode_pair(key, v)),
                        QueryValue::Many(items) => {
                            pairs.extend(items.iter().map(|v| encode_pair(key, v)));
                        }
                    }
                }
                pairs.join("&")
            }
        };

        if rendered.is_empty() {
            return;
        }
        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str(&rendered);
    }
}

fn encode_pair(key: &str, value: &Value) -> String {
    let json =
        serde_json::to_string(value).expect("serializing serde_json::Value should never fail");
    format!("{}={}", urlencoding::encode(key), urlencoding::encode(&json))
}

impl From<String> for Query {
    fn from(raw: String) -> Self {
        Self::Raw(raw)
    }
}

impl From<&str> for Query {
    fn from(raw: &str) -> Self {
        Self::Raw(raw.to_string())
    }
}

impl From<IndexMap<String, QueryValue>> for Query {
    fn from(map: IndexMap<String, QueryValue>) -> Self {
        Self::Pairs(map)
    }
}

impl From<Value> for QueryValue {
    fn from(value: Value) -> Self {
        Self::Single(value)
    }
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        Self::Single(Value::String(value.to_string()))
    }
}

impl From<i64> for QueryValue {
    fn from(value: i64) -> Self {
        Self::Single(Value::from(value))
    }
}

impl From<bool> for QueryValue {
    fn from(value: bool) -> Self {
        Self::Single(Value::Bool(value))
    }
}

impl From<Vec<Value>> for QueryValue {
    fn from(items: Vec<Value>) -> Self {
        Self::Many(items)
    }
}

impl<T: Into<Self>> From<Option<T>> for QueryValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Absent, Into::into)
    }
}
