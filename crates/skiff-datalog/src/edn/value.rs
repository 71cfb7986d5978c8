//! The wire value model.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};

/// A symbolic keyword atom such as `:git.commit/sha`.
///
/// Stored without the leading colon.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Keyword(String);

impl Keyword {
    /// Create a keyword, stripping one leading `:` if present.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        match name.strip_prefix(':') {
            Some(stripped) => Self(stripped.to_string()),
            None => Self(name),
        }
    }

    /// Full name without the colon, e.g. `git.commit/sha`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Namespace part, e.g. `git.commit`.
    pub fn namespace(&self) -> Option<&str> {
        self.0.split_once('/').map(|(ns, _)| ns)
    }

    /// Local part, e.g. `sha`.
    pub fn name(&self) -> &str {
        self.0.split_once('/').map(|(_, n)| n).unwrap_or(&self.0)
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.0)
    }
}

/// A plain record: ordered fields whose keys become keyword atoms.
///
/// A field holding `None` is undefined and is omitted when encoded, unlike
/// an explicit [`Value::Nil`] which is written as `nil`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Option<Value>)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, replacing an existing one with the same key in place.
    pub fn insert(&mut self, key: impl Into<String>, value: Option<Value>) {
        let key = key.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    /// Builder form of [`Record::insert`] for a defined value.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, Some(value.into()));
        self
    }

    /// Builder form for an optional value; `None` leaves the field undefined.
    pub fn maybe(mut self, key: impl Into<String>, value: Option<impl Into<Value>>) -> Self {
        self.insert(key, value.map(Into::into));
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.as_ref())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.iter().any(|(k, _)| k == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&Value>)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    /// Keys whose value is undefined.
    pub fn undefined_keys(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| k.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Any value that can be written in the wire format.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Integer(i64),
    Float(f64),
    /// Arbitrary-precision integer digits, written with an `N` suffix.
    BigInt(String),
    String(String),
    Instant(DateTime<Utc>),
    Keyword(Keyword),
    Symbol(String),
    /// Pre-escaped fragment written verbatim.
    Raw(String),
    Vector(Vec<Value>),
    List(Vec<Value>),
    Set(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Record(Record),
}

impl Value {
    /// Shorthand for a keyword value.
    pub fn keyword(name: impl Into<String>) -> Self {
        Self::Keyword(Keyword::new(name))
    }

    /// Shorthand for a raw fragment.
    pub fn raw(text: impl Into<String>) -> Self {
        Self::Raw(text.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Elements of a vector, list or set.
    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Self::Vector(items) | Self::List(items) | Self::Set(items) => Some(items),
            _ => None,
        }
    }

    /// Look up a map entry by keyword or string key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Map(entries) => entries
                .iter()
                .find(|(k, _)| k.key_text().as_deref() == Some(key))
                .map(|(_, v)| v),
            Self::Record(record) => record.get(key),
            _ => None,
        }
    }

    /// Text of a value used as a map key: keyword name, string, or symbol.
    pub fn key_text(&self) -> Option<String> {
        match self {
            Self::Keyword(k) => Some(k.as_str().to_string()),
            Self::String(s) | Self::Symbol(s) => Some(s.clone()),
            Self::Integer(i) => Some(i.to_string()),
            _ => None,
        }
    }

    /// Wrap a scalar into a one-element sequence; flatten sequences; map
    /// `nil` to an empty list.
    pub fn into_seq(self) -> Vec<Value> {
        match self {
            Self::Vector(items) | Self::List(items) | Self::Set(items) => items,
            Self::Nil => Vec::new(),
            other => vec![other],
        }
    }

    /// Convert into JSON for handler consumption.
    ///
    /// Keywords and symbols become their bare names, instants become
    /// RFC 3339 strings and non-finite floats become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Self::Nil => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Integer(i) => Json::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Self::BigInt(digits) => digits
                .parse::<i64>()
                .map(Json::from)
                .unwrap_or_else(|_| Json::String(digits.clone())),
            Self::String(s) | Self::Symbol(s) | Self::Raw(s) => Json::String(s.clone()),
            Self::Instant(at) => Json::String(at.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Self::Keyword(k) => Json::String(k.as_str().to_string()),
            Self::Vector(items) | Self::List(items) | Self::Set(items) => {
                Json::Array(items.iter().map(Value::to_json).collect())
            }
            Self::Map(entries) => {
                let mut map = serde_json::Map::new();
                for (k, v) in entries {
                    let key = k
                        .key_text()
                        .unwrap_or_else(|| super::write::encode(k).unwrap_or_default());
                    map.insert(key, v.to_json());
                }
                Json::Object(map)
            }
            Self::Record(record) => {
                let mut map = serde_json::Map::new();
                for (k, v) in record.iter() {
                    if let Some(v) = v {
                        map.insert(k.to_string(), v.to_json());
                    }
                }
                Json::Object(map)
            }
        }
    }

    /// Convert JSON into a value: objects become maps with keyword keys,
    /// arrays become vectors.
    pub fn from_json(json: &serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Self::Nil,
            Json::Bool(b) => Self::Bool(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => match n.as_u64() {
                    Some(u) => Self::BigInt(u.to_string()),
                    None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
                },
            },
            Json::String(s) => Self::String(s.clone()),
            Json::Array(items) => Self::Vector(items.iter().map(Value::from_json).collect()),
            Json::Object(map) => Self::Map(
                map.iter()
                    .map(|(k, v)| (Value::keyword(k.as_str()), Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Conversions
// ─────────────────────────────────────────────────────────────────────────────

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Self::String(s.clone())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<u64> for Value {
    fn from(i: u64) -> Self {
        match i64::try_from(i) {
            Ok(i) => Self::Integer(i),
            Err(_) => Self::BigInt(i.to_string()),
        }
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(at: DateTime<Utc>) -> Self {
        Self::Instant(at)
    }
}

impl From<Keyword> for Value {
    fn from(k: Keyword) -> Self {
        Self::Keyword(k)
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Self::Record(r)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::Vector(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Nil)
    }
}
