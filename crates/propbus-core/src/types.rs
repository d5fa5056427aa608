/*!
 * Core data types for propbus.
 *
 * This module defines the value tree carried by every property and action
 * payload, the identifier type, and the segmented path used to address
 * devices inside a hub tree.
 */
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// A unique identifier for propbus resources
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Id(String);

impl Id {
    /// Create a new ID with a random UUID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create an ID from a string
    pub fn from_string<S: AsRef<str>>(s: S) -> Self {
        Self(s.as_ref().to_string())
    }

    /// Get the string representation of the ID
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Self::from_string(s)
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Self::from_string(s)
    }
}

/// The structured value tree used to carry property and action payloads.
///
/// Values are structurally comparable, cheaply cloneable and serializable;
/// typed access always goes through a converter, never through the tree
/// itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Integer(i64),
    /// Floating-point value
    Float(f64),
    /// String value
    String(String),
    /// Array of values
    Array(Vec<Value>),
    /// Map of string keys to values
    Object(HashMap<String, Value>),
    /// Binary data
    Binary(Vec<u8>),
    /// Timestamp
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// An empty object value
    pub fn empty() -> Self {
        Value::Object(HashMap::new())
    }

    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if the value is numeric (integer or float)
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Float(_))
    }

    /// Try to get a boolean value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get an integer value
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Float(f) if *f == (*f as i64) as f64 => Some(*f as i64),
            _ => None,
        }
    }

    /// Try to get a float value
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get an array value
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Try to get an object value
    pub fn as_object(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Try to get binary data
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Value::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Try to get a timestamp value
    pub fn as_timestamp(&self) -> Option<&DateTime<Utc>> {
        match self {
            Value::Timestamp(t) => Some(t),
            _ => None,
        }
    }

    /// Look up a child of an object value by key
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(o) => o.get(key),
            _ => None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Value::Float(f as f64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Binary(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Value::Timestamp(t)
    }
}

impl From<Vec<Value>> for Value {
    fn from(a: Vec<Value>) -> Self {
        Value::Array(a)
    }
}

impl From<HashMap<String, Value>> for Value {
    fn from(o: HashMap<String, Value>) -> Self {
        Value::Object(o)
    }
}

/// The separator between path segments in the string form
pub const PATH_SEPARATOR: char = '/';

/// A segmented address of a device inside a hub tree.
///
/// The empty path addresses the hub itself. Each segment addresses one
/// child level; the string form is `a/b/c`. Segments must be non-empty and
/// may not contain the separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct DevicePath(Vec<String>);

impl DevicePath {
    /// The empty path
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Build a path from segments
    pub fn from_segments<I, S>(segments: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = Vec::new();
        for segment in segments {
            let segment = segment.as_ref();
            if segment.is_empty() || segment.contains(PATH_SEPARATOR) {
                return Err(Error::path(format!("Invalid path segment: {:?}", segment)));
            }
            out.push(segment.to_string());
        }
        Ok(Self(out))
    }

    /// Parse a path from its `a/b/c` string form; an empty string is the empty path
    pub fn parse<S: AsRef<str>>(s: S) -> Result<Self, Error> {
        let s = s.as_ref();
        if s.is_empty() {
            return Ok(Self::empty());
        }
        Self::from_segments(s.split(PATH_SEPARATOR))
    }

    /// Check whether the path is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// The path segments
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// The first segment, if any
    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// The path without its first segment
    pub fn rest(&self) -> DevicePath {
        DevicePath(self.0.iter().skip(1).cloned().collect())
    }

    /// A new path with `segment` appended
    pub fn child<S: AsRef<str>>(&self, segment: S) -> Result<DevicePath, Error> {
        let mut out = self.clone();
        let segment = segment.as_ref();
        if segment.is_empty() || segment.contains(PATH_SEPARATOR) {
            return Err(Error::path(format!("Invalid path segment: {:?}", segment)));
        }
        out.0.push(segment.to_string());
        Ok(out)
    }

    /// A new path with `prefix` prepended, used when re-addressing messages
    /// across a hub boundary
    pub fn prefixed_with<S: AsRef<str>>(&self, prefix: S) -> DevicePath {
        let mut segments = vec![prefix.as_ref().to_string()];
        segments.extend(self.0.iter().cloned());
        DevicePath(segments)
    }
}

impl fmt::Display for DevicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

impl FromStr for DevicePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<DevicePath> for String {
    fn from(path: DevicePath) -> Self {
        path.to_string()
    }
}

impl TryFrom<String> for DevicePath {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

/// A key-value map of metadata
pub type Metadata = HashMap<String, Value>;
