/*!
 * Converters between domain types and the value tree.
 *
 * Every typed property or action payload crosses the value-tree boundary
 * through a [`ValueConverter`]. The converter also carries a [`ValueSchema`]
 * describing the shape it produces, which ends up in property descriptors.
 */
use std::collections::HashMap;
use std::marker::PhantomData;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Value;

/// The type hint for a value-tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// Boolean
    Bool,
    /// Integer
    Integer,
    /// Floating-point number
    Float,
    /// String
    String,
    /// Binary data
    Binary,
    /// Array of values
    Array,
    /// Keyed object
    Object,
    /// Timestamp
    Timestamp,
}

/// Schema of a value-tree shape: a type hint plus named children
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueSchema {
    /// The expected kind of the node, if constrained
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ValueKind>,
    /// Schemas of known children, keyed by name
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub children: HashMap<String, ValueSchema>,
}

impl ValueSchema {
    /// A schema constraining only the node kind
    pub fn of_kind(kind: ValueKind) -> Self {
        Self {
            kind: Some(kind),
            children: HashMap::new(),
        }
    }

    /// Add a named child schema
    pub fn with_child<S: Into<String>>(mut self, name: S, schema: ValueSchema) -> Self {
        self.children.insert(name.into(), schema);
        self
    }
}

/// Bidirectional mapping between a domain type and the value tree
pub trait ValueConverter<T>: Send + Sync {
    /// Convert a domain value into a value tree
    fn to_value(&self, value: &T) -> Result<Value>;

    /// Read a domain value back out of a value tree
    fn from_value(&self, value: &Value) -> Result<T>;

    /// Schema of the produced value tree
    fn schema(&self) -> ValueSchema {
        ValueSchema::default()
    }
}

/// Converter for booleans
#[derive(Debug, Clone, Copy, Default)]
pub struct BoolConverter;

impl ValueConverter<bool> for BoolConverter {
    fn to_value(&self, value: &bool) -> Result<Value> {
        Ok(Value::Bool(*value))
    }

    fn from_value(&self, value: &Value) -> Result<bool> {
        value
            .as_bool()
            .ok_or_else(|| Error::conversion(format!("Expected a boolean, got {:?}", value)))
    }

    fn schema(&self) -> ValueSchema {
        ValueSchema::of_kind(ValueKind::Bool)
    }
}

/// Converter for 64-bit integers
#[derive(Debug, Clone, Copy, Default)]
pub struct IntConverter;

impl ValueConverter<i64> for IntConverter {
    fn to_value(&self, value: &i64) -> Result<Value> {
        Ok(Value::Integer(*value))
    }

    fn from_value(&self, value: &Value) -> Result<i64> {
        value
            .as_integer()
            .ok_or_else(|| Error::conversion(format!("Expected an integer, got {:?}", value)))
    }

    fn schema(&self) -> ValueSchema {
        ValueSchema::of_kind(ValueKind::Integer)
    }
}

/// Converter for 64-bit floats; integers widen on read
#[derive(Debug, Clone, Copy, Default)]
pub struct FloatConverter;

impl ValueConverter<f64> for FloatConverter {
    fn to_value(&self, value: &f64) -> Result<Value> {
        Ok(Value::Float(*value))
    }

    fn from_value(&self, value: &Value) -> Result<f64> {
        value
            .as_float()
            .ok_or_else(|| Error::conversion(format!("Expected a number, got {:?}", value)))
    }

    fn schema(&self) -> ValueSchema {
        ValueSchema::of_kind(ValueKind::Float)
    }
}

/// Converter for strings
#[derive(Debug, Clone, Copy, Default)]
pub struct StringConverter;

impl ValueConverter<String> for StringConverter {
    fn to_value(&self, value: &String) -> Result<Value> {
        Ok(Value::String(value.clone()))
    }

    fn from_value(&self, value: &Value) -> Result<String> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::conversion(format!("Expected a string, got {:?}", value)))
    }

    fn schema(&self) -> ValueSchema {
        ValueSchema::of_kind(ValueKind::String)
    }
}

/// Converter for durations, carried as fractional seconds
#[derive(Debug, Clone, Copy, Default)]
pub struct DurationConverter;

impl ValueConverter<Duration> for DurationConverter {
    fn to_value(&self, value: &Duration) -> Result<Value> {
        Ok(Value::Float(value.as_secs_f64()))
    }

    fn from_value(&self, value: &Value) -> Result<Duration> {
        let seconds = value
            .as_float()
            .ok_or_else(|| Error::conversion(format!("Expected seconds, got {:?}", value)))?;
        if seconds < 0.0 {
            return Err(Error::conversion(format!("Negative duration: {}", seconds)));
        }
        Ok(Duration::from_secs_f64(seconds))
    }

    fn schema(&self) -> ValueSchema {
        ValueSchema::of_kind(ValueKind::Float)
    }
}

/// Converter for the unit type, used by actions without input or output
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitConverter;

impl ValueConverter<()> for UnitConverter {
    fn to_value(&self, _value: &()) -> Result<Value> {
        Ok(Value::empty())
    }

    fn from_value(&self, _value: &Value) -> Result<()> {
        Ok(())
    }
}

/// Identity converter passing value trees through untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct RawConverter;

impl ValueConverter<Value> for RawConverter {
    fn to_value(&self, value: &Value) -> Result<Value> {
        Ok(value.clone())
    }

    fn from_value(&self, value: &Value) -> Result<Value> {
        Ok(value.clone())
    }
}

/// Converter bridging any serde-serializable type through `serde_json`
#[derive(Debug, Clone, Copy)]
pub struct SerdeConverter<T>(PhantomData<fn() -> T>);

impl<T> SerdeConverter<T> {
    /// Create a new serde bridge converter
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for SerdeConverter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ValueConverter<T> for SerdeConverter<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn to_value(&self, value: &T) -> Result<Value> {
        let json = serde_json::to_value(value)?;
        serde_json::from_value(json).map_err(Error::from)
    }

    fn from_value(&self, value: &Value) -> Result<T> {
        let json = serde_json::to_value(value)?;
        serde_json::from_value(json).map_err(Error::from)
    }

    fn schema(&self) -> ValueSchema {
        ValueSchema::of_kind(ValueKind::Object)
    }
}
