/*!
 * Prelude module re-exporting the most commonly used propbus core types.
 */
pub use crate::config::{Config, SharedConfig};
pub use crate::convert::{
    BoolConverter, DurationConverter, FloatConverter, IntConverter, RawConverter, SerdeConverter,
    StringConverter, UnitConverter, ValueConverter, ValueKind, ValueSchema,
};
pub use crate::error::{Error, Result};
pub use crate::types::{DevicePath, Id, Metadata, Value};
