/*!
 * Device trait and core device abstractions.
 *
 * A device exposes named, typed, observable properties and invokable
 * actions. Reads and writes pass through a logical-state cache; every
 * installed change is broadcast on the device's message stream.
 */
use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use propbus_core::convert::ValueSchema;
use propbus_core::error::Error as CoreError;
use propbus_core::types::{DevicePath, Value};

use crate::hub::DeviceHub;
use crate::message::DeviceMessage;

/// Name of the built-in read-only property exposing a device's static
/// configuration
pub const META_PROPERTY: &str = "@meta";

/// Default capacity of a device's broadcast message buffer
pub const DEFAULT_MESSAGE_BUFFER: usize = 1024;

/// Error type for device operations
#[derive(Error, Debug)]
pub enum DeviceError {
    /// No property with the given name is registered
    #[error("Property not found: {0}")]
    PropertyNotFound(String),

    /// No action with the given name is registered
    #[error("Action not found: {0}")]
    ActionNotFound(String),

    /// No device at the given hub path
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// A path segment resolved to a device that is not a hub
    #[error("Not a hub: {0}")]
    NotAHub(String),

    /// The property has no bound write function
    #[error("Property is not writable: {0}")]
    NotWritable(String),

    /// The bound read function returned no value
    #[error("Failed to read property: {0}")]
    ReadFailed(String),

    /// Communication error with the backing hardware
    #[error("Communication error: {0}")]
    Communication(String),

    /// The message shape is not handled by the current dispatch role
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A backend-imposed deadline expired
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The operation is invalid in the current lifecycle state
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// The device has been closed
    #[error("Device closed: {0}")]
    Closed(String),

    /// Core error, including value conversion failures
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// Other error
    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

impl DeviceError {
    /// Create a new property-not-found error
    pub fn property_not_found<S: AsRef<str>>(name: S) -> Self {
        DeviceError::PropertyNotFound(name.as_ref().to_string())
    }

    /// Create a new action-not-found error
    pub fn action_not_found<S: AsRef<str>>(name: S) -> Self {
        DeviceError::ActionNotFound(name.as_ref().to_string())
    }

    /// Create a new device-not-found error for a hub path
    pub fn device_not_found(path: &DevicePath) -> Self {
        DeviceError::DeviceNotFound(path.to_string())
    }

    /// Create a new not-a-hub error
    pub fn not_a_hub<S: AsRef<str>>(name: S) -> Self {
        DeviceError::NotAHub(name.as_ref().to_string())
    }

    /// Create a new not-writable error
    pub fn not_writable<S: AsRef<str>>(name: S) -> Self {
        DeviceError::NotWritable(name.as_ref().to_string())
    }

    /// Create a new read-failed error
    pub fn read_failed<S: AsRef<str>>(name: S) -> Self {
        DeviceError::ReadFailed(name.as_ref().to_string())
    }

    /// Create a new communication error
    pub fn communication<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::Communication(msg.as_ref().to_string())
    }

    /// Create a new protocol error
    pub fn protocol<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::Protocol(msg.as_ref().to_string())
    }

    /// Create a new lifecycle error
    pub fn lifecycle<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::Lifecycle(msg.as_ref().to_string())
    }

    /// Create a new closed error
    pub fn closed<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::Closed(msg.as_ref().to_string())
    }

    /// Create a new other error
    pub fn other<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::Other(msg.as_ref().to_string())
    }

    /// Short classification used as the `errorType` wire field
    pub fn error_type(&self) -> &'static str {
        match self {
            DeviceError::PropertyNotFound(_) => "PropertyNotFound",
            DeviceError::ActionNotFound(_) => "ActionNotFound",
            DeviceError::DeviceNotFound(_) => "DeviceNotFound",
            DeviceError::NotAHub(_) => "NotAHub",
            DeviceError::NotWritable(_) => "NotWritable",
            DeviceError::ReadFailed(_) => "ReadFailed",
            DeviceError::Communication(_) => "Communication",
            DeviceError::Protocol(_) => "Protocol",
            DeviceError::Timeout(_) => "Timeout",
            DeviceError::Lifecycle(_) => "Lifecycle",
            DeviceError::Closed(_) => "Closed",
            DeviceError::Core(CoreError::Conversion(_)) => "Conversion",
            DeviceError::Core(_) => "Core",
            DeviceError::Other(_) => "Other",
        }
    }
}

/// A lifecycle state of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Created but never opened
    Init,
    /// The device is initializing
    Starting,
    /// The device is initialized and running
    Started,
    /// The device is closed
    Stopped,
    /// The device encountered an irrecoverable error
    Error,
}

/// A descriptor for a device property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    /// The property name, unique within its device
    pub name: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Schema of the property value tree
    #[serde(default)]
    pub schema: ValueSchema,
    /// Whether the property can be read
    #[serde(default = "default_true")]
    pub readable: bool,
    /// Whether the property can be written
    #[serde(default)]
    pub writable: bool,
}

fn default_true() -> bool {
    true
}

impl PropertyDescriptor {
    /// Create a new readable, non-writable descriptor
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            description: None,
            schema: ValueSchema::default(),
            readable: true,
            writable: false,
        }
    }

    /// Set the description
    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the value schema
    pub fn with_schema(mut self, schema: ValueSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Mark the property writable
    pub fn writable(mut self) -> Self {
        self.writable = true;
        self
    }
}

/// A descriptor for a device action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    /// The action name, unique within its device
    pub name: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ActionDescriptor {
    /// Create a new action descriptor
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }

    /// Set the description
    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// The core device trait.
///
/// A device caches the logical state of its properties: `read_property`
/// always hits the backing source and refreshes the cache, `get_property`
/// only consults the cache. All installed changes are broadcast on the
/// message stream.
#[async_trait]
pub trait Device: Send + Sync + 'static {
    /// Static configuration of the device
    fn meta(&self) -> &Value;

    /// Descriptors of the supported properties
    fn property_descriptors(&self) -> Vec<PropertyDescriptor>;

    /// Descriptors of the supported actions
    fn action_descriptors(&self) -> Vec<ActionDescriptor>;

    /// Current lifecycle state
    fn lifecycle_state(&self) -> LifecycleState;

    /// Subscribe to the device message stream. Lagging subscribers drop
    /// the oldest messages but always converge to the latest state.
    fn messages(&self) -> broadcast::Receiver<DeviceMessage>;

    /// Read the physical state of a property, refresh the cache and push a
    /// change notification if the value is distinct from the cached one
    async fn read_property(&self, name: &str) -> Result<Value>;

    /// Read a property, mapping any failure to `None`
    async fn read_property_or_none(&self, name: &str) -> Option<Value> {
        self.read_property(name).await.ok()
    }

    /// Get the cached (logical) state of a property without touching the
    /// backing source; `None` when invalid or never read
    fn get_property(&self, name: &str) -> Option<Value>;

    /// Invalidate the logical state of a property. Does not emit a change
    /// notification.
    async fn invalidate(&self, name: &str) -> Result<()>;

    /// Write a property. Writable properties are invalidated, physically
    /// written under the per-property write lock and re-read; names with
    /// no registered spec become pure logical (virtual) updates.
    async fn write_property(&self, name: &str, value: Value) -> Result<()>;

    /// Execute an action and suspend until it completes
    async fn execute(&self, name: &str, argument: Option<Value>) -> Result<Option<Value>>;

    /// Initialize the device; does nothing if already started or starting
    async fn open(&self) -> Result<()>;

    /// Close the device, cancelling all tasks bound to it
    async fn close(&self);

    /// The hub view of this device, when it contains children
    fn hub(&self) -> Option<&dyn DeviceHub> {
        None
    }
}

/// Get the logical state of a property, or read the physical value when
/// the cache is invalid
pub async fn get_or_read_property(device: &dyn Device, name: &str) -> Result<Value> {
    match device.get_property(name) {
        Some(value) => Ok(value),
        None => device.read_property(name).await,
    }
}

/// Snapshot of the device's valid logical state over all descriptors
pub fn all_properties(device: &dyn Device) -> Value {
    let mut out = HashMap::new();
    for descriptor in device.property_descriptors() {
        if let Some(value) = device.get_property(&descriptor.name) {
            out.insert(descriptor.name, value);
        }
    }
    Value::Object(out)
}

/// Wait on a subscription for the next change of a specific property,
/// skipping lagged stretches; `None` when the stream closes
pub async fn next_property_change(
    subscription: &mut broadcast::Receiver<DeviceMessage>,
    property: &str,
) -> Option<Value> {
    loop {
        match subscription.recv().await {
            Ok(DeviceMessage::PropertyChanged {
                property: changed,
                value,
                ..
            }) if changed == property => return Some(value),
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}
