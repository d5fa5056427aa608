/*!
 * Propbus Devices
 *
 * This crate provides the device abstraction for the propbus runtime:
 * spec-driven devices with a logical-state cache and supervised task
 * scopes, hierarchical hubs with path addressing, the tagged message
 * protocol with its dispatcher, and a remote client reconstructing a
 * device purely from the message stream.
 */

#![warn(missing_docs)]

// Re-export core types
pub use propbus_core::prelude;

pub mod client;
pub mod device;
pub mod devices;
pub mod dispatch;
pub mod hub;
pub mod message;
pub mod scope;
pub mod spec;

// Re-export the central types for convenience
pub use client::RemoteDevice;
pub use device::{
    ActionDescriptor, Device, DeviceError, LifecycleState, PropertyDescriptor, Result,
};
pub use dispatch::{respond_hub_message, respond_message, serve};
pub use hub::{build_tree, resolve, resolve_or_none, DeviceHub, Hub};
pub use message::DeviceMessage;
pub use scope::TaskScope;
pub use spec::{ActionSpec, DeviceRef, DeviceSpec, PropertySpec, SpecDevice};

/// Propbus devices crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the device system
pub fn init() -> Result<()> {
    tracing::info!("Propbus Devices {} initialized", VERSION);
    Ok(())
}
