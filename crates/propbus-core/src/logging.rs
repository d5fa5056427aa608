/*!
 * Logging functionality for propbus.
 *
 * This module provides tracing setup and utilities for consistent logging
 * across propbus components.
 */
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{Error, Result};

/// Initialize the logging system with default configuration
pub fn init() -> Result<()> {
    init_with_filter("info")
}

/// Initialize the logging system with a specific filter
///
/// # Arguments
///
/// * `filter` - The log filter string (e.g., "info", "debug", "propbus=trace")
pub fn init_with_filter(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .map_err(|e| Error::runtime(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}

/// A type alias for a tracing span
pub type Span = tracing::Span;

/// Create a new span for a device
///
/// # Arguments
///
/// * `name` - The device name within its hub, if installed
pub fn device_span(name: &str) -> Span {
    tracing::info_span!("device", name = %name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init() {
        // May be called more than once across the test binary; only the
        // first call installs the subscriber
        let _ = init();
        let _ = init();
    }

    #[test]
    fn test_device_span() {
        let span = device_span("drive");
        let _guard = span.enter();
    }
}
