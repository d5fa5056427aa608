/*!
 * Propbus Core
 *
 * This crate provides the foundation for the propbus device runtime: the
 * value tree carried by property and action payloads, converters between
 * domain types and the tree, device paths, configuration, and logging.
 */

#![warn(missing_docs)]

pub mod config;
pub mod convert;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod types;

/// Re-export of dependencies that are part of the public API
pub mod deps {
    pub use anyhow;
    pub use chrono;
    pub use futures;
    pub use serde;
    pub use tokio;
    pub use tracing;
    pub use uuid;
}

/// Propbus core crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization
pub fn init() -> Result<(), error::Error> {
    logging::init()?;
    tracing::info!("Propbus Core {} initialized", VERSION);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
