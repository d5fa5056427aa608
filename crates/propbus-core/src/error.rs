/*!
 * Error types for the propbus core crate.
 */
use thiserror::Error;

/// Error type for propbus core operations
#[derive(Error, Debug)]
pub enum Error {
    /// A value could not be converted to or from a domain type
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// A device path could not be parsed
    #[error("Invalid path: {0}")]
    Path(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Runtime error
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for propbus core operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new conversion error
    pub fn conversion<S: AsRef<str>>(msg: S) -> Self {
        Error::Conversion(msg.as_ref().to_string())
    }

    /// Create a new path error
    pub fn path<S: AsRef<str>>(msg: S) -> Self {
        Error::Path(msg.as_ref().to_string())
    }

    /// Create a new configuration error
    pub fn config<S: AsRef<str>>(msg: S) -> Self {
        Error::Config(msg.as_ref().to_string())
    }

    /// Create a new runtime error
    pub fn runtime<S: AsRef<str>>(msg: S) -> Self {
        Error::Runtime(msg.as_ref().to_string())
    }

    /// Create a new serialization error
    pub fn serialization<S: AsRef<str>>(msg: S) -> Self {
        Error::Serialization(msg.as_ref().to_string())
    }

    /// Create a new other error
    pub fn other<S: AsRef<str>>(msg: S) -> Self {
        Error::Other(msg.as_ref().to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}
