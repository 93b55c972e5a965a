//! Error types for model parsing.

use thiserror::Error;

/// Errors that can occur when parsing model values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// The topology identifier is not one of the supported kinds.
    #[error("unknown network topology: {0}")]
    UnknownTopology(String),
}
