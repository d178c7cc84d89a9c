//! Instrumentation and delivery error types

use thiserror::Error;

/// Errors raised while setting up instrumentation
#[derive(Debug, Error)]
pub enum InstrumentError {
    /// The operation is not declared on the component
    #[error("cannot instrument undefined operation {operation} on {component}")]
    UndefinedOperation {
        /// Component type name
        component: &'static str,
        /// Requested operation name
        operation: String,
    },
}

/// Result type for instrumentation setup
pub type InstrumentResult<T> = Result<T, InstrumentError>;

/// Errors raised while delivering a sample to a remote collector
#[derive(Debug, Error)]
pub enum StatsdError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The configured address did not resolve to any socket address
    #[error("unresolved address: {0}")]
    UnresolvedAddress(String),
}

/// Result type for sample delivery
pub type StatsdResult<T> = Result<T, StatsdError>;
