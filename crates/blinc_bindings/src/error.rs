//! Binding error types

use thiserror::Error;

use crate::cell::CellId;

/// Errors raised while creating, driving or tearing down bindings
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    /// Bad input, e.g. binding a cell to itself
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    /// Operation not allowed in the current lifecycle state
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Operation not supported by this binding or cell
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// A mapper without fallback failed to convert a value
    #[error("Mapping failed: {0}")]
    Mapping(String),

    /// Direct write to a cell that is currently bound
    #[error("Bound value cannot be set ({0})")]
    BoundValue(CellId),

    /// Invalid or unreadable registry configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Coarse classification of [`BindingError`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    IllegalArgument,
    IllegalState,
    UnsupportedOperation,
    Mapping,
    Config,
}

impl BindingError {
    /// The kind of failure, independent of the message
    pub fn kind(&self) -> ErrorKind {
        match self {
            BindingError::IllegalArgument(_) => ErrorKind::IllegalArgument,
            BindingError::IllegalState(_) | BindingError::BoundValue(_) => ErrorKind::IllegalState,
            BindingError::Unsupported(_) => ErrorKind::UnsupportedOperation,
            BindingError::Mapping(_) => ErrorKind::Mapping,
            BindingError::Config(_) => ErrorKind::Config,
        }
    }

    pub(crate) fn disposed(what: &str) -> Self {
        BindingError::IllegalState(format!("{what} has been disposed"))
    }
}

/// Result type for binding operations
pub type Result<T> = std::result::Result<T, BindingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_value_is_illegal_state() {
        let err = BindingError::BoundValue(CellId::from_raw(7));
        assert_eq!(err.kind(), ErrorKind::IllegalState);
        assert_eq!(err.to_string(), "Bound value cannot be set (cell#7)");
    }

    #[test]
    fn test_kinds() {
        assert_eq!(
            BindingError::Unsupported("x".into()).kind(),
            ErrorKind::UnsupportedOperation
        );
        assert_eq!(
            BindingError::disposed("Binding").to_string(),
            "Illegal state: Binding has been disposed"
        );
    }
}
