//! Error types for identifier parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The ID string is empty.
    #[error("ID cannot be empty")]
    Empty,

    /// The ID has an invalid prefix.
    #[error("invalid ID prefix: expected '{expected}', got '{actual}'")]
    InvalidPrefix {
        expected: &'static str,
        actual: String,
    },

    /// The ID is missing the underscore separator.
    #[error("ID missing underscore separator")]
    MissingSeparator,

    /// The ULID portion of the ID is invalid.
    #[error("invalid ULID: {0}")]
    InvalidUlid(String),

    /// A job key component is empty or whitespace.
    #[error("{field} cannot be blank")]
    BlankComponent { field: &'static str },

    /// A job key component contains characters outside `[A-Za-z0-9_.-]`.
    #[error("{field} '{value}' contains invalid characters")]
    InvalidCharacter { field: &'static str, value: String },

    /// A job key component exceeds the maximum identifier length.
    #[error("{field} exceeds {max} characters")]
    TooLong { field: &'static str, max: usize },

    /// A job key path does not have exactly three components.
    #[error("invalid job key path '{0}': expected role/environment/name")]
    InvalidPath(String),
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty | IdError::BlankComponent { .. })
    }

    /// Returns true if this error came from job key validation.
    pub fn is_job_key_error(&self) -> bool {
        matches!(
            self,
            IdError::BlankComponent { .. }
                | IdError::InvalidCharacter { .. }
                | IdError::TooLong { .. }
                | IdError::InvalidPath(_)
        )
    }
}
