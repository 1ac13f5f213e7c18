//! Errors returned across the map API.
//!
//! Internal restart signals never reach callers; only these do.

use std::fmt as StdFmt;

/// Errors from [`MassTree`](crate::MassTree) operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreeError {
    /// The key is not present.
    NotFound,

    /// The insert-only entry point found the key already present.
    AlreadyExists,

    /// Keys must contain at least one byte.
    EmptyKey,
}

impl StdFmt::Display for TreeError {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::AlreadyExists => write!(f, "key already exists"),
            Self::EmptyKey => write!(f, "empty keys are not supported"),
        }
    }
}

impl std::error::Error for TreeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(TreeError::NotFound.to_string(), "key not found");
        assert_eq!(TreeError::AlreadyExists.to_string(), "key already exists");
        assert_eq!(TreeError::EmptyKey.to_string(), "empty keys are not supported");
    }

    #[test]
    fn test_is_std_error() {
        let err: Box<dyn std::error::Error> = Box::new(TreeError::NotFound);
        assert!(err.source().is_none());
    }
}
