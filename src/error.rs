//! Error types for dependency resolution

use crate::{DependencyKey, Param, ScopeId};
use thiserror::Error;

/// Errors that can occur while registering or resolving dependencies
#[derive(Error, Debug, Clone)]
pub enum DiError {
    /// No resolver for the key, or no value for the requested param
    #[error(
        "Dependency \"{key}\" is not found{}",
        .param.as_ref().map(|p| format!(" for param \"{p}\"")).unwrap_or_default()
    )]
    NotFound {
        key: DependencyKey,
        param: Option<Param>,
    },

    /// Resolver can never produce a value
    #[error("Invalid resolver for \"{key}\": {reason}")]
    InvalidResolver { key: DependencyKey, reason: String },

    /// Value has no derivable stable key
    #[error("Cannot derive a dependency key from {0:?}")]
    InvalidDependencyKind(String),

    /// Resolved value is not of the requested type
    #[error("Dependency \"{key}\" is not of type {expected}")]
    TypeMismatch {
        key: DependencyKey,
        expected: &'static str,
    },

    /// Scope has already exited and cannot own new instances
    #[error("{scope} has already exited")]
    ScopeExited { scope: ScopeId },

    /// Function resolver failed to produce a value
    #[error("Failed to create \"{key}\": {reason}")]
    CreationFailed { key: DependencyKey, reason: String },
}

impl DiError {
    /// Create a NotFound error for a key
    #[inline]
    pub fn not_found(key: DependencyKey) -> Self {
        Self::NotFound { key, param: None }
    }

    /// Create a NotFound error for a key and param
    #[inline]
    pub fn param_not_found(key: DependencyKey, param: Option<Param>) -> Self {
        Self::NotFound { key, param }
    }

    /// Create a CreationFailed error
    #[inline]
    pub fn creation_failed(key: DependencyKey, reason: impl Into<String>) -> Self {
        Self::CreationFailed {
            key,
            reason: reason.into(),
        }
    }

    /// Create a TypeMismatch error
    #[inline]
    pub fn type_mismatch<T: 'static>(key: DependencyKey) -> Self {
        Self::TypeMismatch {
            key,
            expected: std::any::type_name::<T>(),
        }
    }

    /// Whether this error reports a missing dependency
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type alias for DI operations
pub type Result<T> = std::result::Result<T, DiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = DiError::not_found(DependencyKey::name("missing"));
        assert_eq!(err.to_string(), "Dependency \"missing\" is not found");
    }

    #[test]
    fn test_param_not_found_message() {
        let err = DiError::param_not_found(DependencyKey::name("db"), Some(Param::from("replica")));
        assert_eq!(
            err.to_string(),
            "Dependency \"db\" is not found for param \"replica\""
        );
        assert!(err.is_not_found());
    }
}
