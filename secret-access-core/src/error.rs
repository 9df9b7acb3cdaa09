//! Error taxonomy for the secret access core.
//!
//! Three kinds, matching three different failure moments: [`ValidationError`]
//! at construction time, [`ConfigurationError`] at registration/build time,
//! and [`AccessError`] when a backing store refuses or fails a fetch.
//! [`CoreError`] is the union the facade surfaces to callers.

use crate::model::SecretReference;
use thiserror::Error;

/// Caller-supplied data violates an invariant (null/empty/wrong payload shape).
///
/// Raised synchronously by constructors and setters. Never swallowed.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The specific invariant that was violated.
    #[error("{0}")]
    Message(String),
    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ValidationError {
    /// Build a new validation error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

/// Registration or build-time misuse (duplicate name, missing cache, no
/// provider supports a reference's store type).
///
/// Raised synchronously.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The specific misuse that was detected.
    #[error("{0}")]
    Message(String),
    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ConfigurationError {
    /// Build a new configuration error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

/// Failure to fetch a secret from a backing store (network, auth denial,
/// not-found, access-denied, transient I/O).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum AccessError {
    /// A fetch failed for a specific reference.
    #[error("access error for {reference:?}: {message}")]
    Fetch {
        /// The reference the failed fetch was for.
        reference: SecretReference,
        /// Human-readable, secret-free description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl AccessError {
    /// Build a new access error with no underlying cause.
    pub fn new(reference: SecretReference, message: impl Into<String>) -> Self {
        Self::Fetch {
            reference,
            message: message.into(),
            cause: None,
        }
    }

    /// Build a new access error wrapping an underlying cause.
    pub fn with_cause(
        reference: SecretReference,
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Fetch {
            reference,
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    /// The reference the failed fetch was for, if this is a [`AccessError::Fetch`].
    pub fn reference(&self) -> Option<&SecretReference> {
        match self {
            Self::Fetch { reference, .. } => Some(reference),
            Self::Other(_) => None,
        }
    }

    /// The human-readable failure description, if this is a [`AccessError::Fetch`].
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Fetch { message, .. } => Some(message),
            Self::Other(_) => None,
        }
    }
}

/// The union of error kinds a facade caller can observe.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CoreError {
    /// See [`ValidationError`].
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// See [`ConfigurationError`].
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// See [`AccessError`].
    #[error(transparent)]
    Access(#[from] AccessError),
}

impl CoreError {
    /// The reference associated with this error, if it is an [`AccessError::Fetch`].
    pub fn reference(&self) -> Option<&SecretReference> {
        match self {
            CoreError::Access(e) => e.reference(),
            _ => None,
        }
    }
}
