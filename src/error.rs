use std::sync::Arc;

use crate::toggle::KeyType;

/// Represents a result type for operations in the FeatureGuards SDK.
///
/// This `Result` type is a standard Rust `Result` type where the error variant is defined by the
/// featureguards-specific [`Error`] enum.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur in the FeatureGuards SDK.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Toggle definition or evaluation input is malformed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The requested toggle is not in the local cache.
    #[error("feature toggle {toggle} is not found")]
    NotFound {
        /// Name of the requested toggle.
        toggle: String,
    },

    /// The authority denied the request. Access or refresh token is likely expired.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Access token does not carry an expiration claim, so there is no deadline for the stream.
    #[error("no expiration set on JWT token")]
    NoExpiration,

    /// Access token could not be decoded.
    #[error("invalid access token: {0}")]
    InvalidToken(String),

    /// Invalid base URL configuration.
    #[error("invalid base_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// Server returned an unexpected response.
    #[error("server returned {status}: {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Response body, if any.
        message: String,
    },

    /// Update stream failed mid-flight.
    #[error("stream error: {0}")]
    Stream(String),

    /// Sync thread panicked. This should normally never happen.
    #[error("sync thread panicked")]
    SyncThreadPanicked,

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),
}

impl Error {
    /// Return `true` if the authority rejected our credentials.
    pub(crate) fn is_permission_denied(&self) -> bool {
        matches!(self, Error::PermissionDenied(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

/// A defect in a toggle definition or in the attributes passed for evaluation.
///
/// Validation errors are never retried: the problem is in the definition or the call, not in the
/// network.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ValidationError {
    /// Toggle type and definition disagree, or a required branch is missing.
    #[error("feature toggle {toggle} is invalid")]
    InvalidToggle {
        #[allow(missing_docs)]
        toggle: String,
    },

    /// Branch weights are out of range or don't sum to 100.
    #[error("feature toggle {toggle} has invalid weights")]
    InvalidWeights {
        #[allow(missing_docs)]
        toggle: String,
    },

    /// A rule has no attribute key set.
    #[error("invalid match key for {toggle}")]
    InvalidMatchKey {
        #[allow(missing_docs)]
        toggle: String,
    },

    /// Attribute value passed by the caller doesn't have the type declared by the rule.
    #[error("value passed for {key} is not {expected} for feature toggle {toggle}")]
    TypeMismatch {
        #[allow(missing_docs)]
        toggle: String,
        #[allow(missing_docs)]
        key: String,
        #[allow(missing_docs)]
        expected: KeyType,
    },

    /// Rule has no operation, or an operation for a different key type.
    #[error("no {expected} operation set for {key} and feature toggle {toggle}")]
    MissingOperation {
        #[allow(missing_docs)]
        toggle: String,
        #[allow(missing_docs)]
        key: String,
        #[allow(missing_docs)]
        expected: KeyType,
    },

    /// Operation has no operand values.
    #[error("expected values set for {key} and feature toggle {toggle}")]
    MissingValues {
        #[allow(missing_docs)]
        toggle: String,
        #[allow(missing_docs)]
        key: String,
    },

    /// Operator requires exactly one operand value.
    #[error("expected a single value for {key} and feature toggle {toggle}")]
    ExpectedSingleValue {
        #[allow(missing_docs)]
        toggle: String,
        #[allow(missing_docs)]
        key: String,
    },

    /// Key type is not known to this SDK version.
    #[error("unknown attribute type for attribute {key} and feature toggle {toggle}")]
    UnknownKeyType {
        #[allow(missing_docs)]
        toggle: String,
        #[allow(missing_docs)]
        key: String,
    },

    /// Sticky percentage toggle evaluated without attributes.
    #[error("no attributes passed for feature toggle {toggle}")]
    NoAttributes {
        #[allow(missing_docs)]
        toggle: String,
    },

    /// Sticky percentage toggle has no stickiness keys configured.
    #[error("no attributes defined for feature toggle {toggle}")]
    NoStickinessKeys {
        #[allow(missing_docs)]
        toggle: String,
    },

    /// A stickiness key has an empty name.
    #[error("empty key defined for feature toggle {toggle}")]
    EmptyKey {
        #[allow(missing_docs)]
        toggle: String,
    },

    /// None of the stickiness keys are present in the attributes.
    #[error("no matching attribute for {toggle}")]
    NoMatchingAttribute {
        #[allow(missing_docs)]
        toggle: String,
    },
}
