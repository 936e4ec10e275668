//! Error types for the HyperConverged operator

use thiserror::Error;

/// Main error type for HyperConverged operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Validation error for the HyperConverged spec or a derived object
    #[error("{0}")]
    Validation(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// JSON patch could not be parsed or applied
    #[error("patch error: {0}")]
    Patch(String),

    /// Conversion between HyperConverged API versions failed
    #[error("conversion error: {0}")]
    Conversion(String),

    /// A required object does not exist
    #[error("{kind} {name} not found")]
    NotFound {
        /// Resource kind (plural form, as reported by the API server)
        kind: String,
        /// Object name, optionally prefixed by its namespace
        name: String,
    },

    /// An operation exceeded its deadline
    #[error("deadline exceeded: {0}")]
    Timeout(String),

    /// Startup-time consistency error (embedded manifests, patch tables, configuration)
    #[error("startup error: {0}")]
    Startup(String),

    /// Internal/operational error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a patch error with the given message
    pub fn patch(msg: impl Into<String>) -> Self {
        Self::Patch(msg.into())
    }

    /// Create a conversion error with the given message
    pub fn conversion(msg: impl Into<String>) -> Self {
        Self::Conversion(msg.into())
    }

    /// Create a not-found error for the given resource
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a timeout error with the given message
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a startup error with the given message
    pub fn startup(msg: impl Into<String>) -> Self {
        Self::Startup(msg.into())
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// True when the error means the object does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube(kube::Error::Api(ae)) => ae.code == 404,
            _ => false,
        }
    }

    /// True when the API server refused a create because the object exists
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            Error::Kube(kube::Error::Api(ae)) if ae.code == 409 && ae.reason == "AlreadyExists"
        )
    }

    /// True when the API server reported a write conflict
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::Kube(kube::Error::Api(ae)) if ae.code == 409 && ae.reason == "Conflict"
        )
    }

    /// Whether the controller should retry the operation that produced this error
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(_) | Error::Timeout(_) | Error::NotFound { .. } | Error::Internal(_) => {
                true
            }
            Error::Validation(_)
            | Error::Serialization(_)
            | Error::Patch(_)
            | Error::Conversion(_)
            | Error::Startup(_) => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
