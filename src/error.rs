//! Error types for kube-pressure
//!
//! API failures are classified by the HTTP code the control plane returns so
//! callers can tell "already exists" and "already gone" apart from real faults.

use std::fmt;

use thiserror::Error;
use tracing::warn;

use crate::k8s::PodStatus;

/// Result alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type for pressure-test operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The resource already exists (HTTP 409)
    #[error("conflict: {0}")]
    Conflict(String),

    /// The resource is absent from the cluster (HTTP 404)
    #[error("not found: {0}")]
    NotFound(String),

    /// A resource never reached the awaited status within its budget
    #[error(
        "{kind} {namespace}/{name} did not reach {expected} in time, last observed {}",
        describe_status(.last_observed)
    )]
    ConvergenceTimeout {
        kind: &'static str,
        namespace: String,
        name: String,
        expected: PodStatus,
        last_observed: Option<PodStatus>,
    },

    /// The bulk deployment ran past its wall-clock ceiling
    #[error("bulk deployment deadline exceeded, pipelines still pending: {}", .pending.join(", "))]
    DeadlineExceeded { pending: Vec<String> },

    /// A descriptor could not be turned into a submittable object
    #[error("validation error: {0}")]
    Validation(String),

    /// Credential profile lookup or loading failed
    #[error("profile error: {0}")]
    Profile(String),

    /// Running a command inside a pod failed
    #[error("exec error: {0}")]
    Exec(String),

    /// Any other Kubernetes API or transport error
    #[error("kubernetes error: {0}")]
    Kube(kube::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_status(status: &Option<PodStatus>) -> String {
    match status {
        Some(status) => status.to_string(),
        None => "nothing".to_string(),
    }
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) if resp.code == 409 => Error::Conflict(resp.message),
            kube::Error::Api(resp) if resp.code == 404 => Error::NotFound(resp.message),
            other => Error::Kube(other),
        }
    }
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a profile error with the given message
    pub fn profile(msg: impl Into<String>) -> Self {
        Self::Profile(msg.into())
    }

    /// Create an exec error from anything printable
    pub fn exec(msg: impl fmt::Display) -> Self {
        Self::Exec(msg.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// NotFound and transport-level failures may be skipped on cleanup paths.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::Kube(_) | Error::Exec(_))
    }
}

/// Swallow recoverable failures of a cleanup step, propagating everything else.
pub fn best_effort<T>(operation: &str, result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_recoverable() => {
            warn!(operation, error = %e, "Ignoring failure in best-effort step");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
