//! Error and signal types shared across the admission pipeline

use crate::models::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Failure of a single bounded lookup against an external collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("{collaborator} lookup timed out after {timeout:?}")]
    Timeout {
        collaborator: &'static str,
        timeout: Duration,
    },

    #[error("{collaborator} unavailable: {reason}")]
    Unavailable {
        collaborator: &'static str,
        reason: String,
    },
}

impl LookupError {
    pub fn collaborator(&self) -> &'static str {
        match self {
            LookupError::Timeout { collaborator, .. }
            | LookupError::Unavailable { collaborator, .. } => collaborator,
        }
    }
}

/// Signal raised alongside an admission outcome.
///
/// None of these deny admission; the transport decides what to do with them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Signal {
    /// Namespace resource ranges could not be read, so capping was skipped
    #[error("resource ranges for namespace {namespace} are unknown")]
    UnknownBounds { namespace: String },

    #[error(transparent)]
    ConfigurationError(ConfigurationError),

    /// The Pod payload could not be processed
    #[error("malformed input: {reason}")]
    MalformedInput { reason: String },
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::UnknownBounds { .. } => "unknown_bounds",
            Signal::ConfigurationError(_) => "configuration_error",
            Signal::MalformedInput { .. } => "malformed_input",
        }
    }
}

impl From<ConfigurationError> for Signal {
    fn from(err: ConfigurationError) -> Self {
        Signal::ConfigurationError(err)
    }
}
