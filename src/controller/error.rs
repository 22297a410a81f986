//! # Reconcile Errors
//!
//! Every failure surfaced by a stage is classified as retryable (transient,
//! requeued with backoff), non-retryable (needs a spec change) or waiting
//! (an upstream object is not ready yet), and carries the machine-readable
//! reason written to the `Ready` condition.

use crate::artifact::{ArchiveError, StoreError};
use crate::controller::duration::DurationError;
use crate::localization::LocalizationError;
use crate::oci::RegistryError;
use crate::ocm::{
    ConfigError, DescriptorError, RepositoryError, SignatureError, TransformError, VersionError,
};
use std::fmt;
use thiserror::Error;

/// Condition reasons
pub mod reasons {
    pub const SUCCEEDED: &str = "Succeeded";
    pub const WAITING_FOR_DEPENDENCY: &str = "WaitingForDependency";
    pub const DEPENDENCY_NOT_FOUND: &str = "DependencyNotFound";
    pub const INVALID_SPEC: &str = "InvalidSpec";
    pub const SECRET_FETCH_FAILED: &str = "SecretFetchFailed";
    pub const CONFIG_FETCH_FAILED: &str = "ConfigFetchFailed";
    pub const CONFIGURE_CONTEXT_FAILED: &str = "ConfigureContextFailed";
    pub const VERIFICATIONS_INVALID: &str = "VerificationsInvalid";
    pub const REPOSITORY_UNAVAILABLE: &str = "RepositoryUnavailable";
    pub const GET_COMPONENT_VERSION_FAILED: &str = "GetComponentVersionFailed";
    pub const CHECK_VERSION_FAILED: &str = "CheckVersionFailed";
    pub const VERIFICATION_FAILED: &str = "ComponentVerificationFailed";
    pub const RESOLVE_RESOURCE_FAILED: &str = "ResolveResourceFailed";
    pub const GET_BLOB_FAILED: &str = "GetBlobFailed";
    pub const LOCALIZATION_FAILED: &str = "LocalizationFailed";
    pub const CONFIGURATION_FAILED: &str = "ConfigurationFailed";
    pub const STORAGE_FAILED: &str = "StorageFailed";
    pub const APPLY_FAILED: &str = "ApplyFailed";
    pub const DELETION_FAILED: &str = "DeletionFailed";
    pub const STATUS_UPDATE_FAILED: &str = "StatusUpdateFailed";
}

/// How the state machine reacts to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transient; requeue with backoff
    Retryable,
    /// Needs a spec change; no automatic requeue
    NonRetryable,
    /// An upstream object is not ready; requeue after a short delay
    Waiting,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Retryable => "retryable",
            ErrorKind::NonRetryable => "non-retryable",
            ErrorKind::Waiting => "waiting",
        })
    }
}

#[derive(Debug, Clone, Error)]
#[error("{reason}: {message}")]
pub struct ReconcileError {
    pub kind: ErrorKind,
    pub reason: &'static str,
    pub message: String,
}

impl ReconcileError {
    pub fn retryable(reason: &'static str, message: impl fmt::Display) -> Self {
        Self {
            kind: ErrorKind::Retryable,
            reason,
            message: message.to_string(),
        }
    }

    pub fn non_retryable(reason: &'static str, message: impl fmt::Display) -> Self {
        Self {
            kind: ErrorKind::NonRetryable,
            reason,
            message: message.to_string(),
        }
    }

    /// Upstream object not ready
    pub fn waiting(message: impl fmt::Display) -> Self {
        Self {
            kind: ErrorKind::Waiting,
            reason: reasons::WAITING_FOR_DEPENDENCY,
            message: message.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Retryable
    }
}

/// Errors that know whether retrying can succeed
pub trait Retryable: fmt::Display {
    fn is_retryable(&self) -> bool;

    /// Classify with `reason`
    fn classify(&self, reason: &'static str) -> ReconcileError {
        if self.is_retryable() {
            ReconcileError::retryable(reason, self)
        } else {
            ReconcileError::non_retryable(reason, self)
        }
    }
}

/// Attach a condition reason to a fallible result
pub trait ReasonExt<T> {
    fn reason(self, reason: &'static str) -> Result<T, ReconcileError>;
}

impl<T, E: Retryable> ReasonExt<T> for Result<T, E> {
    fn reason(self, reason: &'static str) -> Result<T, ReconcileError> {
        self.map_err(|e| e.classify(reason))
    }
}

impl Retryable for ConfigError {
    fn is_retryable(&self) -> bool {
        ConfigError::is_retryable(self)
    }
}

impl From<ConfigError> for ReconcileError {
    fn from(error: ConfigError) -> Self {
        let reason = match &error {
            ConfigError::SecretFetch { .. } => reasons::SECRET_FETCH_FAILED,
            ConfigError::ConfigFetch { .. } => reasons::CONFIG_FETCH_FAILED,
            ConfigError::Configure { .. } | ConfigError::UnknownConfigSet(_) => {
                reasons::CONFIGURE_CONTEXT_FAILED
            }
            ConfigError::Verification { .. } => reasons::VERIFICATIONS_INVALID,
        };
        error.classify(reason)
    }
}

impl Retryable for RepositoryError {
    fn is_retryable(&self) -> bool {
        RepositoryError::is_retryable(self)
    }
}

impl Retryable for RegistryError {
    fn is_retryable(&self) -> bool {
        RegistryError::is_retryable(self)
    }
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        StoreError::is_retryable(self)
    }
}

impl Retryable for VersionError {
    /// A matching version may still be published
    fn is_retryable(&self) -> bool {
        matches!(self, VersionError::NoMatchingVersion { .. })
    }
}

impl Retryable for kube::Error {
    /// Conflicts, throttling, server errors and transport failures heal on retry.
    /// An object that does not decode needs a spec change first.
    fn is_retryable(&self) -> bool {
        match self {
            kube::Error::Api(response) => {
                response.code == 409 || response.code == 429 || response.code >= 500
            }
            kube::Error::SerdeError(_) => false,
            _ => true,
        }
    }
}

macro_rules! never_retryable {
    ($($error:ty),+ $(,)?) => {
        $(
            impl Retryable for $error {
                fn is_retryable(&self) -> bool {
                    false
                }
            }
        )+
    };
}

never_retryable!(
    DescriptorError,
    SignatureError,
    TransformError,
    ArchiveError,
    LocalizationError,
    DurationError,
    serde_json::Error,
    serde_yaml::Error,
);
