//! Error types for peer provisioning.

use std::io;
use std::path::PathBuf;

use ipnet::Ipv4Net;
use thiserror::Error;
use wgprov_keys::KeyError;

/// Errors that can occur while provisioning a peer.
///
/// Every fatal failure has its own variant so outer layers can map it to a
/// status without inspecting messages; see [`ProvisionError::kind`].
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The key generation primitive was unavailable or failed.
    #[error("key generation failed: {reason}")]
    KeyGenerationFailed {
        /// What went wrong.
        reason: String,
    },

    /// Every host address in the subnet has been handed out.
    #[error("no addresses left in {subnet}")]
    AddressPoolExhausted {
        /// The exhausted subnet.
        subnet: Ipv4Net,
    },

    /// The backing registry resource could not be read or written.
    #[error("registry store {} unavailable: {source}", .path.display())]
    StoreUnavailable {
        /// Path of the resource that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The registry was readable but cannot be used (e.g. no server key).
    #[error("invalid registry: {0}")]
    InvalidRegistry(String),

    /// The daemon did not confirm the reload.
    #[error("daemon reload failed: {reason}")]
    ReloadFailed {
        /// What went wrong.
        reason: String,
    },

    /// The caller-supplied server endpoint is not a usable host.
    #[error("invalid server endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint {
        /// The rejected input.
        endpoint: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Settings are missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// A blocking provisioning task panicked or was cancelled.
    #[error("provisioning task failed: {0}")]
    Task(String),

    /// An append was attempted with a guard taken on a different store.
    #[error("registry lock is not held for this store")]
    LockNotHeld,
}

/// Coarse classification of a [`ProvisionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`ProvisionError::KeyGenerationFailed`].
    KeyGeneration,
    /// See [`ProvisionError::AddressPoolExhausted`].
    PoolExhausted,
    /// See [`ProvisionError::StoreUnavailable`].
    StoreUnavailable,
    /// See [`ProvisionError::InvalidRegistry`].
    InvalidRegistry,
    /// See [`ProvisionError::ReloadFailed`].
    Reload,
    /// See [`ProvisionError::InvalidEndpoint`].
    InvalidEndpoint,
    /// See [`ProvisionError::Config`].
    Config,
    /// See [`ProvisionError::Task`] and [`ProvisionError::LockNotHeld`].
    Internal,
}

impl ProvisionError {
    /// Returns the classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::KeyGenerationFailed { .. } => ErrorKind::KeyGeneration,
            Self::AddressPoolExhausted { .. } => ErrorKind::PoolExhausted,
            Self::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
            Self::InvalidRegistry(_) => ErrorKind::InvalidRegistry,
            Self::ReloadFailed { .. } => ErrorKind::Reload,
            Self::InvalidEndpoint { .. } => ErrorKind::InvalidEndpoint,
            Self::Config(_) => ErrorKind::Config,
            Self::Task(_) | Self::LockNotHeld => ErrorKind::Internal,
        }
    }

    pub(crate) fn store(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::StoreUnavailable {
            path: path.into(),
            source,
        }
    }
}

impl From<KeyError> for ProvisionError {
    fn from(err: KeyError) -> Self {
        let reason = match err {
            KeyError::GenerationFailed(reason) => reason,
            other => other.to_string(),
        };
        Self::KeyGenerationFailed { reason }
    }
}

/// Result type for provisioning operations.
pub type Result<T> = std::result::Result<T, ProvisionError>;
