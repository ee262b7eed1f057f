//! CLI error types and exit codes.

use std::path::PathBuf;
use std::process::ExitCode;

use thiserror::Error;
use wgprov_core::{ErrorKind, ProvisionError};

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// The provisioning core failed.
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// Writing the client config file failed.
    #[error("cannot write {}: {source}", .path.display())]
    Output {
        /// Target file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Output formatting error.
    #[error("format error: {0}")]
    Format(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error.
    ///
    /// | code | meaning |
    /// |------|---------|
    /// | 2 | configuration |
    /// | 3 | address pool exhausted |
    /// | 4 | registry unavailable or invalid |
    /// | 5 | key generation |
    /// | 6 | invalid endpoint |
    /// | 1 | anything else |
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Provision(err) => match err.kind() {
                ErrorKind::Config => 2,
                ErrorKind::PoolExhausted => 3,
                ErrorKind::StoreUnavailable | ErrorKind::InvalidRegistry => 4,
                ErrorKind::KeyGeneration => 5,
                ErrorKind::InvalidEndpoint => 6,
                ErrorKind::Reload | ErrorKind::Internal => 1,
            },
            Self::Output { .. } | Self::Format(_) | Self::Io(_) => 1,
        }
    }
}

impl From<&CliError> for ExitCode {
    fn from(err: &CliError) -> Self {
        Self::from(err.exit_code())
    }
}
