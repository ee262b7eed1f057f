//! `wgprov provision`.
//!
//! Prints the client config to stdout, or writes it to a new owner-only
//! file. The file is created before provisioning so an unwritable path
//! fails before a peer is registered.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;
use wgprov_core::keys::KeyProvider;
use wgprov_core::{DaemonController, PeerSummary, ProvisionedPeer, Provisioner, RegistryStore, ReloadOutcome};

use crate::cli::ProvisionArgs;
use crate::error::CliError;

/// Provision command executor.
#[derive(Debug, Clone)]
pub struct ProvisionCommand {
    endpoint: String,
    output: Option<PathBuf>,
}

impl ProvisionCommand {
    /// Create a new provision command.
    #[must_use]
    pub fn new(args: &ProvisionArgs) -> Self {
        Self {
            endpoint: args.endpoint.clone(),
            output: args.output.clone(),
        }
    }

    /// Provisions one peer.
    ///
    /// The config goes to `writer` unless an output file was given, in which
    /// case a short confirmation does. Reload problems are reported on
    /// `notices` and do not fail the command.
    ///
    /// # Errors
    ///
    /// Returns an error if provisioning fails or the config cannot be
    /// written.
    pub async fn execute<W, E, S, K, D>(
        &self,
        writer: &mut W,
        notices: &mut E,
        provisioner: &Provisioner<S, K, D>,
    ) -> Result<ProvisionedPeer, CliError>
    where
        W: Write,
        E: Write,
        S: RegistryStore + 'static,
        K: KeyProvider,
        D: DaemonController,
    {
        let file = match &self.output {
            Some(path) => Some((path, create_private(path)?)),
            None => None,
        };

        let peer = match provisioner.provision_peer(&self.endpoint).await {
            Ok(peer) => peer,
            Err(err) => {
                if let Some((path, file)) = file {
                    drop(file);
                    let _ = fs::remove_file(path);
                }
                return Err(err.into());
            }
        };

        if let ReloadOutcome::Failed(reason) = &peer.reload {
            writeln!(
                notices,
                "warning: peer {} registered but the daemon was not reloaded: {reason}",
                peer.address
            )?;
            writeln!(notices, "warning: it will take effect on the next daemon restart")?;
        }

        match file {
            Some((path, mut file)) => {
                file.write_all(peer.config.as_str().as_bytes())
                    .and_then(|()| file.sync_all())
                    .map_err(|source| CliError::Output {
                        path: path.clone(),
                        source,
                    })?;
                writeln!(writer, "wrote config for {} to {}", peer.address, path.display())?;
            }
            None => writer.write_all(peer.config.as_str().as_bytes())?,
        }

        let summary = PeerSummary::from(&peer);
        info!(address = %summary.address, public_key = %summary.public_key, "provisioned peer");
        Ok(peer)
    }
}

/// Creates `path` for writing, owner read/write only. Refuses to replace an
/// existing file.
fn create_private(path: &Path) -> Result<File, CliError> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path).map_err(|source| CliError::Output {
        path: path.to_path_buf(),
        source,
    })
}
