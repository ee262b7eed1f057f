//! Daemon reconciliation.
//!
//! After a peer is committed to the registry, a [`DaemonController`] tells
//! the running `WireGuard` daemon to pick up the change. Reload is idempotent
//! and runs outside the registry lock.

use std::collections::HashSet;
use std::future::Future;
use std::io::Write;
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{ProvisionError, Result};

/// Whether the daemon confirmed a reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum ReloadOutcome {
    /// The daemon is running with the new peer.
    Applied,
    /// The reload did not complete. The peer is persisted and will be
    /// picked up on the next full restart.
    Failed(String),
}

impl ReloadOutcome {
    /// Returns `true` if the daemon confirmed the change.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Applies registry changes to the live daemon.
pub trait DaemonController: Send + Sync {
    /// Reloads the daemon and confirms it is running.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::ReloadFailed`] if the command cannot be run,
    /// exits non-zero, or the daemon is not active afterwards.
    fn reload(&self) -> impl Future<Output = Result<()>> + Send;
}

fn reload_failed(reason: impl Into<String>) -> ProvisionError {
    ProvisionError::ReloadFailed {
        reason: reason.into(),
    }
}

/// Runs `program args..`, optionally as `sudo -n program args..`.
async fn run(program: &str, args: &[&str], sudo: bool) -> Result<Output> {
    let mut cmd = if sudo {
        let mut cmd = Command::new("sudo");
        cmd.arg("-n").arg(program);
        cmd
    } else {
        Command::new(program)
    };

    debug!(program, ?args, sudo, "running daemon command");
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| reload_failed(format!("{program}: {e}")))
}

/// Like [`run`] but treats a non-zero exit as failure.
async fn run_checked(program: &str, args: &[&str], sudo: bool) -> Result<Output> {
    let output = run(program, args, sudo).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(reload_failed(format!(
            "{program} {} exited with {}: {}",
            args.join(" "),
            output.status,
            stderr.trim()
        )));
    }
    Ok(output)
}

/// Restarts a `wg-quick` systemd unit.
#[derive(Debug, Clone)]
pub struct SystemdController {
    unit: String,
    use_sudo: bool,
}

impl SystemdController {
    /// Controls `unit` (e.g. `wg-quick@wg0.service`) via `sudo -n systemctl`.
    #[must_use]
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            use_sudo: true,
        }
    }

    /// Runs `systemctl` directly instead of through `sudo -n`.
    #[must_use]
    pub fn with_sudo(mut self, use_sudo: bool) -> Self {
        self.use_sudo = use_sudo;
        self
    }

    /// Returns the controlled unit.
    #[must_use]
    pub fn unit(&self) -> &str {
        &self.unit
    }
}

impl DaemonController for SystemdController {
    async fn reload(&self) -> Result<()> {
        run_checked("systemctl", &["restart", &self.unit], self.use_sudo).await?;

        let active = run("systemctl", &["is-active", "--quiet", &self.unit], false).await?;
        if !active.status.success() {
            return Err(reload_failed(format!(
                "{} is not active after restart",
                self.unit
            )));
        }

        info!(unit = %self.unit, "restarted wireguard unit");
        Ok(())
    }
}

/// Applies the config to a live interface with `wg syncconf`, leaving
/// existing sessions up. The reload counts as applied only once
/// `wg show <iface> peers` lists every peer in the stripped config.
#[derive(Debug, Clone)]
pub struct SyncConfController {
    interface: String,
    use_sudo: bool,
}

impl SyncConfController {
    /// Controls `interface` (e.g. `wg0`) via `sudo -n wg`.
    #[must_use]
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            use_sudo: true,
        }
    }

    /// Runs `wg` and `wg-quick` directly instead of through `sudo -n`.
    #[must_use]
    pub fn with_sudo(mut self, use_sudo: bool) -> Self {
        self.use_sudo = use_sudo;
        self
    }

    /// Returns the controlled interface.
    #[must_use]
    pub fn interface(&self) -> &str {
        &self.interface
    }
}

impl DaemonController for SyncConfController {
    async fn reload(&self) -> Result<()> {
        let stripped = run_checked("wg-quick", &["strip", &self.interface], self.use_sudo).await?;

        // The stripped config carries the server private key; tempfile
        // creates it owner-only.
        let mut file = tempfile::Builder::new()
            .prefix("wgprov-sync-")
            .tempfile()
            .map_err(|e| reload_failed(format!("temp file: {e}")))?;
        file.write_all(&stripped.stdout)
            .and_then(|()| file.flush())
            .map_err(|e| reload_failed(format!("temp file: {e}")))?;

        let path = file.path().to_string_lossy().into_owned();
        run_checked("wg", &["syncconf", &self.interface, &path], self.use_sudo).await?;
        drop(file);

        let live = run_checked("wg", &["show", &self.interface, "peers"], self.use_sudo).await?;
        let missing = missing_peers(
            &String::from_utf8_lossy(&stripped.stdout),
            &String::from_utf8_lossy(&live.stdout),
        );
        if !missing.is_empty() {
            return Err(reload_failed(format!(
                "{} does not list {} configured peer(s): {}",
                self.interface,
                missing.len(),
                missing.join(", ")
            )));
        }

        info!(interface = %self.interface, "synced wireguard interface");
        Ok(())
    }
}

/// Public keys of `[Peer]` sections in `config` that are absent from `live`,
/// the output of `wg show <iface> peers` (one key per line).
fn missing_peers(config: &str, live: &str) -> Vec<String> {
    let live: HashSet<&str> = live.lines().map(str::trim).collect();
    config
        .lines()
        .map(|line| line.split_once('#').map_or(line, |(content, _)| content))
        .filter_map(|line| line.split_once('='))
        .filter(|(key, _)| key.trim().eq_ignore_ascii_case("PublicKey"))
        .map(|(_, value)| value.trim())
        .filter(|key| !live.contains(key))
        .map(str::to_string)
        .collect()
}

/// Does nothing. For hosts where another agent applies the config.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopController;

impl DaemonController for NoopController {
    async fn reload(&self) -> Result<()> {
        debug!("daemon reload disabled");
        Ok(())
    }
}

/// Counts reloads and optionally fails them.
///
/// Clones share the counter.
#[derive(Debug, Clone, Default)]
pub struct FakeDaemon {
    calls: Arc<AtomicUsize>,
    failure: Option<String>,
}

impl FakeDaemon {
    /// A daemon whose reloads always succeed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A daemon whose reloads always fail with `reason`.
    #[must_use]
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            calls: Arc::default(),
            failure: Some(reason.into()),
        }
    }

    /// Number of reloads requested so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DaemonController for FakeDaemon {
    async fn reload(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(reason) => Err(reload_failed(reason.clone())),
            None => Ok(()),
        }
    }
}
