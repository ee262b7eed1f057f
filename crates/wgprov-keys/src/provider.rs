//! Key providers.
//!
//! A [`KeyProvider`] produces a fresh client keypair per provisioning
//! request. [`NativeKeyProvider`] uses the OS CSPRNG directly;
//! [`WgToolKeyProvider`] delegates to the `wg` command-line tool the way a
//! shell-driven `WireGuard` host would.

use std::future::Future;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::KeyError;
use crate::keys::{KeyPair, PrivateKey, PublicKey};

/// Source of fresh `WireGuard` keypairs.
pub trait KeyProvider: Send + Sync {
    /// Generates a brand-new keypair.
    ///
    /// Implementations must draw from a cryptographically secure source and
    /// must not persist the private key anywhere.
    fn generate_keypair(&self) -> impl Future<Output = Result<KeyPair, KeyError>> + Send;
}

/// Generates keys in-process with `x25519-dalek` and the OS CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeKeyProvider;

impl KeyProvider for NativeKeyProvider {
    async fn generate_keypair(&self) -> Result<KeyPair, KeyError> {
        KeyPair::try_generate()
    }
}

/// Generates keys by running `wg genkey` and `wg pubkey`.
///
/// The private key travels between the two processes over a pipe and is
/// never written to disk.
#[derive(Debug, Clone)]
pub struct WgToolKeyProvider {
    program: String,
}

impl WgToolKeyProvider {
    /// Uses `wg` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_program("wg")
    }

    /// Uses the given `wg` binary.
    #[must_use]
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn genkey(&self) -> Result<PrivateKey, KeyError> {
        let output = Command::new(&self.program)
            .arg("genkey")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| KeyError::GenerationFailed(format!("{} genkey: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(KeyError::GenerationFailed(format!(
                "{} genkey exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        PrivateKey::from_base64(&String::from_utf8_lossy(&output.stdout))
            .map_err(|e| KeyError::GenerationFailed(format!("{} genkey output: {e}", self.program)))
    }

    async fn pubkey(&self, private: &PrivateKey) -> Result<PublicKey, KeyError> {
        let mut child = Command::new(&self.program)
            .arg("pubkey")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| KeyError::GenerationFailed(format!("{} pubkey: {e}", self.program)))?;

        if let Some(mut stdin) = child.stdin.take() {
            let line = format!("{}\n", private.to_base64());
            stdin
                .write_all(line.as_bytes())
                .await
                .map_err(|e| KeyError::GenerationFailed(format!("{} pubkey stdin: {e}", self.program)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| KeyError::GenerationFailed(format!("{} pubkey: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(KeyError::GenerationFailed(format!(
                "{} pubkey exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        PublicKey::from_base64(&String::from_utf8_lossy(&output.stdout))
            .map_err(|e| KeyError::GenerationFailed(format!("{} pubkey output: {e}", self.program)))
    }
}

impl Default for WgToolKeyProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyProvider for WgToolKeyProvider {
    async fn generate_keypair(&self) -> Result<KeyPair, KeyError> {
        let private = self.genkey().await?;
        let public = self.pubkey(&private).await?;

        // Cross-check the tool against our own derivation.
        let pair = KeyPair::from_private_key(private);
        if *pair.public_key() != public {
            return Err(KeyError::GenerationFailed(format!(
                "{} pubkey disagrees with local derivation",
                self.program
            )));
        }

        debug!(public_key = %public, "generated keypair with wg tool");
        Ok(pair)
    }
}

/// Returns a predetermined result. Used to inject keys or failures in tests.
#[derive(Debug, Clone)]
pub struct FixedKeyProvider {
    outcome: Result<PrivateKey, String>,
}

impl FixedKeyProvider {
    /// Always returns the keypair derived from `private`.
    #[must_use]
    pub fn new(private: PrivateKey) -> Self {
        Self { outcome: Ok(private) }
    }

    /// Always fails with [`KeyError::GenerationFailed`].
    #[must_use]
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            outcome: Err(reason.into()),
        }
    }
}

impl KeyProvider for FixedKeyProvider {
    async fn generate_keypair(&self) -> Result<KeyPair, KeyError> {
        match &self.outcome {
            Ok(private) => Ok(KeyPair::from_private_key(private.clone())),
            Err(reason) => Err(KeyError::GenerationFailed(reason.clone())),
        }
    }
}
