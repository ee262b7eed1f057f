//! The provisioning orchestrator.
//!
//! [`Provisioner::provision_peer`] runs one request end to end:
//!
//! 1. validate the server endpoint
//! 2. generate a client keypair
//! 3. under the store lock: read the registry, allocate an address, append
//!    the peer
//! 4. reload the daemon, outside the lock
//! 5. render the client config
//!
//! Nothing is written before step 3, and step 3 commits all or nothing. A
//! reload failure after the commit is reported in the result rather than
//! as an error; the peer stays registered.

use std::net::Ipv4Addr;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use wgprov_keys::{KeyProvider, PublicKey};

use crate::allocator::allocate;
use crate::error::{ProvisionError, Result};
use crate::reconciler::{DaemonController, ReloadOutcome};
use crate::registry::{PeerRecord, ServerInfo};
use crate::render::{ClientConfig, ClientTemplate, ServerEndpoint};
use crate::store::RegistryStore;
use crate::subnet::Subnet;

/// The result of a successful provisioning request.
#[derive(Debug, Clone)]
pub struct ProvisionedPeer {
    /// Address allocated to the peer.
    pub address: Ipv4Addr,
    /// The peer's public key, as registered.
    pub public_key: PublicKey,
    /// The client config, including the peer's private key.
    pub config: ClientConfig,
    /// Whether the daemon picked up the new peer.
    pub reload: ReloadOutcome,
}

/// Summary of a provisioned peer without key material, for logs and JSON.
#[derive(Debug, Clone, Serialize)]
pub struct PeerSummary {
    /// Address allocated to the peer.
    pub address: Ipv4Addr,
    /// The peer's public key.
    pub public_key: PublicKey,
    /// Daemon reload result.
    pub reload: ReloadOutcome,
}

impl From<&ProvisionedPeer> for PeerSummary {
    fn from(peer: &ProvisionedPeer) -> Self {
        Self {
            address: peer.address,
            public_key: peer.public_key,
            reload: peer.reload.clone(),
        }
    }
}

/// Provisions peers against a registry store.
///
/// Safe to share across tasks; concurrent calls serialise on the store's
/// lock only for the read-allocate-append step.
#[derive(Debug)]
pub struct Provisioner<S, K, D> {
    store: Arc<S>,
    keys: K,
    daemon: D,
    subnet: Subnet,
    template: ClientTemplate,
}

impl<S, K, D> Provisioner<S, K, D>
where
    S: RegistryStore + 'static,
    K: KeyProvider,
    D: DaemonController,
{
    /// Creates a provisioner with the default client template.
    #[must_use]
    pub fn new(store: S, keys: K, daemon: D, subnet: Subnet) -> Self {
        Self {
            store: Arc::new(store),
            keys,
            daemon,
            subnet,
            template: ClientTemplate::default(),
        }
    }

    /// Replaces the client template.
    #[must_use]
    pub fn with_template(mut self, template: ClientTemplate) -> Self {
        self.template = template;
        self
    }

    /// Returns the store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the daemon controller.
    #[must_use]
    pub fn daemon(&self) -> &D {
        &self.daemon
    }

    /// Returns the subnet peers are allocated from.
    #[must_use]
    pub const fn subnet(&self) -> &Subnet {
        &self.subnet
    }

    /// Provisions one new peer and renders its client config.
    ///
    /// `server_endpoint` is the host clients should dial, without a port.
    /// Each call provisions a distinct peer; a failed call must be retried
    /// from scratch.
    ///
    /// # Errors
    ///
    /// - [`ProvisionError::InvalidEndpoint`] if `server_endpoint` is not a
    ///   bare host
    /// - [`ProvisionError::KeyGenerationFailed`] if no keypair could be made
    /// - [`ProvisionError::AddressPoolExhausted`] if the subnet is full
    /// - [`ProvisionError::StoreUnavailable`] or
    ///   [`ProvisionError::InvalidRegistry`] if the registry cannot be used
    ///
    /// The registry is unchanged whenever an error is returned.
    pub async fn provision_peer(&self, server_endpoint: &str) -> Result<ProvisionedPeer> {
        let endpoint = ServerEndpoint::parse(server_endpoint)?;
        let keypair = self.keys.generate_keypair().await?;
        let public_key = *keypair.public_key();

        let (address, server) = self.commit(public_key).await?;
        info!(%address, %public_key, "registered peer");

        let reload = match self.daemon.reload().await {
            Ok(()) => ReloadOutcome::Applied,
            Err(err) => {
                warn!(%address, error = %err, "daemon reload failed; peer will apply on next restart");
                let reason = match err {
                    ProvisionError::ReloadFailed { reason } => reason,
                    other => other.to_string(),
                };
                ReloadOutcome::Failed(reason)
            }
        };

        let config = self
            .template
            .render(keypair.private_key(), address, &server.public_key, &endpoint);

        Ok(ProvisionedPeer {
            address,
            public_key,
            config,
            reload,
        })
    }

    /// Returns the peers currently in the registry.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::StoreUnavailable`] or
    /// [`ProvisionError::InvalidRegistry`] if the registry cannot be read.
    pub async fn peers(&self) -> Result<Vec<PeerRecord>> {
        let store = Arc::clone(&self.store);
        let registry = blocking(move || store.read()).await?;
        Ok(registry.peers)
    }

    /// Returns the address the next call would receive, without reserving
    /// it. A concurrent call may take it first.
    ///
    /// # Errors
    ///
    /// As [`Provisioner::peers`], plus
    /// [`ProvisionError::AddressPoolExhausted`].
    pub async fn preview_next_address(&self) -> Result<Ipv4Addr> {
        let store = Arc::clone(&self.store);
        let subnet = self.subnet;
        blocking(move || allocate(&store.read()?, &subnet)).await
    }

    async fn commit(&self, public_key: PublicKey) -> Result<(Ipv4Addr, ServerInfo)> {
        let store = Arc::clone(&self.store);
        let subnet = self.subnet;
        blocking(move || commit_locked(store.as_ref(), &subnet, public_key)).await
    }
}

/// Runs a store operation on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ProvisionError::Task(e.to_string()))?
}

/// The critical section: lock, read, allocate, append.
fn commit_locked<S: RegistryStore + ?Sized>(
    store: &S,
    subnet: &Subnet,
    public_key: PublicKey,
) -> Result<(Ipv4Addr, ServerInfo)> {
    let lock = store.lock()?;
    let registry = store.read()?;
    let address = allocate(&registry, subnet)?;
    debug!(%address, peers = registry.peers.len(), "allocated address");

    store.append_peer(&lock, &PeerRecord { address, public_key })?;
    Ok((address, registry.server))
}
