//! `WireGuard` peer provisioning.
//!
//! Allocates a client address from a fixed IPv4 subnet, generates a fresh
//! keypair, appends the peer to the daemon's `wg-quick` config, reloads the
//! daemon, and renders a ready-to-use client config.
//!
//! # Example
//!
//! ```rust,no_run
//! use wgprov_core::{ProvisionSettings, SystemProvisioner};
//!
//! # async fn example() -> wgprov_core::Result<()> {
//! let settings = ProvisionSettings::from_file("/etc/wgprov.toml")?;
//! let provisioner = SystemProvisioner::from_settings(&settings)?;
//!
//! let peer = provisioner.provision_peer("203.0.113.5").await?;
//! println!("{}", peer.config.as_str());
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! Address allocation is a read-then-append on a shared file. The
//! [`RegistryStore`] lock covers the whole sequence, within a process and
//! across processes sharing the file, so concurrent requests never receive
//! the same address.

pub mod allocator;
pub mod backend;
pub mod error;
pub mod provision;
pub mod reconciler;
pub mod registry;
pub mod render;
pub mod settings;
pub mod store;
pub mod subnet;

pub use allocator::allocate;
pub use backend::{DaemonBackend, KeyBackend, SystemProvisioner};
pub use error::{ErrorKind, ProvisionError, Result};
pub use provision::{PeerSummary, ProvisionedPeer, Provisioner};
pub use reconciler::{
    DaemonController, FakeDaemon, NoopController, ReloadOutcome, SyncConfController,
    SystemdController,
};
pub use registry::{PeerRecord, Registry, RegistryWarning, ServerInfo};
pub use render::{ClientConfig, ClientTemplate, ServerEndpoint, DEFAULT_ENDPOINT_PORT, DEFAULT_FILENAME};
pub use settings::{
    ClientSettings, DaemonMode, DaemonSettings, KeyProviderKind, KeySettings, ProvisionSettings,
    RegistrySettings, SubnetSettings,
};
pub use store::{FileStore, MemoryStore, RegistryStore, StoreLock};
pub use subnet::Subnet;

pub use wgprov_keys as keys;
