//! Settings-selected backends.
//!
//! The provisioner is generic over its key provider and daemon controller.
//! These enums pick a concrete implementation at runtime from
//! [`ProvisionSettings`].

use wgprov_keys::{KeyError, KeyPair, KeyProvider, NativeKeyProvider, WgToolKeyProvider};

use crate::error::Result;
use crate::provision::Provisioner;
use crate::reconciler::{DaemonController, NoopController, SyncConfController, SystemdController};
use crate::settings::{DaemonMode, DaemonSettings, KeyProviderKind, KeySettings, ProvisionSettings};
use crate::store::FileStore;

/// A key provider chosen by [`KeySettings`].
#[derive(Debug, Clone)]
pub enum KeyBackend {
    /// See [`NativeKeyProvider`].
    Native(NativeKeyProvider),
    /// See [`WgToolKeyProvider`].
    WgTool(WgToolKeyProvider),
}

impl KeyBackend {
    /// Builds the configured provider.
    #[must_use]
    pub fn from_settings(settings: &KeySettings) -> Self {
        match settings.provider {
            KeyProviderKind::Native => Self::Native(NativeKeyProvider),
            KeyProviderKind::WgTool => Self::WgTool(WgToolKeyProvider::new()),
        }
    }
}

impl KeyProvider for KeyBackend {
    async fn generate_keypair(&self) -> std::result::Result<KeyPair, KeyError> {
        match self {
            Self::Native(provider) => provider.generate_keypair().await,
            Self::WgTool(provider) => provider.generate_keypair().await,
        }
    }
}

/// A daemon controller chosen by [`DaemonSettings`].
#[derive(Debug, Clone)]
pub enum DaemonBackend {
    /// See [`SystemdController`].
    Systemd(SystemdController),
    /// See [`SyncConfController`].
    SyncConf(SyncConfController),
    /// See [`NoopController`].
    Noop(NoopController),
}

impl DaemonBackend {
    /// Builds the configured controller.
    #[must_use]
    pub fn from_settings(settings: &DaemonSettings) -> Self {
        match settings.mode {
            DaemonMode::Restart => Self::Systemd(
                SystemdController::new(&settings.unit).with_sudo(settings.use_sudo),
            ),
            DaemonMode::Syncconf => Self::SyncConf(
                SyncConfController::new(&settings.interface).with_sudo(settings.use_sudo),
            ),
            DaemonMode::None => Self::Noop(NoopController),
        }
    }
}

impl DaemonController for DaemonBackend {
    async fn reload(&self) -> Result<()> {
        match self {
            Self::Systemd(ctl) => ctl.reload().await,
            Self::SyncConf(ctl) => ctl.reload().await,
            Self::Noop(ctl) => ctl.reload().await,
        }
    }
}

/// A provisioner wired to the host's registry file and tools.
pub type SystemProvisioner = Provisioner<FileStore, KeyBackend, DaemonBackend>;

impl SystemProvisioner {
    /// Builds a provisioner from validated settings.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ProvisionError::Config`] if the settings are invalid.
    pub fn from_settings(settings: &ProvisionSettings) -> Result<Self> {
        settings.validate()?;
        let subnet = settings.subnet()?;
        let store = FileStore::from_settings(&settings.registry, subnet);

        Ok(Provisioner::new(
            store,
            KeyBackend::from_settings(&settings.keys),
            DaemonBackend::from_settings(&settings.daemon),
            subnet,
        )
        .with_template(settings.client.template()))
    }
}
