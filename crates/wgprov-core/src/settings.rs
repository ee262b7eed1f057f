//! Provisioning settings.
//!
//! Loaded from TOML. Every section is optional; the defaults describe a
//! single `wg0` server on `192.168.77.0/24` managed by `wg-quick` under
//! systemd.
//!
//! ```toml
//! [subnet]
//! cidr = "192.168.77.0/24"
//!
//! [registry]
//! config_path = "/etc/wireguard/wg0.conf"
//! server_public_key_path = "/etc/wireguard/public.key"
//!
//! [client]
//! dns = ["192.168.77.1", "8.8.8.8"]
//! endpoint_port = 21210
//!
//! [daemon]
//! mode = "restart"
//! unit = "wg-quick@wg0.service"
//!
//! [keys]
//! provider = "native"
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use ipnet::{IpNet, Ipv4Net};
use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, Result};
use crate::render::{ClientTemplate, DEFAULT_ENDPOINT_PORT};
use crate::subnet::Subnet;

/// The address block peers are allocated from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SubnetSettings {
    /// IPv4 CIDR. The first host is the server.
    pub cidr: Ipv4Net,
}

impl Default for SubnetSettings {
    fn default() -> Self {
        Self {
            cidr: Ipv4Net::new(Ipv4Addr::new(192, 168, 77, 0), 24).unwrap_or_default(),
        }
    }
}

/// Where the registry lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegistrySettings {
    /// The daemon's `wg-quick` config, which doubles as the registry.
    pub config_path: PathBuf,
    /// File holding the server public key. When absent the key is derived
    /// from the registry's `PrivateKey`.
    pub server_public_key_path: Option<PathBuf>,
    /// Lock file. Defaults to `<config_path>.lock`.
    pub lock_path: Option<PathBuf>,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("/etc/wireguard/wg0.conf"),
            server_public_key_path: Some(PathBuf::from("/etc/wireguard/public.key")),
            lock_path: None,
        }
    }
}

/// Policy values rendered into client configs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientSettings {
    /// Resolvers pushed to clients.
    pub dns: Vec<IpAddr>,
    /// Routes sent through the tunnel.
    pub allowed_ips: Vec<IpNet>,
    /// Server port clients connect to.
    pub endpoint_port: u16,
    /// Keepalive interval in seconds.
    pub persistent_keepalive: Option<u16>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        let template = ClientTemplate::default();
        Self {
            dns: template.dns,
            allowed_ips: template.allowed_ips,
            endpoint_port: DEFAULT_ENDPOINT_PORT,
            persistent_keepalive: None,
        }
    }
}

impl ClientSettings {
    /// Builds the render template.
    #[must_use]
    pub fn template(&self) -> ClientTemplate {
        ClientTemplate {
            dns: self.dns.clone(),
            allowed_ips: self.allowed_ips.clone(),
            endpoint_port: self.endpoint_port,
            persistent_keepalive: self.persistent_keepalive,
        }
    }
}

/// How the daemon is told about new peers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DaemonMode {
    /// `systemctl restart <unit>`.
    #[default]
    Restart,
    /// `wg syncconf <interface>`, keeping existing sessions.
    Syncconf,
    /// Leave the daemon alone.
    None,
}

/// Daemon control settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DaemonSettings {
    /// Reload strategy.
    pub mode: DaemonMode,
    /// systemd unit for [`DaemonMode::Restart`].
    pub unit: String,
    /// Interface for [`DaemonMode::Syncconf`].
    pub interface: String,
    /// Prefix privileged commands with `sudo -n`.
    pub use_sudo: bool,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            mode: DaemonMode::Restart,
            unit: "wg-quick@wg0.service".to_string(),
            interface: "wg0".to_string(),
            use_sudo: true,
        }
    }
}

/// Key generation backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum KeyProviderKind {
    /// In-process generation.
    #[default]
    Native,
    /// The `wg genkey` / `wg pubkey` tools.
    WgTool,
}

/// Key generation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KeySettings {
    /// Which backend generates client keys.
    pub provider: KeyProviderKind,
}

/// Complete provisioning settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProvisionSettings {
    /// Address block.
    pub subnet: SubnetSettings,
    /// Registry location.
    pub registry: RegistrySettings,
    /// Client config policy.
    pub client: ClientSettings,
    /// Daemon control.
    pub daemon: DaemonSettings,
    /// Key generation.
    pub keys: KeySettings,
}

impl ProvisionSettings {
    /// Loads settings from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Config`] if the file cannot be read, is not
    /// valid TOML, or fails validation.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ProvisionError::Config(format!(
                "failed to read settings file '{}': {e}",
                path.as_ref().display()
            ))
        })?;

        Self::from_toml(&content)
    }

    /// Parses settings from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Config`] if the TOML is invalid or fails
    /// validation.
    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Self = toml::from_str(content)
            .map_err(|e| ProvisionError::Config(format!("invalid TOML: {e}")))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.subnet()?;

        if self.registry.config_path.as_os_str().is_empty() {
            return Err(ProvisionError::Config(
                "registry.config_path cannot be empty".to_string(),
            ));
        }

        if self.client.dns.is_empty() {
            return Err(ProvisionError::Config(
                "client.dns must list at least one resolver".to_string(),
            ));
        }
        if self.client.allowed_ips.is_empty() {
            return Err(ProvisionError::Config(
                "client.allowed_ips must list at least one network".to_string(),
            ));
        }
        if self.client.endpoint_port == 0 {
            return Err(ProvisionError::Config(
                "client.endpoint_port cannot be 0".to_string(),
            ));
        }
        if self.client.persistent_keepalive == Some(0) {
            return Err(ProvisionError::Config(
                "client.persistent_keepalive must be positive; omit it to disable".to_string(),
            ));
        }

        match self.daemon.mode {
            DaemonMode::Restart if self.daemon.unit.trim().is_empty() => {
                return Err(ProvisionError::Config(
                    "daemon.unit cannot be empty in restart mode".to_string(),
                ));
            }
            DaemonMode::Syncconf if self.daemon.interface.trim().is_empty() => {
                return Err(ProvisionError::Config(
                    "daemon.interface cannot be empty in syncconf mode".to_string(),
                ));
            }
            _ => {}
        }

        Ok(())
    }

    /// Returns the validated subnet.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Config`] if the prefix is out of range.
    pub fn subnet(&self) -> Result<Subnet> {
        Subnet::new(self.subnet.cidr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use test_case::test_case;

    #[test]
    fn empty_toml_gives_defaults() {
        let settings = ProvisionSettings::from_toml("").expect("defaults are valid");
        assert_eq!(settings, ProvisionSettings::default());
        assert_eq!(settings.subnet.cidr.to_string(), "192.168.77.0/24");
        assert_eq!(settings.client.endpoint_port, 21210);
        assert_eq!(settings.daemon.mode, DaemonMode::Restart);
        assert_eq!(settings.keys.provider, KeyProviderKind::Native);
        assert_eq!(
            settings.registry.config_path,
            PathBuf::from("/etc/wireguard/wg0.conf")
        );
    }

    #[test]
    fn parses_full_file() {
        let toml = r#"
            [subnet]
            cidr = "10.8.0.0/16"

            [registry]
            config_path = "/srv/wg/wg1.conf"
            lock_path = "/run/wgprov.lock"

            [client]
            dns = ["10.8.0.1"]
            allowed_ips = ["10.8.0.0/16", "fd00::/64"]
            endpoint_port = 51820
            persistent_keepalive = 25

            [daemon]
            mode = "syncconf"
            interface = "wg1"
            use_sudo = false

            [keys]
            provider = "wg-tool"
        "#;
        let settings = ProvisionSettings::from_toml(toml).expect("valid settings");
        assert_eq!(settings.subnet().expect("subnet").peer_capacity(), 65_533);
        assert_eq!(settings.registry.server_public_key_path, Some(PathBuf::from("/etc/wireguard/public.key")));
        assert_eq!(settings.registry.lock_path, Some(PathBuf::from("/run/wgprov.lock")));
        assert_eq!(settings.client.template().allowed_ips.len(), 2);
        assert_eq!(settings.client.persistent_keepalive, Some(25));
        assert_eq!(settings.daemon.mode, DaemonMode::Syncconf);
        assert!(!settings.daemon.use_sudo);
        assert_eq!(settings.keys.provider, KeyProviderKind::WgTool);
    }

    #[test_case("[subnet]\ncidr = \"10.0.0.0/31\"" ; "prefix too long")]
    #[test_case("[subnet]\ncidr = \"fd00::/64\"" ; "ipv6 subnet")]
    #[test_case("[client]\ndns = []" ; "no dns")]
    #[test_case("[client]\ndns = [\"not-an-ip\"]" ; "bad dns")]
    #[test_case("[client]\nallowed_ips = []" ; "no allowed ips")]
    #[test_case("[client]\nendpoint_port = 0" ; "zero port")]
    #[test_case("[client]\npersistent_keepalive = 0" ; "zero keepalive")]
    #[test_case("[daemon]\nunit = \"\"" ; "empty unit")]
    #[test_case("[daemon]\nmode = \"syncconf\"\ninterface = \" \"" ; "empty interface")]
    #[test_case("[daemon]\nmode = \"reboot\"" ; "unknown mode")]
    #[test_case("[keys]\nprovider = \"hsm\"" ; "unknown provider")]
    fn invalid_settings_rejected(toml: &str) {
        assert!(matches!(
            ProvisionSettings::from_toml(toml),
            Err(ProvisionError::Config(_))
        ));
    }

    #[test]
    fn empty_unit_allowed_when_not_restarting() {
        let settings = ProvisionSettings::from_toml("[daemon]\nmode = \"none\"\nunit = \"\"");
        assert!(settings.is_ok());
    }

    #[test]
    fn from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[client]\nendpoint_port = 443").expect("write");

        let settings = ProvisionSettings::from_file(file.path()).expect("load");
        assert_eq!(settings.client.endpoint_port, 443);
    }

    #[test]
    fn from_file_missing_is_config_error() {
        let err = ProvisionSettings::from_file("/nonexistent/wgprov.toml").expect_err("should fail");
        assert!(err.to_string().contains("failed to read settings file"));
    }
}
