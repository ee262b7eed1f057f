//! The peer registry.
//!
//! The registry is the daemon's own `wg-quick` configuration file: one
//! `[Interface]` section describing the server and one `[Peer]` section per
//! provisioned client. Reading is lenient: entries that cannot be
//! interpreted are reported as [`RegistryWarning`]s and skipped, never
//! fatal, since the file may be edited out-of-band.

use std::fmt::Write as FmtWrite;
use std::net::{IpAddr, Ipv4Addr};

use ipnet::Ipv4Net;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use wgprov_keys::{PrivateKey, PublicKey};

use crate::error::{ProvisionError, Result};
use crate::subnet::Subnet;

/// One provisioned peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PeerRecord {
    /// The peer's address inside the subnet.
    pub address: Ipv4Addr,
    /// The peer's public key.
    pub public_key: PublicKey,
}

impl PeerRecord {
    /// Renders the `[Peer]` stanza appended to the registry for this record.
    #[must_use]
    pub fn to_stanza(&self) -> String {
        let mut output = String::new();
        output.push_str("[Peer]\n");
        let _ = writeln!(output, "PublicKey = {}", self.public_key.to_base64());
        let _ = writeln!(output, "AllowedIPs = {}/32", self.address);
        output
    }
}

/// Server metadata taken from the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    /// The server's public key, embedded in every client config.
    pub public_key: PublicKey,
    /// `ListenPort` from `[Interface]`, if set.
    pub listen_port: Option<u16>,
    /// First IPv4 `Address` from `[Interface]`, if set.
    pub address: Option<Ipv4Net>,
}

/// A registry entry that was skipped while reading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryWarning {
    /// A value could not be interpreted.
    #[error("malformed registry entry at line {line}: {value:?} ({reason})")]
    MalformedEntry {
        /// 1-based line number.
        line: usize,
        /// The offending text.
        value: String,
        /// Why it was skipped.
        reason: String,
    },

    /// An address outside the provisioning subnet.
    #[error("address {address} at line {line} is outside the subnet")]
    OutsideSubnet {
        /// 1-based line number.
        line: usize,
        /// The address.
        address: Ipv4Addr,
    },
}

/// A parsed registry snapshot.
#[derive(Debug, Clone)]
pub struct Registry {
    /// Server metadata.
    pub server: ServerInfo,
    /// Well-formed peers, in file order.
    pub peers: Vec<PeerRecord>,
    /// In-subnet addresses that are in use but not the primary address of a
    /// well-formed peer (extra `AllowedIPs` items, peers with a bad key).
    pub other_used: Vec<Ipv4Addr>,
    /// Entries skipped while reading.
    pub warnings: Vec<RegistryWarning>,
}

impl Registry {
    /// Every in-subnet address referenced by the registry.
    pub fn used_addresses(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.peers
            .iter()
            .map(|p| p.address)
            .chain(self.other_used.iter().copied())
    }

    /// Returns `true` if `address` is already referenced.
    #[must_use]
    pub fn is_used(&self, address: Ipv4Addr) -> bool {
        self.used_addresses().any(|a| a == address)
    }

    /// Parses registry text.
    ///
    /// The server public key is `server_key` when given, otherwise it is
    /// derived from `[Interface] PrivateKey`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidRegistry`] if no server public key
    /// can be determined.
    pub fn parse(text: &str, subnet: &Subnet, server_key: Option<PublicKey>) -> Result<Self> {
        let mut parser = Parser::new(subnet);
        for (index, line) in text.lines().enumerate() {
            parser.line(index + 1, line);
        }
        parser.finish(server_key)
    }
}

/// Parser state for configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Interface,
    Peer,
    Other,
}

/// A `[Peer]` section being accumulated.
#[derive(Default)]
struct ParsedPeer {
    line: usize,
    public_key: Option<PublicKey>,
    addresses: Vec<Ipv4Addr>,
}

struct Parser<'a> {
    subnet: &'a Subnet,
    section: Section,
    private_key: Option<PrivateKey>,
    listen_port: Option<u16>,
    address: Option<Ipv4Net>,
    current_peer: Option<ParsedPeer>,
    peers: Vec<PeerRecord>,
    other_used: Vec<Ipv4Addr>,
    warnings: Vec<RegistryWarning>,
}

impl<'a> Parser<'a> {
    fn new(subnet: &'a Subnet) -> Self {
        Self {
            subnet,
            section: Section::None,
            private_key: None,
            listen_port: None,
            address: None,
            current_peer: None,
            peers: Vec::new(),
            other_used: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn malformed(&mut self, line: usize, value: &str, reason: impl Into<String>) {
        let warning = RegistryWarning::MalformedEntry {
            line,
            value: value.to_string(),
            reason: reason.into(),
        };
        warn!(%warning, "skipping registry entry");
        self.warnings.push(warning);
    }

    fn line(&mut self, line_number: usize, raw: &str) {
        // wg-quick drops everything after `#`; base64 keys never contain it.
        let line = raw.split_once('#').map_or(raw, |(content, _)| content).trim();
        if line.is_empty() {
            return;
        }

        if line.starts_with('[') && line.ends_with(']') {
            self.close_peer();
            let name = &line[1..line.len() - 1];
            self.section = if name.eq_ignore_ascii_case("Interface") {
                Section::Interface
            } else if name.eq_ignore_ascii_case("Peer") {
                self.current_peer = Some(ParsedPeer {
                    line: line_number,
                    ..ParsedPeer::default()
                });
                Section::Peer
            } else {
                debug!(line = line_number, section = name, "ignoring unknown section");
                Section::Other
            };
            return;
        }

        let Some((key, value)) = line.split_once('=') else {
            if matches!(self.section, Section::Interface | Section::Peer) {
                self.malformed(line_number, line, "expected `Key = Value`");
            }
            return;
        };
        let (key, value) = (key.trim(), value.trim());

        if key.eq_ignore_ascii_case("AllowedIPs") && self.section != Section::Peer {
            self.stray_allowed_ips(line_number, value);
            return;
        }

        match self.section {
            Section::Interface => self.interface_key(line_number, key, value),
            Section::Peer => self.peer_key(line_number, key, value),
            Section::None | Section::Other => {}
        }
    }

    fn interface_key(&mut self, line_number: usize, key: &str, value: &str) {
        if key.eq_ignore_ascii_case("PrivateKey") {
            match PrivateKey::from_base64(value) {
                Ok(k) => self.private_key = Some(k),
                // Never echo the private key text into a warning.
                Err(e) => self.malformed(line_number, "PrivateKey = <redacted>", e.to_string()),
            }
        } else if key.eq_ignore_ascii_case("ListenPort") {
            match value.parse() {
                Ok(port) => self.listen_port = Some(port),
                Err(_) => self.malformed(line_number, value, "invalid ListenPort"),
            }
        } else if key.eq_ignore_ascii_case("Address") && self.address.is_none() {
            self.address = value
                .split(',')
                .find_map(|item| item.trim().parse::<Ipv4Net>().ok());
        }
    }

    fn peer_key(&mut self, line_number: usize, key: &str, value: &str) {
        if key.eq_ignore_ascii_case("PublicKey") {
            match PublicKey::from_base64(value) {
                Ok(k) => {
                    if let Some(peer) = self.current_peer.as_mut() {
                        peer.public_key = Some(k);
                    }
                }
                Err(e) => self.malformed(line_number, value, e.to_string()),
            }
        } else if key.eq_ignore_ascii_case("AllowedIPs") {
            for item in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                if let Some(address) = self.allowed_ip(line_number, item) {
                    if let Some(peer) = self.current_peer.as_mut() {
                        peer.addresses.push(address);
                    }
                }
            }
        }
    }

    /// `AllowedIPs` outside a `[Peer]` section. Not a peer, but the address
    /// may still be routed by the daemon, so it is never handed out.
    fn stray_allowed_ips(&mut self, line_number: usize, value: &str) {
        let warning = RegistryWarning::MalformedEntry {
            line: line_number,
            value: format!("AllowedIPs = {value}"),
            reason: "outside a [Peer] section".to_string(),
        };
        warn!(%warning, "counting addresses as in use");
        self.warnings.push(warning);

        for item in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if let Some(address) = self.allowed_ip(line_number, item) {
                self.other_used.push(address);
            }
        }
    }

    /// Interprets one `AllowedIPs` item, returning it if it is an in-subnet
    /// IPv4 address.
    fn allowed_ip(&mut self, line_number: usize, item: &str) -> Option<Ipv4Addr> {
        let host = item.split_once('/').map_or(item, |(host, _)| host).trim();
        match host.parse::<IpAddr>() {
            Ok(IpAddr::V4(address)) => {
                if self.subnet.host_offset(address).is_some() {
                    Some(address)
                } else {
                    let warning = RegistryWarning::OutsideSubnet {
                        line: line_number,
                        address,
                    };
                    debug!(%warning, "ignoring address");
                    self.warnings.push(warning);
                    None
                }
            }
            Ok(IpAddr::V6(_)) => None,
            Err(e) => {
                self.malformed(line_number, item, format!("not an IPv4 address: {e}"));
                None
            }
        }
    }

    fn close_peer(&mut self) {
        let Some(peer) = self.current_peer.take() else {
            return;
        };
        let mut addresses = peer.addresses.into_iter();
        match (peer.public_key, addresses.next()) {
            (Some(public_key), Some(address)) => {
                self.peers.push(PeerRecord {
                    address,
                    public_key,
                });
            }
            (None, Some(address)) => {
                self.malformed(peer.line, "[Peer]", "missing or invalid PublicKey");
                self.other_used.push(address);
            }
            (_, None) => {
                debug!(line = peer.line, "peer has no address in the subnet");
            }
        }
        self.other_used.extend(addresses);
    }

    fn finish(mut self, server_key: Option<PublicKey>) -> Result<Registry> {
        self.close_peer();

        let derived = self.private_key.as_ref().map(PrivateKey::public_key);
        let public_key = match (server_key, derived) {
            (Some(given), Some(derived)) if given != derived => {
                warn!(
                    configured = %given,
                    derived = %derived,
                    "server public key does not match [Interface] PrivateKey; using configured key"
                );
                given
            }
            (Some(key), _) | (None, Some(key)) => key,
            (None, None) => {
                return Err(ProvisionError::InvalidRegistry(
                    "no server public key: provide a public key file or an [Interface] PrivateKey"
                        .to_string(),
                ));
            }
        };

        Ok(Registry {
            server: ServerInfo {
                public_key,
                listen_port: self.listen_port,
                address: self.address,
            },
            peers: self.peers,
            other_used: self.other_used,
            warnings: self.warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER_PRIVATE: &str = "dwdtCnMYpX08FsFyUbJmRd9ML4frwJkqsXf7pR25LCo=";
    const SERVER_PUBLIC: &str = "hSDwCYkwp1R0i33ctD73Wg2/Og0mOBr066SpjqqbTmo=";

    fn subnet() -> Subnet {
        "192.168.77.0/24".parse().expect("valid subnet")
    }

    fn peer_key(byte: u8) -> PublicKey {
        PublicKey::from_bytes_array([byte; 32])
    }

    fn interface() -> String {
        format!(
            "[Interface]\nAddress = 192.168.77.1/24\nListenPort = 51820\nPrivateKey = {SERVER_PRIVATE}\n"
        )
    }

    #[test]
    fn parse_interface_only() {
        let registry = Registry::parse(&interface(), &subnet(), None).expect("parse");

        assert!(registry.peers.is_empty());
        assert_eq!(registry.server.public_key.to_base64(), SERVER_PUBLIC);
        assert_eq!(registry.server.listen_port, Some(51820));
        assert_eq!(
            registry.server.address,
            Some("192.168.77.1/24".parse().expect("cidr"))
        );
    }

    #[test]
    fn parse_peers_in_file_order() {
        let text = format!(
            "{}\n[Peer]\nPublicKey = {}\nAllowedIPs = 192.168.77.5/32\n\n[Peer]\nPublicKey = {}\nAllowedIPs = 192.168.77.3/32\n",
            interface(),
            peer_key(1),
            peer_key(2)
        );
        let registry = Registry::parse(&text, &subnet(), None).expect("parse");

        assert_eq!(
            registry.peers,
            vec![
                PeerRecord { address: Ipv4Addr::new(192, 168, 77, 5), public_key: peer_key(1) },
                PeerRecord { address: Ipv4Addr::new(192, 168, 77, 3), public_key: peer_key(2) },
            ]
        );
        assert!(registry.warnings.is_empty());
    }

    #[test]
    fn non_numeric_octet_is_skipped_with_warning() {
        let text = format!(
            "{}\n[Peer]\nPublicKey = {}\nAllowedIPs = 192.168.77.x/32\n\n[Peer]\nPublicKey = {}\nAllowedIPs = 192.168.77.4/32\n",
            interface(),
            peer_key(1),
            peer_key(2)
        );
        let registry = Registry::parse(&text, &subnet(), None).expect("parse");

        assert_eq!(registry.peers.len(), 1);
        assert_eq!(registry.peers[0].address, Ipv4Addr::new(192, 168, 77, 4));
        assert!(matches!(
            registry.warnings.as_slice(),
            [RegistryWarning::MalformedEntry { line: 8, .. }]
        ));
    }

    #[test]
    fn peer_with_bad_key_still_reserves_its_address() {
        let text = format!(
            "{}\n[Peer]\nPublicKey = garbage\nAllowedIPs = 192.168.77.9/32\n",
            interface()
        );
        let registry = Registry::parse(&text, &subnet(), None).expect("parse");

        assert!(registry.peers.is_empty());
        assert!(registry.is_used(Ipv4Addr::new(192, 168, 77, 9)));
        assert_eq!(registry.warnings.len(), 2);
    }

    #[test]
    fn extra_allowed_ips_items_count_as_used() {
        let text = format!(
            "{}\n[Peer]\nPublicKey = {}\nAllowedIPs = 192.168.77.2/32, 192.168.77.40/32, 10.1.0.0/16, fd00::2/128\n",
            interface(),
            peer_key(1)
        );
        let registry = Registry::parse(&text, &subnet(), None).expect("parse");

        assert_eq!(registry.peers[0].address, Ipv4Addr::new(192, 168, 77, 2));
        assert_eq!(registry.other_used, vec![Ipv4Addr::new(192, 168, 77, 40)]);
        assert!(matches!(
            registry.warnings.as_slice(),
            [RegistryWarning::OutsideSubnet { .. }]
        ));
    }

    #[test]
    fn comments_and_case_insensitive_keys() {
        let text = format!(
            "# managed by wgprov\n{}\n[peer]\n# laptop\npublickey = {}\nallowedips = 192.168.77.7/32\n",
            interface(),
            peer_key(3)
        );
        let registry = Registry::parse(&text, &subnet(), None).expect("parse");
        assert_eq!(registry.peers.len(), 1);
    }

    #[test]
    fn section_header_with_trailing_comment() {
        let text = format!(
            "{}\n[Peer] # alice\nPublicKey = {} # laptop\nAllowedIPs = 192.168.77.2/32\n",
            interface(),
            peer_key(1)
        );
        let registry = Registry::parse(&text, &subnet(), None).expect("parse");

        assert_eq!(
            registry.peers,
            vec![PeerRecord { address: Ipv4Addr::new(192, 168, 77, 2), public_key: peer_key(1) }]
        );
        assert!(registry.warnings.is_empty());
    }

    #[test]
    fn bare_address_with_inline_comment() {
        let text = format!(
            "{}\n[Peer]\nPublicKey = {}\nAllowedIPs = 192.168.77.9 # phone\n",
            interface(),
            peer_key(1)
        );
        let registry = Registry::parse(&text, &subnet(), None).expect("parse");

        assert_eq!(registry.peers[0].address, Ipv4Addr::new(192, 168, 77, 9));
        assert!(registry.warnings.is_empty());
    }

    #[test]
    fn allowed_ips_outside_peer_section_count_as_used() {
        let text = format!(
            "AllowedIPs = 192.168.77.30/32\n{}AllowedIPs = 192.168.77.20/32, 10.0.0.0/8\n\n[Tunnel]\nAllowedIPs = 192.168.77.25/32\n",
            interface()
        );
        let registry = Registry::parse(&text, &subnet(), None).expect("parse");

        assert!(registry.peers.is_empty());
        assert_eq!(
            registry.other_used,
            vec![
                Ipv4Addr::new(192, 168, 77, 30),
                Ipv4Addr::new(192, 168, 77, 20),
                Ipv4Addr::new(192, 168, 77, 25),
            ]
        );
    }

    #[test]
    fn server_key_file_takes_precedence() {
        let given = peer_key(9);
        let registry = Registry::parse(&interface(), &subnet(), Some(given)).expect("parse");
        assert_eq!(registry.server.public_key, given);
    }

    #[test]
    fn missing_server_key_is_invalid_registry() {
        let err = Registry::parse("[Interface]\nListenPort = 51820\n", &subnet(), None)
            .expect_err("should fail");
        assert!(matches!(err, ProvisionError::InvalidRegistry(_)));
    }

    #[test]
    fn malformed_private_key_is_not_echoed() {
        let registry = Registry::parse("[Interface]\nPrivateKey = s3cr3t\n", &subnet(), Some(peer_key(1)))
            .expect("parse with key file");
        assert_eq!(registry.warnings.len(), 1);
        assert!(registry.warnings.iter().all(|w| !w.to_string().contains("s3cr3t")));
    }

    #[test]
    fn stanza_format() {
        let record = PeerRecord {
            address: Ipv4Addr::new(192, 168, 77, 2),
            public_key: peer_key(1),
        };
        assert_eq!(
            record.to_stanza(),
            format!("[Peer]\nPublicKey = {}\nAllowedIPs = 192.168.77.2/32\n", peer_key(1))
        );
    }
}
