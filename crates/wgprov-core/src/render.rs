//! Client configuration rendering.

use std::fmt;
use std::fmt::Write as _;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::IpNet;
use wgprov_keys::{PrivateKey, PublicKey};

use crate::error::{ProvisionError, Result};

/// Suggested file name when a client config is offered for download.
pub const DEFAULT_FILENAME: &str = "open-devsecops-vpn.conf";

/// Port clients connect to unless configured otherwise.
pub const DEFAULT_ENDPOINT_PORT: u16 = 21210;

const MAX_HOSTNAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// The server's public host, as clients should dial it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEndpoint {
    /// An IPv4 literal.
    V4(Ipv4Addr),
    /// An IPv6 literal. Rendered in brackets.
    V6(Ipv6Addr),
    /// A DNS name.
    Name(String),
}

impl ServerEndpoint {
    /// Validates a host supplied by the caller.
    ///
    /// Accepts IPv4 and IPv6 literals (IPv6 optionally bracketed) and DNS
    /// names. A port is not allowed; the configured endpoint port is added
    /// at render time.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidEndpoint`] for anything else.
    pub fn parse(input: &str) -> Result<Self> {
        let host = input.trim();
        let invalid = |reason: &str| ProvisionError::InvalidEndpoint {
            endpoint: input.to_string(),
            reason: reason.to_string(),
        };

        if host.is_empty() {
            return Err(invalid("empty host"));
        }

        let unbracketed = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if let Ok(ip) = unbracketed.parse::<IpAddr>() {
            return Ok(match ip {
                IpAddr::V4(v4) => Self::V4(v4),
                IpAddr::V6(v6) => Self::V6(v6),
            });
        }

        if host.contains(':') {
            return Err(invalid("must be a bare host without a port"));
        }
        if host.len() > MAX_HOSTNAME_LEN {
            return Err(invalid("host name too long"));
        }
        let name = host.strip_suffix('.').unwrap_or(host);
        for label in name.split('.') {
            if label.is_empty() || label.len() > MAX_LABEL_LEN {
                return Err(invalid("bad host name label length"));
            }
            if label.starts_with('-') || label.ends_with('-') {
                return Err(invalid("host name label starts or ends with '-'"));
            }
            if !label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
                return Err(invalid("host name contains invalid characters"));
            }
        }
        // All-numeric dotted names are mistyped IPv4 addresses.
        if name.split('.').all(|l| l.bytes().all(|b| b.is_ascii_digit())) {
            return Err(invalid("not a valid IPv4 address"));
        }

        Ok(Self::Name(name.to_ascii_lowercase()))
    }
}

impl fmt::Display for ServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4(ip) => write!(f, "{ip}"),
            Self::V6(ip) => write!(f, "[{ip}]"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

/// Fixed policy values embedded in every client config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientTemplate {
    /// Resolvers pushed to the client.
    pub dns: Vec<IpAddr>,
    /// Routes sent through the tunnel.
    pub allowed_ips: Vec<IpNet>,
    /// Server port appended to the endpoint host.
    pub endpoint_port: u16,
    /// Keepalive interval in seconds, if any.
    pub persistent_keepalive: Option<u16>,
}

impl Default for ClientTemplate {
    fn default() -> Self {
        Self {
            dns: vec![
                IpAddr::V4(Ipv4Addr::new(192, 168, 77, 1)),
                IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
            ],
            allowed_ips: vec![IpNet::V4(ipnet::Ipv4Net::default())],
            endpoint_port: DEFAULT_ENDPOINT_PORT,
            persistent_keepalive: None,
        }
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl ClientTemplate {
    /// Renders a client config for one peer.
    #[must_use]
    pub fn render(
        &self,
        private_key: &PrivateKey,
        address: Ipv4Addr,
        server_key: &PublicKey,
        endpoint: &ServerEndpoint,
    ) -> ClientConfig {
        let mut text = String::with_capacity(256);
        // Writing to a String cannot fail.
        let _ = writeln!(text, "[Interface]");
        let _ = writeln!(text, "PrivateKey = {}", private_key.to_base64());
        let _ = writeln!(text, "Address = {address}/32");
        let _ = writeln!(text, "DNS = {}", join(&self.dns));
        let _ = writeln!(text);
        let _ = writeln!(text, "[Peer]");
        let _ = writeln!(text, "PublicKey = {server_key}");
        let _ = writeln!(text, "AllowedIPs = {}", join(&self.allowed_ips));
        let _ = writeln!(text, "Endpoint = {endpoint}:{}", self.endpoint_port);
        if let Some(keepalive) = self.persistent_keepalive {
            let _ = writeln!(text, "PersistentKeepalive = {keepalive}");
        }
        ClientConfig { text }
    }
}

/// A rendered client config. Contains the client's private key.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    text: String,
}

impl ClientConfig {
    /// Returns the config text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Consumes the config, returning its text.
    #[must_use]
    pub fn into_string(self) -> String {
        self.text
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("text", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const CLIENT_PRIVATE: &str = "dwdtCnMYpX08FsFyUbJmRd9ML4frwJkqsXf7pR25LCo=";

    #[test_case("203.0.113.5", "203.0.113.5" ; "ipv4")]
    #[test_case(" 203.0.113.5\n", "203.0.113.5" ; "ipv4 with whitespace")]
    #[test_case("2001:db8::1", "[2001:db8::1]" ; "ipv6")]
    #[test_case("[2001:db8::1]", "[2001:db8::1]" ; "bracketed ipv6")]
    #[test_case("VPN.Example.com", "vpn.example.com" ; "dns name")]
    #[test_case("vpn.example.com.", "vpn.example.com" ; "fqdn trailing dot")]
    fn valid_endpoints(input: &str, rendered: &str) {
        let endpoint = ServerEndpoint::parse(input).expect("valid endpoint");
        assert_eq!(endpoint.to_string(), rendered);
    }

    #[test_case("" ; "empty")]
    #[test_case("   " ; "blank")]
    #[test_case("203.0.113.5:21210" ; "with port")]
    #[test_case("256.1.1.1" ; "bad octet")]
    #[test_case("-vpn.example.com" ; "leading hyphen")]
    #[test_case("vpn..example.com" ; "empty label")]
    #[test_case("vpn_example.com" ; "underscore")]
    #[test_case("http://vpn.example.com" ; "url")]
    fn invalid_endpoints(input: &str) {
        assert!(matches!(
            ServerEndpoint::parse(input),
            Err(ProvisionError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn renders_default_template() {
        let private = PrivateKey::from_base64(CLIENT_PRIVATE).expect("key");
        let server = PublicKey::from_bytes_array([9u8; 32]);
        let endpoint = ServerEndpoint::parse("203.0.113.5").expect("endpoint");

        let config = ClientTemplate::default().render(
            &private,
            Ipv4Addr::new(192, 168, 77, 2),
            &server,
            &endpoint,
        );

        let expected = format!(
            "[Interface]\nPrivateKey = {CLIENT_PRIVATE}\nAddress = 192.168.77.2/32\nDNS = 192.168.77.1, 8.8.8.8\n\n[Peer]\nPublicKey = {server}\nAllowedIPs = 0.0.0.0/0\nEndpoint = 203.0.113.5:21210\n"
        );
        assert_eq!(config.as_str(), expected);
    }

    #[test]
    fn renders_keepalive_and_ipv6_endpoint() {
        let template = ClientTemplate {
            persistent_keepalive: Some(25),
            endpoint_port: 51820,
            ..ClientTemplate::default()
        };
        let config = template.render(
            &PrivateKey::from_bytes_array([1u8; 32]),
            Ipv4Addr::new(10, 0, 0, 2),
            &PublicKey::from_bytes_array([2u8; 32]),
            &ServerEndpoint::parse("2001:db8::1").expect("endpoint"),
        );
        assert!(config.as_str().contains("Endpoint = [2001:db8::1]:51820\n"));
        assert!(config.as_str().ends_with("PersistentKeepalive = 25\n"));
    }

    #[test]
    fn debug_redacts_text() {
        let config = ClientTemplate::default().render(
            &PrivateKey::from_base64(CLIENT_PRIVATE).expect("key"),
            Ipv4Addr::new(192, 168, 77, 2),
            &PublicKey::from_bytes_array([9u8; 32]),
            &ServerEndpoint::V4(Ipv4Addr::LOCALHOST),
        );
        let debug = format!("{config:?}");
        assert!(!debug.contains(CLIENT_PRIVATE));
        assert!(debug.contains("REDACTED"));
    }
}
