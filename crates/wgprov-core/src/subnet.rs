//! The provisioning subnet.
//!
//! ```text
//! 192.168.77.0     network     (offset 0, never allocated)
//! 192.168.77.1     server      (offset 1, allocation floor)
//! 192.168.77.2     first peer
//! ...
//! 192.168.77.254   last peer   (offset 2^(32-prefix) - 2)
//! 192.168.77.255   broadcast   (never allocated)
//! ```

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnet::Ipv4Net;

use crate::error::{ProvisionError, Result};

/// Host offset of the server's own address.
pub const SERVER_OFFSET: u32 = 1;

/// Narrowest prefix with at least one peer slot.
pub const MAX_PREFIX_LEN: u8 = 30;

/// Widest prefix accepted.
pub const MIN_PREFIX_LEN: u8 = 8;

/// A fixed IPv4 block whose first host is reserved for the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subnet {
    net: Ipv4Net,
}

impl Subnet {
    /// Creates a subnet from a CIDR block. Host bits are truncated.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Config`] if the prefix is outside
    /// `/8..=/30`.
    pub fn new(net: Ipv4Net) -> Result<Self> {
        let prefix = net.prefix_len();
        if !(MIN_PREFIX_LEN..=MAX_PREFIX_LEN).contains(&prefix) {
            return Err(ProvisionError::Config(format!(
                "subnet {net} must have a prefix between /{MIN_PREFIX_LEN} and /{MAX_PREFIX_LEN}"
            )));
        }
        Ok(Self { net: net.trunc() })
    }

    /// Returns the CIDR block.
    #[must_use]
    pub const fn net(&self) -> Ipv4Net {
        self.net
    }

    /// Returns the network address.
    #[must_use]
    pub fn network(&self) -> Ipv4Addr {
        self.net.network()
    }

    /// Returns the address reserved for the server.
    #[must_use]
    pub fn server_address(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.net.network()) + SERVER_OFFSET)
    }

    /// Host offset of the last usable address (the one before broadcast).
    #[must_use]
    pub fn last_host_offset(&self) -> u32 {
        (1u32 << (32 - u32::from(self.net.prefix_len()))) - 2
    }

    /// Number of addresses available to peers (excludes the server).
    #[must_use]
    pub fn peer_capacity(&self) -> u32 {
        self.last_host_offset() - SERVER_OFFSET
    }

    /// Returns `addr`'s offset from the network address, or `None` if it
    /// lies outside the block.
    #[must_use]
    pub fn host_offset(&self, addr: Ipv4Addr) -> Option<u32> {
        self.net
            .contains(&addr)
            .then(|| u32::from(addr) - u32::from(self.net.network()))
    }

    /// Returns the peer address at `offset`, or `None` if the offset is the
    /// network, server, or broadcast address, or beyond the block.
    #[must_use]
    pub fn peer_address(&self, offset: u32) -> Option<Ipv4Addr> {
        (SERVER_OFFSET < offset && offset <= self.last_host_offset())
            .then(|| Ipv4Addr::from(u32::from(self.net.network()) + offset))
    }

    /// Returns `true` if `addr` is one of the block's peer addresses.
    #[must_use]
    pub fn is_peer_address(&self, addr: Ipv4Addr) -> bool {
        self.host_offset(addr)
            .and_then(|offset| self.peer_address(offset))
            .is_some()
    }
}

impl FromStr for Subnet {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self> {
        let net = s
            .parse::<Ipv4Net>()
            .map_err(|e| ProvisionError::Config(format!("invalid subnet {s:?}: {e}")))?;
        Self::new(net)
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.net)
    }
}
