//! Address allocation.
//!
//! The next address is one past the highest host offset referenced by the
//! registry, starting from the server's own offset. Gaps left by peers
//! removed out-of-band are not reclaimed: an address is never handed out
//! twice over the registry's lifetime, at the cost of capacity.

use std::net::Ipv4Addr;

use crate::error::{ProvisionError, Result};
use crate::registry::Registry;
use crate::subnet::{Subnet, SERVER_OFFSET};

/// Computes the address the next peer should receive.
///
/// Addresses outside `subnet` are ignored; they cannot collide.
///
/// # Errors
///
/// Returns [`ProvisionError::AddressPoolExhausted`] if the next offset would
/// be the broadcast address or beyond.
pub fn allocate(registry: &Registry, subnet: &Subnet) -> Result<Ipv4Addr> {
    let highest = registry
        .used_addresses()
        .filter_map(|address| subnet.host_offset(address))
        .fold(SERVER_OFFSET, u32::max);

    subnet
        .peer_address(highest + 1)
        .ok_or(ProvisionError::AddressPoolExhausted { subnet: subnet.net() })
}
