//! CLI command implementations.
//!
//! - [`provision`] - Provision a new peer
//! - [`peers`] - List registry contents
//! - [`next_address`] - Allocation dry-run

pub mod next_address;
pub mod peers;
pub mod provision;

pub use next_address::NextAddressCommand;
pub use peers::PeersCommand;
pub use provision::ProvisionCommand;
