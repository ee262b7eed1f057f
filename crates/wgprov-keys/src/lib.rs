//! `WireGuard` key types for wgprov.
//!
//! This crate provides the Curve25519 key types used for provisioned peers
//! and the [`KeyProvider`] seam through which the provisioning core obtains
//! fresh client keypairs.

pub mod error;
mod keys;
pub mod provider;

pub use error::KeyError;
pub use keys::{generate_keypair, KeyPair, PrivateKey, PublicKey, KEY_SIZE};
pub use provider::{FixedKeyProvider, KeyProvider, NativeKeyProvider, WgToolKeyProvider};
