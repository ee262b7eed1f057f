//! End-to-end provisioning tests against in-memory and on-disk registries.

use std::collections::HashSet;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use wgprov_core::keys::{FixedKeyProvider, NativeKeyProvider, PrivateKey, PublicKey};
use wgprov_core::{
    FakeDaemon, FileStore, MemoryStore, ProvisionError, Provisioner, RegistryStore, ReloadOutcome,
    Subnet,
};

const SERVER_PUBLIC: &str = "hSDwCYkwp1R0i33ctD73Wg2/Og0mOBr066SpjqqbTmo=";
const SERVER_PRIVATE: &str = "dwdtCnMYpX08FsFyUbJmRd9ML4frwJkqsXf7pR25LCo=";

fn subnet() -> Subnet {
    "192.168.77.0/24".parse().expect("valid subnet")
}

fn server_key() -> PublicKey {
    PublicKey::from_base64(SERVER_PUBLIC).expect("server key")
}

fn interface() -> String {
    format!("[Interface]\nAddress = 192.168.77.1/24\nListenPort = 21210\nPrivateKey = {SERVER_PRIVATE}\n")
}

fn memory_store() -> MemoryStore {
    MemoryStore::new(interface(), subnet()).with_server_key(server_key())
}

fn write_registry(dir: &Path, text: &str) -> std::path::PathBuf {
    let path = dir.join("wg0.conf");
    fs::write(&path, text).expect("write registry");
    fs::write(dir.join("public.key"), format!("{SERVER_PUBLIC}\n")).expect("write key");
    path
}

fn file_store(dir: &Path) -> FileStore {
    FileStore::new(dir.join("wg0.conf"), subnet()).with_server_key_path(dir.join("public.key"))
}

fn peers_text(octets: impl IntoIterator<Item = u8>) -> String {
    let mut text = interface();
    for octet in octets {
        text.push_str(&format!(
            "\n[Peer]\nPublicKey = {}\nAllowedIPs = 192.168.77.{octet}/32\n",
            PublicKey::from_bytes_array([octet; 32])
        ));
    }
    text
}

#[tokio::test]
async fn first_peer_gets_expected_config() {
    let provisioner = Provisioner::new(memory_store(), NativeKeyProvider, FakeDaemon::new(), subnet());

    let peer = provisioner.provision_peer("203.0.113.5").await.expect("provision");
    let text = peer.config.as_str();

    assert!(text.contains("Address = 192.168.77.2/32\n"));
    assert!(text.contains(&format!("PublicKey = {SERVER_PUBLIC}\n")));
    assert!(text.contains("Endpoint = 203.0.113.5:21210\n"));
    assert!(text.contains("DNS = 192.168.77.1, 8.8.8.8\n"));
    assert!(text.contains("AllowedIPs = 0.0.0.0/0\n"));
    assert_eq!(peer.reload, ReloadOutcome::Applied);
}

#[tokio::test]
async fn config_embeds_the_generated_private_key() {
    let private = PrivateKey::from_bytes_array([11u8; 32]);
    let keys = FixedKeyProvider::new(private.clone());
    let provisioner = Provisioner::new(memory_store(), keys, FakeDaemon::new(), subnet());

    let peer = provisioner.provision_peer("vpn.example.com").await.expect("provision");

    assert_eq!(peer.public_key, private.public_key());
    assert!(peer.config.as_str().contains(&format!("PrivateKey = {}\n", private.to_base64())));
    assert!(!provisioner.store().text().contains(&private.to_base64()));
}

#[tokio::test]
async fn sequential_calls_are_distinct_and_increasing() {
    let provisioner = Provisioner::new(memory_store(), NativeKeyProvider, FakeDaemon::new(), subnet());

    let mut previous = Ipv4Addr::new(192, 168, 77, 1);
    for _ in 0..20 {
        let peer = provisioner.provision_peer("203.0.113.5").await.expect("provision");
        assert!(peer.address > previous);
        previous = peer.address;
    }
    assert_eq!(previous, Ipv4Addr::new(192, 168, 77, 21));
    assert_eq!(provisioner.peers().await.expect("peers").len(), 20);
}

#[tokio::test]
async fn saturated_pool_is_exhausted_and_unchanged() {
    let store = MemoryStore::new(peers_text(2..=254), subnet()).with_server_key(server_key());
    let before = store.text();
    let daemon = FakeDaemon::new();
    let provisioner = Provisioner::new(store, NativeKeyProvider, daemon.clone(), subnet());

    assert_eq!(provisioner.peers().await.expect("peers").len(), 253);

    let err = provisioner.provision_peer("203.0.113.5").await.expect_err("pool is full");
    assert!(matches!(err, ProvisionError::AddressPoolExhausted { .. }));
    assert_eq!(provisioner.store().text(), before);
    assert_eq!(provisioner.peers().await.expect("peers").len(), 253);
    assert_eq!(daemon.calls(), 0);
}

#[tokio::test]
async fn filling_the_pool_hands_out_every_host_once() {
    let store = MemoryStore::new(interface(), subnet()).with_server_key(server_key());
    let provisioner = Provisioner::new(store, NativeKeyProvider, FakeDaemon::new(), subnet());

    let mut seen = HashSet::new();
    for _ in 0..subnet().peer_capacity() {
        let peer = provisioner.provision_peer("203.0.113.5").await.expect("provision");
        assert!(seen.insert(peer.address));
    }
    assert!(seen.contains(&Ipv4Addr::new(192, 168, 77, 254)));
    assert!(!seen.contains(&Ipv4Addr::new(192, 168, 77, 1)));

    let err = provisioner.provision_peer("203.0.113.5").await.expect_err("pool is full");
    assert!(matches!(err, ProvisionError::AddressPoolExhausted { .. }));
}

#[tokio::test]
async fn malformed_entry_is_skipped() {
    let mut text = peers_text([2, 3]);
    text.push_str("\n[Peer]\nPublicKey = bm90LWEta2V5\nAllowedIPs = 192.168.77.x/32\n");
    let store = MemoryStore::new(text, subnet()).with_server_key(server_key());
    let provisioner = Provisioner::new(store, NativeKeyProvider, FakeDaemon::new(), subnet());

    let peer = provisioner.provision_peer("203.0.113.5").await.expect("provision");
    assert_eq!(peer.address, Ipv4Addr::new(192, 168, 77, 4));
}

#[tokio::test]
async fn commented_registry_lines_keep_their_addresses() {
    let text = format!(
        "{}\n[Peer] # alice\nPublicKey = {}\nAllowedIPs = 192.168.77.2/32\n\n[Peer]\nPublicKey = {}\nAllowedIPs = 192.168.77.9 # phone\n",
        interface(),
        PublicKey::from_bytes_array([2u8; 32]),
        PublicKey::from_bytes_array([9u8; 32])
    );
    let store = MemoryStore::new(text, subnet()).with_server_key(server_key());
    let provisioner = Provisioner::new(store, NativeKeyProvider, FakeDaemon::new(), subnet());

    assert_eq!(provisioner.peers().await.expect("peers").len(), 2);
    let peer = provisioner.provision_peer("203.0.113.5").await.expect("provision");
    assert_eq!(peer.address, Ipv4Addr::new(192, 168, 77, 10));
}

#[tokio::test]
async fn allowed_ips_outside_a_peer_are_never_reissued() {
    let text = format!("{}AllowedIPs = 192.168.77.15/32\n", interface());
    let store = MemoryStore::new(text, subnet()).with_server_key(server_key());
    let provisioner = Provisioner::new(store, NativeKeyProvider, FakeDaemon::new(), subnet());

    let peer = provisioner.provision_peer("203.0.113.5").await.expect("provision");
    assert_eq!(peer.address, Ipv4Addr::new(192, 168, 77, 16));
}

#[tokio::test]
async fn reload_failure_still_returns_config_and_persists() {
    let daemon = FakeDaemon::failing("unit wg-quick@wg0.service not found");
    let provisioner = Provisioner::new(memory_store(), NativeKeyProvider, daemon.clone(), subnet());

    let peer = provisioner.provision_peer("203.0.113.5").await.expect("provision");

    assert_eq!(
        peer.reload,
        ReloadOutcome::Failed("unit wg-quick@wg0.service not found".into())
    );
    assert!(peer.config.as_str().contains("Address = 192.168.77.2/32\n"));
    assert!(peer.config.as_str().contains("Endpoint = 203.0.113.5:21210\n"));
    assert_eq!(daemon.calls(), 1);

    let peers = provisioner.peers().await.expect("peers");
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].public_key, peer.public_key);
}

#[tokio::test]
async fn key_generation_failure_mutates_nothing() {
    let daemon = FakeDaemon::new();
    let keys = FixedKeyProvider::failing("entropy source unavailable");
    let provisioner = Provisioner::new(memory_store(), keys, daemon.clone(), subnet());

    let err = provisioner.provision_peer("203.0.113.5").await.expect_err("should fail");
    assert!(matches!(err, ProvisionError::KeyGenerationFailed { .. }));
    assert_eq!(provisioner.store().text(), interface());
    assert_eq!(daemon.calls(), 0);
}

#[tokio::test]
async fn store_failures_mutate_nothing() {
    let daemon = FakeDaemon::new();
    let provisioner = Provisioner::new(memory_store(), NativeKeyProvider, daemon.clone(), subnet());

    provisioner.store().set_fail_appends(true);
    let err = provisioner.provision_peer("203.0.113.5").await.expect_err("append fails");
    assert!(matches!(err, ProvisionError::StoreUnavailable { .. }));
    assert_eq!(provisioner.store().text(), interface());

    provisioner.store().set_fail_appends(false);
    provisioner.store().set_fail_reads(true);
    let err = provisioner.provision_peer("203.0.113.5").await.expect_err("read fails");
    assert!(matches!(err, ProvisionError::StoreUnavailable { .. }));
    assert_eq!(daemon.calls(), 0);

    // A retry allocates afresh once the store recovers.
    provisioner.store().set_fail_reads(false);
    let peer = provisioner.provision_peer("203.0.113.5").await.expect("provision");
    assert_eq!(peer.address, Ipv4Addr::new(192, 168, 77, 2));
}

#[tokio::test]
async fn missing_server_key_is_invalid_registry() {
    let store = MemoryStore::new("[Interface]\nListenPort = 21210\n", subnet());
    let provisioner = Provisioner::new(store, NativeKeyProvider, FakeDaemon::new(), subnet());

    let err = provisioner.provision_peer("203.0.113.5").await.expect_err("should fail");
    assert!(matches!(err, ProvisionError::InvalidRegistry(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_calls_on_memory_store_get_distinct_addresses() {
    let store = memory_store().with_read_delay(Duration::from_millis(2));
    let provisioner = Arc::new(Provisioner::new(store, NativeKeyProvider, FakeDaemon::new(), subnet()));

    let tasks: Vec<_> = (0..64)
        .map(|_| {
            let provisioner = Arc::clone(&provisioner);
            tokio::spawn(async move { provisioner.provision_peer("203.0.113.5").await })
        })
        .collect();

    let mut addresses = HashSet::new();
    for task in tasks {
        let peer = task.await.expect("join").expect("provision");
        assert!(addresses.insert(peer.address), "duplicate {}", peer.address);
    }

    let peers = provisioner.peers().await.expect("peers");
    assert_eq!(peers.len(), 64);
    let stored: HashSet<_> = peers.iter().map(|p| p.address).collect();
    assert_eq!(stored, addresses);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_calls_across_file_stores_get_distinct_addresses() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_registry(dir.path(), &interface());

    // Two stores on one file stand in for two processes.
    let a = Arc::new(Provisioner::new(file_store(dir.path()), NativeKeyProvider, FakeDaemon::new(), subnet()));
    let b = Arc::new(Provisioner::new(file_store(dir.path()), NativeKeyProvider, FakeDaemon::new(), subnet()));

    let tasks: Vec<_> = (0..40)
        .map(|i| {
            let provisioner = if i % 2 == 0 { Arc::clone(&a) } else { Arc::clone(&b) };
            tokio::spawn(async move { provisioner.provision_peer("203.0.113.5").await })
        })
        .collect();

    let mut addresses = HashSet::new();
    for task in tasks {
        let peer = task.await.expect("join").expect("provision");
        assert!(addresses.insert(peer.address), "duplicate {}", peer.address);
    }

    let registry = file_store(dir.path()).read().expect("read");
    assert_eq!(registry.peers.len(), 40);
    assert!(registry.warnings.is_empty());
    let stored: HashSet<_> = registry.peers.iter().map(|p| p.address).collect();
    assert_eq!(stored, addresses);
}

#[tokio::test]
async fn file_registry_keeps_out_of_band_content() {
    let dir = tempfile::tempdir().expect("tempdir");
    let original = format!(
        "{}PostUp = iptables -A FORWARD -i %i -j ACCEPT\n\n# laptop, added by hand\n[Peer]\nPublicKey = {}\nAllowedIPs = 192.168.77.40/32, 10.10.0.0/24\n",
        interface(),
        PublicKey::from_bytes_array([40u8; 32])
    );
    let path = write_registry(dir.path(), &original);
    let provisioner = Provisioner::new(file_store(dir.path()), NativeKeyProvider, FakeDaemon::new(), subnet());

    let peer = provisioner.provision_peer("203.0.113.5").await.expect("provision");
    assert_eq!(peer.address, Ipv4Addr::new(192, 168, 77, 41));

    let text = fs::read_to_string(path).expect("read back");
    assert!(text.starts_with(&original));
    assert!(text.ends_with(&format!(
        "\n[Peer]\nPublicKey = {}\nAllowedIPs = 192.168.77.41/32\n",
        peer.public_key
    )));
}

#[tokio::test]
async fn non_utf8_registry_bytes_survive_an_append() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut original = interface().into_bytes();
    original.extend_from_slice(b"# caf\xe9 peers\n");
    let path = dir.path().join("wg0.conf");
    write_registry(dir.path(), "");
    fs::write(&path, &original).expect("write registry");
    let provisioner = Provisioner::new(file_store(dir.path()), NativeKeyProvider, FakeDaemon::new(), subnet());

    let peer = provisioner.provision_peer("203.0.113.5").await.expect("provision");
    assert_eq!(peer.address, Ipv4Addr::new(192, 168, 77, 2));

    let bytes = fs::read(&path).expect("read back");
    assert!(bytes.starts_with(&original));
}

#[tokio::test]
async fn unreadable_registry_file_is_store_unavailable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let provisioner = Provisioner::new(file_store(dir.path()), NativeKeyProvider, FakeDaemon::new(), subnet());

    let err = provisioner.provision_peer("203.0.113.5").await.expect_err("should fail");
    assert!(matches!(err, ProvisionError::StoreUnavailable { .. }));
    assert!(!dir.path().join("wg0.conf").exists());
}
