//! Registry storage.
//!
//! A [`RegistryStore`] is the single shared mutable resource in the system.
//! Every read-allocate-append sequence runs while holding the store's
//! [`StoreLock`]; [`RegistryStore::append_peer`] takes the guard by
//! reference and refuses one taken on a different store, so an unlocked
//! append cannot be written. Guards are only minted by this crate's stores.
//!
//! [`FileStore`] locks at two levels: a process-wide mutex, then an
//! exclusive OS advisory lock on a sidecar file so separate processes
//! sharing the registry serialise too. The registry itself is never locked
//! directly because appends replace it by rename.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info};
use wgprov_keys::PublicKey;

use crate::error::{ProvisionError, Result};
use crate::registry::{PeerRecord, Registry};
use crate::settings::RegistrySettings;
use crate::subnet::Subnet;

/// Exclusive access to a store. Released on drop.
pub struct StoreLock<'a> {
    process: MutexGuard<'a, ()>,
    _file: Option<File>,
}

impl<'a> StoreLock<'a> {
    /// Wraps a guard on a store's process mutex and, optionally, a file that
    /// holds an OS lock.
    pub(crate) fn new(process: MutexGuard<'a, ()>, file: Option<File>) -> Self {
        Self {
            process,
            _file: file,
        }
    }

    /// Fails unless this guard was taken on `mutex`.
    fn ensure_guards(&self, mutex: &Mutex<()>) -> Result<()> {
        if std::ptr::eq(MutexGuard::mutex(&self.process), mutex) {
            Ok(())
        } else {
            Err(ProvisionError::LockNotHeld)
        }
    }
}

/// Durable, authoritative list of provisioned peers.
///
/// Implementations are blocking; async callers run them on the blocking
/// pool.
pub trait RegistryStore: Send + Sync {
    /// Acquires exclusive access for a read-then-append sequence.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::StoreUnavailable`] if the lock cannot be
    /// taken.
    fn lock(&self) -> Result<StoreLock<'_>>;

    /// Loads the current registry from storage.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::StoreUnavailable`] if the backing resource
    /// cannot be read, or [`ProvisionError::InvalidRegistry`] if it has no
    /// usable server key.
    fn read(&self) -> Result<Registry>;

    /// Appends one peer. Either the whole record is persisted or nothing is.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::LockNotHeld`] if `lock` belongs to another
    /// store, or [`ProvisionError::StoreUnavailable`] if the write fails. In
    /// both cases the stored registry is unchanged.
    fn append_peer(&self, lock: &StoreLock<'_>, record: &PeerRecord) -> Result<()>;
}

/// Joins registry bytes and a new peer stanza, separated by a blank line.
/// The existing bytes are kept verbatim, valid UTF-8 or not.
fn appended(existing: &[u8], record: &PeerRecord) -> Vec<u8> {
    let mut content = Vec::with_capacity(existing.len() + 128);
    content.extend_from_slice(existing);
    if !content.is_empty() && !content.ends_with(b"\n") {
        content.push(b'\n');
    }
    content.push(b'\n');
    content.extend_from_slice(record.to_stanza().as_bytes());
    content
}

/// Rejects a record whose address is already referenced.
fn ensure_unused(registry: &Registry, record: &PeerRecord) -> Result<()> {
    if registry.is_used(record.address) {
        return Err(ProvisionError::InvalidRegistry(format!(
            "address {} is already allocated",
            record.address
        )));
    }
    Ok(())
}

/// A registry kept in the daemon's `wg-quick` config file.
#[derive(Debug)]
pub struct FileStore {
    config_path: PathBuf,
    server_key_path: Option<PathBuf>,
    lock_path: PathBuf,
    subnet: Subnet,
    process_lock: Mutex<()>,
}

impl FileStore {
    /// Creates a store for `config_path`. The lock file defaults to
    /// `<config_path>.lock`.
    #[must_use]
    pub fn new(config_path: impl Into<PathBuf>, subnet: Subnet) -> Self {
        let config_path = config_path.into();
        let lock_path = default_lock_path(&config_path);
        Self {
            config_path,
            server_key_path: None,
            lock_path,
            subnet,
            process_lock: Mutex::new(()),
        }
    }

    /// Creates a store from settings.
    #[must_use]
    pub fn from_settings(settings: &RegistrySettings, subnet: Subnet) -> Self {
        let mut store = Self::new(&settings.config_path, subnet);
        if let Some(path) = &settings.server_public_key_path {
            store = store.with_server_key_path(path);
        }
        if let Some(path) = &settings.lock_path {
            store = store.with_lock_path(path);
        }
        store
    }

    /// Reads the server public key from this file when it exists.
    #[must_use]
    pub fn with_server_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.server_key_path = Some(path.into());
        self
    }

    /// Uses a custom lock file.
    #[must_use]
    pub fn with_lock_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.lock_path = path.into();
        self
    }

    /// Returns the registry file path.
    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    fn read_bytes(&self) -> Result<Vec<u8>> {
        fs::read(&self.config_path).map_err(|e| ProvisionError::store(&self.config_path, e))
    }

    /// Parses raw registry bytes. Invalid UTF-8 (say, a Latin-1 comment) is
    /// replaced for parsing only.
    fn parse(&self, bytes: &[u8]) -> Result<Registry> {
        let text = String::from_utf8_lossy(bytes);
        Registry::parse(&text, &self.subnet, self.read_server_key()?)
    }

    fn read_server_key(&self) -> Result<Option<PublicKey>> {
        let Some(path) = &self.server_key_path else {
            return Ok(None);
        };
        match fs::read_to_string(path) {
            Ok(text) => PublicKey::from_base64(&text).map(Some).map_err(|e| {
                ProvisionError::InvalidRegistry(format!(
                    "server public key {}: {e}",
                    path.display()
                ))
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no server public key file, deriving from PrivateKey");
                Ok(None)
            }
            Err(e) => Err(ProvisionError::store(path, e)),
        }
    }

    /// Writes `content` to a temporary sibling and renames it over the
    /// registry.
    fn replace(&self, content: &[u8]) -> io::Result<()> {
        let dir = match self.config_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };

        let mut tmp = tempfile::Builder::new()
            .prefix(".wgprov-")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        tmp.write_all(content)?;
        let permissions = fs::metadata(&self.config_path)?.permissions();
        tmp.as_file().set_permissions(permissions)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.config_path).map_err(|e| e.error)?;

        #[cfg(unix)]
        File::open(dir)?.sync_all()?;

        Ok(())
    }
}

fn default_lock_path(config_path: &Path) -> PathBuf {
    let mut name = config_path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

impl RegistryStore for FileStore {
    fn lock(&self) -> Result<StoreLock<'_>> {
        let guard = self.process_lock.lock();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| ProvisionError::store(&self.lock_path, e))?;
        file.lock()
            .map_err(|e| ProvisionError::store(&self.lock_path, e))?;
        Ok(StoreLock::new(guard, Some(file)))
    }

    fn read(&self) -> Result<Registry> {
        let bytes = self.read_bytes()?;
        self.parse(&bytes)
    }

    fn append_peer(&self, lock: &StoreLock<'_>, record: &PeerRecord) -> Result<()> {
        lock.ensure_guards(&self.process_lock)?;
        let existing = self.read_bytes()?;
        ensure_unused(&self.parse(&existing)?, record)?;

        self.replace(&appended(&existing, record))
            .map_err(|e| ProvisionError::store(&self.config_path, e))?;

        info!(
            path = %self.config_path.display(),
            address = %record.address,
            public_key = %record.public_key,
            "appended peer to registry"
        );
        Ok(())
    }
}

/// A registry held in memory, with failure and latency injection.
#[derive(Debug)]
pub struct MemoryStore {
    text: Mutex<String>,
    server_key: Option<PublicKey>,
    subnet: Subnet,
    process_lock: Mutex<()>,
    read_delay: Option<Duration>,
    fail_reads: AtomicBool,
    fail_appends: AtomicBool,
}

impl MemoryStore {
    /// Creates a store holding `text`.
    #[must_use]
    pub fn new(text: impl Into<String>, subnet: Subnet) -> Self {
        Self {
            text: Mutex::new(text.into()),
            server_key: None,
            subnet,
            process_lock: Mutex::new(()),
            read_delay: None,
            fail_reads: AtomicBool::new(false),
            fail_appends: AtomicBool::new(false),
        }
    }

    /// Uses `key` as the server public key, like a `public.key` file.
    #[must_use]
    pub fn with_server_key(mut self, key: PublicKey) -> Self {
        self.server_key = Some(key);
        self
    }

    /// Sleeps this long in every read, widening race windows.
    #[must_use]
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// Makes subsequent reads fail with `StoreUnavailable`.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent appends fail with `StoreUnavailable`.
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Returns the current registry text.
    #[must_use]
    pub fn text(&self) -> String {
        self.text.lock().clone()
    }

    fn unavailable(what: &str) -> ProvisionError {
        ProvisionError::store("<memory>", io::Error::other(format!("injected {what} failure")))
    }
}

impl RegistryStore for MemoryStore {
    fn lock(&self) -> Result<StoreLock<'_>> {
        Ok(StoreLock::new(self.process_lock.lock(), None))
    }

    fn read(&self) -> Result<Registry> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::unavailable("read"));
        }
        let text = self.text();
        if let Some(delay) = self.read_delay {
            std::thread::sleep(delay);
        }
        Registry::parse(&text, &self.subnet, self.server_key)
    }

    fn append_peer(&self, lock: &StoreLock<'_>, record: &PeerRecord) -> Result<()> {
        lock.ensure_guards(&self.process_lock)?;
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(Self::unavailable("append"));
        }
        let mut text = self.text.lock();
        let current = Registry::parse(&text, &self.subnet, self.server_key)?;
        ensure_unused(&current, record)?;
        *text = String::from_utf8_lossy(&appended(text.as_bytes(), record)).into_owned();
        Ok(())
    }
}
