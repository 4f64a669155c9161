//! Firmware catalog and its persisted metadata document.
//!
//! The catalog lives in `metadata.json` inside the firmware directory, next to
//! the binaries it describes. Readers re-read the document on every query.
//! Writers go through [`MetadataStore::transaction`], which serializes
//! read-modify-write cycles within the process (mutex) and across processes
//! (advisory lock on `metadata.json.lock`), and replaces the document with a rename so readers
//! never observe a partial write.

use crate::error::CatalogError;
use crate::version::{INITIAL_VERSION, Version};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// File name of the catalog document inside the firmware directory.
pub const METADATA_FILE: &str = "metadata.json";

const LOCK_SUFFIX: &str = "lock";
const TEMP_SUFFIX: &str = "tmp";
const LOCK_RETRY: Duration = Duration::from_millis(25);

/// One committed firmware binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirmwareEntry {
    /// Dot-separated version string, as uploaded
    pub version: String,

    /// Opaque device type identifier
    pub device_type: String,

    /// File name inside the firmware directory (`{device_type}-v{version}.{ext}`)
    pub filename: String,

    /// Size of the stored binary in bytes
    pub size: u64,

    /// Hex digest of the stored binary
    #[serde(alias = "md5")]
    pub checksum: String,

    /// Free-text release notes
    #[serde(default)]
    pub description: String,

    /// Upload time in seconds since the Unix epoch
    #[serde(alias = "upload_date", default)]
    pub upload_timestamp: f64,
}

impl FirmwareEntry {
    /// Parsed version, if well-formed.
    #[must_use]
    pub fn parsed_version(&self) -> Option<Version> {
        Version::parse(&self.version).ok()
    }

    /// Whether `other` has the same (device type, version) identity.
    ///
    /// Versions are compared under version ordering, so `1.2` and `1.2.0`
    /// name the same artifact.
    #[must_use]
    pub fn same_identity(&self, device_type: &str, version: &str) -> bool {
        if self.device_type != device_type {
            return false;
        }
        match (Version::parse(&self.version), Version::parse(version)) {
            (Ok(a), Ok(b)) => a == b,
            _ => self.version == version,
        }
    }
}

fn initial_version() -> String {
    INITIAL_VERSION.to_string()
}

/// The full catalog document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// All committed entries, in upload order
    #[serde(default)]
    pub firmware_entries: Vec<FirmwareEntry>,

    /// Highest version ever uploaded across all device types (informational)
    #[serde(default = "initial_version")]
    pub latest_version: String,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::empty()
    }
}

/// What [`Catalog::upsert`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    /// A new identity was appended
    Added,
    /// An existing entry with the same identity was replaced
    Replaced(FirmwareEntry),
}

impl Catalog {
    /// An empty catalog with `latest_version = "0.0.0"`.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            firmware_entries: Vec::new(),
            latest_version: initial_version(),
        }
    }

    /// Insert an entry, replacing any existing entry with the same identity,
    /// and raise `latest_version` if the entry is newer.
    pub fn upsert(&mut self, entry: FirmwareEntry) -> UpsertOutcome {
        self.raise_latest(&entry.version);

        let existing = self
            .firmware_entries
            .iter()
            .position(|e| e.same_identity(&entry.device_type, &entry.version));

        match existing {
            Some(index) => {
                let previous = std::mem::replace(&mut self.firmware_entries[index], entry);
                UpsertOutcome::Replaced(previous)
            }
            None => {
                self.firmware_entries.push(entry);
                UpsertOutcome::Added
            }
        }
    }

    fn raise_latest(&mut self, version: &str) {
        let Ok(candidate) = Version::parse(version) else {
            return;
        };
        match Version::parse(&self.latest_version) {
            Ok(current) if current >= candidate => {}
            _ => self.latest_version = candidate.to_string(),
        }
    }

    /// The entry with the highest version for `device_type`.
    ///
    /// Entries whose version does not parse are ignored.
    #[must_use]
    pub fn find_latest(&self, device_type: &str) -> Option<&FirmwareEntry> {
        self.firmware_entries
            .iter()
            .filter(|e| e.device_type == device_type)
            .filter_map(|e| e.parsed_version().map(|v| (v, e)))
            .max_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, e)| e)
    }

    /// Look up an entry by its stored file name.
    #[must_use]
    pub fn find_by_filename(&self, filename: &str) -> Option<&FirmwareEntry> {
        self.firmware_entries.iter().find(|e| e.filename == filename)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.firmware_entries.len()
    }

    /// Whether the catalog has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.firmware_entries.is_empty()
    }
}

/// Result of reading the persisted document without recovery.
#[derive(Debug)]
pub enum DocumentState {
    /// Document parsed successfully
    Valid(Catalog),
    /// No document on disk
    Missing,
    /// Document exists but is not a valid catalog
    Corrupt(String),
    /// Document could not be read
    Unreadable(io::Error),
}

/// Exclusive advisory lock guarding catalog writes across processes.
///
/// The lock file itself persists; the lock is held on its open handle and is
/// released when the handle is closed, including when the holder dies.
#[derive(Debug)]
struct LockFile {
    _file: File,
}

impl LockFile {
    fn acquire(path: PathBuf, timeout: Duration) -> Result<Self, CatalogError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| CatalogError::LockFailed {
                path: path.clone(),
                source,
            })?;
        let start = Instant::now();

        loop {
            match file.try_lock() {
                Ok(()) => return Ok(Self { _file: file }),
                Err(TryLockError::WouldBlock) => {
                    if start.elapsed() >= timeout {
                        return Err(CatalogError::LockTimeout {
                            path,
                            waited: timeout,
                        });
                    }
                    std::thread::sleep(LOCK_RETRY);
                }
                Err(TryLockError::Error(source)) => {
                    return Err(CatalogError::LockFailed { path, source });
                }
            }
        }
    }
}

/// Owner of the catalog document and the single writer path to it.
#[derive(Debug)]
pub struct MetadataStore {
    dir: PathBuf,
    document: PathBuf,
    lock_timeout: Duration,
    writer: Mutex<()>,
}

impl MetadataStore {
    /// Create a store rooted at `dir`. Nothing is touched on disk.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        let dir = dir.into();
        let document = dir.join(METADATA_FILE);
        Self {
            dir,
            document,
            lock_timeout,
            writer: Mutex::new(()),
        }
    }

    /// Firmware directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the catalog document.
    #[must_use]
    pub fn document_path(&self) -> &Path {
        &self.document
    }

    /// Path of the writer lock file.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        sibling(&self.document, LOCK_SUFFIX)
    }

    /// Path a stored binary resolves to.
    #[must_use]
    pub fn binary_path(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    /// Create the firmware directory and an empty catalog if either is absent.
    ///
    /// Returns `true` when a new catalog document was written.
    pub fn ensure_layout(&self) -> Result<bool, CatalogError> {
        fs::create_dir_all(&self.dir).map_err(|source| CatalogError::WriteFailed {
            path: self.dir.clone(),
            source,
        })?;

        if self.document.exists() {
            return Ok(false);
        }

        let _guard = self.writer.lock();
        let _lock = LockFile::acquire(self.lock_path(), self.lock_timeout)?;
        if self.document.exists() {
            return Ok(false);
        }
        tracing::info!("Creating new catalog at {}", self.document.display());
        self.write_document(&Catalog::empty())?;
        Ok(true)
    }

    /// Read and parse the document, reporting exactly what was found.
    pub fn read_document(&self) -> DocumentState {
        let bytes = match fs::read(&self.document) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return DocumentState::Missing,
            Err(e) => return DocumentState::Unreadable(e),
        };
        match serde_json::from_slice::<Catalog>(&bytes) {
            Ok(catalog) => DocumentState::Valid(catalog),
            Err(e) => DocumentState::Corrupt(e.to_string()),
        }
    }

    /// Load the catalog, substituting the empty catalog when the document is
    /// missing or unusable.
    pub fn load(&self) -> Catalog {
        match self.read_document() {
            DocumentState::Valid(catalog) => catalog,
            DocumentState::Missing => {
                tracing::debug!(
                    "No catalog at {}, using empty catalog",
                    self.document.display()
                );
                Catalog::empty()
            }
            DocumentState::Corrupt(reason) => {
                tracing::warn!(
                    "Catalog {} is corrupt ({reason}), using empty catalog",
                    self.document.display()
                );
                Catalog::empty()
            }
            DocumentState::Unreadable(e) => {
                tracing::warn!(
                    "Catalog {} is unreadable ({e}), using empty catalog",
                    self.document.display()
                );
                Catalog::empty()
            }
        }
    }

    /// Raw bytes of the persisted document, as served to devices.
    ///
    /// A missing document is served as the empty catalog.
    pub fn load_raw(&self) -> Result<Vec<u8>, CatalogError> {
        match fs::read(&self.document) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Ok(serde_json::to_vec(&Catalog::empty())?)
            }
            Err(source) => Err(CatalogError::ReadFailed {
                path: self.document.clone(),
                source,
            }),
        }
    }

    /// Entry with the highest version for `device_type`, freshly loaded.
    pub fn find_latest(&self, device_type: &str) -> Option<FirmwareEntry> {
        self.load().find_latest(device_type).cloned()
    }

    /// Begin a read-modify-write cycle, holding the writer lock until the
    /// transaction is committed or dropped.
    pub fn transaction(&self) -> Result<CatalogTransaction<'_>, CatalogError> {
        let guard = self.writer.lock();
        let lock = LockFile::acquire(self.lock_path(), self.lock_timeout)?;
        let catalog = self.load();
        Ok(CatalogTransaction {
            store: self,
            catalog,
            _lock: lock,
            _guard: guard,
        })
    }

    /// Insert or replace an entry and persist the catalog.
    pub fn upsert(&self, entry: FirmwareEntry) -> Result<Catalog, CatalogError> {
        let mut txn = self.transaction()?;
        txn.upsert(entry);
        txn.commit()
    }

    fn write_document(&self, catalog: &Catalog) -> Result<(), CatalogError> {
        let bytes = serde_json::to_vec(catalog)?;
        let temp_path = sibling(&self.document, TEMP_SUFFIX);

        let write = || -> io::Result<()> {
            let mut file = File::create(&temp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            Ok(())
        };
        if let Err(source) = write() {
            let _ = fs::remove_file(&temp_path);
            return Err(CatalogError::WriteFailed {
                path: temp_path,
                source,
            });
        }

        fs::rename(&temp_path, &self.document).map_err(|source| {
            let _ = fs::remove_file(&temp_path);
            CatalogError::WriteFailed {
                path: self.document.clone(),
                source,
            }
        })
    }
}

/// An in-progress catalog update holding the single-writer lock.
#[derive(Debug)]
pub struct CatalogTransaction<'a> {
    store: &'a MetadataStore,
    catalog: Catalog,
    _lock: LockFile,
    _guard: MutexGuard<'a, ()>,
}

impl CatalogTransaction<'_> {
    /// Catalog state as read at the start of the transaction.
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Apply an insert-or-replace to the pending catalog.
    pub fn upsert(&mut self, entry: FirmwareEntry) -> UpsertOutcome {
        self.catalog.upsert(entry)
    }

    /// Persist the pending catalog and release the lock.
    pub fn commit(self) -> Result<Catalog, CatalogError> {
        self.store.write_document(&self.catalog)?;
        Ok(self.catalog)
    }
}

/// `metadata.json` -> `metadata.json.{suffix}`
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}
