//! Firmware ingestion: the only path that adds binaries to the repository.
//!
//! A binary is first staged under a hidden name in the firmware directory and
//! synced to disk. Size and checksum are then computed from that staged copy,
//! so the published digest reflects exactly what can be read back. Only then
//! is the writer lock taken, the file renamed to its final name and the
//! catalog entry committed. A binary already stored under the final name is
//! linked under a hidden name until the commit succeeds and is moved back if
//! it fails. Any failure removes the staged file and leaves both the catalog
//! and the stored binaries untouched.

use crate::catalog::{FirmwareEntry, MetadataStore, UpsertOutcome};
use crate::checksum::{self, ChecksumAlgorithm};
use crate::error::IngestError;
use crate::version::Version;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Extension used when the source name has none.
pub const DEFAULT_EXTENSION: &str = "bin";

/// Identity and metadata for one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestRequest {
    /// Firmware version (dot-separated integers)
    pub version: String,
    /// Device type identifier
    pub device_type: String,
    /// Free-text description
    pub description: String,
    /// Extension for the stored file, without the dot
    pub extension: String,
}

impl IngestRequest {
    /// Build a request, taking the extension from the original file name.
    #[must_use]
    pub fn new(
        version: impl Into<String>,
        device_type: impl Into<String>,
        description: impl Into<String>,
        source_name: &str,
    ) -> Self {
        Self {
            version: version.into(),
            device_type: device_type.into(),
            description: description.into(),
            extension: extension_of(source_name).to_string(),
        }
    }

    /// File name the binary is stored under: `{device_type}-v{version}.{ext}`.
    #[must_use]
    pub fn filename(&self) -> String {
        format!("{}-v{}.{}", self.device_type, self.version, self.extension)
    }

    /// Check that the identity is well-formed and safe to use as a file name.
    pub fn validate(&self) -> Result<(), IngestError> {
        Version::parse(&self.version)?;

        let device_ok = !self.device_type.is_empty()
            && !self.device_type.starts_with('.')
            && self
                .device_type
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !device_ok {
            return Err(IngestError::InvalidDeviceType(self.device_type.clone()));
        }

        let extension_ok = (1..=16).contains(&self.extension.len())
            && self.extension.chars().all(|c| c.is_ascii_alphanumeric());
        if !extension_ok {
            return Err(IngestError::InvalidExtension(self.extension.clone()));
        }

        Ok(())
    }
}

/// Extension after the last dot of the final path component.
fn extension_of(source_name: &str) -> &str {
    let base = source_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(source_name);
    match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext,
        _ => DEFAULT_EXTENSION,
    }
}

/// A successfully committed upload.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CommittedEntry {
    /// The entry now visible in the catalog
    pub entry: FirmwareEntry,
    /// Whether an entry with the same identity was replaced
    pub replaced: bool,
    /// Catalog-wide latest version after the commit
    pub latest_version: String,
}

/// Writes binaries into the firmware directory and commits catalog entries.
#[derive(Debug, Clone)]
pub struct Ingestor {
    store: Arc<MetadataStore>,
    algorithm: ChecksumAlgorithm,
    chunk_size: usize,
}

impl Ingestor {
    /// Create an ingestor writing through `store`.
    #[must_use]
    pub fn new(store: Arc<MetadataStore>, algorithm: ChecksumAlgorithm, chunk_size: usize) -> Self {
        Self {
            store,
            algorithm,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Store a binary read from `source` and commit its catalog entry.
    pub fn ingest<R: Read>(
        &self,
        source: R,
        request: &IngestRequest,
    ) -> Result<CommittedEntry, IngestError> {
        request.validate()?;

        let filename = request.filename();
        let final_path = self.store.binary_path(&filename);
        let staging = self.store.binary_path(&staging_name(&filename));

        let staged = self.stage(source, &staging).and_then(|()| {
            checksum::checksum_file(&staging, self.algorithm, self.chunk_size).map_err(|source| {
                IngestError::ChecksumFailed {
                    path: staging.clone(),
                    source,
                }
            })
        });
        let (checksum, size) = match staged {
            Ok(v) => v,
            Err(e) => {
                discard(&staging);
                return Err(e);
            }
        };

        let mut txn = match self.store.transaction() {
            Ok(txn) => txn,
            Err(e) => {
                discard(&staging);
                return Err(e.into());
            }
        };

        // A binary already at the final name stays reachable under a hidden
        // link until the commit
        let backup = if final_path.exists() {
            let backup = self.store.binary_path(&backup_name(&filename));
            if let Err(source) = preserve(&final_path, &backup) {
                discard(&staging);
                return Err(IngestError::CopyFailed {
                    path: final_path,
                    source,
                });
            }
            Some(backup)
        } else {
            None
        };

        if let Err(source) = fs::rename(&staging, &final_path) {
            discard(&staging);
            if let Some(backup) = &backup {
                restore(backup, &final_path);
            }
            return Err(IngestError::CopyFailed {
                path: final_path,
                source,
            });
        }

        let entry = FirmwareEntry {
            version: request.version.clone(),
            device_type: request.device_type.clone(),
            filename: filename.clone(),
            size,
            checksum,
            description: request.description.clone(),
            upload_timestamp: now_timestamp(),
        };

        let outcome = txn.upsert(entry.clone());
        let catalog = match txn.commit() {
            Ok(catalog) => catalog,
            Err(e) => {
                match &backup {
                    Some(backup) => restore(backup, &final_path),
                    None => discard(&final_path),
                }
                return Err(e.into());
            }
        };
        if let Some(backup) = &backup {
            discard(backup);
        }

        let replaced = match outcome {
            UpsertOutcome::Added => {
                tracing::info!(
                    "Added {} v{} as {filename} ({size} bytes, checksum {})",
                    entry.device_type,
                    entry.version,
                    entry.checksum
                );
                false
            }
            UpsertOutcome::Replaced(previous) => {
                tracing::info!(
                    "Replaced {} v{} with {filename} ({size} bytes, checksum {})",
                    entry.device_type,
                    entry.version,
                    entry.checksum
                );
                if previous.filename != filename {
                    discard(&self.store.binary_path(&previous.filename));
                }
                true
            }
        };

        if catalog.latest_version == entry.version {
            tracing::info!("Catalog latest_version is now {}", catalog.latest_version);
        }

        Ok(CommittedEntry {
            entry,
            replaced,
            latest_version: catalog.latest_version,
        })
    }

    /// Ingest a file from disk, deriving the stored extension from its name.
    pub fn ingest_file(
        &self,
        path: &Path,
        version: &str,
        device_type: &str,
        description: &str,
    ) -> Result<CommittedEntry, IngestError> {
        let request = IngestRequest::new(
            version,
            device_type,
            description,
            &path.to_string_lossy(),
        );
        let source = File::open(path).map_err(|source| IngestError::CopyFailed {
            path: path.to_path_buf(),
            source,
        })?;
        self.ingest(source, &request)
    }

    fn stage<R: Read>(&self, mut source: R, staging: &Path) -> Result<(), IngestError> {
        copy_synced(&mut source, staging, self.chunk_size).map_err(|source| {
            IngestError::CopyFailed {
                path: staging.to_path_buf(),
                source,
            }
        })
    }
}

/// Hidden staging name, unique per process and upload.
fn staging_name(filename: &str) -> String {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    format!(".{filename}.{}-{n}.partial", std::process::id())
}

/// Hidden name the previous binary is parked under during a replace.
fn backup_name(filename: &str) -> String {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    format!(".{filename}.{}-{n}.prev", std::process::id())
}

/// Keep a second name for `path`, copying when links are unsupported.
fn preserve(path: &Path, backup: &Path) -> io::Result<()> {
    if fs::hard_link(path, backup).is_ok() {
        return Ok(());
    }
    fs::copy(path, backup).map(|_| ())
}

/// Move a parked binary back to `final_path`.
fn restore(backup: &Path, final_path: &Path) {
    if let Err(e) = fs::rename(backup, final_path) {
        tracing::warn!(
            integrity = true,
            "Failed to restore {} from {}: {e}",
            final_path.display(),
            backup.display()
        );
    }
}

/// Copy `source` into a new file at `dest` in `chunk_size` reads, then fsync.
fn copy_synced<R: Read>(source: &mut R, dest: &Path, chunk_size: usize) -> io::Result<()> {
    let mut file = File::create(dest)?;
    let mut buf = vec![0u8; chunk_size];
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        file.write_all(&buf[..n])?;
    }
    file.sync_all()
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove {}: {e}", path.display());
        }
    }
}

fn now_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
