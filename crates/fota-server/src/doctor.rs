//! Storage diagnostics.
//!
//! Cross-checks the catalog against the firmware directory: entries whose
//! binary is missing or has the wrong size (or, when verifying, the wrong
//! checksum), and files on disk that no entry references.

use crate::catalog::{Catalog, DocumentState, METADATA_FILE, MetadataStore};
use crate::checksum::{self, ChecksumAlgorithm};
use crate::error::CatalogError;
use std::fmt;
use std::fs;
use std::io;

/// Parse state of the catalog document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentHealth {
    /// Parsed successfully
    Valid,
    /// Present but not a valid catalog
    Corrupt(String),
    /// Present but unreadable
    Unreadable(String),
}

/// An entry that does not match what is on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The referenced binary does not exist
    MissingFile {
        /// Referenced file name
        filename: String,
    },
    /// The binary exists but its size differs from the entry
    SizeMismatch {
        /// Referenced file name
        filename: String,
        /// Size recorded in the catalog
        recorded: u64,
        /// Size on disk
        actual: u64,
    },
    /// The binary's checksum differs from the entry
    ChecksumMismatch {
        /// Referenced file name
        filename: String,
        /// Checksum recorded in the catalog
        recorded: String,
        /// Checksum of the stored file
        actual: String,
    },
    /// The binary could not be inspected
    Unreadable {
        /// Referenced file name
        filename: String,
        /// Underlying error
        reason: String,
    },
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingFile { filename } => write!(f, "{filename}: file missing"),
            Self::SizeMismatch {
                filename,
                recorded,
                actual,
            } => write!(f, "{filename}: size {actual} bytes, catalog records {recorded}"),
            Self::ChecksumMismatch {
                filename,
                recorded,
                actual,
            } => write!(f, "{filename}: checksum {actual}, catalog records {recorded}"),
            Self::Unreadable { filename, reason } => write!(f, "{filename}: unreadable ({reason})"),
        }
    }
}

/// Result of a diagnostics run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// Whether an empty catalog had to be created
    pub created: bool,
    /// Catalog parse state
    pub document: DocumentHealth,
    /// Number of catalog entries
    pub entries: usize,
    /// Catalog-wide latest version
    pub latest_version: String,
    /// Entries that disagree with the disk
    pub faults: Vec<Fault>,
    /// Files not referenced by any entry
    pub stray_files: Vec<String>,
}

impl Report {
    /// Healthy when the catalog parses and every entry matches its binary.
    ///
    /// Stray files are reported but do not make the repository unhealthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.document == DocumentHealth::Valid && self.faults.is_empty()
    }
}

/// Checksum verification settings for [`diagnose`].
#[derive(Debug, Clone, Copy)]
pub struct Verify {
    /// Algorithm assumed for 8-digit checksums
    pub algorithm: ChecksumAlgorithm,
    /// Read chunk size
    pub chunk_size: usize,
}

/// Inspect the repository behind `store`, creating the layout if absent.
///
/// # Errors
///
/// Returns `CatalogError` if the layout cannot be created or the directory
/// cannot be listed.
pub fn diagnose(store: &MetadataStore, verify: Option<Verify>) -> Result<Report, CatalogError> {
    let created = store.ensure_layout()?;

    let (document, catalog) = match store.read_document() {
        DocumentState::Valid(catalog) => (DocumentHealth::Valid, catalog),
        DocumentState::Missing => (DocumentHealth::Valid, Catalog::empty()),
        DocumentState::Corrupt(reason) => (DocumentHealth::Corrupt(reason), Catalog::empty()),
        DocumentState::Unreadable(e) => {
            (DocumentHealth::Unreadable(e.to_string()), Catalog::empty())
        }
    };

    let mut faults = Vec::new();
    for entry in &catalog.firmware_entries {
        let path = store.binary_path(&entry.filename);
        let actual = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                faults.push(Fault::MissingFile {
                    filename: entry.filename.clone(),
                });
                continue;
            }
            Err(e) => {
                faults.push(Fault::Unreadable {
                    filename: entry.filename.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        if actual != entry.size {
            faults.push(Fault::SizeMismatch {
                filename: entry.filename.clone(),
                recorded: entry.size,
                actual,
            });
            continue;
        }

        let Some(verify) = verify else {
            continue;
        };
        let algorithm = algorithm_for(&entry.checksum, verify.algorithm);
        match checksum::checksum_file(&path, algorithm, verify.chunk_size) {
            Ok((digest, _)) if digest.eq_ignore_ascii_case(&entry.checksum) => {}
            Ok((digest, _)) => faults.push(Fault::ChecksumMismatch {
                filename: entry.filename.clone(),
                recorded: entry.checksum.clone(),
                actual: digest,
            }),
            Err(e) => faults.push(Fault::Unreadable {
                filename: entry.filename.clone(),
                reason: e.to_string(),
            }),
        }
    }

    let listing = fs::read_dir(store.dir()).map_err(|source| CatalogError::ReadFailed {
        path: store.dir().to_path_buf(),
        source,
    })?;
    let lock_name = store
        .lock_path()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned());
    let mut stray_files: Vec<String> = listing
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name != METADATA_FILE && Some(name) != lock_name.as_ref())
        .filter(|name| catalog.find_by_filename(name).is_none())
        .collect();
    stray_files.sort();

    for fault in &faults {
        tracing::warn!(integrity = true, "{fault}");
    }

    Ok(Report {
        created,
        document,
        entries: catalog.len(),
        latest_version: catalog.latest_version,
        faults,
        stray_files,
    })
}

/// Algorithm that produced a recorded checksum, judged by its length.
fn algorithm_for(recorded: &str, configured: ChecksumAlgorithm) -> ChecksumAlgorithm {
    if recorded.len() == configured.digest_len() {
        configured
    } else if recorded.len() == ChecksumAlgorithm::Md5.digest_len() {
        ChecksumAlgorithm::Md5
    } else {
        ChecksumAlgorithm::HardwareCrc
    }
}
