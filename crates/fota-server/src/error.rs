//! Error types for the firmware repository.
//!
//! All errors use thiserror for consistent error handling across the codebase.

use std::path::PathBuf;
use thiserror::Error;

/// Version string parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    /// Version string was empty
    #[error("Version string is empty")]
    Empty,

    /// A dot-separated component was empty (e.g. `1..2`)
    #[error("Empty component in version '{0}'")]
    EmptyComponent(String),

    /// A component is not a non-negative integer
    #[error("Invalid component '{component}' in version '{version}'")]
    InvalidComponent {
        /// The full version string
        version: String,
        /// The offending component
        component: String,
    },
}

/// Catalog persistence errors (write side).
///
/// Load-side failures never surface as errors: a missing or corrupt catalog is
/// replaced by the empty catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Failed to read the catalog document
    #[error("Failed to read catalog {path}: {source}")]
    ReadFailed {
        /// Path to the catalog document
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to serialize the catalog
    #[error("Failed to serialize catalog: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Failed to write the catalog document
    #[error("Failed to write catalog {path}: {source}")]
    WriteFailed {
        /// Path that failed to write
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Writer lock could not be acquired in time
    #[error("Timed out after {waited:?} waiting for catalog lock {path}")]
    LockTimeout {
        /// Path to the lock file
        path: PathBuf,
        /// Configured timeout
        waited: std::time::Duration,
    },

    /// Writer lock could not be created
    #[error("Failed to create catalog lock {path}: {source}")]
    LockFailed {
        /// Path to the lock file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

/// Firmware ingestion failures.
///
/// Whenever ingestion returns one of these, no catalog entry was published.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Version is not a well-formed dot-separated integer sequence
    #[error("Invalid version: {0}")]
    InvalidVersion(#[from] VersionError),

    /// Device type is empty or contains characters unsafe in a filename
    #[error("Invalid device type '{0}'")]
    InvalidDeviceType(String),

    /// File extension is empty or contains characters unsafe in a filename
    #[error("Invalid file extension '{0}'")]
    InvalidExtension(String),

    /// Copying the source into the binary store failed
    #[error("Failed to store firmware {path}: {source}")]
    CopyFailed {
        /// Destination path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Computing the checksum of the stored copy failed
    #[error("Failed to checksum {path}: {source}")]
    ChecksumFailed {
        /// Path being checksummed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Committing the catalog entry failed
    #[error("Failed to commit catalog entry: {0}")]
    Commit(#[from] CatalogError),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid value for a setting
    #[error("Invalid {setting}: {reason}")]
    Invalid {
        /// Setting name
        setting: &'static str,
        /// Reason for invalidity
        reason: String,
    },
}

/// Server runtime errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind the listener
    #[error("Failed to bind HTTP server to {addr}: {source}")]
    BindFailed {
        /// Address that failed to bind
        addr: std::net::SocketAddr,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Catalog error
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Server shutdown error
    #[error("Server shutdown error: {0}")]
    Shutdown(String),
}

/// Connection-level protocol errors.
///
/// These end the connection; request-level failures are answered with a
/// status code instead.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// I/O error during protocol handling
    #[error("Protocol I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Request head exceeded the size limit
    #[error("Request head exceeds {limit} bytes")]
    HeadTooLarge {
        /// Limit in bytes
        limit: usize,
    },

    /// Client did not finish sending the request head in time
    #[error("Request head not received after {seconds} seconds")]
    Timeout {
        /// Number of seconds before timeout
        seconds: u64,
    },

    /// File ended before the advertised `Content-Length` was sent
    #[error("Transfer of {filename} truncated: sent {sent} of {expected} bytes")]
    TruncatedTransfer {
        /// File being streamed
        filename: String,
        /// Bytes sent before the file ran out
        sent: u64,
        /// Advertised length
        expected: u64,
    },
}
