//! Firmware-over-the-air repository server.
//!
//! Devices poll for the newest firmware for their device type and download
//! the binary; operators publish new binaries into a versioned catalog.
//!
//! # Architecture
//!
//! - `version`: dot-separated version parsing and ordering
//! - `checksum`: hardware-compatible word CRC plus CRC-32 and MD5
//! - `catalog`: the persisted metadata document and its single writer
//! - `ingest`: staging, checksumming and committing new binaries
//! - `http`: request parsing, auth, routing, handlers and streaming
//! - `doctor`: catalog/disk consistency diagnostics
//! - `platform`: status indicator and network link seams
//! - `server`: shared state and orchestration
//! - `config`: CLI/environment configuration
//!
//! # Example
//!
//! ```no_run
//! use fota_server::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     tracing_subscriber::fmt::init();
//!
//!     let config = ServerConfig::default();
//!     config.validate()?;
//!
//!     let server = Server::new(config)?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod catalog;
pub mod checksum;
pub mod config;
pub mod doctor;
pub mod error;
pub mod http;
pub mod ingest;
pub mod platform;
pub mod server;
pub mod version;

pub use catalog::{Catalog, FirmwareEntry, MetadataStore};
pub use checksum::{ChecksumAlgorithm, hardware_crc};
pub use config::{ServerConfig, StorageConfig};
pub use error::{CatalogError, ConfigError, IngestError, ProtocolError, ServerError, VersionError};
pub use ingest::{CommittedEntry, IngestRequest, Ingestor};
pub use server::{AppState, Server};
pub use version::Version;
