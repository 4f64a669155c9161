//! Server configuration management.
//!
//! Settings come from CLI arguments, `FOTA_*` environment variables, or the
//! defaults below, in that order of precedence.
//!
//! # Example
//!
//! ```no_run
//! use fota_server::ServerConfig;
//!
//! let mut config = ServerConfig::default();
//! config.storage.firmware_dir = "/var/lib/fota".into();
//! config.validate().expect("Invalid configuration");
//!
//! println!("Serving {} on {}", config.storage.firmware_dir.display(), config.bind);
//! ```

use crate::catalog::MetadataStore;
use crate::checksum::{ChecksumAlgorithm, DEFAULT_CHUNK_SIZE};
use crate::error::ConfigError;
use crate::http::ProtocolOptions;
use crate::http::auth::{AuthPolicy, Credentials, DEFAULT_PUBLIC_PATHS, PublicPath};
use crate::http::response::Status;
use clap::Args;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default listen address.
pub const DEFAULT_BIND: &str = "0.0.0.0:8080";
/// Default firmware directory.
pub const DEFAULT_FIRMWARE_DIR: &str = "./firmware";
/// Default Basic-auth username.
pub const DEFAULT_USERNAME: &str = "admin";
/// Default Basic-auth password.
pub const DEFAULT_PASSWORD: &str = "admin";
/// Default Basic-auth realm.
pub const DEFAULT_REALM: &str = "FOTA Server";
/// Default status for unparseable request lines.
pub const DEFAULT_MALFORMED_STATUS: u16 = 404;
/// Default upload size limit (16 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 16 * 1024 * 1024;
/// Default request-head timeout in seconds.
pub const DEFAULT_HEADER_TIMEOUT_SECS: u64 = 10;
/// Default catalog lock timeout in seconds.
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 10;

/// Firmware directory and catalog settings, shared by every subcommand.
#[derive(Debug, Clone, Args)]
pub struct StorageConfig {
    /// Directory holding firmware binaries and metadata.json
    #[arg(long, env = "FOTA_FIRMWARE_DIR", default_value = DEFAULT_FIRMWARE_DIR)]
    pub firmware_dir: PathBuf,

    /// Checksum algorithm recorded for new uploads
    #[arg(
        long,
        env = "FOTA_CHECKSUM",
        value_enum,
        default_value_t = ChecksumAlgorithm::HardwareCrc
    )]
    pub checksum: ChecksumAlgorithm,

    /// Chunk size in bytes for file reads and streamed responses
    #[arg(long, env = "FOTA_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Seconds to wait for the catalog writer lock
    #[arg(long, env = "FOTA_LOCK_TIMEOUT_SECS", default_value_t = DEFAULT_LOCK_TIMEOUT_SECS)]
    pub lock_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            firmware_dir: PathBuf::from(DEFAULT_FIRMWARE_DIR),
            checksum: ChecksumAlgorithm::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            lock_timeout_secs: DEFAULT_LOCK_TIMEOUT_SECS,
        }
    }
}

impl StorageConfig {
    /// Validate storage settings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the chunk size is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid {
                setting: "chunk size",
                reason: "must be at least 1 byte".to_string(),
            });
        }
        Ok(())
    }

    /// Catalog store over the configured directory.
    #[must_use]
    pub fn open_store(&self) -> MetadataStore {
        MetadataStore::new(
            &self.firmware_dir,
            Duration::from_secs(self.lock_timeout_secs),
        )
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Args)]
pub struct ServerConfig {
    /// Listen address
    #[arg(long, env = "FOTA_BIND", default_value = DEFAULT_BIND)]
    pub bind: SocketAddr,

    /// Storage settings
    #[command(flatten)]
    pub storage: StorageConfig,

    /// Basic-auth username
    #[arg(long, env = "FOTA_USERNAME", default_value = DEFAULT_USERNAME)]
    pub username: String,

    /// Basic-auth password
    #[arg(
        long,
        env = "FOTA_PASSWORD",
        default_value = DEFAULT_PASSWORD,
        hide_env_values = true
    )]
    pub password: String,

    /// Basic-auth realm
    #[arg(long, env = "FOTA_REALM", default_value = DEFAULT_REALM)]
    pub realm: String,

    /// Route exempt from authentication; a trailing `*` matches a prefix (repeatable)
    #[arg(
        long = "public-path",
        env = "FOTA_PUBLIC_PATHS",
        value_delimiter = ',',
        default_values = DEFAULT_PUBLIC_PATHS
    )]
    pub public_paths: Vec<String>,

    /// Status code answered to requests whose request line cannot be parsed
    #[arg(long, env = "FOTA_MALFORMED_STATUS", default_value_t = DEFAULT_MALFORMED_STATUS)]
    pub malformed_status: u16,

    /// Largest accepted upload body in bytes
    #[arg(long, env = "FOTA_MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: u64,

    /// Seconds allowed for a client to send its request head
    #[arg(
        long,
        env = "FOTA_HEADER_TIMEOUT_SECS",
        default_value_t = DEFAULT_HEADER_TIMEOUT_SECS
    )]
    pub header_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            storage: StorageConfig::default(),
            username: DEFAULT_USERNAME.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            realm: DEFAULT_REALM.to_string(),
            public_paths: DEFAULT_PUBLIC_PATHS.iter().map(ToString::to_string).collect(),
            malformed_status: DEFAULT_MALFORMED_STATUS,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            header_timeout_secs: DEFAULT_HEADER_TIMEOUT_SECS,
        }
    }
}

impl ServerConfig {
    /// Validate configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - the username or password is empty
    /// - the chunk size is zero
    /// - the malformed-request status is not a 4xx or 5xx code
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.storage.validate()?;

        if self.username.is_empty() || self.password.is_empty() {
            return Err(ConfigError::Invalid {
                setting: "credentials",
                reason: "username and password must not be empty".to_string(),
            });
        }

        if !(400..=599).contains(&self.malformed_status) {
            return Err(ConfigError::Invalid {
                setting: "malformed status",
                reason: format!("{} is not a 4xx or 5xx code", self.malformed_status),
            });
        }

        if self.header_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                setting: "header timeout",
                reason: "must be at least 1 second".to_string(),
            });
        }

        Ok(())
    }

    /// Authentication policy for the configured credentials and public paths.
    #[must_use]
    pub fn auth_policy(&self) -> AuthPolicy {
        AuthPolicy::new(
            Credentials::new(&self.username, &self.password),
            &self.realm,
            self.public_paths
                .iter()
                .filter(|p| !p.is_empty())
                .map(PublicPath::new)
                .collect(),
        )
    }

    /// Per-connection protocol settings.
    #[must_use]
    pub fn protocol_options(&self) -> ProtocolOptions {
        ProtocolOptions {
            chunk_size: self.storage.chunk_size,
            malformed_status: Status::from_code(self.malformed_status),
            max_upload_bytes: self.max_upload_bytes,
            header_timeout: Duration::from_secs(self.header_timeout_secs),
        }
    }
}
