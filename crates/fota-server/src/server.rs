//! Server state management and orchestration.
//!
//! Shared state is built once at startup: the catalog store, the ingestor
//! writing through it, the auth policy and the protocol options.

use crate::catalog::MetadataStore;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::http::ProtocolOptions;
use crate::http::auth::AuthPolicy;
use crate::ingest::Ingestor;
use crate::platform::{HostLink, LogIndicator, NetworkLink, StatusIndicator};
use std::sync::Arc;
use std::time::SystemTime;

/// Shared application state for connection handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Catalog and binary store
    store: Arc<MetadataStore>,

    /// Upload path into the store
    ingestor: Ingestor,

    /// Per-route authentication
    auth: AuthPolicy,

    /// Connection settings
    options: ProtocolOptions,

    /// Activity light toggled per connection
    indicator: Arc<dyn StatusIndicator>,

    /// Server start time
    started_at: SystemTime,
}

impl AppState {
    /// Create application state from configuration.
    ///
    /// Creates the firmware directory and an empty catalog if either is
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if the configuration is invalid or the firmware
    /// directory cannot be prepared.
    pub fn new(config: &ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let store = Arc::new(config.storage.open_store());
        if store.ensure_layout()? {
            tracing::info!("Initialized firmware directory {}", store.dir().display());
        }

        let catalog = store.load();
        tracing::info!(
            "Loaded catalog with {} entries (latest version {})",
            catalog.len(),
            catalog.latest_version
        );

        let ingestor = Ingestor::new(
            store.clone(),
            config.storage.checksum,
            config.storage.chunk_size,
        );

        Ok(Self {
            store,
            ingestor,
            auth: config.auth_policy(),
            options: config.protocol_options(),
            indicator: Arc::new(LogIndicator::default()),
            started_at: SystemTime::now(),
        })
    }

    /// Replace the status indicator.
    #[must_use]
    pub fn with_indicator(mut self, indicator: Arc<dyn StatusIndicator>) -> Self {
        self.indicator = indicator;
        self
    }

    /// Catalog store.
    #[must_use]
    pub const fn store(&self) -> &Arc<MetadataStore> {
        &self.store
    }

    /// Ingestor writing through the store.
    #[must_use]
    pub const fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    /// Authentication policy.
    #[must_use]
    pub const fn auth(&self) -> &AuthPolicy {
        &self.auth
    }

    /// Protocol options.
    #[must_use]
    pub const fn options(&self) -> &ProtocolOptions {
        &self.options
    }

    /// Status indicator.
    #[must_use]
    pub fn indicator(&self) -> &dyn StatusIndicator {
        self.indicator.as_ref()
    }

    /// Server uptime in seconds.
    #[must_use]
    pub fn uptime_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.started_at)
            .unwrap_or_default()
            .as_secs()
    }
}

/// Server orchestration.
pub struct Server {
    state: Arc<AppState>,
    config: ServerConfig,
}

impl Server {
    /// Create a server from configuration.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if the state cannot be initialized.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let state = AppState::new(&config)?;
        Ok(Self {
            state: Arc::new(state),
            config,
        })
    }

    /// Shared state.
    #[must_use]
    pub const fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Run until interrupted (Ctrl-C) or the listener fails.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if binding fails or shutdown cannot be observed.
    pub async fn run(self) -> Result<(), ServerError> {
        let bind = self.config.bind;
        match HostLink::new(bind).address() {
            Some(ip) => tracing::info!(
                "FOTA server ready at http://{ip}:{} serving {}",
                bind.port(),
                self.config.storage.firmware_dir.display()
            ),
            None => tracing::warn!("Network address unavailable, listening on {bind}"),
        }
        tracing::info!(
            "Checksum algorithm: {}, chunk size: {} bytes",
            self.config.storage.checksum,
            self.config.storage.chunk_size
        );

        let state = self.state.clone();
        let mut http_server =
            tokio::spawn(async move { crate::http::start_server(bind, state).await });

        let finished = tokio::select! {
            result = &mut http_server => Some(result),
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(|e| ServerError::Shutdown(format!("Failed to listen for Ctrl-C: {e}")))?;
                None
            }
        };

        match finished {
            Some(Ok(result)) => result,
            Some(Err(e)) => Err(ServerError::Shutdown(format!("HTTP server task failed: {e}"))),
            None => {
                tracing::info!(
                    "Shutdown signal received after {}s, stopping server",
                    self.state.uptime_seconds()
                );
                http_server.abort();
                self.state.indicator().off();
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use tempfile::TempDir;

    #[test]
    fn test_state_creates_layout() {
        let dir = TempDir::new().unwrap();
        let mut config = ServerConfig::default();
        config.storage.firmware_dir = dir.path().join("nested").join("firmware");

        let state = AppState::new(&config).unwrap();
        assert!(state.store().document_path().exists());
        assert!(state.store().load().is_empty());
        assert_eq!(state.options().chunk_size, 1024);
    }

    #[test]
    fn test_state_rejects_invalid_config() {
        let dir = TempDir::new().unwrap();
        let mut config = ServerConfig::default();
        config.storage.firmware_dir = dir.path().to_path_buf();
        config.username = String::new();

        let err = AppState::new(&config).unwrap_err();
        assert!(matches!(err, ServerError::Config(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_custom_indicator() {
        let dir = TempDir::new().unwrap();
        let mut config = ServerConfig::default();
        config.storage.firmware_dir = dir.path().to_path_buf();

        let led = Arc::new(LogIndicator::default());
        let state = AppState::new(&config).unwrap().with_indicator(led.clone());
        state.indicator().on();
        assert!(led.is_on());
    }
}
