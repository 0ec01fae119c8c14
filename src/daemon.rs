//! Daemon - the main bridge service
//!
//! Wires configuration, the device store, the device manager and the HTTP
//! API together and runs until interrupted.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::api::ApiServerBuilder;
use crate::devices::{DeviceManager, DeviceStore, SimulatedFactory, TransportFactory};
use crate::{Config, Result, notify};

/// The bridge daemon
pub struct Daemon {
    config: Config,
    transports: Arc<dyn TransportFactory>,
}

impl Daemon {
    /// Create a daemon using the simulated device backend
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            transports: Arc::new(SimulatedFactory::default()),
        }
    }

    /// Use another device backend
    #[must_use]
    pub fn with_transport(mut self, transports: Arc<dyn TransportFactory>) -> Self {
        self.transports = transports;
        self
    }

    /// Build the device manager and define every known device
    ///
    /// Stored devices come first, then devices declared in the config file
    /// under names not already stored.
    ///
    /// # Errors
    ///
    /// Returns error if the device store exists but cannot be read
    pub async fn start(&self) -> Result<Arc<DeviceManager>> {
        let store = DeviceStore::in_dir(&self.config.data_dir);
        let stored = store.load()?;

        let manager = Arc::new(
            DeviceManager::new(
                Arc::clone(&self.transports),
                notify::from_url(self.config.upstream_url.as_deref()),
            )
            .with_store(store)
            .with_retry_interval(self.config.retry_interval),
        );

        let mut known = HashSet::new();
        for definition in stored {
            let name = definition.name.clone();
            match manager.restore(definition).await {
                Ok(()) => {
                    known.insert(name);
                }
                Err(e) => tracing::error!(device = %name, error = %e, "failed to restore device"),
            }
        }

        for request in &self.config.devices {
            if known.contains(request.name.trim()) {
                tracing::debug!(device = %request.name, "config device already stored");
                continue;
            }
            let name = request.name.clone();
            let defined = match request.clone().into_spec() {
                Ok(spec) => manager.define(spec).await.map(|_| ()),
                Err(e) => Err(e),
            };
            if let Err(e) = defined {
                tracing::error!(device = %name, error = %e, "failed to define config device");
            }
        }

        Ok(manager)
    }

    /// Run the daemon until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if the daemon encounters a fatal error
    pub async fn run(self) -> Result<()> {
        let manager = self.start().await?;
        tracing::info!(
            port = self.config.api_server.port,
            data_dir = %self.config.data_dir.display(),
            retry_secs = self.config.retry_interval.as_secs(),
            "daemon running"
        );

        let api = ApiServerBuilder::new(Arc::clone(&manager), self.config.api_server.port)
            .api_key(self.config.api_server.api_key.clone())
            .build()
            .spawn();

        // Set up shutdown signal
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = shutdown_tx.send(()).await;
            }
        });

        let result = tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::info!("shutdown requested");
                Ok(())
            }
            joined = api => match joined {
                Ok(result) => result,
                Err(e) => Err(crate::Error::Config(format!("API server task failed: {e}"))),
            },
        };

        manager.shutdown().await;
        tracing::info!("daemon stopped");
        result
    }
}
