//! HTTP server module
//!
//! Wires config, storage, the gateway pipeline and the listeners together.

use crate::auth::AuthError;
use crate::config::{Config, ConfigError};
use crate::storage::{self, StorageError};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

pub mod cors;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod http;
pub mod response;

pub use cors::CorsPolicy;
pub use error::ApiError;
pub use gateway::Gateway;
pub use http::HttpServer;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Auth setup error: {0}")]
    Auth(#[from] AuthError),

    #[error("Server error: {0}")]
    RuntimeError(String),
}

/// The gateway process: storage backend, HTTP listener and metrics listener
pub struct Server {
    config: Config,
    addr: SocketAddr,
}

impl Server {
    pub fn new(config: Config) -> Result<Self, ServerError> {
        config.validate()?;
        let addr: SocketAddr = config
            .server
            .address
            .parse()
            .map_err(|e| ServerError::BindError(format!("{}", e)))?;

        Ok(Self { config, addr })
    }

    /// Run until Ctrl-C
    pub async fn run(self) -> Result<(), ServerError> {
        let storage = storage::from_config(&self.config.storage, &self.config.upload).await?;
        let gateway = Arc::new(Gateway::new(&self.config, storage)?);

        #[cfg(feature = "metrics")]
        let mut metrics_server = if self.config.metrics.enabled {
            let addr = SocketAddr::new(self.addr.ip(), self.config.metrics.port);
            let mut server = crate::metrics::server::MetricsServer::new(addr);
            server
                .start()
                .await
                .map_err(|e| ServerError::RuntimeError(e.to_string()))?;
            Some(server)
        } else {
            None
        };

        info!(
            address = %self.addr,
            base_path = %self.config.server.base_path,
            auth = self.config.auth.enabled,
            "Starting gateway"
        );

        let server = HttpServer::bind(self.addr, gateway).await?;
        server
            .run_until(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for shutdown signal");
                    std::future::pending::<()>().await;
                }
            })
            .await?;

        #[cfg(feature = "metrics")]
        if let Some(metrics_server) = metrics_server.as_mut() {
            metrics_server.shutdown().await;
        }

        info!("Shutting down server");
        Ok(())
    }
}
