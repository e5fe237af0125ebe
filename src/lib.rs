//! Filegate Library
//!
//! File-storage gateway: a thin HTTP layer over an object-storage bucket
//! with chunked (multipart) upload and byte-range download.
//!
//! # Features
//!
//! - **Multipart Upload**: client-driven parts, committed atomically by the backend
//! - **Range Reads**: single byte-range requests with 206/416 semantics
//! - **Pluggable Storage**: in-memory or any S3-compatible bucket
//! - **Session Auth**: JWT from a bearer header or session cookie
//!
//! # Example
//!
//! ```no_run
//! use filegate::{config::Config, server::Server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let server = Server::new(config)?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod range;
pub mod router;
pub mod server;
pub mod storage;
pub mod upload;

// Re-export commonly used types
pub use client::GatewayClient;
pub use config::Config;
pub use server::Server;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
