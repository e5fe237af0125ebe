//! Configuration module for filegate
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Mebibyte, the unit every size default below is expressed in.
const MIB: u64 = 1024 * 1024;

/// Largest page the list endpoint may request from the backend in one call.
pub const MAX_LIST_PAGE_SIZE: usize = 1000;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server
            .address
            .parse::<SocketAddr>()
            .map_err(|e| {
                ConfigError::ValidationError(format!(
                    "Invalid server address '{}': {}",
                    self.server.address, e
                ))
            })?;

        if !self.server.base_path.is_empty()
            && (!self.server.base_path.starts_with('/') || self.server.base_path.ends_with('/'))
        {
            return Err(ConfigError::ValidationError(format!(
                "Invalid base_path '{}': must start with '/' and not end with '/'",
                self.server.base_path
            )));
        }

        if let StorageConfig::S3(ref s3) = self.storage {
            if s3.bucket.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "S3 storage requires a bucket name".into(),
                ));
            }
            if s3.access_key.is_some() != s3.secret_key.is_some() {
                return Err(ConfigError::ValidationError(
                    "S3 access_key and secret_key must be set together".into(),
                ));
            }
        }

        if self.upload.min_part_size == 0 {
            return Err(ConfigError::ValidationError(
                "upload.min_part_size must be positive".into(),
            ));
        }

        if self.upload.chunk_size < self.upload.min_part_size {
            return Err(ConfigError::ValidationError(format!(
                "upload.chunk_size ({}) must be at least upload.min_part_size ({})",
                self.upload.chunk_size, self.upload.min_part_size
            )));
        }

        if self.upload.list_page_size == 0 || self.upload.list_page_size > MAX_LIST_PAGE_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "upload.list_page_size must be between 1 and {}",
                MAX_LIST_PAGE_SIZE
            )));
        }

        if self.auth.enabled {
            match self.auth.jwt {
                Some(ref jwt) if jwt.secret.as_deref().is_some_and(|s| !s.is_empty()) => {
                    match jwt.algorithm.to_uppercase().as_str() {
                        "HS256" | "RS256" => {}
                        alg => {
                            return Err(ConfigError::ValidationError(format!(
                                "Unsupported JWT algorithm '{}': must be 'HS256' or 'RS256'",
                                alg
                            )))
                        }
                    }
                }
                _ => {
                    return Err(ConfigError::ValidationError(
                        "auth.enabled requires auth.jwt.secret".into(),
                    ))
                }
            }
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
    /// Path prefix every API route lives under, e.g. `/files`. Empty for none.
    #[serde(default)]
    pub base_path: String,
    /// Largest request body the gateway will buffer.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            base_path: String::new(),
            max_body_size: default_max_body_size(),
        }
    }
}

fn default_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_body_size() -> usize {
    100 * MIB as usize
}

/// Storage backend selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// Process-local store, lost on restart. Useful for development and tests.
    #[default]
    #[serde(rename = "memory")]
    Memory,
    /// S3-compatible object store
    #[serde(rename = "s3")]
    S3(S3Config),
}

/// S3 backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    /// Address objects as `endpoint/bucket/key`. Defaults on when an endpoint is set.
    #[serde(default)]
    pub force_path_style: Option<bool>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Upload policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Smallest size the backend accepts for a non-final part.
    #[serde(default = "default_min_part_size")]
    pub min_part_size: u64,
    /// Chunk size the reference client splits files into.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Objects fetched per backend list call.
    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            min_part_size: default_min_part_size(),
            chunk_size: default_chunk_size(),
            list_page_size: default_list_page_size(),
        }
    }
}

fn default_min_part_size() -> u64 {
    5 * MIB
}

fn default_chunk_size() -> u64 {
    5 * MIB
}

fn default_list_page_size() -> usize {
    500
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    /// Public site URL, appended to the allow-list when set.
    #[serde(default)]
    pub origin: Option<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
            origin: None,
        }
    }
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:4321".to_string(),
        "http://localhost:8787".to_string(),
    ]
}

/// Authentication configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub jwt: Option<JwtConfig>,
}

/// JWT session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// HMAC secret for HS256, PEM public key for RS256.
    pub secret: Option<String>,
    #[serde(default = "default_jwt_algorithm")]
    pub algorithm: String,
    #[serde(default)]
    pub issuer: Option<String>,
    /// Cookie carrying the session token when no bearer header is sent.
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
}

fn default_jwt_algorithm() -> String {
    "HS256".to_string()
}

fn default_cookie_name() -> String {
    "session".to_string()
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(matches!(config.storage, StorageConfig::Memory));
        assert_eq!(config.upload.min_part_size, 5 * 1024 * 1024);
        assert_eq!(config.upload.list_page_size, 500);
    }

    #[test]
    fn test_chunk_smaller_than_min_part_rejected() {
        let mut config = Config::default();
        config.upload.chunk_size = 1024;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_auth_without_secret_rejected() {
        let mut config = Config::default();
        config.auth.enabled = true;
        assert!(config.validate().is_err());

        config.auth.jwt = Some(JwtConfig {
            secret: Some("s3cret".into()),
            algorithm: "HS256".into(),
            issuer: None,
            cookie_name: "session".into(),
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unsupported_algorithm_rejected() {
        let mut config = Config::default();
        config.auth.enabled = true;
        config.auth.jwt = Some(JwtConfig {
            secret: Some("s3cret".into()),
            algorithm: "none".into(),
            issuer: None,
            cookie_name: "session".into(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_s3_bucket_rejected() {
        let config = Config {
            storage: StorageConfig::S3(S3Config {
                bucket: " ".into(),
                region: "us-east-1".into(),
                endpoint: None,
                access_key: None,
                secret_key: None,
                force_path_style: None,
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_base_path_shape() {
        let mut config = Config::default();
        config.server.base_path = "/files/".into();
        assert!(config.validate().is_err());
        config.server.base_path = "files".into();
        assert!(config.validate().is_err());
        config.server.base_path = "/files".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_address_rejected() {
        let mut config = Config::default();
        config.server.address = "not-an-address".into();
        assert!(config.validate().is_err());
    }
}
