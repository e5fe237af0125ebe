//! Shared harness for the HTTP integration tests
//!
//! Starts a gateway over an in-memory bucket on an ephemeral port.

#![allow(dead_code)]

use bytes::Bytes;
use filegate::auth::jwt::JwtAuthenticator;
use filegate::auth::Authenticator;
use filegate::config::Config;
use filegate::server::{Gateway, HttpServer};
use filegate::storage::memory::MemoryBackend;
use filegate::storage::StorageBackend;
use filegate::GatewayClient;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const TEST_SECRET: &str = "integration-test-secret";
pub const TEST_ORIGIN: &str = "http://localhost:4321";

/// Part size floor used by the harness so tests can move small payloads
pub const TEST_MIN_PART_SIZE: u64 = 1024;

/// Running gateway plus handles into it
pub struct TestGateway {
    pub addr: SocketAddr,
    pub storage: Arc<MemoryBackend>,
    pub http: reqwest::Client,
    _server_handle: JoinHandle<()>,
}

impl TestGateway {
    /// Gateway without authentication
    pub async fn start() -> Self {
        Self::start_with(test_config(), None).await
    }

    /// Gateway requiring an HS256 session token on protected routes
    pub async fn start_with_auth() -> Self {
        let authenticator: Arc<dyn Authenticator> =
            Arc::new(JwtAuthenticator::new_hs256(TEST_SECRET));
        Self::start_with(test_config(), Some(authenticator)).await
    }

    pub async fn start_with(config: Config, auth: Option<Arc<dyn Authenticator>>) -> Self {
        let storage = Arc::new(MemoryBackend::new(config.upload.min_part_size));
        let backend: Arc<dyn StorageBackend> = storage.clone();
        let gateway = Gateway::with_authenticator(&config, backend, auth);

        let server = HttpServer::bind("127.0.0.1:0".parse().unwrap(), Arc::new(gateway))
            .await
            .expect("test server should bind");
        let addr = server.local_addr();
        let server_handle = tokio::spawn(async move {
            let _ = server.run().await;
        });

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client should build");

        Self {
            addr,
            storage,
            http,
            _server_handle: server_handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    /// Typed client pointed at this gateway
    pub fn client(&self) -> GatewayClient {
        GatewayClient::with_client(self.http.clone(), self.base_url())
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self._server_handle.abort();
    }
}

/// Config with small part sizes and the default dev origins
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.server.address = "127.0.0.1:0".into();
    config.upload.min_part_size = TEST_MIN_PART_SIZE;
    config.upload.chunk_size = TEST_MIN_PART_SIZE;
    config.upload.list_page_size = 2;
    config
}

/// Deterministic payload of `size` bytes
pub fn patterned_payload(size: usize) -> Bytes {
    Bytes::from((0..size).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
}

/// Random payload of `size` bytes
pub fn random_payload(size: usize) -> Bytes {
    use rand::Rng;
    let mut rng = rand::rng();
    let data: Vec<u8> = (0..size).map(|_| rng.random()).collect();
    Bytes::from(data)
}

/// HS256 session token signed with [`TEST_SECRET`]
pub fn generate_test_jwt(subject: &str, expires_in_secs: u64) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct Claims {
        sub: String,
        exp: u64,
        iat: u64,
    }

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs();

    encode(
        &Header::default(),
        &Claims {
            sub: subject.to_string(),
            exp: now + expires_in_secs,
            iat: now,
        },
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .expect("token should encode")
}
