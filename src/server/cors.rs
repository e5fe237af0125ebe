//! CORS header policy
//!
//! Every response gets the method, header and exposed-header lists. The
//! request's `Origin` is echoed back only when it is allow-listed.

use crate::config::CorsConfig;
use hyper::header::{
    HeaderMap, HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS, VARY,
};
use std::collections::HashSet;

const ALLOW_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type, Authorization, Range";
const EXPOSE_HEADERS: &str = "Content-Range, Accept-Ranges, Content-Length, ETag";

/// Allow-list based CORS policy
#[derive(Debug, Clone, Default)]
pub struct CorsPolicy {
    allowed_origins: HashSet<String>,
}

impl CorsPolicy {
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed_origins: origins
                .into_iter()
                .map(|o| normalize(o.as_ref()))
                .filter(|o| !o.is_empty())
                .collect(),
        }
    }

    /// Configured origins plus the site origin, when set
    pub fn from_config(config: &CorsConfig) -> Self {
        Self::new(config.allowed_origins.iter().chain(config.origin.iter()))
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.contains(&normalize(origin))
    }

    /// Decorate response headers for a request from `origin`
    pub fn apply(&self, origin: Option<&str>, headers: &mut HeaderMap) {
        headers.insert(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOW_METHODS),
        );
        headers.insert(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOW_HEADERS),
        );
        headers.insert(
            ACCESS_CONTROL_EXPOSE_HEADERS,
            HeaderValue::from_static(EXPOSE_HEADERS),
        );
        headers.insert(VARY, HeaderValue::from_static("Origin"));

        if let Some(origin) = origin.filter(|o| self.is_allowed(o)) {
            if let Ok(value) = HeaderValue::from_str(origin) {
                headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
            }
        }
    }
}

fn normalize(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}
