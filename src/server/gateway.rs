//! Request pipeline
//!
//! `Gateway::handle` runs every request through the same stages: routing,
//! the auth guard for protected routes, body collection under the size cap,
//! handler dispatch, error rendering, then CORS decoration and metrics.

use super::cors::CorsPolicy;
use super::error::ApiError;
use super::handlers::{Handlers, RequestContext};
use super::ServerError;
use crate::auth::{self, AuthRequest, Authenticator};
use crate::config::Config;
use crate::metrics;
use crate::router::{QueryParams, RequestParser, Route};
use crate::storage::StorageBackend;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{CONTENT_LENGTH, ORIGIN};
use hyper::{Request, Response};
use std::sync::Arc;
use std::time::Instant;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The gateway: one pipeline in front of the route handlers
pub struct Gateway {
    parser: RequestParser,
    cors: CorsPolicy,
    authenticator: Option<Arc<dyn Authenticator>>,
    handlers: Handlers,
    max_body_size: usize,
}

impl Gateway {
    /// Build from config, with the authenticator the config describes
    pub fn new(config: &Config, storage: Arc<dyn StorageBackend>) -> Result<Self, ServerError> {
        let authenticator = auth::from_config(&config.auth)?;
        Ok(Self::with_authenticator(config, storage, authenticator))
    }

    /// Build with an explicit authenticator (`None` leaves every route open)
    pub fn with_authenticator(
        config: &Config,
        storage: Arc<dyn StorageBackend>,
        authenticator: Option<Arc<dyn Authenticator>>,
    ) -> Self {
        Self {
            parser: RequestParser::new(&config.server.base_path),
            cors: CorsPolicy::from_config(&config.cors),
            authenticator,
            handlers: Handlers::new(config, storage),
            max_body_size: config.server.max_body_size,
        }
    }

    /// Handle one request. Never fails: errors become responses.
    #[tracing::instrument(
        name = "http.request",
        skip_all,
        fields(
            http.method = %req.method(),
            http.path = %req.uri().path(),
            http.route = tracing::field::Empty,
            http.status_code = tracing::field::Empty
        )
    )]
    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let start = Instant::now();
        let origin = req
            .headers()
            .get(ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let (route, result) = self.process(req).await;

        let mut response = match result {
            Ok(response) => response,
            Err(err) => {
                let status = err.status();
                if status.is_server_error() {
                    tracing::error!(error = %err, "Request failed");
                } else {
                    tracing::warn!(status = status.as_u16(), error = %err, "Request rejected");
                }
                metrics::record_error(err.kind());
                err.into_response()
            }
        };

        self.cors.apply(origin.as_deref(), response.headers_mut());

        let route_name = route.map(|r| r.name()).unwrap_or("unmatched");
        let status = response.status().as_u16();
        let span = tracing::Span::current();
        span.record("http.route", route_name);
        span.record("http.status_code", status);
        metrics::record_request(route_name, status, start.elapsed().as_secs_f64());
        tracing::debug!(
            route = route_name,
            status = status,
            duration_ms = start.elapsed().as_millis() as u64,
            "Request completed"
        );

        response
    }

    async fn process<B>(
        &self,
        req: Request<B>,
    ) -> (Option<Route>, Result<Response<Full<Bytes>>, ApiError>)
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();
        let query = QueryParams::parse(parts.uri.query());

        let route = match self
            .parser
            .parse(parts.method.as_str(), parts.uri.path(), &query)
        {
            Ok(route) => route,
            Err(e) => return (None, Err(e.into())),
        };

        if route == Route::Preflight {
            return (Some(route), Ok(super::response::empty(hyper::StatusCode::OK)));
        }

        if route.requires_auth() {
            if let Some(authenticator) = &self.authenticator {
                let request =
                    AuthRequest::from_headers(parts.method.as_str(), parts.uri.path(), &parts.headers);
                if let Err(e) = authenticator.authenticate(&request).await {
                    tracing::warn!(route = route.name(), error = %e, "Authentication failed");
                    return (Some(route), Err(e.into()));
                }
            }
        }

        let body = match self.collect_body(&parts.headers, body).await {
            Ok(body) => body,
            Err(e) => return (Some(route), Err(e)),
        };

        let ctx = RequestContext {
            query,
            headers: parts.headers,
            body,
        };
        (Some(route), self.handlers.dispatch(route, ctx).await)
    }

    /// Buffer the body, refusing anything over `max_body_size`
    async fn collect_body<B>(
        &self,
        headers: &hyper::HeaderMap,
        body: B,
    ) -> Result<Bytes, ApiError>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        let too_large = ApiError::PayloadTooLarge {
            limit: self.max_body_size,
        };

        let declared = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if declared.is_some_and(|len| len > self.max_body_size as u64) {
            return Err(too_large);
        }

        match Limited::new(body, self.max_body_size).collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err(too_large),
            Err(e) => Err(ApiError::BadRequest(format!("Failed to read body: {}", e))),
        }
    }
}
