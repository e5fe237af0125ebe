//! Gateway router
//!
//! Maps method, path (below the configured base path) and the `action`
//! query parameter to a [`Route`].

use percent_encoding::percent_decode_str;
use std::collections::HashMap;
use thiserror::Error;

/// Router errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Method {method} not allowed for {path}")]
    MethodNotAllowed { method: String, path: String },

    #[error("Missing action parameter")]
    MissingAction,

    #[error("Unknown action: {0}")]
    UnknownAction(String),
}

/// Gateway operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// POST /api/multipart-upload?action=create
    CreateUpload,
    /// PUT /api/multipart-upload?action=upload-part
    UploadPart,
    /// POST /api/multipart-upload?action=complete
    CompleteUpload,
    /// DELETE /api/multipart-upload?action=abort
    AbortUpload,
    /// POST /api/upload
    SimpleUpload,
    /// GET /api/asset?key=
    ReadObject,
    /// DELETE /api/delete-asset
    DeleteObject,
    /// GET /api/list-assets
    ListObjects,
    /// GET /health
    Health,
    /// OPTIONS on any path
    Preflight,
}

impl Route {
    /// Whether the route needs an authenticated session
    pub fn requires_auth(&self) -> bool {
        matches!(
            self,
            Route::CreateUpload
                | Route::UploadPart
                | Route::CompleteUpload
                | Route::AbortUpload
                | Route::SimpleUpload
                | Route::DeleteObject
                | Route::ListObjects
        )
    }

    /// Label used in logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            Route::CreateUpload => "multipart_create",
            Route::UploadPart => "multipart_upload_part",
            Route::CompleteUpload => "multipart_complete",
            Route::AbortUpload => "multipart_abort",
            Route::SimpleUpload => "simple_upload",
            Route::ReadObject => "read_object",
            Route::DeleteObject => "delete_object",
            Route::ListObjects => "list_objects",
            Route::Health => "health",
            Route::Preflight => "preflight",
        }
    }
}

const MULTIPART_PATH: &str = "/api/multipart-upload";
const UPLOAD_PATH: &str = "/api/upload";
const ASSET_PATH: &str = "/api/asset";
const DELETE_PATH: &str = "/api/delete-asset";
const LIST_PATH: &str = "/api/list-assets";
const HEALTH_PATH: &str = "/health";

/// Request parser bound to a base path
#[derive(Debug, Clone, Default)]
pub struct RequestParser {
    base_path: String,
}

impl RequestParser {
    /// `base_path` is either empty or starts with `/` without a trailing one
    pub fn new(base_path: &str) -> Self {
        Self {
            base_path: base_path.trim_end_matches('/').to_string(),
        }
    }

    /// Resolve a request to a route
    pub fn parse(&self, method: &str, path: &str, query: &QueryParams) -> Result<Route, RouterError> {
        if method == "OPTIONS" {
            return Ok(Route::Preflight);
        }

        let not_found = || RouterError::NotFound(path.to_string());
        let local = path.strip_prefix(self.base_path.as_str()).ok_or_else(not_found)?;
        let local = match local.trim_end_matches('/') {
            "" => "/",
            trimmed => trimmed,
        };

        let expect = |allowed: &str, route: Route| {
            if method == allowed {
                Ok(route)
            } else {
                Err(RouterError::MethodNotAllowed {
                    method: method.to_string(),
                    path: path.to_string(),
                })
            }
        };

        match local {
            MULTIPART_PATH => self.parse_multipart(method, path, query),
            UPLOAD_PATH => expect("POST", Route::SimpleUpload),
            ASSET_PATH => expect("GET", Route::ReadObject),
            DELETE_PATH => expect("DELETE", Route::DeleteObject),
            LIST_PATH => expect("GET", Route::ListObjects),
            HEALTH_PATH => expect("GET", Route::Health),
            _ => Err(not_found()),
        }
    }

    fn parse_multipart(
        &self,
        method: &str,
        path: &str,
        query: &QueryParams,
    ) -> Result<Route, RouterError> {
        let method_not_allowed = || RouterError::MethodNotAllowed {
            method: method.to_string(),
            path: path.to_string(),
        };

        if !matches!(method, "POST" | "PUT" | "DELETE") {
            return Err(method_not_allowed());
        }

        let action = query
            .get("action")
            .filter(|a| !a.is_empty())
            .ok_or(RouterError::MissingAction)?;

        match (action, method) {
            ("create", "POST") => Ok(Route::CreateUpload),
            ("complete", "POST") => Ok(Route::CompleteUpload),
            ("upload-part", "PUT") => Ok(Route::UploadPart),
            ("abort", "DELETE") => Ok(Route::AbortUpload),
            ("create" | "complete" | "upload-part" | "abort", _) => Err(method_not_allowed()),
            (other, _) => Err(RouterError::UnknownAction(other.to_string())),
        }
    }
}

/// Decoded query string parameters. The first occurrence of a name wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    params: HashMap<String, String>,
}

impl QueryParams {
    pub fn parse(query: Option<&str>) -> Self {
        let mut params = HashMap::new();
        for pair in query.unwrap_or("").split('&').filter(|p| !p.is_empty()) {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            params
                .entry(decode_component(name))
                .or_insert_with(|| decode_component(value));
        }
        Self { params }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// Form-urlencoded component: `+` is a space, then percent-decoding
fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(method: &str, path: &str, query: &str) -> Result<Route, RouterError> {
        RequestParser::new("").parse(method, path, &QueryParams::parse(Some(query)))
    }

    #[test]
    fn test_multipart_actions() {
        assert_eq!(
            parse("POST", "/api/multipart-upload", "action=create"),
            Ok(Route::CreateUpload)
        );
        assert_eq!(
            parse("PUT", "/api/multipart-upload", "action=upload-part&partNumber=1"),
            Ok(Route::UploadPart)
        );
        assert_eq!(
            parse("POST", "/api/multipart-upload", "action=complete"),
            Ok(Route::CompleteUpload)
        );
        assert_eq!(
            parse("DELETE", "/api/multipart-upload", "action=abort"),
            Ok(Route::AbortUpload)
        );
    }

    #[test]
    fn test_missing_and_unknown_action() {
        assert_eq!(
            parse("POST", "/api/multipart-upload", ""),
            Err(RouterError::MissingAction)
        );
        assert_eq!(
            parse("POST", "/api/multipart-upload", "action=explode"),
            Err(RouterError::UnknownAction("explode".into()))
        );
        assert_eq!(
            RouterError::UnknownAction("explode".into()).to_string(),
            "Unknown action: explode"
        );
    }

    #[test]
    fn test_wrong_method() {
        assert!(matches!(
            parse("GET", "/api/multipart-upload", "action=create"),
            Err(RouterError::MethodNotAllowed { .. })
        ));
        assert!(matches!(
            parse("PUT", "/api/multipart-upload", "action=create"),
            Err(RouterError::MethodNotAllowed { .. })
        ));
        assert!(matches!(
            parse("POST", "/api/asset", "key=a"),
            Err(RouterError::MethodNotAllowed { .. })
        ));
    }

    #[test]
    fn test_simple_routes() {
        assert_eq!(parse("POST", "/api/upload", ""), Ok(Route::SimpleUpload));
        assert_eq!(parse("GET", "/api/asset", "key=a"), Ok(Route::ReadObject));
        assert_eq!(parse("DELETE", "/api/delete-asset", ""), Ok(Route::DeleteObject));
        assert_eq!(parse("GET", "/api/list-assets/", ""), Ok(Route::ListObjects));
        assert_eq!(parse("GET", "/health", ""), Ok(Route::Health));
        assert_eq!(parse("OPTIONS", "/anything", ""), Ok(Route::Preflight));
        assert!(matches!(
            parse("GET", "/api/unknown", ""),
            Err(RouterError::NotFound(_))
        ));
    }

    #[test]
    fn test_base_path() {
        let parser = RequestParser::new("/files");
        let query = QueryParams::default();
        assert_eq!(
            parser.parse("GET", "/files/api/list-assets", &query),
            Ok(Route::ListObjects)
        );
        assert!(matches!(
            parser.parse("GET", "/api/list-assets", &query),
            Err(RouterError::NotFound(_))
        ));
        assert!(matches!(
            parser.parse("GET", "/filesapi/list-assets", &query),
            Err(RouterError::NotFound(_))
        ));
    }

    #[test]
    fn test_auth_requirements() {
        assert!(Route::UploadPart.requires_auth());
        assert!(Route::SimpleUpload.requires_auth());
        assert!(Route::ListObjects.requires_auth());
        assert!(Route::DeleteObject.requires_auth());
        assert!(!Route::ReadObject.requires_auth());
        assert!(!Route::Health.requires_auth());
        assert!(!Route::Preflight.requires_auth());
    }

    #[test]
    fn test_query_decoding() {
        let query = QueryParams::parse(Some("key=my%20file+name.txt&a=1&a=2&flag"));
        assert_eq!(query.get("key"), Some("my file name.txt"));
        assert_eq!(query.get("a"), Some("1"));
        assert_eq!(query.get("flag"), Some(""));
        assert_eq!(query.get("missing"), None);
    }
}
