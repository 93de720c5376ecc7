//! Error taxonomy (spec.md §7).
//!
//! Engine errors are wire-visible responses, not diagnostics, so they are
//! their own type rather than `anyhow::Error` — but loader/build-time code
//! still uses `anyhow` (see `spec::loader`) and converts into `AppError`
//! only at the point an error becomes part of a dispatched response.

use crate::model::{Body, Response};
use serde_json::{json, Map, Value};
use std::fmt;

/// One `body.type` value from spec.md §7's taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFoundRoute,
    NotFound,
    ForbiddenSys,
    Forbidden,
    BadRequest,
    InvalidRequest,
    ServerErrorEmptyResponse,
    ServerErrorRecursionDepthExceeded,
    InternalError,
    RequestRateExceeded,
}

impl ErrorKind {
    pub fn slug(self) -> &'static str {
        match self {
            ErrorKind::NotFoundRoute => "not_found#route",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ForbiddenSys => "forbidden#sys",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::ServerErrorEmptyResponse => "server_error#empty_response",
            ErrorKind::ServerErrorRecursionDepthExceeded => {
                "server_error#request_recursion_depth_exceeded"
            }
            ErrorKind::InternalError => "internal_error",
            ErrorKind::RequestRateExceeded => "request_rate_exceeded",
        }
    }

    pub fn default_status(self) -> u16 {
        match self {
            ErrorKind::NotFoundRoute | ErrorKind::NotFound => 404,
            ErrorKind::ForbiddenSys | ErrorKind::Forbidden => 403,
            ErrorKind::BadRequest | ErrorKind::InvalidRequest => 400,
            ErrorKind::RequestRateExceeded => 429,
            ErrorKind::ServerErrorEmptyResponse
            | ErrorKind::ServerErrorRecursionDepthExceeded
            | ErrorKind::InternalError => 500,
        }
    }
}

/// A response shaped as `{type, title, detail, method, uri, ...}` with an
/// attached cause chain, per spec.md §3 "Error".
#[derive(Debug, Clone)]
pub struct AppError {
    pub status: u16,
    pub error_type: String,
    pub title: String,
    pub detail: Option<String>,
    pub method: Option<String>,
    pub uri: Option<String>,
    pub extra: Map<String, Value>,
    pub cause: Option<Box<AppError>>,
}

impl AppError {
    pub fn new(kind: ErrorKind, title: impl Into<String>) -> Self {
        AppError {
            status: kind.default_status(),
            error_type: kind.slug().to_string(),
            title: title.into(),
            detail: None,
            method: None,
            uri: None,
            extra: Map::new(),
            cause: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn with_cause(mut self, cause: AppError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Render into a `Response` whose body carries the RFC 7807-ish shape
    /// from spec.md §6, `type` prefixed by `default_error_uri` unless
    /// already absolute.
    pub fn into_response(self, default_error_uri: &str) -> Response {
        let type_value = if self.error_type.starts_with("http://")
            || self.error_type.starts_with("https://")
        {
            self.error_type.clone()
        } else {
            format!("{default_error_uri}{}", self.error_type)
        };

        let mut body = Map::new();
        body.insert("type".to_string(), json!(type_value));
        body.insert("title".to_string(), json!(self.title));
        if let Some(detail) = &self.detail {
            body.insert("detail".to_string(), json!(detail));
        }
        if let Some(method) = &self.method {
            body.insert("method".to_string(), json!(method));
        }
        if let Some(uri) = &self.uri {
            body.insert("uri".to_string(), json!(uri));
        }
        for (k, v) in self.extra {
            body.insert(k, v);
        }

        let mut resp = Response::new(self.status, Body::Json(Value::Object(body)));
        resp.headers
            .set("content-type", "application/problem+json");
        resp
    }

    /// True if a JSON value already has the `{type, title, ...}` error shape.
    pub fn value_is_error_shaped(value: &Value) -> bool {
        value
            .as_object()
            .map(|o| o.contains_key("type") && o.contains_key("title"))
            .unwrap_or(false)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.error_type, self.status, self.title)
    }
}

impl std::error::Error for AppError {}

impl AppError {
    pub fn not_found_route(uri: &str, method: &str) -> Self {
        AppError::new(ErrorKind::NotFoundRoute, "No matching route")
            .with_uri(uri)
            .with_method(method)
    }

    pub fn forbidden_sys(uri: &str) -> Self {
        AppError::new(ErrorKind::ForbiddenSys, "Direct access to /sys is forbidden")
            .with_uri(uri)
    }

    pub fn recursion_depth_exceeded(depth: u32, max_depth: u32, chain: Vec<String>) -> Self {
        AppError::new(
            ErrorKind::ServerErrorRecursionDepthExceeded,
            "Maximum request recursion depth exceeded",
        )
        .with_extra("depth", json!(depth))
        .with_extra("maxDepth", json!(max_depth))
        .with_extra("chain", json!(chain))
    }

    pub fn empty_response(uri: &str, method: &str) -> Self {
        AppError::new(ErrorKind::ServerErrorEmptyResponse, "Handler produced no response")
            .with_uri(uri)
            .with_method(method)
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        AppError::new(ErrorKind::BadRequest, "Request validation failed").with_detail(detail)
    }

    pub fn rate_exceeded() -> Self {
        AppError::new(ErrorKind::RequestRateExceeded, "Rate limit exceeded")
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        AppError::new(ErrorKind::InternalError, "Internal error").with_detail(detail)
    }
}
