//! Request/Response/Body primitives (spec.md §3 "Data model").
//!
//! Headers and query are small insertion-ordered multimaps rather than
//! `HashMap` — the teacher's `HeaderVec`/`ParamVec` pattern
//! (`router/core.rs`) for request-scoped collections that are rarely
//! larger than a handful of entries.

use serde_json::Value;
use std::collections::HashMap;

/// Case-insensitive, multi-valued header/cookie bag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Headers(Vec::new())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(existing) = self.0.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
            existing.1 = value;
        } else {
            self.0.push((name.to_string(), value));
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.0.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Headers(iter.into_iter().collect())
    }
}

/// A query parameter value: one string, or several (`?tag=a&tag=a`).
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Single(String),
    Multi(Vec<String>),
}

impl QueryValue {
    pub fn first(&self) -> &str {
        match self {
            QueryValue::Single(s) => s,
            QueryValue::Multi(v) => v.first().map(|s| s.as_str()).unwrap_or(""),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query(Vec<(String, QueryValue)>);

impl Query {
    pub fn new() -> Self {
        Query(Vec::new())
    }

    pub fn parse(raw: &str) -> Self {
        let mut out: Vec<(String, QueryValue)> = Vec::new();
        for (k, v) in url::form_urlencoded::parse(raw.as_bytes()) {
            let k = k.into_owned();
            let v = v.into_owned();
            if let Some(existing) = out.iter_mut().find(|(name, _)| *name == k) {
                match &mut existing.1 {
                    QueryValue::Single(first) => {
                        existing.1 = QueryValue::Multi(vec![first.clone(), v]);
                    }
                    QueryValue::Multi(values) => values.push(v),
                }
            } else {
                out.push((k, QueryValue::Single(v)));
            }
        }
        Query(out)
    }

    pub fn get(&self, name: &str) -> Option<&QueryValue> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).map(|v| v.first())
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.0.iter().any(|(k, _)| k == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &QueryValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Opaque request/response payload (spec.md §3, §9 "dynamic request shape").
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    Bytes(Vec<u8>),
    Text(String),
    Json(Value),
}

impl Body {
    pub fn as_json(&self) -> Value {
        match self {
            Body::Empty => Value::Null,
            Body::Json(v) => v.clone(),
            Body::Text(s) => serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())),
            Body::Bytes(b) => serde_json::from_slice(b)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(b).into_owned())),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::Empty
    }
}

/// Structured path + optional host, per spec.md §3 "URI".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestUri {
    pub host: Option<String>,
    pub path: String,
}

impl RequestUri {
    pub fn parse(raw: &str) -> Self {
        if let Some(rest) = raw.strip_prefix("http://").or_else(|| raw.strip_prefix("https://")) {
            let mut parts = rest.splitn(2, '/');
            let host = parts.next().unwrap_or("").to_string();
            let path = format!("/{}", parts.next().unwrap_or(""));
            RequestUri {
                host: Some(host),
                path,
            }
        } else {
            RequestUri {
                host: None,
                path: raw.to_string(),
            }
        }
    }

    pub fn is_absolute(&self) -> bool {
        self.host.is_some()
    }
}

impl std::fmt::Display for RequestUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.host {
            Some(host) => write!(f, "http://{host}{}", self.path),
            None => write!(f, "{}", self.path),
        }
    }
}

/// A mutable request record (spec.md §3 "Request").
#[derive(Debug, Clone)]
pub struct Request {
    pub uri: RequestUri,
    pub method: String,
    pub headers: Headers,
    pub query: Query,
    pub params: HashMap<String, String>,
    pub body: Body,
    /// Type-coerced path/query/header values (spec.md §4.7 "validator
    /// coercion"), keyed by parameter name and filled in by the `validator`
    /// stock filter. Falls back to the raw string in `params`/`query` for
    /// any name it hasn't coerced.
    pub coerced_params: HashMap<String, Value>,
    pub coerced_query: HashMap<String, Value>,
    pub coerced_headers: HashMap<String, Value>,
}

impl Request {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        let uri = RequestUri::parse(&uri.into());
        let query = uri
            .path
            .split_once('?')
            .map(|(_, q)| Query::parse(q))
            .unwrap_or_default();
        let path = uri.path.split('?').next().unwrap_or("/").to_string();
        Request {
            uri: RequestUri {
                host: uri.host,
                path,
            },
            method: method.into().to_lowercase(),
            headers: Headers::new(),
            query,
            params: HashMap::new(),
            body: Body::Empty,
            coerced_params: HashMap::new(),
            coerced_query: HashMap::new(),
            coerced_headers: HashMap::new(),
        }
    }

    /// Record a coerced value for a path/query/header parameter (spec.md
    /// §4.7). `location` is the OpenAPI `in` value (`"path"`, `"query"`, or
    /// `"header"`); other locations are ignored.
    pub fn set_coerced(&mut self, location: &str, name: &str, value: Value) {
        match location {
            "path" => {
                self.coerced_params.insert(name.to_string(), value);
            }
            "query" => {
                self.coerced_query.insert(name.to_string(), value);
            }
            "header" => {
                self.coerced_headers.insert(name.to_string(), value);
            }
            _ => {}
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// The dispatcher's shallow-clone invariant (spec.md §4.5): every
    /// dispatched request is a fresh copy with defaults filled in, so a
    /// handler can never observe (or mutate) the caller's original.
    /// Taking `&self` here and handing the clone to the dispatcher is what
    /// makes that invariant hold by construction rather than convention.
    pub fn shallow_clone_with_defaults(&self) -> Self {
        Request {
            uri: self.uri.clone(),
            method: if self.method.is_empty() {
                "get".to_string()
            } else {
                self.method.clone()
            },
            headers: self.headers.clone(),
            query: self.query.clone(),
            params: HashMap::new(),
            body: self.body.clone(),
            coerced_params: HashMap::new(),
            coerced_query: HashMap::new(),
            coerced_headers: HashMap::new(),
        }
    }
}

/// A response record (spec.md §3 "Response").
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub body: Body,
}

impl Response {
    pub fn new(status: u16, body: Body) -> Self {
        Response {
            status,
            headers: Headers::new(),
            body,
        }
    }

    pub fn json(status: u16, value: Value) -> Self {
        Response::new(status, Body::Json(value))
    }

    pub fn is_success_shaped(&self) -> bool {
        self.status < 400
    }

    pub fn is_error_shaped(&self) -> bool {
        self.status >= 400
            && match &self.body {
                Body::Json(v) => crate::error::AppError::value_is_error_shaped(v),
                _ => false,
            }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_are_case_insensitive() {
        let mut h = Headers::new();
        h.set("X-Request-Id", "abc");
        assert_eq!(h.get("x-request-id"), Some("abc"));
    }

    #[test]
    fn query_collects_repeated_keys_into_multi() {
        let q = Query::parse("tag=a&tag=b&single=x");
        assert_eq!(
            q.get("tag"),
            Some(&QueryValue::Multi(vec!["a".to_string(), "b".to_string()]))
        );
        assert_eq!(q.get_str("single"), Some("x"));
    }

    #[test]
    fn request_uri_splits_query_string() {
        let req = Request::new("GET", "/pets?limit=10");
        assert_eq!(req.uri.path, "/pets");
        assert_eq!(req.query.get_str("limit"), Some("10"));
    }

    #[test]
    fn shallow_clone_has_fresh_params() {
        let mut req = Request::new("get", "/x");
        req.params.insert("id".to_string(), "1".to_string());
        let clone = req.shallow_clone_with_defaults();
        assert!(clone.params.is_empty());
        assert_eq!(req.params.get("id").map(String::as_str), Some("1"));
    }
}
