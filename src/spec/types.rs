//! Dialect extension shapes parsed out of a merged spec document.
//!
//! The spec document itself is kept as `serde_json::Value` end to end — the
//! dialect is executable (declarative request chains, templated resources)
//! and doesn't fit a strict typed OpenAPI model the way a read-only API
//! description would. These types cover only the per-operation extension
//! stanzas the engine actually interprets.

use crate::dispatcher::Context;
use crate::model::{Request, Response};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    Path,
    Query,
    Header,
    Cookie,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "in")]
    pub location: ParamLocation,
    #[serde(default)]
    pub required: bool,
    pub schema: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MediaTypeSpec {
    pub schema: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequestBodySpec {
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub content: HashMap<String, MediaTypeSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilterSpec {
    #[serde(rename = "fn")]
    pub function: String,
    #[serde(default)]
    pub options: Value,
    #[serde(default)]
    pub method: Option<String>,
}

fn default_resource_method() -> String {
    "put".to_string()
}

/// A startup-time request template (resource phase, spec.md §4.3).
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceSpec {
    pub uri: Option<String>,
    #[serde(default = "default_resource_method")]
    pub method: String,
    #[serde(default)]
    pub body: Value,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// One verb entry under an OpenAPI `paths.<pattern>` path item.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct OperationSpec {
    #[serde(rename = "operationId")]
    pub operation_id: Option<String>,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    #[serde(default, rename = "requestBody")]
    pub request_body: Option<RequestBodySpec>,
    #[serde(default)]
    pub security: Vec<HashMap<String, Vec<String>>>,
    #[serde(rename = "x-request-handler", default)]
    pub request_handler: Option<Value>,
    #[serde(rename = "x-route-filters", default)]
    pub route_filters: Vec<FilterSpec>,
    #[serde(rename = "x-setup-handler", default)]
    pub setup_handler: Vec<ResourceSpec>,
    #[serde(rename = "x-hidden", default)]
    pub hidden: bool,
    #[serde(rename = "x-host-basePath", default)]
    pub host_base_path: Option<String>,
    #[serde(rename = "x-default-params", default)]
    pub default_params: HashMap<String, Value>,
    #[serde(default)]
    pub responses: HashMap<String, Value>,
}

/// A host-language callable bound by `operationId`.
pub type NativeHandler =
    Arc<dyn Fn(Context, Request) -> BoxFuture<'static, Response> + Send + Sync>;

/// Module-exported / embedder-registered `operationId → NativeHandler` table.
#[derive(Clone, Default)]
pub struct HandlerRegistry(HashMap<String, NativeHandler>);

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, operation_id: impl Into<String>, handler: NativeHandler) {
        self.0.insert(operation_id.into(), handler);
    }

    pub fn get(&self, operation_id: &str) -> Option<&NativeHandler> {
        self.0.get(operation_id)
    }

    pub fn extend(&mut self, other: HandlerRegistry) {
        self.0.extend(other.0);
    }
}

/// What a method entry on a route tree node resolves to: either a native
/// callable or a compiled declarative chain.
#[derive(Clone)]
pub enum CompiledOperation {
    Native(NativeHandler),
    Declarative(Arc<crate::handler_chain::CompiledChain>),
}

/// A filter accumulated on a node.
#[derive(Clone)]
pub struct FilterEntry {
    pub filter: Arc<dyn crate::filter::Filter>,
    pub options: Value,
    pub method: Option<http::Method>,
}
