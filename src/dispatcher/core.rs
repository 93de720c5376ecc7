//! The request dispatcher (spec.md §4.5). Grounded on the teacher's
//! `Dispatcher` for its instrumentation style and the Middleware-chain
//! concept; the concurrency primitive is tokio async rather than `may`
//! coroutines (the filter contract is `Future`-shaped — see `DESIGN.md`).

use crate::config::Config;
use crate::error::AppError;
use crate::filter::run_chain;
use crate::http_client::OutboundHttpClient;
use crate::ids::RequestId;
use crate::metrics::Metrics;
use crate::model::{Body, Request, Response};
use crate::ratelimit::RateLimiter;
use crate::router::{Node, NodeValue};
use crate::spec::CompiledOperation;
use futures::future::BoxFuture;
use http::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Coarse classification of a request for metrics/rate partitioning
/// (spec.md §3 "Per-request context", GLOSSARY "request class").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    External,
    Internal,
    InternalUpdate,
    InternalStartup,
}

impl RequestClass {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestClass::External => "external",
            RequestClass::Internal => "internal",
            RequestClass::InternalUpdate => "internal_update",
            RequestClass::InternalStartup => "internal_startup",
        }
    }
}

/// Everything a filter or handler needs about the request in flight,
/// distinct from the request body itself (spec.md §3 "Context").
#[derive(Clone)]
pub struct Context {
    pub request_id: RequestId,
    pub recursion_depth: u32,
    pub root_request: bool,
    pub request_class: RequestClass,
    pub chain: Vec<String>,
    pub dispatcher: Dispatcher,
}

impl Context {
    pub fn root(dispatcher: Dispatcher, incoming_request_id: Option<&str>) -> Self {
        Context {
            request_id: RequestId::from_header_or_new(incoming_request_id),
            recursion_depth: 0,
            root_request: true,
            request_class: RequestClass::External,
            chain: Vec::new(),
            dispatcher,
        }
    }

    /// The privileged startup context the resource phase dispatches
    /// through (spec.md §5 "Startup ordering"): depth 1 so the
    /// direct-`/sys` check (guarded on depth == 0) never applies to it.
    pub fn startup(dispatcher: Dispatcher) -> Self {
        Context {
            request_id: RequestId::new(),
            recursion_depth: 1,
            root_request: false,
            request_class: RequestClass::InternalStartup,
            chain: Vec::new(),
            dispatcher,
        }
    }

    /// A context for a request issued recursively from within this one
    /// (handler-chain request stanzas, `x-setup-handler`).
    pub fn child(&self) -> Self {
        Context {
            request_id: self.request_id.clone(),
            recursion_depth: self.recursion_depth + 1,
            root_request: false,
            request_class: if self.request_class == RequestClass::InternalStartup {
                RequestClass::InternalStartup
            } else {
                RequestClass::Internal
            },
            chain: self.chain.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

/// The immutable, shared engine state: route tree plus collaborators.
#[derive(Clone)]
pub struct Dispatcher {
    pub tree: Arc<Node>,
    pub config: Arc<Config>,
    pub metrics: Arc<dyn Metrics>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub http_client: Arc<dyn OutboundHttpClient>,
}

impl Dispatcher {
    pub fn new(
        tree: Arc<Node>,
        config: Arc<Config>,
        metrics: Arc<dyn Metrics>,
        rate_limiter: Arc<dyn RateLimiter>,
        http_client: Arc<dyn OutboundHttpClient>,
    ) -> Self {
        Dispatcher {
            tree,
            config,
            metrics,
            rate_limiter,
            http_client,
        }
    }

    /// Traverse the tree executing every `resources` template after the
    /// tree is sealed but before the server accepts connections (spec.md
    /// §4.3 "Resource phase", §5 "Startup ordering"). Each resource's
    /// `uri`/`body`/`headers` are expanded against
    /// `{request:{params:{domain: <node's first path segment>}}}`; a
    /// resource without a `uri` is fatal. Fails fast on the first resource
    /// whose dispatched response is error-shaped.
    pub async fn run_resource_phase(&self) -> anyhow::Result<()> {
        use crate::model::RequestUri;
        use anyhow::Context as _AnyhowContext;

        for (node_path, resource) in self.tree.collect_resources() {
            let uri_template = resource
                .uri
                .as_deref()
                .with_context(|| format!("resource under '{node_path}' is missing 'uri'"))?;
            let domain = node_path
                .trim_start_matches('/')
                .split('/')
                .next()
                .unwrap_or_default();
            let model = json!({ "request": { "params": { "domain": domain } } });

            let (uri_value, _) = crate::template::Template::compile(Value::String(uri_template.to_string()))
                .expand(&model);
            let uri = uri_value.as_str().unwrap_or(uri_template).to_string();

            let (body_value, _) = crate::template::Template::compile(resource.body.clone()).expand(&model);

            let mut req = crate::model::Request {
                uri: RequestUri::parse(&uri),
                method: resource.method.to_lowercase(),
                headers: Default::default(),
                query: Default::default(),
                params: Default::default(),
                body: if body_value.is_null() {
                    Body::Empty
                } else {
                    Body::Json(body_value)
                },
                coerced_params: Default::default(),
                coerced_query: Default::default(),
                coerced_headers: Default::default(),
            };
            for (name, value) in &resource.headers {
                let (expanded, _) = crate::template::Template::compile(Value::String(value.clone())).expand(&model);
                req.headers
                    .set(name, expanded.as_str().map(str::to_string).unwrap_or(value.clone()));
            }

            let ctx = Context::startup(self.clone());
            let resp = self.filtered_request(ctx, req).await;
            if resp.status >= 400 {
                anyhow::bail!(
                    "resource '{uri}' under '{node_path}' failed at startup with status {}",
                    resp.status
                );
            }
        }
        Ok(())
    }

    /// Public entry point: a fresh external request at recursion depth 0.
    /// `x-request-id` is honored if the caller already set it and is
    /// always present on the returned response (spec.md §6).
    pub async fn request(&self, req: Request) -> Response {
        let incoming = req.headers.get("x-request-id").map(str::to_string);
        let ctx = Context::root(self.clone(), incoming.as_deref());
        let mut resp = self.filtered_request(ctx.clone(), req).await;
        resp.headers.set("x-request-id", ctx.request_id.to_string());
        resp
    }

    /// Recursion-depth enforcement, the shallow-clone invariant, and the
    /// filter-stack wrap, shared between external requests and any
    /// recursive sub-dispatch (spec.md §4.5). The engine-level filter
    /// stack (spec.md §4.3, §4.4) wraps route lookup and the node's own
    /// filters from the outside: `x-request-filters` at recursion depth 0,
    /// `x-sub-request-filters` on every recursive call.
    pub fn filtered_request(&self, mut ctx: Context, req: Request) -> BoxFuture<'static, Response> {
        let this = self.clone();
        Box::pin(async move {
            if ctx.recursion_depth > this.config.max_depth {
                return AppError::recursion_depth_exceeded(
                    ctx.recursion_depth,
                    this.config.max_depth,
                    ctx.chain.clone(),
                )
                .into_response(&this.config.default_error_uri);
            }
            ctx.chain.push(req.uri.path.clone());
            let request = req.shallow_clone_with_defaults();

            let engine_filters = this.tree.value.as_ref().map(|root| {
                if ctx.recursion_depth == 0 {
                    root.request_filters.clone()
                } else {
                    root.sub_request_filters.clone()
                }
            });

            match engine_filters {
                Some(engine_filters) if !engine_filters.is_empty() => {
                    let dispatcher = this.clone();
                    run_chain(engine_filters, ctx, request, move |ctx, req| {
                        let dispatcher = dispatcher.clone();
                        Box::pin(async move { dispatcher.route_and_invoke(ctx, req).await })
                    })
                    .await
                }
                _ => this.route_and_invoke(ctx, request).await,
            }
        })
    }

    #[instrument(skip(self, ctx, req), fields(request_id = %ctx.request_id, path = %req.uri.path, method = %req.method))]
    async fn route_and_invoke(&self, ctx: Context, mut req: Request) -> Response {
        if req.uri.is_absolute() {
            return match self.http_client.send(req).await {
                Ok(resp) => resp,
                Err(e) => AppError::internal(e).into_response(&self.config.default_error_uri),
            };
        }

        if ctx.recursion_depth == 0 && is_sys_path(&req.uri.path) {
            return AppError::forbidden_sys(&req.uri.path).into_response(&self.config.default_error_uri);
        }

        let segments: Vec<&str> = req.uri.path.split('/').filter(|s| !s.is_empty()).collect();
        let method = match Method::from_bytes(req.method.to_uppercase().as_bytes()) {
            Ok(m) => m,
            Err(_) => {
                return AppError::bad_request("unrecognized HTTP method")
                    .into_response(&self.config.default_error_uri)
            }
        };

        let Some(matched) = self.tree.resolve(&segments) else {
            return AppError::not_found_route(&req.uri.path, &req.method)
                .into_response(&self.config.default_error_uri);
        };

        req.params = matched.params;
        let node_value = matched.value;
        let uri_path = req.uri.path.clone();
        let method_str = req.method.clone();

        let head_fallback = method == Method::HEAD && !node_value.methods.contains_key(&Method::HEAD);
        let op = node_value
            .methods
            .get(&method)
            .or_else(|| {
                if method == Method::HEAD {
                    node_value.methods.get(&Method::GET)
                } else {
                    None
                }
            })
            .cloned();

        let response = match op {
            Some(op) => {
                let applicable: Vec<_> = node_value
                    .filters
                    .iter()
                    .filter(|f| method_applies(f.method.as_ref(), &method))
                    .cloned()
                    .collect();
                debug!(handler = node_value.path.as_str(), filters = applicable.len(), "dispatching");
                run_chain(applicable, ctx, req, move |ctx, req| invoke(op.clone(), ctx, req)).await
            }
            None if node_value.listing && (req.uri.path.ends_with('/') || req.uri.path == "/") => {
                default_listing(self, &ctx, &req, node_value, &segments)
            }
            None => AppError::not_found_route(&req.uri.path, &req.method)
                .into_response(&self.config.default_error_uri),
        };

        let mut response = normalize(response, &uri_path, &method_str, &self.config.default_error_uri);
        if head_fallback {
            response.body = Body::Empty;
        }
        response
    }
}

fn method_applies(scoped: Option<&Method>, actual: &Method) -> bool {
    match scoped {
        None => true,
        Some(m) if m == actual => true,
        Some(m) if *m == Method::GET && *actual == Method::HEAD => true,
        _ => false,
    }
}

fn invoke(op: CompiledOperation, ctx: Context, req: Request) -> BoxFuture<'static, Response> {
    match op {
        CompiledOperation::Native(f) => f(ctx, req),
        CompiledOperation::Declarative(chain) => {
            Box::pin(async move { chain.execute(&ctx, &req).await })
        }
    }
}

/// `sys` as the second path segment (the first is the mounted domain/api
/// root, e.g. `/v1`) is reserved and unreachable from a direct external
/// request (spec.md §8: `GET /v1/sys/foo` → 403).
fn is_sys_path(path: &str) -> bool {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    segments.nth(1) == Some("sys")
}

/// Empty responses and unannotated >=400 statuses are normalized into the
/// wire error shape (spec.md §4.5 "response normalization").
fn normalize(resp: Response, uri_path: &str, method: &str, default_error_uri: &str) -> Response {
    if resp.body.is_empty() && resp.status < 300 {
        return AppError::empty_response(uri_path, method).into_response(default_error_uri);
    }
    if resp.status >= 400 && !resp.is_error_shaped() {
        let detail = match &resp.body {
            Body::Json(v) => v.clone(),
            Body::Text(t) => Value::String(t.clone()),
            _ => Value::Null,
        };
        return AppError::new(
            if resp.status == 404 {
                crate::error::ErrorKind::NotFound
            } else if resp.status == 403 {
                crate::error::ErrorKind::Forbidden
            } else {
                crate::error::ErrorKind::InternalError
            },
            "Request failed",
        )
        .with_status(resp.status)
        .with_uri(uri_path.to_string())
        .with_method(method.to_string())
        .with_extra("originalBody", detail)
        .into_response(default_error_uri);
    }
    resp
}

fn default_listing(
    dispatcher: &Dispatcher,
    ctx: &Context,
    req: &Request,
    node_value: &NodeValue,
    segments: &[&str],
) -> Response {
    if req.query.contains_key("spec") {
        return match &node_value.spec_root {
            Some(spec) => {
                let mut doc = (**spec).clone();
                if let Some(obj) = doc.as_object_mut() {
                    let host = req.headers.get("host").unwrap_or("localhost");
                    let url = format!("http://{host}{}", req.uri.path.trim_end_matches('/'));
                    let servers = obj.entry("servers").or_insert_with(|| json!([{}]));
                    if let Some(arr) = servers.as_array_mut() {
                        if arr.is_empty() {
                            arr.push(json!({}));
                        }
                        arr[0]["url"] = json!(url);
                    }
                }
                Response::json(200, doc)
            }
            None => Response::json(200, json!({})),
        };
    }

    let tree_node = dispatcher.tree.find_node(segments).unwrap_or(&dispatcher.tree);
    let items: Vec<Value> = tree_node
        .listing_children()
        .into_iter()
        .map(Value::String)
        .collect();

    let accept_html = req
        .headers
        .get("accept")
        .map(|a| a.contains("text/html"))
        .unwrap_or(false);
    if accept_html {
        let list_items: String = items
            .iter()
            .filter_map(Value::as_str)
            .map(|name| format!("<li>{name}</li>"))
            .collect();
        let mut resp = Response::new(
            200,
            Body::Text(format!("<html><body><ul>{list_items}</ul></body></html>")),
        );
        resp.headers.set("content-type", "text/html");
        return resp;
    }

    let _ = ctx;
    Response::json(200, json!({ "items": items }))
}
