//! # HyperSwitch
//!
//! **HyperSwitch** is an in-process HTTP request dispatcher driven entirely
//! by a merged OpenAPI 3.x specification: the route tree, the filter
//! pipeline, and handler resolution are all derived from the spec document
//! rather than hand-wired.
//!
//! ## Architecture
//!
//! - **[`spec`]** — loading, `x-modules` mounting/merging, and compiling a
//!   merged document into a route tree.
//! - **[`router`]** — the route tree itself: segment matching with literal,
//!   parameter, greedy, and optional segments.
//! - **[`dispatcher`]** — recursion-depth enforcement, the shallow-clone
//!   invariant, route resolution, and response normalization.
//! - **[`filter`]** — the per-route filter pipeline (`metrics`, `validator`,
//!   `ratelimit_route`, `http`, `header-match`, and user-registered filters).
//! - **[`handler_chain`]** — the declarative `x-request-handler` compiler
//!   and interpreter.
//! - **[`template`]** — placeholder expansion against a runtime model,
//!   shared by the handler chain and the resource phase.
//! - **[`model`]** — request/response/body primitives.
//! - **[`error`]** — the wire-visible error taxonomy.
//! - **[`config`]** — runtime configuration.
//! - **[`metrics`]**, **[`ratelimit`]**, **[`http_client`]** — the
//!   collaborator seams a deployment plugs concrete implementations into.
//! - **[`ids`]** — request identifiers.
//!
//! ## Quick Start
//!
//! ```no_run
//! use hyperswitch::config::Config;
//! use hyperswitch::dispatcher::Dispatcher;
//! use hyperswitch::filter::FilterRegistry;
//! use hyperswitch::http_client::ReqwestHttpClient;
//! use hyperswitch::metrics::InMemoryMetrics;
//! use hyperswitch::model::Request;
//! use hyperswitch::ratelimit::InMemoryRateLimiter;
//! use hyperswitch::spec::{build_tree, load_merged_document, HandlerRegistry, ModuleRegistry};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Arc::new(Config::default());
//! let doc = load_merged_document(Path::new("openapi.yaml"), &ModuleRegistry::new())?;
//! let tree = build_tree(
//!     &doc,
//!     &HandlerRegistry::new(),
//!     &FilterRegistry::with_stock_filters(),
//!     Arc::new(serde_json::Value::Null),
//! )?;
//!
//! let dispatcher = Dispatcher::new(
//!     Arc::new(tree),
//!     config,
//!     Arc::new(InMemoryMetrics::new()),
//!     Arc::new(InMemoryRateLimiter::default()),
//!     Arc::new(ReqwestHttpClient::default()),
//! );
//!
//! let response = dispatcher.request(Request::new("get", "/pets")).await;
//! # let _ = response;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod handler_chain;
pub mod http_client;
pub mod ids;
pub mod metrics;
pub mod model;
pub mod ratelimit;
pub mod router;
pub mod spec;
pub mod template;
pub mod uri;
