//! Filter pipeline (spec.md §4.4, §3 "Filter entry"). A filter wraps the
//! rest of the chain via `next`, outer to inner, the way the teacher's
//! `Middleware` trait wraps a handler with `before`/`after` — generalized
//! here to a single `async fn(ctx, req, next, options) -> Response` seam so
//! a filter can run code both before and after awaiting `next`.

pub mod stock;

use crate::dispatcher::Context;
use crate::model::{Request, Response};
use crate::spec::FilterEntry;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait Filter: Send + Sync {
    async fn apply(&self, ctx: Context, req: Request, next: Next, options: Value) -> Response;
}

/// The remaining filter stack plus the terminal handler invocation, handed
/// to a filter so it can run `next` exactly once (or not at all).
pub struct Next {
    filters: Arc<Vec<FilterEntry>>,
    idx: usize,
    terminal: Arc<dyn Fn(Context, Request) -> BoxFuture<'static, Response> + Send + Sync>,
}

impl Next {
    pub fn run(self, ctx: Context, req: Request) -> BoxFuture<'static, Response> {
        invoke(self.filters, self.idx, ctx, req, self.terminal)
    }
}

fn invoke(
    filters: Arc<Vec<FilterEntry>>,
    idx: usize,
    ctx: Context,
    req: Request,
    terminal: Arc<dyn Fn(Context, Request) -> BoxFuture<'static, Response> + Send + Sync>,
) -> BoxFuture<'static, Response> {
    if idx >= filters.len() {
        return terminal(ctx, req);
    }
    Box::pin(async move {
        let entry = filters[idx].clone();
        let next = Next {
            filters: filters.clone(),
            idx: idx + 1,
            terminal: terminal.clone(),
        };
        entry.filter.apply(ctx, req, next, entry.options.clone()).await
    })
}

/// Run `filters` (already scoped to the applicable ones for this request's
/// method) and finish with `terminal` once the stack is exhausted.
pub fn run_chain(
    filters: Vec<FilterEntry>,
    ctx: Context,
    req: Request,
    terminal: impl Fn(Context, Request) -> BoxFuture<'static, Response> + Send + Sync + 'static,
) -> BoxFuture<'static, Response> {
    invoke(Arc::new(filters), 0, ctx, req, Arc::new(terminal))
}

/// Named filter lookup used when compiling `x-route-filters` entries into
/// [`FilterEntry`]s.
#[derive(Clone, Default)]
pub struct FilterRegistry(HashMap<String, Arc<dyn Filter>>);

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, filter: Arc<dyn Filter>) {
        self.0.insert(name.into(), filter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Filter>> {
        self.0.get(name).cloned()
    }

    /// A registry carrying the two stock filters always prepended to a
    /// node's filter list (spec.md §4.4 "fixed-order stock filters: metrics
    /// then validator"), plus the other stock filters available by name.
    pub fn with_stock_filters() -> Self {
        let mut reg = Self::new();
        reg.register("metrics", Arc::new(stock::MetricsFilter));
        reg.register("validator", Arc::new(stock::ValidatorFilter));
        reg.register("ratelimit_route", Arc::new(stock::RatelimitRouteFilter));
        reg.register("http", Arc::new(stock::HttpFilter));
        reg.register("header-match", Arc::new(stock::HeaderMatchFilter));
        reg
    }
}
