//! End-to-end scenarios from spec.md §8 "Testable properties", exercised
//! against the public dispatcher API the way an embedder would use it:
//! build a tree from an inline spec document, wire up in-memory
//! collaborators, and dispatch.

use hyperswitch::config::Config;
use hyperswitch::dispatcher::Dispatcher;
use hyperswitch::filter::FilterRegistry;
use hyperswitch::http_client::ReqwestHttpClient;
use hyperswitch::metrics::InMemoryMetrics;
use hyperswitch::model::{Body, Request};
use hyperswitch::ratelimit::InMemoryRateLimiter;
use hyperswitch::spec::{build_tree, CompiledOperation, HandlerRegistry, NativeHandler};
use serde_json::json;
use std::sync::Arc;

fn dispatcher_for(doc: serde_json::Value, handlers: HandlerRegistry, max_depth: u32) -> Dispatcher {
    let config = Arc::new(Config {
        max_depth,
        ..Config::default()
    });
    let tree = build_tree(
        &doc,
        &handlers,
        &FilterRegistry::with_stock_filters(),
        Arc::new(serde_json::Value::Null),
    )
    .expect("tree builds");
    Dispatcher::new(
        Arc::new(tree),
        config,
        Arc::new(InMemoryMetrics::new()),
        Arc::new(InMemoryRateLimiter::default()),
        Arc::new(ReqwestHttpClient::default()),
    )
}

fn ok_handler(body: serde_json::Value) -> NativeHandler {
    Arc::new(move |_ctx, _req| {
        let body = body.clone();
        Box::pin(async move { hyperswitch::model::Response::json(200, body) })
    })
}

/// spec.md §8 scenario 1: greedy segment captures the remaining path.
#[tokio::test]
async fn greedy_segment_captures_remaining_path() {
    let mut handlers = HandlerRegistry::new();
    handlers.register(
        "getTest",
        Arc::new(|ctx: hyperswitch::dispatcher::Context, req: Request| {
            Box::pin(async move {
                let _ = &ctx;
                hyperswitch::model::Response::json(200, json!({ "rest": req.params.get("rest") }))
            })
        }),
    );
    let doc = json!({
        "paths": {
            "/test/{+rest}": {"get": {"operationId": "getTest"}}
        }
    });
    let dispatcher = dispatcher_for(doc, handlers, 10);

    let resp = dispatcher.request(Request::new("get", "/test/foo/bar/baz")).await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body.as_json()["rest"], json!("foo/bar/baz"));
}

/// spec.md §8 scenario 2: optional segment is absent or populated.
#[tokio::test]
async fn optional_segment_is_absent_or_populated() {
    let mut handlers = HandlerRegistry::new();
    handlers.register(
        "getTest",
        Arc::new(|_ctx, req: Request| {
            Box::pin(async move {
                hyperswitch::model::Response::json(200, json!({ "rest": req.params.get("rest") }))
            })
        }),
    );
    let doc = json!({
        "paths": {
            "/test{/rest}": {"get": {"operationId": "getTest"}}
        }
    });
    let dispatcher = dispatcher_for(doc, handlers, 10);

    let resp = dispatcher.request(Request::new("get", "/test")).await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body.as_json()["rest"], json!(null));

    let resp = dispatcher.request(Request::new("get", "/test/foo")).await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body.as_json()["rest"], json!("foo"));
}

/// spec.md §8 scenario 5 + "Direct /sys is forbidden" invariant.
#[tokio::test]
async fn direct_sys_is_forbidden_but_reachable_recursively() {
    let mut handlers = HandlerRegistry::new();
    handlers.register("getSysFoo", ok_handler(json!({ "from": "sys" })));
    handlers.register(
        "getPublic",
        Arc::new(|ctx: hyperswitch::dispatcher::Context, _req: Request| {
            Box::pin(async move {
                ctx.dispatcher
                    .filtered_request(ctx.child(), Request::new("get", "/v1/sys/foo"))
                    .await
            })
        }),
    );
    let doc = json!({
        "paths": {
            "/v1/sys/foo": {"get": {"operationId": "getSysFoo"}},
            "/v1/public": {"get": {"operationId": "getPublic"}},
        }
    });
    let dispatcher = dispatcher_for(doc, handlers, 10);

    let resp = dispatcher.request(Request::new("get", "/v1/sys/foo")).await;
    assert_eq!(resp.status, 403);
    assert!(resp.body.as_json()["type"].as_str().unwrap().ends_with("forbidden#sys"));

    let resp = dispatcher.request(Request::new("get", "/v1/public")).await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body.as_json()["from"], json!("sys"));
}

/// spec.md §8 "Recursion cap" invariant + scenario 4.
#[tokio::test]
async fn recursion_cap_terminates_with_500() {
    let mut handlers = HandlerRegistry::new();
    handlers.register(
        "loop",
        Arc::new(|ctx: hyperswitch::dispatcher::Context, _req: Request| {
            Box::pin(async move {
                ctx.dispatcher
                    .filtered_request(ctx.child(), Request::new("get", "/loop"))
                    .await
            })
        }),
    );
    let doc = json!({
        "paths": { "/loop": {"get": {"operationId": "loop"}} }
    });
    let dispatcher = dispatcher_for(doc, handlers, 3);

    let resp = dispatcher.request(Request::new("get", "/loop")).await;
    assert_eq!(resp.status, 500);
    assert!(resp
        .body
        .as_json()["type"]
        .as_str()
        .unwrap()
        .ends_with("request_recursion_depth_exceeded"));
}

/// spec.md §8 "Method fallback" invariant.
#[tokio::test]
async fn head_falls_back_to_get_with_empty_body() {
    let mut handlers = HandlerRegistry::new();
    handlers.register("getThing", ok_handler(json!({ "ok": true })));
    let doc = json!({
        "paths": { "/thing": {"get": {"operationId": "getThing"}} }
    });
    let dispatcher = dispatcher_for(doc, handlers, 10);

    let get_resp = dispatcher.request(Request::new("get", "/thing")).await;
    let head_resp = dispatcher.request(Request::new("head", "/thing")).await;
    assert_eq!(get_resp.status, head_resp.status);
    assert!(!get_resp.body.is_empty());
    assert!(head_resp.body.is_empty());
}

/// spec.md §8 "Overlap rejection" invariant.
#[test]
fn overlap_rejection_fails_at_load() {
    let doc = json!({
        "paths": {
            "/dup": {"get": {"operationId": "dupA"}},
        }
    });
    // Build once to exercise the happy path, then attempt to re-define the
    // same method on the same tree, which must fail with the exact prefix
    // spec.md §8 requires.
    let mut handlers = HandlerRegistry::new();
    handlers.register("dupA", ok_handler(json!({})));
    handlers.register("dupB", ok_handler(json!({})));
    let filters = FilterRegistry::with_stock_filters();
    let spec_root = Arc::new(serde_json::Value::Null);

    let mut tree = build_tree(&doc, &handlers, &filters, spec_root.clone()).expect("first build ok");
    let segments = hyperswitch::uri::parse_pattern("/dup").unwrap();
    let mut methods = std::collections::HashMap::new();
    methods.insert(
        http::Method::GET,
        CompiledOperation::Native(handlers.get("dupB").unwrap().clone()),
    );
    let dup_value = hyperswitch::router::NodeValue {
        path: "/dup".to_string(),
        methods,
        ..Default::default()
    };
    let err = tree.insert(&segments, dup_value).unwrap_err();
    assert!(err.to_string().starts_with("Trying to re-define existing method"));
}

/// spec.md §8 "Validator coercion" invariants.
#[tokio::test]
async fn validator_coerces_and_rejects_query_parameters() {
    let mut handlers = HandlerRegistry::new();
    handlers.register(
        "getOp",
        Arc::new(|_ctx, req: Request| {
            Box::pin(async move {
                hyperswitch::model::Response::json(200, json!({ "q": req.query.get_str("q") }))
            })
        }),
    );
    let doc = json!({
        "paths": {
            "/op": {
                "get": {
                    "operationId": "getOp",
                    "parameters": [
                        {"name": "q", "in": "query", "required": false, "schema": {"type": "string", "enum": ["one", "two", "three"]}}
                    ]
                }
            }
        }
    });
    let dispatcher = dispatcher_for(doc, handlers, 10);

    let resp = dispatcher.request(Request::new("get", "/op?q=four")).await;
    assert_eq!(resp.status, 400);
    assert_eq!(
        resp.body.as_json()["detail"],
        json!("data.query.q should be equal to one of the allowed values: [one, two, three]")
    );

    let resp = dispatcher.request(Request::new("get", "/op?q=two")).await;
    assert_eq!(resp.status, 200);
}

#[tokio::test]
async fn validator_rejects_non_numeric_query_value() {
    let mut handlers = HandlerRegistry::new();
    handlers.register("getOp", ok_handler(json!({})));
    let doc = json!({
        "paths": {
            "/op": {
                "get": {
                    "operationId": "getOp",
                    "parameters": [
                        {"name": "n", "in": "query", "required": false, "schema": {"type": "number"}}
                    ]
                }
            }
        }
    });
    let dispatcher = dispatcher_for(doc, handlers, 10);

    let resp = dispatcher.request(Request::new("get", "/op?n=not_a_number")).await;
    assert_eq!(resp.status, 400);
    assert_eq!(resp.body.as_json()["detail"], json!("data.query.n should be a number"));

    let resp = dispatcher.request(Request::new("get", "/op?n=27.5")).await;
    assert_eq!(resp.status, 200);
}

/// spec.md §8 "Listing" invariant.
#[tokio::test]
async fn listing_excludes_sys_and_returns_items() {
    let mut handlers = HandlerRegistry::new();
    handlers.register("getA", ok_handler(json!({})));
    handlers.register("getSys", ok_handler(json!({})));
    let doc = json!({
        "x-listing": true,
        "paths": {
            "/": {"x-listing": true},
            "/a": {"get": {"operationId": "getA"}},
            "/sys/thing": {"get": {"operationId": "getSys"}},
        }
    });
    let dispatcher = dispatcher_for(doc, handlers, 10);

    let resp = dispatcher
        .request(Request::new("get", "/").with_header("accept", "application/json"))
        .await;
    assert_eq!(resp.status, 200);
    let items = resp.body.as_json()["items"].as_array().cloned().unwrap_or_default();
    let names: Vec<&str> = items.iter().filter_map(|v| v.as_str()).collect();
    assert!(names.contains(&"a"));
    assert!(!names.contains(&"sys"));
}

/// spec.md §8 "Route isolation" invariant: handling a request never
/// mutates the caller's original `Request` object.
#[tokio::test]
async fn dispatch_does_not_mutate_callers_request() {
    let mut handlers = HandlerRegistry::new();
    handlers.register(
        "getThing",
        Arc::new(|_ctx, mut req: Request| {
            Box::pin(async move {
                req.params.insert("injected".to_string(), "value".to_string());
                hyperswitch::model::Response::json(200, json!({}))
            })
        }),
    );
    let doc = json!({
        "paths": { "/thing/{id}": {"get": {"operationId": "getThing"}} }
    });
    let dispatcher = dispatcher_for(doc, handlers, 10);

    let original = Request::new("get", "/thing/7").with_body(Body::Json(json!({"x": 1})));
    let snapshot = original.clone();
    let _ = dispatcher.request(original.clone()).await;
    assert_eq!(original.params, snapshot.params);
    assert!(!original.params.contains_key("injected"));
}

/// spec.md §8 scenario 3: a handler chain where the first request fails a
/// `catch` predicate and the second returns unconditionally.
#[tokio::test]
async fn handler_chain_catch_then_return() {
    let mut handlers = HandlerRegistry::new();
    handlers.register("getX", Arc::new(|_ctx, _req| Box::pin(async { hyperswitch::model::Response::json(404, json!({})) })));
    handlers.register("getY", ok_handler(json!("ok")));

    let chain = json!([
        {
            "x": {
                "request": {"uri": "/x"},
                "catch": {"status": 404},
            },
            "y": {
                "request": {"uri": "/y"},
                "return": "{$.y.body}",
            }
        }
    ]);
    let doc = json!({
        "paths": {
            "/x": {"get": {"operationId": "getX"}},
            "/y": {"get": {"operationId": "getY"}},
            "/start": {"get": {"x-request-handler": chain}},
        }
    });
    let dispatcher = dispatcher_for(doc, handlers, 10);

    let resp = dispatcher.request(Request::new("get", "/start")).await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body.as_json(), json!("ok"));
}

/// spec.md §6 "Request-id header": generated if absent, honored if present.
#[tokio::test]
async fn request_id_is_generated_and_propagated() {
    let mut handlers = HandlerRegistry::new();
    handlers.register("getThing", ok_handler(json!({})));
    let doc = json!({ "paths": { "/thing": {"get": {"operationId": "getThing"}} } });
    let dispatcher = dispatcher_for(doc, handlers, 10);

    let resp = dispatcher.request(Request::new("get", "/thing")).await;
    assert!(resp.headers.get("x-request-id").is_some());

    let req = Request::new("get", "/thing").with_header("x-request-id", "01ARZ3NDEKTSV4RRFFQ69G5FAV");
    let resp = dispatcher.request(req).await;
    assert_eq!(resp.headers.get("x-request-id"), Some("01ARZ3NDEKTSV4RRFFQ69G5FAV"));
}

/// spec.md §4.3 "Resource phase": resources run at startup via a
/// privileged child that bypasses the direct-/sys protection.
#[tokio::test]
async fn resource_phase_executes_setup_handlers_against_sys() {
    let mut handlers = HandlerRegistry::new();
    handlers.register("putSysInit", ok_handler(json!({ "ready": true })));
    let doc = json!({
        "paths": {
            "/sys/init": {
                "put": {"operationId": "putSysInit"},
            },
            "/app": {
                "get": {
                    "operationId": "putSysInit",
                    "x-setup-handler": [{"uri": "/sys/init", "method": "put"}],
                },
            }
        }
    });
    let dispatcher = dispatcher_for(doc, handlers, 10);
    dispatcher.run_resource_phase().await.expect("resource phase succeeds");
}

/// spec.md §4.7/§8 "Validator coercion": a non-`string` query parameter is
/// handed to the handler chain as its declared type, not the raw string.
#[tokio::test]
async fn validator_coerced_values_reach_the_handler_chain() {
    let handlers = HandlerRegistry::new();
    let doc = json!({
        "paths": {
            "/op": {
                "get": {
                    "parameters": [
                        {"name": "flag", "in": "query", "schema": {"type": "boolean"}},
                        {"name": "n", "in": "query", "schema": {"type": "number"}}
                    ],
                    "x-request-handler": [
                        {"result": {"return": "{$.request.query}"}}
                    ]
                }
            }
        }
    });
    let dispatcher = dispatcher_for(doc, handlers, 10);

    let resp = dispatcher.request(Request::new("get", "/op?flag=True&n=27.5")).await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body.as_json()["flag"], json!(true));
    assert_eq!(resp.body.as_json()["n"], json!(27.5));
}

/// A filter that always short-circuits without calling `next`.
struct ShortCircuitFilter;

#[async_trait::async_trait]
impl hyperswitch::filter::Filter for ShortCircuitFilter {
    async fn apply(
        &self,
        _ctx: hyperswitch::dispatcher::Context,
        _req: Request,
        _next: hyperswitch::filter::Next,
        _options: serde_json::Value,
    ) -> hyperswitch::model::Response {
        hyperswitch::model::Response::json(403, json!({ "denied": true }))
    }
}

/// spec.md §4.4: `metrics`/`validator` are fixed ahead of every user filter.
/// If a user filter short-circuits without calling `next`, `metrics` (being
/// outermost) must still observe and record the response.
#[tokio::test]
async fn stock_filters_wrap_outside_user_filters() {
    let mut filters = FilterRegistry::with_stock_filters();
    filters.register("deny", Arc::new(ShortCircuitFilter));

    let mut handlers = HandlerRegistry::new();
    handlers.register("getOp", ok_handler(json!({})));
    let doc = json!({
        "paths": {
            "/op": {
                "get": {
                    "operationId": "getOp",
                    "x-route-filters": [{"fn": "deny"}],
                }
            }
        }
    });
    let config = Arc::new(Config::default());
    let tree = build_tree(&doc, &handlers, &filters, Arc::new(serde_json::Value::Null)).expect("tree builds");
    let metrics = Arc::new(InMemoryMetrics::new());
    let dispatcher = Dispatcher::new(
        Arc::new(tree),
        config,
        metrics.clone(),
        Arc::new(InMemoryRateLimiter::default()),
        Arc::new(ReqwestHttpClient::default()),
    );

    let resp = dispatcher.request(Request::new("get", "/op")).await;
    assert_eq!(resp.status, 403);
    assert_eq!(metrics.sample("external", "/", "get", 403).map(|s| s.count), Some(1));
}

/// A probe filter that records, in the shared log, the point it ran at
/// relative to `next`.
struct OrderProbe {
    name: &'static str,
    log: Arc<std::sync::Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl hyperswitch::filter::Filter for OrderProbe {
    async fn apply(
        &self,
        ctx: hyperswitch::dispatcher::Context,
        req: Request,
        next: hyperswitch::filter::Next,
        _options: serde_json::Value,
    ) -> hyperswitch::model::Response {
        self.log.lock().expect("lock").push(format!("{}:before", self.name));
        let resp = next.run(ctx, req).await;
        self.log.lock().expect("lock").push(format!("{}:after", self.name));
        resp
    }
}

/// spec.md §4.3/§4.4: `x-request-filters` wraps depth-0 dispatches only.
#[tokio::test]
async fn request_level_filter_applies_only_at_depth_zero() {
    let log: Arc<std::sync::Mutex<Vec<String>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut filters = FilterRegistry::with_stock_filters();
    filters.register(
        "probe",
        Arc::new(OrderProbe {
            name: "engine",
            log: log.clone(),
        }),
    );

    let mut handlers = HandlerRegistry::new();
    handlers.register("getInner", ok_handler(json!({ "inner": true })));
    handlers.register("getOuter", ok_handler(json!({ "outer": true })));
    let doc = json!({
        "x-request-filters": [{"fn": "probe"}],
        "paths": {
            "/inner": {"get": {"operationId": "getInner"}},
            "/outer": {"get": {"operationId": "getOuter"}},
        }
    });
    let config = Arc::new(Config::default());
    let tree = build_tree(&doc, &handlers, &filters, Arc::new(serde_json::Value::Null)).expect("tree builds");
    let dispatcher = Dispatcher::new(
        Arc::new(tree),
        config,
        Arc::new(InMemoryMetrics::new()),
        Arc::new(InMemoryRateLimiter::default()),
        Arc::new(ReqwestHttpClient::default()),
    );

    dispatcher.request(Request::new("get", "/outer")).await;
    assert_eq!(log.lock().expect("lock").len(), 2);

    log.lock().expect("lock").clear();
    let ctx = hyperswitch::dispatcher::Context::root(dispatcher.clone(), None).child();
    dispatcher
        .filtered_request(ctx, Request::new("get", "/inner"))
        .await;
    assert!(log.lock().expect("lock").is_empty());
}
