//! Stock filters always available by name (spec.md §4.7). `metrics` and
//! `validator` are additionally prepended, in that fixed order, to every
//! node's filter list at build time (spec.md §4.4).

use super::{Filter, Next};
use crate::dispatcher::Context;
use crate::model::{Body, Request, Response};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Instant;

/// Coerce a raw string parameter value per a JSON-Schema `type`, the way
/// the teacher's `decode_param_value` (`server/request.rs`) coerces path,
/// query, and header parameters before validation. Returns the schema's
/// type name on failure so callers can build the `should be a(n) <type>`
/// detail message spec.md §4.7/§8 requires verbatim.
fn coerce(raw: &str, schema: Option<&Value>) -> Result<Value, &'static str> {
    let ty = schema.and_then(|s| s.get("type")).and_then(Value::as_str);
    match ty {
        Some("integer") => raw.parse::<i64>().map(Value::from).map_err(|_| "an integer"),
        Some("number") => raw.parse::<f64>().map(Value::from).map_err(|_| "a number"),
        Some("boolean") => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Value::Bool(true)),
            "false" | "0" | "no" => Ok(Value::Bool(false)),
            _ => Err("a boolean"),
        },
        Some("object") => serde_json::from_str(raw).map_err(|_| "an object"),
        Some("array") => Ok(Value::Array(
            raw.split(',').map(|part| Value::String(part.to_string())).collect(),
        )),
        _ => Ok(Value::String(raw.to_string())),
    }
}

pub struct ValidatorFilter;

#[async_trait]
impl Filter for ValidatorFilter {
    async fn apply(&self, ctx: Context, mut req: Request, next: Next, options: Value) -> Response {
        if let Some(parameters) = options.get("parameters").and_then(Value::as_array) {
            for param in parameters {
                let name = param.get("name").and_then(Value::as_str).unwrap_or_default();
                let location = param.get("in").and_then(Value::as_str).unwrap_or_default();
                let required = param.get("required").and_then(Value::as_bool).unwrap_or(false);
                let schema = param.get("schema");

                let raw = match location {
                    "path" => req.params.get(name).cloned(),
                    "query" => req.query.get_str(name).map(str::to_string),
                    "header" => req.headers.get(name).map(str::to_string),
                    _ => None,
                };

                match raw {
                    Some(value) => {
                        let coerced = match coerce(&value, schema) {
                            Ok(v) => v,
                            Err(type_name) => {
                                return bad_request(
                                    &ctx,
                                    format!("data.{location}.{name} should be {type_name}"),
                                );
                            }
                        };
                        if let Some(enum_values) = schema.and_then(|s| s.get("enum")).and_then(Value::as_array) {
                            if !enum_values.contains(&coerced) {
                                let allowed = enum_values
                                    .iter()
                                    .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                                    .collect::<Vec<_>>()
                                    .join(", ");
                                return bad_request(
                                    &ctx,
                                    format!(
                                        "data.{location}.{name} should be equal to one of the allowed values: [{allowed}]"
                                    ),
                                );
                            }
                        }
                        req.set_coerced(location, name, coerced);
                    }
                    None if required => {
                        return bad_request(&ctx, format!("data.{location} should have required property '{name}'"));
                    }
                    None => {}
                }
            }
        }

        if let Some(schema) = options.get("requestBodySchema") {
            if !schema.is_null() {
                if let Body::Json(body) = &req.body {
                    if let Ok(compiled) = jsonschema::validator_for(schema) {
                        if let Err(e) = compiled.validate(body) {
                            return bad_request(&ctx, e.to_string());
                        }
                    }
                }
            }
        }

        next.run(ctx, req).await
    }
}

fn bad_request(ctx: &Context, detail: String) -> Response {
    crate::error::AppError::bad_request(detail).into_response(&ctx.dispatcher.config.default_error_uri)
}

pub struct MetricsFilter;

#[async_trait]
impl Filter for MetricsFilter {
    async fn apply(&self, ctx: Context, req: Request, next: Next, _options: Value) -> Response {
        let request_class = ctx.request_class.as_str().to_string();
        let path = crate::metrics::strip_first_segment(&req.uri.path);
        let method = req.method.clone();
        let start = Instant::now();
        let metrics = ctx.dispatcher.metrics.clone();
        let resp = next.run(ctx, req).await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        metrics.record(&request_class, &path, &method, resp.status, latency_ms);
        resp
    }
}

pub struct RatelimitRouteFilter;

#[async_trait]
impl Filter for RatelimitRouteFilter {
    async fn apply(&self, ctx: Context, req: Request, next: Next, options: Value) -> Response {
        let log_only = options.get("log_only").and_then(Value::as_bool).unwrap_or(false);
        let by_client_ip = options.get("by").and_then(Value::as_str) == Some("client_ip");
        let key = if by_client_ip {
            req.headers.get("x-client-ip").unwrap_or("unknown").to_string()
        } else {
            let service = options.get("service_name").and_then(Value::as_str).unwrap_or("default");
            format!(
                "{}:{}:{}",
                service,
                crate::metrics::strip_first_segment(&req.uri.path),
                req.method
            )
        };

        let allowed = ctx.dispatcher.rate_limiter.allow(&key);
        if !allowed && !log_only {
            return crate::error::AppError::rate_exceeded()
                .into_response(&ctx.dispatcher.config.default_error_uri);
        }
        next.run(ctx, req).await
    }
}

pub struct HttpFilter;

#[async_trait]
impl Filter for HttpFilter {
    async fn apply(&self, ctx: Context, mut req: Request, _next: Next, options: Value) -> Response {
        if let Some(base_uri) = options.get("base_uri").and_then(Value::as_str) {
            let forwarded_uri = format!("{}{}", base_uri.trim_end_matches('/'), req.uri.path);
            req = Request::new(req.method.clone(), forwarded_uri).with_body(req.body.clone());
            req.headers.set("x-request-id", ctx.request_id.to_string());
            if let Some(allow) = options.get("forward_headers").and_then(Value::as_array) {
                for h in allow.iter().filter_map(Value::as_str) {
                    if let Some(v) = req.headers.get(h) {
                        req.headers.set(h, v.to_string());
                    }
                }
            }
        }
        match ctx.dispatcher.http_client.send(req).await {
            Ok(resp) => resp,
            Err(e) => {
                crate::error::AppError::internal(e).into_response(&ctx.dispatcher.config.default_error_uri)
            }
        }
    }
}

pub struct HeaderMatchFilter;

#[async_trait]
impl Filter for HeaderMatchFilter {
    async fn apply(&self, ctx: Context, req: Request, next: Next, options: Value) -> Response {
        if !ctx.root_request {
            return next.run(ctx, req).await;
        }
        let header = options.get("header").and_then(Value::as_str).unwrap_or_default();
        let pattern = options.get("pattern").and_then(Value::as_str).unwrap_or(".*");
        let re = regex::Regex::new(pattern).unwrap_or_else(|_| regex::Regex::new(".*").expect("trivial pattern"));
        let matched = req.headers.get(header).map(|v| re.is_match(v)).unwrap_or(false);
        if !matched {
            return crate::error::AppError::new(
                crate::error::ErrorKind::Forbidden,
                "Request header did not match required pattern",
            )
            .into_response(&ctx.dispatcher.config.default_error_uri);
        }
        next.run(ctx, req).await
    }
}
