//! Declarative handler-chain compiler and interpreter (spec.md §4.6,
//! `x-request-handler`). A handler chain is a list of steps; each step is a
//! mapping from request-name to request-stanza, and the stanzas in one step
//! run concurrently; stanzas within later steps see the accumulated model
//! (`request`, plus one entry per named stanza run so far).
//!
//! DESIGN NOTE: the predicate/return-value language is interpreted directly
//! against `serde_json::Value` at dispatch time — no host code generation.

use crate::dispatcher::Context;
use crate::model::{Body, Request, Response};
use crate::template::Template;
use anyhow::{bail, Context as _, Result};
use futures::future::join_all;
use regex::Regex;
use serde_json::{Map, Value};

#[derive(Clone)]
enum PredicateValue {
    Exact(Value),
    Disjunction(Vec<Value>),
    StatusPattern(Regex),
}

#[derive(Clone)]
struct Predicate {
    fields: Vec<(String, PredicateValue)>,
}

impl Predicate {
    fn parse(value: &Value) -> Result<Self> {
        let obj = value.as_object().context("a predicate must be an object")?;
        let mut fields = Vec::new();
        for (field, v) in obj {
            let pv = if field == "status" {
                if let Some(s) = v.as_str() {
                    if let Some(pattern) = status_pattern(s) {
                        PredicateValue::StatusPattern(pattern)
                    } else {
                        PredicateValue::Exact(v.clone())
                    }
                } else if let Some(arr) = v.as_array() {
                    PredicateValue::Disjunction(arr.clone())
                } else {
                    PredicateValue::Exact(v.clone())
                }
            } else if let Some(arr) = v.as_array() {
                PredicateValue::Disjunction(arr.clone())
            } else {
                PredicateValue::Exact(v.clone())
            };
            fields.push((field.clone(), pv));
        }
        Ok(Predicate { fields })
    }

    fn matches(&self, against: &Value) -> bool {
        self.fields.iter().all(|(field, pv)| {
            let actual = against.get(field).cloned().unwrap_or(Value::Null);
            match pv {
                PredicateValue::Exact(expected) => stable_eq(&actual, expected),
                PredicateValue::Disjunction(options) => {
                    options.iter().any(|opt| stable_eq(&actual, opt))
                }
                PredicateValue::StatusPattern(re) => actual
                    .as_u64()
                    .map(|n| re.is_match(&n.to_string()))
                    .unwrap_or(false),
            }
        })
    }
}

/// `"5xx"` → `^5\d\d$`, left as `None` for anything else.
fn status_pattern(s: &str) -> Option<Regex> {
    if s.len() == 3 && s.ends_with("xx") && s.as_bytes()[0].is_ascii_digit() {
        Regex::new(&format!("^{}\\d\\d$", &s[..1])).ok()
    } else {
        None
    }
}

fn stable_eq(a: &Value, b: &Value) -> bool {
    serde_json::to_string(a).unwrap_or_default() == serde_json::to_string(b).unwrap_or_default()
}

/// Either a request (optionally guarded by `return_if`/`catch`, both
/// predicates over the resulting response) or a bare `return` with no
/// request of its own. `return` alongside a `request` is itself either a
/// bare flag (`true`, return the response unreshaped) or a template that
/// reshapes the response before returning it.
enum Action {
    Request {
        template: Template,
        returns: bool,
        return_template: Option<Template>,
        return_if: Option<Predicate>,
        catch: Option<Predicate>,
    },
    Standalone(Template),
}

/// A single named stanza within a step (spec.md §3/§4.6: each step is a
/// mapping from request-name to request-stanza).
struct Stanza {
    name: String,
    action: Action,
}

impl Stanza {
    fn sets_do_return(&self) -> bool {
        match &self.action {
            Action::Request { returns, return_if, .. } => *returns || return_if.is_some(),
            Action::Standalone(_) => true,
        }
    }

    fn parse(name: String, value: &Value) -> Result<Self> {
        let obj = value.as_object().context("a stanza must be an object")?;
        let request = obj.get("request").map(|r| Template::compile(r.clone()));
        let return_raw = obj.get("return");
        let return_if = obj.get("return_if").map(Predicate::parse).transpose()?;
        let catch = obj.get("catch").map(Predicate::parse).transpose()?;

        let Some(template) = request else {
            if return_if.is_some() || catch.is_some() {
                bail!("stanza '{name}': 'return_if'/'catch' require a 'request' in the same stanza");
            }
            let Some(return_raw) = return_raw else {
                bail!("stanza '{name}' must have a 'request' or a 'return'");
            };
            return Ok(Stanza {
                name,
                action: Action::Standalone(Template::compile(return_raw.clone())),
            });
        };

        let returns = match return_raw {
            None => false,
            Some(Value::Bool(b)) => *b,
            Some(_) => true,
        };
        let return_template = match return_raw {
            Some(v) if !matches!(v, Value::Bool(_)) => Some(Template::compile(v.clone())),
            _ => None,
        };

        Ok(Stanza {
            name,
            action: Action::Request {
                template,
                returns,
                return_template,
                return_if,
                catch,
            },
        })
    }
}

struct Step {
    stanzas: Vec<Stanza>,
}

/// A compiled `x-request-handler` chain.
pub struct CompiledChain {
    steps: Vec<Step>,
}

impl CompiledChain {
    pub fn compile(raw: &Value) -> Result<Self> {
        let raw_steps = raw.as_array().context("x-request-handler must be an array of steps")?;
        if raw_steps.is_empty() {
            bail!("x-request-handler must have at least one step");
        }

        let mut steps = Vec::new();
        let last_idx = raw_steps.len() - 1;
        for (idx, raw_step) in raw_steps.iter().enumerate() {
            let raw_stanzas = raw_step
                .as_object()
                .context("each step must be a mapping from request name to stanza")?;
            if raw_stanzas.is_empty() {
                bail!("a step must have at least one stanza");
            }
            let stanzas: Vec<Stanza> = raw_stanzas
                .iter()
                .map(|(name, v)| Stanza::parse(name.clone(), v))
                .collect::<Result<_>>()?;

            let returning = stanzas.iter().filter(|s| s.sets_do_return()).count();
            if returning > 1 {
                bail!("a step may have at most one returning stanza");
            }
            if idx == last_idx && stanzas.len() > 1 && returning == 0 {
                bail!("a parallel final step must have an explicit return");
            }

            steps.push(Step { stanzas });
        }
        Ok(CompiledChain { steps })
    }

    pub async fn execute(&self, ctx: &Context, request: &Request) -> Response {
        let mut model = Map::new();
        model.insert("request".to_string(), request_to_value(request));

        let last_idx = self.steps.len() - 1;
        for (idx, step) in self.steps.iter().enumerate() {
            let model_snapshot = Value::Object(model.clone());
            let outcomes = join_all(step.stanzas.iter().map(|stanza| {
                run_stanza(ctx, stanza, &model_snapshot)
            }))
            .await;

            let mut chain_error = None;
            for outcome in outcomes {
                match outcome {
                    StanzaOutcome::Stored { name, value } => {
                        model.insert(name, value);
                    }
                    StanzaOutcome::Returned(value) => {
                        return value_to_response(&value);
                    }
                    StanzaOutcome::Error(resp) => chain_error = Some(resp),
                }
            }
            if let Some(resp) = chain_error {
                return resp;
            }

            if idx == last_idx && step.stanzas.len() == 1 {
                if let Some(v) = model.get(&step.stanzas[0].name) {
                    return value_to_response(v);
                }
            }
        }

        Response::json(200, Value::Object(model))
    }
}

enum StanzaOutcome {
    Stored { name: String, value: Value },
    Returned(Value),
    Error(Response),
}

async fn run_stanza(ctx: &Context, stanza: &Stanza, model: &Value) -> StanzaOutcome {
    let (template, returns, return_template, return_if, catch) = match &stanza.action {
        Action::Standalone(tpl) => {
            // A bare `return` stanza with no request: expand directly
            // against the accumulated model.
            let (value, _) = tpl.expand(model);
            return StanzaOutcome::Returned(value);
        }
        Action::Request {
            template,
            returns,
            return_template,
            return_if,
            catch,
        } => (template, *returns, return_template, return_if, catch),
    };

    let (expanded, _diags) = template.expand(model);
    let built = match build_request_from_template(&expanded) {
        Ok(r) => r,
        Err(e) => {
            return StanzaOutcome::Error(
                crate::error::AppError::bad_request(format!("invalid request template: {e}"))
                    .into_response(&ctx.dispatcher.config.default_error_uri),
            )
        }
    };

    let resp = ctx.dispatcher.filtered_request(ctx.child(), built).await;
    let response_value = response_to_value(&resp);

    if resp.is_error_shaped() {
        if catch.as_ref().map(|p| p.matches(&response_value)).unwrap_or(false) {
            return StanzaOutcome::Stored {
                name: stanza.name.clone(),
                value: response_value,
            };
        }
        let wrapped = crate::error::AppError::internal(format!("request '{}' failed", stanza.name))
            .with_extra("requestName", Value::String(stanza.name.clone()))
            .with_extra("response", response_value)
            .into_response(&ctx.dispatcher.config.default_error_uri);
        return StanzaOutcome::Error(wrapped);
    }

    // DESIGN NOTE (spec.md §9 "handler precedence"): `return_if` wins
    // against an unconditional `return` on the same stanza, so it is
    // evaluated first.
    if return_if.as_ref().map(|p| p.matches(&response_value)).unwrap_or(false) {
        return StanzaOutcome::Returned(response_value);
    }

    if returns {
        let value = match return_template {
            Some(tpl) => {
                let mut combined = model.as_object().cloned().unwrap_or_default();
                combined.insert(stanza.name.clone(), response_value);
                tpl.expand(&Value::Object(combined)).0
            }
            None => response_value,
        };
        return StanzaOutcome::Returned(value);
    }

    StanzaOutcome::Stored {
        name: stanza.name.clone(),
        value: response_value,
    }
}

fn build_request_from_template(value: &Value) -> Result<Request> {
    let uri = value
        .get("uri")
        .and_then(Value::as_str)
        .context("request stanza must expand to a 'uri'")?;
    let method = value
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or("get");
    let mut req = Request::new(method, uri);
    if let Some(headers) = value.get("headers").and_then(Value::as_object) {
        for (k, v) in headers {
            if let Some(s) = v.as_str() {
                req = req.with_header(k, s.to_string());
            }
        }
    }
    if let Some(body) = value.get("body") {
        if !body.is_null() {
            req = req.with_body(Body::Json(body.clone()));
        }
    }
    Ok(req)
}

fn request_to_value(req: &Request) -> Value {
    let mut headers = Map::new();
    for (k, v) in req.headers.iter() {
        let value = req
            .coerced_headers
            .get(k)
            .cloned()
            .unwrap_or_else(|| Value::String(v.to_string()));
        headers.insert(k.to_string(), value);
    }
    let mut params = Map::new();
    for (k, v) in &req.params {
        let value = req
            .coerced_params
            .get(k)
            .cloned()
            .unwrap_or_else(|| Value::String(v.clone()));
        params.insert(k.clone(), value);
    }
    let mut query = Map::new();
    for (k, v) in req.query.iter() {
        let value = req.coerced_query.get(k).cloned().unwrap_or_else(|| match v {
            crate::model::QueryValue::Single(s) => Value::String(s.clone()),
            crate::model::QueryValue::Multi(values) => {
                Value::Array(values.iter().cloned().map(Value::String).collect())
            }
        });
        query.insert(k.to_string(), value);
    }
    serde_json::json!({
        "method": req.method,
        "uri": req.uri.to_string(),
        "headers": headers,
        "params": params,
        "query": query,
        "body": req.body.as_json(),
    })
}

fn response_to_value(resp: &Response) -> Value {
    let mut headers = Map::new();
    for (k, v) in resp.headers.iter() {
        headers.insert(k.to_string(), Value::String(v.to_string()));
    }
    serde_json::json!({
        "status": resp.status,
        "headers": headers,
        "body": resp.body.as_json(),
    })
}

fn value_to_response(value: &Value) -> Response {
    let status = value.get("status").and_then(Value::as_u64).unwrap_or(200) as u16;
    let body = value.get("body").cloned().unwrap_or_else(|| value.clone());
    let mut resp = Response::json(status, body);
    if let Some(headers) = value.get("headers").and_then(Value::as_object) {
        for (k, v) in headers {
            if let Some(s) = v.as_str() {
                resp.headers.set(k, s.to_string());
            }
        }
    }
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_chain() {
        assert!(CompiledChain::compile(&serde_json::json!([])).is_err());
    }

    #[test]
    fn rejects_stanza_without_request_or_return() {
        let chain = serde_json::json!([{"a": {}}]);
        assert!(CompiledChain::compile(&chain).is_err());
    }

    #[test]
    fn rejects_return_if_without_request() {
        let chain = serde_json::json!([{"a": {"return_if": {"status": 200}}}]);
        assert!(CompiledChain::compile(&chain).is_err());
    }

    #[test]
    fn rejects_two_returning_stanzas_in_one_step() {
        let chain = serde_json::json!([{
            "a": {"request": {"uri": "/a"}, "return": true},
            "b": {"request": {"uri": "/b"}, "return": true},
        }]);
        assert!(CompiledChain::compile(&chain).is_err());
    }

    #[test]
    fn parallel_final_step_requires_explicit_return() {
        let chain = serde_json::json!([{
            "a": {"request": {"uri": "/a"}},
            "b": {"request": {"uri": "/b"}},
        }]);
        assert!(CompiledChain::compile(&chain).is_err());
    }

    #[test]
    fn status_pattern_matches_class() {
        let p = Predicate::parse(&serde_json::json!({"status": "5xx"})).unwrap();
        assert!(p.matches(&serde_json::json!({"status": 503})));
        assert!(!p.matches(&serde_json::json!({"status": 200})));
    }
}
