//! Template expansion (spec.md §4.2).
//!
//! A `Template` is parsed once from a declarative JSON value into an AST of
//! literal fragments and placeholder paths (DESIGN NOTES: "prefer a
//! parse-once template object... not a string rewrite at expansion time").
//! Expansion resolves each placeholder against a dotted path in a runtime
//! `model` (itself just a `serde_json::Value`), recursing through objects
//! and arrays. A top-level `templates` key is left untouched (modules may
//! carry raw templates for re-export).

use serde_json::{Map, Value};

/// One placeholder occurrence inside a string, e.g. `{$.request.params.id}`.
#[derive(Debug, Clone)]
struct Placeholder {
    start: usize,
    end: usize,
    path: Vec<String>,
}

/// A compiled template: the declarative shape plus, for every string leaf,
/// the placeholders found inside it.
#[derive(Debug, Clone)]
pub struct Template {
    value: Value,
}

/// Non-fatal expansion diagnostics, attached to the step rather than
/// swallowed (spec.md §4.2 "Expansion errors are attached ... not
/// swallowed").
#[derive(Debug, Clone, Default)]
pub struct ExpansionDiagnostics {
    pub missing_paths: Vec<String>,
}

impl Template {
    pub fn compile(value: Value) -> Self {
        Template { value }
    }

    pub fn raw(&self) -> &Value {
        &self.value
    }

    /// Expand this template against `model`, returning the expanded value
    /// and any diagnostics gathered along the way.
    pub fn expand(&self, model: &Value) -> (Value, ExpansionDiagnostics) {
        let mut diags = ExpansionDiagnostics::default();
        let expanded = expand_value(&self.value, model, &mut diags, true);
        (expanded, diags)
    }
}

fn expand_value(value: &Value, model: &Value, diags: &mut ExpansionDiagnostics, top: bool) -> Value {
    match value {
        Value::String(s) => expand_string(s, model, diags),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| expand_value(v, model, diags, false))
                .collect(),
        ),
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                // A protected `templates` key on the root options object is
                // exempt from expansion (modules carry raw templates).
                if top && k == "templates" {
                    out.insert(k.clone(), v.clone());
                } else {
                    out.insert(k.clone(), expand_value(v, model, diags, false));
                }
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// Expand placeholders inside a single string. A string that is *entirely*
/// one placeholder (e.g. `"{$.request.body}"`) resolves to the raw JSON
/// value (object/array/number/etc, not a stringified copy); placeholders
/// embedded in larger text are stringified and concatenated.
fn expand_string(s: &str, model: &Value, diags: &mut ExpansionDiagnostics) -> Value {
    let placeholders = find_placeholders(s);
    if placeholders.is_empty() {
        return Value::String(s.to_string());
    }

    if placeholders.len() == 1 && placeholders[0].start == 0 && placeholders[0].end == s.len() {
        return resolve_path(model, &placeholders[0].path, diags);
    }

    let mut out = String::new();
    let mut cursor = 0;
    for ph in &placeholders {
        out.push_str(&s[cursor..ph.start]);
        let resolved = resolve_path(model, &ph.path, diags);
        out.push_str(&stringify(&resolved));
        cursor = ph.end;
    }
    out.push_str(&s[cursor..]);
    Value::String(out)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "undefined".to_string(),
        other => other.to_string(),
    }
}

fn find_placeholders(s: &str) -> Vec<Placeholder> {
    let mut out = Vec::new();
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end_rel) = s[i..].find('}') {
                let end = i + end_rel + 1;
                let inner = &s[i + 1..end - 1];
                let path = parse_placeholder_path(inner);
                out.push(Placeholder { start: i, end, path });
                i = end;
                continue;
            }
        }
        i += 1;
    }
    out
}

/// `$.request.params.title` / `request.params.title` → `["request", "params", "title"]`.
fn parse_placeholder_path(inner: &str) -> Vec<String> {
    let inner = inner.trim().trim_start_matches("$.").trim_start_matches('$');
    inner
        .split('.')
        .filter(|p| !p.is_empty())
        .map(|p| p.to_string())
        .collect()
}

/// Missing paths resolve to `undefined` (JSON `null`), recorded as a
/// diagnostic rather than a hard error.
fn resolve_path(model: &Value, path: &[String], diags: &mut ExpansionDiagnostics) -> Value {
    let mut current = model;
    for (idx, key) in path.iter().enumerate() {
        match current.get(key) {
            Some(next) => current = next,
            None => {
                diags.missing_paths.push(path[..=idx].join("."));
                return Value::Null;
            }
        }
    }
    current.clone()
}
