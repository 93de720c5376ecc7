//! Compiling a merged spec document into a route tree (spec.md §4.3).
//! Grounded on the teacher's `build_routes` (`spec/load.rs`) for the
//! per-path/per-verb extraction shape; the output here is a [`Node`] tree
//! rather than a flat `Vec<RouteMeta>`, since routes must share structure
//! (mirrored optional segments, node-level filter accumulation).

use super::document::{
    extract_modules, load_document_file, merge_document, resolve_module, ModuleCache,
    ModuleRegistry,
};
use super::types::{CompiledOperation, FilterEntry, HandlerRegistry, OperationSpec, ResourceSpec};
use crate::filter::FilterRegistry;
use crate::handler_chain::CompiledChain;
use crate::router::{Node, NodeValue};
use crate::uri::parse_pattern;
use anyhow::{bail, Context, Result};
use http::Method;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

const VERBS: &[&str] = &["get", "post", "put", "delete", "patch", "head", "options"];

/// Load the entry document and recursively mount every `x-modules` entry,
/// producing the single merged document [`build_tree`] compiles into a
/// route tree (spec.md §4.3).
pub fn load_merged_document(entry_path: &Path, registry: &ModuleRegistry) -> Result<Value> {
    let mut cache = ModuleCache::new();
    let base_dir = entry_path.parent().unwrap_or_else(|| Path::new("."));
    let mut doc = load_document_file(entry_path)
        .with_context(|| format!("loading entry spec document {}", entry_path.display()))?;
    mount_modules(&mut doc, base_dir, registry, &mut cache)?;
    Ok(doc)
}

fn mount_modules(
    doc: &mut Value,
    base_dir: &Path,
    registry: &ModuleRegistry,
    cache: &mut ModuleCache,
) -> Result<()> {
    for (mount_path, def, globals) in extract_modules(doc)? {
        let mut module_doc = resolve_module(&def, base_dir, registry, cache, &globals)
            .with_context(|| format!("resolving module mounted at '{mount_path}'"))?;
        mount_modules(&mut module_doc, base_dir, registry, cache)?;
        merge_document(doc, &module_doc, &mount_path)?;
    }
    Ok(())
}

/// Build a route tree from a fully merged spec document.
pub fn build_tree(
    doc: &Value,
    handlers: &HandlerRegistry,
    filters: &FilterRegistry,
    globals: Arc<Value>,
) -> Result<Node> {
    let spec_root = Arc::new(doc.clone());
    let mut root = Node::new();

    let spec_level_filters = parse_filter_specs(doc.get("x-route-filters"), filters, None)?;
    let request_filters = parse_filter_specs(doc.get("x-request-filters"), filters, None)?;
    let sub_request_filters = parse_filter_specs(doc.get("x-sub-request-filters"), filters, None)?;

    let paths = doc
        .get("paths")
        .and_then(Value::as_object)
        .context("spec document has no 'paths' object")?;

    for (pattern, path_item) in paths {
        let path_level_filters = parse_filter_specs(path_item.get("x-route-filters"), filters, None)?;
        let path_hidden = path_item.get("x-hidden").and_then(Value::as_bool).unwrap_or(false);
        let path_listing = path_item.get("x-listing").and_then(Value::as_bool).unwrap_or(false);

        let mut methods = std::collections::HashMap::new();
        // Stock filters (`metrics`, `validator`) come first, ahead of every
        // user filter (spec.md §4.4: "fixed at the head of every spec in
        // this exact order before any user filter"); operation-level
        // `x-route-filters` are innermost, after spec/path-level ones.
        let mut stock_filters = Vec::new();
        let mut op_filters = Vec::new();
        let mut resources: Vec<ResourceSpec> = Vec::new();
        let mut hidden = path_hidden;

        for verb in VERBS {
            let Some(op_raw) = path_item.get(*verb) else {
                continue;
            };
            let op: OperationSpec = serde_json::from_value(op_raw.clone())
                .with_context(|| format!("parsing operation '{verb} {pattern}'"))?;
            let method = Method::from_bytes(verb.to_uppercase().as_bytes())
                .expect("VERBS are all valid method tokens");

            let compiled = compile_operation(&op, handlers, pattern, verb)?;
            methods.insert(method.clone(), compiled);
            resources.extend(op.setup_handler.clone());
            hidden = hidden || op.hidden;

            stock_filters.push(stock_entry(filters, "metrics", Value::Null, &method));
            stock_filters.push(stock_entry(filters, "validator", validator_options(&op), &method));
            op_filters.extend(parse_filter_specs(
                Some(&serde_json::to_value(&op.route_filters).unwrap_or(Value::Null)),
                filters,
                Some(&method),
            )?);
        }

        if methods.is_empty() {
            continue;
        }

        let mut node_filters = stock_filters;
        node_filters.extend(spec_level_filters.clone());
        node_filters.extend(path_level_filters.clone());
        node_filters.extend(op_filters);

        let segments = parse_pattern(pattern)
            .with_context(|| format!("parsing path pattern '{pattern}'"))?;
        let value = NodeValue {
            path: pattern.clone(),
            methods,
            filters: node_filters,
            resources,
            spec_root: Some(spec_root.clone()),
            globals: Some(globals.clone()),
            hidden,
            is_api_root: pattern == "/" || path_listing,
            listing: path_listing || pattern == "/",
            ..Default::default()
        };
        root.insert(&segments, value)
            .with_context(|| format!("inserting path '{pattern}'"))?;
    }

    if root.resolve(&[]).is_none() {
        root.insert(
            &[],
            NodeValue {
                path: "/".to_string(),
                spec_root: Some(spec_root),
                globals: Some(globals),
                is_api_root: true,
                listing: true,
                ..Default::default()
            },
        )?;
    }

    // The engine-level filter stacks wrap every dispatch from the outside,
    // not any single route, so they live on the root node's value rather
    // than being accumulated per-path (spec.md §4.3, §4.4).
    if let Some(root_value) = root.value.as_mut() {
        root_value.request_filters = request_filters;
        root_value.sub_request_filters = sub_request_filters;
    }

    Ok(root)
}

fn compile_operation(
    op: &OperationSpec,
    handlers: &HandlerRegistry,
    pattern: &str,
    verb: &str,
) -> Result<CompiledOperation> {
    if let Some(chain_def) = &op.request_handler {
        let chain = CompiledChain::compile(chain_def)
            .with_context(|| format!("compiling x-request-handler for '{verb} {pattern}'"))?;
        return Ok(CompiledOperation::Declarative(Arc::new(chain)));
    }
    if let Some(operation_id) = &op.operation_id {
        return handlers
            .get(operation_id)
            .map(|h| CompiledOperation::Native(h.clone()))
            .with_context(|| format!("no handler registered for operationId '{operation_id}'"));
    }
    bail!("operation '{verb} {pattern}' has neither x-request-handler nor operationId")
}

fn validator_options(op: &OperationSpec) -> Value {
    let schema = op
        .request_body
        .as_ref()
        .and_then(|rb| rb.content.get("application/json"))
        .and_then(|m| m.schema.clone())
        .unwrap_or(Value::Null);
    serde_json::json!({
        "parameters": op.parameters,
        "requestBodySchema": schema,
    })
}

fn stock_entry(registry: &FilterRegistry, name: &str, options: Value, method: &Method) -> FilterEntry {
    FilterEntry {
        filter: registry.get(name).unwrap_or_else(|| {
            panic!("stock filter '{name}' missing from registry")
        }),
        options,
        method: Some(method.clone()),
    }
}

fn parse_filter_specs(
    raw: Option<&Value>,
    registry: &FilterRegistry,
    default_method: Option<&Method>,
) -> Result<Vec<FilterEntry>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    if raw.is_null() {
        return Ok(Vec::new());
    }
    let entries = raw.as_array().context("x-route-filters must be an array")?;
    let mut out = Vec::new();
    for entry in entries {
        let function = entry
            .get("fn")
            .and_then(Value::as_str)
            .context("filter entry missing 'fn'")?;
        let options = entry.get("options").cloned().unwrap_or(Value::Null);
        let method = match entry.get("method").and_then(Value::as_str) {
            Some(m) => Some(
                Method::from_bytes(m.to_uppercase().as_bytes())
                    .with_context(|| format!("invalid method '{m}' on filter '{function}'"))?,
            ),
            None => default_method.cloned(),
        };
        let filter = registry
            .get(function)
            .with_context(|| format!("no filter registered under the name '{function}'"))?;
        out.push(FilterEntry {
            filter,
            options,
            method,
        });
    }
    Ok(out)
}
