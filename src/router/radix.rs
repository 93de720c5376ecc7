//! Route tree: URI segment matching and the value attached to each node
//! (spec.md §3 "Route tree", §4.1). Grounded on the teacher's
//! `RadixNode`/`RadixRouter` (children keyed by literal/param, backtracking
//! search), extended with a greedy child, mirrored optional-segment values,
//! and match-priority ordering (literal > constrained param > unconstrained
//! param > greedy).
//!
//! Subtree sharing (spec.md §4.3 "identical globals may share a built
//! subtree") is implemented here as a structural clone that reuses the
//! `Arc`-wrapped leaves (handlers, filters, spec bodies) rather than a
//! graph with shared child pointers: the tree is immutable once sealed, so
//! the two are observationally identical and the clone avoids unsafe
//! shared-mutable-tree bookkeeping during the build phase.

use crate::spec::{CompiledOperation, FilterEntry, ResourceSpec};
use crate::uri::Segment;
use http::Method;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Everything dispatch needs once a path resolves to a node.
#[derive(Clone, Default)]
pub struct NodeValue {
    pub path: String,
    pub methods: HashMap<Method, CompiledOperation>,
    pub filters: Vec<FilterEntry>,
    pub resources: Vec<ResourceSpec>,
    pub spec_root: Option<Arc<Value>>,
    pub globals: Option<Arc<Value>>,
    pub hidden: bool,
    pub is_api_root: bool,
    pub listing: bool,
    /// Engine-level filter stacks (spec.md §4.3, §4.4), parsed once from
    /// the document root and stashed on the tree's root node: `request`
    /// wraps externally initiated dispatches (recursion depth 0),
    /// `sub_request` wraps recursive ones.
    pub request_filters: Vec<FilterEntry>,
    pub sub_request_filters: Vec<FilterEntry>,
}

impl NodeValue {
    pub fn new(path: impl Into<String>) -> Self {
        NodeValue {
            path: path.into(),
            ..Default::default()
        }
    }
}

#[derive(Clone)]
pub struct ParamChild {
    pub name: String,
    pub pattern: Option<Regex>,
    pub node: Box<Node>,
}

#[derive(Clone)]
pub struct GreedyChild {
    pub name: String,
    pub node: Box<Node>,
}

#[derive(Clone, Default)]
pub struct Node {
    pub literal_children: HashMap<String, Node>,
    pub param_children: Vec<ParamChild>,
    pub greedy_child: Option<GreedyChild>,
    pub value: Option<NodeValue>,
}

/// Result of a successful tree lookup.
pub struct Matched<'a> {
    pub value: &'a NodeValue,
    pub params: HashMap<String, String>,
}

impl Node {
    pub fn new() -> Self {
        Node::default()
    }

    /// Insert `value` at `segments`, merging with whatever is already
    /// registered there. A pattern whose final segment is `{/name}` also
    /// mirrors the value onto the parent node (spec.md §4.1 "absent segment
    /// reuses the parent node's value").
    pub fn insert(&mut self, segments: &[Segment], value: NodeValue) -> anyhow::Result<()> {
        if let Some(Segment::Optional { .. }) = segments.last() {
            let parent_segments = &segments[..segments.len() - 1];
            let opt_seg = segments.last().expect("checked non-empty above");

            let parent = self.get_or_create(parent_segments)?;
            let leaf = parent.get_or_create(std::slice::from_ref(opt_seg))?;
            attach(leaf, value.clone())?;
            attach(parent, value)?;
        } else {
            let leaf = self.get_or_create(segments)?;
            attach(leaf, value)?;
        }
        Ok(())
    }

    fn get_or_create(&mut self, segments: &[Segment]) -> anyhow::Result<&mut Node> {
        let Some((seg, rest)) = segments.split_first() else {
            return Ok(self);
        };
        match seg {
            Segment::Literal(name) => self
                .literal_children
                .entry(name.clone())
                .or_default()
                .get_or_create(rest),
            Segment::Param { name, .. } | Segment::Optional { name } => {
                if let Some(pos) = self.param_children.iter().position(|c| &c.name == name) {
                    self.param_children[pos].node.get_or_create(rest)
                } else {
                    let pattern = match seg {
                        Segment::Param { pattern, .. } => pattern.clone(),
                        _ => None,
                    };
                    self.param_children.push(ParamChild {
                        name: name.clone(),
                        pattern,
                        node: Box::new(Node::default()),
                    });
                    let idx = self.param_children.len() - 1;
                    self.param_children[idx].node.get_or_create(rest)
                }
            }
            Segment::Greedy { name } => {
                if self.greedy_child.is_none() {
                    self.greedy_child = Some(GreedyChild {
                        name: name.clone(),
                        node: Box::new(Node::default()),
                    });
                }
                Ok(&mut self.greedy_child.as_mut().expect("just inserted").node)
            }
        }
    }

    /// Resolve a path (already split on `/`, no empty segments) to a node
    /// value, with capture groups. Priority at each level: literal child,
    /// then pattern-constrained param children, then unconstrained, then
    /// the greedy child last (spec.md §4.1 "match priority").
    pub fn resolve<'a>(&'a self, segments: &[&str]) -> Option<Matched<'a>> {
        let mut params = HashMap::new();
        let value = self.resolve_inner(segments, &mut params)?;
        Some(Matched { value, params })
    }

    fn resolve_inner<'a>(
        &'a self,
        segments: &[&str],
        params: &mut HashMap<String, String>,
    ) -> Option<&'a NodeValue> {
        let Some((seg, rest)) = segments.split_first() else {
            return self.value.as_ref();
        };

        if let Some(child) = self.literal_children.get(*seg) {
            if let Some(v) = child.resolve_inner(rest, params) {
                return Some(v);
            }
        }

        for c in self.param_children.iter().filter(|c| c.pattern.is_some()) {
            if c.pattern.as_ref().expect("filtered on is_some").is_match(seg) {
                params.insert(c.name.clone(), (*seg).to_string());
                if let Some(v) = c.node.resolve_inner(rest, params) {
                    return Some(v);
                }
                params.remove(&c.name);
            }
        }

        for c in self.param_children.iter().filter(|c| c.pattern.is_none()) {
            params.insert(c.name.clone(), (*seg).to_string());
            if let Some(v) = c.node.resolve_inner(rest, params) {
                return Some(v);
            }
            params.remove(&c.name);
        }

        if let Some(g) = &self.greedy_child {
            let joined = segments.join("/");
            params.insert(g.name.clone(), joined);
            if let Some(v) = g.node.value.as_ref() {
                return Some(v);
            }
            params.remove(&g.name);
        }

        None
    }

    /// Direct descent to the node at `segments` without backtracking —
    /// sufficient for the default listing handler's "does this mount
    /// point exist" check (spec.md §4.5).
    pub fn find_node<'a>(&'a self, segments: &[&str]) -> Option<&'a Node> {
        let Some((seg, rest)) = segments.split_first() else {
            return Some(self);
        };
        if let Some(child) = self.literal_children.get(*seg) {
            if let Some(found) = child.find_node(rest) {
                return Some(found);
            }
        }
        for c in &self.param_children {
            let ok = c.pattern.as_ref().map(|p| p.is_match(seg)).unwrap_or(true);
            if ok {
                if let Some(found) = c.node.find_node(rest) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Every `(node.path, resource)` pair in the tree, for the startup
    /// resource phase (spec.md §4.3 "Resource phase").
    pub fn collect_resources(&self) -> Vec<(String, ResourceSpec)> {
        let mut out = Vec::new();
        self.collect_resources_into(&mut out);
        out
    }

    fn collect_resources_into(&self, out: &mut Vec<(String, ResourceSpec)>) {
        if let Some(value) = &self.value {
            for resource in &value.resources {
                out.push((value.path.clone(), resource.clone()));
            }
        }
        for child in self.literal_children.values() {
            child.collect_resources_into(out);
        }
        for child in &self.param_children {
            child.node.collect_resources_into(out);
        }
        if let Some(child) = &self.greedy_child {
            child.node.collect_resources_into(out);
        }
    }

    /// Non-hidden literal child segment names, for the default listing
    /// handler (spec.md §4.5 "items excluding hidden and /sys").
    pub fn listing_children(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .literal_children
            .iter()
            .filter(|(name, node)| {
                *name != "sys" && !node.value.as_ref().map(|v| v.hidden).unwrap_or(false)
            })
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

fn attach(node: &mut Node, incoming: NodeValue) -> anyhow::Result<()> {
    match &mut node.value {
        None => node.value = Some(incoming),
        Some(existing) => {
            for (method, op) in incoming.methods {
                if existing.methods.contains_key(&method) {
                    anyhow::bail!(
                        "Trying to re-define existing method '{}' on path '{}'",
                        method,
                        existing.path
                    );
                }
                existing.methods.insert(method, op);
            }
            existing.filters.extend(incoming.filters);
            existing.resources.extend(incoming.resources);
            existing.hidden = existing.hidden || incoming.hidden;
            existing.is_api_root = existing.is_api_root || incoming.is_api_root;
            existing.listing = existing.listing || incoming.listing;
            if existing.spec_root.is_none() {
                existing.spec_root = incoming.spec_root;
            }
            if existing.globals.is_none() {
                existing.globals = incoming.globals;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uri::parse_pattern;

    fn leaf(path: &str, method: Method, handler: CompiledOperation) -> NodeValue {
        let mut v = NodeValue::new(path);
        v.methods.insert(method, handler);
        v
    }

    fn noop() -> CompiledOperation {
        CompiledOperation::Native(Arc::new(|_ctx, _req| {
            Box::pin(async { crate::model::Response::new(200, crate::model::Body::Empty) })
        }))
    }

    #[test]
    fn matches_literal_over_param() {
        let mut root = Node::new();
        root.insert(
            &parse_pattern("/users/{id}").unwrap(),
            leaf("/users/{id}", Method::GET, noop()),
        )
        .unwrap();
        root.insert(
            &parse_pattern("/users/me").unwrap(),
            leaf("/users/me", Method::GET, noop()),
        )
        .unwrap();

        let m = root.resolve(&["users", "me"]).unwrap();
        assert_eq!(m.value.path, "/users/me");
        assert!(m.params.is_empty());

        let m = root.resolve(&["users", "42"]).unwrap();
        assert_eq!(m.value.path, "/users/{id}");
        assert_eq!(m.params.get("id").map(String::as_str), Some("42"));
    }

    #[test]
    fn optional_segment_mirrors_onto_parent() {
        let mut root = Node::new();
        root.insert(
            &parse_pattern("/test{/rest}").unwrap(),
            leaf("/test{/rest}", Method::GET, noop()),
        )
        .unwrap();

        let m = root.resolve(&["test"]).unwrap();
        assert!(!m.params.contains_key("rest"));

        let m = root.resolve(&["test", "foo"]).unwrap();
        assert_eq!(m.params.get("rest").map(String::as_str), Some("foo"));
    }

    #[test]
    fn greedy_segment_captures_remaining_joined_path() {
        let mut root = Node::new();
        root.insert(
            &parse_pattern("/files/{+rest}").unwrap(),
            leaf("/files/{+rest}", Method::GET, noop()),
        )
        .unwrap();

        let m = root.resolve(&["files", "a", "b", "c"]).unwrap();
        assert_eq!(m.params.get("rest").map(String::as_str), Some("a/b/c"));
    }

    #[test]
    fn redefining_a_method_on_the_same_path_is_an_error() {
        let mut root = Node::new();
        root.insert(
            &parse_pattern("/users").unwrap(),
            leaf("/users", Method::GET, noop()),
        )
        .unwrap();
        let err = root
            .insert(
                &parse_pattern("/users").unwrap(),
                leaf("/users", Method::GET, noop()),
            )
            .unwrap_err();
        assert!(err
            .to_string()
            .starts_with("Trying to re-define existing method"));
    }

    #[test]
    fn listing_children_excludes_sys_and_hidden() {
        let mut root = Node::new();
        root.insert(&parse_pattern("/pets").unwrap(), leaf("/pets", Method::GET, noop()))
            .unwrap();
        root.insert(&parse_pattern("/sys").unwrap(), leaf("/sys", Method::GET, noop()))
            .unwrap();
        let mut hidden = leaf("/secret", Method::GET, noop());
        hidden.hidden = true;
        root.insert(&parse_pattern("/secret").unwrap(), hidden).unwrap();

        assert_eq!(root.listing_children(), vec!["pets".to_string()]);
    }
}
