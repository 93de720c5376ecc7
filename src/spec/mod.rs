//! # Spec Module
//!
//! Parses and merges spec documents and compiles them into the route tree
//! the dispatcher runs against (spec.md §3, §4.3, §4.4). A spec document is
//! kept as a generic `serde_json::Value` tree end to end — the dialect's
//! `x-modules`/`x-request-handler`/resource stanzas are too dynamic to fit a
//! strict typed OpenAPI model.
//!
//! - [`document`] — loading, `x-modules` resolution, and document merging.
//! - [`types`] — the per-operation extension stanzas the engine interprets.
//! - [`build`] — compiling a merged document into a [`crate::router::Node`] tree.

pub mod build;
pub mod document;
pub mod types;

pub use build::{load_merged_document, build_tree};
pub use document::{ModuleCache, ModuleDef, ModuleMount, ModuleRegistry};
pub use types::{
    CompiledOperation, FilterEntry, FilterSpec, HandlerRegistry, MediaTypeSpec, NativeHandler,
    OperationSpec, ParamLocation, ParameterSpec, RequestBodySpec, ResourceSpec,
};
