//! Loading and merging spec documents, and `x-modules` resolution
//! (spec.md §4.3). A spec document is kept as a generic `serde_json::Value`
//! tree throughout — the dialect's `x-modules`/`x-request-handler`/resource
//! stanzas are too dynamic to fit a typed OpenAPI model.

use anyhow::{Context as _, Result};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// One entry of `x-modules` (spec.md §4.3 "module resolution order").
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ModuleDef {
    File {
        path: String,
    },
    Spec {
        path: String,
        #[serde(default)]
        inline: Option<Value>,
    },
    Npm {
        name: String,
    },
    Inline {
        spec: Value,
    },
}

/// A module mount point: where the module's paths attach, and what globals
/// (exported options) it was built with.
#[derive(Debug, Clone)]
pub struct ModuleMount {
    pub mount_path: String,
    pub def: ModuleDef,
    pub exported_globals: Value,
}

/// Host-registered documents standing in for `type: npm` modules — Rust
/// can't `require()` an arbitrary host-language package, so the embedder
/// pre-registers the spec document a named npm-style module would have
/// exported.
#[derive(Clone, Default)]
pub struct ModuleRegistry(HashMap<String, Value>);

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, spec: Value) {
        self.0.insert(name.into(), spec);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }
}

/// Content-addressed cache over `(module_def, exported_globals)`, avoiding
/// redundant disk reads/parses when the same module is mounted more than
/// once with identical globals (spec.md §4.3). Cleared by the caller once
/// the tree is sealed.
#[derive(Default)]
pub struct ModuleCache(HashMap<String, Value>);

impl ModuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    fn key(def: &ModuleDef, globals: &Value) -> String {
        let mut hasher = Sha256::new();
        let def_json = serde_json::to_string(&DefKey::from(def)).unwrap_or_default();
        hasher.update(def_json.as_bytes());
        hasher.update(serde_json::to_vec(globals).unwrap_or_default());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

#[derive(serde::Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum DefKey<'a> {
    File { path: &'a str },
    Spec { path: &'a str },
    Npm { name: &'a str },
    Inline { spec: &'a Value },
}

impl<'a> From<&'a ModuleDef> for DefKey<'a> {
    fn from(def: &'a ModuleDef) -> Self {
        match def {
            ModuleDef::File { path } => DefKey::File { path },
            ModuleDef::Spec { path, .. } => DefKey::Spec { path },
            ModuleDef::Npm { name } => DefKey::Npm { name },
            ModuleDef::Inline { spec } => DefKey::Inline { spec },
        }
    }
}

/// Load a YAML or JSON spec document from disk.
pub fn load_document_file(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading spec document {}", path.display()))?;
    parse_document(&raw, path.extension().and_then(|e| e.to_str()))
}

fn parse_document(raw: &str, extension: Option<&str>) -> Result<Value> {
    match extension {
        Some("json") => {
            Ok(serde_json::from_str(raw).context("parsing spec document as JSON")?)
        }
        _ => Ok(serde_yaml::from_str(raw).context("parsing spec document as YAML")?),
    }
}

/// Resolve a `ModuleDef` to its loaded document, honoring the resolution
/// order from spec.md §4.3: as given → `appBasePath + path` →
/// `appBasePath + node_modules + path`.
pub fn resolve_module(
    def: &ModuleDef,
    app_base_path: &Path,
    registry: &ModuleRegistry,
    cache: &mut ModuleCache,
    exported_globals: &Value,
) -> Result<Value> {
    let key = ModuleCache::key(def, exported_globals);
    if let Some(cached) = cache.0.get(&key) {
        return Ok(cached.clone());
    }

    let loaded = match def {
        ModuleDef::Inline { spec } => spec.clone(),
        ModuleDef::Npm { name } => registry
            .get(name)
            .cloned()
            .with_context(|| format!("no registered npm-style module named '{name}'"))?,
        ModuleDef::File { path } | ModuleDef::Spec { path, .. } => {
            if let ModuleDef::Spec {
                inline: Some(inline),
                ..
            } = def
            {
                inline.clone()
            } else {
                let as_given = PathBuf::from(path);
                let candidates = [
                    as_given.clone(),
                    app_base_path.join(path),
                    app_base_path.join("node_modules").join(path),
                ];
                let mut last_err = None;
                let mut result = None;
                for candidate in &candidates {
                    match load_document_file(candidate) {
                        Ok(doc) => {
                            result = Some(doc);
                            break;
                        }
                        Err(e) => last_err = Some(e),
                    }
                }
                result.ok_or_else(|| {
                    last_err.unwrap_or_else(|| anyhow::anyhow!("module '{path}' not found"))
                })?
            }
        }
    };

    cache.0.insert(key, loaded.clone());
    Ok(loaded)
}

/// Extract the `x-modules` stanza from a parsed document, if present.
pub fn extract_modules(doc: &Value) -> Result<Vec<(String, ModuleDef, Value)>> {
    let Some(modules) = doc.get("x-modules") else {
        return Ok(Vec::new());
    };
    let entries = modules
        .as_array()
        .context("x-modules must be an array")?;
    let mut out = Vec::new();
    for entry in entries {
        let mount_path = entry
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or("/")
            .to_string();
        let def: ModuleDef = serde_json::from_value(entry.clone())
            .context("parsing x-modules entry")?;
        let globals = entry.get("options").cloned().unwrap_or(Value::Null);
        out.push((mount_path, def, globals));
    }
    Ok(out)
}

/// Merge `overlay`'s `paths` and `components.schemas`/`securitySchemes` into
/// `base`, mounting overlay paths under `mount_path`. Tags with the same
/// name but a differing `description` is a hard error (spec.md §4.3
/// "Component/tag merging").
pub fn merge_document(base: &mut Value, overlay: &Value, mount_path: &str) -> Result<()> {
    merge_paths(base, overlay, mount_path)?;
    merge_components(base, overlay)?;
    merge_tags(base, overlay)?;
    Ok(())
}

fn join_mount(mount_path: &str, sub_path: &str) -> String {
    let mount = mount_path.trim_end_matches('/');
    let sub = sub_path.trim_start_matches('/');
    if sub.is_empty() {
        format!("{mount}/")
    } else {
        format!("{mount}/{sub}")
    }
}

fn merge_paths(base: &mut Value, overlay: &Value, mount_path: &str) -> Result<()> {
    let Some(overlay_paths) = overlay.get("paths").and_then(Value::as_object) else {
        return Ok(());
    };
    let base_paths = base
        .as_object_mut()
        .context("spec document root must be an object")?
        .entry("paths")
        .or_insert_with(|| Value::Object(Default::default()))
        .as_object_mut()
        .context("'paths' must be an object")?;

    for (sub_path, item) in overlay_paths {
        let full_path = if mount_path == "/" {
            sub_path.clone()
        } else {
            join_mount(mount_path, sub_path)
        };
        base_paths.insert(full_path, item.clone());
    }
    Ok(())
}

fn merge_components(base: &mut Value, overlay: &Value) -> Result<()> {
    let Some(overlay_components) = overlay.get("components").and_then(Value::as_object) else {
        return Ok(());
    };
    let base_obj = base.as_object_mut().context("spec document root must be an object")?;
    let base_components = base_obj
        .entry("components")
        .or_insert_with(|| Value::Object(Default::default()))
        .as_object_mut()
        .context("'components' must be an object")?;

    for (section, value) in overlay_components {
        let base_section = base_components
            .entry(section.clone())
            .or_insert_with(|| Value::Object(Default::default()))
            .as_object_mut()
            .context("component section must be an object")?;
        if let Some(value_obj) = value.as_object() {
            for (name, def) in value_obj {
                base_section.entry(name.clone()).or_insert_with(|| def.clone());
            }
        }
    }
    Ok(())
}

fn merge_tags(base: &mut Value, overlay: &Value) -> Result<()> {
    let Some(overlay_tags) = overlay.get("tags").and_then(Value::as_array) else {
        return Ok(());
    };
    let base_obj = base.as_object_mut().context("spec document root must be an object")?;
    let base_tags = base_obj
        .entry("tags")
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .context("'tags' must be an array")?;

    for tag in overlay_tags {
        let name = tag.get("name").and_then(Value::as_str).unwrap_or_default();
        if let Some(existing) = base_tags
            .iter()
            .find(|t| t.get("name").and_then(Value::as_str) == Some(name))
        {
            let existing_desc = existing.get("description").and_then(Value::as_str);
            let incoming_desc = tag.get("description").and_then(Value::as_str);
            if existing_desc.is_some() && incoming_desc.is_some() && existing_desc != incoming_desc
            {
                anyhow::bail!(
                    "tag '{}' is redefined with a conflicting description",
                    name
                );
            }
        } else {
            base_tags.push(tag.clone());
        }
    }
    Ok(())
}
