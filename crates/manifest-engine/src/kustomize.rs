//! Layered composition of a template tree.
//!
//! A directory is a composition when it holds `kustomization.yaml`. Its
//! `resources` entries are YAML files or further compositions (bases);
//! `patches`, `commonLabels` and `vars` apply to everything the layer
//! produces, bases included.

use crate::document::ResourceDocument;
use crate::error::RenderError;
use crate::filesystem::{FileSystem, normalize};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

pub const KUSTOMIZATION_FILE: &str = "kustomization.yaml";

/// Subdirectory tried when the root holds no composition file
pub const DEFAULT_OVERLAY_DIR: &str = "default";

static VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\(([A-Za-z_][A-Za-z0-9_]*)\)")
        .unwrap_or_else(|e| panic!("invalid variable pattern: {e}"))
});

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Kustomization {
    #[serde(default)]
    resources: Vec<String>,
    #[serde(default)]
    patches: Vec<PatchEntry>,
    #[serde(default)]
    common_labels: BTreeMap<String, String>,
    #[serde(default)]
    vars: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
struct PatchEntry {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    patch: Option<String>,
    #[serde(default)]
    target: Option<PatchTarget>,
}

#[derive(Debug, Clone, Deserialize)]
struct PatchTarget {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Composes a template tree into raw documents
#[derive(Debug, Clone, Default)]
pub struct Kustomizer {
    variables: BTreeMap<String, String>,
}

impl Kustomizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caller-supplied variables; these override `vars` from the tree
    #[must_use]
    pub fn with_variables(mut self, variables: BTreeMap<String, String>) -> Self {
        self.variables = variables;
        self
    }

    /// Locates the composition entry point under `root`.
    ///
    /// Falls back to `{root}/default` when the root has no composition file.
    pub fn entry_point(fs: &dyn FileSystem, root: &Path) -> Result<PathBuf, RenderError> {
        let root = normalize(root);
        if fs.exists(&root.join(KUSTOMIZATION_FILE)) {
            return Ok(root);
        }
        let fallback = root.join(DEFAULT_OVERLAY_DIR);
        if fs.exists(&fallback.join(KUSTOMIZATION_FILE)) {
            debug!("No composition at {}, using {}", root.display(), fallback.display());
            return Ok(fallback);
        }
        Err(RenderError::MissingFile(root.join(KUSTOMIZATION_FILE)))
    }

    /// Runs the full composition rooted at `root`
    pub fn run(&self, fs: &dyn FileSystem, root: &Path) -> Result<Vec<ResourceDocument>, RenderError> {
        let dir = Self::entry_point(fs, root)?;

        let mut variables = BTreeMap::new();
        collect_vars(fs, &dir, &mut Vec::new(), &mut variables)?;
        variables.extend(self.variables.iter().map(|(k, v)| (k.clone(), v.clone())));

        let documents = build(fs, &dir, &variables, &mut Vec::new())?;
        debug!("Composed {} documents from {}", documents.len(), dir.display());
        Ok(documents)
    }
}

fn load(fs: &dyn FileSystem, dir: &Path) -> Result<Kustomization, RenderError> {
    let path = dir.join(KUSTOMIZATION_FILE);
    let text = read(fs, &path)?;
    if text.trim().is_empty() {
        return Ok(Kustomization::default());
    }
    serde_yaml::from_str(&text).map_err(|source| RenderError::Malformed { path, source })
}

fn read(fs: &dyn FileSystem, path: &Path) -> Result<String, RenderError> {
    if !fs.exists(path) {
        return Err(RenderError::MissingFile(path.to_path_buf()));
    }
    fs.read_to_string(path).map_err(|source| RenderError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn enter(dir: &Path, stack: &mut Vec<PathBuf>) -> Result<(), RenderError> {
    if stack.iter().any(|p| p == dir) {
        return Err(RenderError::Cycle(dir.to_path_buf()));
    }
    stack.push(dir.to_path_buf());
    Ok(())
}

/// Gathers `vars` depth first; a layer overrides the bases it includes.
fn collect_vars(
    fs: &dyn FileSystem,
    dir: &Path,
    stack: &mut Vec<PathBuf>,
    out: &mut BTreeMap<String, String>,
) -> Result<(), RenderError> {
    enter(dir, stack)?;
    let kustomization = load(fs, dir)?;
    for entry in &kustomization.resources {
        let path = normalize(&dir.join(entry));
        if fs.is_dir(&path) {
            collect_vars(fs, &path, stack, out)?;
        }
    }
    out.extend(kustomization.vars);
    stack.pop();
    Ok(())
}

fn build(
    fs: &dyn FileSystem,
    dir: &Path,
    variables: &BTreeMap<String, String>,
    stack: &mut Vec<PathBuf>,
) -> Result<Vec<ResourceDocument>, RenderError> {
    enter(dir, stack)?;
    let kustomization = load(fs, dir)?;

    let mut documents = Vec::new();
    for entry in &kustomization.resources {
        let path = normalize(&dir.join(entry));
        if fs.is_dir(&path) {
            documents.extend(build(fs, &path, variables, stack)?);
        } else {
            let text = substitute(&read(fs, &path)?, variables, &path)?;
            documents.extend(parse_documents(&text, &path)?);
        }
    }

    let mut seen = HashSet::new();
    for doc in &documents {
        let id = doc.identity();
        if !seen.insert(id.clone()) {
            return Err(RenderError::DuplicateResource(id.to_string()));
        }
    }

    for entry in &kustomization.patches {
        apply_patch(fs, dir, entry, variables, &mut documents)?;
    }

    if !kustomization.common_labels.is_empty() {
        for doc in &mut documents {
            doc.add_labels(&kustomization.common_labels);
        }
    }

    stack.pop();
    Ok(documents)
}

fn apply_patch(
    fs: &dyn FileSystem,
    dir: &Path,
    entry: &PatchEntry,
    variables: &BTreeMap<String, String>,
    documents: &mut [ResourceDocument],
) -> Result<(), RenderError> {
    let (source, text) = match (&entry.path, &entry.patch) {
        (Some(file), _) => {
            let path = normalize(&dir.join(file));
            let text = read(fs, &path)?;
            (path, text)
        }
        (None, Some(inline)) => (dir.join(KUSTOMIZATION_FILE), inline.clone()),
        (None, None) => {
            return Err(RenderError::InvalidDocument {
                path: dir.join(KUSTOMIZATION_FILE),
                reason: "patch entry needs either path or patch".to_string(),
            });
        }
    };
    let text = substitute(&text, variables, &source)?;
    let patch: Value = serde_yaml::from_str(&text).map_err(|e| RenderError::Malformed {
        path: source.clone(),
        source: e,
    })?;

    let (kind, name) = match &entry.target {
        Some(target) => (target.kind.clone(), target.name.clone()),
        None => (
            patch.get("kind").and_then(Value::as_str).map(str::to_string),
            patch
                .pointer("/metadata/name")
                .and_then(Value::as_str)
                .map(str::to_string),
        ),
    };

    let mut matched = 0;
    for doc in documents.iter_mut() {
        let kind_ok = kind.as_deref().is_none_or(|k| k == doc.kind());
        let name_ok = name.as_deref().is_none_or(|n| n == doc.name());
        if kind_ok && name_ok {
            doc.merge(&patch);
            matched += 1;
        }
    }
    if matched == 0 || (kind.is_none() && name.is_none()) {
        return Err(RenderError::PatchTargetNotFound { path: source });
    }
    debug!("Patch {} applied to {} documents", source.display(), matched);
    Ok(())
}

/// Replaces `$(NAME)` tokens; an unknown name is an error
fn substitute(
    text: &str,
    variables: &BTreeMap<String, String>,
    path: &Path,
) -> Result<String, RenderError> {
    if let Some(missing) = VARIABLE
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .find(|name| !variables.contains_key(name))
    {
        return Err(RenderError::UnresolvedVariable {
            path: path.to_path_buf(),
            name: missing,
        });
    }
    Ok(VARIABLE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            variables.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned())
}

/// Splits a multi-document YAML stream; empty documents are skipped.
pub fn parse_documents(text: &str, path: &Path) -> Result<Vec<ResourceDocument>, RenderError> {
    let mut documents = Vec::new();
    for de in serde_yaml::Deserializer::from_str(text) {
        let value = Value::deserialize(de).map_err(|source| RenderError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;
        if value.is_null() {
            continue;
        }
        let doc = ResourceDocument::from_value(value).map_err(|reason| RenderError::InvalidDocument {
            path: path.to_path_buf(),
            reason,
        })?;
        documents.push(doc);
    }
    Ok(documents)
}
