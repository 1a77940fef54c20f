//! Name-vs-path resolution for models, schemas and prompt templates.
//!
//! Every resource is referenced either by name (searched for in the configured
//! and standard directories, then among the built-ins) or by path. All three
//! kinds go through `locate`, so the precedence rules live in one place.
use crate::error::{Error, Result};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

const INSTRUCT_TXT: &str = include_str!("../resources/prompt_templates/instruct.txt");
const MISTRAL_INSTRUCT_TXT: &str =
    include_str!("../resources/prompt_templates/mistral-instruct.txt");
const CHATML_TXT: &str = include_str!("../resources/prompt_templates/chatml.txt");
const JSON_GBNF: &str = include_str!("../resources/schemas/json.gbnf");

const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    ("instruct", INSTRUCT_TXT),
    ("mistral-instruct", MISTRAL_INSTRUCT_TXT),
    ("chatml", CHATML_TXT),
];

const BUILTIN_SCHEMAS: &[(&str, &str)] = &[("json", JSON_GBNF)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Model,
    Schema,
    Template,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Model => "model",
            ResourceKind::Schema => "schema",
            ResourceKind::Template => "prompt template",
        }
    }

    /// File names tried, in order, for a resource called `name`.
    pub fn candidate_names(&self, name: &str) -> Vec<String> {
        let extensions: &[&str] = match self {
            ResourceKind::Model => &["gguf"],
            ResourceKind::Schema => &["gbnf", "json"],
            ResourceKind::Template => &["txt"],
        };
        let mut names = vec![name.to_string()];
        names.extend(extensions.iter().map(|ext| format!("{name}.{ext}")));
        names
    }

    fn builtins(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            ResourceKind::Model => &[],
            ResourceKind::Schema => BUILTIN_SCHEMAS,
            ResourceKind::Template => BUILTIN_TEMPLATES,
        }
    }

    /// Model directories (e.g. unpacked checkpoints) are valid references;
    /// schemas and templates must be regular files.
    fn accepts(&self, path: &Path) -> bool {
        match self {
            ResourceKind::Model => path.exists(),
            ResourceKind::Schema | ResourceKind::Template => path.is_file(),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the user referred to a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceRef {
    ByName(String),
    /// A file used as-is, or a directory the optional name is looked up in.
    ByPath { path: PathBuf, name: Option<String> },
}

impl ResourceRef {
    /// Combine a name/path pair; the path is the more specific reference and wins.
    pub fn from_parts(name: Option<String>, path: Option<PathBuf>) -> Option<ResourceRef> {
        match (name, path) {
            (name, Some(path)) => Some(ResourceRef::ByPath { path, name }),
            (Some(name), None) => Some(ResourceRef::ByName(name)),
            (None, None) => None,
        }
    }
}

/// Where a resource was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Located {
    File(PathBuf),
    Builtin {
        name: &'static str,
        content: &'static str,
    },
}

impl Located {
    pub fn read_to_string(&self) -> Result<String> {
        match self {
            Located::File(path) => fs::read_to_string(path)
                .map_err(|err| Error::io(format!("read {}", path.display()), err)),
            Located::Builtin { content, .. } => Ok((*content).to_string()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Located::File(path) => Some(path),
            Located::Builtin { .. } => None,
        }
    }
}

impl fmt::Display for Located {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Located::File(path) => write!(f, "{}", path.display()),
            Located::Builtin { name, .. } => write!(f, "<builtin:{name}>"),
        }
    }
}

/// Resolve a reference of the given kind.
///
/// `search` is only consulted for `ByName`; `default_name` fills in for a
/// directory path given without a name.
pub fn locate(
    kind: ResourceKind,
    reference: &ResourceRef,
    search: &[PathBuf],
    default_name: Option<&str>,
) -> Result<Located> {
    let located = match reference {
        ResourceRef::ByName(name) => locate_by_name(kind, name, search)?,
        ResourceRef::ByPath { path, name } => {
            locate_by_path(kind, path, name.as_deref(), default_name)?
        }
    };
    tracing::debug!(kind = kind.as_str(), resolved = %located, "resource resolved");
    Ok(located)
}

fn locate_by_name(kind: ResourceKind, name: &str, search: &[PathBuf]) -> Result<Located> {
    if name.trim().is_empty() {
        return Err(Error::config(format!("{kind} name is empty")));
    }
    if let Some(path) = find_in_dirs(kind, name, search) {
        return Ok(Located::File(path));
    }
    let candidates = kind.candidate_names(name);
    if let Some((builtin, content)) = kind
        .builtins()
        .iter()
        .find(|(builtin, _)| candidates.iter().any(|candidate| candidate == builtin))
        .copied()
    {
        return Ok(Located::Builtin {
            name: builtin,
            content,
        });
    }
    Err(not_found(kind, name, search))
}

fn locate_by_path(
    kind: ResourceKind,
    path: &Path,
    name: Option<&str>,
    default_name: Option<&str>,
) -> Result<Located> {
    if path.is_dir() {
        return match name.or(default_name) {
            Some(name) => find_in_dirs(kind, name, &[path.to_path_buf()])
                .map(Located::File)
                .ok_or_else(|| not_found(kind, name, &[path.to_path_buf()])),
            None if kind == ResourceKind::Model => Ok(Located::File(path.to_path_buf())),
            None => Err(Error::config(format!(
                "{kind} path {} is a directory; give a {kind} name to look up in it",
                path.display()
            ))),
        };
    }
    if kind.accepts(path) {
        if let Some(name) = name {
            tracing::debug!(
                kind = kind.as_str(),
                name,
                path = %path.display(),
                "explicit path takes precedence over name"
            );
        }
        return Ok(Located::File(path.to_path_buf()));
    }
    Err(Error::config(format!(
        "{kind} path {} does not exist",
        path.display()
    )))
}

fn find_in_dirs(kind: ResourceKind, name: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    let candidates = kind.candidate_names(name);
    dirs.iter()
        .flat_map(|dir| candidates.iter().map(move |candidate| dir.join(candidate)))
        .find(|path| kind.accepts(path))
}

fn not_found(kind: ResourceKind, name: &str, searched: &[PathBuf]) -> Error {
    let dirs = if searched.is_empty() {
        "no directories configured".to_string()
    } else {
        searched
            .iter()
            .map(|dir| dir.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };
    Error::config(format!("{kind} '{name}' not found (searched: {dirs})"))
}
