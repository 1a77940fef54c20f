//! Typed configuration layers and the search directories derived from them.
//!
//! A `Config` is one layer: a JSON file or the command-line flags. Layers are
//! folded left to right with `Config::merge`, so a later layer wins for every
//! key it sets and leaves the other keys alone.
use crate::error::{Error, Result};
use crate::resources::ResourceKind;
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::{Path, PathBuf};

/// Template used when neither a config file nor a flag names one.
pub const DEFAULT_TEMPLATE_NAME: &str = "instruct";

/// `-1` lets the inference program run until it emits end-of-stream.
pub const DEFAULT_MAX_TOKENS: i64 = -1;

/// Application directory name under the system and per-user roots.
const APP_DIR: &str = "ggen";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub model_name: Option<String>,
    pub model_path: Option<PathBuf>,
    pub schema_name: Option<String>,
    pub schema_path: Option<PathBuf>,
    #[serde(alias = "prompt_template_file")]
    pub prompt_template: Option<String>,
    pub prompt_template_path: Option<PathBuf>,
    #[serde(alias = "input_file")]
    pub input: Option<PathBuf>,
    #[serde(alias = "output_file")]
    pub output: Option<PathBuf>,
    pub debug: Option<bool>,

    /// Extra directories searched before the standard ones.
    #[serde(default, deserialize_with = "one_or_many")]
    pub model_paths: Option<Vec<PathBuf>>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub schema_paths: Option<Vec<PathBuf>>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub prompt_template_paths: Option<Vec<PathBuf>>,

    /// Inference program command line (shell-words syntax, may use placeholders).
    pub inference_command: Option<String>,
    pub max_tokens: Option<i64>,
    pub stream: Option<bool>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(PathBuf),
    Many(Vec<PathBuf>),
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Option<Vec<PathBuf>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Some(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(path) => vec![path],
        OneOrMany::Many(paths) => paths,
    }))
}

impl Config {
    /// Parse one JSON configuration file. Errors name the file.
    pub fn from_file(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path).map_err(|err| Error::config_file(path, err))?;
        serde_json::from_str(&content).map_err(|err| Error::config_file(path, err))
    }

    /// Load and fold configuration files in the order given.
    pub fn load_files(paths: &[PathBuf]) -> Result<Config> {
        paths.iter().try_fold(Config::default(), |merged, path| {
            let layer = Config::from_file(path)?;
            Ok(merged.merge(layer))
        })
    }

    /// Overlay `later` on top of `self`; every key set in `later` wins.
    pub fn merge(self, later: Config) -> Config {
        Config {
            model_name: later.model_name.or(self.model_name),
            model_path: later.model_path.or(self.model_path),
            schema_name: later.schema_name.or(self.schema_name),
            schema_path: later.schema_path.or(self.schema_path),
            prompt_template: later.prompt_template.or(self.prompt_template),
            prompt_template_path: later.prompt_template_path.or(self.prompt_template_path),
            input: later.input.or(self.input),
            output: later.output.or(self.output),
            debug: later.debug.or(self.debug),
            model_paths: later.model_paths.or(self.model_paths),
            schema_paths: later.schema_paths.or(self.schema_paths),
            prompt_template_paths: later.prompt_template_paths.or(self.prompt_template_paths),
            inference_command: later.inference_command.or(self.inference_command),
            max_tokens: later.max_tokens.or(self.max_tokens),
            stream: later.stream.or(self.stream),
        }
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug.unwrap_or(false)
    }

    pub fn stream_enabled(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    pub fn max_tokens(&self) -> i64 {
        self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
    }
}

/// Directories searched when a resource is referenced by name only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchDirs {
    pub models: Vec<PathBuf>,
    pub schemas: Vec<PathBuf>,
    pub prompt_templates: Vec<PathBuf>,
}

impl SearchDirs {
    /// Configured directories first, then the standard roots that exist.
    pub fn from_config(config: &Config) -> SearchDirs {
        let mut dirs = SearchDirs::configured(config);
        for root in standard_roots() {
            dirs.add_root(&root);
        }
        dirs
    }

    /// Only the directories named in the configuration.
    pub fn configured(config: &Config) -> SearchDirs {
        SearchDirs {
            models: config.model_paths.clone().unwrap_or_default(),
            schemas: config.schema_paths.clone().unwrap_or_default(),
            prompt_templates: config.prompt_template_paths.clone().unwrap_or_default(),
        }
    }

    /// Register the `models/`, `schemas/` and `prompt_templates/` children of `root`.
    pub fn add_root(&mut self, root: &Path) {
        if !root.is_dir() {
            return;
        }
        for (subdir, list) in [
            ("models", &mut self.models),
            ("schemas", &mut self.schemas),
            ("prompt_templates", &mut self.prompt_templates),
        ] {
            let path = root.join(subdir);
            if path.is_dir() && !list.contains(&path) {
                list.push(path);
            }
        }
    }

    pub fn for_kind(&self, kind: ResourceKind) -> &[PathBuf] {
        match kind {
            ResourceKind::Model => &self.models,
            ResourceKind::Schema => &self.schemas,
            ResourceKind::Template => &self.prompt_templates,
        }
    }
}

/// System-wide roots followed by the per-user data and config roots.
pub fn standard_roots() -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = ["/etc", "/usr/share", "/usr/local/share"]
        .iter()
        .map(|base| Path::new(base).join(APP_DIR))
        .collect();
    if let Some(data) = dirs::data_local_dir() {
        roots.push(data.join(APP_DIR));
    }
    if let Some(config) = dirs::config_dir() {
        roots.push(config.join(APP_DIR));
    }
    roots
}
