//! Prompt source selection and template rendering.
use crate::error::{Error, Result};
use regex::{Captures, Regex};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// The one place the prompt text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptSource {
    Inline(String),
    File(PathBuf),
    Stdin,
}

impl PromptSource {
    /// Pick the prompt source. The inline prompt wins; an input file given
    /// alongside it is never read.
    pub fn select(inline: Option<String>, input: Option<&Path>) -> Result<PromptSource> {
        match (inline, input) {
            (Some(text), input) => {
                if let Some(input) = input {
                    tracing::warn!(
                        input = %input.display(),
                        "inline prompt given; ignoring input file"
                    );
                }
                Ok(PromptSource::Inline(text))
            }
            (None, Some(path)) if path == Path::new("-") => Ok(PromptSource::Stdin),
            (None, Some(path)) => Ok(PromptSource::File(path.to_path_buf())),
            (None, None) => Err(Error::Usage(
                "no prompt supplied: pass prompt text or --input <PATH>".to_string(),
            )),
        }
    }

    /// Read the prompt text, trimmed. `stdin` is only touched for `Stdin`.
    pub fn read(self, stdin: &mut dyn Read) -> Result<String> {
        let (label, raw) = match self {
            PromptSource::Inline(text) => ("inline prompt".to_string(), text),
            PromptSource::File(path) => {
                let text = fs::read_to_string(&path)
                    .map_err(|err| Error::io(format!("read input {}", path.display()), err))?;
                (format!("input file {}", path.display()), text)
            }
            PromptSource::Stdin => {
                let mut text = String::new();
                stdin
                    .read_to_string(&mut text)
                    .map_err(|err| Error::io("read prompt from stdin", err))?;
                ("standard input".to_string(), text)
            }
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::Usage(format!("no prompt supplied: {label} is empty")));
        }
        Ok(trimmed.to_string())
    }
}

const PROMPT_PLACEHOLDER: &str = "prompt";

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid placeholder regex")
    })
}

/// A validated prompt template containing at least one `{prompt}`.
///
/// `{{` and `}}` render as literal braces; other braces pass through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    origin: String,
    text: String,
}

impl PromptTemplate {
    pub fn parse(origin: impl Into<String>, text: impl Into<String>) -> Result<PromptTemplate> {
        let origin = origin.into();
        let text = text.into();
        let mut prompt_slots = 0usize;
        for caps in placeholder_regex().captures_iter(&text) {
            let Some(name) = caps.get(1) else {
                continue;
            };
            if name.as_str() != PROMPT_PLACEHOLDER {
                return Err(Error::config(format!(
                    "prompt template {origin} uses unknown placeholder {{{}}}",
                    name.as_str()
                )));
            }
            prompt_slots += 1;
        }
        if prompt_slots == 0 {
            return Err(Error::config(format!(
                "prompt template {origin} has no {{prompt}} placeholder"
            )));
        }
        Ok(PromptTemplate { origin, text })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn render(&self, prompt: &str) -> String {
        placeholder_regex()
            .replace_all(&self.text, |caps: &Captures| match &caps[0] {
                "{{" => "{".to_string(),
                "}}" => "}".to_string(),
                _ => prompt.to_string(),
            })
            .into_owned()
    }
}
