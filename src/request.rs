//! Building the generation request from the merged configuration.
//!
//! Everything that can fail for configuration reasons fails here, before the
//! inference program is started.
use crate::config::{Config, SearchDirs, DEFAULT_TEMPLATE_NAME};
use crate::error::{Error, Result};
use crate::prompt::{PromptSource, PromptTemplate};
use crate::resources::{locate, Located, ResourceKind, ResourceRef};
use crate::schema::Grammar;
use std::io::Read;
use std::path::{Path, PathBuf};

/// One fully resolved generation request. Fields are private so the request
/// cannot change between resolution and dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    prompt: String,
    formatted_prompt: String,
    model: PathBuf,
    grammar: Option<Grammar>,
    template: PromptTemplate,
    max_tokens: i64,
}

impl GenerationRequest {
    /// Raw prompt text before the template is applied.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Prompt text as sent to the model.
    pub fn formatted_prompt(&self) -> &str {
        &self.formatted_prompt
    }

    pub fn model(&self) -> &Path {
        &self.model
    }

    pub fn grammar(&self) -> Option<&Grammar> {
        self.grammar.as_ref()
    }

    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    pub fn max_tokens(&self) -> i64 {
        self.max_tokens
    }
}

/// Resolve prompt, model, schema and template into a request.
pub fn resolve(
    config: &Config,
    inline_prompt: Option<String>,
    search: &SearchDirs,
    stdin: &mut dyn Read,
) -> Result<GenerationRequest> {
    let source = PromptSource::select(inline_prompt, config.input.as_deref())?;

    let model = resolve_model(config, search)?;
    let grammar = resolve_grammar(config, search)?;
    let template = resolve_template(config, search)?;

    let prompt = source.read(stdin)?;
    let formatted_prompt = template.render(&prompt);
    tracing::debug!(
        model = %model.display(),
        grammar = grammar.as_ref().map(Grammar::kind).unwrap_or("none"),
        template = template.origin(),
        prompt_bytes = prompt.len(),
        "generation request resolved"
    );

    Ok(GenerationRequest {
        prompt,
        formatted_prompt,
        model,
        grammar,
        template,
        max_tokens: config.max_tokens(),
    })
}

fn resolve_model(config: &Config, search: &SearchDirs) -> Result<PathBuf> {
    let reference = ResourceRef::from_parts(config.model_name.clone(), config.model_path.clone())
        .ok_or_else(|| {
            Error::config("no model specified: pass --model-name or --model-path")
        })?;
    match locate(
        ResourceKind::Model,
        &reference,
        search.for_kind(ResourceKind::Model),
        None,
    )? {
        Located::File(path) => Ok(path),
        builtin @ Located::Builtin { .. } => Err(Error::config(format!(
            "model resolved to {builtin}, which is not a model file"
        ))),
    }
}

fn resolve_grammar(config: &Config, search: &SearchDirs) -> Result<Option<Grammar>> {
    let Some(reference) =
        ResourceRef::from_parts(config.schema_name.clone(), config.schema_path.clone())
    else {
        return Ok(None);
    };
    let located = locate(
        ResourceKind::Schema,
        &reference,
        search.for_kind(ResourceKind::Schema),
        None,
    )?;
    Grammar::load(&located).map(Some)
}

fn resolve_template(config: &Config, search: &SearchDirs) -> Result<PromptTemplate> {
    let reference = ResourceRef::from_parts(
        config.prompt_template.clone(),
        config.prompt_template_path.clone(),
    )
    .unwrap_or_else(|| ResourceRef::ByName(DEFAULT_TEMPLATE_NAME.to_string()));
    let located = locate(
        ResourceKind::Template,
        &reference,
        search.for_kind(ResourceKind::Template),
        Some(DEFAULT_TEMPLATE_NAME),
    )?;
    let text = located.read_to_string()?;
    PromptTemplate::parse(located.to_string(), text)
}
