//! CLI argument parsing.
//!
//! Flags mirror the configuration file keys one-to-one; `Cli::overrides`
//! turns the parsed flags into the highest-precedence configuration layer.
use crate::config::Config;
use clap::Parser;
use std::path::PathBuf;

/// Generate text from a local model with an optional grammar and prompt template.
#[derive(Parser, Debug)]
#[command(
    name = "ggen",
    version,
    about = "Generate text from a local LLM using a prompt template and an optional grammar",
    after_help = "Precedence: built-in defaults < config files (in order given) < flags.\n\nExamples:\n  ggen -M ~/models/mistral-7b.gguf -s json -t mistral-instruct \"Greet me in JSON\"\n  ggen -c ~/.config/ggen/local.json -i prompt.txt -o out.json"
)]
pub struct Cli {
    /// JSON configuration file; repeatable, later files override earlier ones
    #[arg(short = 'c', long = "config-file", value_name = "PATH")]
    pub config_files: Vec<PathBuf>,

    /// Enable verbose logging
    #[arg(long)]
    pub debug: bool,

    /// File containing the prompt (`-` reads standard input)
    #[arg(short = 'i', long, value_name = "PATH")]
    pub input: Option<PathBuf>,

    /// Output file [default: standard output]
    #[arg(short = 'o', long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Model name, looked up in the model directories
    #[arg(short = 'm', long, value_name = "NAME")]
    pub model_name: Option<String>,

    /// Model file, or a directory to look the model name up in
    #[arg(short = 'M', long, value_name = "PATH")]
    pub model_path: Option<PathBuf>,

    /// Schema name, looked up in the schema directories
    #[arg(short = 's', long, value_name = "NAME")]
    pub schema_name: Option<String>,

    /// Schema file, or a directory to look the schema name up in
    #[arg(short = 'S', long, value_name = "PATH")]
    pub schema_path: Option<PathBuf>,

    /// Prompt template name [default: instruct]
    #[arg(short = 't', long, value_name = "NAME")]
    pub prompt_template: Option<String>,

    /// Prompt template file, or a directory to look the template name up in
    #[arg(short = 'T', long, value_name = "PATH")]
    pub prompt_template_path: Option<PathBuf>,

    /// Inline prompt; words are joined with spaces. Takes precedence over --input
    #[arg(value_name = "PROMPT")]
    pub prompt: Vec<String>,
}

impl Cli {
    /// Flags as a configuration layer. Unset flags stay `None` so they never
    /// mask a value coming from a config file.
    pub fn overrides(&self) -> Config {
        Config {
            model_name: self.model_name.clone(),
            model_path: self.model_path.clone(),
            schema_name: self.schema_name.clone(),
            schema_path: self.schema_path.clone(),
            prompt_template: self.prompt_template.clone(),
            prompt_template_path: self.prompt_template_path.clone(),
            input: self.input.clone(),
            output: self.output.clone(),
            debug: self.debug.then_some(true),
            ..Config::default()
        }
    }

    /// Inline prompt words joined into one string, if any were given.
    pub fn inline_prompt(&self) -> Option<String> {
        let joined = self.prompt.join(" ");
        let trimmed = joined.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}
