//! Grammar/schema loading.
//!
//! A schema constrains decoding either as a GBNF grammar or as a JSON Schema
//! that the inference program converts into a grammar itself.
use crate::error::{Error, Result};
use crate::resources::Located;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq)]
pub enum Grammar {
    Gbnf(String),
    JsonSchema(Value),
}

impl Grammar {
    pub fn kind(&self) -> &'static str {
        match self {
            Grammar::Gbnf(_) => "gbnf",
            Grammar::JsonSchema(_) => "json-schema",
        }
    }

    /// Load and validate the grammar behind a resolved schema reference.
    pub fn load(located: &Located) -> Result<Grammar> {
        let text = located.read_to_string()?;
        let declared_json = located
            .path()
            .and_then(|path| path.extension())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let grammar = Grammar::parse(&located.to_string(), declared_json, &text)?;
        tracing::debug!(schema = %located, kind = grammar.kind(), "schema loaded");
        Ok(grammar)
    }

    pub fn parse(origin: &str, declared_json: bool, text: &str) -> Result<Grammar> {
        if text.trim().is_empty() {
            return Err(Error::config(format!("schema {origin} is empty")));
        }
        match serde_json::from_str::<Value>(text) {
            Ok(value @ Value::Object(_)) => return Ok(Grammar::JsonSchema(value)),
            Ok(_) if declared_json => {
                return Err(Error::config(format!(
                    "schema {origin} must be a JSON object"
                )))
            }
            Err(err) if declared_json => {
                return Err(Error::config(format!(
                    "schema {origin} is not valid JSON: {err}"
                )))
            }
            _ => {}
        }
        if !root_rule_regex().is_match(text) {
            return Err(Error::config(format!(
                "schema {origin} is neither a JSON Schema object nor a GBNF grammar with a root rule"
            )));
        }
        Ok(Grammar::Gbnf(text.to_string()))
    }
}

fn root_rule_regex() -> &'static Regex {
    static ROOT_RULE: OnceLock<Regex> = OnceLock::new();
    ROOT_RULE.get_or_init(|| Regex::new(r"(?m)^\s*root\s*::=").expect("valid root rule regex"))
}
