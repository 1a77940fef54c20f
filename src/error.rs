//! Error taxonomy and process exit codes.
//!
//! Every failure is classified once, at the point where its category is known,
//! so `main` only has to print the message and pick the exit code.
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Bad invocation that clap could not catch (e.g. no prompt at all).
    #[error("{0}")]
    Usage(String),

    /// A configuration file could not be read or parsed.
    #[error("config file {}: {message}", path.display())]
    ConfigFile { path: PathBuf, message: String },

    /// Resolution failed: missing model, unknown resource, invalid template.
    #[error("{0}")]
    Config(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Opaque failure from the inference program.
    #[error("generation failed: {0:#}")]
    Generation(anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    pub fn config_file(path: &Path, message: impl ToString) -> Self {
        Error::ConfigFile {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    /// Exit code reported to the shell. `2` matches clap's usage errors.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Usage(_) => 2,
            Error::ConfigFile { .. } | Error::Config(_) => 3,
            Error::Io { .. } => 4,
            Error::Generation(_) => 5,
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Generation(err)
    }
}
