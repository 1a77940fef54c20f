//! Output destination and result formatting.
//!
//! File output is staged in a temporary file next to the destination and only
//! renamed into place by `OutputSink::commit`. A sink dropped on an error path
//! removes its staged file, so a failed run never leaves a partial output.
use crate::config::Config;
use crate::error::{Error, Result};
use crate::inference::Generated;
use serde::Serialize;
use serde_json::Value;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Stdout,
    File(PathBuf),
}

impl OutputTarget {
    pub fn from_config(config: &Config) -> OutputTarget {
        match &config.output {
            Some(path) => OutputTarget::File(path.clone()),
            None => OutputTarget::Stdout,
        }
    }

    /// Open the destination for the single write of this run.
    pub fn open(&self) -> Result<OutputSink> {
        match self {
            OutputTarget::Stdout => Ok(OutputSink::Stdout(io::stdout().lock())),
            OutputTarget::File(dest) => {
                let dir = staging_dir(dest);
                let staged = tempfile::Builder::new()
                    .prefix(".ggen-")
                    .suffix(".tmp")
                    .tempfile_in(dir)
                    .map_err(|err| {
                        Error::io(format!("create output next to {}", dest.display()), err)
                    })?;
                Ok(OutputSink::File {
                    staged,
                    dest: dest.clone(),
                    written: 0,
                })
            }
        }
    }
}

fn staging_dir(dest: &Path) -> &Path {
    match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

pub enum OutputSink {
    Stdout(io::StdoutLock<'static>),
    File {
        staged: NamedTempFile,
        dest: PathBuf,
        written: u64,
    },
}

impl OutputSink {
    pub fn is_stdout(&self) -> bool {
        matches!(self, OutputSink::Stdout(_))
    }

    /// Flush and, for files, move the staged file into place.
    pub fn commit(self) -> Result<()> {
        match self {
            OutputSink::Stdout(mut stdout) => stdout
                .flush()
                .map_err(|err| Error::io("flush standard output", err)),
            OutputSink::File {
                mut staged,
                dest,
                written,
            } => {
                staged
                    .flush()
                    .map_err(|err| Error::io(format!("write {}", dest.display()), err))?;
                staged
                    .persist(&dest)
                    .map_err(|err| Error::io(format!("write {}", dest.display()), err.error))?;
                tracing::info!(path = %dest.display(), bytes = written, "wrote output");
                Ok(())
            }
        }
    }
}

impl Write for OutputSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            OutputSink::Stdout(stdout) => stdout.write(buf),
            OutputSink::File {
                staged, written, ..
            } => {
                let count = staged.write(buf)?;
                *written += count as u64;
                Ok(count)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            OutputSink::Stdout(stdout) => stdout.flush(),
            OutputSink::File { staged, .. } => staged.flush(),
        }
    }
}

/// Write a buffered result and commit the sink. Streamed results were
/// already written by the backend and only need the commit.
pub fn emit(mut sink: OutputSink, generated: Generated, structured: bool) -> Result<()> {
    if let Generated::Text(text) = generated {
        let rendered = render(&text, structured, sink.is_stdout());
        sink.write_all(rendered.as_bytes())
            .map_err(|err| Error::io("write output", err))?;
    }
    sink.commit()
}

/// Grammar-constrained output that parses as JSON is re-serialized: indented
/// for a terminal, compact for a file. Anything else is written verbatim.
pub fn render(text: &str, structured: bool, to_stdout: bool) -> String {
    if structured {
        match serde_json::from_str::<Value>(text.trim()) {
            Ok(value) => {
                if let Some(json) = serialize_json(&value, to_stdout) {
                    return terminate(json, to_stdout);
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "constrained output is not JSON; writing it verbatim");
            }
        }
    }
    terminate(text.to_string(), to_stdout)
}

fn serialize_json(value: &Value, pretty: bool) -> Option<String> {
    if !pretty {
        return serde_json::to_string(value).ok();
    }
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut serializer).ok()?;
    String::from_utf8(buf).ok()
}

fn terminate(mut text: String, to_stdout: bool) -> String {
    if to_stdout && !text.ends_with('\n') {
        text.push('\n');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn json_is_indented_with_four_spaces_on_stdout() {
        let rendered = render(r#" {"greeting":"hello"} "#, true, true);
        assert_eq!(rendered, "{\n    \"greeting\": \"hello\"\n}\n");
    }

    #[test]
    fn json_is_compact_in_files() {
        let rendered = render("{\n  \"greeting\": \"hello\"\n}\n", true, false);
        assert_eq!(rendered, r#"{"greeting":"hello"}"#);
    }

    #[test]
    fn unconstrained_text_is_verbatim() {
        assert_eq!(render("{\"a\": 1}", false, false), "{\"a\": 1}");
        assert_eq!(render("plain answer", false, true), "plain answer\n");
        assert_eq!(render("done\n", false, true), "done\n");
    }

    #[test]
    fn constrained_non_json_is_verbatim() {
        assert_eq!(render("yes", true, false), "yes");
    }

    #[test]
    fn file_sink_appears_only_on_commit() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("out.json");
        let target = OutputTarget::File(dest.clone());

        let mut sink = target.open().unwrap();
        sink.write_all(b"partial").unwrap();
        assert!(!dest.exists());
        sink.commit().unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), "partial");
    }

    #[test]
    fn dropped_sink_leaves_nothing_behind() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("out.txt");
        {
            let mut sink = OutputTarget::File(dest.clone()).open().unwrap();
            sink.write_all(b"half a result").unwrap();
        }
        assert!(!dest.exists());
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn emit_formats_buffered_text() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("greeting.json");
        let sink = OutputTarget::File(dest.clone()).open().unwrap();
        emit(sink, Generated::Text("{ \"greeting\": \"hi\" }".into()), true).unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), r#"{"greeting":"hi"}"#);
    }

    #[test]
    fn commit_replaces_existing_file() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("out.txt");
        fs::write(&dest, "old").unwrap();
        let sink = OutputTarget::File(dest.clone()).open().unwrap();
        emit(sink, Generated::Text("new".into()), false).unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), "new");
    }

    #[test]
    fn missing_output_directory_is_io_error() {
        let temp = tempfile::tempdir().unwrap();
        let target = OutputTarget::File(temp.path().join("missing").join("out.txt"));
        let err = target.open().err().unwrap();
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn bare_file_name_stages_in_current_dir() {
        assert_eq!(staging_dir(Path::new("out.txt")), Path::new("."));
        assert_eq!(staging_dir(Path::new("/tmp/out.txt")), Path::new("/tmp"));
    }

    #[test]
    fn target_follows_config() {
        let config = Config {
            output: Some(PathBuf::from("result.json")),
            ..Config::default()
        };
        assert_eq!(
            OutputTarget::from_config(&config),
            OutputTarget::File(PathBuf::from("result.json"))
        );
        assert_eq!(OutputTarget::from_config(&Config::default()), OutputTarget::Stdout);
    }
}
