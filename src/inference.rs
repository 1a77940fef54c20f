//! Dispatch to the external inference program.
//!
//! The program is any command line that loads the model and prints the
//! generated text on stdout; llama.cpp's `llama-cli` is the default. The
//! command is split with shell-words and whole-argument placeholders are
//! substituted per request:
//!
//! - `{model}`: resolved model path
//! - `{prompt}`: formatted prompt, inline
//! - `{prompt_file}`: formatted prompt written to a temporary file
//! - `{max_tokens}`: token limit (`-1` = unlimited)
//! - `{grammar}`: `--grammar-file <tmp>` for GBNF, `--json-schema <json>` for
//!   JSON Schema, nothing when unconstrained
//!
//! Without `{prompt}` or `{prompt_file}` the prompt is written to stdin.
//!
//! The command is resolved in priority order:
//! 1. `inference_command` in a config file
//! 2. `GGEN_INFERENCE_COMMAND` environment variable
//! 3. `DEFAULT_INFERENCE_COMMAND`
use crate::config::Config;
use crate::error::{Error, Result};
use crate::request::GenerationRequest;
use crate::schema::Grammar;
use anyhow::{anyhow, Context};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;
use tempfile::NamedTempFile;

pub const DEFAULT_INFERENCE_COMMAND: &str = "llama-cli --model {model} --file {prompt_file} \
     --n-predict {max_tokens} --no-display-prompt -no-cnv {grammar}";

pub const INFERENCE_COMMAND_ENV: &str = "GGEN_INFERENCE_COMMAND";

/// Lines of the program's stderr attached to a failure.
const STDERR_TAIL_LINES: usize = 20;

/// Text produced by one generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Generated {
    /// Full output, held for formatting before it is written.
    Text(String),
    /// Output already copied to the sink as it arrived.
    Streamed { bytes: u64 },
}

/// The seam between request resolution and whatever performs generation.
pub trait InferenceBackend {
    /// Run one request. Streaming backends write to `sink` directly;
    /// buffering backends leave it untouched and return the text.
    fn generate(&self, request: GenerationRequest, sink: &mut dyn Write) -> Result<Generated>;
}

/// Runs an external program per request.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    program: PathBuf,
    args: Vec<String>,
    stream: bool,
}

impl CommandBackend {
    /// Build the backend and locate its program. A missing program is a
    /// configuration error so it surfaces before any model is loaded.
    pub fn from_config(config: &Config) -> Result<CommandBackend> {
        let raw = command_line(
            config.inference_command.as_deref(),
            std::env::var(INFERENCE_COMMAND_ENV).ok(),
        );
        let mut argv = shell_words::split(&raw)
            .map_err(|err| Error::config(format!("parse inference command `{raw}`: {err}")))?;
        if argv.is_empty() {
            return Err(Error::config("inference command is empty"));
        }
        let name = argv.remove(0);
        let program = which::which(&name).map_err(|err| {
            Error::config(format!("inference program `{name}` not found: {err}"))
        })?;
        tracing::debug!(program = %program.display(), args = ?argv, "inference command");
        Ok(CommandBackend {
            program,
            args: argv,
            stream: config.stream_enabled(),
        })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn streams(&self) -> bool {
        self.stream
    }
}

/// Explicit config value, then the environment, then the llama.cpp default.
fn command_line(explicit: Option<&str>, env_value: Option<String>) -> String {
    explicit
        .map(|value| value.to_string())
        .or(env_value.filter(|value| !value.trim().is_empty()))
        .unwrap_or_else(|| DEFAULT_INFERENCE_COMMAND.to_string())
}

/// Arguments with placeholders substituted, plus the temp files they point at.
struct PreparedArgs {
    args: Vec<String>,
    prompt_on_stdin: bool,
    _temp_files: Vec<NamedTempFile>,
}

fn prepare_args(template: &[String], request: &GenerationRequest) -> anyhow::Result<PreparedArgs> {
    let mut args = Vec::with_capacity(template.len());
    let mut temp_files = Vec::new();
    let mut prompt_on_stdin = true;

    for arg in template {
        match arg.as_str() {
            "{model}" => args.push(request.model().to_string_lossy().into_owned()),
            "{prompt}" => {
                args.push(request.formatted_prompt().to_string());
                prompt_on_stdin = false;
            }
            "{prompt_file}" => {
                let file = write_temp("ggen-prompt-", ".txt", request.formatted_prompt())?;
                args.push(file.path().to_string_lossy().into_owned());
                temp_files.push(file);
                prompt_on_stdin = false;
            }
            "{max_tokens}" => args.push(request.max_tokens().to_string()),
            "{grammar}" => match request.grammar() {
                Some(Grammar::Gbnf(text)) => {
                    let file = write_temp("ggen-grammar-", ".gbnf", text)?;
                    args.push("--grammar-file".to_string());
                    args.push(file.path().to_string_lossy().into_owned());
                    temp_files.push(file);
                }
                Some(Grammar::JsonSchema(schema)) => {
                    args.push("--json-schema".to_string());
                    args.push(schema.to_string());
                }
                None => {}
            },
            _ => args.push(arg.clone()),
        }
    }

    Ok(PreparedArgs {
        args,
        prompt_on_stdin,
        _temp_files: temp_files,
    })
}

fn write_temp(prefix: &str, suffix: &str, content: &str) -> anyhow::Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(suffix)
        .tempfile()
        .context("create temp file")?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("write {}", file.path().display()))?;
    file.flush().context("flush temp file")?;
    Ok(file)
}

/// The prompt as a rewound anonymous file, handed to the child as stdin so
/// its output can be drained without a concurrent writer.
fn stdin_file(prompt: &str) -> anyhow::Result<File> {
    let mut file = tempfile::tempfile().context("create prompt stdin file")?;
    file.write_all(prompt.as_bytes())
        .context("write prompt stdin file")?;
    file.seek(SeekFrom::Start(0))
        .context("rewind prompt stdin file")?;
    Ok(file)
}

impl InferenceBackend for CommandBackend {
    fn generate(&self, request: GenerationRequest, sink: &mut dyn Write) -> Result<Generated> {
        let prepared = prepare_args(&self.args, &request)?;
        let stderr_capture = tempfile::tempfile().context("create stderr capture")?;

        let stdin = if prepared.prompt_on_stdin {
            Stdio::from(stdin_file(request.formatted_prompt())?)
        } else {
            Stdio::null()
        };

        let mut command = Command::new(&self.program);
        command
            .args(&prepared.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::from(
                stderr_capture.try_clone().context("clone stderr capture")?,
            ))
            .stdin(stdin);

        let start = Instant::now();
        let mut child = command
            .spawn()
            .with_context(|| format!("spawn inference program {}", self.program.display()))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("inference stdout was not captured"))?;
        let drained = if self.stream {
            copy_stream(&mut stdout, sink).map(|bytes| Generated::Streamed { bytes })
        } else {
            let mut bytes = Vec::new();
            stdout
                .read_to_end(&mut bytes)
                .context("read inference output")
                .map_err(Error::from)
                .map(|_| bytes)
                .and_then(|bytes| {
                    String::from_utf8(bytes)
                        .context("decode inference output as UTF-8")
                        .map(Generated::Text)
                        .map_err(Error::from)
                })
        };
        // Closing our end unblocks a program still writing after a sink failure.
        drop(stdout);

        let status = child.wait().context("wait for inference program")?;
        let stderr = read_capture(stderr_capture);
        if !stderr.trim().is_empty() {
            tracing::debug!(stderr = %stderr.trim_end(), "inference program stderr");
        }
        if !status.success() {
            return Err(Error::Generation(anyhow!(
                "{} exited with {status}: {}",
                self.program.display(),
                stderr_tail(&stderr, STDERR_TAIL_LINES)
            )));
        }

        let generated = drained?;
        let response_bytes = match &generated {
            Generated::Text(text) => text.len() as u64,
            Generated::Streamed { bytes } => *bytes,
        };
        tracing::info!(
            elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            prompt_bytes = request.formatted_prompt().len(),
            response_bytes,
            streamed = self.stream,
            "inference complete"
        );
        Ok(generated)
    }
}

/// Copy program output to the sink as it arrives. Read failures belong to
/// the program; write failures belong to the output destination.
fn copy_stream(source: &mut dyn Read, sink: &mut dyn Write) -> Result<u64> {
    let mut buf = [0u8; 8192];
    let mut total = 0u64;
    loop {
        let read = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(anyhow::Error::new(err).context("read inference output").into()),
        };
        sink.write_all(&buf[..read])
            .map_err(|err| Error::io("write output", err))?;
        total += read as u64;
    }
    sink.flush().map_err(|err| Error::io("flush output", err))?;
    Ok(total)
}

fn read_capture(mut file: File) -> String {
    let mut bytes = Vec::new();
    if let Err(err) = file
        .seek(SeekFrom::Start(0))
        .and_then(|_| file.read_to_end(&mut bytes))
    {
        tracing::debug!(error = %err, "could not read inference stderr capture");
        return format!("(stderr unavailable: {err})");
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

fn stderr_tail(stderr: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = stderr.trim_end().lines().collect();
    if lines.is_empty() {
        return "(no stderr output)".to_string();
    }
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::SearchDirs;
    use crate::request::resolve;
    use std::fs;

    struct Setup {
        _temp: tempfile::TempDir,
        config: Config,
    }

    fn setup(command: &str, schema: Option<(&str, &str)>) -> Setup {
        let temp = tempfile::tempdir().unwrap();
        let model = temp.path().join("tiny.gguf");
        fs::write(&model, b"GGUF").unwrap();
        let template = temp.path().join("plain.txt");
        fs::write(&template, "<<{prompt}>>").unwrap();
        let schema_path = schema.map(|(name, content)| {
            let path = temp.path().join(name);
            fs::write(&path, content).unwrap();
            path
        });
        let config = Config {
            model_path: Some(model),
            prompt_template_path: Some(template),
            schema_path,
            inference_command: Some(command.to_string()),
            ..Config::default()
        };
        Setup {
            _temp: temp,
            config,
        }
    }

    fn run(setup: &Setup) -> (Result<Generated>, Vec<u8>) {
        let request = resolve(
            &setup.config,
            Some("hello".into()),
            &SearchDirs::default(),
            &mut std::io::empty(),
        )
        .unwrap();
        let backend = CommandBackend::from_config(&setup.config).unwrap();
        let mut sink = Vec::new();
        let result = backend.generate(request, &mut sink);
        (result, sink)
    }

    #[test]
    fn prompt_goes_to_stdin_without_placeholder() {
        let setup = setup("cat", None);
        let (result, sink) = run(&setup);
        assert_eq!(result.unwrap(), Generated::Text("<<hello>>".into()));
        assert!(sink.is_empty());
    }

    #[test]
    fn large_stdin_prompt_does_not_block_on_output() {
        let setup = setup("cat", None);
        let prompt = "x".repeat(1 << 20);
        let request = resolve(
            &setup.config,
            Some(prompt.clone()),
            &SearchDirs::default(),
            &mut std::io::empty(),
        )
        .unwrap();
        let backend = CommandBackend::from_config(&setup.config).unwrap();
        let result = backend.generate(request, &mut Vec::new()).unwrap();
        assert_eq!(result, Generated::Text(format!("<<{prompt}>>")));
    }

    #[test]
    fn stdin_file_is_rewound() {
        let mut file = stdin_file("hello").unwrap();
        let mut text = String::new();
        file.read_to_string(&mut text).unwrap();
        assert_eq!(text, "hello");
    }

    #[test]
    fn unreadable_capture_says_so() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("stderr.txt");
        fs::write(&path, "x").unwrap();
        let write_only = fs::OpenOptions::new().write(true).open(&path).unwrap();
        assert!(read_capture(write_only).starts_with("(stderr unavailable:"));
    }

    #[test]
    fn prompt_file_placeholder_points_at_formatted_prompt() {
        let setup = setup(r#"sh -c 'cat "$1"' ggen {prompt_file}"#, None);
        let (result, _) = run(&setup);
        assert_eq!(result.unwrap(), Generated::Text("<<hello>>".into()));
    }

    #[test]
    fn placeholders_expand_per_argument() {
        let setup = setup(
            r#"sh -c 'printf "%s|%s|%s|%s" "$1" "$2" "$3" "$4"' ggen {prompt} {max_tokens} {grammar}"#,
            Some(("greeting.json", r#"{"type":"object"}"#)),
        );
        let (result, _) = run(&setup);
        assert_eq!(
            result.unwrap(),
            Generated::Text(r#"<<hello>>|-1|--json-schema|{"type":"object"}"#.into())
        );
    }

    #[test]
    fn gbnf_grammar_is_passed_as_file() {
        let setup = setup(
            r#"sh -c 'test "$1" = --grammar-file && cat "$2"' ggen {grammar}"#,
            Some(("yes.gbnf", "root ::= \"yes\"\n")),
        );
        let (result, _) = run(&setup);
        assert_eq!(result.unwrap(), Generated::Text("root ::= \"yes\"\n".into()));
    }

    #[test]
    fn unconstrained_request_drops_grammar_placeholder() {
        let setup = setup(r#"sh -c 'echo "$#"' ggen {grammar}"#, None);
        let (result, _) = run(&setup);
        assert_eq!(result.unwrap(), Generated::Text("0\n".into()));
    }

    #[test]
    fn streaming_copies_output_to_sink() {
        let mut setup = setup("cat", None);
        setup.config.stream = Some(true);
        let (result, sink) = run(&setup);
        assert_eq!(result.unwrap(), Generated::Streamed { bytes: 9 });
        assert_eq!(sink, b"<<hello>>");
    }

    #[test]
    fn failing_program_reports_stderr_tail() {
        let setup = setup("sh -c 'echo model load failed >&2; exit 3'", None);
        let (result, _) = run(&setup);
        let err = result.unwrap_err();
        assert_eq!(err.exit_code(), 5);
        let message = err.to_string();
        assert!(message.contains("model load failed"), "{message}");
        assert!(message.contains('3'), "{message}");
    }

    #[test]
    fn missing_program_is_config_error() {
        let config = Config {
            inference_command: Some("ggen-no-such-inference-binary --model {model}".into()),
            ..Config::default()
        };
        let err = CommandBackend::from_config(&config).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("ggen-no-such-inference-binary"));
    }

    #[test]
    fn unbalanced_quotes_are_config_error() {
        let config = Config {
            inference_command: Some("llama-cli 'unterminated".into()),
            ..Config::default()
        };
        let err = CommandBackend::from_config(&config).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn command_line_precedence() {
        assert_eq!(command_line(Some("a"), Some("b".into())), "a");
        assert_eq!(command_line(None, Some("b".into())), "b");
        assert_eq!(command_line(None, Some("  ".into())), DEFAULT_INFERENCE_COMMAND);
        assert_eq!(command_line(None, None), DEFAULT_INFERENCE_COMMAND);
    }

    #[test]
    fn default_command_uses_llama_cli_placeholders() {
        let argv = shell_words::split(DEFAULT_INFERENCE_COMMAND).unwrap();
        assert_eq!(argv[0], "llama-cli");
        for placeholder in ["{model}", "{prompt_file}", "{max_tokens}", "{grammar}"] {
            assert!(argv.iter().any(|arg| arg == placeholder), "{placeholder}");
        }
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        assert_eq!(stderr_tail("a\nb\nc\n", 2), "b\nc");
        assert_eq!(stderr_tail("", 2), "(no stderr output)");
    }
}
