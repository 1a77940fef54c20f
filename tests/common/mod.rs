//! Shared test infrastructure for integration tests.
//!
//! Each test gets a sandbox directory with a model file, a fake inference
//! program (a shell script run through `sh`) and helpers to write config
//! files and run the `ggen` binary.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

pub struct Sandbox {
    pub dir: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let sandbox = Sandbox { dir };
        sandbox.write("tiny.gguf", "GGUF");
        sandbox
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn model(&self) -> PathBuf {
        self.path().join("tiny.gguf")
    }

    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dir");
        }
        fs::write(&path, content).expect("write sandbox file");
        path
    }

    /// Write a fake inference program and return the command line that runs
    /// it with the given placeholder arguments. The script records its
    /// arguments in `args.txt`, one per line.
    pub fn fake_inference(&self, body: &str, placeholders: &str) -> String {
        let script = self.write(
            "fake-inference.sh",
            &format!(
                "printf '%s\\n' \"$@\" > \"$(dirname \"$0\")/args.txt\"\n{body}\n"
            ),
        );
        format!(
            "sh {} {placeholders}",
            shell_words::quote(&script.to_string_lossy())
        )
    }

    /// Arguments the fake program was called with, if it ran at all.
    pub fn recorded_args(&self) -> Option<Vec<String>> {
        let content = fs::read_to_string(self.path().join("args.txt")).ok()?;
        Some(content.lines().map(str::to_string).collect())
    }

    pub fn config(&self, name: &str, value: serde_json::Value) -> PathBuf {
        self.write(name, &serde_json::to_string_pretty(&value).expect("serialize config"))
    }

    pub fn ggen(&self) -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_ggen"));
        command
            .current_dir(self.path())
            .env_remove("RUST_LOG")
            .env_remove("GGEN_INFERENCE_COMMAND")
            .stdin(Stdio::null());
        command
    }
}

pub fn run(mut command: Command) -> Output {
    command.output().expect("run ggen")
}

pub fn run_with_stdin(mut command: Command, input: &str) -> Output {
    command.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = command.spawn().expect("spawn ggen");
    child
        .stdin
        .take()
        .expect("stdin piped")
        .write_all(input.as_bytes())
        .expect("write stdin");
    child.wait_with_output().expect("wait ggen")
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}
