use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::AsyncReadExt;
use tokio::process::{ChildStderr, ChildStdout, Command};

use super::BackendError;

/// Output of a finished external process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// stdout and stderr merged in the order chunks arrived.
    pub combined: String,
    /// stdout alone, for callers that parse structured output.
    pub stdout: String,
    /// Whether the process exited with status zero.
    pub success: bool,
}

impl ProcessOutput {
    pub fn succeeded(combined: impl Into<String>) -> Self {
        let combined = combined.into();
        Self {
            stdout: combined.clone(),
            combined,
            success: true,
        }
    }

    pub fn failed(combined: impl Into<String>) -> Self {
        let combined = combined.into();
        Self {
            stdout: combined.clone(),
            combined,
            success: false,
        }
    }

    /// Last non-empty line of the merged output, with surrounding whitespace
    /// removed.
    pub fn last_line(&self) -> Option<&str> {
        self.combined
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
    }
}

/// Runs external programs to completion.
///
/// A non-zero exit is not an error at this level: it is reported through
/// [`ProcessOutput::success`] and the caller decides how much it matters.
/// Only failing to start the program at all is an error.
pub trait ProcessRunner: Send + Sync {
    fn run(
        &self,
        program: &str,
        args: &[&str],
    ) -> impl Future<Output = Result<ProcessOutput, BackendError>> + Send;
}

/// [`ProcessRunner`] backed by real child processes.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    current_dir: Option<PathBuf>,
    envs: Vec<(String, String)>,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every program from `dir`.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Add environment variables to every spawned program.
    pub fn envs(mut self, envs: impl IntoIterator<Item = (String, String)>) -> Self {
        self.envs.extend(envs);
        self
    }
}

impl ProcessRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<ProcessOutput, BackendError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }

        let spawn_error = |source| BackendError::Spawn {
            program: program.to_string(),
            source,
        };
        let mut child = cmd.spawn().map_err(spawn_error)?;

        let (combined, stdout) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => read_merged(stdout, stderr).await.map_err(spawn_error)?,
            _ => (Vec::new(), Vec::new()),
        };
        let status = child.wait().await.map_err(spawn_error)?;

        Ok(ProcessOutput {
            combined: String::from_utf8_lossy(&combined).into_owned(),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            success: status.success(),
        })
    }
}

enum Chunk {
    Stdout(usize),
    Stderr(usize),
}

/// Drain both pipes until they close. Returns the merged bytes and the
/// stdout bytes.
async fn read_merged(
    mut stdout: ChildStdout,
    mut stderr: ChildStderr,
) -> std::io::Result<(Vec<u8>, Vec<u8>)> {
    let mut combined = Vec::new();
    let mut out_only = Vec::new();
    let mut out_buf = [0u8; 4096];
    let mut err_buf = [0u8; 4096];
    let (mut out_open, mut err_open) = (true, true);

    while out_open || err_open {
        let chunk = tokio::select! {
            read = stdout.read(&mut out_buf), if out_open => Chunk::Stdout(read?),
            read = stderr.read(&mut err_buf), if err_open => Chunk::Stderr(read?),
        };
        match chunk {
            Chunk::Stdout(0) => out_open = false,
            Chunk::Stderr(0) => err_open = false,
            Chunk::Stdout(n) => {
                combined.extend_from_slice(&out_buf[..n]);
                out_only.extend_from_slice(&out_buf[..n]);
            }
            Chunk::Stderr(n) => combined.extend_from_slice(&err_buf[..n]),
        }
    }

    Ok((combined, out_only))
}
