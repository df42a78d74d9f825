//! Subprocess execution
//!
//! Everything that spawns an external process goes through [`CommandRunner`],
//! so the installer can be exercised against a fake runner in tests.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Default per-command timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Error, Debug)]
pub enum RunError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` timed out after {}s", timeout.as_secs())]
    Timeout { program: String, timeout: Duration },

    #[error("io error while running `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// A command to run: program, arguments, optional secret stdin
#[derive(Debug)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<SecretString>,
    /// `None` means [`DEFAULT_TIMEOUT`]
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
            timeout: None,
        }
    }

    pub fn with_stdin(mut self, stdin: SecretString) -> Self {
        self.stdin = Some(stdin);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Printable form, without stdin
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success() -> Self {
        Self {
            code: Some(0),
            ..Default::default()
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    /// stderr when present, otherwise stdout, trimmed
    pub fn diagnostic(&self) -> String {
        let text = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        text.trim().to_string()
    }
}

/// Runs external commands and looks up binaries
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion. A non-zero exit is not an error here;
    /// callers inspect [`CommandOutput::code`].
    async fn run(&self, cmd: CommandSpec) -> Result<CommandOutput, RunError>;

    /// Resolve a binary on the execution path
    fn which(&self, program: &str) -> Option<PathBuf>;

    /// Check if a binary exists
    fn has(&self, program: &str) -> bool {
        self.which(program).is_some()
    }
}

/// Runner that spawns real processes
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, cmd: CommandSpec) -> Result<CommandOutput, RunError> {
        debug!("→ {}", cmd.display());
        let timeout = cmd.timeout.unwrap_or(DEFAULT_TIMEOUT);

        let mut child = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(if cmd.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunError::Spawn {
                program: cmd.program.clone(),
                source,
            })?;

        if let (Some(secret), Some(mut stdin)) = (cmd.stdin.as_ref(), child.stdin.take()) {
            let io_err = |source| RunError::Io {
                program: cmd.program.clone(),
                source,
            };
            stdin
                .write_all(secret.expose_secret().as_bytes())
                .await
                .map_err(io_err)?;
            stdin.write_all(b"\n").await.map_err(io_err)?;
            // dropping closes the pipe so the child sees EOF
            drop(stdin);
        }

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| RunError::Io {
                program: cmd.program.clone(),
                source,
            })?,
            Err(_) => {
                warn!("`{}` timed out after {:?}", cmd.display(), timeout);
                return Err(RunError::Timeout {
                    program: cmd.program,
                    timeout,
                });
            }
        };

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn which(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }
}
