//! Launching the Bitwarden CLI.
//!
//! Uses `tokio::process::Command`, which executes the binary directly without
//! a shell, so arguments such as the account email are never interpreted.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{failure_message, ProcessError, ProcessHandle};

/// Environment variable carrying the session token of an unlocked vault.
pub const SESSION_ENV: &str = "BW_SESSION";

/// Environment variable the CLI is told to read the master password from
/// (`--passwordenv BW_PASSWORD`).
pub const PASSWORD_ENV: &str = "BW_PASSWORD";

/// Time limits applied to CLI invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Hard bound for one-shot calls; the process is killed afterwards.
    pub one_shot: Duration,
    /// How long an interactive login may stay silent before a second factor
    /// is assumed to be required.
    pub login_deadline: Duration,
    /// Hard bound for the process to finish after a 2FA code was submitted.
    pub challenge_submit: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            one_shot: Duration::from_secs(30),
            login_deadline: Duration::from_secs(15),
            challenge_submit: Duration::from_secs(30),
        }
    }
}

/// Per-invocation environment variables layered over the ambient environment.
///
/// Values are wiped from memory when the overrides are dropped.
#[derive(Default, Zeroize, ZeroizeOnDrop)]
pub struct EnvOverrides {
    vars: Vec<(String, String)>,
}

impl EnvOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(existing) = self.vars.iter_mut().find(|(k, _)| k == key) {
            existing.1.zeroize();
            existing.1 = value;
        } else {
            self.vars.push((key.to_string(), value));
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.iter().any(|(k, _)| k == key)
    }

    fn apply(&self, cmd: &mut Command) {
        for (key, value) in &self.vars {
            cmd.env(key, value);
        }
    }
}

impl std::fmt::Debug for EnvOverrides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Only the names; the values are secrets
        f.debug_list()
            .entries(self.vars.iter().map(|(k, _)| k))
            .finish()
    }
}

/// Seconds in `duration`, rounded up so sub-second limits never read as 0s.
fn whole_seconds(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

/// Runs the external CLI binary.
#[derive(Debug, Clone)]
pub struct Invoker {
    binary: PathBuf,
    one_shot_timeout: Duration,
}

impl Invoker {
    pub fn new(binary: impl Into<PathBuf>, one_shot_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            one_shot_timeout,
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn command(&self, args: &[&str], env: &EnvOverrides) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args).kill_on_drop(true);
        env.apply(&mut cmd);
        cmd
    }

    fn spawn_error(&self, source: std::io::Error) -> ProcessError {
        ProcessError::Spawn {
            binary: self.binary.display().to_string(),
            source,
        }
    }

    /// Run a command to completion and return its trimmed stdout.
    ///
    /// The process is killed if it does not exit within the one-shot timeout.
    pub async fn run_once(&self, args: &[&str], env: &EnvOverrides) -> Result<String, ProcessError> {
        self.execute(args, env, None).await
    }

    /// Like [`Invoker::run_once`], with `input` written to the child's stdin.
    ///
    /// Used for payloads that must not show up in the process list.
    pub async fn run_once_with_input(
        &self,
        args: &[&str],
        env: &EnvOverrides,
        input: &[u8],
    ) -> Result<String, ProcessError> {
        self.execute(args, env, Some(input)).await
    }

    async fn execute(
        &self,
        args: &[&str],
        env: &EnvOverrides,
        input: Option<&[u8]>,
    ) -> Result<String, ProcessError> {
        let subcommand = args.first().copied().unwrap_or("");
        let mut cmd = self.command(args, env);
        cmd.stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

        // Only the subcommand is logged; later arguments can be user data
        debug!("Running bw {}", subcommand);

        let mut child = cmd.spawn().map_err(|e| self.spawn_error(e))?;
        let stdin = child.stdin.take();

        let run = async move {
            if let (Some(mut stdin), Some(input)) = (stdin, input) {
                stdin.write_all(input).await?;
                stdin.shutdown().await?;
            }
            child.wait_with_output().await
        };

        // On timeout the future, and with it the child, is dropped;
        // kill_on_drop terminates the process.
        match timeout(self.one_shot_timeout, run).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                if output.status.success() {
                    Ok(stdout.trim().to_string())
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    let exit_code = output.status.code();
                    debug!("bw {} failed with exit code {:?}", subcommand, exit_code);
                    Err(ProcessError::Failure {
                        exit_code,
                        stderr: failure_message(&stdout, &stderr, exit_code),
                    })
                }
            }
            Ok(Err(e)) => Err(ProcessError::Io(e)),
            Err(_) => {
                warn!(
                    "bw {} timed out after {:?}, killing it",
                    subcommand, self.one_shot_timeout
                );
                Err(ProcessError::Timeout {
                    timeout_secs: whole_seconds(self.one_shot_timeout),
                })
            }
        }
    }

    /// Start a long-lived process with piped stdin, stdout and stderr.
    ///
    /// No timeout is imposed here; the caller owns termination policy. The
    /// child is killed when the returned handle is dropped.
    pub fn run_interactive(
        &self,
        args: &[&str],
        env: &EnvOverrides,
    ) -> Result<ProcessHandle, ProcessError> {
        let mut cmd = self.command(args, env);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(
            "Starting interactive bw {}",
            args.first().copied().unwrap_or("")
        );

        let child = cmd.spawn().map_err(|e| self.spawn_error(e))?;
        Ok(ProcessHandle::new(child))
    }
}
