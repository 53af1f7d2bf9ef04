//! Subprocess execution for the Bitwarden CLI.
//!
//! Two shapes of invocation are supported:
//! - one-shot calls with a hard timeout (`Invoker::run_once`)
//! - long-lived interactive processes with piped stdio (`Invoker::run_interactive`)
//!
//! Secrets (master password, session token) are only ever handed to the child
//! through its environment, never as command-line arguments.

mod handle;
mod invoker;

pub use handle::{ProcessEvent, ProcessHandle};
pub use invoker::{EnvOverrides, Invoker, Timeouts, PASSWORD_ENV, SESSION_ENV};

use thiserror::Error;

/// Errors raised while running the external CLI.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The process did not finish in time and was killed.
    #[error("The vault CLI took too long to respond (gave up after {timeout_secs}s)")]
    Timeout { timeout_secs: u64 },

    /// The process exited unsuccessfully. `stderr` carries the tool's own
    /// message, which is shown to the user verbatim.
    #[error("{stderr}")]
    Failure {
        exit_code: Option<i32>,
        stderr: String,
    },

    /// The binary could not be started at all (missing, not executable, ...).
    #[error("Could not start {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pick the most useful failure message from a finished process.
///
/// Prefers stderr, falls back to stdout, then to a generic exit-code message.
pub(crate) fn failure_message(stdout: &str, stderr: &str, exit_code: Option<i32>) -> String {
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    let stdout = stdout.trim();
    if !stdout.is_empty() {
        return stdout.to_string();
    }
    match exit_code {
        Some(code) => format!("bw exited with code {}", code),
        None => "bw was terminated by a signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_message_prefers_stderr() {
        assert_eq!(failure_message("out", " err \n", Some(1)), "err");
        assert_eq!(failure_message(" out ", "", Some(1)), "out");
        assert_eq!(failure_message("", "  ", Some(3)), "bw exited with code 3");
        assert_eq!(failure_message("", "", None), "bw was terminated by a signal");
    }

    #[test]
    fn test_timeout_message_is_user_facing() {
        let err = ProcessError::Timeout { timeout_secs: 30 };
        assert!(err.to_string().contains("took too long"));
    }
}
