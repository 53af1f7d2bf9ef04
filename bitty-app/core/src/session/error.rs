//! Session error types.
//!
//! These are the errors the session controller surfaces to the command layer.
//! Messages are written for direct display in the launcher UI; `code()`
//! gives each one a stable tag.

use thiserror::Error;

use crate::cache::CacheError;
use crate::process::ProcessError;

/// Errors that can occur while driving the vault CLI.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The CLI call itself failed. The tool's own message is kept verbatim.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// The CLI reported state it cannot parse. Handled internally by logging
    /// out; rarely seen by callers.
    #[error("Vault CLI state is corrupted: {0}")]
    CorruptedState(String),

    /// The submitted 2FA code was rejected, or the process did not finish.
    #[error("Verification failed. Please check the code and try again.")]
    ChallengeInvalid,

    /// The login process did not finish after the 2FA code was submitted.
    #[error("Verification timed out. Please try again.")]
    ChallengeTimedOut,

    /// A 2FA code was submitted but no login is waiting for one.
    #[error("No pending login process. Please try logging in again.")]
    ChallengeAbsent,

    #[error("{0}")]
    LoginFailed(String),

    #[error("Vault is locked")]
    NotUnlocked,

    #[error("Vault is already unlocked")]
    AlreadyUnlocked,

    /// Unlock was attempted with no account logged in.
    #[error("Not logged in. Please log in first.")]
    NoAccount,

    #[error("Unexpected output from the vault CLI: {0}")]
    InvalidOutput(String),

    #[error("{0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

impl SessionError {
    /// Stable tag for the failure, reported to the UI as `errorCode`.
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::Process(ProcessError::Timeout { .. }) => "TIMEOUT",
            SessionError::Process(ProcessError::Spawn { .. }) => "CLI_NOT_FOUND",
            SessionError::Process(_) => "CLI_ERROR",
            SessionError::CorruptedState(_) => "CORRUPTED_STATE",
            SessionError::ChallengeInvalid => "CHALLENGE_INVALID",
            SessionError::ChallengeTimedOut => "CHALLENGE_TIMED_OUT",
            SessionError::ChallengeAbsent => "CHALLENGE_ABSENT",
            SessionError::LoginFailed(_) => "LOGIN_FAILED",
            SessionError::NotUnlocked => "NOT_UNLOCKED",
            SessionError::AlreadyUnlocked => "ALREADY_UNLOCKED",
            SessionError::NoAccount => "NO_ACCOUNT",
            SessionError::InvalidOutput(_) => "INVALID_OUTPUT",
            SessionError::Validation(_) => "VALIDATION",
            SessionError::Serialization(_) => "SERIALIZATION_ERROR",
            SessionError::Cache(_) => "CACHE_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_codes() {
        assert_eq!(SessionError::ChallengeAbsent.code(), "CHALLENGE_ABSENT");
        assert_eq!(SessionError::ChallengeInvalid.code(), "CHALLENGE_INVALID");
        assert_eq!(SessionError::ChallengeTimedOut.code(), "CHALLENGE_TIMED_OUT");
    }

    #[test]
    fn test_process_failure_message_is_verbatim() {
        let err = SessionError::from(ProcessError::Failure {
            exit_code: Some(1),
            stderr: "Invalid master password.".into(),
        });
        assert_eq!(err.to_string(), "Invalid master password.");
        assert_eq!(err.code(), "CLI_ERROR");
    }

    #[test]
    fn test_timeout_code() {
        let err = SessionError::from(ProcessError::Timeout { timeout_secs: 30 });
        assert_eq!(err.code(), "TIMEOUT");
        assert!(err.to_string().contains("took too long"));
    }
}
