//! Authentication state types for the vault session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Local view of where the session stands.
///
/// Transitions:
/// - `LoggedOut` → `AwaitingChallenge` (login needs a second factor)
/// - `LoggedOut` / `AwaitingChallenge` → `Unlocked` (login or 2FA succeeded)
/// - `Locked` → `Unlocked` (unlock with master password)
/// - any → `Locked` (lock), any → `LoggedOut` (logout or self-heal)
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AuthState {
    #[default]
    LoggedOut,
    AwaitingChallenge,
    Locked,
    Unlocked,
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LoggedOut => write!(f, "LoggedOut"),
            Self::AwaitingChallenge => write!(f, "AwaitingChallenge"),
            Self::Locked => write!(f, "Locked"),
            Self::Unlocked => write!(f, "Unlocked"),
        }
    }
}

/// The `status` field reported by `bw status`.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolAuthStatus {
    #[default]
    Unauthenticated,
    Locked,
    Unlocked,
}

/// Decoded output of `bw status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolStatus {
    pub status: ToolAuthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
}

impl ToolStatus {
    pub fn unauthenticated() -> Self {
        Self {
            status: ToolAuthStatus::Unauthenticated,
            user_email: None,
            server_url: None,
            last_sync: None,
        }
    }
}

/// Session token returned by a successful login or unlock.
///
/// Lives in memory only and is wiped on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_status_parses_cli_output() {
        let json = r#"{"serverUrl":"https://vault.example.com","lastSync":"2024-03-01T10:15:00.000Z","userEmail":"me@example.com","userId":"abc","status":"locked"}"#;
        let status: ToolStatus = serde_json::from_str(json).unwrap();
        assert_eq!(status.status, ToolAuthStatus::Locked);
        assert_eq!(status.user_email.as_deref(), Some("me@example.com"));
        assert!(status.last_sync.is_some());
    }

    #[test]
    fn test_tool_status_minimal() {
        let status: ToolStatus =
            serde_json::from_str(r#"{"serverUrl":null,"status":"unauthenticated"}"#).unwrap();
        assert_eq!(status, ToolStatus::unauthenticated());
    }

    #[test]
    fn test_session_token_debug_is_redacted() {
        let token = SessionToken::new("abc123secret");
        assert!(!format!("{:?}", token).contains("abc123secret"));
        assert_eq!(token.expose(), "abc123secret");
    }

    #[test]
    fn test_auth_state_serializes_pascal_case() {
        let json = serde_json::to_string(&AuthState::AwaitingChallenge).unwrap();
        assert_eq!(json, "\"AwaitingChallenge\"");
        assert_eq!(AuthState::default(), AuthState::LoggedOut);
    }
}
