//! Vault session management.
//!
//! The [`SessionController`] owns everything tied to the single live account:
//! the auth state, the session token, the pending 2FA login (if any), the
//! in-memory item index and the encrypted cache key. All vault decryption is
//! left to the `bw` CLI; this module only orchestrates it.

mod auth;
mod challenge;
mod controller;
mod error;
mod generator;

pub use auth::{AuthState, SessionToken, ToolAuthStatus, ToolStatus};
pub use challenge::{
    default_classifier, keyword_classifier, ChallengeAnswer, ChallengeClassifier, LoginInput,
    LoginWatcher, LoginStep, PendingChallenge, CHALLENGE_KEYWORDS,
};
pub use controller::{LoginOutcome, SessionController, SyncJob, SyncedItems};
pub use error::{SessionError, SessionResult};
pub use generator::PasswordOptions;
