//! Interactive login and second-factor challenge handling.
//!
//! `bw login` either finishes on its own (printing a session token) or stops
//! to ask for a two-step code on stderr. [`LoginWatcher`] watches the process
//! output and decides which of those happened. When a code is needed the
//! still-running process is parked in the [`ChallengeSlot`] until the user
//! submits one.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use super::auth::SessionToken;
use crate::process::{ProcessEvent, ProcessHandle};

/// Substrings in login stderr that mean the CLI is asking for a 2FA code.
pub const CHALLENGE_KEYWORDS: &[&str] = &["otp", "two-step", "verification", "2fa", "code"];

/// Decides whether accumulated (lower-cased) stderr is a 2FA prompt.
pub type ChallengeClassifier = Arc<dyn Fn(&str) -> bool + Send + Sync>;

pub fn keyword_classifier<I, S>(keywords: I) -> ChallengeClassifier
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let keywords: Vec<String> = keywords
        .into_iter()
        .map(|k| k.as_ref().to_lowercase())
        .collect();
    Arc::new(move |stderr: &str| keywords.iter().any(|k| stderr.contains(k.as_str())))
}

pub fn default_classifier() -> ChallengeClassifier {
    keyword_classifier(CHALLENGE_KEYWORDS.iter().copied())
}

// ============================================================================
// Login race
// ============================================================================

/// Something that happened while waiting on `bw login`.
#[derive(Debug)]
pub enum LoginInput {
    Event(ProcessEvent),
    DeadlineElapsed,
}

/// Where the login stands after an input.
#[derive(Debug)]
pub enum LoginStep {
    /// Keep waiting.
    Pending,
    /// Stderr looks like a 2FA prompt.
    ChallengeDetected,
    /// Nothing decisive happened before the deadline.
    DeadlineElapsed,
    Authenticated(SessionToken),
    Failed(String),
}

/// Accumulates login output and classifies it.
///
/// All decisions of the login race go through [`LoginWatcher::advance`], so the
/// caller only has to feed events in and act on the first non-pending step.
pub struct LoginWatcher {
    classifier: ChallengeClassifier,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl LoginWatcher {
    pub fn new(classifier: ChallengeClassifier) -> Self {
        Self {
            classifier,
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    pub fn advance(&mut self, input: LoginInput) -> LoginStep {
        match input {
            LoginInput::Event(ProcessEvent::Stdout(bytes)) => {
                self.stdout.extend_from_slice(&bytes);
                LoginStep::Pending
            }
            LoginInput::Event(ProcessEvent::Stderr(bytes)) => {
                self.stderr.extend_from_slice(&bytes);
                let stderr = String::from_utf8_lossy(&self.stderr).to_lowercase();
                if (self.classifier)(&stderr) {
                    LoginStep::ChallengeDetected
                } else {
                    LoginStep::Pending
                }
            }
            LoginInput::Event(ProcessEvent::Closed { code }) => {
                let stdout = String::from_utf8_lossy(&self.stdout);
                let token = stdout.trim();
                if code == Some(0) && !token.is_empty() {
                    LoginStep::Authenticated(SessionToken::new(token))
                } else {
                    LoginStep::Failed(login_failure_message(
                        &stdout,
                        &String::from_utf8_lossy(&self.stderr),
                        code,
                    ))
                }
            }
            LoginInput::DeadlineElapsed => LoginStep::DeadlineElapsed,
        }
    }
}

impl Drop for LoginWatcher {
    fn drop(&mut self) {
        zeroize::Zeroize::zeroize(&mut self.stdout);
    }
}

fn login_failure_message(stdout: &str, stderr: &str, code: Option<i32>) -> String {
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    let stdout = stdout.trim();
    if !stdout.is_empty() {
        return stdout.to_string();
    }
    match code {
        Some(code) => format!("Login failed (exit code {})", code),
        None => "Login failed (process was terminated)".to_string(),
    }
}

// ============================================================================
// Pending challenge
// ============================================================================

/// Result of answering a pending challenge.
#[derive(Debug)]
pub enum ChallengeAnswer {
    Accepted(SessionToken),
    Rejected,
    TimedOut,
}

/// A login process waiting for a two-step code.
pub struct PendingChallenge {
    handle: ProcessHandle,
    stdout: Vec<u8>,
}

impl PendingChallenge {
    /// Park `handle`. Output seen before this point is deliberately dropped:
    /// only stdout produced after the code is written can be the token.
    pub fn new(handle: ProcessHandle) -> Self {
        Self {
            handle,
            stdout: Vec::new(),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.id()
    }

    /// Feed `code` to the process and wait at most `limit` for it to exit.
    pub async fn answer(mut self, code: &str, limit: Duration) -> ChallengeAnswer {
        let deadline = Instant::now() + limit;

        // The process may already have exited (slow login that completed
        // after the deadline); its buffered output is still read below.
        if let Err(e) = self.handle.write_line(code).await {
            debug!("Could not write 2FA code to bw login: {}", e);
        }
        self.handle.close_stdin();

        loop {
            match timeout_at(deadline, self.handle.next_event()).await {
                Ok(ProcessEvent::Stdout(bytes)) => self.stdout.extend_from_slice(&bytes),
                Ok(ProcessEvent::Stderr(_)) => {}
                Ok(ProcessEvent::Closed { code }) => {
                    let stdout = String::from_utf8_lossy(&self.stdout);
                    let token = stdout.trim();
                    return if code == Some(0) && !token.is_empty() {
                        ChallengeAnswer::Accepted(SessionToken::new(token))
                    } else {
                        debug!("bw login rejected the 2FA code (exit code {:?})", code);
                        ChallengeAnswer::Rejected
                    };
                }
                Err(_) => {
                    warn!("bw login did not finish within {:?} after 2FA code", limit);
                    self.handle.kill().await;
                    return ChallengeAnswer::TimedOut;
                }
            }
        }
    }

    async fn terminate(mut self) {
        self.handle.kill().await;
    }
}

impl Drop for PendingChallenge {
    fn drop(&mut self) {
        zeroize::Zeroize::zeroize(&mut self.stdout);
    }
}

/// Holds at most one pending challenge.
///
/// Replacing or clearing the occupant kills its process, so an abandoned
/// login can never linger in the background.
#[derive(Default)]
pub struct ChallengeSlot {
    pending: Option<PendingChallenge>,
}

impl ChallengeSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn replace(&mut self, challenge: PendingChallenge) {
        if let Some(previous) = self.pending.take() {
            info!("Discarding previous pending login (pid {:?})", previous.pid());
            previous.terminate().await;
        }
        self.pending = Some(challenge);
    }

    pub async fn clear(&mut self) {
        if let Some(previous) = self.pending.take() {
            debug!("Killing pending login (pid {:?})", previous.pid());
            previous.terminate().await;
        }
    }

    /// Remove the occupant without killing it; the caller takes ownership.
    pub fn take(&mut self) -> Option<PendingChallenge> {
        self.pending.take()
    }

    pub fn is_occupied(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        self.pending.as_ref().and_then(PendingChallenge::pid)
    }
}
