use std::path::PathBuf;

use serde::Serialize;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use super::auth::{AuthState, SessionToken, ToolAuthStatus, ToolStatus};
use super::challenge::{
    default_classifier, ChallengeAnswer, ChallengeClassifier, ChallengeSlot, LoginInput,
    LoginWatcher, LoginStep, PendingChallenge,
};
use super::error::{SessionError, SessionResult};
use super::generator::PasswordOptions;
use crate::cache::CacheStore;
use crate::items::{project_listing, ItemIndex, NewItem, VaultItem};
use crate::process::{EnvOverrides, Invoker, ProcessError, Timeouts, PASSWORD_ENV, SESSION_ENV};

/// Substrings of `bw status` errors that mean the CLI's local data is broken
/// and only a logout will recover it.
const CORRUPTED_STATE_MARKERS: &[&str] = &["not the expected type", "key", "corrupt"];

fn is_corrupted_state(message: &str) -> bool {
    let message = message.to_lowercase();
    CORRUPTED_STATE_MARKERS.iter().any(|m| message.contains(m))
}

fn parse_listing(output: &str) -> SessionResult<Vec<VaultItem>> {
    project_listing(output).map_err(|e| SessionError::InvalidOutput(format!("list items: {}", e)))
}

/// A `sync` plus `list items` detached from the controller, so the session
/// stays available while the CLI talks to the server.
pub struct SyncJob {
    invoker: Invoker,
    env: EnvOverrides,
    token: SessionToken,
}

impl SyncJob {
    pub async fn run(self) -> SessionResult<SyncedItems> {
        self.invoker.run_once(&["sync"], &self.env).await?;
        let output = self.invoker.run_once(&["list", "items"], &self.env).await?;
        let items = parse_listing(&output)?;
        Ok(SyncedItems {
            token: self.token,
            items,
        })
    }
}

/// Listing produced by a [`SyncJob`], tied to the session that ran it.
pub struct SyncedItems {
    token: SessionToken,
    items: Vec<VaultItem>,
}

/// How a login attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LoginOutcome {
    Unlocked,
    ChallengeRequired,
}

/// Owns the single vault session.
///
/// Invariants:
/// - a session token is held iff the state is `Unlocked`
/// - a pending challenge is held iff the state is `AwaitingChallenge`
/// - the cache key is dropped on every transition to `Locked` or `LoggedOut`
pub struct SessionController {
    invoker: Invoker,
    timeouts: Timeouts,
    classifier: ChallengeClassifier,
    state: AuthState,
    token: Option<SessionToken>,
    challenge: ChallengeSlot,
    account_known: bool,
    user_email: Option<String>,
    index: ItemIndex,
    index_is_live: bool,
    cache: CacheStore,
}

impl SessionController {
    pub fn new(binary: impl Into<PathBuf>, data_dir: impl Into<PathBuf>, timeouts: Timeouts) -> Self {
        Self {
            invoker: Invoker::new(binary, timeouts.one_shot),
            timeouts,
            classifier: default_classifier(),
            state: AuthState::LoggedOut,
            token: None,
            challenge: ChallengeSlot::new(),
            account_known: false,
            user_email: None,
            index: ItemIndex::new(),
            index_is_live: false,
            cache: CacheStore::new(data_dir),
        }
    }

    /// Replace the 2FA prompt classifier.
    pub fn with_classifier(mut self, classifier: ChallengeClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Point at a different `bw` binary, e.g. after a settings change.
    pub fn set_binary(&mut self, binary: impl Into<PathBuf>) {
        self.invoker = Invoker::new(binary, self.timeouts.one_shot);
    }

    pub fn auth_state(&self) -> AuthState {
        self.state
    }

    pub fn is_unlocked(&self) -> bool {
        self.state == AuthState::Unlocked
    }

    pub fn user_email(&self) -> Option<&str> {
        self.user_email.as_deref()
    }

    pub fn index(&self) -> &ItemIndex {
        &self.index
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn pending_challenge_pid(&self) -> Option<u32> {
        self.challenge.pid()
    }

    fn session_env(&self) -> EnvOverrides {
        match &self.token {
            Some(token) => EnvOverrides::new().with(SESSION_ENV, token.expose()),
            None => EnvOverrides::new(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, ProcessError> {
        self.invoker.run_once(args, &self.session_env()).await
    }

    fn require_unlocked(&self) -> SessionResult<()> {
        if self.is_unlocked() {
            Ok(())
        } else {
            Err(SessionError::NotUnlocked)
        }
    }

    fn set_unlocked(&mut self, token: SessionToken) {
        self.token = Some(token);
        self.state = AuthState::Unlocked;
        self.account_known = true;
        // Whatever is in the index now came from the cache; fetch live data next
        self.index_is_live = false;
    }

    /// Drop the token, the item index and the cache key.
    fn clear_session(&mut self) {
        self.token = None;
        self.index.clear();
        self.index_is_live = false;
        self.cache.clear_key();
    }

    // ========================================================================
    // Status
    // ========================================================================

    /// Ask the CLI for its state and bring the local state in line with it.
    ///
    /// If the CLI reports corrupted local data, the session is logged out to
    /// reset it and `unauthenticated` is reported.
    pub async fn get_status(&mut self) -> SessionResult<ToolStatus> {
        match self.run(&["status"]).await {
            Ok(output) => {
                let status: ToolStatus = serde_json::from_str(&output)
                    .map_err(|e| SessionError::InvalidOutput(format!("status: {}", e)))?;
                self.observe_status(&status);
                Ok(status)
            }
            Err(ProcessError::Failure { stderr, .. }) if is_corrupted_state(&stderr) => {
                warn!(
                    "bw status reported corrupted state, logging out to reset: {}",
                    SessionError::CorruptedState(stderr)
                );
                self.logout().await;
                Ok(ToolStatus::unauthenticated())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn observe_status(&mut self, status: &ToolStatus) {
        if status.user_email.is_some() {
            self.user_email = status.user_email.clone();
        }

        match status.status {
            ToolAuthStatus::Unauthenticated => {
                self.account_known = false;
                self.user_email = None;
                match self.state {
                    // The CLI only learns about the account once login finishes
                    AuthState::LoggedOut | AuthState::AwaitingChallenge => {}
                    AuthState::Locked | AuthState::Unlocked => {
                        info!("bw reports no account, dropping local session");
                        self.clear_session();
                        self.state = AuthState::LoggedOut;
                    }
                }
            }
            ToolAuthStatus::Locked => {
                self.account_known = true;
                match self.state {
                    AuthState::Unlocked => {
                        info!("bw reports the vault locked, dropping stale session");
                        self.clear_session();
                        self.state = AuthState::Locked;
                    }
                    AuthState::LoggedOut => self.state = AuthState::Locked,
                    AuthState::Locked | AuthState::AwaitingChallenge => {}
                }
            }
            ToolAuthStatus::Unlocked => {
                self.account_known = true;
                // Without a token of our own the vault is still locked to us
                if self.state == AuthState::LoggedOut {
                    self.state = AuthState::Locked;
                }
            }
        }
    }

    // ========================================================================
    // Login / 2FA
    // ========================================================================

    /// Log in with email and master password.
    ///
    /// Returns `ChallengeRequired` when the CLI asks for a two-step code, or
    /// when it stays silent past the login deadline. In both cases the login
    /// process is kept running until [`SessionController::submit_challenge`].
    pub async fn login(&mut self, email: &str, password: &str) -> SessionResult<LoginOutcome> {
        let email = email.trim();
        if email.is_empty() {
            return Err(SessionError::Validation("Email is required".into()));
        }
        if email.starts_with('-') {
            return Err(SessionError::Validation("Invalid email address".into()));
        }
        if password.is_empty() {
            return Err(SessionError::Validation("Master password is required".into()));
        }
        if self.is_unlocked() {
            return Err(SessionError::AlreadyUnlocked);
        }

        // Last call wins: an earlier login still waiting for a code is killed
        self.challenge.clear().await;
        if self.state == AuthState::AwaitingChallenge {
            self.state = AuthState::LoggedOut;
        }

        info!("Logging in to bw");
        let env = EnvOverrides::new().with(PASSWORD_ENV, password);
        let mut handle = self.invoker.run_interactive(
            &["login", email, "--passwordenv", PASSWORD_ENV, "--raw"],
            &env,
        )?;
        drop(env);

        let mut watcher = LoginWatcher::new(self.classifier.clone());
        let deadline = Instant::now() + self.timeouts.login_deadline;

        loop {
            let input = match timeout_at(deadline, handle.next_event()).await {
                Ok(event) => LoginInput::Event(event),
                Err(_) => LoginInput::DeadlineElapsed,
            };

            match watcher.advance(input) {
                LoginStep::Pending => continue,
                LoginStep::ChallengeDetected => {
                    info!("bw login is asking for a two-step code");
                    self.challenge.replace(PendingChallenge::new(handle)).await;
                    self.state = AuthState::AwaitingChallenge;
                    return Ok(LoginOutcome::ChallengeRequired);
                }
                LoginStep::DeadlineElapsed => {
                    // No positive signal here; a slow login without 2FA lands
                    // in this branch too and completes on submit.
                    warn!(
                        "bw login silent for {:?}, assuming a two-step code is required",
                        self.timeouts.login_deadline
                    );
                    self.challenge.replace(PendingChallenge::new(handle)).await;
                    self.state = AuthState::AwaitingChallenge;
                    return Ok(LoginOutcome::ChallengeRequired);
                }
                LoginStep::Authenticated(token) => {
                    info!("bw login succeeded");
                    self.user_email = Some(email.to_string());
                    self.set_unlocked(token);
                    return Ok(LoginOutcome::Unlocked);
                }
                LoginStep::Failed(message) => {
                    info!("bw login failed");
                    return Err(SessionError::LoginFailed(message));
                }
            }
        }
    }

    /// Answer the pending login's two-step prompt.
    ///
    /// On any failure the pending login is gone and `login` must be called
    /// again.
    pub async fn submit_challenge(&mut self, code: &str) -> SessionResult<()> {
        let code = code.trim();
        if code.is_empty() {
            return Err(SessionError::Validation("Verification code is required".into()));
        }

        let Some(pending) = self.challenge.take() else {
            return Err(SessionError::ChallengeAbsent);
        };
        self.state = AuthState::LoggedOut;

        debug!("Submitting two-step code to pending login");
        match pending.answer(code, self.timeouts.challenge_submit).await {
            ChallengeAnswer::Accepted(token) => {
                info!("Two-step login succeeded");
                self.set_unlocked(token);
                Ok(())
            }
            ChallengeAnswer::Rejected => Err(SessionError::ChallengeInvalid),
            ChallengeAnswer::TimedOut => Err(SessionError::ChallengeTimedOut),
        }
    }

    // ========================================================================
    // Unlock / lock / logout
    // ========================================================================

    pub async fn unlock(&mut self, password: &str) -> SessionResult<()> {
        if password.is_empty() {
            return Err(SessionError::Validation("Master password is required".into()));
        }
        match self.state {
            AuthState::AwaitingChallenge => {
                return Err(SessionError::Validation(
                    "A login is waiting for a verification code".into(),
                ))
            }
            AuthState::LoggedOut if !self.account_known => {
                // The CLI may have an account we have not seen yet
                self.get_status().await?;
                if !self.account_known {
                    return Err(SessionError::NoAccount);
                }
            }
            _ => {}
        }

        info!("Unlocking vault");
        let env = EnvOverrides::new().with(PASSWORD_ENV, password);
        let output = self
            .invoker
            .run_once(&["unlock", "--passwordenv", PASSWORD_ENV, "--raw"], &env)
            .await?;

        if output.is_empty() {
            return Err(SessionError::InvalidOutput(
                "unlock returned no session key".into(),
            ));
        }
        self.set_unlocked(SessionToken::new(output));
        info!("Vault unlocked");
        Ok(())
    }

    /// Lock the vault. Local secrets are dropped even if `bw lock` fails.
    pub async fn lock(&mut self) -> SessionResult<()> {
        let result = self.run(&["lock"]).await;

        self.challenge.clear().await;
        self.clear_session();
        self.state = AuthState::Locked;
        info!("Vault locked");

        if let Err(e) = &result {
            warn!("bw lock failed: {}", e);
        }
        result.map(|_| ()).map_err(Into::into)
    }

    /// Log out and remove every local trace of the account. Never fails.
    pub async fn logout(&mut self) {
        if let Err(e) = self.run(&["logout"]).await {
            debug!("bw logout failed (ignored): {}", e);
        }

        self.challenge.clear().await;
        self.clear_session();
        self.cache.clear();
        self.cache.clear_password_hash();
        self.account_known = false;
        self.user_email = None;
        self.state = AuthState::LoggedOut;
        info!("Logged out");
    }

    // ========================================================================
    // Items
    // ========================================================================

    /// Pull from the server, then refresh the item listing.
    pub async fn sync(&mut self) -> SessionResult<usize> {
        let synced = self.begin_sync()?.run().await?;
        self.finish_sync(synced);
        info!("Vault synced");
        Ok(self.index.len())
    }

    /// Snapshot what a sync needs so it can run without the controller.
    ///
    /// Run the job, then hand its result to [`SessionController::finish_sync`].
    pub fn begin_sync(&self) -> SessionResult<SyncJob> {
        self.require_unlocked()?;
        let token = self.token.clone().ok_or(SessionError::NotUnlocked)?;
        Ok(SyncJob {
            invoker: self.invoker.clone(),
            env: self.session_env(),
            token,
        })
    }

    /// Install the items of a finished sync.
    ///
    /// Returns `false`, dropping the items, if the session was locked or
    /// replaced while the sync ran.
    pub fn finish_sync(&mut self, synced: SyncedItems) -> bool {
        if !self.is_unlocked() || self.token.as_ref() != Some(&synced.token) {
            debug!("Session changed during sync, discarding {} items", synced.items.len());
            return false;
        }
        self.install_items(synced.items);
        true
    }

    /// Login items of the unlocked vault.
    ///
    /// The CLI is only asked once; later calls reuse the index until `sync`
    /// or `create_item` invalidates it.
    pub async fn list_items(&mut self) -> SessionResult<&[VaultItem]> {
        self.require_unlocked()?;
        if !self.index_is_live {
            self.refresh_index().await?;
        }
        Ok(self.index.items())
    }

    async fn refresh_index(&mut self) -> SessionResult<()> {
        let output = self.run(&["list", "items"]).await?;
        self.install_items(parse_listing(&output)?);
        Ok(())
    }

    fn install_items(&mut self, items: Vec<VaultItem>) {
        info!("Listed {} login items", items.len());
        if let Err(e) = self.cache.save(&items) {
            warn!("Failed to update the encrypted cache: {}", e);
        }
        self.index.replace(items);
        self.index_is_live = true;
    }

    /// Load previously cached items so they can be searched before a live
    /// listing is available. Does not change the auth state.
    ///
    /// The password must match the verifier when one exists. Caches written
    /// before verifiers existed are restored without the check; an encrypted
    /// one still only opens with the right password.
    pub fn restore_cached(&mut self, password: &str) -> bool {
        if self.index_is_live {
            debug!("Live items already loaded, not restoring from cache");
            return false;
        }
        if self.cache.has_password_hash() && !self.cache.verify_password(password) {
            debug!("Password does not match the cache verifier");
            return false;
        }
        let items = self.cache.load(password);
        if items.is_empty() {
            return false;
        }
        info!("Restored {} items from the encrypted cache", items.len());
        self.index.replace(items);
        true
    }

    /// Derive the cache key and store the password verifier.
    ///
    /// Items already listed are written to the cache right away.
    pub fn warm_cache_key(&mut self, password: &str) -> SessionResult<()> {
        self.require_unlocked()?;
        self.cache.set_key(password)?;
        self.cache.save_password_hash(password)?;
        if self.index_is_live {
            self.cache.save(self.index.items())?;
        }
        Ok(())
    }

    /// Create a login item, then sync.
    ///
    /// The base64 payload goes to `bw create item` on stdin rather than as an
    /// argument, which keeps it out of the process list.
    pub async fn create_item(&mut self, item: &NewItem) -> SessionResult<usize> {
        item.validate().map_err(SessionError::Validation)?;
        self.require_unlocked()?;

        let encoded = item.encode_for_cli()?;
        self.invoker
            .run_once_with_input(&["create", "item"], &self.session_env(), encoded.as_bytes())
            .await?;
        info!("Created item");

        self.index_is_live = false;
        self.sync().await
    }

    pub async fn generate_password(&self, options: &PasswordOptions) -> SessionResult<String> {
        let args = options.to_cli_args();
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let password = self.run(&args).await?;
        if password.is_empty() {
            return Err(SessionError::InvalidOutput("generate returned nothing".into()));
        }
        Ok(password)
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("binary", &self.invoker.binary())
            .field("state", &self.state)
            .field("has_token", &self.token.is_some())
            .field("pending_challenge", &self.challenge.is_occupied())
            .field("items", &self.index.len())
            .finish()
    }
}
