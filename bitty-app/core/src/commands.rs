use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::error::{BittyError, Result};
use crate::items::{ItemField, NewItem, VaultItem};
use crate::session::{AuthState, LoginOutcome, PasswordOptions, SessionController, ToolStatus};
use crate::state::AppState;
use crate::storage::Settings;

/// Envelope every command answers with. Errors never escape as panics; they
/// become `success: false` with a user-facing message and, where known, a
/// stable `errorCode`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
}

impl<T> CommandResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_code: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            error_code: None,
        }
    }

    pub fn from_error(err: &BittyError) -> Self {
        Self {
            error_code: Some(err.code()),
            ..Self::failure(err.to_string())
        }
    }
}

fn respond<T>(action: &str, result: Result<T>) -> CommandResponse<T> {
    match result {
        Ok(data) => CommandResponse::ok(data),
        Err(e) => {
            warn!("{} failed: {}", action, e);
            CommandResponse::from_error(&e)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: ToolStatus,
    pub auth_state: AuthState,
    pub unlocked: bool,
    pub item_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub needs_code: bool,
}

/// Search hit without the secret fields.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSummary {
    pub id: String,
    pub name: String,
    pub username: String,
    pub uri: String,
}

impl From<&VaultItem> for ItemSummary {
    fn from(item: &VaultItem) -> Self {
        Self {
            id: item.id.clone(),
            name: item.name.clone(),
            username: item.username.clone(),
            uri: item.uri.clone(),
        }
    }
}

/// Load the listing into the index and key the cache with `password`.
///
/// Cache failures are logged; the vault is usable without a cache.
async fn load_unlocked_vault(session: &mut SessionController, password: &str) -> Result<usize> {
    let count = session.list_items().await?.len();
    info!("Items loaded ({})", count);
    if let Err(e) = session.warm_cache_key(password) {
        warn!("Could not prepare the encrypted cache: {}", e);
    }
    Ok(count)
}

// ============================================================================
// Session commands
// ============================================================================

pub async fn get_status(state: &AppState) -> CommandResponse<StatusResponse> {
    let result: Result<StatusResponse> = async {
        let mut session = state.session.lock().await;
        let status = session.get_status().await?;
        Ok(StatusResponse {
            status,
            auth_state: session.auth_state(),
            unlocked: session.is_unlocked(),
            item_count: session.index().len(),
        })
    }
    .await;
    respond("get_status", result)
}

/// Log in with email and master password.
///
/// When the server asks for a second factor the response carries
/// `needsCode: true` and the code goes to [`submit_code`].
pub async fn login(
    state: &Arc<AppState>,
    email: &str,
    password: &str,
) -> CommandResponse<LoginResponse> {
    let result: Result<LoginResponse> = async {
        info!("Logging in");
        let mut session = state.session.lock().await;
        if session.login(email, password).await? == LoginOutcome::ChallengeRequired {
            info!("Verification code required");
            return Ok(LoginResponse { needs_code: true });
        }
        load_unlocked_vault(&mut session, password).await?;
        drop(session);

        state.trigger_background_sync();
        Ok(LoginResponse { needs_code: false })
    }
    .await;
    respond("login", result)
}

/// Answer the pending verification challenge.
///
/// The encrypted cache is not keyed here; follow up with [`warm_cache`].
pub async fn submit_code(state: &Arc<AppState>, code: &str) -> CommandResponse<usize> {
    let result: Result<usize> = async {
        info!("Submitting verification code");
        let mut session = state.session.lock().await;
        session.submit_challenge(code).await?;
        let count = session.list_items().await?.len();
        info!("Items loaded ({})", count);
        drop(session);

        state.trigger_background_sync();
        Ok(count)
    }
    .await;
    respond("submit_code", result)
}

pub async fn unlock(state: &Arc<AppState>, password: &str) -> CommandResponse<usize> {
    let result: Result<usize> = async {
        info!("Unlocking vault");
        let mut session = state.session.lock().await;
        session.unlock(password).await?;
        let count = load_unlocked_vault(&mut session, password).await?;
        drop(session);

        state.trigger_background_sync();
        Ok(count)
    }
    .await;
    respond("unlock", result)
}

pub async fn lock(state: &AppState) -> CommandResponse<()> {
    let result: Result<()> = async {
        info!("Locking vault");
        state.session.lock().await.lock().await?;
        Ok(())
    }
    .await;
    respond("lock", result)
}

/// Log out and forget everything stored for the account, cache included.
pub async fn logout(state: &AppState) -> CommandResponse<()> {
    info!("Logging out");
    state.session.lock().await.logout().await;
    CommandResponse::ok(())
}

pub async fn sync_vault(state: &AppState) -> CommandResponse<usize> {
    let result: Result<usize> = async { Ok(state.session.lock().await.sync().await?) }.await;
    respond("sync_vault", result)
}

/// Sync in the background; `false` if a sync is already running.
pub fn trigger_background_sync(state: &Arc<AppState>) -> CommandResponse<bool> {
    CommandResponse::ok(state.trigger_background_sync())
}

/// Fill the index from the encrypted cache so search works before the
/// vault is unlocked. `false` if the password does not match the cache.
pub async fn restore_cached(state: &AppState, password: &str) -> CommandResponse<bool> {
    let restored = state.session.lock().await.restore_cached(password);
    CommandResponse::ok(restored)
}

pub async fn warm_cache(state: &AppState, password: &str) -> CommandResponse<()> {
    let result: Result<()> = async {
        state.session.lock().await.warm_cache_key(password)?;
        Ok(())
    }
    .await;
    respond("warm_cache", result)
}

// ============================================================================
// Item commands
// ============================================================================

pub async fn search(state: &AppState, query: &str) -> CommandResponse<Vec<ItemSummary>> {
    let session = state.session.lock().await;
    let hits: Vec<ItemSummary> = session
        .index()
        .search(query)
        .into_iter()
        .map(ItemSummary::from)
        .collect();
    debug!("Search matched {} items", hits.len());
    CommandResponse::ok(hits)
}

pub async fn get_item(state: &AppState, id: &str) -> CommandResponse<VaultItem> {
    let session = state.session.lock().await;
    let result = session
        .index()
        .get_by_id(id)
        .cloned()
        .ok_or(BittyError::ItemNotFound);
    respond("get_item", result)
}

/// Put one field of an item on the clipboard, cleared again after the
/// configured delay. Nothing is written if the item or value is missing.
pub async fn copy_field(state: &AppState, id: &str, field: &str) -> CommandResponse<()> {
    let result: Result<()> = async {
        let field: ItemField = field.parse().map_err(BittyError::InvalidInput)?;
        let value = {
            let session = state.session.lock().await;
            let item = session
                .index()
                .get_by_id(id)
                .ok_or(BittyError::ItemNotFound)?;
            let value = item.field(field);
            if value.is_empty() {
                return Err(BittyError::InvalidInput(format!("The {} is empty", field)));
            }
            Zeroizing::new(value.to_string())
        };

        let delay = state.settings.read().await.clipboard_clear_delay();
        state
            .clipboard
            .copy_secret(&value, delay)
            .map_err(BittyError::Clipboard)?;
        info!("Copied {} to clipboard, clearing in {:?}", field, delay);
        Ok(())
    }
    .await;
    respond("copy_field", result)
}

/// Create a login item and sync. Returns the new item count.
pub async fn create_item(state: &AppState, item: NewItem) -> CommandResponse<usize> {
    let result: Result<usize> = async {
        info!("Creating item {}", item.name);
        Ok(state.session.lock().await.create_item(&item).await?)
    }
    .await;
    respond("create_item", result)
}

/// Generate a password, falling back to the saved defaults.
pub async fn generate_password(
    state: &AppState,
    options: Option<PasswordOptions>,
) -> CommandResponse<String> {
    let options = match options {
        Some(options) => options,
        None => state.settings.read().await.password_options(),
    };
    let result: Result<String> = async {
        Ok(state
            .session
            .lock()
            .await
            .generate_password(&options)
            .await?)
    }
    .await;
    respond("generate_password", result)
}

// ============================================================================
// Settings commands
// ============================================================================

pub async fn get_settings(state: &AppState) -> CommandResponse<Settings> {
    CommandResponse::ok(state.settings.read().await.clone())
}

pub async fn save_settings(state: &AppState, settings: Settings) -> CommandResponse<Settings> {
    respond("save_settings", state.update_settings(settings).await)
}
