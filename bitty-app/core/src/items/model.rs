//! Vault item types and the projection from `bw list items` output.

use std::str::FromStr;

use data_encoding::BASE64;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Item type code the CLI uses for login entries.
pub const LOGIN_ITEM_TYPE: i64 = 1;

/// A login entry as the launcher sees it.
///
/// Missing values are empty strings, never absent. The camelCase field names
/// are also the on-disk cache format.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct VaultItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub folder_id: Option<String>,
}

impl std::fmt::Debug for VaultItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultItem")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("uri", &self.uri)
            .field("notes", &"[REDACTED]")
            .field("folder_id", &self.folder_id)
            .finish()
    }
}

/// A copyable field of a [`VaultItem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemField {
    Name,
    Username,
    Password,
    Uri,
    Notes,
}

impl FromStr for ItemField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "name" => Ok(Self::Name),
            "username" => Ok(Self::Username),
            "password" => Ok(Self::Password),
            "uri" | "url" => Ok(Self::Uri),
            "notes" => Ok(Self::Notes),
            other => Err(format!("Unknown field: {}", other)),
        }
    }
}

impl std::fmt::Display for ItemField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Name => write!(f, "name"),
            Self::Username => write!(f, "username"),
            Self::Password => write!(f, "password"),
            Self::Uri => write!(f, "uri"),
            Self::Notes => write!(f, "notes"),
        }
    }
}

impl VaultItem {
    pub fn field(&self, field: ItemField) -> &str {
        match field {
            ItemField::Name => &self.name,
            ItemField::Username => &self.username,
            ItemField::Password => &self.password,
            ItemField::Uri => &self.uri,
            ItemField::Notes => &self.notes,
        }
    }
}

// ============================================================================
// CLI listing projection
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRecord {
    #[serde(rename = "type", default)]
    kind: i64,
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    folder_id: Option<String>,
    #[serde(default)]
    login: Option<RawLogin>,
}

#[derive(Deserialize)]
struct RawLogin {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    uris: Option<Vec<RawUri>>,
}

#[derive(Deserialize)]
struct RawUri {
    #[serde(default)]
    uri: Option<String>,
}

/// Turn the JSON printed by `bw list items` into login [`VaultItem`]s.
///
/// Non-login records (secure notes, cards, identities) are skipped.
pub fn project_listing(raw: &str) -> Result<Vec<VaultItem>, serde_json::Error> {
    let records: Vec<RawRecord> = serde_json::from_str(raw)?;
    let total = records.len();

    let items: Vec<VaultItem> = records
        .into_iter()
        .filter(|r| r.kind == LOGIN_ITEM_TYPE)
        .map(|r| {
            let (username, password, uri) = match r.login {
                Some(login) => (
                    login.username.unwrap_or_default(),
                    login.password.unwrap_or_default(),
                    login
                        .uris
                        .and_then(|uris| uris.into_iter().next())
                        .and_then(|u| u.uri)
                        .unwrap_or_default(),
                ),
                None => Default::default(),
            };
            VaultItem {
                id: r.id,
                name: r.name.unwrap_or_default(),
                username,
                password,
                uri,
                notes: r.notes.unwrap_or_default(),
                folder_id: r.folder_id,
            }
        })
        .collect();

    debug!("Projected {} login items from {} records", items.len(), total);
    Ok(items)
}

// ============================================================================
// Item creation
// ============================================================================

/// A login entry to create through `bw create item`.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewItem {
    pub name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl NewItem {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Item name is required".into());
        }
        Ok(())
    }

    /// Base64 of the item JSON, the form `bw create item` takes.
    pub fn encode_for_cli(&self) -> Result<String, serde_json::Error> {
        let uris = match non_empty(&self.uri) {
            Some(uri) => json!([{ "uri": uri, "match": null }]),
            None => json!([]),
        };
        let payload = json!({
            "type": LOGIN_ITEM_TYPE,
            "name": self.name,
            "notes": non_empty(&self.notes),
            "login": {
                "username": non_empty(&self.username),
                "password": non_empty(&self.password),
                "uris": uris,
            },
        });
        let mut bytes = serde_json::to_vec(&payload)?;
        let encoded = BASE64.encode(&bytes);
        bytes.zeroize();
        Ok(encoded)
    }
}

impl std::fmt::Debug for NewItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewItem")
            .field("name", &self.name)
            .field("username", &self.username)
            .field("uri", &self.uri)
            .finish_non_exhaustive()
    }
}
