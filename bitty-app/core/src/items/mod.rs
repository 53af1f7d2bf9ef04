//! Vault items: the projection of CLI listings and local search.

mod index;
mod model;

pub use index::{ItemIndex, SEARCH_RESULT_LIMIT};
pub use model::{project_listing, ItemField, NewItem, VaultItem, LOGIN_ITEM_TYPE};
