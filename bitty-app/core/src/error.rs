use thiserror::Error;

use crate::session::SessionError;

#[derive(Error, Debug)]
pub enum BittyError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Clipboard error: {0}")]
    Clipboard(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Item not found")]
    ItemNotFound,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BittyError {
    /// Stable tag for the failure, reported next to the message.
    pub fn code(&self) -> &'static str {
        match self {
            BittyError::Session(e) => e.code(),
            BittyError::Clipboard(_) => "CLIPBOARD_ERROR",
            BittyError::InvalidInput(_) => "INVALID_INPUT",
            BittyError::ItemNotFound => "ITEM_NOT_FOUND",
            BittyError::Serialization(_) => "SERIALIZATION_ERROR",
            BittyError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, BittyError>;
