//! Core of the bitty quick launcher.
//!
//! Drives the Bitwarden CLI (`bw`) for authentication and vault access,
//! keeps an encrypted local copy of login items for fast search, and puts
//! secrets on the clipboard for a limited time.

pub mod cache;
pub mod clipboard;
pub mod commands;
pub mod error;
pub mod items;
pub mod process;
pub mod session;
pub mod state;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_support;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bitty_app_lib=info,bitty=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
