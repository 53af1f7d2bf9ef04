pub mod guard;

pub use guard::{ClipboardBackend, ClipboardGuard, SystemClipboard};
