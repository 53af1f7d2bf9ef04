mod config;

pub use config::{default_data_dir, load_settings, save_settings, Settings, SETTINGS_FILE_NAME};
