use serde::{Deserialize, Serialize};

pub const DEFAULT_PASSWORD_LENGTH: u32 = 20;
pub const MIN_PASSWORD_LENGTH: u32 = 5;
pub const MAX_PASSWORD_LENGTH: u32 = 128;

/// Options for `bw generate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PasswordOptions {
    pub length: u32,
    pub uppercase: bool,
    pub lowercase: bool,
    pub numbers: bool,
    pub special: bool,
}

impl Default for PasswordOptions {
    fn default() -> Self {
        Self {
            length: DEFAULT_PASSWORD_LENGTH,
            uppercase: true,
            lowercase: true,
            numbers: true,
            special: true,
        }
    }
}

impl PasswordOptions {
    pub fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec!["generate".to_string()];
        if self.uppercase {
            args.push("-u".into());
        }
        if self.lowercase {
            args.push("-l".into());
        }
        if self.numbers {
            args.push("-n".into());
        }
        if self.special {
            args.push("-s".into());
        }
        args.push("--length".into());
        args.push(
            self.length
                .clamp(MIN_PASSWORD_LENGTH, MAX_PASSWORD_LENGTH)
                .to_string(),
        );
        args
    }
}
