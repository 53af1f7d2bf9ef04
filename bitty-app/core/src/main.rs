//! Line-oriented shell for the bitty core.
//!
//! Reads one command per line from stdin and prints each command's JSON
//! response. Passwords are read from the line following the command.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bitty_app_lib::clipboard::ClipboardGuard;
use bitty_app_lib::commands::{self, CommandResponse};
use bitty_app_lib::items::NewItem;
use bitty_app_lib::process::Timeouts;
use bitty_app_lib::session::PasswordOptions;
use bitty_app_lib::state::AppState;
use bitty_app_lib::storage::{default_data_dir, load_settings};
use clap::Parser;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tracing::{debug, info};
use zeroize::Zeroizing;

const AUTO_LOCK_CHECK_INTERVAL: Duration = Duration::from_secs(15);

const HELP: &str = "\
commands:
  status                     show CLI and session state
  login <email>              log in (password on the next line)
  code <code>                answer a verification challenge
  unlock                     unlock (password on the next line)
  lock | logout | sync
  search [query]             search login items
  show <id>                  show one item
  copy <id> <field>          copy name/username/password/uri/notes
  create <name> [user] [uri] create a login (password on the next line, may be empty)
  generate [length]          generate a password
  restore                    load cached items (password on the next line)
  settings                   show settings
  quit";

/// Keyboard-driven front end for the Bitwarden CLI
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Directory for settings and the encrypted item cache
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Path to the bw executable (overrides the saved setting)
    #[arg(long)]
    bw_path: Option<String>,
}

type InputLines = Lines<BufReader<Stdin>>;

/// Master password kept from a `login` that stopped for a two-step code, so
/// the cache can be keyed once the code is accepted. Only the very next
/// command may use it.
#[derive(Default)]
struct HeldPassword(Option<Zeroizing<String>>);

impl HeldPassword {
    fn hold(&mut self, password: Zeroizing<String>) {
        self.0 = Some(password);
    }

    /// Drop the password unless `command` is the one that consumes it.
    fn observe(&mut self, command: &str) {
        if command != "code" {
            self.0 = None;
        }
    }

    fn take(&mut self) -> Option<Zeroizing<String>> {
        self.0.take()
    }
}

async fn read_secret(lines: &mut InputLines, prompt: &str) -> Result<Zeroizing<String>> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(prompt.as_bytes()).await?;
    stderr.flush().await?;
    let line = lines
        .next_line()
        .await?
        .context("stdin closed while waiting for input")?;
    Ok(Zeroizing::new(line))
}

fn print_response<T: Serialize>(response: &CommandResponse<T>) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(response)?);
    Ok(())
}

fn usage(message: &str) -> Result<()> {
    print_response(&CommandResponse::<()>::failure(message))
}

#[tokio::main]
async fn main() -> Result<()> {
    bitty_app_lib::init_tracing();
    let args = Args::parse();

    let data_dir = args.data_dir.unwrap_or_else(default_data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

    let state = match args.bw_path {
        Some(bw_path) => {
            let mut settings = load_settings(&data_dir);
            settings.bw_path = bw_path;
            AppState::new(
                data_dir,
                settings,
                ClipboardGuard::system(),
                Timeouts::default(),
            )
        }
        None => AppState::load(data_dir),
    };
    let state = Arc::new(state);

    let auto_lock = {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(AUTO_LOCK_CHECK_INTERVAL);
            loop {
                ticker.tick().await;
                if state.enforce_auto_lock().await {
                    info!("Vault auto-locked");
                }
            }
        })
    };

    info!("Ready, type `help` for commands");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut login_password = HeldPassword::default();

    while let Some(line) = lines.next_line().await? {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            continue;
        };
        let rest: Vec<&str> = words.collect();
        debug!("Command: {}", command);
        state.touch();
        login_password.observe(command);

        match (command, rest.as_slice()) {
            ("help", _) => println!("{}", HELP),
            ("quit" | "exit", _) => break,
            ("status", _) => print_response(&commands::get_status(&state).await)?,
            ("login", [email]) => {
                let password = read_secret(&mut lines, "master password: ").await?;
                let response = commands::login(&state, email, &password).await;
                if response.data.as_ref().is_some_and(|d| d.needs_code) {
                    login_password.hold(password);
                }
                print_response(&response)?;
            }
            ("code", [code]) => {
                let password = login_password.take();
                let response = commands::submit_code(&state, code).await;
                if response.success {
                    if let Some(password) = password {
                        let warmed = commands::warm_cache(&state, &password).await;
                        debug!("Cache warmed after two-step login: {}", warmed.success);
                    }
                }
                print_response(&response)?;
            }
            ("unlock", []) => {
                let password = read_secret(&mut lines, "master password: ").await?;
                print_response(&commands::unlock(&state, &password).await)?;
            }
            ("lock", []) => print_response(&commands::lock(&state).await)?,
            ("logout", []) => print_response(&commands::logout(&state).await)?,
            ("sync", []) => print_response(&commands::sync_vault(&state).await)?,
            ("search", query) => {
                print_response(&commands::search(&state, &query.join(" ")).await)?
            }
            ("show", [id]) => print_response(&commands::get_item(&state, id).await)?,
            ("copy", [id, field]) => {
                print_response(&commands::copy_field(&state, id, field).await)?
            }
            ("create", [name, more @ ..]) if more.len() <= 2 => {
                let password = read_secret(&mut lines, "item password (empty for none): ").await?;
                let item = NewItem {
                    name: name.to_string(),
                    username: more.first().map(|s| s.to_string()),
                    password: Some(password.to_string()).filter(|p| !p.is_empty()),
                    uri: more.get(1).map(|s| s.to_string()),
                    notes: None,
                };
                print_response(&commands::create_item(&state, item).await)?;
            }
            ("generate", args) => {
                let options = match args {
                    [] => None,
                    [length] => match length.parse() {
                        Ok(length) => Some(PasswordOptions {
                            length,
                            ..state.settings.read().await.password_options()
                        }),
                        Err(_) => {
                            usage("length must be a number")?;
                            continue;
                        }
                    },
                    _ => {
                        usage("usage: generate [length]")?;
                        continue;
                    }
                };
                print_response(&commands::generate_password(&state, options).await)?;
            }
            ("restore", []) => {
                let password = read_secret(&mut lines, "master password: ").await?;
                print_response(&commands::restore_cached(&state, &password).await)?;
            }
            ("settings", []) => print_response(&commands::get_settings(&state).await)?,
            _ => usage(&format!("unknown command or wrong arguments: {}", command))?,
        }
    }

    auto_lock.abort();
    state.clipboard.clear_now();
    info!("Bye");
    Ok(())
}
