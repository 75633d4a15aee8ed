//! CLI module for Keyward
//!
//! Provides commands over one scoped secret service:
//! - `get`: Print the secret stored for an account
//! - `set`: Store a secret (argument or stdin), creating or updating it
//! - `delete`: Remove a secret; absent accounts are not an error
//! - `list`: Print every account stored under the service

use crate::config::{load_config, AppConfig};
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use clap::{Args, Parser, Subcommand, ValueEnum};
use keyward_core::{open_storage, ItemClass, ScopedSecretService};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;

/// Keyward credential store CLI
#[derive(Parser, Debug)]
#[command(name = "keyward")]
#[command(about = "Scoped secure credential store")]
#[command(version)]
pub struct Cli {
    /// Additional configuration file
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log output format (logs always go to stderr)
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(flatten)]
    pub scope: ScopeArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Log line format
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Service binding shared by every command
#[derive(Args, Debug, Clone, Default)]
pub struct ScopeArgs {
    /// Service namespace (defaults to `default_service` from config)
    #[arg(long, short = 's', global = true)]
    pub service: Option<String>,

    /// Item class (defaults to `default_item_class` from config)
    #[arg(long, short = 'c', global = true)]
    pub class: Option<ItemClass>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the secret for an account
    Get {
        account: String,
        /// Print the value base64-encoded
        #[arg(long)]
        base64: bool,
    },
    /// Store a secret for an account
    Set {
        account: String,
        /// Secret value; read from stdin when omitted
        value: Option<String>,
        /// Mark the item as eligible for cross-device sync
        #[arg(long)]
        synchronizable: bool,
        /// Treat the value as base64 and store the decoded bytes
        #[arg(long)]
        base64: bool,
    },
    /// Delete the secret for an account
    Delete { account: String },
    /// List every account under the service
    List,
}

/// Run the CLI command
pub async fn run(cli: Cli) -> Result<ExitCode> {
    let Some(command) = cli.command else {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        cmd.print_help()?;
        println!();
        return Ok(ExitCode::SUCCESS);
    };

    let config = load_config(cli.config.as_deref())?;
    let service = open_service(&config, &cli.scope)?;

    match command {
        Commands::Get { account, base64 } => {
            let Some(secret) = service.get(&account).await? else {
                debug!(account = %account, "No secret stored");
                return Ok(ExitCode::FAILURE);
            };
            let rendered = if base64 {
                BASE64.encode(secret.expose())
            } else {
                secret
                    .expose_str()
                    .context("Secret is not valid UTF-8; retry with --base64")?
                    .to_string()
            };
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{}", rendered)?;
        }
        Commands::Set {
            account,
            value,
            synchronizable,
            base64,
        } => {
            let raw = match value {
                Some(value) => value.into_bytes(),
                None => read_stdin()?,
            };
            let bytes = decode_value(raw, base64)?;
            service.set(&bytes, &account, synchronizable).await?;
        }
        Commands::Delete { account } => {
            service.delete(&account).await?;
        }
        Commands::List => {
            let mut stdout = std::io::stdout().lock();
            for account in service.accounts().await? {
                writeln!(stdout, "{}", account)?;
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Build the scoped service from config, with command-line overrides
fn open_service(config: &AppConfig, scope: &ScopeArgs) -> Result<ScopedSecretService> {
    let storage = open_storage(&config.storage).context("Failed to open secret storage")?;
    let service = scope
        .service
        .clone()
        .unwrap_or_else(|| config.default_service.clone());
    let item_class = scope.class.unwrap_or(config.default_item_class);

    Ok(ScopedSecretService::with_item_class(
        storage, service, item_class,
    ))
}

fn read_stdin() -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    std::io::stdin()
        .read_to_end(&mut buf)
        .context("Failed to read secret from stdin")?;
    Ok(strip_line_ending(buf))
}

/// Drop one trailing newline left by `echo` or a terminal
fn strip_line_ending(mut buf: Vec<u8>) -> Vec<u8> {
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    buf
}

fn decode_value(raw: Vec<u8>, base64: bool) -> Result<Vec<u8>> {
    if !base64 {
        return Ok(raw);
    }
    BASE64
        .decode(raw.trim_ascii())
        .context("Value is not valid base64")
}
