use std::io;

use anyhow::{Context, Result};
use clap::Parser;

use mailgrab::{run_session, Account, FetchConfig, ImapConnection, ImapSecurity};

/// Fetch the oldest unread message from an IMAP inbox and print it
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// IMAP username
    username: String,

    /// IMAP password
    password: String,

    /// IMAP server hostname
    server: String,

    /// Path to config file
    #[clap(short, long, default_value = "~/.config/mailgrab/config.json")]
    config: String,

    /// IMAP server port
    #[clap(long)]
    port: Option<u16>,

    /// IMAP security (None, StartTLS, SSL)
    #[clap(long)]
    security: Option<ImapSecurity>,

    /// Folder to search
    #[clap(long)]
    folder: Option<String>,

    /// Maximum number of messages to process
    #[clap(long)]
    max_messages: Option<usize>,

    /// Directory attachments are written to
    #[clap(long)]
    attachment_dir: Option<String>,

    /// Leave fetched messages unread
    #[clap(long)]
    peek: bool,

    /// Enable debug logging
    #[clap(short, long)]
    debug: bool,
}

impl Args {
    fn apply_overrides(&self, config: &mut FetchConfig) {
        if let Some(port) = self.port {
            config.imap_port = port;
        }
        if let Some(security) = self.security {
            config.imap_security = security;
        }
        if let Some(folder) = &self.folder {
            config.folder = folder.clone();
        }
        if let Some(max_messages) = self.max_messages {
            config.max_messages = max_messages;
        }
        if let Some(dir) = &self.attachment_dir {
            config.attachment_dir = dir.clone();
        }
        if self.peek {
            config.peek = true;
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(if args.debug { log::LevelFilter::Debug } else { log::LevelFilter::Info })
        .init();

    let config_path = shellexpand::tilde(&args.config).into_owned();
    let mut config = FetchConfig::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;
    args.apply_overrides(&mut config);
    config.validate().context("Invalid settings")?;

    let account = Account {
        username: args.username,
        password: args.password,
        server: args.server,
    };

    let mut connection = ImapConnection::connect(&account, &config)
        .with_context(|| format!("Failed to connect to {}", account.server))?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    run_session(&mut connection, &config, &mut out).context("Failed to fetch unread email")?;

    Ok(())
}
