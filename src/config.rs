use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    InvalidValue(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImapSecurity {
    None,
    StartTLS,
    SSL,
}

impl std::str::FromStr for ImapSecurity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(ImapSecurity::None),
            "starttls" => Ok(ImapSecurity::StartTLS),
            "ssl" => Ok(ImapSecurity::SSL),
            other => Err(ConfigError::InvalidValue(format!(
                "unknown IMAP security setting '{}'",
                other
            ))),
        }
    }
}

/// Credentials and server address taken from the command line.
#[derive(Debug, Clone)]
pub struct Account {
    pub username: String,
    pub password: String,
    pub server: String,
}

pub const DEFAULT_ATTACHMENT_TYPES: [&str; 3] = [
    "image/jpeg",
    "image/png",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
];

/// Everything about a fetch run that is not a credential.
///
/// Every field falls back to its default when missing from the file, so a
/// config containing only `{"max_messages": 3}` is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub imap_port: u16,
    pub imap_security: ImapSecurity,
    pub folder: String,
    pub search_query: String,
    /// Upper bound on messages processed per run.
    pub max_messages: usize,
    /// Fetch with `BODY.PEEK[]` so the server does not set `\Seen`.
    pub peek: bool,
    /// Print the tagged fields for non-multipart messages too.
    pub print_single_part: bool,
    pub attachment_dir: String,
    pub create_attachment_dir: bool,
    /// Keep only the final path component of declared attachment filenames.
    pub sanitize_filenames: bool,
    pub attachment_types: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            imap_port: 993,
            imap_security: ImapSecurity::SSL,
            folder: "INBOX".to_string(),
            search_query: "UNSEEN".to_string(),
            max_messages: 1,
            peek: false,
            print_single_part: false,
            attachment_dir: "attachments".to_string(),
            create_attachment_dir: false,
            sanitize_filenames: false,
            attachment_types: DEFAULT_ATTACHMENT_TYPES
                .iter()
                .map(|t| t.to_string())
                .collect(),
        }
    }
}

impl FetchConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let path = Path::new(path);

        // No file means defaults
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(FetchConfig::default());
        }

        let content = fs::read_to_string(path)?;
        let config: FetchConfig = serde_json::from_str(&content)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.folder.trim().is_empty() {
            return Err(ConfigError::InvalidValue("folder must not be empty".to_string()));
        }
        if self.max_messages == 0 {
            return Err(ConfigError::InvalidValue(
                "max_messages must be at least 1".to_string(),
            ));
        }
        if self.search_query.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "search_query must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_saved_type(&self, content_type: &str) -> bool {
        self.attachment_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(content_type))
    }
}
