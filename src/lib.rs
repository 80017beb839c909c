pub mod config;
pub mod email;
pub mod fetcher;
pub mod mailbox;

// Re-export commonly used types
pub use config::{Account, FetchConfig, ImapSecurity};
pub use email::{EmailError, MimePart, ParsedEmail};
pub use fetcher::{fetch_unread, run_session, FetchReport};
pub use mailbox::{ImapConnection, MailStore};
