use std::io::{Read, Write};
use std::net::TcpStream;

use imap::Session;
use native_tls::{TlsConnector, TlsStream};

use crate::config::{Account, FetchConfig, ImapSecurity};
use crate::email::EmailError;

/// The handful of mailbox operations a fetch run needs.
pub trait MailStore {
    fn select(&mut self, folder: &str) -> Result<(), EmailError>;

    /// Sequence numbers matching `query`, lowest first.
    fn search(&mut self, query: &str) -> Result<Vec<u32>, EmailError>;

    /// Full RFC 822 bytes of one message, or `None` when the server returned
    /// no body for it.
    fn fetch_raw(&mut self, id: u32, peek: bool) -> Result<Option<Vec<u8>>, EmailError>;

    fn logout(&mut self) -> Result<(), EmailError>;
}

impl<T: Read + Write> MailStore for Session<T> {
    fn select(&mut self, folder: &str) -> Result<(), EmailError> {
        let mailbox = Session::select(self, folder)?;
        log::debug!("Selected '{}' ({} messages)", folder, mailbox.exists);
        Ok(())
    }

    fn search(&mut self, query: &str) -> Result<Vec<u32>, EmailError> {
        let mut ids: Vec<u32> = Session::search(self, query)?.into_iter().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn fetch_raw(&mut self, id: u32, peek: bool) -> Result<Option<Vec<u8>>, EmailError> {
        let query = if peek { "BODY.PEEK[]" } else { "RFC822" };
        let messages = Session::fetch(self, id.to_string(), query)?;
        Ok(messages
            .iter()
            .find_map(|message| message.body())
            .map(|body| body.to_vec()))
    }

    fn logout(&mut self) -> Result<(), EmailError> {
        Session::logout(self)?;
        Ok(())
    }
}

/// An authenticated IMAP session over either transport.
pub enum ImapConnection {
    Secure(Session<TlsStream<TcpStream>>),
    Plain(Session<TcpStream>),
}

impl ImapConnection {
    pub fn connect(account: &Account, config: &FetchConfig) -> Result<Self, EmailError> {
        let domain = account.server.as_str();
        let port = config.imap_port;
        log::debug!(
            "Connecting to {}:{} ({:?}) as {}",
            domain,
            port,
            config.imap_security,
            account.username
        );

        match config.imap_security {
            ImapSecurity::SSL => {
                let tls = TlsConnector::builder().build()?;
                let client = imap::connect((domain, port), domain, &tls)?;
                let session = client
                    .login(&account.username, &account.password)
                    .map_err(|e| EmailError::ImapError(format!("Login failed: {}", e.0)))?;
                Ok(ImapConnection::Secure(session))
            }
            ImapSecurity::StartTLS => {
                let tls = TlsConnector::builder().build()?;
                let client = imap::connect_starttls((domain, port), domain, &tls)?;
                let session = client
                    .login(&account.username, &account.password)
                    .map_err(|e| EmailError::ImapError(format!("Login failed: {}", e.0)))?;
                Ok(ImapConnection::Secure(session))
            }
            ImapSecurity::None => {
                let tcp_stream = TcpStream::connect((domain, port))?;
                let mut client = imap::Client::new(tcp_stream);
                client.read_greeting()?;
                let session = client
                    .login(&account.username, &account.password)
                    .map_err(|e| EmailError::ImapError(format!("Login failed: {}", e.0)))?;
                Ok(ImapConnection::Plain(session))
            }
        }
    }
}

impl MailStore for ImapConnection {
    fn select(&mut self, folder: &str) -> Result<(), EmailError> {
        match self {
            ImapConnection::Secure(session) => MailStore::select(session, folder),
            ImapConnection::Plain(session) => MailStore::select(session, folder),
        }
    }

    fn search(&mut self, query: &str) -> Result<Vec<u32>, EmailError> {
        match self {
            ImapConnection::Secure(session) => MailStore::search(session, query),
            ImapConnection::Plain(session) => MailStore::search(session, query),
        }
    }

    fn fetch_raw(&mut self, id: u32, peek: bool) -> Result<Option<Vec<u8>>, EmailError> {
        match self {
            ImapConnection::Secure(session) => session.fetch_raw(id, peek),
            ImapConnection::Plain(session) => session.fetch_raw(id, peek),
        }
    }

    fn logout(&mut self) -> Result<(), EmailError> {
        match self {
            ImapConnection::Secure(session) => MailStore::logout(session),
            ImapConnection::Plain(session) => MailStore::logout(session),
        }
    }
}
