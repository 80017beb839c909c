use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::FetchConfig;
use crate::email::{EmailError, MimePart, ParsedEmail};
use crate::mailbox::MailStore;

pub const RETRIEVED_SENTINEL: &str = "!!!!!!!!<EMAIL-RETRIEVED>!!!!!!!!";
pub const NOT_RETRIEVED_SENTINEL: &str = "!!!!!!!!<NO-EMAIL-RETRIEVED>!!!!!!!!";

/// What a fetch run did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FetchReport {
    pub messages: usize,
    pub attachments: Vec<PathBuf>,
}

impl FetchReport {
    pub fn retrieved(&self) -> bool {
        self.messages > 0
    }
}

/// Runs [`fetch_unread`] and logs out afterwards, whatever the outcome.
pub fn run_session<M: MailStore, W: Write>(
    store: &mut M,
    config: &FetchConfig,
    out: &mut W,
) -> Result<FetchReport, EmailError> {
    let result = fetch_unread(store, config, out);
    if let Err(e) = store.logout() {
        log::warn!("Logout failed: {}", e);
    }
    result
}

/// Fetches up to `max_messages` unread messages, prints their tagged fields
/// and saves allow-listed attachments, then prints the status sentinel.
pub fn fetch_unread<M: MailStore, W: Write>(
    store: &mut M,
    config: &FetchConfig,
    out: &mut W,
) -> Result<FetchReport, EmailError> {
    store.select(&config.folder)?;

    let ids = store.search(&config.search_query)?;
    log::debug!(
        "Search '{}' in '{}' matched {} messages",
        config.search_query,
        config.folder,
        ids.len()
    );

    let attachment_dir = Path::new(&config.attachment_dir);
    let mut report = FetchReport::default();

    for id in ids.into_iter().take(config.max_messages) {
        let raw = match store.fetch_raw(id, config.peek)? {
            Some(raw) => raw,
            None => {
                log::warn!("Message {} came back without a body", id);
                continue;
            }
        };

        let email = ParsedEmail::parse(&raw)?;
        process_email(&email, config, attachment_dir, out, &mut report)?;
        report.messages += 1;
    }

    if report.retrieved() {
        writeln!(out, "{}", RETRIEVED_SENTINEL)?;
    } else {
        writeln!(out, "{}", NOT_RETRIEVED_SENTINEL)?;
    }
    out.flush()?;

    log::info!(
        "Processed {} message(s), saved {} attachment(s)",
        report.messages,
        report.attachments.len()
    );
    Ok(report)
}

fn process_email<W: Write>(
    email: &ParsedEmail,
    config: &FetchConfig,
    attachment_dir: &Path,
    out: &mut W,
    report: &mut FetchReport,
) -> Result<(), EmailError> {
    if let Some(part) = email.single_payload() {
        if config.print_single_part {
            print_fields(out, email, part.text()?)?;
        } else {
            log::debug!(
                "Skipping body of non-multipart message ({} bytes)",
                part.payload.len()
            );
        }
        return Ok(());
    }

    for part in &email.parts {
        if part.is_inline_text() {
            print_fields(out, email, part.text()?)?;
        } else if config.is_saved_type(&part.content_type) {
            let path = save_attachment(part, attachment_dir, config)?;
            report.attachments.push(path);
        } else {
            log::debug!("Ignoring {} part", part.content_type);
        }
    }

    Ok(())
}

fn print_fields<W: Write>(out: &mut W, email: &ParsedEmail, body: &str) -> Result<(), EmailError> {
    writeln!(out, "<from>{}</from>", email.from)?;
    writeln!(out, "<subject>{}</subject>", email.subject)?;
    writeln!(out, "<body>{}</body>", body)?;
    Ok(())
}

fn save_attachment(
    part: &MimePart,
    dir: &Path,
    config: &FetchConfig,
) -> Result<PathBuf, EmailError> {
    if config.create_attachment_dir {
        fs::create_dir_all(dir)?;
    }

    let path = part.attachment_path(dir, config.sanitize_filenames)?;
    fs::write(&path, &part.payload)?;
    log::debug!(
        "Saved {} attachment to {} ({} bytes)",
        part.content_type,
        path.display(),
        part.payload.len()
    );
    Ok(path)
}
