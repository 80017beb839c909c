use std::path::{Path, PathBuf};

use mail_parser::decoders::base64::base64_decode;
use mail_parser::decoders::quoted_printable::quoted_printable_decode;
use mail_parser::{Encoding, HeaderValue, MimeHeaders, PartType};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmailError {
    #[error("IMAP error: {0}")]
    ImapError(String),

    #[error("TLS error: {0}")]
    TlsError(#[from] native_tls::Error),

    #[error("Parsing error: {0}")]
    ParsingError(String),

    #[error("Decoding error: {0}")]
    DecodingError(String),

    #[error("Attachment of type {0} has no filename")]
    MissingFilename(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<imap::error::Error> for EmailError {
    fn from(err: imap::error::Error) -> Self {
        EmailError::ImapError(err.to_string())
    }
}

/// One section of a message, flattened out of the MIME tree.
#[derive(Debug, Clone)]
pub struct MimePart {
    /// Lowercased `type/subtype`; `text/plain` when the part declares none.
    pub content_type: String,
    /// True when `Content-Disposition` is `attachment`.
    pub is_attachment: bool,
    pub filename: Option<String>,
    /// Payload with the transfer encoding removed. Text is left in its
    /// declared charset.
    pub payload: Vec<u8>,
}

impl MimePart {
    /// `raw` is the `raw_message` of the message that owns `part`; part
    /// offsets are relative to it, nested messages included.
    fn from_part(part: &mail_parser::MessagePart, raw: &[u8]) -> Result<Self, EmailError> {
        let content_type = part
            .content_type()
            .map(|ct| match ct.subtype() {
                Some(subtype) => format!("{}/{}", ct.ctype(), subtype),
                None => ct.ctype().to_string(),
            })
            .unwrap_or_else(|| "text/plain".to_string())
            .to_lowercase();

        let is_attachment = part
            .content_disposition()
            .map(|cd| cd.ctype().eq_ignore_ascii_case("attachment"))
            .unwrap_or(false);

        let filename = part.attachment_name().map(|name| name.to_string());

        let payload = match &part.body {
            // mail-parser has already converted text to UTF-8 from the
            // declared charset; go back to the wire bytes instead.
            PartType::Text(_) | PartType::Html(_) => {
                let body = raw.get(part.offset_body..part.offset_end).ok_or_else(|| {
                    EmailError::ParsingError(format!("{} part lies outside the message", content_type))
                })?;
                transfer_decode(body, part.encoding).ok_or_else(|| {
                    EmailError::DecodingError(format!(
                        "{} part has a malformed {:?} transfer encoding",
                        content_type, part.encoding
                    ))
                })?
            }
            PartType::Binary(binary) | PartType::InlineBinary(binary) => binary.to_vec(),
            // Containers carry no payload of their own
            PartType::Message(_) | PartType::Multipart(_) => Vec::new(),
        };

        Ok(Self {
            content_type,
            is_attachment,
            filename,
            payload,
        })
    }

    /// Plain text meant to be read inline rather than saved.
    pub fn is_inline_text(&self) -> bool {
        self.content_type == "text/plain" && !self.is_attachment
    }

    pub fn text(&self) -> Result<&str, EmailError> {
        std::str::from_utf8(&self.payload).map_err(|e| {
            EmailError::DecodingError(format!("{} part is not valid UTF-8: {}", self.content_type, e))
        })
    }

    /// Destination of this part inside `dir`.
    ///
    /// The declared filename is used verbatim unless `sanitize` is set, in
    /// which case only its last path component is kept.
    pub fn attachment_path(&self, dir: &Path, sanitize: bool) -> Result<PathBuf, EmailError> {
        let filename = self
            .filename
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| EmailError::MissingFilename(self.content_type.clone()))?;

        if !sanitize {
            return Ok(dir.join(filename));
        }

        let base = filename
            .rsplit(|c: char| c == '/' || c == '\\')
            .next()
            .filter(|name| !name.is_empty() && *name != "." && *name != "..")
            .ok_or_else(|| EmailError::MissingFilename(self.content_type.clone()))?;
        Ok(dir.join(base))
    }
}

/// The fields of a fetched message that get printed or saved.
#[derive(Debug, Clone)]
pub struct ParsedEmail {
    pub from: String,
    pub subject: String,
    pub is_multipart: bool,
    /// Depth-first, starting with the root part.
    pub parts: Vec<MimePart>,
}

impl ParsedEmail {
    pub fn parse(raw: &[u8]) -> Result<Self, EmailError> {
        let parsed = mail_parser::Message::parse(raw)
            .ok_or_else(|| EmailError::ParsingError("message is not valid RFC 5322".to_string()))?;
        Self::from_parsed_email(&parsed)
    }

    pub fn from_parsed_email(parsed: &mail_parser::Message) -> Result<Self, EmailError> {
        let from = render_addresses(parsed.from());
        let subject = parsed.subject().unwrap_or_default().to_string();

        let is_multipart = matches!(
            parsed.parts.first().map(|part| &part.body),
            Some(PartType::Multipart(_))
        );

        let mut parts = Vec::new();
        collect_parts(parsed, &mut parts)?;
        log::debug!(
            "Parsed message from '{}' with subject '{}': {} parts, multipart={}",
            from,
            subject,
            parts.len(),
            is_multipart
        );

        Ok(Self {
            from,
            subject,
            is_multipart,
            parts,
        })
    }

    /// Payload of a non-multipart message.
    pub fn single_payload(&self) -> Option<&MimePart> {
        if self.is_multipart {
            None
        } else {
            self.parts.first()
        }
    }
}

/// Flattens `message` depth-first, descending into attached messages.
fn collect_parts(message: &mail_parser::Message, parts: &mut Vec<MimePart>) -> Result<(), EmailError> {
    for part in &message.parts {
        parts.push(MimePart::from_part(part, message.raw_message.as_ref())?);
        if let PartType::Message(nested) = &part.body {
            collect_parts(nested, parts)?;
        }
    }
    Ok(())
}

fn transfer_decode(body: &[u8], encoding: Encoding) -> Option<Vec<u8>> {
    match encoding {
        Encoding::None => Some(body.to_vec()),
        Encoding::QuotedPrintable => quoted_printable_decode(body),
        Encoding::Base64 => base64_decode(body),
    }
}

fn render_addresses(value: &HeaderValue) -> String {
    match value {
        HeaderValue::Address(addr) => render_address(addr),
        HeaderValue::AddressList(list) => list
            .iter()
            .map(render_address)
            .collect::<Vec<_>>()
            .join(", "),
        HeaderValue::Text(text) => text.to_string(),
        _ => String::new(),
    }
}

fn render_address(addr: &mail_parser::Addr) -> String {
    let name = addr.name.as_deref().unwrap_or_default();
    let address = addr.address.as_deref().unwrap_or_default();
    if name.is_empty() {
        address.to_string()
    } else {
        format!("{} <{}>", name, address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MULTIPART: &str = "From: \"Alice Example\" <alice@example.com>\r\n\
To: bob@example.com\r\n\
Subject: Quarterly numbers\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"sep\"\r\n\
\r\n\
--sep\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
See attached.\r\n\
--sep\r\n\
Content-Type: image/jpeg; name=\"chart.jpg\"\r\n\
Content-Disposition: attachment; filename=\"chart.jpg\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
/9j/4AAQ\r\n\
--sep\r\n\
Content-Type: text/plain\r\n\
Content-Disposition: attachment; filename=\"notes.txt\"\r\n\
\r\n\
not the body\r\n\
--sep--\r\n";

    #[test]
    fn multipart_parts_are_classified() {
        let email = ParsedEmail::parse(MULTIPART.as_bytes()).unwrap();
        assert!(email.is_multipart);
        assert_eq!(email.from, "Alice Example <alice@example.com>");
        assert_eq!(email.subject, "Quarterly numbers");

        // Root container first, then the three leaves
        assert_eq!(email.parts.len(), 4);
        assert!(email.parts[0].content_type.starts_with("multipart/"));

        let inline: Vec<_> = email.parts.iter().filter(|p| p.is_inline_text()).collect();
        assert_eq!(inline.len(), 1);
        assert!(inline[0].text().unwrap().starts_with("See attached."));

        let image = &email.parts[2];
        assert_eq!(image.content_type, "image/jpeg");
        assert!(image.is_attachment);
        assert_eq!(image.filename.as_deref(), Some("chart.jpg"));
        assert_eq!(image.payload, vec![0xff, 0xd8, 0xff, 0xe0, 0x00, 0x10]);

        assert!(!email.parts[3].is_inline_text());
        assert!(email.single_payload().is_none());
    }

    #[test]
    fn single_part_message_is_not_multipart() {
        let raw = "From: carol@example.com\r\nSubject: hi\r\n\r\nJust text.\r\n";
        let email = ParsedEmail::parse(raw.as_bytes()).unwrap();
        assert!(!email.is_multipart);
        assert_eq!(email.from, "carol@example.com");

        let payload = email.single_payload().unwrap();
        assert_eq!(payload.content_type, "text/plain");
        assert!(payload.text().unwrap().starts_with("Just text."));
    }

    #[test]
    fn invalid_utf8_text_is_a_decoding_error() {
        let raw: &[u8] = b"From: dave@example.com\r\n\
Subject: bytes\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"x\"\r\n\
\r\n\
--x\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
Content-Transfer-Encoding: 8bit\r\n\
\r\n\
f\xff\xfeg\r\n\
--x--\r\n";
        let email = ParsedEmail::parse(raw).unwrap();
        let text = &email.parts[1];
        assert_eq!(text.payload, vec![0x66, 0xff, 0xfe, 0x67]);
        assert!(matches!(text.text(), Err(EmailError::DecodingError(_))));
    }

    #[test]
    fn declared_charset_is_not_converted() {
        let raw: &[u8] = b"From: erin@example.com\r\n\
Subject: latin\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"x\"\r\n\
\r\n\
--x\r\n\
Content-Type: text/plain; charset=iso-8859-1\r\n\
Content-Transfer-Encoding: 8bit\r\n\
\r\n\
caf\xe9\r\n\
--x--\r\n";
        let email = ParsedEmail::parse(raw).unwrap();
        assert_eq!(email.parts[1].payload, b"caf\xe9".to_vec());
        assert!(email.parts[1].text().is_err());
    }

    #[test]
    fn quoted_printable_text_is_decoded() {
        let raw = "From: erin@example.com\r\n\
Subject: qp\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"x\"\r\n\
\r\n\
--x\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
Content-Transfer-Encoding: quoted-printable\r\n\
\r\n\
caf=C3=A9 au lait\r\n\
--x--\r\n";
        let email = ParsedEmail::parse(raw.as_bytes()).unwrap();
        assert_eq!(email.parts[1].text().unwrap(), "caf\u{e9} au lait");
    }

    #[test]
    fn attached_message_parts_are_flattened() {
        let raw = "From: frank@example.com\r\n\
Subject: Fwd: photo\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"outer\"\r\n\
\r\n\
--outer\r\n\
Content-Type: message/rfc822\r\n\
\r\n\
From: grace@example.com\r\n\
Subject: photo\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"inner\"\r\n\
\r\n\
--inner\r\n\
Content-Type: text/plain\r\n\
\r\n\
inner body\r\n\
--inner\r\n\
Content-Type: image/png; name=\"in.png\"\r\n\
Content-Disposition: attachment; filename=\"in.png\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
iVBORw==\r\n\
--inner--\r\n\
\r\n\
--outer--\r\n";
        let email = ParsedEmail::parse(raw.as_bytes()).unwrap();
        assert_eq!(email.from, "frank@example.com");

        let inline: Vec<_> = email.parts.iter().filter(|p| p.is_inline_text()).collect();
        assert_eq!(inline.len(), 1);
        assert_eq!(inline[0].text().unwrap(), "inner body");

        let png = email
            .parts
            .iter()
            .find(|p| p.content_type == "image/png")
            .unwrap();
        assert_eq!(png.filename.as_deref(), Some("in.png"));
        assert_eq!(png.payload, vec![0x89, 0x50, 0x4e, 0x47]);
    }

    #[test]
    fn attachment_path_trusts_filename_unless_sanitized() {
        let part = MimePart {
            content_type: "image/png".to_string(),
            is_attachment: true,
            filename: Some("../escape.png".to_string()),
            payload: Vec::new(),
        };
        let dir = Path::new("attachments");
        assert_eq!(
            part.attachment_path(dir, false).unwrap(),
            Path::new("attachments/../escape.png")
        );
        assert_eq!(
            part.attachment_path(dir, true).unwrap(),
            Path::new("attachments/escape.png")
        );
    }

    #[test]
    fn attachment_without_filename_is_an_error() {
        let part = MimePart {
            content_type: "image/png".to_string(),
            is_attachment: true,
            filename: None,
            payload: vec![1, 2, 3],
        };
        let err = part.attachment_path(Path::new("attachments"), false).unwrap_err();
        assert!(matches!(err, EmailError::MissingFilename(ref t) if t == "image/png"));
    }
}
