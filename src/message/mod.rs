//! Notification message assembly.
//!
//! Builds the RFC 5322 header block for a single-part HTML message:
//! `To`, `From`, Base64 encoded-word `Subject`, `Date`, `Message-ID` and a
//! fixed `Content-Type`, followed by the body as given.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Local, TimeZone};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::MailerConfig;
use crate::errors::{SmtpError, SmtpResult};

/// Length of the random part of a Message-ID.
const MESSAGE_ID_RANDOM_LEN: usize = 12;

/// Splits a `;`-separated recipient list, trimming each entry.
///
/// Empty entries (`"a@x.com;"`) are dropped.
pub fn parse_recipients(receiver: &str) -> Vec<String> {
    receiver
        .split(';')
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(str::to_string)
        .collect()
}

/// Generates `<{unix_nanos}.{random}@{domain}>`.
pub fn generate_message_id(domain: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(MESSAGE_ID_RANDOM_LEN)
        .map(char::from)
        .collect();
    format!("<{}.{}@{}>", nanos, suffix, domain)
}

/// RFC 2047 encoded-word, Base64 with UTF-8 charset.
pub fn encode_word(text: &str) -> String {
    format!("=?UTF-8?B?{}?=", BASE64.encode(text.as_bytes()))
}

/// RFC 1123 date with numeric zone, e.g. `Mon, 02 Jan 2006 15:04:05 -0700`.
pub fn format_date<Tz: TimeZone>(date: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    date.format("%a, %d %b %Y %H:%M:%S %z").to_string()
}

/// Dot-stuffs a message for DATA and normalises bare LF to CRLF.
pub fn dot_stuff(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 64);
    let mut at_line_start = true;
    let mut prev = 0u8;

    for &byte in data {
        if at_line_start && byte == b'.' {
            out.push(b'.');
        }
        if byte == b'\n' && prev != b'\r' {
            out.push(b'\r');
        }
        out.push(byte);
        at_line_start = byte == b'\n';
        prev = byte;
    }

    if !out.ends_with(b"\r\n") {
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Rejects values that would break out of a single SMTP command line.
pub(crate) fn check_line(field: &str, value: &str) -> SmtpResult<()> {
    if value.contains(['\r', '\n']) {
        return Err(SmtpError::configuration(format!(
            "{} contains a line break: {:?}",
            field, value
        )));
    }
    Ok(())
}

/// A fully assembled notification, ready for the envelope.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// Envelope sender.
    pub from: String,
    /// Envelope recipients.
    pub recipients: Vec<String>,
    /// Generated Message-ID, angle brackets included.
    pub message_id: String,
    /// Serialized headers and body.
    pub content: Vec<u8>,
}

impl OutgoingMessage {
    /// Assembles a message from the mailer settings.
    pub fn compose(config: &MailerConfig, subject: &str, receiver: &str, body: &str) -> SmtpResult<Self> {
        Self::compose_at(config, subject, receiver, body, &Local::now())
    }

    /// Assembles a message with an explicit `Date`.
    pub fn compose_at<Tz: TimeZone>(
        config: &MailerConfig,
        subject: &str,
        receiver: &str,
        body: &str,
        date: &DateTime<Tz>,
    ) -> SmtpResult<Self>
    where
        Tz::Offset: std::fmt::Display,
    {
        let recipients = parse_recipients(receiver);
        if recipients.is_empty() {
            return Err(SmtpError::configuration("No recipients given"));
        }

        for recipient in &recipients {
            check_line("Recipient", recipient)?;
        }
        let from = config.from_address().to_string();
        check_line("Sender", &from)?;
        let message_id = generate_message_id(config.account_domain()?);

        let mut headers = String::with_capacity(256 + body.len());
        headers.push_str(&format!("To: {}\r\n", recipients.join(", ")));
        headers.push_str(&format!("From: {}\r\n", from_header(&config.system_name, &from)));
        headers.push_str(&format!("Subject: {}\r\n", encode_word(subject)));
        headers.push_str(&format!("Date: {}\r\n", format_date(date)));
        headers.push_str(&format!("Message-ID: {}\r\n", message_id));
        headers.push_str("MIME-Version: 1.0\r\n");
        headers.push_str("Content-Type: text/html; charset=UTF-8\r\n");
        headers.push_str("\r\n");
        headers.push_str(body);
        headers.push_str("\r\n");

        Ok(Self {
            from,
            recipients,
            message_id,
            content: headers.into_bytes(),
        })
    }

    /// Returns the content prepared for the DATA phase, without the
    /// terminating dot.
    pub fn data_payload(&self) -> Vec<u8> {
        dot_stuff(&self.content)
    }
}

fn from_header(name: &str, address: &str) -> String {
    let name = name.trim();
    if name.is_empty() {
        format!("<{}>", address)
    } else if name.is_ascii() {
        format!("{} <{}>", name, address)
    } else {
        format!("{} <{}>", encode_word(name), address)
    }
}
