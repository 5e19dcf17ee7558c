//! SMTP protocol primitives.
//!
//! Command formatting, reply parsing and EHLO capability parsing for the
//! subset of RFC 5321 a single submission needs.

use std::collections::HashSet;
use std::fmt;

use crate::auth::AuthMechanism;
use crate::errors::{EnhancedStatusCode, SmtpError, SmtpResult};

/// SMTP commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    /// Extended HELLO with client identity.
    Ehlo(String),
    /// Basic HELLO.
    Helo(String),
    /// Start TLS negotiation.
    StartTls,
    /// Authenticate.
    Auth {
        /// Authentication mechanism.
        mechanism: AuthMechanism,
        /// Initial response (optional).
        initial_response: Option<String>,
    },
    /// Base64 answer to a 334 challenge.
    AuthContinue(String),
    /// MAIL FROM command.
    MailFrom {
        /// Sender address, without angle brackets.
        address: String,
    },
    /// RCPT TO command.
    RcptTo {
        /// Recipient address, without angle brackets.
        address: String,
    },
    /// DATA command.
    Data,
    /// Quit connection.
    Quit,
}

impl SmtpCommand {
    /// Formats the command for sending.
    pub fn to_smtp_string(&self) -> String {
        match self {
            SmtpCommand::Ehlo(domain) => format!("EHLO {}", domain),
            SmtpCommand::Helo(domain) => format!("HELO {}", domain),
            SmtpCommand::StartTls => "STARTTLS".to_string(),
            SmtpCommand::Auth {
                mechanism,
                initial_response,
            } => match initial_response {
                Some(response) => format!("AUTH {} {}", mechanism, response),
                None => format!("AUTH {}", mechanism),
            },
            SmtpCommand::AuthContinue(response) => response.clone(),
            SmtpCommand::MailFrom { address } => format!("MAIL FROM:<{}>", address),
            SmtpCommand::RcptTo { address } => format!("RCPT TO:<{}>", address),
            SmtpCommand::Data => "DATA".to_string(),
            SmtpCommand::Quit => "QUIT".to_string(),
        }
    }
}

/// Log-safe rendering: credential payloads are masked.
impl fmt::Display for SmtpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmtpCommand::Auth {
                mechanism,
                initial_response: Some(_),
            } => write!(f, "AUTH {} ********", mechanism),
            SmtpCommand::AuthContinue(_) => write!(f, "********"),
            other => write!(f, "{}", other.to_smtp_string()),
        }
    }
}

/// SMTP reply from the server.
#[derive(Debug, Clone)]
pub struct SmtpResponse {
    /// Status code (e.g., 250, 354, 550).
    pub code: u16,
    /// Enhanced status code (optional).
    pub enhanced_code: Option<EnhancedStatusCode>,
    /// Response message lines.
    pub message: Vec<String>,
    /// Whether this is a multiline response.
    pub is_multiline: bool,
}

impl SmtpResponse {
    /// Creates a new response.
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            enhanced_code: None,
            message: vec![message.into()],
            is_multiline: false,
        }
    }

    /// Parses a response from raw lines.
    pub fn parse(lines: &[String]) -> SmtpResult<Self> {
        if lines.is_empty() {
            return Err(SmtpError::protocol("Empty response"));
        }

        let mut messages = Vec::with_capacity(lines.len());
        let mut code = 0u16;
        let mut enhanced_code = None;

        for (i, line) in lines.iter().enumerate() {
            let parsed_code: u16 = line
                .get(..3)
                .and_then(|c| c.parse().ok())
                .ok_or_else(|| SmtpError::protocol(format!("Invalid status code: {}", line)))?;

            if i == 0 {
                code = parsed_code;
            } else if parsed_code != code {
                return Err(SmtpError::protocol("Inconsistent status codes in multiline response"));
            }

            let message = match line.get(4..) {
                Some(msg) if i == 0 => match Self::parse_enhanced_code(msg) {
                    Some((esc, rest)) => {
                        enhanced_code = Some(esc);
                        rest.trim().to_string()
                    }
                    None => msg.to_string(),
                },
                Some(msg) => msg.to_string(),
                None => String::new(),
            };

            messages.push(message);
        }

        Ok(Self {
            code,
            enhanced_code,
            message: messages,
            is_multiline: lines.len() > 1,
        })
    }

    fn parse_enhanced_code(msg: &str) -> Option<(EnhancedStatusCode, &str)> {
        let (first, rest) = msg.split_once(' ').unwrap_or((msg, ""));
        let code = EnhancedStatusCode::parse(first)?;
        Some((code, rest))
    }

    /// Returns true if this is a success response (2xx).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Returns the first message line.
    pub fn first_message(&self) -> &str {
        self.message.first().map(|s| s.as_str()).unwrap_or("")
    }

    /// Returns all message lines joined.
    pub fn full_message(&self) -> String {
        self.message.join("\n")
    }

    /// Converts to an error carrying the reply code.
    pub fn to_error(&self) -> SmtpError {
        let mut err = SmtpError::from_smtp_response(self.code, self.full_message());
        if let Some(enhanced) = &self.enhanced_code {
            err = err.with_enhanced_code(enhanced.clone());
        }
        err
    }

    /// Returns `Ok` when the code matches, the reply as an error otherwise.
    pub fn expect_code(self, expected: u16) -> SmtpResult<Self> {
        if self.code == expected {
            Ok(self)
        } else {
            Err(self.to_error())
        }
    }

    /// Returns `Ok` for any 2xx reply, the reply as an error otherwise.
    pub fn expect_success(self) -> SmtpResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.to_error())
        }
    }
}

impl fmt::Display for SmtpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.first_message())
    }
}

/// ESMTP server capabilities.
///
/// A server that only answered HELO has none.
#[derive(Debug, Clone, Default)]
pub struct EsmtpCapabilities {
    /// Advertised AUTH mechanisms this crate can use.
    pub auth_mechanisms: HashSet<AuthMechanism>,
    /// STARTTLS supported.
    pub starttls: bool,
}

impl EsmtpCapabilities {
    /// Parses capabilities from an EHLO response.
    pub fn from_ehlo_response(response: &SmtpResponse) -> Self {
        let mut caps = Self::default();

        for line in response.message.iter().skip(1) {
            let line = line.trim().to_uppercase();
            let (capability, params) = line.split_once(' ').unwrap_or((line.as_str(), ""));

            match capability {
                // Some servers still advertise the pre-RFC "AUTH=" form.
                "AUTH" => {
                    caps.auth_mechanisms.extend(params.split_whitespace().filter_map(AuthMechanism::from_capability));
                }
                c if c.starts_with("AUTH=") => {
                    caps.auth_mechanisms.extend(
                        c[5..]
                            .split_whitespace()
                            .chain(params.split_whitespace())
                            .filter_map(AuthMechanism::from_capability),
                    );
                }
                "STARTTLS" => {
                    caps.starttls = true;
                }
                _ => {}
            }
        }

        caps
    }

    /// Fails unless the server offers a usable AUTH mechanism.
    pub fn require_auth(&self) -> SmtpResult<()> {
        if self.auth_mechanisms.is_empty() {
            Err(SmtpError::authentication("Server doesn't support AUTH"))
        } else {
            Ok(())
        }
    }
}

/// Reply codes used by the send sequence.
pub mod codes {
    /// Service ready.
    pub const SERVICE_READY: u16 = 220;
    /// Service closing.
    pub const SERVICE_CLOSING: u16 = 221;
    /// Authentication successful.
    pub const AUTH_SUCCESS: u16 = 235;
    /// OK.
    pub const OK: u16 = 250;
    /// Continue (AUTH).
    pub const AUTH_CONTINUE: u16 = 334;
    /// Start mail input.
    pub const START_MAIL_INPUT: u16 = 354;
    /// Authentication failed.
    pub const AUTH_FAILED: u16 = 535;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_formatting() {
        assert_eq!(
            SmtpCommand::Ehlo("localhost".to_string()).to_smtp_string(),
            "EHLO localhost"
        );
        assert_eq!(SmtpCommand::StartTls.to_smtp_string(), "STARTTLS");
        assert_eq!(
            SmtpCommand::MailFrom {
                address: "noreply@example.com".to_string(),
            }
            .to_smtp_string(),
            "MAIL FROM:<noreply@example.com>"
        );
        assert_eq!(
            SmtpCommand::RcptTo {
                address: "bob@example.com".to_string(),
            }
            .to_smtp_string(),
            "RCPT TO:<bob@example.com>"
        );
    }

    #[test]
    fn test_auth_display_masks_payload() {
        let command = SmtpCommand::Auth {
            mechanism: AuthMechanism::Plain,
            initial_response: Some("AHVzZXIAcGFzcw==".to_string()),
        };
        assert_eq!(command.to_smtp_string(), "AUTH PLAIN AHVzZXIAcGFzcw==");
        assert_eq!(command.to_string(), "AUTH PLAIN ********");

        let command = SmtpCommand::AuthContinue("c2VjcmV0".to_string());
        assert!(!command.to_string().contains("c2VjcmV0"));

        let command = SmtpCommand::Auth {
            mechanism: AuthMechanism::Login,
            initial_response: None,
        };
        assert_eq!(command.to_string(), "AUTH LOGIN");
    }

    #[test]
    fn test_response_parse() {
        let lines = vec!["250 OK".to_string()];
        let response = SmtpResponse::parse(&lines).unwrap();
        assert_eq!(response.code, 250);
        assert!(response.is_success());
        assert_eq!(response.first_message(), "OK");

        let lines = vec![
            "250-smtp.example.com Hello".to_string(),
            "250-SIZE 10485760".to_string(),
            "250 STARTTLS".to_string(),
        ];
        let response = SmtpResponse::parse(&lines).unwrap();
        assert_eq!(response.code, 250);
        assert!(response.is_multiline);
        assert_eq!(response.message.len(), 3);

        let lines = vec!["354".to_string()];
        let response = SmtpResponse::parse(&lines).unwrap();
        assert!(!response.is_success());
        assert_eq!(response.first_message(), "");
    }

    #[test]
    fn test_response_parse_errors() {
        assert!(SmtpResponse::parse(&[]).is_err());
        assert!(SmtpResponse::parse(&["hi".to_string()]).is_err());
        assert!(SmtpResponse::parse(&["250-a".to_string(), "251 b".to_string()]).is_err());
    }

    #[test]
    fn test_response_with_enhanced_code() {
        let lines = vec!["550 5.1.1 User unknown".to_string()];
        let response = SmtpResponse::parse(&lines).unwrap();
        assert_eq!(response.code, 550);
        assert_eq!(response.first_message(), "User unknown");
        let esc = response.enhanced_code.clone().unwrap();
        assert_eq!(esc.to_string(), "5.1.1");

        let err = response.expect_success().unwrap_err();
        assert_eq!(err.smtp_code(), Some(550));
        assert_eq!(err.enhanced_code().unwrap().to_string(), "5.1.1");
    }

    #[test]
    fn test_capabilities_parse() {
        let response = SmtpResponse {
            code: 250,
            enhanced_code: None,
            message: vec![
                "smtp.example.com greets you".to_string(),
                "SIZE 10485760".to_string(),
                "AUTH PLAIN LOGIN CRAM-MD5".to_string(),
                "STARTTLS".to_string(),
                "8BITMIME".to_string(),
            ],
            is_multiline: true,
        };

        let caps = EsmtpCapabilities::from_ehlo_response(&response);
        assert!(caps.auth_mechanisms.contains(&AuthMechanism::Plain));
        assert!(caps.auth_mechanisms.contains(&AuthMechanism::Login));
        assert_eq!(caps.auth_mechanisms.len(), 2);
        assert!(caps.starttls);
        assert!(caps.require_auth().is_ok());
    }

    #[test]
    fn test_capabilities_without_starttls() {
        let response = SmtpResponse {
            code: 250,
            enhanced_code: None,
            message: vec!["mx.local".to_string(), "AUTH=LOGIN".to_string()],
            is_multiline: true,
        };

        let caps = EsmtpCapabilities::from_ehlo_response(&response);
        assert!(!caps.starttls);
        assert!(caps.auth_mechanisms.contains(&AuthMechanism::Login));

        // The greeting line never counts as an extension.
        let response = SmtpResponse::new(250, "STARTTLS");
        assert!(!EsmtpCapabilities::from_ehlo_response(&response).starttls);
    }

    #[test]
    fn test_capabilities_without_usable_auth() {
        let response = SmtpResponse {
            code: 250,
            enhanced_code: None,
            message: vec![
                "mx.local".to_string(),
                "AUTH XOAUTH2".to_string(),
                "STARTTLS".to_string(),
            ],
            is_multiline: true,
        };
        let caps = EsmtpCapabilities::from_ehlo_response(&response);
        assert!(caps.auth_mechanisms.is_empty());

        let err = caps.require_auth().unwrap_err();
        assert_eq!(err.kind(), crate::errors::SmtpErrorKind::Authentication);
        assert!(EsmtpCapabilities::default().require_auth().is_err());
    }
}
