//! Error types for the mailer.
//!
//! Every failure carries the step that failed, the server reply when there
//! was one, and the underlying cause.

use std::fmt;
use thiserror::Error;

/// Result type for mailer operations.
pub type SmtpResult<T> = Result<T, SmtpError>;

/// Failure categories, one per step of the send sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmtpErrorKind {
    /// Server or account missing, or otherwise unusable settings.
    Configuration,
    /// TCP connect, greeting or EHLO failure.
    Connection,
    /// Connect (or TLS handshake) deadline exceeded.
    ConnectTimeout,
    /// Implicit TLS handshake or TLS setup failure.
    Tls,
    /// STARTTLS negotiation failure.
    StartTls,
    /// Authentication rejected or refused locally.
    Authentication,
    /// MAIL FROM rejected.
    SenderRejected,
    /// RCPT TO rejected for one recipient.
    RecipientRejected,
    /// DATA acquisition, body write or final acknowledgement failure.
    Data,
    /// QUIT failure.
    Quit,
    /// Read deadline exceeded.
    ReadTimeout,
    /// Write deadline exceeded.
    WriteTimeout,
    /// Malformed or unexpected server reply.
    Protocol,
}

impl SmtpErrorKind {
    /// Returns true for kinds raised before any network I/O.
    pub fn is_local(&self) -> bool {
        matches!(self, SmtpErrorKind::Configuration)
    }

    /// Returns true for deadline failures.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            SmtpErrorKind::ConnectTimeout | SmtpErrorKind::ReadTimeout | SmtpErrorKind::WriteTimeout
        )
    }
}

impl fmt::Display for SmtpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmtpErrorKind::Configuration => write!(f, "Invalid configuration"),
            SmtpErrorKind::Connection => write!(f, "Connection failed"),
            SmtpErrorKind::ConnectTimeout => write!(f, "Connect timeout"),
            SmtpErrorKind::Tls => write!(f, "TLS failure"),
            SmtpErrorKind::StartTls => write!(f, "STARTTLS failed"),
            SmtpErrorKind::Authentication => write!(f, "Authentication failed"),
            SmtpErrorKind::SenderRejected => write!(f, "Sender rejected"),
            SmtpErrorKind::RecipientRejected => write!(f, "Recipient rejected"),
            SmtpErrorKind::Data => write!(f, "Data transfer failed"),
            SmtpErrorKind::Quit => write!(f, "Quit failed"),
            SmtpErrorKind::ReadTimeout => write!(f, "Read timeout"),
            SmtpErrorKind::WriteTimeout => write!(f, "Write timeout"),
            SmtpErrorKind::Protocol => write!(f, "Protocol error"),
        }
    }
}

/// Enhanced SMTP status code (RFC 2034).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancedStatusCode {
    /// Class (2=success, 4=temporary, 5=permanent).
    pub class: u8,
    /// Subject (e.g., 1=addressing, 2=mailbox, 3=mail system).
    pub subject: u16,
    /// Detail code.
    pub detail: u16,
}

impl EnhancedStatusCode {
    /// Parses an enhanced status code from a string (e.g., "5.1.1").
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('.');
        let code = Self {
            class: parts.next()?.parse().ok()?,
            subject: parts.next()?.parse().ok()?,
            detail: parts.next()?.parse().ok()?,
        };
        if parts.next().is_some() || !(2..=5).contains(&code.class) {
            return None;
        }
        Some(code)
    }
}

impl fmt::Display for EnhancedStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.class, self.subject, self.detail)
    }
}

/// Mailer error with step context and preserved cause.
#[derive(Error, Debug)]
pub struct SmtpError {
    kind: SmtpErrorKind,
    message: String,
    smtp_code: Option<u16>,
    enhanced_code: Option<EnhancedStatusCode>,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SmtpError {
    /// Creates a new error.
    pub fn new(kind: SmtpErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            smtp_code: None,
            enhanced_code: None,
            cause: None,
        }
    }

    /// Sets the SMTP reply code.
    pub fn with_smtp_code(mut self, code: u16) -> Self {
        self.smtp_code = Some(code);
        self
    }

    /// Sets the enhanced status code.
    pub fn with_enhanced_code(mut self, code: EnhancedStatusCode) -> Self {
        self.enhanced_code = Some(code);
        self
    }

    /// Sets the underlying cause.
    pub fn with_cause<E: std::error::Error + Send + Sync + 'static>(mut self, cause: E) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Re-labels an error with the step it surfaced in, keeping the
    /// inner error as the cause. Timeouts keep their kind.
    pub fn in_step(self, kind: SmtpErrorKind, context: impl Into<String>) -> Self {
        let kind = if self.kind.is_timeout() { self.kind } else { kind };
        let smtp_code = self.smtp_code;
        let enhanced_code = self.enhanced_code.clone();
        Self {
            kind,
            message: context.into(),
            smtp_code,
            enhanced_code,
            cause: Some(Box::new(self)),
        }
    }

    /// Returns the error kind.
    pub fn kind(&self) -> SmtpErrorKind {
        self.kind
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the SMTP reply code if the server answered.
    pub fn smtp_code(&self) -> Option<u16> {
        self.smtp_code
    }

    /// Returns the enhanced status code if available.
    pub fn enhanced_code(&self) -> Option<&EnhancedStatusCode> {
        self.enhanced_code.as_ref()
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::Configuration, message)
    }

    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::Connection, message)
    }

    /// Creates a timeout error.
    pub fn timeout(kind: SmtpErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message)
    }

    /// Creates a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::Tls, message)
    }

    /// Creates an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::Authentication, message)
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::Protocol, message)
    }

    /// Creates an error from a negative server reply.
    pub fn from_smtp_response(code: u16, message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::Protocol, message).with_smtp_code(code)
    }
}

impl fmt::Display for SmtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(code) = self.smtp_code {
            write!(f, " (SMTP {})", code)?;
        }
        if let Some(enhanced) = &self.enhanced_code {
            write!(f, " [{}]", enhanced)?;
        }
        Ok(())
    }
}
