//! # Notification Mailer
//!
//! A one-shot SMTP sender for system notifications:
//! - Implicit TLS on port 465 (or when forced), opportunistic STARTTLS otherwise
//! - PLAIN authentication, LOGIN for Outlook / Microsoft 365 accounts
//! - Single-part HTML messages with encoded subject, Date and Message-ID
//! - All-or-nothing delivery to a `;`-separated recipient list
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use notify_mailer::{Mailer, MailerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MailerConfig::builder()
//!         .host("smtp.example.com")
//!         .port(465)
//!         .credentials("noreply@example.com", "app-token")
//!         .system_name("Status Page")
//!         .build()?;
//!
//!     let mailer = Mailer::new(config);
//!     let receipt = mailer
//!         .send("Disk almost full", "ops@example.com; oncall@example.com", "<p>92% used</p>")
//!         .await?;
//!     println!("Message sent with ID: {}", receipt.message_id);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod types;

// Protocol layer
pub mod protocol;

// Transport layer
pub mod transport;

// Authentication
pub mod auth;

// Message assembly
pub mod message;

// Mailer
pub mod mailer;

// Mocks for testing
pub mod mocks;

// Re-exports for convenience
pub use auth::{AuthMechanism, Credentials, MailProvider};
pub use config::{MailerConfig, MailerConfigBuilder, SecurityMode, TlsConfig};
pub use errors::{EnhancedStatusCode, SmtpError, SmtpErrorKind, SmtpResult};
pub use mailer::Mailer;
pub use message::OutgoingMessage;
pub use protocol::{EsmtpCapabilities, SmtpCommand, SmtpResponse};
pub use transport::{Connector, SmtpTransport, TcpConnector, TcpTransport};
pub use types::{SendReceipt, SessionStep};
