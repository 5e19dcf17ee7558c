//! The notification mailer.
//!
//! One call, one connection: connect, optionally upgrade with STARTTLS,
//! authenticate, MAIL FROM, RCPT TO per recipient, DATA, QUIT. Any failure
//! ends the send; the connection is closed exactly once either way.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::auth::{self, AuthMechanism, Authenticator, Credentials};
use crate::config::{MailerConfig, SecurityMode};
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::message::OutgoingMessage;
use crate::protocol::{codes, EsmtpCapabilities, SmtpCommand};
use crate::transport::{Connector, SmtpTransport, TcpConnector};
use crate::types::{SendReceipt, SessionStep};

/// Sends notification emails with a fixed configuration.
#[derive(Debug, Clone)]
pub struct Mailer {
    config: Arc<MailerConfig>,
    connector: Arc<dyn Connector>,
}

impl Mailer {
    /// Creates a mailer that connects over TCP.
    pub fn new(config: MailerConfig) -> Self {
        Self::with_connector(config, Arc::new(TcpConnector))
    }

    /// Creates a mailer with a custom connector.
    pub fn with_connector(config: MailerConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config: Arc::new(config),
            connector,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &MailerConfig {
        &self.config
    }

    /// Sends `content` (HTML, inserted verbatim) to every address in the
    /// `;`-separated `receiver` list.
    ///
    /// All or nothing: one rejected recipient fails the whole send and no
    /// body is transferred.
    pub async fn send(&self, subject: &str, receiver: &str, content: &str) -> SmtpResult<SendReceipt> {
        trace_step(SessionStep::Init);
        self.config.validate()?;
        let message = OutgoingMessage::compose(&self.config, subject, receiver, content)?;

        let start = Instant::now();
        let mut transport = self.connector.connect(&self.config).await.map_err(|e| {
            let kind = e.kind();
            e.in_step(kind, format!("failed to connect to {}", self.config.address()))
        })?;

        let result = self.run_session(transport.as_mut(), &message).await;

        if let Err(_e) = transport.close().await {
            #[cfg(feature = "tracing")]
            tracing::debug!(error = %_e, "Error while closing SMTP connection");
        }

        match result {
            Ok(mut receipt) => {
                receipt.duration = start.elapsed();

                #[cfg(feature = "tracing")]
                tracing::info!(
                    message_id = %receipt.message_id,
                    recipients = receipt.accepted.len(),
                    tls = receipt.tls,
                    "Email sent"
                );

                Ok(receipt)
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, message_id = %message.message_id, "Email not sent");

                Err(e)
            }
        }
    }

    /// Blocking variant of [`Mailer::send`] for synchronous callers.
    ///
    /// Runs the send on a private current-thread runtime. Must not be called
    /// from inside an async context.
    pub fn send_blocking(&self, subject: &str, receiver: &str, content: &str) -> SmtpResult<SendReceipt> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SmtpError::connection("failed to start I/O runtime").with_cause(e))?;
        runtime.block_on(self.send(subject, receiver, content))
    }

    async fn run_session(
        &self,
        transport: &mut dyn SmtpTransport,
        message: &OutgoingMessage,
    ) -> SmtpResult<SendReceipt> {
        let config = &self.config;

        trace_step(SessionStep::Connect);
        let mut capabilities = hello(transport, config.client_id())
            .await
            .map_err(|e| e.in_step(SmtpErrorKind::Connection, "failed to greet SMTP server"))?;

        if config.security() == SecurityMode::Opportunistic && !transport.is_tls() {
            if capabilities.starttls {
                trace_step(SessionStep::TlsUpgrade);
                capabilities = start_tls(transport, config.client_id())
                    .await
                    .map_err(|e| e.in_step(SmtpErrorKind::StartTls, "failed to start TLS"))?;
            } else {
                #[cfg(feature = "tracing")]
                tracing::warn!(host = %config.host, "Server does not offer STARTTLS, continuing unencrypted");
            }
        }

        trace_step(SessionStep::Authenticate);
        let mechanism = AuthMechanism::for_account(&config.account);
        let credentials = Credentials::new(config.account.trim(), config.token.clone());
        capabilities
            .require_auth()
            .and_then(|_| Authenticator::check_channel(mechanism, transport.is_tls(), config.is_local_server()))
            .map_err(|e| e.in_step(SmtpErrorKind::Authentication, "authentication failed"))?;
        auth::authenticate(transport, mechanism, &credentials)
            .await
            .map_err(|e| e.in_step(SmtpErrorKind::Authentication, "authentication failed"))?;

        trace_step(SessionStep::SetSender);
        transport
            .send_command(&SmtpCommand::MailFrom {
                address: message.from.clone(),
            })
            .await
            .and_then(|r| r.expect_success())
            .map_err(|e| e.in_step(SmtpErrorKind::SenderRejected, format!("failed to set sender {}", message.from)))?;

        trace_step(SessionStep::SetRecipients);
        for recipient in &message.recipients {
            transport
                .send_command(&SmtpCommand::RcptTo {
                    address: recipient.clone(),
                })
                .await
                .and_then(|r| r.expect_success())
                .map_err(|e| {
                    e.in_step(SmtpErrorKind::RecipientRejected, format!("failed to add recipient {}", recipient))
                })?;
        }

        trace_step(SessionStep::WriteBody);
        transport
            .send_command(&SmtpCommand::Data)
            .await
            .and_then(|r| r.expect_code(codes::START_MAIL_INPUT))
            .map_err(|e| e.in_step(SmtpErrorKind::Data, "failed to get data writer"))?;
        transport
            .send_data(&message.data_payload())
            .await
            .map_err(|e| e.in_step(SmtpErrorKind::Data, "failed to write email content"))?;
        transport
            .send_data(b".\r\n")
            .await
            .map_err(|e| e.in_step(SmtpErrorKind::Data, "failed to close data writer"))?;
        let accepted = transport
            .read_response()
            .await
            .and_then(|r| r.expect_success())
            .map_err(|e| e.in_step(SmtpErrorKind::Data, "failed to close data writer"))?;

        trace_step(SessionStep::Quit);
        transport
            .send_command(&SmtpCommand::Quit)
            .await
            .and_then(|r| r.expect_code(codes::SERVICE_CLOSING))
            .map_err(|e| e.in_step(SmtpErrorKind::Quit, "failed to quit SMTP session"))?;

        trace_step(SessionStep::Done);
        Ok(SendReceipt {
            message_id: message.message_id.clone(),
            accepted: message.recipients.clone(),
            tls: transport.is_tls(),
            mechanism,
            response: accepted.full_message(),
            duration: Duration::ZERO,
        })
    }
}

/// EHLO, falling back to HELO for servers without ESMTP.
async fn hello(transport: &mut dyn SmtpTransport, client_id: &str) -> SmtpResult<EsmtpCapabilities> {
    let response = transport.send_command(&SmtpCommand::Ehlo(client_id.to_string())).await?;
    if response.is_success() {
        return Ok(EsmtpCapabilities::from_ehlo_response(&response));
    }

    transport
        .send_command(&SmtpCommand::Helo(client_id.to_string()))
        .await?
        .expect_success()?;
    Ok(EsmtpCapabilities::default())
}

/// STARTTLS, the in-place upgrade, and the EHLO that must follow it.
async fn start_tls(transport: &mut dyn SmtpTransport, client_id: &str) -> SmtpResult<EsmtpCapabilities> {
    transport
        .send_command(&SmtpCommand::StartTls)
        .await?
        .expect_code(codes::SERVICE_READY)?;
    transport.upgrade_tls().await?;
    hello(transport, client_id).await
}

fn trace_step(_step: SessionStep) {
    #[cfg(feature = "tracing")]
    tracing::debug!(step = %_step, "SMTP session step");
}
