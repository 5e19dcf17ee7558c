//! Mock implementations for testing.
//!
//! Scripted transport and connector for London-School TDD. Clones of a
//! [`MockTransport`] share state, so a test keeps a handle after the
//! connector hands a boxed copy to the mailer.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::{MailerConfig, SecurityMode};
use crate::errors::{SmtpError, SmtpResult};
use crate::protocol::{codes, SmtpCommand, SmtpResponse};
use crate::transport::{Connector, SmtpTransport};

#[derive(Debug, Default)]
struct MockState {
    commands: Vec<SmtpCommand>,
    responses: VecDeque<SmtpResponse>,
    data_received: Vec<Vec<u8>>,
    fail_next: Option<SmtpError>,
    fail_upgrade: Option<SmtpError>,
    tls_enabled: bool,
    upgrades: usize,
    close_calls: usize,
}

/// Mock SMTP transport for testing.
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    /// Returned when the queue is empty.
    default_response: SmtpResponse,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            default_response: SmtpResponse::new(codes::OK, "OK"),
        }
    }

    /// Creates a transport scripted for a complete successful send.
    pub fn happy_path(recipients: usize, starttls: bool) -> Self {
        let transport = Self::new();
        transport.queue_response(ehlo_response(starttls));
        if starttls {
            transport
                .queue_response(SmtpResponse::new(codes::SERVICE_READY, "2.0.0 Ready to start TLS"))
                .queue_response(ehlo_response(false));
        }
        transport
            .queue_response(auth_success_response())
            .queue_ok();
        for _ in 0..recipients {
            transport.queue_ok();
        }
        transport
            .queue_response(data_ready_response())
            .queue_response(SmtpResponse::new(codes::OK, "2.0.0 Ok: queued"))
            .queue_response(quit_response());
        transport
    }

    /// Queues a response.
    pub fn queue_response(&self, response: SmtpResponse) -> &Self {
        self.state.lock().unwrap().responses.push_back(response);
        self
    }

    /// Queues an OK response.
    pub fn queue_ok(&self) -> &Self {
        self.queue_response(SmtpResponse::new(codes::OK, "OK"))
    }

    /// Queues an error response.
    pub fn queue_error(&self, code: u16, message: &str) -> &Self {
        self.queue_response(SmtpResponse::new(code, message))
    }

    /// Sets the next I/O call to fail.
    pub fn fail_next_with(&self, error: SmtpError) -> &Self {
        self.state.lock().unwrap().fail_next = Some(error);
        self
    }

    /// Sets the TLS upgrade to fail.
    pub fn fail_upgrade_with(&self, error: SmtpError) -> &Self {
        self.state.lock().unwrap().fail_upgrade = Some(error);
        self
    }

    /// Sets TLS enabled, as after an implicit TLS connect.
    pub fn set_tls_enabled(&self, enabled: bool) {
        self.state.lock().unwrap().tls_enabled = enabled;
    }

    /// Returns recorded commands.
    pub fn recorded_commands(&self) -> Vec<SmtpCommand> {
        self.state.lock().unwrap().commands.clone()
    }

    /// Returns how many DATA commands were issued.
    pub fn data_commands(&self) -> usize {
        self.recorded_commands()
            .iter()
            .filter(|c| matches!(c, SmtpCommand::Data))
            .count()
    }

    /// Returns received data.
    pub fn received_data(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().data_received.clone()
    }

    /// Returns how many times `close` was called.
    pub fn close_calls(&self) -> usize {
        self.state.lock().unwrap().close_calls
    }

    /// Returns how many TLS upgrades were performed.
    pub fn upgrades(&self) -> usize {
        self.state.lock().unwrap().upgrades
    }

    fn take_failure(&self) -> Option<SmtpError> {
        self.state.lock().unwrap().fail_next.take()
    }

    fn get_next_response(&self) -> SmtpResponse {
        self.state
            .lock()
            .unwrap()
            .responses
            .pop_front()
            .unwrap_or_else(|| self.default_response.clone())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SmtpTransport for MockTransport {
    async fn send_command(&mut self, command: &SmtpCommand) -> SmtpResult<SmtpResponse> {
        if let Some(error) = self.take_failure() {
            return Err(error);
        }

        self.state.lock().unwrap().commands.push(command.clone());
        Ok(self.get_next_response())
    }

    async fn send_data(&mut self, data: &[u8]) -> SmtpResult<()> {
        if let Some(error) = self.take_failure() {
            return Err(error);
        }

        self.state.lock().unwrap().data_received.push(data.to_vec());
        Ok(())
    }

    async fn read_response(&mut self) -> SmtpResult<SmtpResponse> {
        if let Some(error) = self.take_failure() {
            return Err(error);
        }

        Ok(self.get_next_response())
    }

    async fn upgrade_tls(&mut self) -> SmtpResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.fail_upgrade.take() {
            return Err(error);
        }

        state.tls_enabled = true;
        state.upgrades += 1;
        Ok(())
    }

    fn is_tls(&self) -> bool {
        self.state.lock().unwrap().tls_enabled
    }

    async fn close(&mut self) -> SmtpResult<()> {
        self.state.lock().unwrap().close_calls += 1;
        Ok(())
    }
}

/// Connector handing out a shared [`MockTransport`].
#[derive(Debug, Default)]
pub struct MockConnector {
    transport: MockTransport,
    connects: AtomicUsize,
    last_security: Mutex<Option<SecurityMode>>,
    fail_with: Mutex<Option<SmtpError>>,
}

impl MockConnector {
    /// Creates a connector for `transport`.
    pub fn new(transport: MockTransport) -> Self {
        Self {
            transport,
            ..Default::default()
        }
    }

    /// Makes the next connect fail.
    pub fn fail_with(self, error: SmtpError) -> Self {
        *self.fail_with.lock().unwrap() = Some(error);
        self
    }

    /// Returns the number of connect attempts.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Returns the security mode of the last connect.
    pub fn last_security(&self) -> Option<SecurityMode> {
        *self.last_security.lock().unwrap()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, config: &MailerConfig) -> SmtpResult<Box<dyn SmtpTransport>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let security = config.security();
        *self.last_security.lock().unwrap() = Some(security);

        if let Some(error) = self.fail_with.lock().unwrap().take() {
            return Err(error);
        }

        if security == SecurityMode::ImplicitTls {
            self.transport.set_tls_enabled(true);
        }
        Ok(Box::new(self.transport.clone()))
    }
}

/// Creates an EHLO response, optionally advertising STARTTLS.
pub fn ehlo_response(starttls: bool) -> SmtpResponse {
    let mut message = vec![
        "smtp.example.com Hello".to_string(),
        "SIZE 10485760".to_string(),
        "AUTH PLAIN LOGIN".to_string(),
        "8BITMIME".to_string(),
    ];
    if starttls {
        message.push("STARTTLS".to_string());
    }
    SmtpResponse {
        code: codes::OK,
        enhanced_code: None,
        message,
        is_multiline: true,
    }
}

/// Creates an authentication success response.
pub fn auth_success_response() -> SmtpResponse {
    SmtpResponse::new(codes::AUTH_SUCCESS, "Authentication successful")
}

/// Creates a DATA ready response.
pub fn data_ready_response() -> SmtpResponse {
    SmtpResponse::new(codes::START_MAIL_INPUT, "Start mail input; end with <CRLF>.<CRLF>")
}

/// Creates a QUIT response.
pub fn quit_response() -> SmtpResponse {
    SmtpResponse::new(codes::SERVICE_CLOSING, "Bye")
}

/// Creates a mailer configuration pointing at a fake server.
pub fn test_config() -> MailerConfig {
    MailerConfig::builder()
        .host("smtp.example.com")
        .port(587)
        .credentials("noreply@example.com", "app-token")
        .system_name("Test System")
        .build()
        .expect("static test configuration is valid")
}
