//! Transport layer for SMTP connections.
//!
//! Provides the transport abstraction the send sequence runs against, a
//! TCP implementation with optional TLS, and the connector that opens it.

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::{MailerConfig, SecurityMode, TlsConfig};
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::protocol::{codes, SmtpCommand, SmtpResponse};

#[cfg(feature = "rustls-tls")]
mod tls;

/// Trait for SMTP transport abstraction.
#[async_trait]
pub trait SmtpTransport: Send + fmt::Debug {
    /// Sends a command and receives a response.
    async fn send_command(&mut self, command: &SmtpCommand) -> SmtpResult<SmtpResponse>;

    /// Sends raw data (for DATA command body).
    async fn send_data(&mut self, data: &[u8]) -> SmtpResult<()>;

    /// Reads a response from the server.
    async fn read_response(&mut self) -> SmtpResult<SmtpResponse>;

    /// Upgrades the connection to TLS in place (after STARTTLS).
    async fn upgrade_tls(&mut self) -> SmtpResult<()>;

    /// Returns true if TLS is enabled.
    fn is_tls(&self) -> bool;

    /// Releases the connection. Safe to call more than once.
    async fn close(&mut self) -> SmtpResult<()>;
}

/// Opens transports. The seam the send sequence is tested through.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    /// Connects according to the configured security mode and reads the
    /// server greeting.
    async fn connect(&self, config: &MailerConfig) -> SmtpResult<Box<dyn SmtpTransport>>;
}

/// Connector for real TCP (and TLS) sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, config: &MailerConfig) -> SmtpResult<Box<dyn SmtpTransport>> {
        Ok(Box::new(TcpTransport::connect(config).await?))
    }
}

/// TCP connection with optional TLS.
pub struct TcpTransport {
    /// Read/write stream; `None` once closed.
    stream: Option<TransportStream>,
    /// Command timeout.
    command_timeout: Duration,
    /// Connect / handshake timeout.
    connect_timeout: Duration,
    /// TLS settings for a later STARTTLS.
    tls_config: TlsConfig,
    /// TLS enabled flag.
    tls_enabled: bool,
    /// Server host.
    host: String,
}

/// Stream type that can be plain TCP or TLS.
enum TransportStream {
    Plain(BufReader<TcpStream>),
    #[cfg(feature = "rustls-tls")]
    Tls(Box<BufReader<tokio_rustls::client::TlsStream<TcpStream>>>),
}

impl TransportStream {
    async fn read_line(&mut self, buf: &mut String) -> io::Result<usize> {
        match self {
            TransportStream::Plain(reader) => reader.read_line(buf).await,
            #[cfg(feature = "rustls-tls")]
            TransportStream::Tls(reader) => reader.read_line(buf).await,
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            TransportStream::Plain(reader) => {
                reader.get_mut().write_all(data).await?;
                reader.get_mut().flush().await
            }
            #[cfg(feature = "rustls-tls")]
            TransportStream::Tls(reader) => {
                reader.get_mut().write_all(data).await?;
                reader.get_mut().flush().await
            }
        }
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        match self {
            TransportStream::Plain(reader) => reader.get_mut().shutdown().await,
            #[cfg(feature = "rustls-tls")]
            TransportStream::Tls(reader) => reader.get_mut().shutdown().await,
        }
    }
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("host", &self.host)
            .field("tls_enabled", &self.tls_enabled)
            .field("open", &self.stream.is_some())
            .finish()
    }
}

impl TcpTransport {
    /// Connects to an SMTP server and reads its greeting.
    ///
    /// With [`SecurityMode::ImplicitTls`] the TLS handshake happens before
    /// the greeting.
    pub async fn connect(config: &MailerConfig) -> SmtpResult<Self> {
        let address = config.address();

        let stream = timeout(config.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| SmtpError::timeout(SmtpErrorKind::ConnectTimeout, format!("Connect to {} timed out", address)))?
            .map_err(|e| Self::map_io_error(e, &address))?;

        // Set TCP options
        stream.set_nodelay(true).ok();

        let mut transport = Self {
            stream: Some(TransportStream::Plain(BufReader::new(stream))),
            command_timeout: config.command_timeout,
            connect_timeout: config.connect_timeout,
            tls_config: config.tls.clone(),
            tls_enabled: false,
            host: config.host.clone(),
        };

        if config.security() == SecurityMode::ImplicitTls {
            if let Err(e) = transport.handshake().await {
                transport.close().await.ok();
                return Err(e);
            }
        }

        #[cfg(feature = "tracing")]
        tracing::info!(address = %address, tls = transport.tls_enabled, "Connected to SMTP server");

        let greeting = match transport.read_response().await {
            Ok(greeting) => greeting,
            Err(e) => {
                transport.close().await.ok();
                return Err(e.in_step(SmtpErrorKind::Connection, "failed to read server greeting"));
            }
        };
        if greeting.code != codes::SERVICE_READY {
            transport.close().await.ok();
            return Err(greeting
                .to_error()
                .in_step(SmtpErrorKind::Connection, "server rejected connection"));
        }

        Ok(transport)
    }

    /// Maps IO errors to SMTP errors.
    fn map_io_error(error: io::Error, address: &str) -> SmtpError {
        let message = match error.kind() {
            io::ErrorKind::ConnectionRefused => format!("Connection refused to {}", address),
            io::ErrorKind::TimedOut => {
                return SmtpError::timeout(SmtpErrorKind::ConnectTimeout, format!("Connect to {} timed out", address))
                    .with_cause(error)
            }
            _ => format!("Failed to connect to {}", address),
        };
        SmtpError::connection(message).with_cause(error)
    }

    /// Replaces the plain stream with a TLS stream.
    async fn handshake(&mut self) -> SmtpResult<()> {
        #[cfg(feature = "rustls-tls")]
        {
            let connector = tls::connector(&self.tls_config)?;
            let server_name = tls::server_name(&self.host)?;

            let tcp_stream = match self.stream.take() {
                Some(TransportStream::Plain(reader)) => reader.into_inner(),
                Some(other) => {
                    self.stream = Some(other);
                    return Err(SmtpError::tls("Already using TLS"));
                }
                None => return Err(SmtpError::connection("Connection is closed")),
            };

            let tls_stream = timeout(self.connect_timeout, connector.connect(server_name, tcp_stream))
                .await
                .map_err(|_| SmtpError::timeout(SmtpErrorKind::ConnectTimeout, "TLS handshake timed out"))?
                .map_err(|e| SmtpError::tls(format!("TLS handshake with {} failed", self.host)).with_cause(e))?;

            self.stream = Some(TransportStream::Tls(Box::new(BufReader::new(tls_stream))));
            self.tls_enabled = true;

            #[cfg(feature = "tracing")]
            tracing::info!(host = %self.host, "TLS established");

            Ok(())
        }

        #[cfg(not(feature = "rustls-tls"))]
        {
            Err(SmtpError::configuration("No TLS implementation available"))
        }
    }

    fn stream(&mut self) -> SmtpResult<&mut TransportStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| SmtpError::connection("Connection is closed"))
    }

    async fn write_all(&mut self, data: &[u8]) -> SmtpResult<()> {
        let timeout_duration = self.command_timeout;
        let stream = self.stream()?;
        timeout(timeout_duration, stream.write_all(data))
            .await
            .map_err(|_| SmtpError::timeout(SmtpErrorKind::WriteTimeout, "Write timed out"))?
            .map_err(|e| SmtpError::connection("Write error").with_cause(e))
    }
}

#[async_trait]
impl SmtpTransport for TcpTransport {
    async fn send_command(&mut self, command: &SmtpCommand) -> SmtpResult<SmtpResponse> {
        let cmd_str = format!("{}\r\n", command.to_smtp_string());

        #[cfg(feature = "tracing")]
        tracing::debug!(command = %command, "Sending SMTP command");

        self.write_all(cmd_str.as_bytes()).await?;
        self.read_response().await
    }

    async fn send_data(&mut self, data: &[u8]) -> SmtpResult<()> {
        self.write_all(data).await
    }

    async fn read_response(&mut self) -> SmtpResult<SmtpResponse> {
        let timeout_duration = self.command_timeout;
        let stream = self.stream()?;
        let mut lines = Vec::new();

        loop {
            let mut line = String::new();

            let read = timeout(timeout_duration, stream.read_line(&mut line))
                .await
                .map_err(|_| SmtpError::timeout(SmtpErrorKind::ReadTimeout, "Read timed out"))?
                .map_err(|e| SmtpError::connection("Read error").with_cause(e))?;

            if read == 0 {
                return Err(SmtpError::connection("Server closed connection"));
            }

            let line = line.trim_end().to_string();

            // Check for continuation (code-hyphen)
            let is_continuation = line.as_bytes().get(3) == Some(&b'-');
            lines.push(line);

            if !is_continuation {
                break;
            }
        }

        let response = SmtpResponse::parse(&lines)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(code = response.code, message = %response.first_message(), "Received SMTP response");

        Ok(response)
    }

    async fn upgrade_tls(&mut self) -> SmtpResult<()> {
        if self.tls_enabled {
            return Ok(());
        }
        self.handshake().await
    }

    fn is_tls(&self) -> bool {
        self.tls_enabled
    }

    async fn close(&mut self) -> SmtpResult<()> {
        if let Some(mut stream) = self.stream.take() {
            // The peer may already be gone after QUIT.
            let _ = stream.shutdown().await;

            #[cfg(feature = "tracing")]
            tracing::debug!(host = %self.host, "Connection closed");
        }
        Ok(())
    }
}
