//! Configuration types for the mailer.
//!
//! Provides the mailer settings with a builder, TLS options, environment
//! loading and the transport security decision.

use std::path::PathBuf;
use std::time::Duration;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::{SmtpError, SmtpResult};
use crate::message::check_line;

/// Default SMTP port (submission with STARTTLS).
pub const DEFAULT_PORT: u16 = 587;

/// Port conventionally used for implicit TLS (SMTPS).
pub const IMPLICIT_TLS_PORT: u16 = 465;

/// Default timeout for connections and the TLS handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for each command/reply exchange.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// How the session is secured, decided from port and flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    /// TLS before any SMTP exchange.
    ImplicitTls,
    /// Plaintext first, upgraded with STARTTLS when the server offers it.
    Opportunistic,
}

/// TLS configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Skip certificate and hostname verification. Testing only.
    #[serde(default)]
    pub accept_invalid_certs: bool,
    /// Extra PEM bundle trusted in addition to the webpki roots.
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,
}

impl TlsConfig {
    /// Creates a TLS config that skips certificate verification.
    pub fn insecure() -> Self {
        Self {
            accept_invalid_certs: true,
            ..Default::default()
        }
    }

    /// Validates the TLS configuration.
    pub fn validate(&self) -> SmtpResult<()> {
        if let Some(path) = &self.ca_cert_path {
            if path.as_os_str().is_empty() {
                return Err(SmtpError::configuration("ca_cert_path must not be empty"));
            }
        }
        Ok(())
    }
}

/// Mailer settings. Built once at startup, read on every send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailerConfig {
    /// SMTP server hostname.
    #[serde(default)]
    pub host: String,
    /// SMTP server port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Force implicit TLS regardless of port.
    #[serde(default, alias = "ssl_enabled")]
    pub implicit_tls: bool,
    /// Account used for authentication, `local@domain`.
    #[serde(default)]
    pub account: String,
    /// Credential token (serialization skipped for security).
    #[serde(default = "empty_secret", skip_serializing)]
    pub token: SecretString,
    /// Envelope and header sender; defaults to the account.
    #[serde(default)]
    pub from: Option<String>,
    /// Display name used in the `From` header.
    #[serde(default)]
    pub system_name: String,
    /// TLS configuration.
    #[serde(default)]
    pub tls: TlsConfig,
    /// Connect and TLS handshake timeout.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Per-command timeout.
    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,
    /// Client identifier for EHLO.
    #[serde(default)]
    pub client_id: Option<String>,
}

fn default_port() -> u16 { DEFAULT_PORT }
fn default_connect_timeout() -> Duration { DEFAULT_CONNECT_TIMEOUT }
fn default_command_timeout() -> Duration { DEFAULT_COMMAND_TIMEOUT }
fn empty_secret() -> SecretString { SecretString::new(String::new()) }

impl MailerConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> MailerConfigBuilder {
        MailerConfigBuilder::default()
    }

    /// Creates a configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SMTP_SERVER`, `SMTP_ACCOUNT` (required)
    /// - `SMTP_PORT` (default 587)
    /// - `SMTP_TOKEN`, `SMTP_FROM`, `SMTP_SYSTEM_NAME`
    /// - `SMTP_SSL_ENABLED`: force implicit TLS
    /// - `SMTP_CONNECT_TIMEOUT`, `SMTP_COMMAND_TIMEOUT`: humantime, e.g. `10s`
    /// - `SMTP_INSECURE_SKIP_VERIFY`: disable certificate checks
    /// - `SMTP_CA_CERT`: extra PEM bundle
    pub fn from_env() -> SmtpResult<Self> {
        let mut builder = MailerConfigBuilder::default();

        if let Ok(host) = std::env::var("SMTP_SERVER") {
            builder = builder.host(host);
        }
        if let Ok(port) = std::env::var("SMTP_PORT") {
            let port = port
                .trim()
                .parse::<u16>()
                .map_err(|e| SmtpError::configuration(format!("Invalid SMTP_PORT: {}", e)).with_cause(e))?;
            builder = builder.port(port);
        }
        if let Ok(account) = std::env::var("SMTP_ACCOUNT") {
            builder = builder.account(account);
        }
        if let Ok(token) = std::env::var("SMTP_TOKEN") {
            builder = builder.token(token);
        }
        if let Ok(from) = std::env::var("SMTP_FROM") {
            if !from.is_empty() {
                builder = builder.from(from);
            }
        }
        if let Ok(name) = std::env::var("SMTP_SYSTEM_NAME") {
            builder = builder.system_name(name);
        }
        if let Ok(val) = std::env::var("SMTP_SSL_ENABLED") {
            builder = builder.implicit_tls(parse_flag(&val));
        }
        if let Ok(val) = std::env::var("SMTP_CONNECT_TIMEOUT") {
            builder = builder.connect_timeout(parse_duration("SMTP_CONNECT_TIMEOUT", &val)?);
        }
        if let Ok(val) = std::env::var("SMTP_COMMAND_TIMEOUT") {
            builder = builder.command_timeout(parse_duration("SMTP_COMMAND_TIMEOUT", &val)?);
        }
        if let Ok(val) = std::env::var("SMTP_INSECURE_SKIP_VERIFY") {
            builder = builder.accept_invalid_certs(parse_flag(&val));
        }
        if let Ok(path) = std::env::var("SMTP_CA_CERT") {
            builder = builder.ca_cert_path(path);
        }

        builder.build()
    }

    /// Validates the configuration. Runs before any network I/O.
    pub fn validate(&self) -> SmtpResult<()> {
        if self.host.trim().is_empty() || self.account.trim().is_empty() {
            return Err(SmtpError::configuration("SMTP server or account not configured"));
        }

        if self.port == 0 {
            return Err(SmtpError::configuration("Port must be non-zero"));
        }

        self.account_domain()?;
        check_line("Account", &self.account)?;
        if let Some(from) = &self.from {
            check_line("Sender", from)?;
        }
        if let Some(client_id) = &self.client_id {
            if client_id.trim().is_empty() {
                return Err(SmtpError::configuration("Client id must not be empty"));
            }
            check_line("Client id", client_id)?;
        }

        if self.connect_timeout.is_zero() || self.command_timeout.is_zero() {
            return Err(SmtpError::configuration("Timeouts must be non-zero"));
        }

        self.tls.validate()
    }

    /// Returns the full server address. IPv6 literals are bracketed.
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Returns the transport security mode for this configuration.
    pub fn security(&self) -> SecurityMode {
        if self.port == IMPLICIT_TLS_PORT || self.implicit_tls {
            SecurityMode::ImplicitTls
        } else {
            SecurityMode::Opportunistic
        }
    }

    /// Returns the sender address, falling back to the account.
    pub fn from_address(&self) -> &str {
        match self.from.as_deref() {
            Some(from) if !from.trim().is_empty() => from.trim(),
            _ => self.account.trim(),
        }
    }

    /// Returns the domain half of the account.
    pub fn account_domain(&self) -> SmtpResult<&str> {
        let account = self.account.trim();
        let mut parts = account.split('@');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(local), Some(domain), None) if !local.is_empty() && !domain.is_empty() => Ok(domain),
            _ => Err(SmtpError::configuration(format!(
                "Account must contain exactly one '@': {}",
                account
            ))),
        }
    }

    /// Returns the client identifier for EHLO.
    pub fn client_id(&self) -> &str {
        self.client_id.as_deref().unwrap_or("localhost")
    }

    /// Returns true when the server is on the loopback interface.
    pub fn is_local_server(&self) -> bool {
        matches!(self.host.as_str(), "localhost" | "127.0.0.1" | "::1" | "[::1]")
    }
}

/// Builder for mailer configuration.
#[derive(Debug, Default)]
pub struct MailerConfigBuilder {
    host: Option<String>,
    port: u16,
    implicit_tls: bool,
    account: Option<String>,
    token: Option<SecretString>,
    from: Option<String>,
    system_name: Option<String>,
    tls: TlsConfig,
    connect_timeout: Duration,
    command_timeout: Duration,
    client_id: Option<String>,
}

impl MailerConfigBuilder {
    /// Sets the SMTP server host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the SMTP server port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Forces implicit TLS.
    pub fn implicit_tls(mut self, enabled: bool) -> Self {
        self.implicit_tls = enabled;
        self
    }

    /// Sets the account and token together.
    pub fn credentials(mut self, account: impl Into<String>, token: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self.token = Some(SecretString::new(token.into()));
        self
    }

    /// Sets the account.
    pub fn account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    /// Sets the credential token.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(SecretString::new(token.into()));
        self
    }

    /// Sets a sender distinct from the account.
    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Sets the display name for the `From` header.
    pub fn system_name(mut self, name: impl Into<String>) -> Self {
        self.system_name = Some(name.into());
        self
    }

    /// Sets the TLS configuration.
    pub fn tls(mut self, config: TlsConfig) -> Self {
        self.tls = config;
        self
    }

    /// Sets whether to accept invalid certificates (testing only).
    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.tls.accept_invalid_certs = accept;
        self
    }

    /// Sets an extra CA bundle.
    pub fn ca_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.tls.ca_cert_path = Some(path.into());
        self
    }

    /// Sets connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets command timeout.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Sets the client identifier for EHLO.
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> SmtpResult<MailerConfig> {
        let config = MailerConfig {
            host: self.host.unwrap_or_default(),
            port: if self.port == 0 { DEFAULT_PORT } else { self.port },
            implicit_tls: self.implicit_tls,
            account: self.account.unwrap_or_default(),
            token: self.token.unwrap_or_else(empty_secret),
            from: self.from,
            system_name: self.system_name.unwrap_or_default(),
            tls: self.tls,
            connect_timeout: if self.connect_timeout.is_zero() {
                DEFAULT_CONNECT_TIMEOUT
            } else {
                self.connect_timeout
            },
            command_timeout: if self.command_timeout.is_zero() {
                DEFAULT_COMMAND_TIMEOUT
            } else {
                self.command_timeout
            },
            client_id: self.client_id,
        };

        config.validate()?;
        Ok(config)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn parse_duration(name: &str, value: &str) -> SmtpResult<Duration> {
    humantime::parse_duration(value.trim())
        .map_err(|e| SmtpError::configuration(format!("Invalid {}: {}", name, e)).with_cause(e))
}

// Humantime serde support
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn config() -> MailerConfig {
        MailerConfig::builder()
            .host("smtp.example.com")
            .credentials("noreply@example.com", "token")
            .build()
            .unwrap()
    }

    #[test]
    fn test_config_builder() {
        let config = MailerConfig::builder()
            .host("smtp.example.com")
            .port(2525)
            .credentials("noreply@example.com", "secret")
            .system_name("Status Bot")
            .build()
            .unwrap();

        assert_eq!(config.host, "smtp.example.com");
        assert_eq!(config.port, 2525);
        assert_eq!(config.token.expose_secret(), "secret");
        assert_eq!(config.address(), "smtp.example.com:2525");
    }

    #[test]
    fn test_config_defaults() {
        let config = config();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.command_timeout, DEFAULT_COMMAND_TIMEOUT);
        assert!(!config.tls.accept_invalid_certs);
        assert_eq!(config.client_id(), "localhost");
    }

    #[test]
    fn test_from_defaults_to_account() {
        let mut config = config();
        assert_eq!(config.from_address(), "noreply@example.com");

        config.from = Some(String::new());
        assert_eq!(config.from_address(), "noreply@example.com");

        config.from = Some("alerts@example.com".to_string());
        assert_eq!(config.from_address(), "alerts@example.com");
    }

    #[test]
    fn test_security_mode() {
        let mut config = config();
        assert_eq!(config.security(), SecurityMode::Opportunistic);

        config.port = IMPLICIT_TLS_PORT;
        assert_eq!(config.security(), SecurityMode::ImplicitTls);

        config.port = 587;
        config.implicit_tls = true;
        assert_eq!(config.security(), SecurityMode::ImplicitTls);
    }

    #[test]
    fn test_config_validation() {
        assert!(MailerConfig::builder().account("a@b.c").build().is_err());

        let mut config = config();
        config.host = String::new();
        assert!(config.validate().unwrap_err().kind().is_local());

        let mut config = self::config();
        config.account = "   ".to_string();
        assert!(config.validate().is_err());

        let mut config = self::config();
        config.account = "no-at-sign".to_string();
        assert!(config.validate().is_err());

        let mut config = self::config();
        config.account = "a@b@c".to_string();
        assert!(config.validate().is_err());

        let mut config = self::config();
        config.client_id = Some("mx.local\r\nMAIL FROM:<x@y>".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.message().starts_with("Client id"));

        let mut config = self::config();
        config.from = Some("a@b.c\nRSET".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_account_domain() {
        assert_eq!(config().account_domain().unwrap(), "example.com");
    }

    #[test]
    fn test_deserialize() {
        let config: MailerConfig = serde_json::from_str(
            r#"{
                "host": "smtp.office365.com",
                "port": 465,
                "account": "ops@contoso.onmicrosoft.com",
                "token": "hunter2",
                "system_name": "Ops",
                "connect_timeout": "5s",
                "command_timeout": "1m"
            }"#,
        )
        .unwrap();

        assert_eq!(config.security(), SecurityMode::ImplicitTls);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.command_timeout, Duration::from_secs(60));
        assert_eq!(config.token.expose_secret(), "hunter2");
        config.validate().unwrap();

        let serialized = serde_json::to_string(&config).unwrap();
        assert!(!serialized.contains("hunter2"));
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("TRUE"));
        assert!(parse_flag(" 1 "));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(""));
    }

    #[test]
    fn test_loopback_detection() {
        let mut config = config();
        assert!(!config.is_local_server());
        config.host = "127.0.0.1".to_string();
        assert!(config.is_local_server());
        config.host = "::1".to_string();
        assert!(config.is_local_server());
    }

    #[test]
    fn test_address_brackets_ipv6() {
        let mut config = config();
        assert_eq!(config.address(), "smtp.example.com:587");

        config.host = "::1".to_string();
        assert_eq!(config.address(), "[::1]:587");
        assert!(config.address().parse::<std::net::SocketAddr>().is_ok());

        config.host = "[2001:db8::1]".to_string();
        assert_eq!(config.address(), "[2001:db8::1]:587");
    }
}
