//! Authentication for the mailer.
//!
//! The mechanism is picked from the account, not negotiated:
//! - LOGIN for Outlook / Microsoft 365 accounts
//! - PLAIN (RFC 4616) for everything else

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::protocol::{codes, SmtpCommand};
use crate::transport::SmtpTransport;

/// Mail providers that need special handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MailProvider {
    /// outlook.com, hotmail via Outlook, and `*.onmicrosoft.com` tenants.
    Outlook,
    /// Any other provider.
    Generic,
}

impl MailProvider {
    /// Classifies an account identifier.
    pub fn classify(account: &str) -> Self {
        let account = account.to_ascii_lowercase();
        if account.contains("outlook") || account.contains("onmicrosoft") {
            MailProvider::Outlook
        } else {
            MailProvider::Generic
        }
    }
}

/// Authentication mechanisms supported by the mailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMechanism {
    /// PLAIN authentication (RFC 4616).
    Plain,
    /// LOGIN challenge-response.
    Login,
}

impl AuthMechanism {
    /// Returns the mechanism for an account.
    pub fn for_account(account: &str) -> Self {
        match MailProvider::classify(account) {
            MailProvider::Outlook => AuthMechanism::Login,
            MailProvider::Generic => AuthMechanism::Plain,
        }
    }

    /// Returns the SMTP AUTH mechanism name.
    pub fn mechanism_name(&self) -> &'static str {
        match self {
            AuthMechanism::Plain => "PLAIN",
            AuthMechanism::Login => "LOGIN",
        }
    }

    /// Parses from an EHLO capability token.
    pub fn from_capability(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLAIN" => Some(AuthMechanism::Plain),
            "LOGIN" => Some(AuthMechanism::Login),
            _ => None,
        }
    }
}

impl fmt::Display for AuthMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mechanism_name())
    }
}

/// Account and token.
#[derive(Clone)]
pub struct Credentials {
    /// Username, usually the account address.
    pub username: String,
    /// Password or app token (protected).
    pub password: SecretString,
}

impl Credentials {
    /// Creates credentials.
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// SASL payload encoding.
pub struct Authenticator;

impl Authenticator {
    /// Generates the initial response for PLAIN authentication.
    pub fn plain_initial_response(username: &str, password: &SecretString) -> String {
        // Format: \0username\0password
        let response = format!("\0{}\0{}", username, password.expose_secret());
        BASE64.encode(response)
    }

    /// Answers one LOGIN prompt. The server sends `Username:` and
    /// `Password:`, both base64 encoded.
    pub fn login_response(challenge: &str, credentials: &Credentials) -> SmtpResult<String> {
        let decoded = BASE64.decode(challenge.trim()).map_err(|e| {
            SmtpError::authentication(format!("Undecodable LOGIN prompt: {}", challenge)).with_cause(e)
        })?;
        let prompt = String::from_utf8_lossy(&decoded);

        match prompt.trim().to_ascii_lowercase().as_str() {
            "username:" => Ok(BASE64.encode(&credentials.username)),
            "password:" => Ok(BASE64.encode(credentials.password.expose_secret())),
            _ => Err(SmtpError::authentication(format!(
                "Unknown LOGIN prompt from server: {}",
                prompt
            ))),
        }
    }

    /// Refuses PLAIN in clear text to anything but loopback.
    ///
    /// LOGIN is answered on any channel; Outlook servers that skip
    /// STARTTLS still get credentials.
    pub fn check_channel(mechanism: AuthMechanism, tls_active: bool, local_server: bool) -> SmtpResult<()> {
        if mechanism == AuthMechanism::Login || tls_active || local_server {
            Ok(())
        } else {
            Err(SmtpError::authentication(format!(
                "Refusing {} authentication over an unencrypted connection",
                mechanism
            )))
        }
    }
}

/// Runs the AUTH exchange for `mechanism` on an established session.
pub async fn authenticate(
    transport: &mut dyn SmtpTransport,
    mechanism: AuthMechanism,
    credentials: &Credentials,
) -> SmtpResult<()> {
    match mechanism {
        AuthMechanism::Plain => auth_plain(transport, credentials).await,
        AuthMechanism::Login => auth_login(transport, credentials).await,
    }
}

async fn auth_plain(transport: &mut dyn SmtpTransport, credentials: &Credentials) -> SmtpResult<()> {
    let initial_response = Authenticator::plain_initial_response(&credentials.username, &credentials.password);
    let command = SmtpCommand::Auth {
        mechanism: AuthMechanism::Plain,
        initial_response: Some(initial_response),
    };

    transport
        .send_command(&command)
        .await?
        .expect_code(codes::AUTH_SUCCESS)
        .map(|_| ())
}

async fn auth_login(transport: &mut dyn SmtpTransport, credentials: &Credentials) -> SmtpResult<()> {
    let command = SmtpCommand::Auth {
        mechanism: AuthMechanism::Login,
        initial_response: None,
    };
    let mut response = transport.send_command(&command).await?;

    // Username, then password; a well-behaved server finishes in two rounds.
    for _ in 0..2 {
        if response.code != codes::AUTH_CONTINUE {
            break;
        }
        let answer = Authenticator::login_response(response.first_message(), credentials)?;
        response = transport.send_command(&SmtpCommand::AuthContinue(answer)).await?;
    }

    match response.code {
        codes::AUTH_SUCCESS => Ok(()),
        codes::AUTH_CONTINUE => Err(SmtpError::new(
            SmtpErrorKind::Authentication,
            "Server kept prompting after username and password",
        )),
        _ => Err(response.to_error()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockTransport;
    use crate::protocol::SmtpResponse;
    use rstest::rstest;

    fn credentials() -> Credentials {
        Credentials::new("ops@contoso.onmicrosoft.com", SecretString::new("s3cret".to_string()))
    }

    #[rstest]
    #[case("alerts@outlook.com", MailProvider::Outlook)]
    #[case("ops@contoso.onmicrosoft.com", MailProvider::Outlook)]
    #[case("Someone@OUTLOOK.COM", MailProvider::Outlook)]
    #[case("noreply@gmail.com", MailProvider::Generic)]
    #[case("bot@qq.com", MailProvider::Generic)]
    #[case("hotmail-user@hotmail.com", MailProvider::Generic)]
    fn test_provider_classification(#[case] account: &str, #[case] expected: MailProvider) {
        assert_eq!(MailProvider::classify(account), expected);
    }

    #[test]
    fn test_mechanism_for_account() {
        assert_eq!(AuthMechanism::for_account("a@outlook.com"), AuthMechanism::Login);
        assert_eq!(AuthMechanism::for_account("a@example.com"), AuthMechanism::Plain);
    }

    #[test]
    fn test_mechanism_from_capability() {
        assert_eq!(AuthMechanism::from_capability("plain"), Some(AuthMechanism::Plain));
        assert_eq!(AuthMechanism::from_capability("LOGIN"), Some(AuthMechanism::Login));
        assert_eq!(AuthMechanism::from_capability("XOAUTH2"), None);
    }

    #[test]
    fn test_plain_initial_response() {
        let password = SecretString::new("password".to_string());
        let response = Authenticator::plain_initial_response("user", &password);
        let decoded = BASE64.decode(&response).unwrap();
        assert_eq!(decoded, b"\0user\0password");
    }

    #[test]
    fn test_login_response() {
        let creds = credentials();
        let user = Authenticator::login_response("VXNlcm5hbWU6", &creds).unwrap();
        assert_eq!(BASE64.decode(user).unwrap(), creds.username.as_bytes());

        let pass = Authenticator::login_response("UGFzc3dvcmQ6", &creds).unwrap();
        assert_eq!(BASE64.decode(pass).unwrap(), b"s3cret");

        let err = Authenticator::login_response(&BASE64.encode("Realm:"), &creds).unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::Authentication);
        assert!(Authenticator::login_response("not base64!", &creds).is_err());
    }

    #[test]
    fn test_check_channel() {
        assert!(Authenticator::check_channel(AuthMechanism::Plain, true, false).is_ok());
        assert!(Authenticator::check_channel(AuthMechanism::Plain, false, true).is_ok());
        let err = Authenticator::check_channel(AuthMechanism::Plain, false, false).unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::Authentication);
        assert!(Authenticator::check_channel(AuthMechanism::Login, false, false).is_ok());
    }

    #[test]
    fn test_credentials_debug() {
        let debug_str = format!("{:?}", credentials());
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("s3cret"));
    }

    #[tokio::test]
    async fn test_auth_plain_exchange() {
        let mut transport = MockTransport::new();
        transport.queue_response(SmtpResponse::new(codes::AUTH_SUCCESS, "2.7.0 Accepted"));

        authenticate(&mut transport, AuthMechanism::Plain, &credentials()).await.unwrap();

        let commands = transport.recorded_commands();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].to_smtp_string().starts_with("AUTH PLAIN "));
    }

    #[tokio::test]
    async fn test_auth_login_exchange() {
        let mut transport = MockTransport::new();
        transport
            .queue_response(SmtpResponse::new(codes::AUTH_CONTINUE, "VXNlcm5hbWU6"))
            .queue_response(SmtpResponse::new(codes::AUTH_CONTINUE, "UGFzc3dvcmQ6"))
            .queue_response(SmtpResponse::new(codes::AUTH_SUCCESS, "OK"));

        authenticate(&mut transport, AuthMechanism::Login, &credentials()).await.unwrap();

        let commands = transport.recorded_commands();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0].to_smtp_string(), "AUTH LOGIN");
        assert_eq!(
            commands[2],
            SmtpCommand::AuthContinue(BASE64.encode("s3cret"))
        );
    }

    #[tokio::test]
    async fn test_auth_rejected() {
        let mut transport = MockTransport::new();
        transport.queue_response(SmtpResponse::new(codes::AUTH_FAILED, "5.7.8 Bad credentials"));

        let err = authenticate(&mut transport, AuthMechanism::Plain, &credentials())
            .await
            .unwrap_err();
        assert_eq!(err.smtp_code(), Some(codes::AUTH_FAILED));
    }
}
