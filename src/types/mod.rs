//! Result types for the mailer.

use std::fmt;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::auth::AuthMechanism;

/// Steps of one send, in order. Any step may end in failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStep {
    /// Validating settings and composing the message.
    Init,
    /// Opening the connection and greeting the server.
    Connect,
    /// STARTTLS upgrade.
    TlsUpgrade,
    /// AUTH exchange.
    Authenticate,
    /// MAIL FROM.
    SetSender,
    /// RCPT TO for every recipient.
    SetRecipients,
    /// DATA and body transfer.
    WriteBody,
    /// QUIT.
    Quit,
    /// Message accepted and session ended.
    Done,
}

impl fmt::Display for SessionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStep::Init => "init",
            SessionStep::Connect => "connect",
            SessionStep::TlsUpgrade => "tls_upgrade",
            SessionStep::Authenticate => "authenticate",
            SessionStep::SetSender => "set_sender",
            SessionStep::SetRecipients => "set_recipients",
            SessionStep::WriteBody => "write_body",
            SessionStep::Quit => "quit",
            SessionStep::Done => "done",
        };
        f.write_str(name)
    }
}

/// What the server accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Generated Message-ID, angle brackets included.
    pub message_id: String,
    /// Recipients accepted by RCPT TO.
    pub accepted: Vec<String>,
    /// Whether the session ran over TLS.
    pub tls: bool,
    /// Mechanism used to authenticate.
    pub mechanism: AuthMechanism,
    /// Server reply to the end of DATA.
    pub response: String,
    /// Wall time from connect to QUIT.
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_display() {
        assert_eq!(SessionStep::SetRecipients.to_string(), "set_recipients");
        assert_eq!(SessionStep::Done.to_string(), "done");
    }

    #[test]
    fn test_receipt_serializes_duration_as_millis() {
        let receipt = SendReceipt {
            message_id: "<1.abc@example.com>".to_string(),
            accepted: vec!["a@x.com".to_string()],
            tls: true,
            mechanism: AuthMechanism::Plain,
            response: "2.0.0 queued".to_string(),
            duration: Duration::from_millis(1500),
        };
        let json = serde_json::to_value(&receipt).unwrap();
        assert_eq!(json["duration"], 1500);
        assert_eq!(json["mechanism"], "plain");
    }
}
