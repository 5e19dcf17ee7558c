//! Send a Notification From the Environment
//!
//! This example demonstrates how to:
//! - Load mailer settings from `SMTP_*` environment variables
//! - Send one HTML notification to a `;`-separated recipient list
//! - Inspect the receipt or the failing step
//!
//! ```text
//! SMTP_SERVER=smtp.example.com SMTP_PORT=465 \
//! SMTP_ACCOUNT=noreply@example.com SMTP_TOKEN=app-token \
//! cargo run --example send_notification -- "ops@example.com; oncall@example.com"
//! ```

use notify_mailer::{Mailer, MailerConfig, SmtpError};

#[tokio::main]
async fn main() -> Result<(), SmtpError> {
    let receiver = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "recipient@example.com".to_string());

    let config = MailerConfig::from_env()?;
    println!("Connecting to {} ({:?})...", config.address(), config.security());

    let mailer = Mailer::new(config);
    let content = "<h1>Password reset</h1><p>Your verification code is <b>428913</b>.</p>";

    match mailer.send("Verification code", &receiver, content).await {
        Ok(receipt) => {
            println!("Email sent successfully!");
            println!("  Message ID: {}", receipt.message_id);
            println!("  Recipients: {}", receipt.accepted.join(", "));
            println!("  TLS: {}, auth: {}", receipt.tls, receipt.mechanism);
            println!("  Took: {:?}", receipt.duration);
        }
        Err(e) => {
            eprintln!("Failed to send email: {}", e);
            if let Some(code) = e.smtp_code() {
                eprintln!("  Server replied {}", code);
            }
            return Err(e);
        }
    }

    Ok(())
}
