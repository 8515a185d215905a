//! Email over authenticated SMTP (STARTTLS) using lettre's async transport.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use herald_common::types::Channel;

use super::{ChannelSender, SendError};

pub struct EmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    subject: String,
}

impl EmailSender {
    pub fn new(
        transport: AsyncSmtpTransport<Tokio1Executor>,
        from: &str,
        subject: &str,
    ) -> anyhow::Result<Self> {
        let from: Mailbox = from
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid sender address '{}': {}", from, e))?;

        Ok(Self {
            transport,
            from,
            subject: subject.to_string(),
        })
    }

    /// STARTTLS relay with username/password authentication.
    pub fn starttls(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        from: &str,
        subject: &str,
    ) -> anyhow::Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?
            .port(port)
            .credentials(Credentials::new(username.to_string(), password.to_string()))
            .timeout(Some(Duration::from_secs(30)))
            .build();

        Self::new(transport, from, subject)
    }

    fn build_message(&self, recipient: &str, body: &str) -> Result<Message, SendError> {
        let to: Mailbox = recipient
            .trim()
            .parse()
            .map_err(|_| SendError::InvalidRecipient(recipient.to_string()))?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(self.subject.as_str())
            .header(ContentType::TEXT_HTML)
            .body(html_body(body))
            .map_err(|e| SendError::Rejected(format!("could not build email: {}", e)))
    }
}

/// Wrap the message text in a minimal HTML document.
fn html_body(text: &str) -> String {
    format!("<html><body>{}</body></html>", escape_html(text))
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[async_trait]
impl ChannelSender for EmailSender {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, recipient: &str, body: &str) -> Result<(), SendError> {
        let message = self.build_message(recipient, body)?;

        match self.transport.send(message).await {
            Ok(response) => {
                tracing::debug!(code = %response.code(), "Email accepted by SMTP server");
                Ok(())
            }
            Err(e) if e.is_permanent() => Err(SendError::Rejected(e.to_string())),
            Err(e) => Err(SendError::Transport(e.to_string())),
        }
    }
}
