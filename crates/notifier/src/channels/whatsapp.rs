use async_trait::async_trait;

use herald_common::types::Channel;

use super::{ChannelSender, SendError, TwilioClient};

const WHATSAPP_PREFIX: &str = "whatsapp:";

/// WhatsApp through Twilio. Both ends carry the `whatsapp:` address prefix.
pub struct WhatsAppSender {
    client: TwilioClient,
    from: String,
}

impl WhatsAppSender {
    pub fn new(client: TwilioClient, from: &str) -> Self {
        Self {
            client,
            from: whatsapp_address(from),
        }
    }
}

/// Prefix a number with `whatsapp:` unless it already has one.
pub(crate) fn whatsapp_address(number: &str) -> String {
    let number = number.trim();
    if number.starts_with(WHATSAPP_PREFIX) {
        number.to_string()
    } else {
        format!("{}{}", WHATSAPP_PREFIX, number)
    }
}

#[async_trait]
impl ChannelSender for WhatsAppSender {
    fn channel(&self) -> Channel {
        Channel::WhatsApp
    }

    async fn send(&self, recipient: &str, body: &str) -> Result<(), SendError> {
        if recipient.trim().trim_start_matches(WHATSAPP_PREFIX).is_empty() {
            return Err(SendError::InvalidRecipient(recipient.to_string()));
        }

        let to = whatsapp_address(recipient);
        let sid = self.client.create_message(&to, &self.from, body).await?;
        tracing::debug!(sid = %sid, "WhatsApp message accepted by Twilio");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_is_prefixed_once() {
        assert_eq!(whatsapp_address("+15550001111"), "whatsapp:+15550001111");
        assert_eq!(whatsapp_address("whatsapp:+15550001111"), "whatsapp:+15550001111");
        assert_eq!(whatsapp_address(" +15550001111 "), "whatsapp:+15550001111");
    }

    #[tokio::test]
    async fn test_blank_recipient_rejected_without_calling_twilio() {
        let client = TwilioClient::new("AC1".into(), "t".into())
            .unwrap()
            .with_base_url("http://127.0.0.1:9");
        let sender = WhatsAppSender::new(client, "+15550009999");

        let err = sender.send("whatsapp:", "hi").await.unwrap_err();
        assert!(matches!(err, SendError::InvalidRecipient(_)));
    }
}
