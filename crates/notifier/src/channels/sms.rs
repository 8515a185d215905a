use async_trait::async_trait;

use herald_common::types::Channel;

use super::{ChannelSender, SendError, TwilioClient};

/// Plain SMS through Twilio, sent from a configured phone number.
pub struct SmsSender {
    client: TwilioClient,
    from: String,
}

impl SmsSender {
    pub fn new(client: TwilioClient, from: &str) -> Self {
        Self {
            client,
            from: from.trim().to_string(),
        }
    }
}

#[async_trait]
impl ChannelSender for SmsSender {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn send(&self, recipient: &str, body: &str) -> Result<(), SendError> {
        let to = recipient.trim();
        if to.is_empty() {
            return Err(SendError::InvalidRecipient(recipient.to_string()));
        }

        let sid = self.client.create_message(to, &self.from, body).await?;
        tracing::debug!(sid = %sid, "SMS accepted by Twilio");
        Ok(())
    }
}
