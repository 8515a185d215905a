//! Minimal Twilio Messages API client shared by the SMS and WhatsApp senders.

use std::time::Duration;

use serde::Deserialize;

use super::SendError;

const TWILIO_API_BASE: &str = "https://api.twilio.com";

#[derive(Clone)]
pub struct TwilioClient {
    http: reqwest::Client,
    account_sid: String,
    auth_token: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: String,
}

#[derive(Debug, Deserialize)]
struct TwilioErrorBody {
    code: Option<i64>,
    message: Option<String>,
}

impl TwilioClient {
    pub fn new(account_sid: String, auth_token: String) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            http,
            account_sid,
            auth_token,
            base_url: TWILIO_API_BASE.to_string(),
        })
    }

    /// Point the client at another API host (test doubles, regional edges).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, self.account_sid
        )
    }

    /// Create one outbound message. Returns the Twilio message SID.
    pub async fn create_message(
        &self,
        to: &str,
        from: &str,
        body: &str,
    ) -> Result<String, SendError> {
        let response = self
            .http
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("To", to), ("From", from), ("Body", body)])
            .send()
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let resource: MessageResource = response
                .json()
                .await
                .map_err(|e| SendError::Transport(format!("unreadable Twilio response: {}", e)))?;
            return Ok(resource.sid);
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, &body))
    }
}

/// 4xx means Twilio refused the message; anything else may be transient.
fn classify_failure(status: reqwest::StatusCode, body: &str) -> SendError {
    let detail = match serde_json::from_str::<TwilioErrorBody>(body) {
        Ok(TwilioErrorBody {
            code: Some(code),
            message: Some(message),
        }) => format!("{} (code {})", message, code),
        Ok(TwilioErrorBody {
            message: Some(message),
            ..
        }) => message,
        _ => format!("HTTP {}", status),
    };

    if status.is_client_error() {
        SendError::Rejected(detail)
    } else {
        SendError::Transport(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_messages_url() {
        let client = TwilioClient::new("AC123".into(), "token".into())
            .unwrap()
            .with_base_url("http://localhost:4010/");
        assert_eq!(
            client.messages_url(),
            "http://localhost:4010/2010-04-01/Accounts/AC123/Messages.json"
        );
    }

    #[test]
    fn test_client_error_is_rejection_with_twilio_detail() {
        let body = r#"{"code": 21211, "message": "The 'To' number is not a valid phone number.",
            "status": 400}"#;
        let err = classify_failure(StatusCode::BAD_REQUEST, body);
        match err {
            SendError::Rejected(detail) => {
                assert!(detail.contains("21211"));
                assert!(detail.contains("not a valid phone number"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_server_error_is_transport() {
        let err = classify_failure(StatusCode::SERVICE_UNAVAILABLE, "<html>oops</html>");
        assert!(matches!(err, SendError::Transport(d) if d.contains("503")));
    }
}
