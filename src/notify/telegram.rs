//! Telegram Bot API delivery.

use super::{NotificationSink, SendError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

pub const TELEGRAM_API_URL: &str = "https://api.telegram.org";

#[derive(Debug, Clone)]
pub struct TelegramSink {
    client: Client,
    api_url: String,
    token: String,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    parse_mode: &'a str,
    text: &'a str,
}

impl TelegramSink {
    pub fn new(client: Client, token: String) -> Self {
        Self::with_api_url(client, TELEGRAM_API_URL.to_string(), token)
    }

    pub fn with_api_url(client: Client, api_url: String, token: String) -> Self {
        Self {
            client,
            api_url,
            token,
        }
    }

    /// Chat id of a `telegram:<id>` or bare-id address; other forms are not ours.
    pub fn chat_id(address: &str) -> Option<i64> {
        address
            .strip_prefix("telegram:")
            .unwrap_or(address)
            .trim()
            .parse()
            .ok()
    }

    async fn send_one(&self, chat_id: i64, message: &str) -> Result<(), SendError> {
        let url = format!("{}/bot{}/sendMessage", self.api_url, self.token);
        let text = escape_markdown(message);
        let response = self
            .client
            .post(&url)
            .json(&SendMessageRequest {
                chat_id,
                parse_mode: "Markdown",
                text: &text,
            })
            .send()
            .await
            .map_err(|e| SendError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SendError::Status {
                status: status.as_u16(),
                message: body,
            });
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SendError::Http(e.to_string()))?;
        if body.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            return Err(SendError::Rejected {
                recipient: chat_id.to_string(),
                reason: body
                    .get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
            });
        }
        Ok(())
    }
}

/// Escape the characters legacy Markdown treats as entity delimiters.
///
/// Messages carry free text such as error descriptions with URLs, where one
/// stray `_` makes the Bot API reject the whole message.
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '[' | '`') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl NotificationSink for TelegramSink {
    /// Deliver to every Telegram recipient, continuing past failures.
    ///
    /// Returns the first failure, if any.
    async fn send(&self, recipients: &[String], message: &str) -> Result<(), SendError> {
        let mut first_error = None;

        for recipient in recipients {
            let Some(chat_id) = Self::chat_id(recipient) else {
                debug!(%recipient, "Not a Telegram address, skipping");
                continue;
            };
            match self.send_one(chat_id, message).await {
                Ok(()) => debug!(chat_id, "Telegram message delivered"),
                Err(e) => {
                    warn!(chat_id, error = %e, "Telegram delivery failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_chat_id_parsing() {
        assert_eq!(TelegramSink::chat_id("telegram:123456789"), Some(123_456_789));
        assert_eq!(TelegramSink::chat_id("-100200300"), Some(-100_200_300));
        assert_eq!(TelegramSink::chat_id("admin@example.com"), None);
        assert_eq!(TelegramSink::chat_id("telegram:abc"), None);
    }

    #[test]
    fn test_request_serialization() {
        let body = serde_json::to_value(SendMessageRequest {
            chat_id: 42,
            parse_mode: "Markdown",
            text: "hello",
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"chat_id": 42, "parse_mode": "Markdown", "text": "hello"})
        );
    }

    #[test]
    fn test_escape_markdown() {
        assert_eq!(
            escape_markdown("http://x/catalog/women_clothes/catalog?cat=1"),
            "http://x/catalog/women\\_clothes/catalog?cat=1"
        );
        assert_eq!(escape_markdown("*[a]* `b`"), "\\*\\[a]\\* \\`b\\`");
        assert_eq!(escape_markdown("SPP 15% -> 20%"), "SPP 15% -> 20%");
    }

    async fn mock_api(status: u16, body: serde_json::Value) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bottoken/sendMessage"))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&server)
            .await;
        server
    }

    fn sink_for(server: &MockServer) -> TelegramSink {
        TelegramSink::with_api_url(Client::new(), server.uri(), "token".to_string())
    }

    #[tokio::test]
    async fn test_send_posts_escaped_text() {
        let server = mock_api(200, serde_json::json!({"ok": true, "result": {}})).await;
        let sink = sink_for(&server);

        sink.send(
            &["telegram:42".to_string(), "7".to_string()],
            "fetch failed for url (http://wb/women_clothes/catalog)",
        )
        .await
        .unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["chat_id"], 42);
        assert_eq!(body["parse_mode"], "Markdown");
        assert_eq!(
            body["text"],
            "fetch failed for url (http://wb/women\\_clothes/catalog)"
        );
        let second: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
        assert_eq!(second["chat_id"], 7);
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = mock_api(
            400,
            serde_json::json!({"ok": false, "description": "Bad Request: chat not found"}),
        )
        .await;

        let err = sink_for(&server)
            .send(&["telegram:42".to_string()], "hello")
            .await
            .unwrap_err();
        match err {
            SendError::Status { status, message } => {
                assert_eq!(status, 400);
                assert!(message.contains("chat not found"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_not_ok_body_is_rejected() {
        let server = mock_api(
            200,
            serde_json::json!({"ok": false, "description": "bot was blocked by the user"}),
        )
        .await;

        let err = sink_for(&server)
            .send(&["telegram:42".to_string()], "hello")
            .await
            .unwrap_err();
        match err {
            SendError::Rejected { recipient, reason } => {
                assert_eq!(recipient, "42");
                assert_eq!(reason, "bot was blocked by the user");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_other_recipients() {
        let server = mock_api(500, serde_json::json!({"ok": false})).await;

        let result = sink_for(&server)
            .send(&["telegram:1".to_string(), "telegram:2".to_string()], "hello")
            .await;

        assert!(matches!(result, Err(SendError::Status { status: 500, .. })));
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_non_telegram_recipients_are_skipped() {
        let sink = TelegramSink::with_api_url(
            Client::new(),
            "http://telegram.invalid".to_string(),
            "token".to_string(),
        );
        let result = sink
            .send(&["admin@example.com".to_string()], "hello")
            .await;
        assert!(result.is_ok());
    }
}
