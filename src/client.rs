use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::session::HistoryToken;

#[derive(Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
    conversation_history: &'a HistoryToken,
}

/// Successful reply from the chat endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ChatReply {
    pub response: String,
    #[serde(default)]
    pub conversation_history: HistoryToken,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<String>,
}

#[derive(Deserialize)]
struct HealthResponse {
    status: String,
}

#[derive(Debug, Error)]
pub enum TransportErrorKind {
    #[error("HTTP error! status: {}{}", .status.as_u16(), DetailSuffix(.detail))]
    Status {
        status: StatusCode,
        detail: Option<String>,
    },
    #[error("could not reach the backend ({0})")]
    Network(#[source] reqwest::Error),
    #[error("unreadable response from the backend ({0})")]
    Decode(#[source] reqwest::Error),
}

struct DetailSuffix<'a>(&'a Option<String>);

impl fmt::Display for DetailSuffix<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(detail) => write!(f, " ({})", detail),
            None => Ok(()),
        }
    }
}

/// A failed exchange, displayable as-is to the user
#[derive(Debug, Error)]
#[error("{kind}. Make sure the backend server is running on {backend}")]
pub struct TransportError {
    #[source]
    pub kind: TransportErrorKind,
    pub backend: String,
}

#[derive(Clone)]
pub struct ChatClient {
    client: Client,
    base_url: String,
    chat_path: String,
    health_path: String,
}

impl ChatClient {
    pub fn new(base_url: &str, chat_path: &str, health_path: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            chat_path: chat_path.to_string(),
            health_path: health_path.to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn fail(&self, kind: TransportErrorKind) -> TransportError {
        TransportError {
            kind,
            backend: self.base_url.clone(),
        }
    }

    /// One round trip to the chat endpoint. Never retried.
    pub async fn exchange(
        &self,
        message: &str,
        history: &HistoryToken,
    ) -> Result<ChatReply, TransportError> {
        let url = format!("{}{}", self.base_url, self.chat_path);

        let request = ChatRequest {
            message,
            conversation_history: history,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.fail(TransportErrorKind::Network(e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|body| body.detail);
            return Err(self.fail(TransportErrorKind::Status { status, detail }));
        }

        response
            .json::<ChatReply>()
            .await
            .map_err(|e| self.fail(TransportErrorKind::Decode(e)))
    }

    pub async fn health(&self) -> Result<String, TransportError> {
        let url = format!("{}{}", self.base_url, self.health_path);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.fail(TransportErrorKind::Network(e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.fail(TransportErrorKind::Status { status, detail: None }));
        }

        let health: HealthResponse = response
            .json()
            .await
            .map_err(|e| self.fail(TransportErrorKind::Decode(e)))?;
        Ok(health.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn client_for(server: &mockito::Server) -> ChatClient {
        ChatClient::new(&server.url(), "/api/chat", "/api/health")
    }

    #[tokio::test]
    async fn exchange_sends_message_and_history() {
        let mut server = mockito::Server::new_async().await;
        let history = HistoryToken::from(vec![json!({"role": "user", "content": "earlier"})]);
        let mock = server
            .mock("POST", "/api/chat")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(json!({
                "message": "Show me overdue tasks",
                "conversation_history": [{"role": "user", "content": "earlier"}],
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "response": "3 tasks overdue",
                    "conversation_history": [{"role": "user", "content": "earlier"}, {"role": "assistant", "content": "3"}],
                })
                .to_string(),
            )
            .create_async()
            .await;

        let reply = client_for(&server)
            .exchange("Show me overdue tasks", &history)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(reply.response, "3 tasks overdue");
        assert_eq!(
            reply.conversation_history,
            HistoryToken::from(vec![
                json!({"role": "user", "content": "earlier"}),
                json!({"role": "assistant", "content": "3"}),
            ])
        );
    }

    #[tokio::test]
    async fn first_request_sends_empty_history() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/chat")
            .match_body(Matcher::PartialJson(json!({"conversation_history": []})))
            .with_status(200)
            .with_body(r#"{"response": "hi"}"#)
            .create_async()
            .await;

        let reply = client_for(&server)
            .exchange("hello", &HistoryToken::default())
            .await
            .unwrap();

        mock.assert_async().await;
        assert!(reply.conversation_history.is_empty());
    }

    #[tokio::test]
    async fn server_error_names_status_and_backend() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/chat")
            .with_status(500)
            .with_body(r#"{"detail": "Error: upstream down"}"#)
            .create_async()
            .await;

        let err = client_for(&server)
            .exchange("hello", &HistoryToken::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err.kind,
            TransportErrorKind::Status { status, .. } if status == StatusCode::INTERNAL_SERVER_ERROR
        ));
        let text = err.to_string();
        assert!(text.contains("HTTP error! status: 500"));
        assert!(text.contains("upstream down"));
        assert!(text.contains(&server.url()));
        assert!(text.contains("backend server is running"));
    }

    #[tokio::test]
    async fn non_json_error_body_is_tolerated() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/chat")
            .with_status(502)
            .with_body("Bad Gateway")
            .create_async()
            .await;

        let err = client_for(&server)
            .exchange("hello", &HistoryToken::default())
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("HTTP error! status: 502. Make sure"));
    }

    #[tokio::test]
    async fn malformed_reply_is_a_decode_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_body(r#"{"unexpected": true}"#)
            .create_async()
            .await;

        let err = client_for(&server)
            .exchange("hello", &HistoryToken::default())
            .await
            .unwrap_err();
        assert!(matches!(err.kind, TransportErrorKind::Decode(_)));
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_network_error() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let base = format!("http://127.0.0.1:{}", port);
        let client = ChatClient::new(&base, "/api/chat", "/api/health");
        let err = client
            .exchange("hello", &HistoryToken::default())
            .await
            .unwrap_err();
        assert!(matches!(err.kind, TransportErrorKind::Network(_)));
        assert!(err.to_string().contains(&base));
    }

    #[tokio::test]
    async fn health_reports_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/health")
            .with_status(200)
            .with_body(r#"{"status": "healthy", "tools_available": 14}"#)
            .create_async()
            .await;

        let status = client_for(&server).health().await.unwrap();
        assert_eq!(status, "healthy");
    }

    #[test]
    fn trailing_slash_is_dropped_from_base_url() {
        let client = ChatClient::new("http://localhost:8000/", "/api/chat", "/api/health");
        assert_eq!(client.base_url(), "http://localhost:8000");
    }
}
