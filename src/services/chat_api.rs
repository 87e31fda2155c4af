//! REST client for the chat endpoints and `/auth/me`.
//!
//! The session controller talks to this through the [`ChatBackend`] trait so
//! it can be exercised against mocks.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

use super::chat_types::*;
use super::config::{ApiFlavor, ApiSettings};
use crate::error::{ExoError, Result};

/// Paths for one route family.
#[derive(Debug, Clone, Copy)]
pub struct ChatRoutes {
    flavor: ApiFlavor,
}

impl ChatRoutes {
    pub fn new(flavor: ApiFlavor) -> Self {
        Self { flavor }
    }

    fn prefix(&self) -> &'static str {
        match self.flavor {
            ApiFlavor::Messages => "/messages",
            ApiFlavor::Chat => "/chat",
        }
    }

    pub fn me(&self) -> String {
        "/auth/me".to_string()
    }

    pub fn conversations(&self) -> String {
        format!("{}/conversations", self.prefix())
    }

    pub fn conversation_messages(&self, conversation_id: i64) -> String {
        match self.flavor {
            ApiFlavor::Messages => format!("/messages/convo/{}", conversation_id),
            ApiFlavor::Chat => format!("/chat/conversations/{}", conversation_id),
        }
    }

    pub fn send_message(&self, conversation_id: i64) -> String {
        match self.flavor {
            ApiFlavor::Messages => format!("/messages/convo/{}", conversation_id),
            ApiFlavor::Chat => format!("/chat/conversations/{}/messages", conversation_id),
        }
    }

    pub fn upload(&self) -> String {
        format!("{}/upload", self.prefix())
    }

    pub fn websocket(&self) -> String {
        format!("{}/ws", self.prefix())
    }
}

/// The REST operations the chat core depends on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Resolve the viewer's own identity.
    async fn me(&self) -> Result<Viewer>;
    /// Create the conversation for a listing, or return the existing one.
    async fn start_conversation(&self, listing_id: i64) -> Result<ConversationSummary>;
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>>;
    async fn fetch_messages(&self, conversation_id: i64) -> Result<Vec<Message>>;
    async fn send_message(&self, conversation_id: i64, message: NewMessage) -> Result<Message>;
    async fn upload_attachment(
        &self,
        file_name: String,
        mime_type: String,
        bytes: Vec<u8>,
    ) -> Result<UploadedAttachment>;
}

/// reqwest-backed [`ChatBackend`].
#[derive(Clone)]
pub struct ChatApiClient {
    client: reqwest::Client,
    base_url: Url,
    routes: ChatRoutes,
    token: String,
}

impl ChatApiClient {
    pub fn new(settings: &ApiSettings, token: &str) -> Result<Self> {
        let base_url = Url::parse(&settings.base_url)
            .map_err(|e| ExoError::ConfigError(format!("Invalid api.base_url: {}", e)))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| ExoError::ChatError(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            routes: ChatRoutes::new(settings.flavor),
            token: token.to_string(),
        })
    }

    pub fn routes(&self) -> ChatRoutes {
        self.routes
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ExoError::ConfigError(format!("Build URL for {}: {}", path, e)))
    }

    fn get(&self, path: &str) -> Result<RequestBuilder> {
        Ok(self.client.get(self.url(path)?).bearer_auth(&self.token))
    }

    fn post(&self, path: &str) -> Result<RequestBuilder> {
        Ok(self.client.post(self.url(path)?).bearer_auth(&self.token))
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| ExoError::TransportError(format!("{}: {}", what, e)))?;
        let response = check_status(response, what).await?;
        response
            .json()
            .await
            .map_err(|e| ExoError::ChatError(format!("Parse {} response: {}", what, e)))
    }
}

/// Turn a non-2xx response into an error carrying the server's `detail`.
async fn check_status(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|b| b.detail_text())
        .unwrap_or_else(|_| format!("{} failed: HTTP {}", what, status));

    log::warn!("{} failed: HTTP {} ({})", what, status, detail);

    Err(match status {
        StatusCode::NOT_FOUND => ExoError::NotFound(detail),
        StatusCode::UNAUTHORIZED => ExoError::Unauthenticated(detail),
        _ => ExoError::ApiError {
            status: status.as_u16(),
            detail,
        },
    })
}

#[async_trait]
impl ChatBackend for ChatApiClient {
    async fn me(&self) -> Result<Viewer> {
        self.execute(self.get(&self.routes.me())?, "Fetch profile")
            .await
    }

    async fn start_conversation(&self, listing_id: i64) -> Result<ConversationSummary> {
        let request = self
            .post(&self.routes.conversations())?
            .json(&ConversationCreate { listing_id });
        self.execute(request, "Start conversation").await
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        self.execute(self.get(&self.routes.conversations())?, "List conversations")
            .await
    }

    async fn fetch_messages(&self, conversation_id: i64) -> Result<Vec<Message>> {
        let response: MessagesResponse = self
            .execute(
                self.get(&self.routes.conversation_messages(conversation_id))?,
                "Load conversation",
            )
            .await?;
        Ok(response.into_messages())
    }

    async fn send_message(&self, conversation_id: i64, message: NewMessage) -> Result<Message> {
        let request = self
            .post(&self.routes.send_message(conversation_id))?
            .json(&message);
        self.execute(request, "Send message").await
    }

    async fn upload_attachment(
        &self,
        file_name: String,
        mime_type: String,
        bytes: Vec<u8>,
    ) -> Result<UploadedAttachment> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(&mime_type)
            .map_err(|e| ExoError::UploadError(format!("Invalid MIME type {}: {}", mime_type, e)))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let request = self.post(&self.routes.upload())?.multipart(form);
        self.execute(request, "Upload attachment")
            .await
            .map_err(|e| match e {
                ExoError::ApiError { detail, .. } => ExoError::UploadError(detail),
                ExoError::TransportError(detail) => ExoError::UploadError(detail),
                other => other,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer, flavor: ApiFlavor) -> ChatApiClient {
        let settings = ApiSettings {
            base_url: server.uri(),
            timeout_secs: 5,
            flavor,
        };
        ChatApiClient::new(&settings, "tok").unwrap()
    }

    fn message_json(id: i64, content: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "conversation_id": 3,
            "sender_id": 1,
            "content": content,
            "is_read": false,
            "created_at": "2024-05-01T10:00:00"
        })
    }

    #[test]
    fn test_route_families() {
        let messages = ChatRoutes::new(ApiFlavor::Messages);
        assert_eq!(messages.conversation_messages(3), "/messages/convo/3");
        assert_eq!(messages.send_message(3), "/messages/convo/3");
        assert_eq!(messages.websocket(), "/messages/ws");

        let chat = ChatRoutes::new(ApiFlavor::Chat);
        assert_eq!(chat.conversation_messages(3), "/chat/conversations/3");
        assert_eq!(chat.send_message(3), "/chat/conversations/3/messages");
        assert_eq!(chat.upload(), "/chat/upload");
    }

    #[tokio::test]
    async fn test_me_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/me"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 1, "name": "Ada", "email": "ada@example.com", "trust_score": 80
            })))
            .expect(1)
            .mount(&server)
            .await;

        let viewer = client_for(&server, ApiFlavor::Messages).await.me().await.unwrap();
        assert_eq!(viewer.id, 1);
    }

    #[tokio::test]
    async fn test_send_message_returns_created_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/conversations/3/messages"))
            .and(body_json(serde_json::json!({"content": "test", "client_ref": "r1"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(message_json(555, "test")))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, ApiFlavor::Chat).await;
        let created = client
            .send_message(
                3,
                NewMessage {
                    content: Some("test".to_string()),
                    client_ref: Some("r1".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(created.id, 555);
    }

    #[tokio::test]
    async fn test_not_found_carries_detail() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messages/convo/42"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(serde_json::json!({"detail": "Conversation not found"})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server, ApiFlavor::Messages)
            .await
            .fetch_messages(42)
            .await
            .unwrap_err();
        assert!(matches!(err, ExoError::NotFound(ref d) if d == "Conversation not found"));
    }

    #[tokio::test]
    async fn test_other_errors_keep_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages/conversations"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"detail": "Cannot chat with yourself"})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server, ApiFlavor::Messages)
            .await
            .start_conversation(8)
            .await
            .unwrap_err();
        match err {
            ExoError::ApiError { status, detail } => {
                assert_eq!(status, 400);
                assert_eq!(detail, "Cannot chat with yourself");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_messages_accepts_detail_shape() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/chat/conversations/3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 3, "listing_id": 8, "buyer_id": 1, "seller_id": 2,
                "messages": [message_json(101, "Hi"), message_json(102, "Hello")]
            })))
            .mount(&server)
            .await;

        let messages = client_for(&server, ApiFlavor::Chat)
            .await
            .fetch_messages(3)
            .await
            .unwrap();
        let ids: Vec<i64> = messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![101, 102]);
    }

    #[tokio::test]
    async fn test_upload_failure_maps_to_upload_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages/upload"))
            .respond_with(ResponseTemplate::new(500).set_body_json(
                serde_json::json!({"detail": "Cloudinary credentials missing in server .env file"}),
            ))
            .mount(&server)
            .await;

        let err = client_for(&server, ApiFlavor::Messages)
            .await
            .upload_attachment("a.png".to_string(), "image/png".to_string(), vec![1, 2, 3])
            .await
            .unwrap_err();
        assert!(matches!(err, ExoError::UploadError(_)));
    }

    #[tokio::test]
    async fn test_upload_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "url": "https://x/y.png", "resource_type": "image", "public_id": "exo/y"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let uploaded = client_for(&server, ApiFlavor::Messages)
            .await
            .upload_attachment("y.png".to_string(), "image/png".to_string(), vec![0u8; 16])
            .await
            .unwrap();
        assert_eq!(uploaded.url, "https://x/y.png");
        assert_eq!(Attachment::from(uploaded).kind, AttachmentKind::Image);
    }
}
