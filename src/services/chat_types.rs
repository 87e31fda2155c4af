use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── REST collaborator types ────────────────────────────────────

/// The signed-in user, as returned by `GET /auth/me`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Viewer {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserMini {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingMini {
    pub id: i64,
    pub title: String,
    pub price: f64,
}

/// A message as the server serializes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub attachment_url: Option<String>,
    #[serde(default)]
    pub attachment_type: Option<String>,
    #[serde(default)]
    pub attachment_public_id: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub is_delivered: bool,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    /// Correlation id echoed back for sends that carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<String>,
}

impl Message {
    pub fn attachment(&self) -> Option<Attachment> {
        let url = self.attachment_url.clone()?;
        Some(Attachment {
            url,
            kind: AttachmentKind::parse(self.attachment_type.as_deref().unwrap_or("raw")),
            public_id: self.attachment_public_id.clone(),
        })
    }
}

/// A conversation summary for the inbox (`GET .../conversations`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: i64,
    pub listing_id: i64,
    pub buyer_id: i64,
    pub seller_id: i64,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
    pub buyer: UserMini,
    pub seller: UserMini,
    pub listing: ListingMini,
    #[serde(default)]
    pub last_message: Option<Message>,
    #[serde(default)]
    pub unread_count: u32,
}

impl ConversationSummary {
    /// The other participant, seen from `viewer_id`.
    pub fn partner(&self, viewer_id: i64) -> &UserMini {
        if viewer_id == self.buyer_id {
            &self.seller
        } else {
            &self.buyer
        }
    }

    pub fn is_buyer(&self, viewer_id: i64) -> bool {
        viewer_id == self.buyer_id
    }

    /// Preview line for the inbox.
    pub fn preview(&self) -> String {
        match &self.last_message {
            Some(m) => match (&m.content, &m.attachment_type) {
                (Some(text), _) if !text.is_empty() => text.clone(),
                (_, Some(kind)) => format!("[{}]", kind),
                _ => String::new(),
            },
            None => String::new(),
        }
    }
}

/// A conversation with its embedded messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationDetail {
    pub id: i64,
    pub listing_id: i64,
    pub buyer_id: i64,
    pub seller_id: i64,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// `GET` of a conversation's messages: some deployments return the bare
/// list, others the conversation detail.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessagesResponse {
    List(Vec<Message>),
    Detail(ConversationDetail),
}

impl MessagesResponse {
    pub fn into_messages(self) -> Vec<Message> {
        match self {
            MessagesResponse::List(messages) => messages,
            MessagesResponse::Detail(detail) => detail.messages,
        }
    }
}

/// Body of a create-message request, also carried by the socket `send_message` frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NewMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_public_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationCreate {
    pub listing_id: i64,
}

/// Response of the attachment upload endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadedAttachment {
    pub url: String,
    pub resource_type: String,
    #[serde(default)]
    pub public_id: Option<String>,
}

impl From<UploadedAttachment> for Attachment {
    fn from(uploaded: UploadedAttachment) -> Self {
        Attachment {
            url: uploaded.url,
            kind: AttachmentKind::parse(&uploaded.resource_type),
            public_id: uploaded.public_id,
        }
    }
}

/// Error body returned by the REST API.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub detail: serde_json::Value,
}

impl ApiErrorBody {
    pub fn detail_text(&self) -> String {
        match &self.detail {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

// ── Attachments ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Video,
    Raw,
}

impl AttachmentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AttachmentKind::Image => "image",
            AttachmentKind::Video => "video",
            AttachmentKind::Raw => "raw",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "image" => AttachmentKind::Image,
            "video" => AttachmentKind::Video,
            _ => AttachmentKind::Raw,
        }
    }
}

/// Uploaded media referenced by a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    pub url: String,
    pub kind: AttachmentKind,
    pub public_id: Option<String>,
}

// ── Socket frames ──────────────────────────────────────────────

/// Client → server socket frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientFrame {
    SendMessage {
        conversation_id: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        attachment_url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        attachment_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        attachment_public_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        client_ref: Option<String>,
    },
    MarkRead {
        conversation_id: i64,
    },
    Typing {
        conversation_id: i64,
    },
}

impl ClientFrame {
    pub fn send_message(conversation_id: i64, message: NewMessage) -> Self {
        ClientFrame::SendMessage {
            conversation_id,
            content: message.content,
            attachment_url: message.attachment_url,
            attachment_type: message.attachment_type,
            attachment_public_id: message.attachment_public_id,
            client_ref: message.client_ref,
        }
    }
}

/// Server → client socket events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    NewMessage {
        message: Message,
    },
    Typing {
        conversation_id: i64,
        #[serde(default)]
        user_id: Option<i64>,
    },
    MessagesRead {
        conversation_id: i64,
        reader_id: i64,
    },
    MessagesDelivered {
        conversation_id: i64,
        receiver_id: i64,
    },
    /// `{ "error": "..." }` frames carry no `type`; decoded by [`parse_server_frame`].
    #[serde(skip)]
    Rejected {
        error: String,
    },
}

impl ServerEvent {
    /// Conversation the event concerns, if it is scoped to one.
    pub fn conversation_id(&self) -> Option<i64> {
        match self {
            ServerEvent::NewMessage { message } => Some(message.conversation_id),
            ServerEvent::Typing {
                conversation_id, ..
            }
            | ServerEvent::MessagesRead {
                conversation_id, ..
            }
            | ServerEvent::MessagesDelivered {
                conversation_id, ..
            } => Some(*conversation_id),
            ServerEvent::Rejected { .. } => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum InboundFrame {
    Event(ServerEvent),
    Error { error: String },
}

/// Decode one text frame from the socket.
pub fn parse_server_frame(text: &str) -> serde_json::Result<ServerEvent> {
    Ok(match serde_json::from_str::<InboundFrame>(text)? {
        InboundFrame::Event(event) => event,
        InboundFrame::Error { error } => ServerEvent::Rejected { error },
    })
}

// ── Stored types ───────────────────────────────────────────────

/// Identity of an entry in the message store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase", tag = "kind", content = "value")]
pub enum MessageId {
    /// Server-assigned, final.
    Server(i64),
    /// Client-generated, transient (epoch millis at send time).
    Placeholder(i64),
}

impl MessageId {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, MessageId::Placeholder(_))
    }

    pub fn server_id(&self) -> Option<i64> {
        match self {
            MessageId::Server(id) => Some(*id),
            MessageId::Placeholder(_) => None,
        }
    }
}

/// A message as held by the message store; both send paths normalize to this.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredMessage {
    pub id: MessageId,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub content: Option<String>,
    pub attachment: Option<Attachment>,
    pub created_at: DateTime<Utc>,
    pub is_delivered: bool,
    pub is_read: bool,
    pub client_ref: Option<String>,
}

impl StoredMessage {
    pub fn is_pending(&self) -> bool {
        self.id.is_placeholder()
    }

    pub fn attachment_url(&self) -> Option<&str> {
        self.attachment.as_ref().map(|a| a.url.as_str())
    }
}

impl From<Message> for StoredMessage {
    fn from(message: Message) -> Self {
        let attachment = message.attachment();
        StoredMessage {
            id: MessageId::Server(message.id),
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content,
            attachment,
            created_at: message.created_at,
            is_delivered: message.is_delivered || message.is_read,
            is_read: message.is_read,
            client_ref: message.client_ref,
        }
    }
}

// ── Timestamps ─────────────────────────────────────────────────

/// The backend emits naive ISO-8601 timestamps for UTC values; accept both
/// those and RFC 3339.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
    }

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}
