// Service layer - trait-based seams so the chat core runs against mocks in tests

pub mod chat_api;
pub mod chat_composer;
pub mod chat_delivery_queue;
pub mod chat_message_store;
pub mod chat_receipts;
pub mod chat_service;
pub mod chat_session;
pub mod chat_transport;
pub mod chat_types;
pub mod chat_typing;
pub mod config;

pub use chat_api::{ChatApiClient, ChatBackend};
pub use chat_service::ChatService;
pub use chat_session::{ChatSession, SendOutcome, SessionUpdate};
pub use chat_transport::{ConnectionStatus, SocketConnector, WsConnector};
pub use config::ConfigService;
