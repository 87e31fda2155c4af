use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{ExoError, Result};
use crate::services::{ChatApiClient, ChatService, ConfigService, WsConnector};

/// Shared application state
pub struct AppState {
    pub chat: Arc<RwLock<ChatService>>,
}

impl AppState {
    /// Wire the chat service from loaded configuration. Fails with
    /// `Unauthenticated` when no token is configured.
    pub fn from_config(config_service: &ConfigService) -> Result<Self> {
        let app_config = config_service.get();

        let token = app_config
            .auth
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ExoError::Unauthenticated(format!(
                    "no auth.token in {:?}",
                    config_service.path()
                ))
            })?
            .to_string();

        let api = ChatApiClient::new(&app_config.api, &token)?;
        let connector = WsConnector::new(api.base_url(), &api.routes().websocket(), &token)?;

        log::info!(
            "Chat API at {} (socket {})",
            api.base_url(),
            connector.url().path()
        );

        let chat = ChatService::new(Arc::new(api), Arc::new(connector), app_config.chat);

        Ok(Self {
            chat: Arc::new(RwLock::new(chat)),
        })
    }
}
