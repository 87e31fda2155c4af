//! Chat orchestrator: inbox state plus at most one open conversation.

use std::sync::Arc;
use tokio::sync::mpsc;

use super::chat_api::ChatBackend;
use super::chat_session::{ChatSession, SessionUpdate};
use super::chat_transport::SocketConnector;
use super::chat_types::*;
use super::config::ChatSettings;
use crate::error::{ExoError, Result};

pub struct ChatService {
    backend: Arc<dyn ChatBackend>,
    connector: Arc<dyn SocketConnector>,
    settings: ChatSettings,
    viewer: Option<Viewer>,
    conversations: Vec<ConversationSummary>,
    /// The open conversation view, if any. Opening another one closes it.
    active: Option<ChatSession>,
}

impl ChatService {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        connector: Arc<dyn SocketConnector>,
        settings: ChatSettings,
    ) -> Self {
        Self {
            backend,
            connector,
            settings,
            viewer: None,
            conversations: Vec::new(),
            active: None,
        }
    }

    /// The signed-in user, fetched once and cached.
    pub async fn viewer(&mut self) -> Result<Viewer> {
        if let Some(viewer) = &self.viewer {
            return Ok(viewer.clone());
        }
        let viewer = self.backend.me().await?;
        log::info!("Signed in as {} ({})", viewer.name, viewer.id);
        self.viewer = Some(viewer.clone());
        Ok(viewer)
    }

    // ── Inbox ──────────────────────────────────────────────────

    /// Refresh the inbox, most recently updated first.
    pub async fn list_conversations(&mut self) -> Result<&[ConversationSummary]> {
        let mut conversations = self.backend.list_conversations().await?;
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        log::debug!("Loaded {} conversations", conversations.len());
        self.conversations = conversations;
        Ok(&self.conversations)
    }

    /// Inbox as last loaded.
    pub fn conversations(&self) -> &[ConversationSummary] {
        &self.conversations
    }

    pub fn total_unread(&self) -> u32 {
        self.conversations.iter().map(|c| c.unread_count).sum()
    }

    /// Open (or reuse) the conversation about a listing.
    pub async fn start_conversation(&mut self, listing_id: i64) -> Result<ConversationSummary> {
        let summary = self.backend.start_conversation(listing_id).await?;
        log::info!(
            "Conversation {} for listing {}",
            summary.id,
            summary.listing_id
        );
        self.conversations.retain(|c| c.id != summary.id);
        self.conversations.insert(0, summary.clone());
        Ok(summary)
    }

    // ── Conversation view ──────────────────────────────────────

    /// Switch to a conversation. The previous view is closed first so its
    /// in-flight work cannot touch the new one.
    pub async fn open_conversation(
        &mut self,
        conversation_id: i64,
        updates: mpsc::UnboundedSender<SessionUpdate>,
    ) -> Result<()> {
        self.close_conversation();
        let viewer = self.viewer().await?;

        let mut session = ChatSession::new(
            conversation_id,
            viewer,
            self.backend.clone(),
            self.connector.clone(),
            self.settings.clone(),
            updates,
        );
        if let Err(e) = session.open().await {
            session.close();
            return Err(e);
        }

        if let Some(summary) = self.conversations.iter_mut().find(|c| c.id == conversation_id) {
            summary.unread_count = 0;
        }
        self.active = Some(session);
        Ok(())
    }

    /// Close the open view, if any.
    pub fn close_conversation(&mut self) {
        if let Some(mut session) = self.active.take() {
            session.close();
        }
    }

    pub fn active(&self) -> Option<&ChatSession> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut ChatSession> {
        self.active.as_mut()
    }

    /// Like [`active_mut`](Self::active_mut) but an error when nothing is open.
    pub fn require_active(&mut self) -> Result<&mut ChatSession> {
        self.active
            .as_mut()
            .ok_or_else(|| ExoError::ChatError("No conversation is open".to_string()))
    }

    /// Drive the open view. Pending while nothing is open.
    pub async fn process_next(&mut self) {
        let still_open = match self.active.as_mut() {
            Some(session) => session.process_next().await,
            None => std::future::pending().await,
        };
        if !still_open {
            self.active = None;
        }
    }
}

impl Drop for ChatService {
    fn drop(&mut self) {
        self.close_conversation();
    }
}
