//! Controller for one open conversation view.
//!
//! Owns the message store, composer, typing indicator and socket for the
//! conversation. All state is mutated from one task: UI calls go through
//! `&mut self` methods and asynchronous inputs (socket frames, upload
//! results, timers) are drained by [`ChatSession::process_next`].

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::chat_api::ChatBackend;
use super::chat_composer::{Composer, Draft};
use super::chat_delivery_queue::{DeliveryQueue, PendingDelivery};
use super::chat_message_store::{ConfirmOutcome, LoadOutcome, MessageStore, PushOutcome};
use super::chat_receipts;
use super::chat_transport::{ChatTransport, ConnectionStatus, SocketConnector, SocketEvent};
use super::chat_types::*;
use super::chat_typing::TypingIndicator;
use super::config::ChatSettings;
use crate::error::{ExoError, Result};

/// Notifications for the view layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// The message list changed; re-read it from the session.
    MessagesChanged,
    ScrollToBottom,
    TypingChanged(bool),
    ConnectionChanged(ConnectionStatus),
    /// A failed send put its text back into the composer.
    ComposerRestored,
    UploadingChanged(bool),
    AttachmentReady(Attachment),
    Alert(String),
    /// The conversation does not exist; go back to the inbox.
    ReturnToList,
    /// Loading failed for another reason; show it inline with a way back.
    LoadFailed(String),
}

/// What a call to [`ChatSession::send_message`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Nothing to send (blank composer, or an upload is running).
    Skipped,
    /// Refused before any state change.
    Rejected(String),
    /// Pushed over the socket; the echo will confirm it.
    Pending { placeholder_id: i64 },
    /// Sent over REST and confirmed.
    Confirmed { placeholder_id: i64, message_id: i64 },
    /// Failed; placeholder removed and the draft restored.
    RolledBack { placeholder_id: i64 },
}

#[derive(Debug)]
enum InternalEvent {
    UploadFinished(Result<UploadedAttachment>),
}

pub struct ChatSession {
    conversation_id: i64,
    viewer: Viewer,
    backend: Arc<dyn ChatBackend>,
    transport: ChatTransport,
    store: MessageStore,
    composer: Composer,
    typing: TypingIndicator,
    deliveries: DeliveryQueue,
    settings: ChatSettings,
    updates: mpsc::UnboundedSender<SessionUpdate>,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
    internal_rx: mpsc::UnboundedReceiver<InternalEvent>,
    cancel: CancellationToken,
    mark_read_sent: bool,
    reconnect_attempted: bool,
    reconnect_at: Option<Instant>,
    /// Set while a post-reconnect fetch has not been applied.
    resync_pending: bool,
    closed: bool,
}

impl ChatSession {
    pub fn new(
        conversation_id: i64,
        viewer: Viewer,
        backend: Arc<dyn ChatBackend>,
        connector: Arc<dyn SocketConnector>,
        settings: ChatSettings,
        updates: mpsc::UnboundedSender<SessionUpdate>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        Self {
            conversation_id,
            viewer,
            backend,
            transport: ChatTransport::new(connector),
            store: MessageStore::new(conversation_id, settings.strict_ordering),
            composer: Composer::new(),
            typing: TypingIndicator::new(settings.typing_timeout()),
            deliveries: DeliveryQueue::new(settings.ack_timeout()),
            settings,
            updates,
            internal_tx,
            internal_rx,
            cancel: CancellationToken::new(),
            mark_read_sent: false,
            reconnect_attempted: false,
            reconnect_at: None,
            resync_pending: false,
            closed: false,
        }
    }

    // ── Accessors ──────────────────────────────────────────────

    pub fn conversation_id(&self) -> i64 {
        self.conversation_id
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    pub fn messages(&self) -> &[StoredMessage] {
        self.store.messages()
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    pub fn composer_mut(&mut self) -> &mut Composer {
        &mut self.composer
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.transport.status()
    }

    pub fn is_peer_typing(&self) -> bool {
        self.typing.is_active(Instant::now())
    }

    pub fn pending_deliveries(&self) -> usize {
        self.deliveries.pending_count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Token cancelled when the session closes.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn emit(&self, update: SessionUpdate) {
        let _ = self.updates.send(update);
    }

    // ── Lifecycle ──────────────────────────────────────────────

    /// Load the conversation and open the socket.
    ///
    /// A load failure is reported to the view and returned; a socket failure
    /// is not fatal and leaves the session on REST.
    pub async fn open(&mut self) -> Result<()> {
        log::info!(
            "Opening conversation {} for user {}",
            self.conversation_id,
            self.viewer.id
        );

        let loaded = tokio::select! {
            _ = self.cancel.cancelled() => {
                return Err(ExoError::ChatError("Conversation was closed while loading".to_string()));
            }
            result = self.backend.fetch_messages(self.conversation_id) => result,
        };

        match loaded {
            Ok(messages) => {
                self.apply_load(messages);
                self.emit(SessionUpdate::MessagesChanged);
                self.emit(SessionUpdate::ScrollToBottom);
            }
            Err(e) => {
                log::warn!("Load of conversation {} failed: {}", self.conversation_id, e);
                match &e {
                    ExoError::NotFound(_) => self.emit(SessionUpdate::ReturnToList),
                    other => self.emit(SessionUpdate::LoadFailed(other.user_message())),
                }
                return Err(e);
            }
        }

        self.connect_socket().await;
        Ok(())
    }

    /// Tear the view down. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cancel.cancel();
        self.transport.close();
        self.deliveries.clear();
        self.typing.reset();
        self.reconnect_at = None;
        log::info!("Closed conversation {}", self.conversation_id);
        self.emit(SessionUpdate::ConnectionChanged(ConnectionStatus::Closed));
    }

    async fn connect_socket(&mut self) -> bool {
        match self.transport.connect().await {
            Ok(()) => {
                self.on_socket_open();
                true
            }
            Err(e) => {
                log::warn!(
                    "Socket for conversation {} unavailable, sending over REST: {}",
                    self.conversation_id,
                    e
                );
                self.schedule_reconnect();
                false
            }
        }
    }

    fn on_socket_open(&mut self) {
        self.reconnect_at = None;
        self.emit(SessionUpdate::ConnectionChanged(ConnectionStatus::Connected));
        if !self.mark_read_sent {
            let frame = ClientFrame::MarkRead {
                conversation_id: self.conversation_id,
            };
            match self.transport.send(frame) {
                Ok(()) => self.mark_read_sent = true,
                Err(e) => log::warn!("Could not send mark_read: {}", e),
            }
        }
    }

    /// One retry per drop; a second failure is reported and sticks.
    fn schedule_reconnect(&mut self) {
        if self.closed {
            return;
        }
        if self.reconnect_attempted {
            self.reconnect_at = None;
            self.transport.set_status(ConnectionStatus::Disconnected);
            log::warn!(
                "Socket for conversation {} is down; staying on REST",
                self.conversation_id
            );
        } else {
            self.reconnect_attempted = true;
            self.reconnect_at = Some(Instant::now() + self.settings.reconnect_delay());
            self.transport.set_status(ConnectionStatus::Reconnecting);
        }
        self.emit(SessionUpdate::ConnectionChanged(self.transport.status()));
    }

    async fn try_reconnect(&mut self) {
        log::info!("Reconnecting socket for conversation {}", self.conversation_id);
        let result = self.transport.connect().await;
        self.reconnect_at = None;
        match result {
            Ok(()) => {
                self.reconnect_attempted = false;
                self.on_socket_open();
                self.resync_pending = true;
                self.resync().await;
            }
            Err(e) => {
                log::warn!("Reconnect failed: {}", e);
                self.schedule_reconnect();
            }
        }
    }

    /// Re-fetch over REST to pick up anything pushed while the socket was down.
    ///
    /// `resync_pending` is only cleared once the fetch has finished, so a
    /// caller that drops this future mid-flight gets it retried by
    /// [`ChatSession::process_next`]. A failed fetch is not retried.
    async fn resync(&mut self) {
        let result = self.backend.fetch_messages(self.conversation_id).await;
        self.resync_pending = false;
        match result {
            Ok(messages) => {
                let before = self.store.len();
                self.apply_load(messages);
                self.emit(SessionUpdate::MessagesChanged);
                if self.store.len() > before {
                    self.emit(SessionUpdate::ScrollToBottom);
                }
            }
            Err(e) => log::warn!("Resync of conversation {} failed: {}", self.conversation_id, e),
        }
    }

    /// Replace the list with a REST load and settle the socket sends it
    /// shows to be persisted.
    fn apply_load(&mut self, messages: Vec<Message>) {
        if let LoadOutcome::Loaded { confirmed, .. } =
            self.store.replace_all(self.conversation_id, messages)
        {
            for placeholder_id in confirmed {
                if self.deliveries.acknowledge(placeholder_id).is_some() {
                    log::debug!("Socket send {} confirmed by reload", placeholder_id);
                }
            }
        }
    }

    // ── User actions ───────────────────────────────────────────

    /// Convenience for line-based front ends: set the composer text and send.
    pub async fn send_text(&mut self, text: &str) -> SendOutcome {
        self.composer.set_text(text);
        self.send_message().await
    }

    /// Send what the composer holds.
    ///
    /// The composer is cleared and a placeholder inserted before any network
    /// call. Over the socket the echo confirms the placeholder later; over
    /// REST the response does.
    pub async fn send_message(&mut self) -> SendOutcome {
        if self.closed {
            return SendOutcome::Skipped;
        }

        let size = self.composer.text().trim().len();
        if size > self.settings.max_message_size {
            let reason = format!(
                "Message too large: {} bytes (max {})",
                size, self.settings.max_message_size
            );
            self.emit(SessionUpdate::Alert(reason.clone()));
            return SendOutcome::Rejected(reason);
        }

        let Some(draft) = self.composer.take() else {
            return SendOutcome::Skipped;
        };

        let now = Utc::now();
        let placeholder_id = self.store.next_placeholder_id(now);
        let client_ref = uuid::Uuid::new_v4().to_string();
        let payload = draft.to_new_message(&client_ref);

        self.store.insert_placeholder(StoredMessage {
            id: MessageId::Placeholder(placeholder_id),
            conversation_id: self.conversation_id,
            sender_id: self.viewer.id,
            content: payload.content.clone(),
            attachment: draft.attachment.clone(),
            created_at: now,
            is_delivered: false,
            is_read: false,
            client_ref: Some(client_ref.clone()),
        });
        self.emit(SessionUpdate::MessagesChanged);
        self.emit(SessionUpdate::ScrollToBottom);

        if self.transport.is_open() {
            let frame = ClientFrame::send_message(self.conversation_id, payload.clone());
            match self.transport.send(frame) {
                Ok(()) => {
                    self.deliveries.enqueue(PendingDelivery {
                        placeholder_id,
                        client_ref,
                        draft,
                        sent_at: Instant::now(),
                    });
                    return SendOutcome::Pending { placeholder_id };
                }
                Err(e) => log::warn!("Socket send failed, falling back to REST: {}", e),
            }
        }

        self.send_over_rest(placeholder_id, draft, payload).await
    }

    async fn send_over_rest(
        &mut self,
        placeholder_id: i64,
        draft: Draft,
        payload: NewMessage,
    ) -> SendOutcome {
        let result = tokio::select! {
            _ = self.cancel.cancelled() => {
                Err(ExoError::ChatError("Conversation was closed".to_string()))
            }
            result = self.backend.send_message(self.conversation_id, payload) => result,
        };

        match result {
            Ok(message) => {
                let message_id = message.id;
                let outcome = self.store.confirm(placeholder_id, message);
                log::debug!("REST send confirmed {} ({:?})", message_id, outcome);
                if outcome == ConfirmOutcome::Appended {
                    log::debug!("Placeholder {} was gone; appended {}", placeholder_id, message_id);
                }
                self.emit(SessionUpdate::MessagesChanged);
                SendOutcome::Confirmed {
                    placeholder_id,
                    message_id,
                }
            }
            Err(e) => {
                log::warn!("Send in conversation {} failed: {}", self.conversation_id, e);
                self.fail_send(placeholder_id, draft, &e.user_message());
                SendOutcome::RolledBack { placeholder_id }
            }
        }
    }

    fn fail_send(&mut self, placeholder_id: i64, draft: Draft, reason: &str) {
        self.store.rollback(placeholder_id);
        self.emit(SessionUpdate::MessagesChanged);
        if !self.closed && self.composer.restore(draft) {
            self.emit(SessionUpdate::ComposerRestored);
        }
        self.emit(SessionUpdate::Alert(format!("Message not sent: {}", reason)));
    }

    /// Start uploading a file for the next message. Returns false if an
    /// upload is already running.
    pub fn upload_attachment(&mut self, path: impl AsRef<Path>) -> bool {
        if self.closed || self.composer.is_uploading() {
            return false;
        }
        self.composer.set_uploading(true);
        self.emit(SessionUpdate::UploadingChanged(true));

        let path = path.as_ref().to_path_buf();
        let backend = self.backend.clone();
        let tx = self.internal_tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = upload_file(backend.as_ref(), path) => result,
            };
            let _ = tx.send(InternalEvent::UploadFinished(result));
        });
        true
    }

    /// Advisory typing signal; dropped when the socket is down.
    pub fn typing(&mut self) -> bool {
        if !self.transport.is_open() {
            return false;
        }
        self.transport
            .send(ClientFrame::Typing {
                conversation_id: self.conversation_id,
            })
            .is_ok()
    }

    // ── Event processing ───────────────────────────────────────

    /// Wait for and apply the next asynchronous input. Returns false once
    /// the session is closed.
    pub async fn process_next(&mut self) -> bool {
        if self.closed {
            return false;
        }

        if self.resync_pending {
            let cancel = self.cancel.clone();
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.close();
                    return false;
                }
                _ = self.resync() => {}
            }
            return !self.closed;
        }

        let typing_deadline = self.typing.deadline();
        let ack_deadline = self.deliveries.next_deadline();
        let reconnect_at = self.reconnect_at;

        tokio::select! {
            _ = self.cancel.cancelled() => {
                self.close();
                return false;
            }
            event = self.transport.recv() => match event {
                Some(SocketEvent::Frame(event)) => self.handle_server_event(event),
                Some(SocketEvent::Closed(reason)) => self.handle_socket_closed(reason),
                None => self.handle_socket_closed(None),
            },
            Some(event) = self.internal_rx.recv() => self.handle_internal(event),
            _ = sleep_until(typing_deadline) => self.expire_typing(),
            _ = sleep_until(ack_deadline) => self.expire_deliveries(),
            _ = sleep_until(reconnect_at) => self.try_reconnect().await,
        }
        !self.closed
    }

    /// Apply one server event. Events for other conversations are ignored.
    pub fn handle_server_event(&mut self, event: ServerEvent) {
        if let Some(conversation_id) = event.conversation_id() {
            if conversation_id != self.conversation_id {
                log::debug!("Ignoring event for conversation {}", conversation_id);
                return;
            }
        }

        match event {
            ServerEvent::NewMessage { message } => {
                let from_peer = message.sender_id != self.viewer.id;
                match self.store.apply_push(message) {
                    PushOutcome::Appended => {
                        if from_peer {
                            self.typing.reset();
                            self.emit(SessionUpdate::TypingChanged(false));
                        }
                        self.emit(SessionUpdate::MessagesChanged);
                        self.emit(SessionUpdate::ScrollToBottom);
                    }
                    PushOutcome::Confirmed { placeholder_id } => {
                        self.deliveries.acknowledge(placeholder_id);
                        self.emit(SessionUpdate::MessagesChanged);
                    }
                    PushOutcome::Duplicate | PushOutcome::Ignored => {}
                }
            }
            ServerEvent::Typing { user_id, .. } => {
                if user_id == Some(self.viewer.id) {
                    return;
                }
                if self.typing.signal(Instant::now()) {
                    self.emit(SessionUpdate::TypingChanged(true));
                }
            }
            ServerEvent::MessagesRead { reader_id, .. } => {
                if chat_receipts::apply_read(&mut self.store, reader_id) > 0 {
                    self.emit(SessionUpdate::MessagesChanged);
                }
            }
            ServerEvent::MessagesDelivered { receiver_id, .. } => {
                if chat_receipts::apply_delivered(&mut self.store, receiver_id) > 0 {
                    self.emit(SessionUpdate::MessagesChanged);
                }
            }
            ServerEvent::Rejected { error } => {
                log::warn!("Server rejected a socket frame: {}", error);
                match self.deliveries.reject_oldest() {
                    Some(delivery) => self.fail_send(delivery.placeholder_id, delivery.draft, &error),
                    None => self.emit(SessionUpdate::Alert(error)),
                }
            }
        }
    }

    fn handle_socket_closed(&mut self, reason: Option<String>) {
        log::warn!(
            "Socket for conversation {} closed: {}",
            self.conversation_id,
            reason.as_deref().unwrap_or("no reason")
        );
        self.transport.detach();
        if self.typing.deadline().is_some() {
            self.typing.reset();
            self.emit(SessionUpdate::TypingChanged(false));
        }
        self.schedule_reconnect();
    }

    fn handle_internal(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::UploadFinished(result) => {
                self.composer.set_uploading(false);
                self.emit(SessionUpdate::UploadingChanged(false));
                match result {
                    Ok(uploaded) => {
                        let attachment = Attachment::from(uploaded);
                        log::info!("Attachment ready: {} ({})", attachment.url, attachment.kind.as_str());
                        self.composer.attach(attachment.clone());
                        self.emit(SessionUpdate::AttachmentReady(attachment));
                    }
                    Err(e) => {
                        log::warn!("Upload failed: {}", e);
                        self.emit(SessionUpdate::Alert(format!(
                            "Failed to upload media: {}",
                            e.user_message()
                        )));
                    }
                }
            }
        }
    }

    fn expire_typing(&mut self) {
        if self.typing.expire(Instant::now()) {
            self.emit(SessionUpdate::TypingChanged(false));
        }
    }

    fn expire_deliveries(&mut self) {
        for delivery in self.deliveries.take_expired(Instant::now()) {
            self.fail_send(
                delivery.placeholder_id,
                delivery.draft,
                "no confirmation from the server",
            );
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn upload_file(backend: &dyn ChatBackend, path: PathBuf) -> Result<UploadedAttachment> {
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| ExoError::UploadError(format!("Read {:?}: {}", path, e)))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "attachment".to_string());
    let mime_type = mime_guess::from_path(&path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();
    log::info!("Uploading {} ({}, {} bytes)", file_name, mime_type, bytes.len());
    backend.upload_attachment(file_name, mime_type, bytes).await
}
