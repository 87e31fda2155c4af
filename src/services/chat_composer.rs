use super::chat_types::{Attachment, NewMessage};

/// Keys the composer reacts to specially.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposerKey {
    Enter,
    Char(char),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Submit,
    InsertNewline,
    Edit,
}

/// What the composer held when a send was started; used to restore it if
/// the send fails.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub text: String,
    pub attachment: Option<Attachment>,
}

impl Draft {
    pub fn trimmed_content(&self) -> Option<String> {
        let trimmed = self.text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    pub fn to_new_message(&self, client_ref: &str) -> NewMessage {
        NewMessage {
            content: self.trimmed_content(),
            attachment_url: self.attachment.as_ref().map(|a| a.url.clone()),
            attachment_type: self.attachment.as_ref().map(|a| a.kind.as_str().to_string()),
            attachment_public_id: self.attachment.as_ref().and_then(|a| a.public_id.clone()),
            client_ref: Some(client_ref.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Composer {
    text: String,
    attachment: Option<Attachment>,
    uploading: bool,
}

impl Composer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }

    pub fn attach(&mut self, attachment: Attachment) {
        self.attachment = Some(attachment);
    }

    pub fn detach(&mut self) {
        self.attachment = None;
    }

    pub fn is_uploading(&self) -> bool {
        self.uploading
    }

    pub fn set_uploading(&mut self, uploading: bool) {
        self.uploading = uploading;
    }

    /// Whether a send would do anything.
    pub fn can_send(&self) -> bool {
        !self.uploading && (!self.text.trim().is_empty() || self.attachment.is_some())
    }

    /// Enter submits; Shift+Enter inserts a newline.
    pub fn handle_key(&mut self, key: ComposerKey, shift: bool) -> KeyAction {
        match key {
            ComposerKey::Enter if shift => {
                self.text.push('\n');
                KeyAction::InsertNewline
            }
            ComposerKey::Enter => KeyAction::Submit,
            ComposerKey::Char(c) => {
                self.text.push(c);
                KeyAction::Edit
            }
        }
    }

    /// Clear the composer and hand back what it held. `None` when there is
    /// nothing to send or an upload is in progress.
    pub fn take(&mut self) -> Option<Draft> {
        if !self.can_send() {
            return None;
        }
        Some(Draft {
            text: std::mem::take(&mut self.text),
            attachment: self.attachment.take(),
        })
    }

    /// Put a failed draft back. Text the user typed since is kept.
    pub fn restore(&mut self, draft: Draft) -> bool {
        if !self.text.is_empty() {
            return false;
        }
        self.text = draft.text;
        if self.attachment.is_none() {
            self.attachment = draft.attachment;
        }
        true
    }
}
