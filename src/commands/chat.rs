use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::error::{ExoError, Result};
use crate::services::chat_composer::{ComposerKey, KeyAction};
use crate::services::chat_receipts::{receipt_mark, ReceiptMark};
use crate::services::chat_types::{ConversationSummary, StoredMessage};
use crate::services::{ChatSession, ConnectionStatus, SendOutcome, SessionUpdate};
use crate::state::AppState;

/// One line of user input.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    List,
    Open(i64),
    Start(i64),
    Attach(PathBuf),
    Detach,
    Typing,
    Show,
    /// Submit the composer as it is (e.g. an attachment without text).
    Send,
    Close,
    Help,
    Quit,
    /// Composer text. `submit` is false for a line continued with `\`.
    Compose { text: String, submit: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub const HELP: &str = "\
/list                 show conversations
/open <id>            open a conversation
/start <listing_id>   message the seller of a listing
/attach <path>        upload a file for the next message
/detach               drop the pending attachment
/typing               tell the other side you are typing
/show                 reprint the open conversation
/send                 send the composer as is (attachment only)
/close                back to the inbox
/quit                 exit
<text>                send; end the line with \\ for a newline";

/// Parse one input line. Empty lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<ChatCommand>> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(None);
    }

    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(compose(line)));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    let command = match name {
        "list" | "ls" => ChatCommand::List,
        "open" => ChatCommand::Open(parse_id(arg, "/open <conversation_id>")?),
        "start" => ChatCommand::Start(parse_id(arg, "/start <listing_id>")?),
        "attach" => {
            if arg.is_empty() {
                return Err(usage("/attach <path>"));
            }
            ChatCommand::Attach(PathBuf::from(arg))
        }
        "detach" => ChatCommand::Detach,
        "typing" => ChatCommand::Typing,
        "show" => ChatCommand::Show,
        "send" => ChatCommand::Send,
        "close" | "back" => ChatCommand::Close,
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" => ChatCommand::Quit,
        other => {
            return Err(ExoError::ChatError(format!(
                "Unknown command /{} (try /help)",
                other
            )))
        }
    };
    Ok(Some(command))
}

fn compose(line: &str) -> ChatCommand {
    match line.strip_suffix('\\') {
        Some(text) => ChatCommand::Compose {
            text: text.to_string(),
            submit: false,
        },
        None => ChatCommand::Compose {
            text: line.to_string(),
            submit: true,
        },
    }
}

fn parse_id(arg: &str, usage_text: &str) -> Result<i64> {
    arg.parse::<i64>().map_err(|_| usage(usage_text))
}

fn usage(text: &str) -> ExoError {
    ExoError::ChatError(format!("Usage: {}", text))
}

/// Run one command against the app state.
pub async fn execute(
    state: &AppState,
    command: ChatCommand,
    updates: &mpsc::UnboundedSender<SessionUpdate>,
) -> Result<Flow> {
    let mut chat = state.chat.write().await;

    match command {
        ChatCommand::List => {
            let viewer = chat.viewer().await?;
            let conversations = chat.list_conversations().await?;
            if conversations.is_empty() {
                println!("No conversations yet. Use /start <listing_id> to message a seller.");
            }
            for summary in conversations {
                println!("{}", format_summary(summary, viewer.id));
            }
            println!("{} unread", chat.total_unread());
        }
        ChatCommand::Open(conversation_id) => {
            chat.open_conversation(conversation_id, updates.clone()).await?;
            if let Some(session) = chat.active() {
                print_conversation(session);
            }
        }
        ChatCommand::Start(listing_id) => {
            let summary = chat.start_conversation(listing_id).await?;
            println!("Conversation {} about \"{}\"", summary.id, summary.listing.title);
            chat.open_conversation(summary.id, updates.clone()).await?;
            if let Some(session) = chat.active() {
                print_conversation(session);
            }
        }
        ChatCommand::Attach(path) => {
            let session = chat.require_active()?;
            if !session.upload_attachment(&path) {
                println!("An upload is already running");
            }
        }
        ChatCommand::Detach => {
            chat.require_active()?.composer_mut().detach();
            println!("Attachment removed");
        }
        ChatCommand::Typing => {
            if !chat.require_active()?.typing() {
                log::debug!("Typing signal dropped, socket is not open");
            }
        }
        ChatCommand::Show => print_conversation(chat.require_active()?),
        ChatCommand::Send => {
            let session = chat.require_active()?;
            if type_line(session, "", true) == KeyAction::Submit {
                report_send(session.send_message().await);
            }
        }
        ChatCommand::Close => chat.close_conversation(),
        ChatCommand::Help => println!("{}", HELP),
        ChatCommand::Quit => {
            chat.close_conversation();
            return Ok(Flow::Quit);
        }
        ChatCommand::Compose { text, submit } => {
            let session = chat.require_active()?;
            if type_line(session, &text, submit) == KeyAction::Submit {
                report_send(session.send_message().await);
            }
        }
    }
    Ok(Flow::Continue)
}

/// Feed a line through the composer key handling.
fn type_line(session: &mut ChatSession, text: &str, submit: bool) -> KeyAction {
    let composer = session.composer_mut();
    for c in text.chars() {
        composer.handle_key(ComposerKey::Char(c), false);
    }
    composer.handle_key(ComposerKey::Enter, !submit)
}

fn report_send(outcome: SendOutcome) {
    match outcome {
        SendOutcome::Skipped => println!("Nothing to send"),
        SendOutcome::Rejected(reason) => println!("! {}", reason),
        SendOutcome::Pending { .. }
        | SendOutcome::Confirmed { .. }
        | SendOutcome::RolledBack { .. } => {}
    }
}

pub fn format_summary(summary: &ConversationSummary, viewer_id: i64) -> String {
    let role = if summary.is_buyer(viewer_id) { "seller" } else { "buyer" };
    let unread = if summary.unread_count > 0 {
        format!(" ({} new)", summary.unread_count)
    } else {
        String::new()
    };
    format!(
        "#{:<5} {} [{}] {} ${:.2}{}: {}",
        summary.id,
        summary.partner(viewer_id).name,
        role,
        summary.listing.title,
        summary.listing.price,
        unread,
        summary.preview()
    )
}

fn mark_text(mark: ReceiptMark) -> &'static str {
    match mark {
        ReceiptMark::Pending => "sending",
        ReceiptMark::Sent => "sent",
        ReceiptMark::Delivered => "delivered",
        ReceiptMark::Read => "read",
    }
}

pub fn format_message(message: &StoredMessage, viewer_id: i64) -> String {
    let mine = message.sender_id == viewer_id;
    let who = if mine { "you" } else { "them" };
    let mut body = message.content.clone().unwrap_or_default();
    if let Some(attachment) = &message.attachment {
        if !body.is_empty() {
            body.push(' ');
        }
        body.push_str(&format!("[{}: {}]", attachment.kind.as_str(), attachment.url));
    }
    let line = format!(
        "[{}] {}: {}",
        message.created_at.format("%H:%M"),
        who,
        body
    );
    if mine {
        let mark = receipt_mark(message.is_pending(), message.is_delivered, message.is_read);
        format!("{}  ({})", line, mark_text(mark))
    } else {
        line
    }
}

fn print_conversation(session: &ChatSession) {
    println!("── conversation {} ──", session.conversation_id());
    for message in session.messages() {
        println!("{}", format_message(message, session.viewer().id));
    }
}

/// Text for a session update, if it warrants one.
pub fn render_update(session: Option<&ChatSession>, update: &SessionUpdate) -> Option<String> {
    match update {
        SessionUpdate::MessagesChanged => None,
        SessionUpdate::ScrollToBottom => {
            let session = session?;
            let last = session.messages().last()?;
            Some(format_message(last, session.viewer().id))
        }
        SessionUpdate::TypingChanged(true) => Some("… typing".to_string()),
        SessionUpdate::TypingChanged(false) => None,
        SessionUpdate::ConnectionChanged(status) => match status {
            ConnectionStatus::Connected => Some("(live)".to_string()),
            ConnectionStatus::Reconnecting => Some("(connection lost, retrying)".to_string()),
            ConnectionStatus::Disconnected => {
                Some("(offline, messages go over HTTP)".to_string())
            }
            ConnectionStatus::Connecting | ConnectionStatus::Closed => None,
        },
        SessionUpdate::ComposerRestored => {
            let text = session?.composer().text().to_string();
            Some(format!("Draft restored: {}", text))
        }
        SessionUpdate::UploadingChanged(true) => Some("Uploading…".to_string()),
        SessionUpdate::UploadingChanged(false) => None,
        SessionUpdate::AttachmentReady(attachment) => Some(format!(
            "Attached {} {} (type a caption or /send)",
            attachment.kind.as_str(),
            attachment.url
        )),
        SessionUpdate::Alert(text) => Some(format!("! {}", text)),
        SessionUpdate::ReturnToList => {
            Some("Conversation not found. Use /list to pick another.".to_string())
        }
        SessionUpdate::LoadFailed(reason) => Some(format!(
            "Could not load conversation: {} (/list to go back)",
            reason
        )),
    }
}

/// Read commands from stdin until `/quit` or end of input, driving the open
/// conversation in between.
pub async fn run_repl(state: AppState) -> Result<()> {
    let (updates_tx, mut updates_rx) = mpsc::unbounded_channel();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", HELP);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_command(&line) {
                    Ok(Some(command)) => match execute(&state, command, &updates_tx).await {
                        Ok(Flow::Quit) => break,
                        Ok(Flow::Continue) => {}
                        Err(e) => println!("! {}", e.user_message()),
                    },
                    Ok(None) => {}
                    Err(e) => println!("! {}", e.user_message()),
                }
            }
            Some(update) = updates_rx.recv() => {
                let chat = state.chat.read().await;
                if let Some(text) = render_update(chat.active(), &update) {
                    println!("{}", text);
                }
            }
            _ = async { state.chat.write().await.process_next().await } => {}
        }
    }

    state.chat.write().await.close_conversation();
    Ok(())
}
