//! Delivery and read receipts.
//!
//! Receipt events flip flags on stored messages; content and order are
//! never touched.

use super::chat_message_store::MessageStore;

/// Apply `messages_read { reader_id }`: everything not sent by the reader is
/// now read, and therefore delivered. Returns the number of messages changed.
pub fn apply_read(store: &mut MessageStore, reader_id: i64) -> usize {
    let mut changed = 0;
    for message in store.messages_mut() {
        if message.sender_id == reader_id {
            continue;
        }
        if !message.is_read || !message.is_delivered {
            message.is_read = true;
            message.is_delivered = true;
            changed += 1;
        }
    }
    changed
}

/// Apply `messages_delivered { receiver_id }`: everything not sent by the
/// receiver reached their client.
pub fn apply_delivered(store: &mut MessageStore, receiver_id: i64) -> usize {
    let mut changed = 0;
    for message in store.messages_mut() {
        if message.sender_id != receiver_id && !message.is_delivered {
            message.is_delivered = true;
            changed += 1;
        }
    }
    changed
}

/// Receipt ticks for the viewer's own message, as the sender sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptMark {
    Pending,
    Sent,
    Delivered,
    Read,
}

pub fn receipt_mark(is_pending: bool, is_delivered: bool, is_read: bool) -> ReceiptMark {
    if is_pending {
        ReceiptMark::Pending
    } else if is_read {
        ReceiptMark::Read
    } else if is_delivered {
        ReceiptMark::Delivered
    } else {
        ReceiptMark::Sent
    }
}
