//! In-memory message list for the open conversation.
//!
//! Three producers write here: the initial REST load, socket pushes and
//! optimistic local sends. Every operation keeps the list unique by server
//! id; placeholders are replaced in place when their confirmation arrives.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;

use super::chat_types::{Message, MessageId, StoredMessage};

/// A push within this window of a pending placeholder with the same sender
/// and payload is taken to be that placeholder's confirmation.
const CONFIRM_WINDOW_SECS: i64 = 30;

/// Result of applying a socket `new_message` push.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// New entry at the end of the list.
    Appended,
    /// A pending placeholder now carries the server id.
    Confirmed { placeholder_id: i64 },
    /// Already present by server id.
    Duplicate,
    /// Belongs to another conversation.
    Ignored,
}

/// Result of applying a REST acknowledgement for a placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmOutcome {
    /// Placeholder replaced in place.
    Replaced,
    /// The push got there first; the placeholder was dropped.
    AlreadyPresent,
    /// The placeholder was gone (rolled back); the message was appended.
    Appended,
}

/// Result of the initial REST load.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// `confirmed` lists placeholders the load showed to be persisted.
    Loaded { count: usize, confirmed: Vec<i64> },
    /// Response for a conversation that is no longer active.
    Stale,
}

pub struct MessageStore {
    conversation_id: i64,
    messages: Vec<StoredMessage>,
    strict_ordering: bool,
    last_placeholder: i64,
}

impl MessageStore {
    pub fn new(conversation_id: i64, strict_ordering: bool) -> Self {
        Self {
            conversation_id,
            messages: Vec::new(),
            strict_ordering,
            last_placeholder: 0,
        }
    }

    pub fn conversation_id(&self) -> i64 {
        self.conversation_id
    }

    pub fn messages(&self) -> &[StoredMessage] {
        &self.messages
    }

    pub fn messages_mut(&mut self) -> &mut [StoredMessage] {
        &mut self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: MessageId) -> Option<&StoredMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn contains_server_id(&self, id: i64) -> bool {
        self.messages.iter().any(|m| m.id == MessageId::Server(id))
    }

    pub fn pending_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_pending()).count()
    }

    /// Replace the list with a REST load, keeping any placeholders still in
    /// flight. Server order is trusted.
    ///
    /// A placeholder whose message turns up in the load is dropped and its id
    /// reported in `confirmed`. Only messages new to the store are candidates.
    pub fn replace_all(&mut self, conversation_id: i64, loaded: Vec<Message>) -> LoadOutcome {
        if conversation_id != self.conversation_id {
            log::debug!(
                "Discarding load for conversation {} (active {})",
                conversation_id,
                self.conversation_id
            );
            return LoadOutcome::Stale;
        }

        let (pending, known): (Vec<StoredMessage>, Vec<StoredMessage>) =
            self.messages.drain(..).partition(|m| m.is_pending());
        let known: HashSet<i64> = known.iter().filter_map(|m| m.id.server_id()).collect();

        let mut fresh = Vec::new();
        for message in loaded {
            if message.conversation_id != self.conversation_id {
                continue;
            }
            if self.contains_server_id(message.id) {
                continue;
            }
            if !known.contains(&message.id) {
                fresh.push(message.clone());
            }
            self.messages.push(StoredMessage::from(message));
        }

        let mut claimed = HashSet::new();
        let mut confirmed = Vec::new();
        for placeholder in pending {
            let by_ref = placeholder.client_ref.as_deref().and_then(|reference| {
                fresh.iter().find(|m| {
                    !claimed.contains(&m.id) && m.client_ref.as_deref() == Some(reference)
                })
            });
            let matched = by_ref.or_else(|| {
                fresh
                    .iter()
                    .find(|m| !claimed.contains(&m.id) && same_payload(&placeholder, m))
            });

            match (matched, placeholder.id) {
                (Some(message), MessageId::Placeholder(placeholder_id)) => {
                    log::debug!(
                        "Load confirmed placeholder {} as {}",
                        placeholder_id,
                        message.id
                    );
                    claimed.insert(message.id);
                    confirmed.push(placeholder_id);
                }
                _ => self.messages.push(placeholder),
            }
        }

        if self.strict_ordering {
            self.sort();
        }
        LoadOutcome::Loaded {
            count: self.messages.len(),
            confirmed,
        }
    }

    /// Next placeholder id: epoch millis, strictly increasing.
    pub fn next_placeholder_id(&mut self, now: DateTime<Utc>) -> i64 {
        let id = now.timestamp_millis().max(self.last_placeholder + 1);
        self.last_placeholder = id;
        id
    }

    /// Append an optimistic entry.
    pub fn insert_placeholder(&mut self, placeholder: StoredMessage) {
        debug_assert!(placeholder.is_pending());
        self.messages.push(placeholder);
        if self.strict_ordering {
            self.sort();
        }
    }

    /// Merge a socket push.
    pub fn apply_push(&mut self, message: Message) -> PushOutcome {
        if message.conversation_id != self.conversation_id {
            return PushOutcome::Ignored;
        }
        if self.contains_server_id(message.id) {
            return PushOutcome::Duplicate;
        }

        if let Some((index, placeholder_id)) = self.find_placeholder_for(&message) {
            self.messages[index] = StoredMessage::from(message);
            if self.strict_ordering {
                self.sort();
            }
            return PushOutcome::Confirmed { placeholder_id };
        }

        self.messages.push(StoredMessage::from(message));
        if self.strict_ordering {
            self.sort();
        }
        PushOutcome::Appended
    }

    /// Apply the REST acknowledgement of placeholder `placeholder_id`.
    pub fn confirm(&mut self, placeholder_id: i64, message: Message) -> ConfirmOutcome {
        let index = self
            .messages
            .iter()
            .position(|m| m.id == MessageId::Placeholder(placeholder_id));
        let already_present = self.contains_server_id(message.id);

        match (index, already_present) {
            (Some(index), true) => {
                self.messages.remove(index);
                ConfirmOutcome::AlreadyPresent
            }
            (Some(index), false) => {
                self.messages[index] = StoredMessage::from(message);
                if self.strict_ordering {
                    self.sort();
                }
                ConfirmOutcome::Replaced
            }
            (None, true) => ConfirmOutcome::AlreadyPresent,
            (None, false) => {
                self.messages.push(StoredMessage::from(message));
                if self.strict_ordering {
                    self.sort();
                }
                ConfirmOutcome::Appended
            }
        }
    }

    /// Remove a placeholder after its send failed.
    pub fn rollback(&mut self, placeholder_id: i64) -> Option<StoredMessage> {
        let index = self
            .messages
            .iter()
            .position(|m| m.id == MessageId::Placeholder(placeholder_id))?;
        Some(self.messages.remove(index))
    }

    /// Locate the placeholder a push confirms: exact `client_ref` match
    /// first, then the oldest placeholder from the same sender with the same
    /// payload created close in time.
    fn find_placeholder_for(&self, message: &Message) -> Option<(usize, i64)> {
        let pending = || {
            self.messages
                .iter()
                .enumerate()
                .filter_map(|(index, m)| match m.id {
                    MessageId::Placeholder(id) => Some((index, id, m)),
                    MessageId::Server(_) => None,
                })
        };

        if let Some(reference) = message.client_ref.as_deref() {
            if let Some((index, id, _)) =
                pending().find(|(_, _, m)| m.client_ref.as_deref() == Some(reference))
            {
                return Some((index, id));
            }
        }

        pending()
            .find(|(_, _, m)| same_payload(m, message))
            .map(|(index, id, _)| (index, id))
    }

    fn sort(&mut self) {
        self.messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    }
}

/// Same sender and payload, created close in time.
fn same_payload(placeholder: &StoredMessage, message: &Message) -> bool {
    let window = Duration::seconds(CONFIRM_WINDOW_SECS);
    placeholder.sender_id == message.sender_id
        && normalized(placeholder.content.as_deref()) == normalized(message.content.as_deref())
        && placeholder.attachment_url() == message.attachment_url.as_deref()
        && (message.created_at - placeholder.created_at).abs() <= window
}

fn normalized(content: Option<&str>) -> Option<&str> {
    content.map(str::trim).filter(|c| !c.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn msg(id: i64, sender: i64, content: &str, secs: i64) -> Message {
        Message {
            id,
            conversation_id: 7,
            sender_id: sender,
            content: Some(content.to_string()),
            attachment_url: None,
            attachment_type: None,
            attachment_public_id: None,
            is_read: false,
            is_delivered: false,
            created_at: at(secs),
            client_ref: None,
        }
    }

    fn placeholder(store: &mut MessageStore, sender: i64, content: &str, secs: i64) -> i64 {
        let id = store.next_placeholder_id(at(secs));
        store.insert_placeholder(StoredMessage {
            id: MessageId::Placeholder(id),
            conversation_id: 7,
            sender_id: sender,
            content: Some(content.to_string()),
            attachment: None,
            created_at: at(secs),
            is_delivered: false,
            is_read: false,
            client_ref: Some(format!("ref-{}", id)),
        });
        id
    }

    fn ids(store: &MessageStore) -> Vec<MessageId> {
        store.messages().iter().map(|m| m.id).collect()
    }

    #[test]
    fn test_initial_load_keeps_server_order_and_push_appends() {
        let mut store = MessageStore::new(7, false);
        store.replace_all(7, vec![msg(101, 1, "Hi", 0), msg(102, 2, "Hello", 5)]);
        assert_eq!(store.apply_push(msg(103, 1, "Is it available?", 10)), PushOutcome::Appended);
        assert_eq!(
            ids(&store),
            vec![
                MessageId::Server(101),
                MessageId::Server(102),
                MessageId::Server(103)
            ]
        );
    }

    #[rstest]
    #[case(vec![1, 1])]
    #[case(vec![1, 2, 1, 2, 3])]
    #[case(vec![5, 4, 5, 4, 5])]
    fn test_pushes_never_duplicate(#[case] push_ids: Vec<i64>) {
        let mut store = MessageStore::new(7, false);
        for id in &push_ids {
            store.apply_push(msg(*id, 2, &format!("m{}", id), *id));
        }
        let mut unique = push_ids.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(store.len(), unique.len());
    }

    #[test]
    fn test_push_already_loaded_is_duplicate() {
        let mut store = MessageStore::new(7, false);
        store.replace_all(7, vec![msg(101, 1, "Hi", 0)]);
        assert_eq!(store.apply_push(msg(101, 1, "Hi", 0)), PushOutcome::Duplicate);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_push_for_other_conversation_ignored() {
        let mut store = MessageStore::new(7, false);
        let mut other = msg(1, 2, "elsewhere", 0);
        other.conversation_id = 8;
        assert_eq!(store.apply_push(other), PushOutcome::Ignored);
        assert!(store.is_empty());
    }

    #[test]
    fn test_rest_confirmation_replaces_placeholder() {
        let mut store = MessageStore::new(7, false);
        let pid = placeholder(&mut store, 1, "test", 0);
        assert_eq!(pid, 1_700_000_000_000);

        assert_eq!(store.confirm(pid, msg(555, 1, "test", 1)), ConfirmOutcome::Replaced);
        assert_eq!(ids(&store), vec![MessageId::Server(555)]);
        assert_eq!(store.messages()[0].content.as_deref(), Some("test"));
    }

    #[test]
    fn test_confirmation_keeps_position() {
        let mut store = MessageStore::new(7, false);
        let pid = placeholder(&mut store, 1, "first", 0);
        store.apply_push(msg(200, 2, "reply", 1));

        store.confirm(pid, msg(199, 1, "first", 0));
        assert_eq!(ids(&store), vec![MessageId::Server(199), MessageId::Server(200)]);
    }

    #[test]
    fn test_push_with_client_ref_confirms_placeholder() {
        let mut store = MessageStore::new(7, false);
        let pid = placeholder(&mut store, 1, "test", 0);

        let mut echoed = msg(555, 1, "test", 2);
        echoed.client_ref = Some(format!("ref-{}", pid));
        assert_eq!(
            store.apply_push(echoed),
            PushOutcome::Confirmed {
                placeholder_id: pid
            }
        );

        // late REST ack for the same send
        assert_eq!(store.confirm(pid, msg(555, 1, "test", 2)), ConfirmOutcome::AlreadyPresent);
        assert_eq!(ids(&store), vec![MessageId::Server(555)]);
    }

    #[test]
    fn test_push_without_ref_confirms_by_heuristic() {
        let mut store = MessageStore::new(7, false);
        let pid = placeholder(&mut store, 1, "  test ", 0);

        assert_eq!(
            store.apply_push(msg(555, 1, "test", 3)),
            PushOutcome::Confirmed {
                placeholder_id: pid
            }
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_heuristic_respects_sender_and_window() {
        let mut store = MessageStore::new(7, false);
        placeholder(&mut store, 1, "ok", 0);

        // peer sending the same text is not our confirmation
        assert_eq!(store.apply_push(msg(10, 2, "ok", 1)), PushOutcome::Appended);
        // too far apart in time
        assert_eq!(store.apply_push(msg(11, 1, "ok", 120)), PushOutcome::Appended);
        assert_eq!(store.pending_count(), 1);
    }

    #[test]
    fn test_identical_sends_confirm_oldest_first() {
        let mut store = MessageStore::new(7, false);
        let first = placeholder(&mut store, 1, "ping", 0);
        let second = placeholder(&mut store, 1, "ping", 0);
        assert!(second > first);

        assert_eq!(
            store.apply_push(msg(1, 1, "ping", 1)),
            PushOutcome::Confirmed {
                placeholder_id: first
            }
        );
        assert_eq!(
            store.apply_push(msg(2, 1, "ping", 1)),
            PushOutcome::Confirmed {
                placeholder_id: second
            }
        );
        assert_eq!(ids(&store), vec![MessageId::Server(1), MessageId::Server(2)]);
    }

    #[test]
    fn test_rollback_restores_previous_state() {
        let mut store = MessageStore::new(7, false);
        store.replace_all(7, vec![msg(101, 1, "Hi", 0)]);
        let before = store.messages().to_vec();

        let pid = placeholder(&mut store, 1, "oops", 5);
        let removed = store.rollback(pid).unwrap();
        assert_eq!(removed.content.as_deref(), Some("oops"));
        assert_eq!(store.messages(), before.as_slice());
        assert!(store.rollback(pid).is_none());
    }

    #[test]
    fn test_confirm_after_rollback_appends() {
        let mut store = MessageStore::new(7, false);
        let pid = placeholder(&mut store, 1, "late", 0);
        store.rollback(pid);
        assert_eq!(store.confirm(pid, msg(9, 1, "late", 0)), ConfirmOutcome::Appended);
        assert_eq!(ids(&store), vec![MessageId::Server(9)]);
    }

    #[test]
    fn test_stale_load_discarded() {
        let mut store = MessageStore::new(7, false);
        let mut foreign = msg(1, 1, "x", 0);
        foreign.conversation_id = 3;
        assert_eq!(store.replace_all(3, vec![foreign]), LoadOutcome::Stale);
        assert!(store.is_empty());
    }

    #[test]
    fn test_reload_keeps_placeholders_and_dedupes() {
        let mut store = MessageStore::new(7, false);
        let pid = placeholder(&mut store, 1, "in flight", 0);
        let outcome = store.replace_all(7, vec![msg(1, 2, "a", 0), msg(1, 2, "a", 0), msg(2, 2, "b", 1)]);
        assert_eq!(
            outcome,
            LoadOutcome::Loaded {
                count: 3,
                confirmed: vec![]
            }
        );
        assert_eq!(
            ids(&store),
            vec![
                MessageId::Server(1),
                MessageId::Server(2),
                MessageId::Placeholder(pid)
            ]
        );
    }

    #[test]
    fn test_reload_drops_placeholder_already_confirmed_by_ref() {
        let mut store = MessageStore::new(7, false);
        let pid = placeholder(&mut store, 1, "sent", 0);
        let mut persisted = msg(40, 1, "sent", 0);
        persisted.client_ref = Some(format!("ref-{}", pid));
        store.replace_all(7, vec![persisted]);
        assert_eq!(ids(&store), vec![MessageId::Server(40)]);
    }

    #[test]
    fn test_reload_confirms_placeholder_without_ref() {
        let mut store = MessageStore::new(7, false);
        store.replace_all(7, vec![msg(101, 2, "Hello", 0)]);
        let pid = placeholder(&mut store, 1, "hi", 5);

        let outcome = store.replace_all(7, vec![msg(101, 2, "Hello", 0), msg(555, 1, "hi", 6)]);
        assert_eq!(
            outcome,
            LoadOutcome::Loaded {
                count: 2,
                confirmed: vec![pid]
            }
        );
        assert_eq!(ids(&store), vec![MessageId::Server(101), MessageId::Server(555)]);
    }

    #[test]
    fn test_reload_does_not_confirm_with_known_message() {
        let mut store = MessageStore::new(7, false);
        store.replace_all(7, vec![msg(500, 1, "hi", 0)]);
        let pid = placeholder(&mut store, 1, "hi", 3);

        // the second "hi" was not persisted yet
        let outcome = store.replace_all(7, vec![msg(500, 1, "hi", 0)]);
        assert_eq!(
            outcome,
            LoadOutcome::Loaded {
                count: 2,
                confirmed: vec![]
            }
        );
        assert_eq!(ids(&store), vec![MessageId::Server(500), MessageId::Placeholder(pid)]);
    }

    #[test]
    fn test_reload_pairs_identical_placeholders_once_each() {
        let mut store = MessageStore::new(7, false);
        let first = placeholder(&mut store, 1, "ok", 0);
        let second = placeholder(&mut store, 1, "ok", 1);

        let outcome = store.replace_all(7, vec![msg(10, 1, "ok", 0)]);
        assert_eq!(
            outcome,
            LoadOutcome::Loaded {
                count: 2,
                confirmed: vec![first]
            }
        );
        assert_eq!(ids(&store), vec![MessageId::Server(10), MessageId::Placeholder(second)]);
    }

    #[test]
    fn test_strict_ordering_sorts_out_of_order_push() {
        let mut store = MessageStore::new(7, true);
        store.replace_all(7, vec![msg(1, 1, "a", 0), msg(3, 1, "c", 20)]);
        store.apply_push(msg(2, 2, "b", 10));
        assert_eq!(
            ids(&store),
            vec![MessageId::Server(1), MessageId::Server(2), MessageId::Server(3)]
        );

        let mut relaxed = MessageStore::new(7, false);
        relaxed.replace_all(7, vec![msg(1, 1, "a", 0), msg(3, 1, "c", 20)]);
        relaxed.apply_push(msg(2, 2, "b", 10));
        assert_eq!(relaxed.messages().last().unwrap().id, MessageId::Server(2));
    }

    #[test]
    fn test_placeholder_ids_strictly_increase() {
        let mut store = MessageStore::new(7, false);
        let a = store.next_placeholder_id(at(0));
        let b = store.next_placeholder_id(at(0));
        let c = store.next_placeholder_id(at(-5));
        assert!(a < b && b < c);
    }
}
