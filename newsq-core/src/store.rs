use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::model::{
    Chat, ChatListItem, ChatMessage, MessagePatch, MessageRole, NewMessage, truncate_chars,
};
use crate::slot::StorageSlot;

pub const DEFAULT_CHAT_TITLE: &str = "New Chat";
pub const TITLE_MAX_CHARS: usize = 50;

pub fn derive_title(content: &str) -> String {
    truncate_chars(content.trim(), TITLE_MAX_CHARS)
}

/// Owns every chat, keyed by thread id, and writes the whole map back to its
/// slot after each mutation.
///
/// Storage failures are logged and never surface to callers: the in-memory
/// map stays authoritative for the rest of the process.
#[derive(Debug)]
pub struct ChatStore<S: StorageSlot> {
    chats: BTreeMap<String, Chat>,
    current: Option<String>,
    last_tick: Option<DateTime<Utc>>,
    slot: S,
}

impl<S: StorageSlot> ChatStore<S> {
    pub fn load(slot: S) -> Self {
        let chats = match slot.read() {
            Ok(Some(raw)) => match serde_json::from_str::<BTreeMap<String, Chat>>(&raw) {
                Ok(chats) => chats,
                Err(err) => {
                    tracing::warn!(
                        slot = %slot.describe(),
                        error = %err,
                        "discarding unreadable chat store"
                    );
                    BTreeMap::new()
                }
            },
            Ok(None) => BTreeMap::new(),
            Err(err) => {
                tracing::warn!(
                    slot = %slot.describe(),
                    error = %err,
                    "failed reading chat store; starting empty"
                );
                BTreeMap::new()
            }
        };

        let last_tick = chats.values().map(|chat| chat.updated_at).max();
        Self {
            chats,
            current: None,
            last_tick,
            slot,
        }
    }

    pub fn slot(&self) -> &S {
        &self.slot
    }

    pub fn len(&self) -> usize {
        self.chats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chats.is_empty()
    }

    pub fn get(&self, thread_id: &str) -> Option<&Chat> {
        self.chats.get(thread_id)
    }

    pub fn contains(&self, thread_id: &str) -> bool {
        self.chats.contains_key(thread_id)
    }

    pub fn current_thread_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn current_chat(&self) -> Option<&Chat> {
        self.current
            .as_deref()
            .and_then(|thread_id| self.chats.get(thread_id))
    }

    /// All chats as list items, most recently updated first.
    pub fn list(&self) -> Vec<ChatListItem> {
        let mut chats = self.chats.values().collect::<Vec<_>>();
        chats.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.thread_id.cmp(&b.thread_id))
        });
        chats.into_iter().map(ChatListItem::from).collect()
    }

    pub fn create_chat(&mut self) -> String {
        let mut thread_id = new_thread_id();
        while self.chats.contains_key(&thread_id) {
            thread_id = new_thread_id();
        }

        let now = self.tick();
        self.chats.insert(
            thread_id.clone(),
            Chat {
                id: Uuid::new_v4().to_string(),
                thread_id: thread_id.clone(),
                title: DEFAULT_CHAT_TITLE.to_string(),
                messages: Vec::new(),
                created_at: now,
                updated_at: now,
            },
        );
        self.current = Some(thread_id.clone());
        self.persist();
        thread_id
    }

    /// Selects an existing chat as current.
    pub fn load_chat(&mut self, thread_id: &str) -> Option<&Chat> {
        if !self.chats.contains_key(thread_id) {
            return None;
        }
        self.current = Some(thread_id.to_string());
        self.chats.get(thread_id)
    }

    /// Ensures a chat exists for a backend-assigned thread id. Returns `true`
    /// only when the chat was created by this call.
    pub fn register_thread(&mut self, thread_id: &str, seed_title: &str) -> bool {
        if self.chats.contains_key(thread_id) {
            return false;
        }

        let title = if seed_title.trim().is_empty() {
            DEFAULT_CHAT_TITLE.to_string()
        } else {
            derive_title(seed_title)
        };
        let now = self.tick();
        self.chats.insert(
            thread_id.to_string(),
            Chat {
                id: Uuid::new_v4().to_string(),
                thread_id: thread_id.to_string(),
                title,
                messages: Vec::new(),
                created_at: now,
                updated_at: now,
            },
        );
        self.persist();
        true
    }

    /// Appends a message to `thread_id`, or to the current chat when omitted.
    /// Returns the new message id, or `None` when the target chat is unknown.
    pub fn add_message(&mut self, message: NewMessage, thread_id: Option<&str>) -> Option<String> {
        let Some(target) = thread_id
            .map(ToString::to_string)
            .or_else(|| self.current.clone())
        else {
            tracing::debug!("add_message without a target chat; ignoring");
            return None;
        };
        if !self.chats.contains_key(&target) {
            tracing::debug!(thread_id = %target, "add_message for unknown chat; ignoring");
            return None;
        }

        let now = self.tick();
        let chat = self.chats.get_mut(&target)?;
        let is_first_user_message = message.role == MessageRole::User
            && !chat
                .messages
                .iter()
                .any(|existing| existing.role == MessageRole::User);
        if is_first_user_message && !message.content.trim().is_empty() {
            chat.title = derive_title(&message.content);
        }

        let id = Uuid::now_v7().to_string();
        chat.messages.push(ChatMessage {
            id: id.clone(),
            role: message.role,
            content: message.content,
            timestamp: now,
            answer: message.answer,
        });
        chat.updated_at = now;
        self.persist();
        Some(id)
    }

    /// Merges `patch` into the current chat's last message.
    pub fn update_last_message(&mut self, patch: MessagePatch) -> bool {
        if patch.is_empty() {
            return false;
        }
        let Some(target) = self.current.clone() else {
            return false;
        };
        let has_messages = self
            .chats
            .get(&target)
            .is_some_and(|chat| !chat.messages.is_empty());
        if !has_messages {
            return false;
        }

        let now = self.tick();
        let Some(chat) = self.chats.get_mut(&target) else {
            return false;
        };
        let Some(last) = chat.messages.last_mut() else {
            return false;
        };
        patch.apply_to(last);
        chat.updated_at = now;
        self.persist();
        true
    }

    pub fn delete_chat(&mut self, thread_id: &str) -> bool {
        if self.chats.remove(thread_id).is_none() {
            return false;
        }
        if self.current.as_deref() == Some(thread_id) {
            self.current = None;
        }
        self.persist();
        true
    }

    pub fn clear_selection(&mut self) {
        self.current = None;
    }

    // Strictly increasing across the whole store so equal wall-clock readings
    // never produce equal `updated_at` values.
    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let next = match self.last_tick {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        };
        self.last_tick = Some(next);
        next
    }

    fn persist(&mut self) {
        let raw = match serde_json::to_string(&self.chats) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(error = %err, "failed serializing chat store");
                return;
            }
        };
        if let Err(err) = self.slot.write(&raw) {
            tracing::warn!(
                slot = %self.slot.describe(),
                error = %err,
                "failed writing chat store; keeping in-memory state"
            );
        }
    }
}

fn new_thread_id() -> String {
    format!("thread-{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::error::{NewsqError, Result};
    use crate::model::{Chat, MessagePatch, MessageRole, NewMessage, StructuredAnswer};
    use crate::slot::{MemorySlot, StorageSlot};
    use crate::store::{ChatStore, DEFAULT_CHAT_TITLE, derive_title};

    struct BrokenSlot;

    impl StorageSlot for BrokenSlot {
        fn describe(&self) -> String {
            "<broken>".to_string()
        }

        fn read(&self) -> Result<Option<String>> {
            Err(NewsqError::Serialization("disk on fire".to_string()))
        }

        fn write(&mut self, _value: &str) -> Result<()> {
            Err(NewsqError::Serialization("disk on fire".to_string()))
        }
    }

    fn persisted(store: &ChatStore<MemorySlot>) -> BTreeMap<String, Chat> {
        let raw = store.slot().value().expect("store must have flushed");
        serde_json::from_str(raw).expect("valid json")
    }

    #[test]
    fn create_chat_is_unique_and_current() {
        let mut store = ChatStore::load(MemorySlot::new());
        let first = store.create_chat();
        let second = store.create_chat();

        assert_ne!(first, second);
        assert_eq!(store.len(), 2);
        assert_eq!(store.current_thread_id(), Some(second.as_str()));
        assert_eq!(store.get(&first).expect("chat").title, DEFAULT_CHAT_TITLE);
    }

    #[test]
    fn first_user_message_derives_title() {
        let exact = "a".repeat(50);
        let long = "b".repeat(51);

        assert_eq!(derive_title(&exact), exact);
        let title = derive_title(&long);
        assert_eq!(title, format!("{}...", "b".repeat(50)));

        let mut store = ChatStore::load(MemorySlot::new());
        let thread_id = store.create_chat();
        store
            .add_message(NewMessage::user(long.clone()), None)
            .expect("added");
        store
            .add_message(NewMessage::user("second question"), None)
            .expect("added");
        assert_eq!(store.get(&thread_id).expect("chat").title, title);
    }

    #[test]
    fn add_message_to_unknown_thread_is_a_no_op() {
        let mut store = ChatStore::load(MemorySlot::new());
        assert_eq!(store.add_message(NewMessage::user("hello"), None), None);
        assert_eq!(
            store.add_message(NewMessage::user("hello"), Some("thread-missing")),
            None
        );
        assert!(store.is_empty());
        assert_eq!(store.slot().value(), None);
    }

    #[test]
    fn messages_are_append_only_and_updated_at_increases() {
        let mut store = ChatStore::load(MemorySlot::new());
        let thread_id = store.create_chat();

        let mut last_len = 0;
        let mut last_updated = store.get(&thread_id).expect("chat").updated_at;
        for idx in 0..5 {
            store
                .add_message(NewMessage::user(format!("q{idx}")), Some(&thread_id))
                .expect("added");
            store.update_last_message(MessagePatch {
                content: Some(format!("edited {idx}")),
                answer: None,
            });

            let chat = store.get(&thread_id).expect("chat");
            assert!(chat.messages.len() > last_len);
            assert!(chat.updated_at > last_updated);
            last_len = chat.messages.len();
            last_updated = chat.updated_at;
        }

        let ids = store
            .get(&thread_id)
            .expect("chat")
            .messages
            .iter()
            .map(|message| message.id.clone())
            .collect::<std::collections::BTreeSet<_>>();
        assert_eq!(ids.len(), 5);
    }

    #[test]
    fn update_last_message_targets_current_chat() {
        let mut store = ChatStore::load(MemorySlot::new());
        assert!(!store.update_last_message(MessagePatch {
            content: Some("nobody".to_string()),
            answer: None,
        }));

        let thread_id = store.create_chat();
        assert!(!store.update_last_message(MessagePatch {
            content: Some("no messages yet".to_string()),
            answer: None,
        }));

        store.add_message(NewMessage::user("question"), None);
        store.add_message(NewMessage::assistant_placeholder(), None);
        let answer = StructuredAnswer {
            tldr: "short".to_string(),
            ..StructuredAnswer::default()
        };
        assert!(store.update_last_message(MessagePatch {
            content: Some("short".to_string()),
            answer: Some(answer.clone()),
        }));

        let chat = store.get(&thread_id).expect("chat");
        let last = chat.messages.last().expect("last");
        assert_eq!(last.role, MessageRole::Assistant);
        assert_eq!(last.content, "short");
        assert_eq!(last.answer.as_ref(), Some(&answer));
        assert_eq!(chat.messages[0].content, "question");
    }

    #[test]
    fn register_thread_is_idempotent() {
        let mut store = ChatStore::load(MemorySlot::new());
        assert!(store.register_thread("thr_1", "What moved oil prices today?"));
        store.add_message(NewMessage::user("What moved oil prices today?"), Some("thr_1"));
        assert!(!store.register_thread("thr_1", "other title"));

        let chat = store.get("thr_1").expect("chat");
        assert_eq!(chat.title, "What moved oil prices today?");
        assert_eq!(chat.messages.len(), 1);
        assert_eq!(store.current_thread_id(), None);
    }

    #[test]
    fn delete_clears_current_selection() {
        let mut store = ChatStore::load(MemorySlot::new());
        let keep = store.create_chat();
        let doomed = store.create_chat();

        assert!(store.delete_chat(&doomed));
        assert_eq!(store.current_thread_id(), None);
        assert!(!store.delete_chat(&doomed));

        store.load_chat(&keep).expect("loaded");
        assert!(!store.delete_chat("thread-other"));
        assert_eq!(store.current_thread_id(), Some(keep.as_str()));
        assert!(!persisted(&store).contains_key(&doomed));
    }

    #[test]
    fn list_is_sorted_by_recent_update() {
        let mut store = ChatStore::load(MemorySlot::new());
        let older = store.create_chat();
        let newer = store.create_chat();

        let order = |store: &ChatStore<MemorySlot>| {
            store
                .list()
                .into_iter()
                .map(|item| item.thread_id)
                .collect::<Vec<_>>()
        };
        assert_eq!(order(&store), vec![newer.clone(), older.clone()]);

        store.add_message(NewMessage::user("bump"), Some(&older));
        assert_eq!(order(&store), vec![older, newer]);
    }

    #[test]
    fn round_trips_through_the_slot() {
        let mut store = ChatStore::load(MemorySlot::new());
        for idx in 0..3 {
            let thread_id = store.create_chat();
            store.add_message(NewMessage::user(format!("question {idx}")), None);
            store.add_message(NewMessage::assistant_placeholder(), Some(&thread_id));
        }
        let snapshot = persisted(&store);

        let raw = store.slot().value().expect("flushed").to_string();
        let reloaded = ChatStore::load(MemorySlot::with_value(raw));
        assert_eq!(reloaded.len(), 3);
        for (thread_id, chat) in &snapshot {
            assert_eq!(reloaded.get(thread_id), Some(chat));
        }
        assert_eq!(reloaded.current_thread_id(), None);
    }

    #[test]
    fn corrupt_or_unreadable_slots_load_empty() {
        let store = ChatStore::load(MemorySlot::with_value("{not json"));
        assert!(store.is_empty());

        let mut store = ChatStore::load(BrokenSlot);
        assert!(store.is_empty());
        let thread_id = store.create_chat();
        assert!(store.add_message(NewMessage::user("still works"), None).is_some());
        assert_eq!(store.get(&thread_id).expect("chat").messages.len(), 1);
    }
}
