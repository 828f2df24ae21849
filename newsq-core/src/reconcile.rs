use crate::model::NewMessage;
use crate::session::SessionId;
use crate::slot::StorageSlot;
use crate::store::ChatStore;

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingQuestion {
    session: SessionId,
    question: String,
}

/// Binds a thread-less session to the thread id the backend assigns, once.
///
/// The pending marker is armed when a question is asked without a thread and
/// cleared the first time reconciliation fires, so repeated metadata events
/// cannot register the thread or insert the seed messages twice.
#[derive(Debug, Default)]
pub struct ThreadReconciler {
    pending: Option<PendingQuestion>,
}

impl ThreadReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, session: SessionId, question: impl Into<String>) {
        self.pending = Some(PendingQuestion {
            session,
            question: question.into(),
        });
    }

    pub fn disarm(&mut self) {
        self.pending = None;
    }

    pub fn is_pending(&self, session: SessionId) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|pending| pending.session == session)
    }

    /// Registers `thread_id`, seeds it with the pending question and an empty
    /// assistant placeholder, and selects it as the current chat.
    ///
    /// Returns the bound thread id, or `None` when nothing was pending for
    /// `session`.
    pub fn reconcile<S: StorageSlot>(
        &mut self,
        session: SessionId,
        thread_id: &str,
        store: &mut ChatStore<S>,
    ) -> Option<String> {
        if !self.is_pending(session) {
            return None;
        }
        let pending = self.pending.take()?;

        let created = store.register_thread(thread_id, &pending.question);
        store.add_message(NewMessage::user(pending.question), Some(thread_id));
        store.add_message(NewMessage::assistant_placeholder(), Some(thread_id));
        store.load_chat(thread_id);
        tracing::info!(%session, thread_id, created, "bound session to backend thread");

        Some(thread_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use crate::model::MessageRole;
    use crate::reconcile::ThreadReconciler;
    use crate::session::StreamingSession;
    use crate::slot::MemorySlot;
    use crate::store::ChatStore;

    #[test]
    fn reconciles_exactly_once_per_session() {
        let mut engine = StreamingSession::new();
        let session = engine.ask_question("Why did gold spike?", None).expect("ask");
        let mut store = ChatStore::load(MemorySlot::new());
        let mut reconciler = ThreadReconciler::new();
        reconciler.arm(session, "Why did gold spike?");

        for _ in 0..4 {
            reconciler.reconcile(session, "thr_gold", &mut store);
        }

        assert_eq!(store.len(), 1);
        let chat = store.get("thr_gold").expect("chat");
        assert_eq!(chat.title, "Why did gold spike?");
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.messages[0].role, MessageRole::User);
        assert_eq!(chat.messages[0].content, "Why did gold spike?");
        assert_eq!(chat.messages[1].role, MessageRole::Assistant);
        assert!(chat.messages[1].content.is_empty());
        assert_eq!(store.current_thread_id(), Some("thr_gold"));
        assert!(!reconciler.is_pending(session));
    }

    #[test]
    fn ignores_sessions_that_were_never_armed() {
        let mut engine = StreamingSession::new();
        let armed = engine.ask_question("first", None).expect("ask");
        let other = engine.ask_question("second", None).expect("ask");
        let mut store = ChatStore::load(MemorySlot::new());
        let mut reconciler = ThreadReconciler::new();
        reconciler.arm(armed, "first");

        assert_eq!(reconciler.reconcile(other, "thr_x", &mut store), None);
        assert!(store.is_empty());

        reconciler.disarm();
        assert_eq!(reconciler.reconcile(armed, "thr_x", &mut store), None);
        assert!(store.is_empty());
    }
}
