use std::io::BufRead;
use std::path::Path;

use crate::error::{NewsqError, Result};
use crate::model::{Chat, ChatListItem, MessagePatch, NewMessage, StructuredAnswer};
use crate::reconcile::ThreadReconciler;
use crate::session::{SessionEffect, SessionId, StreamingSession};
use crate::slot::StorageSlot;
use crate::sse::{StreamEvent, parse_sse_reader};
use crate::store::ChatStore;

pub const MAX_QUESTION_CHARS: usize = 500;

/// Presentation hooks for one session. Every method defaults to doing nothing.
pub trait SessionObserver {
    /// The session is now bound to `thread_id`; the consumer should replace
    /// (not push) its current location.
    fn on_thread_bound(&mut self, thread_id: &str) -> Result<()> {
        let _ = thread_id;
        Ok(())
    }

    fn on_status(&mut self, status: &str) -> Result<()> {
        let _ = status;
        Ok(())
    }

    fn on_tldr_delta(&mut self, text: &str) -> Result<()> {
        let _ = text;
        Ok(())
    }

    fn on_details_delta(&mut self, text: &str) -> Result<()> {
        let _ = text;
        Ok(())
    }

    fn on_complete(&mut self, answer: Option<&StructuredAnswer>) -> Result<()> {
        let _ = answer;
        Ok(())
    }

    fn on_error(&mut self, message: &str) -> Result<()> {
        let _ = message;
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

pub fn validate_question(question: &str) -> Result<String> {
    let question = question.trim();
    if question.is_empty() {
        return Err(NewsqError::EmptyQuestion);
    }
    let len = question.chars().count();
    if len > MAX_QUESTION_CHARS {
        return Err(NewsqError::QuestionTooLong {
            len,
            max: MAX_QUESTION_CHARS,
        });
    }
    Ok(question.to_string())
}

/// Sequences the store, the streaming engine and the reconciler for each
/// question. It owns all three; consumers only reach the store through it.
#[derive(Debug)]
pub struct SessionController<S: StorageSlot> {
    store: ChatStore<S>,
    engine: StreamingSession,
    reconciler: ThreadReconciler,
}

impl<S: StorageSlot> SessionController<S> {
    pub fn new(store: ChatStore<S>) -> Self {
        Self {
            store,
            engine: StreamingSession::new(),
            reconciler: ThreadReconciler::new(),
        }
    }

    pub fn store(&self) -> &ChatStore<S> {
        &self.store
    }

    pub fn engine(&self) -> &StreamingSession {
        &self.engine
    }

    pub fn into_store(self) -> ChatStore<S> {
        self.store
    }

    pub fn list(&self) -> Vec<ChatListItem> {
        self.store.list()
    }

    pub fn create_chat(&mut self) -> String {
        let thread_id = self.store.create_chat();
        self.reconciler.disarm();
        self.engine.set_thread_id(&thread_id);
        thread_id
    }

    pub fn load_chat(&mut self, thread_id: &str) -> Option<&Chat> {
        if !self.store.contains(thread_id) {
            return None;
        }
        self.set_thread_id(thread_id);
        self.store.get(thread_id)
    }

    pub fn register_thread(&mut self, thread_id: &str, seed_title: &str) -> bool {
        self.store.register_thread(thread_id, seed_title)
    }

    pub fn add_message(&mut self, message: NewMessage, thread_id: Option<&str>) -> Option<String> {
        self.store.add_message(message, thread_id)
    }

    pub fn update_last_message(&mut self, patch: MessagePatch) -> bool {
        self.store.update_last_message(patch)
    }

    pub fn delete_chat(&mut self, thread_id: &str) -> bool {
        if self.engine.thread_id() == Some(thread_id) {
            self.engine.reset();
            self.reconciler.disarm();
        }
        self.store.delete_chat(thread_id)
    }

    /// Rebinds to an existing thread, abandoning any in-flight session.
    pub fn set_thread_id(&mut self, thread_id: &str) {
        self.reconciler.disarm();
        self.engine.set_thread_id(thread_id);
        self.store.load_chat(thread_id);
    }

    pub fn reset(&mut self) {
        self.reconciler.disarm();
        self.engine.reset();
        self.store.clear_selection();
    }

    /// Starts a session. With a thread the question and an assistant
    /// placeholder are recorded immediately; without one they wait for the
    /// backend to assign a thread id.
    pub fn ask_question(&mut self, question: &str, thread_id: Option<&str>) -> Result<SessionId> {
        let question = validate_question(question)?;
        let session = self.engine.ask_question(&question, thread_id)?;
        self.reconciler.disarm();

        match thread_id {
            Some(thread_id) => {
                self.store.register_thread(thread_id, &question);
                self.store.load_chat(thread_id);
                self.store
                    .add_message(NewMessage::user(question), Some(thread_id));
                self.store
                    .add_message(NewMessage::assistant_placeholder(), Some(thread_id));
            }
            None => {
                self.store.clear_selection();
                self.reconciler.arm(session, question);
            }
        }

        Ok(session)
    }

    /// True once `session` can no longer change state.
    pub fn is_settled(&self, session: SessionId) -> bool {
        self.engine.active_session() != Some(session) || self.engine.phase().is_terminal()
    }

    pub fn handle_event(
        &mut self,
        session: SessionId,
        event: StreamEvent,
        observer: &mut dyn SessionObserver,
    ) -> Result<()> {
        let known_thread = if self.reconciler.is_pending(session) {
            None
        } else {
            self.engine.thread_id().map(ToString::to_string)
        };
        let Some(effect) = self.engine.apply(session, event, known_thread.as_deref()) else {
            return Ok(());
        };
        self.dispatch(session, effect, observer)
    }

    /// Ends `session` with a transport failure.
    pub fn fail_session(
        &mut self,
        session: SessionId,
        message: &str,
        observer: &mut dyn SessionObserver,
    ) -> Result<()> {
        let Some(effect) = self.engine.fail(session, message) else {
            return Ok(());
        };
        self.dispatch(session, effect, observer)
    }

    /// Feeds frames from `reader` into `session` in arrival order until the
    /// session settles. Read and decode failures end the session with an
    /// error instead of escaping.
    pub fn run_stream<R: BufRead>(
        &mut self,
        session: SessionId,
        source: &Path,
        reader: R,
        observer: &mut dyn SessionObserver,
    ) -> Result<()> {
        let parsed = parse_sse_reader(source, reader, |frame| {
            let Some(event) = StreamEvent::from_frame(&frame)? else {
                return Ok(true);
            };
            self.handle_event(session, event, observer)?;
            Ok(!self.is_settled(session))
        });

        if let Err(err) = parsed {
            tracing::warn!(%session, error = %err, "answer stream failed");
            return self.fail_session(session, &err.to_string(), observer);
        }
        if !self.is_settled(session) {
            return self.fail_session(session, "stream ended before completion", observer);
        }
        Ok(())
    }

    fn dispatch(
        &mut self,
        session: SessionId,
        effect: SessionEffect,
        observer: &mut dyn SessionObserver,
    ) -> Result<()> {
        match effect {
            SessionEffect::ThreadAssigned(thread_id) => {
                if let Some(bound) = self
                    .reconciler
                    .reconcile(session, &thread_id, &mut self.store)
                {
                    observer.on_thread_bound(&bound)?;
                }
            }
            SessionEffect::Status(status) => observer.on_status(&status)?,
            SessionEffect::TldrDelta(text) => observer.on_tldr_delta(&text)?,
            SessionEffect::DetailsDelta(text) => observer.on_details_delta(&text)?,
            SessionEffect::Completed(answer) => {
                if let Some(answer) = answer.as_ref() {
                    self.store.update_last_message(MessagePatch {
                        content: Some(answer.tldr.clone()),
                        answer: Some(answer.clone()),
                    });
                }
                observer.on_complete(answer.as_ref())?;
            }
            SessionEffect::Failed(message) => {
                let partial = self.engine.streaming_tldr().trim();
                if !partial.is_empty() {
                    let content = partial.to_string();
                    self.store.update_last_message(MessagePatch {
                        content: Some(content),
                        answer: None,
                    });
                }
                observer.on_error(&message)?;
            }
        }
        Ok(())
    }
}
