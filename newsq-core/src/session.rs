use std::fmt;

use crate::citation::cited_numbers;
use crate::error::{NewsqError, Result};
use crate::model::{AnswerDetails, AnswerMetadata, ArticleSource, StructuredAnswer};
use crate::sse::{DonePayload, StreamEvent};

/// Tags one question/answer exchange. Events carrying a stale tag are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionPhase {
    #[default]
    Idle,
    Connecting,
    Streaming,
    Done,
    Error,
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Streaming => write!(f, "streaming"),
            Self::Done => write!(f, "done"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// What an applied event asks the caller to act on.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEffect {
    ThreadAssigned(String),
    Status(String),
    TldrDelta(String),
    DetailsDelta(String),
    Completed(Option<StructuredAnswer>),
    Failed(String),
}

#[derive(Debug, Default)]
pub struct StreamingSession {
    next_session: u64,
    active: Option<SessionId>,
    thread_id: Option<String>,
    question: Option<String>,
    phase: SessionPhase,
    status: Option<String>,
    streaming_tldr: String,
    streaming_details: String,
    sources: Vec<ArticleSource>,
    metadata: Option<AnswerMetadata>,
    confidence: Option<u8>,
    answer: Option<StructuredAnswer>,
    error: Option<String>,
}

impl StreamingSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_streaming(&self) -> bool {
        matches!(
            self.phase,
            SessionPhase::Connecting | SessionPhase::Streaming
        )
    }

    pub fn active_session(&self) -> Option<SessionId> {
        self.active
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    pub fn question(&self) -> Option<&str> {
        self.question.as_deref()
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn streaming_tldr(&self) -> &str {
        &self.streaming_tldr
    }

    pub fn streaming_details(&self) -> &str {
        &self.streaming_details
    }

    pub fn sources(&self) -> &[ArticleSource] {
        &self.sources
    }

    pub fn metadata(&self) -> Option<&AnswerMetadata> {
        self.metadata.as_ref()
    }

    pub fn answer(&self) -> Option<&StructuredAnswer> {
        self.answer.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Starts a new session, abandoning whatever session was active.
    pub fn ask_question(&mut self, question: &str, thread_id: Option<&str>) -> Result<SessionId> {
        let question = question.trim();
        if question.is_empty() {
            return Err(NewsqError::EmptyQuestion);
        }

        self.clear_transient();
        self.next_session += 1;
        let session = SessionId(self.next_session);
        self.active = Some(session);
        self.thread_id = thread_id.map(ToString::to_string);
        self.question = Some(question.to_string());
        self.phase = SessionPhase::Connecting;
        tracing::debug!(%session, thread_id = ?self.thread_id, "session started");
        Ok(session)
    }

    /// Applies one event for `session`.
    ///
    /// `known_thread` is the thread the caller has bound to this session so
    /// far; a backend-assigned id is only reported while it is `None`.
    pub fn apply(
        &mut self,
        session: SessionId,
        event: StreamEvent,
        known_thread: Option<&str>,
    ) -> Option<SessionEffect> {
        if self.active != Some(session) {
            tracing::debug!(%session, event = event.kind(), "dropping event for inactive session");
            return None;
        }
        if self.phase.is_terminal() {
            tracing::debug!(%session, event = event.kind(), "dropping event after terminal state");
            return None;
        }
        if !event.is_terminal() {
            self.phase = SessionPhase::Streaming;
        }

        match event {
            StreamEvent::Metadata(metadata) => self.on_metadata(metadata, known_thread),
            StreamEvent::Sources(sources) => {
                self.sources = sources;
                None
            }
            StreamEvent::Status(status) => {
                if self.has_answer_text() {
                    return None;
                }
                self.status = Some(status.clone());
                Some(SessionEffect::Status(status))
            }
            StreamEvent::Tldr(delta) | StreamEvent::Token(delta) => {
                if delta.is_empty() {
                    return None;
                }
                self.streaming_tldr.push_str(&delta);
                Some(SessionEffect::TldrDelta(delta))
            }
            StreamEvent::Details(delta) => {
                if delta.is_empty() {
                    return None;
                }
                self.streaming_details.push_str(&delta);
                Some(SessionEffect::DetailsDelta(delta))
            }
            StreamEvent::Structured(answer) => {
                self.answer = Some(self.complete_structured(answer));
                None
            }
            StreamEvent::Done(payload) => Some(self.finish(payload)),
            StreamEvent::Error(message) => Some(self.fail_with(message)),
        }
    }

    /// Terminates `session` with a transport-level failure.
    pub fn fail(&mut self, session: SessionId, message: impl Into<String>) -> Option<SessionEffect> {
        if self.active != Some(session) || self.phase.is_terminal() {
            return None;
        }
        Some(self.fail_with(message.into()))
    }

    /// Rebinds to an existing thread without asking anything; any active
    /// session is abandoned.
    pub fn set_thread_id(&mut self, thread_id: &str) {
        self.clear_transient();
        self.active = None;
        self.question = None;
        self.phase = SessionPhase::Idle;
        self.thread_id = Some(thread_id.to_string());
    }

    pub fn reset(&mut self) {
        self.clear_transient();
        self.active = None;
        self.question = None;
        self.phase = SessionPhase::Idle;
        self.thread_id = None;
    }

    fn clear_transient(&mut self) {
        self.status = None;
        self.streaming_tldr.clear();
        self.streaming_details.clear();
        self.sources.clear();
        self.metadata = None;
        self.confidence = None;
        self.answer = None;
        self.error = None;
    }

    fn has_answer_text(&self) -> bool {
        !self.streaming_tldr.is_empty() || !self.streaming_details.is_empty() || self.answer.is_some()
    }

    fn on_metadata(
        &mut self,
        metadata: AnswerMetadata,
        known_thread: Option<&str>,
    ) -> Option<SessionEffect> {
        let assigned = metadata.thread_id.clone().filter(|id| !id.trim().is_empty());
        if metadata.confidence.is_some() {
            self.confidence = metadata.confidence;
        }
        self.metadata = Some(metadata);

        let assigned = assigned?;
        if let Some(known) = known_thread {
            if known != assigned {
                tracing::debug!(
                    known_thread = known,
                    assigned_thread = %assigned,
                    "ignoring backend thread id for an already bound session"
                );
            }
            return None;
        }

        self.thread_id = Some(assigned.clone());
        Some(SessionEffect::ThreadAssigned(assigned))
    }

    // A structured payload is authoritative; only gaps are filled from what
    // the stream has already delivered.
    fn complete_structured(&self, mut answer: StructuredAnswer) -> StructuredAnswer {
        if answer.sources.is_empty() {
            answer.sources = self.sources.clone();
        }
        if answer.metadata.is_none() {
            answer.metadata = self.metadata.clone();
        }
        if answer.details.citations.is_empty() {
            answer.details.citations = cited_numbers([answer.details.content.as_str()]);
        }
        answer
    }

    fn finish(&mut self, payload: DonePayload) -> SessionEffect {
        self.phase = SessionPhase::Done;
        self.status = None;
        if self.answer.is_none() {
            self.answer = self.synthesize(payload.confidence);
        }
        SessionEffect::Completed(self.answer.clone())
    }

    fn synthesize(&self, confidence: Option<u8>) -> Option<StructuredAnswer> {
        if self.streaming_tldr.trim().is_empty() && self.streaming_details.trim().is_empty() {
            return None;
        }

        let content = self.streaming_details.trim().to_string();
        let citations = cited_numbers([content.as_str()]);
        let confidence = confidence.or(self.confidence).unwrap_or(0).min(100);

        Some(StructuredAnswer {
            tldr: self.streaming_tldr.trim().to_string(),
            details: AnswerDetails { content, citations },
            confidence,
            sources: self.sources.clone(),
            metadata: self.metadata.clone(),
        })
    }

    fn fail_with(&mut self, message: String) -> SessionEffect {
        self.phase = SessionPhase::Error;
        self.status = None;
        self.error = Some(message.clone());
        SessionEffect::Failed(message)
    }
}
