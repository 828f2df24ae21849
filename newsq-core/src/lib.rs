pub mod backend;
pub mod citation;
pub mod config;
pub mod controller;
pub mod error;
pub mod model;
pub mod reconcile;
pub mod render;
pub mod session;
pub mod slot;
pub mod sse;
pub mod store;

pub use backend::BackendCommand;
pub use citation::{Segment, Sentiment, cited_numbers, cited_sources, tokenize};
pub use config::Config;
pub use controller::{NoopObserver, SessionController, SessionObserver, validate_question};
pub use error::{NewsqError, Result};
pub use model::{
    AnswerDetails, AnswerMetadata, ArticleSource, Chat, ChatListItem, ChatMessage, MessagePatch,
    MessageRole, NewMessage, StructuredAnswer,
};
pub use render::{render_answer_markdown, render_chat_list, render_chat_markdown, thread_uri};
pub use session::{SessionEffect, SessionId, SessionPhase, StreamingSession};
pub use slot::{MemorySlot, SqliteSlot, StorageSlot};
pub use sse::{SseFrame, StreamEvent, parse_sse_reader};
pub use store::ChatStore;
