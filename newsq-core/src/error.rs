use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NewsqError {
    #[error("question is empty")]
    EmptyQuestion,

    #[error("question is too long: {len} characters (max {max})")]
    QuestionTooLong { len: usize, max: usize },

    #[error("chat not found for thread_id={thread_id}")]
    ChatNotFound { thread_id: String },

    #[error("invalid config {path}: {message}")]
    InvalidConfig { path: PathBuf, message: String },

    #[error("command not found: {command}")]
    CommandNotFound { command: String },

    #[error("command failed: {command} (exit code: {code:?}): {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("answer stream failed: {0}")]
    StreamFailed(String),

    #[error("stream protocol error: {0}")]
    StreamProtocol(String),

    #[error("invalid `{event}` event payload: {source}")]
    InvalidEvent {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("cannot determine home directory")]
    HomeDirectoryNotFound,

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("sqlite error on {path}: {source}")]
    Sqlite {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
}

pub type Result<T> = std::result::Result<T, NewsqError>;
