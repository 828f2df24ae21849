use std::io::{self, BufReader, Read};
use std::path::PathBuf;
use std::process::{ChildStdout, Command, Stdio};

use crate::error::{NewsqError, Result};

pub const DEFAULT_BACKEND_BIN: &str = "newsq-backend";

/// An external program that answers one question per invocation by writing
/// a server-sent event stream to stdout.
///
/// It is invoked as `<program> <args...> [--thread-id <id>] -- <question>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for BackendCommand {
    fn default() -> Self {
        Self {
            program: DEFAULT_BACKEND_BIN.to_string(),
            args: Vec::new(),
        }
    }
}

impl BackendCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn invocation_args(&self, question: &str, thread_id: Option<&str>) -> Vec<String> {
        let mut args = self.args.clone();
        if let Some(thread_id) = thread_id {
            args.push("--thread-id".to_string());
            args.push(thread_id.to_string());
        }
        args.push("--".to_string());
        args.push(question.to_string());
        args
    }

    /// Spawns the backend and hands its stdout to `consume`. Whatever
    /// `consume` leaves unread is drained before the exit status is checked.
    pub fn stream<T, F>(&self, question: &str, thread_id: Option<&str>, consume: F) -> Result<T>
    where
        F: FnOnce(&mut BufReader<ChildStdout>) -> Result<T>,
    {
        let args = self.invocation_args(question, thread_id);
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| {
                if source.kind() == std::io::ErrorKind::NotFound {
                    NewsqError::CommandNotFound {
                        command: self.program.clone(),
                    }
                } else {
                    NewsqError::Io {
                        path: PathBuf::from(&self.program),
                        source,
                    }
                }
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            NewsqError::StreamProtocol("backend stdout pipe is unavailable".to_string())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            NewsqError::StreamProtocol("backend stderr pipe is unavailable".to_string())
        })?;
        let stderr_handle = std::thread::spawn(move || {
            let mut reader = BufReader::new(stderr);
            let mut content = String::new();
            let _ = reader.read_to_string(&mut content);
            content
        });

        let mut reader = BufReader::new(stdout);
        let consumed = consume(&mut reader);
        let _ = io::copy(&mut reader, &mut io::sink());
        drop(reader);

        let status = child.wait().map_err(|source| NewsqError::Io {
            path: PathBuf::from(&self.program),
            source,
        })?;
        let stderr_content = stderr_handle.join().unwrap_or_default();
        let value = consumed?;

        if !status.success() {
            return Err(NewsqError::CommandFailed {
                command: format!("{} {}", self.program, args.join(" ")),
                code: status.code(),
                stderr: stderr_content.trim().to_string(),
            });
        }

        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::BackendCommand;

    #[test]
    fn builds_invocation_with_optional_thread() {
        let mut command = BackendCommand::new("news-cli");
        command.args = vec!["ask".to_string(), "--sse".to_string()];

        assert_eq!(
            command.invocation_args("oil?", None),
            vec!["ask", "--sse", "--", "oil?"]
        );
        assert_eq!(
            command.invocation_args("oil?", Some("thr_1")),
            vec!["ask", "--sse", "--thread-id", "thr_1", "--", "oil?"]
        );
    }

    #[test]
    fn questions_starting_with_a_dash_stay_positional() {
        let command = BackendCommand::new("news-cli");
        assert_eq!(
            command.invocation_args("-5% on BTC?", None),
            vec!["--", "-5% on BTC?"]
        );
    }

    #[test]
    fn missing_binary_is_reported() {
        let command = BackendCommand::new("newsq-backend-that-does-not-exist");
        let err = command
            .stream("q", None, |_| Ok(()))
            .expect_err("must fail");
        assert!(format!("{err}").contains("command not found"));
    }
}
