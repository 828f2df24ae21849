use std::fs;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use newsq_core::citation::cited_sources;
use newsq_core::render::render_sources_markdown;
use newsq_core::slot::CHATS_KEY;
use newsq_core::{
    ChatStore, Config, MemorySlot, NewsqError, SessionController, SessionObserver, SqliteSlot,
    StorageSlot, StructuredAnswer, render_chat_list, render_chat_markdown, thread_uri,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "newsq", version, about = "Ask questions about the news")]
struct Cli {
    /// Log debug output to stderr (NEWSQ_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ask a question, optionally continuing an existing thread
    Ask {
        question: String,

        /// Thread id or newsq://<thread_id> to continue
        #[arg(short, long, value_name = "THREAD")]
        thread: Option<String>,

        /// Read the answer stream from a file (or `-` for stdin) instead of the backend
        #[arg(long, value_name = "PATH")]
        replay: Option<PathBuf>,
    },
    /// Create an empty chat and print its thread id
    New,
    /// List chats, most recently updated first
    List,
    /// Render a chat as markdown
    Show { thread: String },
    /// Delete a chat
    Delete { thread: String },
}

type Controller = SessionController<Box<dyn StorageSlot>>;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", user_facing_error(&err));
            ExitCode::from(1)
        }
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_env("NEWSQ_LOG").unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn run(cli: Cli) -> newsq_core::Result<()> {
    let config = Config::from_env_or_home()?;
    let mut controller = SessionController::new(ChatStore::load(open_slot(&config)));

    match cli.command {
        Command::Ask {
            question,
            thread,
            replay,
        } => ask(
            &mut controller,
            &config,
            &question,
            thread.as_deref().map(normalize_thread_id),
            replay.as_deref(),
        ),
        Command::New => {
            let thread_id = controller.create_chat();
            println!("{thread_id}");
            Ok(())
        }
        Command::List => {
            print!("{}", render_chat_list(&controller.list()));
            Ok(())
        }
        Command::Show { thread } => {
            let thread_id = normalize_thread_id(&thread);
            let chat = controller
                .store()
                .get(thread_id)
                .ok_or_else(|| NewsqError::ChatNotFound {
                    thread_id: thread_id.to_string(),
                })?;
            print!("{}", render_chat_markdown(chat));
            Ok(())
        }
        Command::Delete { thread } => {
            let thread_id = normalize_thread_id(&thread);
            if !controller.delete_chat(thread_id) {
                return Err(NewsqError::ChatNotFound {
                    thread_id: thread_id.to_string(),
                });
            }
            eprintln!("deleted: {}", thread_uri(thread_id));
            Ok(())
        }
    }
}

fn open_slot(config: &Config) -> Box<dyn StorageSlot> {
    match SqliteSlot::open(&config.store_path, CHATS_KEY) {
        Ok(slot) => Box::new(slot),
        Err(err) => {
            tracing::warn!(
                path = %config.store_path.display(),
                error = %err,
                "chat store unavailable; chats will not be saved"
            );
            Box::new(MemorySlot::new())
        }
    }
}

fn normalize_thread_id(raw: &str) -> &str {
    raw.strip_prefix("newsq://").unwrap_or(raw)
}

fn ask(
    controller: &mut Controller,
    config: &Config,
    question: &str,
    thread_id: Option<&str>,
    replay: Option<&Path>,
) -> newsq_core::Result<()> {
    let session = controller.ask_question(question, thread_id)?;
    let mut observer = CliObserver::new(thread_id);

    match replay {
        Some(path) if path == Path::new("-") => {
            let stdin = io::stdin();
            controller.run_stream(session, Path::new("<stdin>"), stdin.lock(), &mut observer)?;
        }
        Some(path) => {
            let file = fs::File::open(path).map_err(|source| NewsqError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            controller.run_stream(session, path, BufReader::new(file), &mut observer)?;
        }
        None => {
            let backend = &config.backend;
            let source = PathBuf::from(&backend.program);
            let streamed = backend.stream(question, thread_id, |reader| {
                controller.run_stream(session, &source, reader, &mut observer)
            });
            if let Err(err) = streamed {
                if !controller.is_settled(session) {
                    controller.fail_session(session, &err.to_string(), &mut observer)?;
                }
                observer.end_line()?;
                return Err(err);
            }
        }
    }

    observer.end_line()?;
    if let Some(message) = controller.engine().error() {
        return Err(NewsqError::StreamFailed(message.to_string()));
    }
    if let Some(thread_id) = thread_id {
        observer.emit_uri_once(thread_id);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Empty,
    Tldr,
    Details,
}

struct CliObserver {
    verb: &'static str,
    uri_emitted: bool,
    section: Section,
    line_open: bool,
}

impl CliObserver {
    fn new(thread_id: Option<&str>) -> Self {
        Self {
            verb: if thread_id.is_some() {
                "updated"
            } else {
                "created"
            },
            uri_emitted: false,
            section: Section::Empty,
            line_open: false,
        }
    }

    fn emit_uri_once(&mut self, thread_id: &str) {
        if self.uri_emitted {
            return;
        }
        eprintln!("{}: {}", self.verb, thread_uri(thread_id));
        self.uri_emitted = true;
    }

    fn write_stdout(&mut self, text: &str) -> newsq_core::Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        let mut stdout = io::stdout();
        stdout
            .write_all(text.as_bytes())
            .map_err(|source| NewsqError::Io {
                path: PathBuf::from("<stdout>"),
                source,
            })?;
        stdout.flush().map_err(|source| NewsqError::Io {
            path: PathBuf::from("<stdout>"),
            source,
        })?;
        self.line_open = !text.ends_with('\n');
        Ok(())
    }

    fn enter(&mut self, section: Section) -> newsq_core::Result<()> {
        if self.section != section {
            if self.section != Section::Empty {
                self.end_line()?;
                self.write_stdout("\n")?;
            }
            self.section = section;
        }
        Ok(())
    }

    fn end_line(&mut self) -> newsq_core::Result<()> {
        if self.line_open {
            self.write_stdout("\n")?;
        }
        Ok(())
    }
}

impl SessionObserver for CliObserver {
    fn on_thread_bound(&mut self, thread_id: &str) -> newsq_core::Result<()> {
        self.emit_uri_once(thread_id);
        Ok(())
    }

    fn on_status(&mut self, status: &str) -> newsq_core::Result<()> {
        eprintln!("status: {status}");
        Ok(())
    }

    fn on_tldr_delta(&mut self, text: &str) -> newsq_core::Result<()> {
        self.enter(Section::Tldr)?;
        self.write_stdout(text)
    }

    fn on_details_delta(&mut self, text: &str) -> newsq_core::Result<()> {
        self.enter(Section::Details)?;
        self.write_stdout(text)
    }

    fn on_complete(&mut self, answer: Option<&StructuredAnswer>) -> newsq_core::Result<()> {
        let Some(answer) = answer else {
            eprintln!("warning: no answer received");
            return Ok(());
        };

        // Structured-only streams never produce deltas.
        if self.section == Section::Empty {
            let tldr = answer.tldr.trim();
            let details = answer.details.content.trim();
            if !tldr.is_empty() {
                self.on_tldr_delta(tldr)?;
            }
            if !details.is_empty() {
                self.on_details_delta(details)?;
            }
        }

        let sources = cited_sources(answer);
        if !sources.is_empty() {
            self.end_line()?;
            self.write_stdout("\n")?;
            self.write_stdout(&render_sources_markdown(&sources))?;
        }
        Ok(())
    }
}

fn user_facing_error(err: &NewsqError) -> String {
    match err {
        NewsqError::CommandNotFound { .. } => format!(
            "{err}\nhint: install the news backend or point NEWSQ_BACKEND_BIN (or `[backend] command` in config.toml) at it."
        ),
        NewsqError::CommandFailed { .. } => {
            format!("{err}\nhint: run the backend command directly once to check its configuration.")
        }
        NewsqError::QuestionTooLong { .. } => {
            format!("{err}\nhint: shorten the question and ask again.")
        }
        _ => err.to_string(),
    }
}
