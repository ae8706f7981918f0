//! One chat turn, optionally persisted to a session file.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use futures_util::StreamExt;
use parley_core::{ChatSession, SendArgs};
use parley_models::Reply;
use tracing::debug;

use crate::config::ParleyConfig;
use crate::runtime::Runtime;

#[derive(Args, Debug)]
pub struct ChatArgs {
    /// Message to send
    pub text: String,

    /// Model for this turn (`provider` or `provider:model`)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Session file to continue and update
    #[arg(short, long)]
    pub session: Option<PathBuf>,

    /// Named session kept in the parley data directory
    #[arg(short, long, conflicts_with = "session")]
    pub name: Option<String>,

    /// Attach a file or URL (repeatable)
    #[arg(short, long = "file")]
    pub files: Vec<String>,

    /// Stream the reply as it arrives
    #[arg(long)]
    pub stream: bool,

    /// System prompt for a new session
    #[arg(long)]
    pub system: Option<String>,
}

pub async fn run(args: ChatArgs, config: ParleyConfig) -> Result<()> {
    let runtime = Runtime::build(&config)?;
    let session_path = session_path(args.session, args.name.as_deref());

    let mut session = open_session(&runtime, &config, session_path.as_deref())?;
    if let Some(system) = &args.system {
        session.set_system_prompt(system.clone());
    }

    let mut send_args = SendArgs::new().files(args.files);
    if let Some(model) = args.model {
        send_args = send_args.model(model);
    }
    if args.stream {
        send_args = send_args.stream(true);
    }

    match session.send(args.text, send_args).await? {
        Reply::Message(message) => println!("{}", message.text_or_empty()),
        Reply::Stream(mut stream) => {
            let mut stdout = std::io::stdout();
            let mut full = String::new();
            while let Some(delta) = stream.next().await {
                let delta = delta?;
                write!(stdout, "{delta}")?;
                stdout.flush()?;
                full.push_str(&delta);
            }
            writeln!(stdout)?;
            session.add_assistant_message(full, Vec::new());
        }
    }

    if let Some(path) = &session_path {
        save_session(&session, path)?;
    }
    Ok(())
}

/// Explicit session file, else `<sessions_dir>/<name>.json`.
fn session_path(file: Option<PathBuf>, name: Option<&str>) -> Option<PathBuf> {
    file.or_else(|| name.map(|name| parley_paths::sessions_dir().join(format!("{name}.json"))))
}

/// Load `path` when it exists, otherwise start from config defaults.
fn open_session(
    runtime: &Runtime,
    config: &ParleyConfig,
    path: Option<&Path>,
) -> Result<ChatSession> {
    let mut session = ChatSession::new(runtime.factory.clone());

    if let Some(path) = path.filter(|path| path.exists()) {
        session
            .load(path)
            .with_context(|| format!("Failed to load session {}", path.display()))?;
        debug!(path = %path.display(), "continuing saved session");
        return Ok(session);
    }

    session.set_default_model(Some(config.session.default_model.as_str().into()));
    session.set_stream(config.session.stream);
    session.set_max_history_token(config.session.max_history_token);
    if let Some(prompt) = &config.session.system_prompt {
        session.set_system_prompt(prompt.clone());
    }
    Ok(session)
}

fn save_session(session: &ChatSession, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    session
        .save(path)
        .with_context(|| format!("Failed to save session {}", path.display()))
}
