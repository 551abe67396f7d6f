#![deny(unsafe_code)]

mod settings;
mod terminal;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use buddy_chat::view::{ChatView, LoadingIndicator};
use buddy_chat::{ChatSession, KnowledgeBase, MarkdownCache};
use buddy_llm::{LifecycleState, ModelLifecycle, RigEngineLoader};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use crate::settings::{BuddySettings, SettingsStore};
use crate::terminal::Transcript;

const QUIT_COMMAND: &str = "/quit";
const HTML_COMMAND: &str = "/html";
const STOP_COMMAND: &str = "/stop";

/// Terminal front end for the support chat.
///
/// Usage: `lbrl-buddy [settings.json]`. Logs go to stderr, filtered by
/// `RUST_LOG`.
#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(SettingsStore::default_config_path);
    let store = SettingsStore::new(config_path);
    if let Err(error) = store.write_defaults_if_missing() {
        tracing::warn!(
            path = %store.config_path().display(),
            error = %error,
            "could not write default settings"
        );
    }
    let settings = store.settings();

    match run(&settings).await {
        Ok(code) => code,
        Err(error) => {
            tracing::error!(error = %error, "terminal i/o failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load_knowledge(settings: &BuddySettings) -> KnowledgeBase {
    let Some(path) = settings.faq_path.as_ref() else {
        return KnowledgeBase::bundled();
    };

    KnowledgeBase::from_file(path).unwrap_or_else(|error| {
        tracing::warn!(error = %error, "falling back to bundled FAQ corpus");
        KnowledgeBase::bundled()
    })
}

async fn run(settings: &BuddySettings) -> io::Result<ExitCode> {
    let loader = Arc::new(RigEngineLoader::new(settings.runtime_config()));
    let lifecycle = ModelLifecycle::new(loader);
    let mut session = ChatSession::new(Arc::clone(&lifecycle), load_knowledge(settings))
        .with_scroll_threshold(settings.scroll_threshold);

    let transcript = Arc::new(Mutex::new(Transcript::new(io::stdout())));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let view = ChatView::build(&session, &mut MarkdownCache::new());
    if let Some(notice) = view.consent {
        if settings.auto_consent {
            with_transcript(&transcript, |out| out.line(notice.message))?;
        } else {
            with_transcript(&transcript, |out| out.consent(&notice))?;
            let answer = lines.next_line().await?.unwrap_or_default();
            if !answer.trim().eq_ignore_ascii_case("y") {
                return Ok(ExitCode::SUCCESS);
            }
        }
    }

    let progress = {
        let transcript = Arc::clone(&transcript);
        lifecycle.subscribe(move |state| {
            if let LifecycleState::Loading { progress, message } = state {
                let indicator = LoadingIndicator::Downloading {
                    progress: *progress,
                    message: message.clone(),
                };
                let _ = with_transcript(&transcript, |out| out.progress(&indicator));
            }
        })
    };

    if let Some(worker) = session.agree_and_start(settings.model_id.as_str()) {
        worker.await;
    }
    drop(progress);

    if let LifecycleState::Error { message } = &*lifecycle.state() {
        with_transcript(&transcript, |out| {
            out.line(&format!("Model initialization failed: {message}"))
        })?;
        return Ok(ExitCode::FAILURE);
    }

    with_transcript(&transcript, |out| {
        out.history(&session)?;
        out.prompt(&session)
    })?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match line.trim() {
                    QUIT_COMMAND => break,
                    HTML_COMMAND => {
                        with_transcript(&transcript, |out| out.last_reply_html(&session))?;
                    }
                    STOP_COMMAND => {
                        let updates = session.cancel_stream();
                        with_transcript(&transcript, |out| out.apply(&session, &updates))?;
                    }
                    _ if session.is_streaming() => {
                        with_transcript(&transcript, |out| {
                            out.line("(a reply is still streaming, type /stop to cancel)")
                        })?;
                        continue;
                    }
                    _ => {
                        session.set_draft(line.as_str());
                        let updates = session.submit();
                        with_transcript(&transcript, |out| out.apply(&session, &updates))?;
                    }
                }
                if !session.is_streaming() {
                    with_transcript(&transcript, |out| out.prompt(&session))?;
                }
            }
            event = session.next_stream_event() => {
                let updates = session.apply_stream_event(event);
                with_transcript(&transcript, |out| {
                    out.apply(&session, &updates)?;
                    if session.is_streaming() {
                        Ok(())
                    } else {
                        out.prompt(&session)
                    }
                })?;
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn with_transcript<T>(
    transcript: &Mutex<Transcript<io::Stdout>>,
    write: impl FnOnce(&mut Transcript<io::Stdout>) -> io::Result<T>,
) -> io::Result<T> {
    let mut guard = transcript.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    write(&mut guard)
}
