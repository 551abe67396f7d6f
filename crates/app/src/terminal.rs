use std::io::{self, Write};

use buddy_chat::view::{ConsentNotice, LoadingIndicator, MessageBody};
use buddy_chat::{ChatSession, ChatView, MarkdownCache, MessageId, Role, SessionUpdate};

/// Writes session changes to a line-oriented terminal.
///
/// Streamed deltas are echoed as they arrive; once a reply is final the whole
/// message is printed again as formatted text.
pub struct Transcript<W> {
    out: W,
    cache: MarkdownCache,
    live: Option<LiveReply>,
}

struct LiveReply {
    id: MessageId,
    printed: usize,
}

impl<W: Write> Transcript<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            cache: MarkdownCache::new(),
            live: None,
        }
    }

    pub fn consent(&mut self, notice: &ConsentNotice) -> io::Result<()> {
        writeln!(self.out, "== {} ==", notice.title)?;
        writeln!(self.out, "{}", notice.message)?;
        write!(self.out, "[{}] (y/N): ", notice.button_label)?;
        self.out.flush()
    }

    pub fn progress(&mut self, indicator: &LoadingIndicator) -> io::Result<()> {
        match indicator {
            LoadingIndicator::Downloading { progress, .. } => writeln!(
                self.out,
                "{} ({:.0}%)",
                indicator.label(),
                progress.clamp(0.0, 1.0) * 100.0
            ),
            LoadingIndicator::Thinking => writeln!(self.out, "{}", indicator.label()),
        }
    }

    pub fn line(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "{text}")
    }

    /// Prints every visible message, used once the model is ready.
    pub fn history(&mut self, session: &ChatSession) -> io::Result<()> {
        let view = ChatView::build(session, &mut self.cache);
        for message in view.messages.unwrap_or_default() {
            let text = match &message.body {
                MessageBody::Raw(text) => text.clone(),
                MessageBody::Markdown(rendered) => rendered.to_plain_text(),
            };
            writeln!(self.out, "{}: {}\n", message.role_label, text)?;
        }
        Ok(())
    }

    pub fn prompt(&mut self, session: &ChatSession) -> io::Result<()> {
        let view = ChatView::build(session, &mut self.cache);
        write!(self.out, "({}) > ", view.input.placeholder)?;
        self.out.flush()
    }

    pub fn apply(&mut self, session: &ChatSession, updates: &[SessionUpdate]) -> io::Result<()> {
        for update in updates {
            match update {
                SessionUpdate::MessageAppended(id) => {
                    let Some(message) = session.message(*id) else {
                        continue;
                    };
                    if message.role == Role::Assistant && session.streaming_message_id() == Some(*id) {
                        write!(self.out, "{}: ", session.knowledge().assistant_name())?;
                        self.live = Some(LiveReply { id: *id, printed: 0 });
                    }
                }
                SessionUpdate::MessageUpdated(id) => self.echo_delta(session, *id)?,
                SessionUpdate::StreamingChanged(false) => self.finish_reply(session)?,
                SessionUpdate::StreamingChanged(true)
                | SessionUpdate::DraftChanged
                | SessionUpdate::ScrollToBottom(_) => {}
            }
        }
        self.out.flush()
    }

    /// Prints the last assistant reply as HTML.
    pub fn last_reply_html(&mut self, session: &ChatSession) -> io::Result<()> {
        let Some(message) = session
            .messages()
            .iter()
            .rev()
            .find(|message| message.role == Role::Assistant)
        else {
            return Ok(());
        };
        let rendered = self.cache.render(message);
        writeln!(self.out, "{}", rendered.to_html())
    }

    fn echo_delta(&mut self, session: &ChatSession, id: MessageId) -> io::Result<()> {
        let Some(live) = self.live.as_mut().filter(|live| live.id == id) else {
            return Ok(());
        };
        let Some(message) = session.message(id) else {
            return Ok(());
        };

        if let Some(fresh) = message.text.get(live.printed..) {
            self.out.write_all(fresh.as_bytes())?;
            live.printed = message.text.len();
        }
        Ok(())
    }

    fn finish_reply(&mut self, session: &ChatSession) -> io::Result<()> {
        let Some(live) = self.live.take() else {
            return Ok(());
        };
        let Some(message) = session.message(live.id) else {
            return Ok(());
        };

        let formatted = self.cache.render(message).to_plain_text();
        writeln!(self.out, "\n")?;
        writeln!(
            self.out,
            "{}: {}\n",
            session.knowledge().assistant_name(),
            formatted
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use buddy_chat::KnowledgeBase;
    use buddy_llm::{
        BoxFuture, CompletionRequest, EngineError, EngineLoader, EngineResult,
        EngineStreamHandle, InferenceEngine, LifecycleState, ModelLifecycle, ProgressReporter,
        StreamEvent, event_channel,
    };

    use super::*;

    /// Streams a fixed reply, then completes.
    struct EchoEngine;

    impl InferenceEngine for EchoEngine {
        fn model_id(&self) -> &str {
            "echo"
        }

        fn stream_chat(&self, _request: CompletionRequest) -> EngineResult<EngineStreamHandle> {
            let (event_tx, stream, _cancel_rx) = event_channel();
            let worker = Box::pin(async move {
                for delta in ["**Use", " the", " zip**"] {
                    let _ = event_tx.send(StreamEvent::Delta(delta.to_string()));
                }
                let _ = event_tx.send(StreamEvent::Done);
            });
            Ok(EngineStreamHandle { stream, worker })
        }
    }

    struct NoLoader;

    impl EngineLoader for NoLoader {
        fn create<'a>(
            &'a self,
            _model_id: &'a str,
            _progress: ProgressReporter,
        ) -> BoxFuture<'a, EngineResult<Arc<dyn InferenceEngine>>> {
            Box::pin(async { Err(EngineError::backend("test", "unused")) })
        }
    }

    #[tokio::test]
    async fn streamed_reply_is_echoed_then_formatted() {
        let lifecycle = ModelLifecycle::with_state(
            Arc::new(NoLoader),
            LifecycleState::Ready {
                engine: Arc::new(EchoEngine),
            },
        );
        let mut session = ChatSession::new(lifecycle, KnowledgeBase::new("Buddy", "faq"));
        let mut transcript = Transcript::new(Vec::new());

        session.set_draft("install?");
        let updates = session.submit();
        transcript.apply(&session, &updates).unwrap();
        let updates = session.finish_stream().await;
        transcript.apply(&session, &updates).unwrap();

        let output = String::from_utf8(transcript.out).unwrap();
        assert!(output.starts_with("Buddy: **Use the zip**"), "{output}");
        assert!(output.ends_with("Buddy: Use the zip\n\n"), "{output}");
    }

    #[test]
    fn progress_lines_show_percentage() {
        let mut transcript = Transcript::new(Vec::new());
        transcript
            .progress(&LoadingIndicator::Downloading {
                progress: 0.25,
                message: "Fetching params".to_string(),
            })
            .unwrap();

        let output = String::from_utf8(transcript.out).unwrap();
        assert_eq!(output, "Downloading: Fetching params (25%)\n");
    }
}
