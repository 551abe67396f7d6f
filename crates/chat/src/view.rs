//! Presentation state derived from a session and the model lifecycle.
//!
//! Nothing here mutates the session; a front end rebuilds the view after
//! applying [`crate::SessionUpdate`]s and draws it however it likes.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::Hasher;
use std::sync::Arc;

use buddy_llm::LifecycleState;

use crate::markdown::{self, Rendered};
use crate::message::{Message, MessageId, Role};
use crate::session::{ChatSession, DisplayMode};

pub const CONSENT_TITLE: &str = "System Warning";
pub const CONSENT_MESSAGE: &str = "To use this chat feature, you must download the LLM model (a \
large file of several GBs). This is only required on the first launch, but it may take several \
minutes to complete (depending on your internet speed).";
pub const CONSENT_BUTTON_LABEL: &str = "Agree and Start Model Download";

pub const USER_LABEL: &str = "You";
/// Shown for a finalized assistant message with no text.
pub const EMPTY_REPLY_TEXT: &str = "...";
pub const THINKING_TEXT: &str = "Thinking...";

pub const PLACEHOLDER_ERROR: &str = "An error occurred";
pub const PLACEHOLDER_PENDING: &str = "Please press the start button";
pub const PLACEHOLDER_LOADING: &str = "Loading model...";
pub const PLACEHOLDER_STREAMING: &str = "Waiting for response...";
pub const PLACEHOLDER_READY: &str = "Enter your message...";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentNotice {
    pub title: &'static str,
    pub message: &'static str,
    pub button_label: &'static str,
}

impl ConsentNotice {
    fn standard() -> Self {
        Self {
            title: CONSENT_TITLE,
            message: CONSENT_MESSAGE,
            button_label: CONSENT_BUTTON_LABEL,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadingIndicator {
    Downloading { progress: f64, message: String },
    Thinking,
}

impl LoadingIndicator {
    pub fn label(&self) -> String {
        match self {
            Self::Downloading { message, .. } => format!("Downloading: {message}"),
            Self::Thinking => THINKING_TEXT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    /// Shown verbatim with whitespace preserved.
    Raw(String),
    Markdown(Arc<Rendered>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageView {
    pub id: MessageId,
    pub role: Role,
    pub role_label: String,
    pub body: MessageBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputView {
    pub value: String,
    pub placeholder: &'static str,
    pub input_disabled: bool,
    pub submit_disabled: bool,
    pub submit_label: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatView {
    pub consent: Option<ConsentNotice>,
    /// `None` while the list is hidden behind consent or model loading.
    pub messages: Option<Vec<MessageView>>,
    pub indicator: Option<LoadingIndicator>,
    pub input: InputView,
}

impl ChatView {
    pub fn build(session: &ChatSession, cache: &mut MarkdownCache) -> Self {
        let state = session.lifecycle().state();
        let pending = matches!(*state, LifecycleState::Pending);
        let loading = matches!(*state, LifecycleState::Loading { .. });
        let streaming = session.is_streaming();

        let messages = (!pending && !loading).then(|| {
            cache.retain_messages(session.messages());
            session
                .messages()
                .iter()
                .map(|message| message_view(session, message, cache))
                .collect()
        });

        let indicator = match &*state {
            LifecycleState::Loading { progress, message } => Some(LoadingIndicator::Downloading {
                progress: *progress,
                message: message.clone(),
            }),
            _ if streaming => Some(LoadingIndicator::Thinking),
            _ => None,
        };

        Self {
            consent: pending.then(ConsentNotice::standard),
            messages,
            indicator,
            input: input_view(&state, session.draft(), streaming),
        }
    }
}

fn message_view(session: &ChatSession, message: &Message, cache: &mut MarkdownCache) -> MessageView {
    let role_label = match message.role {
        Role::User => USER_LABEL.to_string(),
        Role::Assistant => session.knowledge().assistant_name().to_string(),
    };

    let body = match session.display_mode(message) {
        DisplayMode::Raw => MessageBody::Raw(message.text.clone()),
        DisplayMode::Markdown => MessageBody::Markdown(cache.render(message)),
    };

    MessageView {
        id: message.id,
        role: message.role,
        role_label,
        body,
    }
}

fn input_view(state: &LifecycleState, draft: &str, streaming: bool) -> InputView {
    let ready = state.is_ready();

    let placeholder = match state {
        LifecycleState::Ready { .. } if streaming => PLACEHOLDER_STREAMING,
        LifecycleState::Ready { .. } => PLACEHOLDER_READY,
        LifecycleState::Error { .. } => PLACEHOLDER_ERROR,
        LifecycleState::Pending => PLACEHOLDER_PENDING,
        LifecycleState::Uninitialized | LifecycleState::Loading { .. } => PLACEHOLDER_LOADING,
    };

    let submit_label = if streaming {
        "Sending"
    } else if !ready {
        "Waiting"
    } else {
        "Send"
    };

    InputView {
        value: draft.to_string(),
        placeholder,
        input_disabled: streaming || !ready,
        submit_disabled: streaming || draft.trim().is_empty() || !ready,
        submit_label,
    }
}

struct CacheEntry {
    content_hash: u64,
    rendered: Arc<Rendered>,
}

/// Rendered Markdown per message, reused until the text changes.
#[derive(Default)]
pub struct MarkdownCache {
    entries: HashMap<MessageId, CacheEntry>,
}

impl MarkdownCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn render(&mut self, message: &Message) -> Arc<Rendered> {
        let source = markdown_source(message);
        let next_hash = content_hash(message.id, source);

        let entry = self.entries.entry(message.id).or_insert_with(|| CacheEntry {
            content_hash: next_hash,
            rendered: Arc::new(markdown::render(source)),
        });

        if entry.content_hash != next_hash {
            entry.content_hash = next_hash;
            entry.rendered = Arc::new(markdown::render(source));
        }

        Arc::clone(&entry.rendered)
    }

    /// Drops entries for messages no longer in the conversation.
    pub fn retain_messages(&mut self, messages: &[Message]) {
        let active_ids = messages
            .iter()
            .map(|message| message.id)
            .collect::<HashSet<_>>();
        self.entries.retain(|id, _| active_ids.contains(id));
    }
}

impl std::fmt::Debug for MarkdownCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarkdownCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}

fn markdown_source(message: &Message) -> &str {
    if message.text.is_empty() {
        EMPTY_REPLY_TEXT
    } else {
        &message.text
    }
}

fn content_hash(id: MessageId, source: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    hasher.write_u64(id.0);
    hasher.write(source.as_bytes());
    hasher.finish()
}
