#![deny(unsafe_code)]

//! Support chat session controller, Markdown rendering, and the knowledge
//! injected into every conversation.

mod events;
pub mod knowledge;
pub mod markdown;
mod message;
mod scroll;
mod session;
pub mod view;


pub use events::{ScrollBehavior, SessionUpdate};
pub use knowledge::{ASSISTANT_NAME, KnowledgeBase, KnowledgeError};
pub use markdown::{Rendered, render};
pub use message::{Message, MessageId, Role};
pub use scroll::{DEFAULT_FOLLOW_THRESHOLD, ScrollMetrics, ScrollTracker};
pub use session::{ChatSession, DisplayMode, ERROR_SUFFIX, SessionPhase};
pub use view::{ChatView, MarkdownCache};
