use std::time::SystemTime;

/// Stable identifier for one message, used to key rendering caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl MessageId {
    /// Creates a typed message identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn to_engine(self) -> buddy_llm::Role {
        match self {
            Self::User => buddy_llm::Role::User,
            Self::Assistant => buddy_llm::Role::Assistant,
        }
    }
}

/// One conversation turn.
///
/// Only the trailing assistant message is ever mutated, and only while its
/// reply is streaming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub text: String,
    pub created_at: SystemTime,
}

impl Message {
    pub fn new(id: MessageId, role: Role, text: impl Into<String>) -> Self {
        Self {
            id,
            role,
            text: text.into(),
            created_at: SystemTime::now(),
        }
    }

    pub fn user(id: MessageId, text: impl Into<String>) -> Self {
        Self::new(id, Role::User, text)
    }

    /// Creates an empty assistant placeholder that receives streamed text.
    pub fn assistant_placeholder(id: MessageId) -> Self {
        Self::new(id, Role::Assistant, String::new())
    }

    pub fn to_engine_message(&self) -> buddy_llm::ChatMessage {
        buddy_llm::ChatMessage::new(self.role.to_engine(), self.text.clone())
    }
}

/// Monotonic id source owned by one session.
#[derive(Debug, Clone)]
pub(crate) struct MessageIdAllocator {
    next: u64,
}

impl MessageIdAllocator {
    pub(crate) fn new() -> Self {
        Self { next: 1 }
    }

    pub(crate) fn alloc(&mut self) -> MessageId {
        let id = MessageId::new(self.next);
        self.next = self.next.saturating_add(1);
        id
    }
}
