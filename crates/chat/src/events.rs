use crate::message::MessageId;

/// How the message list should move to its bottom edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScrollBehavior {
    /// Eased scroll, used while no reply is streaming.
    Smooth,
    /// Jump without easing so rapid token updates do not stack animations.
    Instant,
}

/// Change notification emitted by every mutating session operation.
///
/// A view applies these in order and re-renders only the named message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    MessageAppended(MessageId),
    MessageUpdated(MessageId),
    DraftChanged,
    StreamingChanged(bool),
    ScrollToBottom(ScrollBehavior),
}
