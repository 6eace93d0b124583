//! View events: the notifications a UI layer subscribes to

use parley_api::{ChatId, ConversationSummary, ErrorKind, Message};
use serde::{Deserialize, Serialize};

/// Events emitted to the view layer after each state change
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewEvent {
    /// History list or active mark changed
    RegistryChanged {
        summaries: Vec<ConversationSummary>,
        active_id: Option<ChatId>,
    },

    /// Open conversation's log, title or send status changed
    MessagesChanged {
        conversation_id: Option<ChatId>,
        title: String,
        messages: Vec<Message>,
        pending_send: bool,
    },

    /// An operation failed
    Error { kind: ErrorKind, message: String },

    /// The credential is gone; the view should return to its sign-in entry point
    Unauthenticated,
}

impl ViewEvent {
    pub fn is_error(&self) -> bool {
        matches!(self, ViewEvent::Error { .. } | ViewEvent::Unauthenticated)
    }
}
