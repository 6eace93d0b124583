//! Conversation state held by the controller.

use parley_api::{ChatId, Message, PLACEHOLDER_TITLE};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whether the remote service knows this conversation yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "id", rename_all = "snake_case")]
pub enum Lifecycle {
    /// Not yet sent; no id assigned
    Unsaved,
    /// Id assigned by the service on first successful send
    Saved(ChatId),
}

/// The open conversation: identity, title, log and send status.
#[derive(Debug, Clone)]
pub struct ConversationState {
    /// Local identity of this in-memory instance. Re-opening a conversation
    /// yields a new key.
    pub(crate) key: Uuid,
    pub lifecycle: Lifecycle,
    pub title: String,
    /// Append-only log
    pub messages: Vec<Message>,
    /// True exactly while a send from this conversation is in flight
    pub pending_send: bool,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationState {
    /// A fresh "New Chat"
    pub fn new() -> Self {
        Self {
            key: Uuid::new_v4(),
            lifecycle: Lifecycle::Unsaved,
            title: PLACEHOLDER_TITLE.to_string(),
            messages: Vec::new(),
            pending_send: false,
        }
    }

    /// A conversation loaded from the service
    pub fn saved(id: ChatId, title: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            key: Uuid::new_v4(),
            lifecycle: Lifecycle::Saved(id),
            title: title.into(),
            messages,
            pending_send: false,
        }
    }

    pub fn id(&self) -> Option<&ChatId> {
        match &self.lifecycle {
            Lifecycle::Unsaved => None,
            Lifecycle::Saved(id) => Some(id),
        }
    }

    pub fn is_saved(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Saved(_))
    }

    pub fn has_placeholder_title(&self) -> bool {
        self.title == PLACEHOLDER_TITLE
    }

    /// Whether this is an untouched New Chat
    pub fn is_blank(&self) -> bool {
        !self.is_saved() && self.messages.is_empty() && !self.pending_send
    }
}
