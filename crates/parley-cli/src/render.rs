//! Plain-text rendering of controller events

use parley_api::{ChatId, Message, Role};
use parley_core::ViewEvent;

/// What the render loop should do after an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderAction {
    Continue,
    /// The credential is gone; stop reading input
    SignOut,
}

/// Incremental transcript of the open conversation.
///
/// Tracks what has already been printed so each `MessagesChanged` only emits
/// the new tail, and reprints from a header when another conversation opens.
#[derive(Debug, Default)]
pub struct Transcript {
    conversation_id: Option<ChatId>,
    title: String,
    printed: Vec<Message>,
    pending: bool,
    started: bool,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event, returning the lines to print.
    pub fn apply(&mut self, event: &ViewEvent) -> (Vec<String>, RenderAction) {
        let mut lines = Vec::new();
        match event {
            ViewEvent::MessagesChanged {
                conversation_id,
                title,
                messages,
                pending_send,
            } => {
                if self.continues(conversation_id.as_ref(), messages) {
                    if *title != self.title {
                        lines.push(format!("[title: {}]", title));
                    }
                    for message in &messages[self.printed.len()..] {
                        lines.push(format_message(message));
                    }
                } else {
                    lines.push(header(conversation_id.as_ref(), title));
                    lines.extend(messages.iter().map(format_message));
                }
                if *pending_send && !self.pending {
                    lines.push("...".to_string());
                }

                self.started = true;
                self.conversation_id = conversation_id.clone();
                self.title = title.clone();
                self.printed = messages.clone();
                self.pending = *pending_send;
            }
            ViewEvent::Error { kind, message } => {
                lines.push(format!("error ({}): {}", kind.as_str(), message));
            }
            ViewEvent::Unauthenticated => {
                lines.push("Signed out. Run parley --token <token> to sign in again.".to_string());
                return (lines, RenderAction::SignOut);
            }
            // The list is printed on demand by /history.
            ViewEvent::RegistryChanged { .. } => {}
        }
        (lines, RenderAction::Continue)
    }

    /// Same conversation with only new entries appended.
    ///
    /// An unsaved conversation becoming saved counts as the same one.
    fn continues(&self, id: Option<&ChatId>, messages: &[Message]) -> bool {
        if !self.started {
            return false;
        }
        let same_id = match (&self.conversation_id, id) {
            (None, None) => true,
            (None, Some(_)) => !self.printed.is_empty(),
            (Some(prev), Some(id)) => prev == id,
            (Some(_), None) => false,
        };
        same_id
            && messages.len() >= self.printed.len()
            && messages[..self.printed.len()] == self.printed[..]
    }
}

fn header(id: Option<&ChatId>, title: &str) -> String {
    match id {
        Some(id) => format!("== {} ({}) ==", title, id),
        None => format!("== {} ==", title),
    }
}

fn format_message(message: &Message) -> String {
    match message.role {
        Role::User => format!("you> {}", message.content),
        Role::Assistant => format!("assistant> {}", message.content),
        Role::SystemError => format!("[!] {}", message.content),
    }
}
