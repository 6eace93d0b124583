//! Session store: the bearer credential shared by every outbound call.

use parking_lot::RwLock;
use std::sync::Arc;

/// Holds the bearer credential.
///
/// Cloning is cheap; clones share the same slot.
#[derive(Clone, Default)]
pub struct SessionStore {
    token: Arc<RwLock<Option<String>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let store = Self::new();
        store.set(token);
        store
    }

    /// Current credential, if any
    pub fn get(&self) -> Option<String> {
        self.token.read().clone()
    }

    /// Replace the credential. Blank tokens clear the store.
    pub fn set(&self, token: impl Into<String>) {
        let token = token.into();
        let token = token.trim();
        *self.token.write() = if token.is_empty() {
            None
        } else {
            Some(token.to_string())
        };
    }

    pub fn clear(&self) {
        if self.token.write().take().is_some() {
            tracing::debug!("session credential cleared");
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.read().is_some()
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}
