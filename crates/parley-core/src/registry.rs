//! Conversation registry: the ordered history list

use parley_api::{ChatId, ConversationSummary};

/// Ordered collection of conversation summaries, newest first.
///
/// Ids are unique. At most one entry is active.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Vec<ConversationSummary>,
    active: Option<ChatId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole collection, keeping the given order.
    ///
    /// Later duplicates of an id are dropped. The active mark survives only if
    /// its id is still present.
    pub fn replace_all(&mut self, summaries: Vec<ConversationSummary>) {
        self.entries.clear();
        for summary in summaries {
            if !self.contains(&summary.id) {
                self.entries.push(summary);
            }
        }
        if let Some(active) = self.active.take() {
            if self.contains(&active) {
                self.active = Some(active);
            }
        }
    }

    /// Insert at the front. Returns `false` (and changes nothing) if the id is present.
    pub fn add_front(&mut self, summary: ConversationSummary) -> bool {
        if self.contains(&summary.id) {
            return false;
        }
        self.entries.insert(0, summary);
        true
    }

    /// Update a title in place. Returns `false` if the id is absent.
    pub fn rename(&mut self, id: &ChatId, title: impl Into<String>) -> bool {
        match self.entries.iter_mut().find(|s| &s.id == id) {
            Some(entry) => {
                entry.title = title.into();
                true
            }
            None => false,
        }
    }

    /// Delete an entry. Returns `false` if the id is absent.
    pub fn remove(&mut self, id: &ChatId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|s| &s.id != id);
        if self.active.as_ref() == Some(id) {
            self.active = None;
        }
        self.entries.len() != before
    }

    /// Mark one entry active, or none. An id not in the registry clears the mark.
    pub fn mark_active(&mut self, id: Option<&ChatId>) {
        self.active = id.filter(|id| self.contains(id)).cloned();
    }

    pub fn contains(&self, id: &ChatId) -> bool {
        self.entries.iter().any(|s| &s.id == id)
    }

    pub fn get(&self, id: &ChatId) -> Option<&ConversationSummary> {
        self.entries.iter().find(|s| &s.id == id)
    }

    pub fn title_of(&self, id: &ChatId) -> Option<String> {
        self.get(id).map(|s| s.title.clone())
    }

    pub fn first(&self) -> Option<&ConversationSummary> {
        self.entries.first()
    }

    pub fn summaries(&self) -> &[ConversationSummary] {
        &self.entries
    }

    pub fn active_id(&self) -> Option<&ChatId> {
        self.active.as_ref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
