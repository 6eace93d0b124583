//! /history listing and conversation references

use parley_api::{ChatId, ConversationSummary};

use crate::utils::truncate_chars;

pub struct HistoryCommand;

impl HistoryCommand {
    pub fn render(summaries: &[ConversationSummary], active: Option<&ChatId>) -> String {
        if summaries.is_empty() {
            return "No conversations yet.".to_string();
        }

        let mut output = String::from("Conversations\n");
        output.push_str(&"-".repeat(40));
        for (i, summary) in summaries.iter().enumerate() {
            let marker = if Some(&summary.id) == active { '*' } else { ' ' };
            output.push_str(&format!(
                "\n{} #{:<3} {:<8} {}",
                marker,
                i + 1,
                summary.id.as_str(),
                truncate_chars(&summary.title, 60)
            ));
        }
        output
    }
}

/// Resolve `#n` (1-based list position) or a literal id.
///
/// Literal ids are passed through even if unlisted; the controller decides.
pub fn resolve_ref(reference: &str, summaries: &[ConversationSummary]) -> Option<ChatId> {
    let reference = reference.trim();
    match reference.strip_prefix('#') {
        Some(index) => {
            let n: usize = index.parse().ok()?;
            summaries.get(n.checked_sub(1)?).map(|s| s.id.clone())
        }
        None if reference.is_empty() => None,
        None => Some(ChatId::new(reference)),
    }
}
