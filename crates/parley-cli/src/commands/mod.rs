//! Slash commands for interactive mode

mod history;

pub use history::{HistoryCommand, resolve_ref};

/// A parsed slash command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    /// Start a new conversation
    New,
    /// List conversations
    History,
    /// Reload the history list from the service
    Refresh,
    /// Open a conversation by id or `#index`
    Open(String),
    /// Rename the open conversation
    Rename(String),
    /// Delete a conversation by id or `#index`, or the open one
    Delete(Option<String>),
    /// Queue a file for the next message
    Attach(String),
    /// Drop queued files
    Detach,
    /// Forget the stored credential and exit
    Logout,
    Quit,
    /// Known command used wrongly; carries the usage line
    Usage(&'static str),
    Unknown(String),
}

/// Parse a slash command. Returns `None` for plain message text.
pub fn parse_command(input: &str) -> Option<Command> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let parts: Vec<&str> = rest.splitn(2, ' ').collect();
    let command = parts[0].to_lowercase();
    let args = parts.get(1).map(|s| s.trim()).unwrap_or("");

    Some(match command.as_str() {
        "help" | "h" | "?" => Command::Help,
        "new" | "n" => Command::New,
        "history" | "ls" => Command::History,
        "refresh" => Command::Refresh,
        "open" | "o" if args.is_empty() => Command::Usage("/open <id|#index>"),
        "open" | "o" => Command::Open(args.to_string()),
        "rename" | "r" if args.is_empty() => Command::Usage("/rename <title>"),
        "rename" | "r" => Command::Rename(args.to_string()),
        "delete" | "rm" if args.is_empty() => Command::Delete(None),
        "delete" | "rm" => Command::Delete(Some(args.to_string())),
        "attach" | "a" if args.is_empty() => Command::Usage("/attach <path>"),
        "attach" | "a" => Command::Attach(args.to_string()),
        "detach" => Command::Detach,
        "logout" => Command::Logout,
        "quit" | "exit" | "q" => Command::Quit,
        _ => Command::Unknown(command),
    })
}

/// A yes answer to a confirmation prompt. Anything else, including an empty
/// line, means no.
pub fn confirms(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

pub fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?           Show this help message
  /new, /n                Start a new conversation
  /history, /ls           List conversations (newest first)
  /refresh                Reload the list from the server
  /open, /o <id|#n>       Open a conversation by id or list position
  /rename, /r <title>     Rename the open conversation
  /delete, /rm [id|#n]    Delete a conversation after asking (default: the open one)
  /attach, /a <path>      Attach a file to the next message
  /detach                 Drop queued attachments
  /logout                 Forget the stored token and exit
  /quit, /exit, /q        Exit parley

Anything else is sent as a message.

Examples:
  /open #2                Open the second conversation in /history
  /rename Trip planning   Rename the open conversation"#
        .to_string()
}
