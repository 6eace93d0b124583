//! Wire types exchanged with the remote chat service

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::Path;

/// Title the remote service gives a conversation before one is generated
pub const PLACEHOLDER_TITLE: &str = "New Chat";

/// Opaque conversation identifier assigned by the remote service.
///
/// The service emits numeric ids; they are kept as strings so nothing
/// downstream depends on their shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ChatId(String);

impl ChatId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChatId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ChatId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl<'de> Deserialize<'de> for ChatId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => ChatId(s),
            Raw::Number(n) => ChatId(n.to_string()),
        })
    }
}

/// Author of a message in a conversation log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    #[serde(alias = "ai")]
    Assistant,
    /// Local-only entry recording a failed send
    #[serde(alias = "system-error")]
    SystemError,
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "you",
            Role::Assistant => "assistant",
            Role::SystemError => "error",
        }
    }
}

/// One entry of a conversation log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system_error(content: impl Into<String>) -> Self {
        Self {
            role: Role::SystemError,
            content: content.into(),
        }
    }
}

/// History entry: a conversation's id and title
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: ChatId,
    #[serde(default)]
    pub title: String,
}

impl ConversationSummary {
    pub fn new(id: impl Into<ChatId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

/// A file uploaded alongside a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let mime_type = guess_mime_type(&file_name).map(str::to_string);
        Self {
            file_name,
            mime_type,
            bytes,
        }
    }

    /// Read a file from disk into an attachment
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self::new(file_name, bytes))
    }
}

/// Map common file extensions to a MIME type
pub fn guess_mime_type(file_name: &str) -> Option<&'static str> {
    let ext = Path::new(file_name)
        .extension()?
        .to_str()?
        .to_ascii_lowercase();
    Some(match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "json" => "application/json",
        _ => return None,
    })
}

/// Arguments of a `POST /chat/send` call
#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    pub message: String,
    /// Omitted for a conversation the service has not seen yet
    pub chat_id: Option<ChatId>,
    pub attachments: Vec<Attachment>,
}

/// Reply to `POST /chat/send`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SendResponse {
    pub chat_id: ChatId,
    #[serde(default)]
    pub chat_title: Option<String>,
    pub response: String,
}
