//! Gateway trait: one method per remote endpoint

use async_trait::async_trait;

use crate::{
    error::Result,
    types::{ChatId, ConversationSummary, Message, SendRequest, SendResponse},
};

/// Typed access to the remote chat service.
///
/// Implementations never cache and never retry. The bearer credential is
/// passed on every call instead of being read from ambient state.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// `GET /chat/history`, newest first
    async fn history(&self, token: &str) -> Result<Vec<ConversationSummary>>;

    /// `GET /chat/{id}/messages`, in log order
    async fn messages(&self, token: &str, id: &ChatId) -> Result<Vec<Message>>;

    /// `POST /chat/send`
    async fn send(&self, token: &str, request: SendRequest) -> Result<SendResponse>;

    /// `PUT /chat/{id}/title`
    async fn rename(&self, token: &str, id: &ChatId, title: &str) -> Result<()>;

    /// `DELETE /chat/{id}`
    async fn delete(&self, token: &str, id: &ChatId) -> Result<()>;
}
