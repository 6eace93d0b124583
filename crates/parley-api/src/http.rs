//! HTTP implementation of the gateway over reqwest

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{
    error::{Error, Result},
    gateway::Gateway,
    types::{ChatId, ConversationSummary, Message, SendRequest, SendResponse},
};

/// Base URL used when none is configured
pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";

/// Request timeout used when none is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Chat service client
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct TitleBody<'a> {
    title: &'a str,
}

impl HttpGateway {
    /// Create a client with the default timeout
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// Create a client whose requests give up after `timeout`
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn chat_url(&self, id: &ChatId, suffix: &str) -> String {
        let encoded = urlencoding::encode(id.as_str());
        if suffix.is_empty() {
            self.url(&format!("chat/{}", encoded))
        } else {
            self.url(&format!("chat/{}/{}", encoded, suffix))
        }
    }

    fn bearer(token: &str) -> String {
        format!("Bearer {}", token)
    }

    /// Turn a non-success response into the matching error
    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = error_message_from_body(status, &body);
        tracing::debug!("chat service returned {}: {}", status.as_u16(), message);
        Err(Error::from_status(status.as_u16(), message))
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let response = Self::check(response).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| Error::UnexpectedResponse(e.to_string()))
    }
}

/// Extract the service's `{"message": ...}` text, falling back to the reason phrase
pub fn error_message_from_body(status: reqwest::StatusCode, body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        })
}

fn build_form(request: SendRequest) -> Result<Form> {
    let mut form = Form::new().text("message", request.message);
    if let Some(id) = request.chat_id {
        form = form.text("chat_id", id.to_string());
    }
    for attachment in request.attachments {
        let mut part = Part::bytes(attachment.bytes).file_name(attachment.file_name);
        if let Some(mime) = attachment.mime_type {
            part = part.mime_str(&mime)?;
        }
        form = form.part("files", part);
    }
    Ok(form)
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn history(&self, token: &str) -> Result<Vec<ConversationSummary>> {
        tracing::debug!("GET chat/history");
        let response = self
            .client
            .get(self.url("chat/history"))
            .header("Authorization", Self::bearer(token))
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn messages(&self, token: &str, id: &ChatId) -> Result<Vec<Message>> {
        tracing::debug!("GET chat/{}/messages", id);
        let response = self
            .client
            .get(self.chat_url(id, "messages"))
            .header("Authorization", Self::bearer(token))
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn send(&self, token: &str, request: SendRequest) -> Result<SendResponse> {
        tracing::debug!(
            "POST chat/send (chat_id: {:?}, {} attachment(s))",
            request.chat_id,
            request.attachments.len()
        );
        let form = build_form(request)?;
        let response = self
            .client
            .post(self.url("chat/send"))
            .header("Authorization", Self::bearer(token))
            .multipart(form)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn rename(&self, token: &str, id: &ChatId, title: &str) -> Result<()> {
        tracing::debug!("PUT chat/{}/title", id);
        let response = self
            .client
            .put(self.chat_url(id, "title"))
            .header("Authorization", Self::bearer(token))
            .json(&TitleBody { title })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete(&self, token: &str, id: &ChatId) -> Result<()> {
        tracing::debug!("DELETE chat/{}", id);
        let response = self
            .client
            .delete(self.chat_url(id, ""))
            .header("Authorization", Self::bearer(token))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
