//! Active conversation controller
//!
//! Owns the open [`ConversationState`] and the history [`Registry`], and drives
//! every transition between them: optimistic sends, confirm-then-commit
//! renames, deletes and history refreshes. Gateway failures stop here and are
//! turned into transcript entries or [`ViewEvent::Error`] notifications.

use parking_lot::Mutex;
use parley_api::{
    Attachment, ChatId, ConversationSummary, ErrorKind, Gateway, Message, PLACEHOLDER_TITLE,
    SendRequest, SendResponse,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
    conversation::{ConversationState, Lifecycle},
    error::{Error, Result},
    events::ViewEvent,
    registry::Registry,
    session::SessionStore,
};

const EVENT_CAPACITY: usize = 256;

/// Transcript text recorded when the service could not be reached
const NETWORK_FAILURE_TEXT: &str = "An error occurred while communicating with the assistant.";

/// What became of a `send` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Nothing to send; no request issued
    Skipped,
    /// Reply appended to the open conversation
    Delivered { chat_id: ChatId },
    /// Failure recorded as a `system_error` entry
    Failed { kind: ErrorKind },
    /// The conversation was left while the request was in flight; only the
    /// history list was touched, if anything
    Detached,
}

/// Drives the open conversation and the history list.
///
/// Cloning is cheap and clones share state, so a send can run as its own task
/// while the user keeps navigating. Locks are never held across `.await`; when
/// several are needed they are taken in the order `state`, `registry`,
/// `in_flight`.
#[derive(Clone)]
pub struct ChatController {
    gateway: Arc<dyn Gateway>,
    session: SessionStore,
    state: Arc<Mutex<ConversationState>>,
    registry: Arc<Mutex<Registry>>,
    /// Saved ids with a send in flight, whichever state instance issued it
    in_flight: Arc<Mutex<HashSet<ChatId>>>,
    event_tx: broadcast::Sender<ViewEvent>,
}

impl ChatController {
    pub fn new(gateway: Arc<dyn Gateway>, session: SessionStore) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            gateway,
            session,
            state: Arc::new(Mutex::new(ConversationState::new())),
            registry: Arc::new(Mutex::new(Registry::new())),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            event_tx,
        }
    }

    /// Subscribe to view events
    pub fn subscribe(&self) -> broadcast::Receiver<ViewEvent> {
        self.event_tx.subscribe()
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// Snapshot of the open conversation
    pub fn state(&self) -> ConversationState {
        self.state.lock().clone()
    }

    /// Snapshot of the history list
    pub fn summaries(&self) -> Vec<ConversationSummary> {
        self.registry.lock().summaries().to_vec()
    }

    pub fn active_id(&self) -> Option<ChatId> {
        self.registry.lock().active_id().cloned()
    }

    // --- operations ---

    /// Load history, then open the newest conversation or start a new one.
    pub async fn initialize(&self) -> Result<()> {
        self.load_history().await?;
        let newest = self.registry.lock().first().map(|s| s.id.clone());
        match newest {
            Some(id) => self.open(&id).await,
            None => {
                self.start_new();
                Ok(())
            }
        }
    }

    /// Replace the history list with the service's copy.
    ///
    /// If the open conversation is no longer listed, it is closed.
    pub async fn load_history(&self) -> Result<()> {
        let token = self.token()?;
        let summaries = match self.gateway.history(&token).await {
            Ok(summaries) => summaries,
            Err(e) => {
                self.handle_api_failure(&e);
                let err = Error::History(e);
                self.report(err.kind(), err.to_string());
                return Err(err);
            }
        };

        tracing::debug!("history refreshed: {} conversation(s)", summaries.len());
        let vanished = {
            let state = self.state.lock();
            let mut registry = self.registry.lock();
            registry.replace_all(summaries);
            match state.id() {
                Some(id) if registry.contains(id) => {
                    registry.mark_active(Some(id));
                    false
                }
                Some(_) => true,
                None => false,
            }
        };

        if vanished {
            self.start_new();
        } else {
            self.notify_registry();
        }
        Ok(())
    }

    /// Reset to an empty, unsaved "New Chat".
    ///
    /// Allowed while a send is pending: the pending send is tracked by its own
    /// conversation and will not touch the new one.
    pub fn start_new(&self) {
        {
            let mut state = self.state.lock();
            *state = ConversationState::new();
        }
        self.registry.lock().mark_active(None);
        tracing::debug!("started new conversation");
        self.notify_registry();
        self.notify_messages();
    }

    /// Open a listed conversation, replacing the local log with the service's.
    ///
    /// On failure the previous state is left untouched.
    pub async fn open(&self, id: &ChatId) -> Result<()> {
        let listed = self.registry.lock().contains(id);
        if !listed {
            let err = Error::Load(parley_api::Error::NotFound {
                message: format!("conversation {} is not in history", id),
            });
            self.report(err.kind(), err.to_string());
            return Err(err);
        }

        let token = self.token()?;
        let messages = match self.gateway.messages(&token, id).await {
            Ok(messages) => messages,
            Err(e) => {
                self.handle_api_failure(&e);
                let err = Error::Load(e);
                self.report(err.kind(), err.to_string());
                return Err(err);
            }
        };

        let opened = {
            let mut state = self.state.lock();
            let mut registry = self.registry.lock();
            // Re-read: the entry may have been renamed or deleted while loading.
            match registry.title_of(id) {
                Some(title) => {
                    // Read under the state lock so a send completing now either
                    // sees this state or has already left `in_flight`.
                    let pending = self.in_flight.lock().contains(id);
                    *state = ConversationState::saved(id.clone(), title, messages);
                    state.pending_send = pending;
                    registry.mark_active(Some(id));
                    true
                }
                None => false,
            }
        };
        if !opened {
            let err = Error::Load(parley_api::Error::NotFound {
                message: format!("conversation {} was deleted", id),
            });
            self.report(err.kind(), err.to_string());
            return Err(err);
        }

        tracing::debug!("opened conversation {}", id);
        self.notify_registry();
        self.notify_messages();
        Ok(())
    }

    /// Send a message from the open conversation.
    ///
    /// The user entry is appended before the request and never rolled back;
    /// a failure appends a `system_error` entry instead. Either way exactly one
    /// result entry follows, and `pending_send` is cleared before observers
    /// are notified.
    pub async fn send(&self, content: &str, attachments: Vec<Attachment>) -> Result<SendOutcome> {
        let content = content.trim();
        if content.is_empty() && attachments.is_empty() {
            return Ok(SendOutcome::Skipped);
        }

        let token = self.token()?;

        let prepared = {
            let mut state = self.state.lock();
            let mut in_flight = self.in_flight.lock();
            let busy = state.pending_send || state.id().is_some_and(|id| in_flight.contains(id));
            if busy {
                None
            } else {
                state
                    .messages
                    .push(Message::user(echo_text(content, &attachments)));
                state.pending_send = true;
                if let Some(id) = state.id() {
                    in_flight.insert(id.clone());
                }
                let target = state.id().cloned();
                let request = SendRequest {
                    message: content.to_string(),
                    chat_id: target.clone(),
                    attachments,
                };
                Some((state.key, target, request))
            }
        };

        let Some((key, target, request)) = prepared else {
            self.report(ErrorKind::Busy, Error::Busy.to_string());
            return Err(Error::Busy);
        };

        self.notify_messages();

        let result = self.gateway.send(&token, request).await;
        Ok(self.apply_send_result(key, target, result))
    }

    /// Rename a listed conversation once the service confirms it.
    ///
    /// Returns `Ok(false)` without a request when the title is blank or
    /// unchanged. On failure nothing local changes and observers are told to
    /// redraw the previous title.
    pub async fn rename(&self, id: &ChatId, new_title: &str) -> Result<bool> {
        let new_title = new_title.trim();
        let current = self.registry.lock().title_of(id);
        let Some(current) = current else {
            let err = Error::Rename(parley_api::Error::NotFound {
                message: format!("conversation {} is not in history", id),
            });
            self.report(err.kind(), err.to_string());
            return Err(err);
        };
        if new_title.is_empty() || new_title == current {
            return Ok(false);
        }

        let token = self.token()?;
        if let Err(e) = self.gateway.rename(&token, id, new_title).await {
            self.handle_api_failure(&e);
            let err = Error::Rename(e);
            self.report(err.kind(), err.to_string());
            // Redraw with the untouched title.
            self.notify_registry();
            return Err(err);
        }

        let title_changed = {
            let mut state = self.state.lock();
            self.registry.lock().rename(id, new_title);
            if state.id() == Some(id) {
                state.title = new_title.to_string();
                true
            } else {
                false
            }
        };

        tracing::debug!("renamed conversation {}", id);
        self.notify_registry();
        if title_changed {
            self.notify_messages();
        }
        Ok(true)
    }

    /// Rename the open conversation. Unsaved conversations have nothing to rename.
    pub async fn rename_current(&self, new_title: &str) -> Result<bool> {
        let id = self.state.lock().id().cloned();
        match id {
            Some(id) => self.rename(&id, new_title).await,
            None => Ok(false),
        }
    }

    /// Delete a conversation once the service confirms it.
    ///
    /// Deleting the open conversation resets to a new one.
    pub async fn delete(&self, id: &ChatId) -> Result<()> {
        let token = self.token()?;
        if let Err(e) = self.gateway.delete(&token, id).await {
            self.handle_api_failure(&e);
            let err = Error::Delete(e);
            self.report(err.kind(), err.to_string());
            return Err(err);
        }

        let was_open = {
            let state = self.state.lock();
            self.registry.lock().remove(id);
            state.id() == Some(id)
        };

        tracing::debug!("deleted conversation {}", id);
        if was_open {
            self.start_new();
        } else {
            self.notify_registry();
        }
        Ok(())
    }

    // --- internals ---

    fn apply_send_result(
        &self,
        key: Uuid,
        target: Option<ChatId>,
        result: parley_api::Result<SendResponse>,
    ) -> SendOutcome {
        let auth_failure = matches!(&result, Err(e) if e.is_auth());
        let mut registry_changed = false;
        let mut messages_changed = false;

        let outcome = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let mut registry = self.registry.lock();
            if let Some(id) = &target {
                self.in_flight.lock().remove(id);
            }
            let owns = state.key == key || (target.is_some() && state.id() == target.as_ref());

            match result {
                Ok(response) if owns => {
                    let generated = generated_title(&response);
                    match &state.lifecycle {
                        Lifecycle::Unsaved => {
                            let title = generated.unwrap_or(PLACEHOLDER_TITLE).to_string();
                            state.lifecycle = Lifecycle::Saved(response.chat_id.clone());
                            state.title = title.clone();
                            registry.add_front(ConversationSummary::new(
                                response.chat_id.clone(),
                                title,
                            ));
                            registry.mark_active(Some(&response.chat_id));
                            registry_changed = true;
                            tracing::debug!("conversation saved as {}", response.chat_id);
                        }
                        Lifecycle::Saved(id) => {
                            if let Some(title) = generated.filter(|_| state.has_placeholder_title())
                            {
                                let id = id.clone();
                                state.title = title.to_string();
                                registry.rename(&id, title);
                                registry_changed = true;
                            }
                        }
                    }
                    state.messages.push(Message::assistant(response.response));
                    state.pending_send = false;
                    messages_changed = true;
                    SendOutcome::Delivered {
                        chat_id: response.chat_id,
                    }
                }
                Ok(response) => {
                    registry_changed = apply_detached_reply(&mut registry, target.as_ref(), &response);
                    SendOutcome::Detached
                }
                Err(e) if owns => {
                    tracing::warn!("send failed: {}", e);
                    state.messages.push(Message::system_error(send_failure_text(&e)));
                    state.pending_send = false;
                    messages_changed = true;
                    SendOutcome::Failed { kind: e.kind() }
                }
                Err(e) => {
                    tracing::warn!("send for a conversation no longer open failed: {}", e);
                    SendOutcome::Detached
                }
            }
        };

        if auth_failure {
            self.session.clear();
            self.signal_unauthenticated();
        }
        if registry_changed {
            self.notify_registry();
        }
        if messages_changed {
            self.notify_messages();
        }
        outcome
    }

    fn token(&self) -> Result<String> {
        match self.session.get() {
            Some(token) => Ok(token),
            None => {
                self.signal_unauthenticated();
                Err(Error::Unauthenticated)
            }
        }
    }

    /// Credential rejected: drop it and tell the view to leave.
    fn handle_api_failure(&self, error: &parley_api::Error) {
        if error.is_auth() {
            self.session.clear();
            self.signal_unauthenticated();
        }
    }

    fn signal_unauthenticated(&self) {
        tracing::warn!("no valid credential; signalling sign-in");
        let _ = self.event_tx.send(ViewEvent::Unauthenticated);
    }

    fn report(&self, kind: ErrorKind, message: String) {
        tracing::warn!("{}: {}", kind.as_str(), message);
        let _ = self.event_tx.send(ViewEvent::Error { kind, message });
    }

    fn notify_registry(&self) {
        let event = {
            let registry = self.registry.lock();
            ViewEvent::RegistryChanged {
                summaries: registry.summaries().to_vec(),
                active_id: registry.active_id().cloned(),
            }
        };
        let _ = self.event_tx.send(event);
    }

    fn notify_messages(&self) {
        let event = {
            let state = self.state.lock();
            ViewEvent::MessagesChanged {
                conversation_id: state.id().cloned(),
                title: state.title.clone(),
                messages: state.messages.clone(),
                pending_send: state.pending_send,
            }
        };
        let _ = self.event_tx.send(event);
    }
}

/// Reply for a conversation that is no longer open: only history is updated.
///
/// A reply for a conversation deleted meanwhile is dropped.
fn apply_detached_reply(
    registry: &mut Registry,
    target: Option<&ChatId>,
    response: &SendResponse,
) -> bool {
    let generated = generated_title(response);
    match target {
        None => {
            // The service created the conversation even though it was left.
            let title = generated.unwrap_or(PLACEHOLDER_TITLE);
            registry.add_front(ConversationSummary::new(response.chat_id.clone(), title))
        }
        Some(id) if !registry.contains(id) => {
            tracing::debug!("dropping reply for deleted conversation {}", id);
            false
        }
        Some(id) => match generated {
            Some(title) if registry.title_of(id).as_deref() == Some(PLACEHOLDER_TITLE) => {
                registry.rename(id, title)
            }
            _ => false,
        },
    }
}

fn generated_title(response: &SendResponse) -> Option<&str> {
    response
        .chat_title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn echo_text(content: &str, attachments: &[Attachment]) -> String {
    if attachments.is_empty() {
        return content.to_string();
    }
    let names = attachments
        .iter()
        .map(|a| a.file_name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    if content.is_empty() {
        format!("[attached: {}]", names)
    } else {
        format!("{}\n[attached: {}]", content, names)
    }
}

fn send_failure_text(error: &parley_api::Error) -> String {
    match error {
        parley_api::Error::Network(_) => NETWORK_FAILURE_TEXT.to_string(),
        other => format!("Error: {}", other.message()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::sync::Notify;

    type ApiResult<T> = parley_api::Result<T>;

    /// Scripted gateway that records every call.
    #[derive(Default)]
    struct MockGateway {
        history: Mutex<VecDeque<ApiResult<Vec<ConversationSummary>>>>,
        messages: Mutex<VecDeque<ApiResult<Vec<Message>>>>,
        sends: Mutex<VecDeque<ApiResult<SendResponse>>>,
        renames: Mutex<VecDeque<ApiResult<()>>>,
        deletes: Mutex<VecDeque<ApiResult<()>>>,
        calls: Mutex<Vec<String>>,
        send_requests: Mutex<Vec<SendRequest>>,
        /// When set, `send` waits for a permit before answering
        send_gate: Option<Arc<Notify>>,
    }

    impl MockGateway {
        fn gated(gate: Arc<Notify>) -> Self {
            Self {
                send_gate: Some(gate),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        fn push_history(&self, r: ApiResult<Vec<ConversationSummary>>) {
            self.history.lock().push_back(r);
        }

        fn push_messages(&self, r: ApiResult<Vec<Message>>) {
            self.messages.lock().push_back(r);
        }

        fn push_send(&self, r: ApiResult<SendResponse>) {
            self.sends.lock().push_back(r);
        }

        fn push_rename(&self, r: ApiResult<()>) {
            self.renames.lock().push_back(r);
        }

        fn push_delete(&self, r: ApiResult<()>) {
            self.deletes.lock().push_back(r);
        }
    }

    fn exhausted<T>(what: &str) -> ApiResult<T> {
        Err(parley_api::Error::Server {
            status: 500,
            message: format!("no scripted {} response", what),
        })
    }

    #[async_trait]
    impl Gateway for MockGateway {
        async fn history(&self, _token: &str) -> ApiResult<Vec<ConversationSummary>> {
            self.calls.lock().push("history".into());
            let next = self.history.lock().pop_front();
            next.unwrap_or_else(|| exhausted("history"))
        }

        async fn messages(&self, _token: &str, id: &ChatId) -> ApiResult<Vec<Message>> {
            self.calls.lock().push(format!("messages {}", id));
            let next = self.messages.lock().pop_front();
            next.unwrap_or_else(|| exhausted("messages"))
        }

        async fn send(&self, _token: &str, request: SendRequest) -> ApiResult<SendResponse> {
            self.calls.lock().push("send".into());
            self.send_requests.lock().push(request);
            if let Some(gate) = &self.send_gate {
                gate.notified().await;
            }
            let next = self.sends.lock().pop_front();
            next.unwrap_or_else(|| exhausted("send"))
        }

        async fn rename(&self, _token: &str, id: &ChatId, title: &str) -> ApiResult<()> {
            self.calls.lock().push(format!("rename {} {}", id, title));
            let next = self.renames.lock().pop_front();
            next.unwrap_or_else(|| exhausted("rename"))
        }

        async fn delete(&self, _token: &str, id: &ChatId) -> ApiResult<()> {
            self.calls.lock().push(format!("delete {}", id));
            let next = self.deletes.lock().pop_front();
            next.unwrap_or_else(|| exhausted("delete"))
        }
    }

    fn reply(chat_id: &str, title: Option<&str>, response: &str) -> ApiResult<SendResponse> {
        Ok(SendResponse {
            chat_id: ChatId::new(chat_id),
            chat_title: title.map(str::to_string),
            response: response.to_string(),
        })
    }

    fn server_error() -> parley_api::Error {
        parley_api::Error::from_status(500, "model unavailable")
    }

    fn setup() -> (Arc<MockGateway>, ChatController) {
        setup_with(MockGateway::default())
    }

    fn setup_with(gateway: MockGateway) -> (Arc<MockGateway>, ChatController) {
        let gateway = Arc::new(gateway);
        let controller = ChatController::new(gateway.clone(), SessionStore::with_token("tok"));
        (gateway, controller)
    }

    /// Controller with history [c2 "Second", c1 "First"] loaded and c1 open.
    async fn setup_with_open_c1(gateway: MockGateway) -> (Arc<MockGateway>, ChatController) {
        let (gateway, controller) = setup_with(gateway);
        gateway.push_history(Ok(vec![
            ConversationSummary::new("c2", "Second"),
            ConversationSummary::new("c1", "First"),
        ]));
        controller.load_history().await.unwrap();
        gateway.push_messages(Ok(vec![Message::user("earlier"), Message::assistant("reply")]));
        controller.open(&ChatId::new("c1")).await.unwrap();
        (gateway, controller)
    }

    fn drain(rx: &mut broadcast::Receiver<ViewEvent>) -> Vec<ViewEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    async fn wait_for_calls(gateway: &MockGateway, count: usize) {
        for _ in 0..1000 {
            if gateway.calls().len() >= count {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("gateway saw {:?}, expected {} call(s)", gateway.calls(), count);
    }

    // ===== send =====

    #[tokio::test]
    async fn test_send_empty_is_noop() {
        let (gateway, controller) = setup();
        let outcome = controller.send("   ", vec![]).await.unwrap();

        assert_eq!(outcome, SendOutcome::Skipped);
        assert!(gateway.calls().is_empty());
        assert!(controller.state().messages.is_empty());
    }

    #[tokio::test]
    async fn test_first_send_saves_conversation() {
        let (gateway, controller) = setup();
        gateway.push_history(Ok(vec![]));
        controller.initialize().await.unwrap();
        gateway.push_send(reply("c1", Some("Greeting"), "hi there"));

        let outcome = controller.send("hello", vec![]).await.unwrap();

        assert_eq!(
            outcome,
            SendOutcome::Delivered {
                chat_id: ChatId::new("c1")
            }
        );
        assert_eq!(
            controller.summaries(),
            vec![ConversationSummary::new("c1", "Greeting")]
        );
        let state = controller.state();
        assert_eq!(state.id(), Some(&ChatId::new("c1")));
        assert_eq!(state.title, "Greeting");
        assert_eq!(
            state.messages,
            vec![Message::user("hello"), Message::assistant("hi there")]
        );
        assert!(!state.pending_send);
        assert_eq!(controller.active_id(), Some(ChatId::new("c1")));
        assert!(gateway.send_requests.lock()[0].chat_id.is_none());
    }

    #[tokio::test]
    async fn test_first_send_without_generated_title_keeps_placeholder() {
        let (gateway, controller) = setup();
        gateway.push_send(reply("9", None, "ok"));

        controller.send("hi", vec![]).await.unwrap();

        assert_eq!(
            controller.summaries(),
            vec![ConversationSummary::new("9", "New Chat")]
        );
        assert!(controller.state().has_placeholder_title());
    }

    #[tokio::test]
    async fn test_send_failure_appends_system_error() {
        let (gateway, controller) = setup();
        gateway.push_send(Err(server_error()));

        let outcome = controller.send("hello", vec![]).await.unwrap();

        assert_eq!(
            outcome,
            SendOutcome::Failed {
                kind: ErrorKind::Server
            }
        );
        let state = controller.state();
        assert_eq!(state.id(), None);
        assert!(!state.pending_send);
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[0], Message::user("hello"));
        assert_eq!(
            state.messages[1],
            Message::system_error("Error: model unavailable")
        );
        assert!(controller.summaries().is_empty());
    }

    #[tokio::test]
    async fn test_every_send_appends_exactly_two_entries() {
        let (gateway, controller) = setup_with_open_c1(MockGateway::default()).await;
        gateway.push_send(reply("c1", None, "one"));
        gateway.push_send(Err(parley_api::Error::from_status(400, "too long")));
        gateway.push_send(reply("c1", None, "three"));

        for text in ["a", "b", "c"] {
            let before = controller.state().messages.len();
            controller.send(text, vec![]).await.unwrap();
            let state = controller.state();
            assert_eq!(state.messages.len(), before + 2);
            assert_eq!(state.messages[before], Message::user(text));
            assert!(!state.pending_send);
        }
    }

    #[tokio::test]
    async fn test_send_on_saved_conversation_carries_id() {
        let (gateway, controller) = setup_with_open_c1(MockGateway::default()).await;
        gateway.push_send(reply("c1", Some("Ignored"), "sure"));

        controller.send("more", vec![]).await.unwrap();

        assert_eq!(
            gateway.send_requests.lock()[0].chat_id,
            Some(ChatId::new("c1"))
        );
        // Title was not the placeholder, so the generated one is ignored.
        assert_eq!(controller.state().title, "First");
        assert_eq!(
            controller.summaries()[1],
            ConversationSummary::new("c1", "First")
        );
    }

    #[tokio::test]
    async fn test_late_generated_title_replaces_placeholder() {
        let (gateway, controller) = setup();
        gateway.push_send(reply("c1", None, "first"));
        gateway.push_send(reply("c1", Some("Trip planning"), "second"));

        controller.send("plan a trip", vec![]).await.unwrap();
        assert!(controller.state().has_placeholder_title());

        controller.send("to Lisbon", vec![]).await.unwrap();
        assert_eq!(controller.state().title, "Trip planning");
        assert_eq!(
            controller.summaries(),
            vec![ConversationSummary::new("c1", "Trip planning")]
        );
    }

    #[tokio::test]
    async fn test_attachment_only_send() {
        let (gateway, controller) = setup();
        gateway.push_send(reply("c1", None, "nice picture"));

        let attachment = Attachment::new("cat.png", vec![1, 2, 3]);
        controller.send("", vec![attachment]).await.unwrap();

        let state = controller.state();
        assert_eq!(state.messages[0], Message::user("[attached: cat.png]"));
        let requests = gateway.send_requests.lock();
        assert_eq!(requests[0].message, "");
        assert_eq!(requests[0].attachments.len(), 1);
    }

    #[tokio::test]
    async fn test_send_notifies_after_pending_cleared() {
        let (gateway, controller) = setup();
        let mut rx = controller.subscribe();
        gateway.push_send(reply("c1", Some("T"), "answer"));

        controller.send("question", vec![]).await.unwrap();

        let pendings: Vec<(usize, bool)> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                ViewEvent::MessagesChanged {
                    messages,
                    pending_send,
                    ..
                } => Some((messages.len(), pending_send)),
                _ => None,
            })
            .collect();
        assert_eq!(pendings, vec![(1, true), (2, false)]);
    }

    #[tokio::test]
    async fn test_send_while_pending_is_busy() {
        let gate = Arc::new(Notify::new());
        let (gateway, controller) = setup_with(MockGateway::gated(gate.clone()));
        gateway.push_send(reply("c1", None, "done"));

        let task = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.send("first", vec![]).await })
        };
        wait_for_calls(&gateway, 1).await;
        assert!(controller.state().pending_send);

        let err = controller.send("second", vec![]).await.unwrap_err();
        assert!(matches!(err, Error::Busy));
        assert_eq!(controller.state().messages.len(), 1);

        gate.notify_one();
        task.await.unwrap().unwrap();
        assert_eq!(gateway.calls(), vec!["send"]);
        assert_eq!(controller.state().messages.len(), 2);
    }

    #[tokio::test]
    async fn test_auth_failure_on_send_clears_session() {
        let (gateway, controller) = setup();
        let mut rx = controller.subscribe();
        gateway.push_send(Err(parley_api::Error::from_status(401, "expired")));

        let outcome = controller.send("hello", vec![]).await.unwrap();

        assert_eq!(outcome, SendOutcome::Failed { kind: ErrorKind::Auth });
        assert!(!controller.session().is_authenticated());
        assert_eq!(
            controller.state().messages.last().map(|m| m.role),
            Some(parley_api::Role::SystemError)
        );
        assert!(
            drain(&mut rx)
                .iter()
                .any(|e| matches!(e, ViewEvent::Unauthenticated))
        );
    }

    #[tokio::test]
    async fn test_missing_credential_blocks_calls() {
        let gateway = Arc::new(MockGateway::default());
        let controller = ChatController::new(gateway.clone(), SessionStore::new());
        let mut rx = controller.subscribe();

        let err = controller.send("hello", vec![]).await.unwrap_err();
        assert!(matches!(err, Error::Unauthenticated));
        let err = controller.load_history().await.unwrap_err();
        assert!(matches!(err, Error::Unauthenticated));

        assert!(gateway.calls().is_empty());
        assert!(controller.state().messages.is_empty());
        assert!(matches!(
            drain(&mut rx).first(),
            Some(ViewEvent::Unauthenticated)
        ));
    }

    // ===== switching while a send is in flight =====

    #[tokio::test]
    async fn test_new_chat_during_pending_send_is_untouched() {
        let gate = Arc::new(Notify::new());
        let (gateway, controller) = setup_with(MockGateway::gated(gate.clone()));
        gateway.push_send(reply("c7", Some("Background"), "late answer"));

        let task = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.send("question", vec![]).await })
        };
        wait_for_calls(&gateway, 1).await;

        controller.start_new();
        let fresh = controller.state();
        assert!(fresh.is_blank());

        gate.notify_one();
        let outcome = task.await.unwrap().unwrap();

        assert_eq!(outcome, SendOutcome::Detached);
        let state = controller.state();
        assert!(state.messages.is_empty());
        assert!(!state.pending_send);
        assert_eq!(state.id(), None);
        // The service created it, so history shows it.
        assert_eq!(
            controller.summaries(),
            vec![ConversationSummary::new("c7", "Background")]
        );
        assert_eq!(controller.active_id(), None);
    }

    #[tokio::test]
    async fn test_background_reply_renames_history_entry() {
        let gate = Arc::new(Notify::new());
        let (gateway, controller) = setup_with(MockGateway::gated(gate.clone()));
        gateway.push_history(Ok(vec![
            ConversationSummary::new("c2", "Other"),
            ConversationSummary::new("c1", "New Chat"),
        ]));
        controller.load_history().await.unwrap();
        gateway.push_messages(Ok(vec![]));
        controller.open(&ChatId::new("c1")).await.unwrap();
        gateway.push_send(reply("c1", Some("Named later"), "answer"));
        gateway.push_messages(Ok(vec![Message::user("x")]));

        let task = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.send("hello", vec![]).await })
        };
        wait_for_calls(&gateway, 3).await;

        controller.open(&ChatId::new("c2")).await.unwrap();
        assert!(!controller.state().pending_send);

        gate.notify_one();
        assert_eq!(task.await.unwrap().unwrap(), SendOutcome::Detached);

        let state = controller.state();
        assert_eq!(state.id(), Some(&ChatId::new("c2")));
        assert_eq!(state.messages, vec![Message::user("x")]);
        assert_eq!(
            controller.summaries()[1],
            ConversationSummary::new("c1", "Named later")
        );
    }

    #[tokio::test]
    async fn test_reply_for_deleted_conversation_is_discarded() {
        let gate = Arc::new(Notify::new());
        let (gateway, controller) = setup_with_open_c1(MockGateway::gated(gate.clone())).await;
        gateway.push_send(reply("c1", Some("Too late"), "answer"));
        gateway.push_delete(Ok(()));

        let task = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.send("hello", vec![]).await })
        };
        wait_for_calls(&gateway, 3).await;

        controller.delete(&ChatId::new("c1")).await.unwrap();
        assert!(controller.state().is_blank());

        gate.notify_one();
        assert_eq!(task.await.unwrap().unwrap(), SendOutcome::Detached);

        assert_eq!(
            controller.summaries(),
            vec![ConversationSummary::new("c2", "Second")]
        );
        assert!(controller.state().is_blank());
    }

    #[tokio::test]
    async fn test_reopened_conversation_blocks_second_send() {
        let gate = Arc::new(Notify::new());
        let (gateway, controller) = setup_with_open_c1(MockGateway::gated(gate.clone())).await;
        gateway.push_send(reply("c1", None, "answer"));
        gateway.push_messages(Ok(vec![Message::user("earlier"), Message::user("hello")]));

        let task = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.send("hello", vec![]).await })
        };
        wait_for_calls(&gateway, 3).await;

        controller.start_new();
        controller.open(&ChatId::new("c1")).await.unwrap();
        assert!(controller.state().pending_send);
        assert!(matches!(
            controller.send("again", vec![]).await,
            Err(Error::Busy)
        ));

        gate.notify_one();
        let outcome = task.await.unwrap().unwrap();

        assert_eq!(
            outcome,
            SendOutcome::Delivered {
                chat_id: ChatId::new("c1")
            }
        );
        let state = controller.state();
        assert!(!state.pending_send);
        assert_eq!(state.messages.last(), Some(&Message::assistant("answer")));
    }

    #[tokio::test]
    async fn test_completion_before_reopen_leaves_nothing_pending() {
        let (gateway, controller) = setup_with_open_c1(MockGateway::default()).await;
        let c1 = ChatId::new("c1");

        // A send for c1 is in flight, then the user moves to a new chat.
        let key = controller.state.lock().key;
        controller.in_flight.lock().insert(c1.clone());
        controller.start_new();

        // The send finishes before c1 is installed again.
        let outcome = controller.apply_send_result(key, Some(c1.clone()), reply("c1", None, "late"));
        assert_eq!(outcome, SendOutcome::Detached);
        assert!(!controller.in_flight.lock().contains(&c1));

        gateway.push_messages(Ok(vec![Message::user("hello"), Message::assistant("late")]));
        controller.open(&c1).await.unwrap();
        assert!(!controller.state().pending_send);

        gateway.push_send(reply("c1", None, "next"));
        let outcome = controller.send("next question", vec![]).await.unwrap();
        assert_eq!(outcome, SendOutcome::Delivered { chat_id: c1 });
    }

    // ===== open =====

    #[tokio::test]
    async fn test_open_loads_log_and_marks_active() {
        let (_gateway, controller) = setup_with_open_c1(MockGateway::default()).await;

        let state = controller.state();
        assert_eq!(state.id(), Some(&ChatId::new("c1")));
        assert_eq!(state.title, "First");
        assert_eq!(
            state.messages,
            vec![Message::user("earlier"), Message::assistant("reply")]
        );
        assert_eq!(controller.active_id(), Some(ChatId::new("c1")));
    }

    #[tokio::test]
    async fn test_open_unknown_id_is_load_error() {
        let (gateway, controller) = setup_with_open_c1(MockGateway::default()).await;
        let before = controller.state();
        let calls_before = gateway.calls().len();
        let mut rx = controller.subscribe();

        let err = controller.open(&ChatId::new("c9")).await.unwrap_err();

        assert!(matches!(err, Error::Load(_)));
        assert_eq!(gateway.calls().len(), calls_before);
        let after = controller.state();
        assert_eq!(after.id(), before.id());
        assert_eq!(after.messages, before.messages);
        assert_eq!(controller.active_id(), Some(ChatId::new("c1")));
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [ViewEvent::Error {
                kind: ErrorKind::Load,
                ..
            }]
        ));
    }

    #[tokio::test]
    async fn test_open_gateway_failure_keeps_state() {
        let (gateway, controller) = setup_with_open_c1(MockGateway::default()).await;
        gateway.push_messages(Err(server_error()));

        let err = controller.open(&ChatId::new("c2")).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Load);
        assert_eq!(controller.state().id(), Some(&ChatId::new("c1")));
        assert_eq!(controller.active_id(), Some(ChatId::new("c1")));
    }

    // ===== rename =====

    #[tokio::test]
    async fn test_rename_commits_after_success() {
        let (gateway, controller) = setup_with_open_c1(MockGateway::default()).await;
        gateway.push_rename(Ok(()));

        assert!(controller.rename_current("  Renamed ").await.unwrap());

        assert!(gateway.calls().contains(&"rename c1 Renamed".to_string()));
        assert_eq!(controller.state().title, "Renamed");
        assert_eq!(
            controller.summaries()[1],
            ConversationSummary::new("c1", "Renamed")
        );
    }

    #[tokio::test]
    async fn test_rename_failure_changes_nothing() {
        let (gateway, controller) = setup_with_open_c1(MockGateway::default()).await;
        gateway.push_rename(Err(server_error()));
        let mut rx = controller.subscribe();

        let err = controller.rename(&ChatId::new("c1"), "X").await.unwrap_err();

        assert!(matches!(err, Error::Rename(_)));
        assert_eq!(controller.state().title, "First");
        assert_eq!(
            controller.summaries()[1],
            ConversationSummary::new("c1", "First")
        );
        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(e, ViewEvent::Error { .. })));
        assert!(
            events
                .iter()
                .any(|e| matches!(e, ViewEvent::RegistryChanged { .. }))
        );
    }

    #[tokio::test]
    async fn test_rename_blank_or_same_skips_request() {
        let (gateway, controller) = setup_with_open_c1(MockGateway::default()).await;
        let calls_before = gateway.calls().len();

        assert!(!controller.rename(&ChatId::new("c1"), "   ").await.unwrap());
        assert!(!controller.rename(&ChatId::new("c1"), "First").await.unwrap());

        assert_eq!(gateway.calls().len(), calls_before);
    }

    #[tokio::test]
    async fn test_rename_other_conversation_leaves_open_title() {
        let (gateway, controller) = setup_with_open_c1(MockGateway::default()).await;
        gateway.push_rename(Ok(()));

        controller.rename(&ChatId::new("c2"), "Renamed").await.unwrap();

        assert_eq!(controller.state().title, "First");
        assert_eq!(
            controller.summaries()[0],
            ConversationSummary::new("c2", "Renamed")
        );
    }

    // ===== delete =====

    #[tokio::test]
    async fn test_delete_active_resets_controller() {
        let (gateway, controller) = setup_with_open_c1(MockGateway::default()).await;
        gateway.push_delete(Ok(()));

        controller.delete(&ChatId::new("c1")).await.unwrap();

        let state = controller.state();
        assert_eq!(state.id(), None);
        assert_eq!(state.title, "New Chat");
        assert!(state.messages.is_empty());
        assert_eq!(
            controller.summaries(),
            vec![ConversationSummary::new("c2", "Second")]
        );
        assert_eq!(controller.active_id(), None);
    }

    #[tokio::test]
    async fn test_delete_other_keeps_open_conversation() {
        let (gateway, controller) = setup_with_open_c1(MockGateway::default()).await;
        gateway.push_delete(Ok(()));

        controller.delete(&ChatId::new("c2")).await.unwrap();

        assert_eq!(controller.state().id(), Some(&ChatId::new("c1")));
        assert_eq!(controller.summaries().len(), 1);
        assert_eq!(controller.active_id(), Some(ChatId::new("c1")));
    }

    #[tokio::test]
    async fn test_delete_failure_keeps_entry() {
        let (gateway, controller) = setup_with_open_c1(MockGateway::default()).await;
        gateway.push_delete(Err(parley_api::Error::from_status(404, "gone")));

        let err = controller.delete(&ChatId::new("c1")).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(controller.summaries().len(), 2);
        assert_eq!(controller.state().id(), Some(&ChatId::new("c1")));
    }

    // ===== auth failures =====

    fn auth_error(status: u16) -> parley_api::Error {
        parley_api::Error::from_status(status, "token expired")
    }

    fn saw_unauthenticated(rx: &mut broadcast::Receiver<ViewEvent>) -> bool {
        drain(rx)
            .iter()
            .any(|e| matches!(e, ViewEvent::Unauthenticated))
    }

    #[tokio::test]
    async fn test_auth_failure_on_open_signs_out() {
        for status in [401, 403] {
            let (gateway, controller) = setup_with_open_c1(MockGateway::default()).await;
            gateway.push_messages(Err(auth_error(status)));
            let mut rx = controller.subscribe();

            let err = controller.open(&ChatId::new("c2")).await.unwrap_err();

            assert_eq!(err.kind(), ErrorKind::Load);
            assert!(!controller.session().is_authenticated());
            assert!(saw_unauthenticated(&mut rx), "status {}", status);
            assert_eq!(controller.state().id(), Some(&ChatId::new("c1")));
            assert_eq!(controller.active_id(), Some(ChatId::new("c1")));
        }
    }

    #[tokio::test]
    async fn test_auth_failure_on_rename_signs_out() {
        for status in [401, 403] {
            let (gateway, controller) = setup_with_open_c1(MockGateway::default()).await;
            gateway.push_rename(Err(auth_error(status)));
            let mut rx = controller.subscribe();

            let err = controller.rename_current("Renamed").await.unwrap_err();

            assert_eq!(err.kind(), ErrorKind::Auth);
            assert!(!controller.session().is_authenticated());
            assert!(saw_unauthenticated(&mut rx), "status {}", status);
            assert_eq!(controller.state().title, "First");
            assert_eq!(
                controller.summaries()[1],
                ConversationSummary::new("c1", "First")
            );
        }
    }

    #[tokio::test]
    async fn test_auth_failure_on_delete_signs_out() {
        for status in [401, 403] {
            let (gateway, controller) = setup_with_open_c1(MockGateway::default()).await;
            gateway.push_delete(Err(auth_error(status)));
            let mut rx = controller.subscribe();

            let err = controller.delete(&ChatId::new("c1")).await.unwrap_err();

            assert_eq!(err.kind(), ErrorKind::Auth);
            assert!(!controller.session().is_authenticated());
            assert!(saw_unauthenticated(&mut rx), "status {}", status);
            assert_eq!(controller.summaries().len(), 2);
            assert_eq!(controller.state().id(), Some(&ChatId::new("c1")));
        }
    }

    #[tokio::test]
    async fn test_auth_failure_on_history_signs_out() {
        for status in [401, 403] {
            let (gateway, controller) = setup_with_open_c1(MockGateway::default()).await;
            gateway.push_history(Err(auth_error(status)));
            let mut rx = controller.subscribe();

            let err = controller.load_history().await.unwrap_err();

            assert_eq!(err.kind(), ErrorKind::Auth);
            assert!(!controller.session().is_authenticated());
            assert!(saw_unauthenticated(&mut rx), "status {}", status);
            assert_eq!(controller.summaries().len(), 2);
            assert_eq!(controller.state().id(), Some(&ChatId::new("c1")));

            // Later calls stop before the gateway.
            let calls_before = gateway.calls().len();
            assert!(matches!(
                controller.load_history().await,
                Err(Error::Unauthenticated)
            ));
            assert_eq!(gateway.calls().len(), calls_before);
        }
    }

    // ===== history =====

    #[tokio::test]
    async fn test_initialize_opens_newest() {
        let (gateway, controller) = setup();
        gateway.push_history(Ok(vec![
            ConversationSummary::new("5", "Newest"),
            ConversationSummary::new("3", "Older"),
        ]));
        gateway.push_messages(Ok(vec![Message::assistant("hello again")]));

        controller.initialize().await.unwrap();

        assert_eq!(gateway.calls(), vec!["history", "messages 5"]);
        assert_eq!(controller.state().title, "Newest");
        assert_eq!(controller.active_id(), Some(ChatId::new("5")));
    }

    #[tokio::test]
    async fn test_initialize_with_empty_history_starts_new() {
        let (gateway, controller) = setup();
        gateway.push_history(Ok(vec![]));

        controller.initialize().await.unwrap();

        assert!(controller.state().is_blank());
        assert!(controller.summaries().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_drops_vanished_open_conversation() {
        let (gateway, controller) = setup_with_open_c1(MockGateway::default()).await;
        gateway.push_history(Ok(vec![ConversationSummary::new("c2", "Second")]));

        controller.load_history().await.unwrap();

        assert!(controller.state().is_blank());
        assert_eq!(controller.active_id(), None);
    }

    #[tokio::test]
    async fn test_history_failure_keeps_registry() {
        let (gateway, controller) = setup_with_open_c1(MockGateway::default()).await;
        gateway.push_history(Err(server_error()));

        let err = controller.load_history().await.unwrap_err();

        assert!(matches!(err, Error::History(_)));
        assert_eq!(controller.summaries().len(), 2);
    }

    #[test]
    fn test_echo_text() {
        let files = vec![Attachment::new("a.txt", vec![]), Attachment::new("b.png", vec![])];
        assert_eq!(echo_text("hi", &[]), "hi");
        assert_eq!(echo_text("", &files), "[attached: a.txt, b.png]");
        assert_eq!(echo_text("see", &files[..1]), "see\n[attached: a.txt]");
    }
}
