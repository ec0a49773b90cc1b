//! Messaging client boundary
//!
//! The wire protocol, pairing and delivery live in an external client. This
//! module defines the surface the campaign depends on and the events the
//! client pushes back.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::info;

/// An inbound chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Channel address of the sender, e.g. `919876543210@c.us`
    pub from: String,
    pub body: String,
    #[serde(default)]
    pub from_me: bool,
}

/// A conversation with messages that arrived while offline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadConversation {
    pub chat_id: String,
    /// Oldest first
    pub messages: Vec<InboundMessage>,
}

/// Events pushed by the messaging client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Pairing code to be scanned on the phone
    Qr(String),
    Ready,
    Message(InboundMessage),
    AuthFailure(String),
    Disconnected(String),
}

/// Operations the campaign needs from the messaging client
#[async_trait]
pub trait MessagingClient {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<()>;

    async fn is_registered_user(&self, chat_id: &str) -> Result<bool>;

    /// Mark the account as online; best-effort
    async fn send_presence_available(&self) -> Result<()>;

    async fn unread_conversations(&self) -> Result<Vec<UnreadConversation>>;
}

/// A message recorded by [`DryRunClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub chat_id: String,
    pub text: String,
}

#[derive(Default)]
struct DryRunState {
    sent: Vec<SentMessage>,
    unregistered: HashSet<String>,
    failing: HashSet<String>,
    unread: Vec<UnreadConversation>,
    presence_calls: usize,
    presence_fails: bool,
}

/// In-process client that records instead of delivering.
///
/// Every target is registered unless marked otherwise. Clones share the same
/// recorded state.
#[derive(Clone, Default)]
pub struct DryRunClient {
    state: Arc<Mutex<DryRunState>>,
}

impl DryRunClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel that emits a single `Ready`, as a freshly paired client would
    pub fn events() -> mpsc::Receiver<ClientEvent> {
        let (tx, rx) = mpsc::channel(16);
        // Capacity is larger than one, so this cannot fail
        let _ = tx.try_send(ClientEvent::Ready);
        rx
    }

    pub fn mark_unregistered(&self, chat_id: &str) {
        self.lock().unregistered.insert(chat_id.to_string());
    }

    /// Make every send to `chat_id` fail
    pub fn fail_sends_to(&self, chat_id: &str) {
        self.lock().failing.insert(chat_id.to_string());
    }

    pub fn fail_presence(&self) {
        self.lock().presence_fails = true;
    }

    pub fn push_unread(&self, conversation: UnreadConversation) {
        self.lock().unread.push(conversation);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.lock().sent.clone()
    }

    pub fn sent_to(&self, chat_id: &str) -> Vec<String> {
        self.lock()
            .sent
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .map(|m| m.text.clone())
            .collect()
    }

    pub fn presence_calls(&self) -> usize {
        self.lock().presence_calls
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DryRunState> {
        // A panic while holding the lock only happens in a failing test
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl MessagingClient for DryRunClient {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<()> {
        let mut state = self.lock();
        if state.failing.contains(chat_id) {
            return Err(Error::Channel(format!("send to {} rejected", chat_id)));
        }
        info!(
            "[dry-run] -> {}: {}",
            chat_id,
            text.chars().take(50).collect::<String>()
        );
        state.sent.push(SentMessage {
            chat_id: chat_id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn is_registered_user(&self, chat_id: &str) -> Result<bool> {
        Ok(!self.lock().unregistered.contains(chat_id))
    }

    async fn send_presence_available(&self) -> Result<()> {
        let mut state = self.lock();
        state.presence_calls += 1;
        if state.presence_fails {
            return Err(Error::Channel("presence unavailable".to_string()));
        }
        Ok(())
    }

    async fn unread_conversations(&self) -> Result<Vec<UnreadConversation>> {
        Ok(std::mem::take(&mut self.lock().unread))
    }
}
