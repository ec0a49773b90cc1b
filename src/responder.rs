//! Keyword-triggered follow-up replies

use crate::channel::{InboundMessage, MessagingClient};
use crate::config::Config;
use crate::contacts::ContactStore;
use crate::error::Result;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info};

/// What the responder did with an inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    Replied,
    FromSelf,
    UnknownSender,
    AlreadyResponded,
    NotInterested,
    Failed(String),
}

/// Sends the main message once to each contact that shows interest
pub struct Responder {
    keywords: Vec<String>,
    main_message: String,
    presence_delay: Duration,
}

impl Responder {
    pub fn new(config: &Config) -> Self {
        Self {
            keywords: config
                .interest_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .collect(),
            main_message: config.main_message.clone(),
            presence_delay: config.presence_delay,
        }
    }

    /// Case-insensitive substring match against the keyword set.
    ///
    /// Short keywords match inside longer words ("ok" in "book").
    pub fn is_interested(&self, body: &str) -> bool {
        let text = body.to_lowercase();
        self.keywords.iter().any(|k| text.contains(k.as_str()))
    }

    pub async fn handle_inbound<C: MessagingClient + ?Sized>(
        &self,
        store: &mut ContactStore,
        client: &C,
        msg: &InboundMessage,
    ) -> ReplyOutcome {
        if msg.from_me {
            return ReplyOutcome::FromSelf;
        }

        let number = match store.find_by_address(&msg.from) {
            Some(contact) if contact.responded => return ReplyOutcome::AlreadyResponded,
            Some(contact) => contact.number.clone(),
            None => {
                debug!("Ignoring message from unknown sender {}", msg.from);
                return ReplyOutcome::UnknownSender;
            }
        };

        if !self.is_interested(&msg.body) {
            return ReplyOutcome::NotInterested;
        }

        if let Err(e) = client.send_presence_available().await {
            debug!("Presence signal failed: {}", e);
        }
        sleep(self.presence_delay).await;

        if let Err(e) = client.send_message(&msg.from, &self.main_message).await {
            error!("Error sending reply to {}: {}", msg.from, e);
            return ReplyOutcome::Failed(e.to_string());
        }

        if let Err(e) = store.mark_responded(&number) {
            error!("Failed to persist responded flag for {}: {}", number, e);
        }

        info!("Sent main message to {}", msg.from);
        ReplyOutcome::Replied
    }

    /// Run messages received while offline through the responder.
    ///
    /// Returns the number of replies sent.
    pub async fn drain_unread<C: MessagingClient + ?Sized>(
        &self,
        store: &mut ContactStore,
        client: &C,
    ) -> Result<usize> {
        let conversations = client.unread_conversations().await?;
        let mut replied = 0;

        for conversation in &conversations {
            debug!(
                "Draining {} unread from {}",
                conversation.messages.len(),
                conversation.chat_id
            );
            for msg in conversation.messages.iter().filter(|m| !m.from_me) {
                if self.handle_inbound(store, client, msg).await == ReplyOutcome::Replied {
                    replied += 1;
                }
            }
        }

        if replied > 0 {
            info!("Replied to {} contacts from unread messages", replied);
        }
        Ok(replied)
    }
}
