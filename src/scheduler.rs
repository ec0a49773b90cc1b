//! Campaign send scheduling
//!
//! Plans a capped, staggered batch of first-contact messages and delivers them
//! one at a time. The cap is checked when a send fires, not when it is planned.

use crate::channel::MessagingClient;
use crate::config::Config;
use crate::contacts::{ContactRecord, ContactStore};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// Per-process send counter and cap latch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendSession {
    message_count: usize,
    cap_reached: bool,
    max_messages: usize,
}

impl SendSession {
    pub fn new(max_messages: usize) -> Self {
        Self {
            message_count: 0,
            cap_reached: false,
            max_messages,
        }
    }

    pub fn message_count(&self) -> usize {
        self.message_count
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    /// Latched once the cap is hit; never cleared
    pub fn cap_reached(&self) -> bool {
        self.cap_reached
    }

    pub fn can_send(&self) -> bool {
        !self.cap_reached && self.message_count < self.max_messages
    }

    fn latch(&mut self) {
        self.cap_reached = true;
    }

    /// Count a delivered message, latching when the cap is reached
    fn record_send(&mut self) {
        self.message_count += 1;
        if self.message_count >= self.max_messages {
            self.latch();
        }
    }
}

/// A send planned relative to the moment the batch was scheduled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedSend {
    pub number: String,
    pub delay: Duration,
}

/// What happened when a scheduled send fired
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    CapReached,
    InvalidTarget,
    AlreadySent,
    UnknownContact,
    Failed(String),
}

/// Pick up to `max` unsent contacts in ledger order and stagger them.
///
/// The first send is immediate; send `i` fires at `i * base` plus a jitter
/// drawn uniformly from `[0, max_jitter)`.
pub fn plan_batch<R: Rng>(
    contacts: &[ContactRecord],
    max: usize,
    base: Duration,
    max_jitter: Duration,
    rng: &mut R,
) -> Vec<PlannedSend> {
    let jitter_ms = max_jitter.as_millis() as u64;

    contacts
        .iter()
        .filter(|c| !c.sent)
        .take(max)
        .enumerate()
        .map(|(i, contact)| {
            let delay = if i == 0 {
                Duration::ZERO
            } else {
                let jitter = if jitter_ms == 0 {
                    0
                } else {
                    rng.gen_range(0..jitter_ms)
                };
                base * i as u32 + Duration::from_millis(jitter)
            };
            PlannedSend {
                number: contact.number.clone(),
                delay,
            }
        })
        .collect()
}

/// Pending sends ordered by fire time
#[derive(Debug, Default)]
pub struct SendQueue {
    entries: BinaryHeap<Reverse<(Instant, u64, String)>>,
    seq: u64,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, due: Instant, number: String) {
        // Sequence keeps equal deadlines in insertion order
        self.entries.push(Reverse((due, self.seq, number)));
        self.seq += 1;
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.entries.peek().map(|Reverse((due, _, _))| *due)
    }

    /// Pop the earliest entry if it is due at `now`
    pub fn pop_due(&mut self, now: Instant) -> Option<String> {
        match self.next_due() {
            Some(due) if due <= now => self.entries.pop().map(|Reverse((_, _, number))| number),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Campaign sender: plans batches and delivers campaign messages under the cap
pub struct Scheduler {
    session: SendSession,
    base_delay: Duration,
    max_jitter: Duration,
    settle_delay: Duration,
    presence_delay: Duration,
    messages: Vec<String>,
    rng: StdRng,
}

impl Scheduler {
    pub fn new(config: &Config) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    pub fn with_rng(config: &Config, rng: StdRng) -> Self {
        Self {
            session: SendSession::new(config.max_messages),
            base_delay: config.base_delay,
            max_jitter: config.max_jitter,
            settle_delay: config.settle_delay,
            presence_delay: config.presence_delay,
            messages: config.campaign_messages.clone(),
            rng,
        }
    }

    pub fn session(&self) -> &SendSession {
        &self.session
    }

    pub fn plan_initial_batch(&mut self, contacts: &[ContactRecord]) -> Vec<PlannedSend> {
        plan_batch(
            contacts,
            self.session.max_messages(),
            self.base_delay,
            self.max_jitter,
            &mut self.rng,
        )
    }

    /// Deliver one campaign message to the contact with ledger number `number`
    pub async fn send_to_contact<C: MessagingClient + ?Sized>(
        &mut self,
        store: &mut ContactStore,
        client: &C,
        number: &str,
    ) -> SendOutcome {
        if !self.session.can_send() {
            info!("Message limit reached. No more messages will be sent.");
            self.session.latch();
            return SendOutcome::CapReached;
        }

        let chat_id = match store.get(number) {
            Some(contact) if contact.sent => {
                debug!("Skipping {}: already sent", number);
                return SendOutcome::AlreadySent;
            }
            Some(contact) => contact.chat_id(),
            None => {
                warn!("Skipping {}: not in ledger", number);
                return SendOutcome::UnknownContact;
            }
        };

        info!("Preparing message for {}", number);

        match client.is_registered_user(&chat_id).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("Invalid number: {}", number);
                return SendOutcome::InvalidTarget;
            }
            Err(e) => {
                error!("Failed to send to {}: {}", number, e);
                return SendOutcome::Failed(e.to_string());
            }
        }

        sleep(self.settle_delay).await;
        if let Err(e) = client.send_presence_available().await {
            debug!("Presence signal failed: {}", e);
        }
        sleep(self.presence_delay).await;

        let message = match self.messages.choose(&mut self.rng) {
            Some(m) => m.clone(),
            None => {
                error!("Campaign message pool is empty");
                return SendOutcome::Failed("empty message pool".to_string());
            }
        };

        if let Err(e) = client.send_message(&chat_id, &message).await {
            error!("Failed to send to {}: {}", number, e);
            return SendOutcome::Failed(e.to_string());
        }

        self.session.record_send();
        if let Err(e) = store.mark_sent(number) {
            error!("Failed to persist sent flag for {}: {}", number, e);
        }

        info!(
            "Message sent to {} ({}/{})",
            number,
            self.session.message_count(),
            self.session.max_messages()
        );

        if self.session.cap_reached() {
            info!(
                "Reached limit of {} messages. Pausing sending.",
                self.session.max_messages()
            );
        }

        SendOutcome::Sent
    }
}
