//! Campaign dispatcher
//!
//! Multiplexes client events and the scheduled-send timeline on one task.
//! Every send and reply runs to completion before the next action starts, so
//! the ledger and send counters need no locking.

use crate::channel::{ClientEvent, MessagingClient};
use crate::config::Config;
use crate::contacts::ContactStore;
use crate::error::{Error, Result};
use crate::responder::{ReplyOutcome, Responder};
use crate::scheduler::{PlannedSend, Scheduler, SendQueue};
use qrcode::render::unicode;
use qrcode::QrCode;
use rand::rngs::StdRng;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Draw a pairing payload as a terminal QR code
pub fn render_qr(payload: &str) -> Result<String> {
    let code = QrCode::new(payload.as_bytes()).map_err(|e| Error::Qr(e.to_string()))?;
    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build())
}

pub struct Campaign<C> {
    client: C,
    store: ContactStore,
    scheduler: Scheduler,
    responder: Responder,
    queue: SendQueue,
    session_dir: std::path::PathBuf,
    scheduled: bool,
}

impl<C: MessagingClient> Campaign<C> {
    pub fn new(config: &Config, store: ContactStore, client: C) -> Self {
        Self::from_parts(config, store, client, Scheduler::new(config))
    }

    /// Campaign with a fixed RNG, for reproducible plans
    pub fn with_rng(config: &Config, store: ContactStore, client: C, rng: StdRng) -> Self {
        Self::from_parts(config, store, client, Scheduler::with_rng(config, rng))
    }

    fn from_parts(config: &Config, store: ContactStore, client: C, scheduler: Scheduler) -> Self {
        Self {
            client,
            store,
            scheduler,
            responder: Responder::new(config),
            queue: SendQueue::new(),
            session_dir: config.session_dir.clone(),
            scheduled: false,
        }
    }

    pub fn store(&self) -> &ContactStore {
        &self.store
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn pending_sends(&self) -> usize {
        self.queue.len()
    }

    /// Plan the first batch and queue it relative to `now`
    pub fn schedule_initial_batch(&mut self, now: Instant) -> Vec<PlannedSend> {
        let plan = self.scheduler.plan_initial_batch(self.store.all());
        if plan.is_empty() {
            info!("All contacts processed.");
            return plan;
        }

        for planned in &plan {
            info!(
                "Scheduled {} in {}m",
                planned.number,
                planned.delay.as_secs() / 60
            );
            self.queue.schedule(now + planned.delay, planned.number.clone());
        }
        plan
    }

    /// Fire every queued send that is due
    async fn dispatch_due(&mut self) {
        while let Some(number) = self.queue.pop_due(Instant::now()) {
            if self.scheduler.session().cap_reached() {
                debug!("Dropping scheduled send to {}: cap reached", number);
                continue;
            }
            let outcome = self
                .scheduler
                .send_to_contact(&mut self.store, &self.client, &number)
                .await;
            debug!("Send to {} finished: {:?}", number, outcome);
        }

        if self.queue.is_empty() {
            info!(
                "Scheduled batch finished ({} sent this run)",
                self.scheduler.session().message_count()
            );
        }
    }

    /// React to one client event
    pub async fn handle_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Qr(qr) => {
                debug!("Pairing payload: {}", qr);
                match render_qr(&qr) {
                    Ok(code) => info!("Scan this QR code to pair the device:\n{}", code),
                    Err(e) => warn!("{}; pair with payload {}", e, qr),
                }
            }
            ClientEvent::Ready => {
                info!("Messaging client ready");
                if let Err(e) = self
                    .responder
                    .drain_unread(&mut self.store, &self.client)
                    .await
                {
                    error!("Failed to read unread conversations: {}", e);
                }
                if !self.scheduled {
                    self.scheduled = true;
                    self.schedule_initial_batch(Instant::now());
                }
            }
            ClientEvent::Message(msg) => {
                let outcome = self
                    .responder
                    .handle_inbound(&mut self.store, &self.client, &msg)
                    .await;
                if let ReplyOutcome::Failed(e) = outcome {
                    debug!("Reply to {} not sent: {}", msg.from, e);
                }
            }
            ClientEvent::AuthFailure(message) => {
                error!(
                    "Auth failed ({}). Delete {} and restart.",
                    message,
                    self.session_dir.display()
                );
            }
            ClientEvent::Disconnected(reason) => {
                warn!("Disconnected: {}", reason);
            }
        }
    }

    /// Drive the campaign until the event stream closes and no sends remain
    pub async fn run(&mut self, mut events: mpsc::Receiver<ClientEvent>) -> Result<()> {
        info!(
            "Campaign starting: {} contacts, {} already sent, per-run cap {}",
            self.store.len(),
            self.store.summary().sent,
            self.scheduler.session().max_messages()
        );

        let mut events_open = true;

        loop {
            if !events_open && self.queue.is_empty() {
                break;
            }

            let next_due = self.queue.next_due();
            let timer = async move {
                match next_due {
                    Some(due) => sleep_until(due).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                event = events.recv(), if events_open => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        warn!("Client event stream closed");
                        events_open = false;
                    }
                },
                _ = timer => self.dispatch_due().await,
            }
        }

        info!("Campaign stopped");
        Ok(())
    }
}
