//! Bridge process client
//!
//! Spawns the external messaging bridge and speaks NDJSON over its stdio.
//! Requests go to stdin as `{"id","method","params"}`; stdout carries either
//! responses `{"id","ok","result","error"}` or events `{"event", ...}`.

use crate::channel::{ClientEvent, InboundMessage, MessagingClient, UnreadConversation};
use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Request written to the bridge
#[derive(Debug, Serialize, Deserialize)]
pub struct BridgeRequest {
    pub id: u64,
    pub method: String,
    pub params: Value,
}

/// Response read from the bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeResponse {
    pub id: u64,
    pub ok: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Unsolicited event read from the bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BridgeEvent {
    Qr {
        qr: String,
    },
    Ready,
    Message {
        from: String,
        body: String,
        #[serde(default)]
        from_me: bool,
    },
    AuthFailure {
        #[serde(default)]
        message: String,
    },
    Disconnected {
        #[serde(default)]
        reason: String,
    },
}

impl From<BridgeEvent> for ClientEvent {
    fn from(event: BridgeEvent) -> Self {
        match event {
            BridgeEvent::Qr { qr } => ClientEvent::Qr(qr),
            BridgeEvent::Ready => ClientEvent::Ready,
            BridgeEvent::Message {
                from,
                body,
                from_me,
            } => ClientEvent::Message(InboundMessage {
                from,
                body,
                from_me,
            }),
            BridgeEvent::AuthFailure { message } => ClientEvent::AuthFailure(message),
            BridgeEvent::Disconnected { reason } => ClientEvent::Disconnected(reason),
        }
    }
}

/// One line of bridge output
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BridgeLine {
    Response(BridgeResponse),
    Event(BridgeEvent),
}

impl BridgeLine {
    pub fn from_ndjson_line(line: &str) -> Result<Self> {
        serde_json::from_str(line.trim()).map_err(|e| Error::Bridge(format!("bad line: {}", e)))
    }
}

/// In-flight requests, closed for good once the reader task exits
#[derive(Default)]
struct PendingCalls {
    waiters: HashMap<u64, oneshot::Sender<BridgeResponse>>,
    closed: bool,
}

type Pending = Arc<Mutex<PendingCalls>>;

/// Messaging client backed by a bridge child process
pub struct BridgeClient {
    stdin: tokio::sync::Mutex<ChildStdin>,
    pending: Pending,
    next_id: AtomicU64,
    _child: Mutex<Child>,
}

impl BridgeClient {
    /// Start the bridge and return the client with its event stream
    pub fn spawn(config: &Config) -> Result<(Self, mpsc::Receiver<ClientEvent>)> {
        let mut child = Command::new(&config.bridge_command)
            .args(&config.bridge_args)
            .current_dir(&config.base_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Bridge(format!(
                    "failed to start {}: {}",
                    config.bridge_command.display(),
                    e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Bridge("bridge stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Bridge("bridge stdout not captured".to_string()))?;

        let pending: Pending = Arc::new(Mutex::new(PendingCalls::default()));
        let (events_tx, events_rx) = mpsc::channel(64);
        tokio::spawn(read_bridge_output(stdout, pending.clone(), events_tx));

        let client = Self {
            stdin: tokio::sync::Mutex::new(stdin),
            pending,
            next_id: AtomicU64::new(1),
            _child: Mutex::new(child),
        };
        Ok((client, events_rx))
    }

    /// Send one request and wait for its response
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = lock_pending(&self.pending);
            if pending.closed {
                return Err(Error::Bridge(format!("bridge output closed, cannot {}", method)));
            }
            pending.waiters.insert(id, tx);
        }

        let request = BridgeRequest {
            id,
            method: method.to_string(),
            params,
        };
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        let write = async {
            let mut stdin = self.stdin.lock().await;
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await?;
            Ok::<_, std::io::Error>(())
        };
        if let Err(e) = write.await {
            lock_pending(&self.pending).waiters.remove(&id);
            return Err(Error::Bridge(format!("{} write failed: {}", method, e)));
        }

        let response = rx
            .await
            .map_err(|_| Error::Bridge(format!("bridge closed before answering {}", method)))?;

        if response.ok {
            Ok(response.result.unwrap_or(Value::Null))
        } else {
            Err(Error::Channel(format!(
                "{}: {}",
                method,
                response.error.unwrap_or_else(|| "unknown error".to_string())
            )))
        }
    }
}

fn lock_pending(pending: &Pending) -> std::sync::MutexGuard<'_, PendingCalls> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

/// Route bridge output to waiting callers and the event channel
async fn read_bridge_output(
    stdout: ChildStdout,
    pending: Pending,
    events: mpsc::Sender<ClientEvent>,
) {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read bridge output: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match BridgeLine::from_ndjson_line(&line) {
            Ok(BridgeLine::Response(response)) => {
                let waiter = lock_pending(&pending).waiters.remove(&response.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => debug!("Dropping response for unknown request {}", response.id),
                }
            }
            Ok(BridgeLine::Event(event)) => {
                if events.send(event.into()).await.is_err() {
                    debug!("Event receiver dropped");
                }
            }
            Err(e) => warn!("{}", e),
        }
    }

    // Waiters see a closed channel once their senders drop
    {
        let mut pending = lock_pending(&pending);
        pending.closed = true;
        pending.waiters.clear();
    }
    let _ = events
        .send(ClientEvent::Disconnected("bridge exited".to_string()))
        .await;
}

#[async_trait]
impl MessagingClient for BridgeClient {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<()> {
        self.call("send_message", json!({ "chat_id": chat_id, "text": text }))
            .await
            .map(|_| ())
    }

    async fn is_registered_user(&self, chat_id: &str) -> Result<bool> {
        let result = self
            .call("is_registered_user", json!({ "chat_id": chat_id }))
            .await?;
        result
            .as_bool()
            .ok_or_else(|| Error::Bridge(format!("is_registered_user returned {}", result)))
    }

    async fn send_presence_available(&self) -> Result<()> {
        self.call("send_presence_available", json!({}))
            .await
            .map(|_| ())
    }

    async fn unread_conversations(&self) -> Result<Vec<UnreadConversation>> {
        let result = self.call("unread_conversations", json!({})).await?;
        Ok(serde_json::from_value(result)?)
    }
}
