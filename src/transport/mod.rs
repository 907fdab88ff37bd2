//! Messaging transports
//!
//! A transport delivers inbound chat events to the bot and carries replies back.
//!
//! - `TelegramTransport`: Bot API long polling
//! - `ConsoleTransport`: stdin/stdout REPL

mod console;
mod telegram;

pub use console::ConsoleTransport;
pub use telegram::{TelegramTransport, Update, DEFAULT_API_BASE as TELEGRAM_API_BASE};

use crate::reply::OutboundReply;
use crate::session::SessionAdapter;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Identity of a conversation on the transport
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChatId(String);

impl ChatId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub id: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundKind {
    /// Free text typed by the user
    Text(String),
    /// A selectable option was picked
    Button { callback_id: String, data: String },
    /// Stickers, photos, voice and anything else without text
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub chat_id: ChatId,
    pub sender: Sender,
    pub kind: InboundKind,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{method} rejected: {description}")]
    Api { method: String, description: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outbound side of a messaging platform
#[async_trait]
pub trait Transport: Send + Sync {
    /// Show a typing indicator in the chat
    async fn send_typing(&self, chat: &ChatId) -> Result<(), TransportError>;

    /// Send a reply. Replies with options are rendered rich when the platform can.
    async fn send_reply(&self, chat: &ChatId, reply: &OutboundReply) -> Result<(), TransportError>;

    /// Acknowledge a button press
    async fn acknowledge(&self, callback_id: &str) -> Result<(), TransportError>;
}

/// How long a chat worker waits for the next event before it exits
pub const DEFAULT_CHAT_IDLE: Duration = Duration::from_secs(10 * 60);

struct Worker {
    generation: u64,
    tx: mpsc::UnboundedSender<InboundEvent>,
}

type Workers = Arc<Mutex<HashMap<ChatId, Worker>>>;

/// Routes inbound events to one worker per chat
///
/// Events of a chat are handled one at a time in arrival order; different chats
/// are handled concurrently. A worker that stays idle for `idle_timeout` exits and
/// the chat gets a fresh worker on its next event.
pub struct Dispatcher {
    adapter: Arc<SessionAdapter>,
    idle_timeout: Duration,
    workers: Workers,
    next_generation: AtomicU64,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(adapter: Arc<SessionAdapter>) -> Self {
        Self::with_idle_timeout(adapter, DEFAULT_CHAT_IDLE)
    }

    pub fn with_idle_timeout(adapter: Arc<SessionAdapter>, idle_timeout: Duration) -> Self {
        Self {
            adapter,
            idle_timeout,
            workers: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn dispatch(&self, event: InboundEvent) {
        let mut workers = self.workers.lock();
        let event = match workers.get(&event.chat_id) {
            Some(worker) => match worker.tx.send(event) {
                Ok(()) => return,
                Err(mpsc::error::SendError(event)) => event,
            },
            None => event,
        };

        let chat_id = event.chat_id.clone();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel::<InboundEvent>();
        let handle = tokio::spawn(run_worker(
            self.adapter.clone(),
            self.workers.clone(),
            chat_id.clone(),
            generation,
            rx,
            self.idle_timeout,
        ));
        // Receiver is alive: the worker was just spawned
        let _ = tx.send(event);
        tracing::debug!(chat_id = %chat_id, generation = generation, "Started chat worker");
        workers.insert(chat_id, Worker { generation, tx });

        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Number of chats with a worker
    pub fn active_chats(&self) -> usize {
        self.workers.lock().len()
    }

    /// Close every worker queue and wait for queued events to be handled
    pub async fn shutdown(&self) {
        self.workers.lock().clear();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        futures::future::join_all(handles).await;
    }
}

async fn run_worker(
    adapter: Arc<SessionAdapter>,
    workers: Workers,
    chat_id: ChatId,
    generation: u64,
    mut rx: mpsc::UnboundedReceiver<InboundEvent>,
    idle_timeout: Duration,
) {
    loop {
        let event = match tokio::time::timeout(idle_timeout, rx.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(_) => match retire_or_next(&workers, &chat_id, generation, &mut rx) {
                Some(event) => event,
                None => {
                    tracing::debug!(chat_id = %chat_id, generation = generation, "Chat worker idle, exiting");
                    break;
                }
            },
        };

        if let Err(e) = adapter.handle_event(event).await {
            tracing::warn!(chat_id = %chat_id, error = %e, "Failed to deliver reply");
        }
    }
}

/// Under the worker map lock: take an event that raced the idle timeout, or
/// remove this worker's entry so the next event spawns a new one
fn retire_or_next(
    workers: &Mutex<HashMap<ChatId, Worker>>,
    chat_id: &ChatId,
    generation: u64,
    rx: &mut mpsc::UnboundedReceiver<InboundEvent>,
) -> Option<InboundEvent> {
    let mut workers = workers.lock();
    if let Ok(event) = rx.try_recv() {
        return Some(event);
    }
    if workers.get(chat_id).is_some_and(|w| w.generation == generation) {
        workers.remove(chat_id);
    }
    None
}
