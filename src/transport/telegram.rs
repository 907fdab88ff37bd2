//! Telegram Bot API transport (long polling)

use super::{ChatId, Dispatcher, InboundEvent, InboundKind, Sender, Transport, TransportError};
use crate::reply::OutboundReply;
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Telegram rejects callback data longer than this
const MAX_CALLBACK_BYTES: usize = 64;
/// Telegram message length limit
const MAX_MESSAGE_CHARS: usize = 4096;
const RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

impl Update {
    /// Map an update to an inbound event. Updates with no chat (edited
    /// messages, channel posts, inline queries) map to `None`.
    pub fn to_inbound(&self) -> Option<InboundEvent> {
        if let Some(message) = &self.message {
            let sender = match &message.from {
                Some(user) => sender(user),
                None => Sender {
                    id: message.chat.id.to_string(),
                    username: None,
                },
            };
            let kind = match &message.text {
                Some(text) => InboundKind::Text(text.clone()),
                None => InboundKind::Unsupported,
            };
            return Some(InboundEvent {
                chat_id: ChatId::new(message.chat.id.to_string()),
                sender,
                kind,
            });
        }

        let query = self.callback_query.as_ref()?;
        let message = query.message.as_ref()?;
        Some(InboundEvent {
            chat_id: ChatId::new(message.chat.id.to_string()),
            sender: sender(&query.from),
            kind: InboundKind::Button {
                callback_id: query.id.clone(),
                data: query.data.clone().unwrap_or_default(),
            },
        })
    }
}

fn sender(user: &User) -> Sender {
    Sender {
        id: user.id.to_string(),
        username: user.username.clone(),
    }
}

/// Inline keyboard with one option per row, or `None` if the options cannot be
/// carried as callback data
fn inline_keyboard(reply: &OutboundReply) -> Option<Value> {
    let options = reply.options.as_ref().filter(|o| !o.is_empty())?;
    if options
        .options
        .iter()
        .any(|o| o.value.is_empty() || o.value.len() > MAX_CALLBACK_BYTES)
    {
        return None;
    }

    let rows: Vec<Value> = options
        .options
        .iter()
        .map(|o| json!([{ "text": o.label, "callback_data": o.value }]))
        .collect();
    Some(json!({ "inline_keyboard": rows }))
}

/// Split text into chunks Telegram accepts, preferring line boundaries
fn split_message(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split_inclusive('\n') {
        for ch in line.chars() {
            if current_len == MAX_MESSAGE_CHARS {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            current.push(ch);
            current_len += 1;
        }
        // Past three quarters of the limit, end the chunk at this newline
        if current_len > MAX_MESSAGE_CHARS * 3 / 4 {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
    }
    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}

pub struct TelegramTransport {
    base_url: String,
    http_client: reqwest::Client,
    poll_timeout: Duration,
}

impl TelegramTransport {
    pub fn new(token: &str, api_base: &str, poll_timeout: Duration) -> Result<Self, TransportError> {
        let http_client = reqwest::Client::builder()
            .timeout(poll_timeout + Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base_url: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
            http_client,
            poll_timeout,
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T, TransportError> {
        let response = self
            .http_client
            .post(format!("{}/{}", self.base_url, method))
            .json(&body)
            .send()
            .await?;

        let api: ApiResponse<T> = response.json().await?;
        match api.result {
            Some(result) if api.ok => Ok(result),
            _ => Err(TransportError::Api {
                method: method.to_string(),
                description: api
                    .description
                    .unwrap_or_else(|| "no description".to_string()),
            }),
        }
    }

    pub async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<Update>, TransportError> {
        let mut body = json!({
            "timeout": self.poll_timeout.as_secs(),
            "allowed_updates": ["message", "callback_query"],
        });
        if let Some(offset) = offset {
            body["offset"] = json!(offset);
        }
        self.call("getUpdates", body).await
    }

    /// Offset past every update queued while the bot was offline
    async fn skip_pending(&self) -> Result<Option<i64>, TransportError> {
        let updates: Vec<Update> = self
            .call("getUpdates", json!({ "offset": -1, "timeout": 0 }))
            .await?;
        let offset = updates.last().map(|u| u.update_id + 1);
        if offset.is_some() {
            info!("Skipped pending updates");
        }
        Ok(offset)
    }

    async fn send_text(&self, chat: &ChatId, text: &str) -> Result<(), TransportError> {
        for chunk in split_message(text) {
            let _: Value = self
                .call("sendMessage", json!({ "chat_id": chat.as_str(), "text": chunk }))
                .await?;
        }
        Ok(())
    }

    /// Poll for updates until `cancel` fires, handing every event to `dispatcher`
    pub async fn run(&self, dispatcher: &Dispatcher, cancel: CancellationToken) -> Result<(), TransportError> {
        let mut offset = self.skip_pending().await?;
        info!(poll_timeout_secs = self.poll_timeout.as_secs(), "Polling for updates");

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.get_updates(offset) => result,
            };

            match result {
                Ok(updates) => {
                    for update in updates {
                        offset = Some(update.update_id + 1);
                        match update.to_inbound() {
                            Some(event) => dispatcher.dispatch(event),
                            None => debug!(update_id = update.update_id, "Ignoring update"),
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "getUpdates failed, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RETRY_DELAY) => {}
                    }
                }
            }
        }

        info!("Stopped polling");
        Ok(())
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send_typing(&self, chat: &ChatId) -> Result<(), TransportError> {
        let _: bool = self
            .call(
                "sendChatAction",
                json!({ "chat_id": chat.as_str(), "action": "typing" }),
            )
            .await?;
        Ok(())
    }

    async fn send_reply(&self, chat: &ChatId, reply: &OutboundReply) -> Result<(), TransportError> {
        let Some(keyboard) = inline_keyboard(reply) else {
            return self.send_text(chat, &reply.to_typed_text()).await;
        };

        let mut body = json!({
            "chat_id": chat.as_str(),
            "text": reply.text,
            "parse_mode": "Markdown",
            "reply_markup": keyboard,
        });

        match self.call::<Value>("sendMessage", body.clone()).await {
            Ok(_) => Ok(()),
            Err(TransportError::Api { description, .. }) => {
                warn!(chat_id = %chat, error = %description, "Markdown reply rejected, resending unformatted");
                if let Some(fields) = body.as_object_mut() {
                    fields.remove("parse_mode");
                }
                let _: Value = self.call("sendMessage", body).await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn acknowledge(&self, callback_id: &str) -> Result<(), TransportError> {
        let _: bool = self
            .call(
                "answerCallbackQuery",
                json!({ "callback_query_id": callback_id }),
            )
            .await?;
        Ok(())
    }
}
