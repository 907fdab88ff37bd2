//! Console transport for the REPL
//!
//! Options are printed as a numbered list; typing one of the numbers picks it.

use super::{ChatId, InboundEvent, InboundKind, Sender, Transport, TransportError};
use crate::reply::{OutboundReply, SelectableOptions};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::Write;

const CONSOLE_CHAT: &str = "console";

#[derive(Default)]
pub struct ConsoleTransport {
    last_options: Mutex<Option<SelectableOptions>>,
}

impl ConsoleTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chat_id() -> ChatId {
        ChatId::new(CONSOLE_CHAT)
    }

    /// Turn a typed line into an inbound event. A number matching one of the
    /// options last shown becomes a button press for that option.
    pub fn inbound(&self, line: &str) -> InboundEvent {
        let kind = line
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|n| {
                let mut last = self.last_options.lock();
                let value = last.as_ref()?.nth(n)?.value.clone();
                *last = None;
                Some(value)
            })
            .map(|data| InboundKind::Button {
                callback_id: CONSOLE_CHAT.to_string(),
                data,
            })
            .unwrap_or_else(|| InboundKind::Text(line.to_string()));

        InboundEvent {
            chat_id: Self::chat_id(),
            sender: Sender {
                id: CONSOLE_CHAT.to_string(),
                username: None,
            },
            kind,
        }
    }
}

#[async_trait]
impl Transport for ConsoleTransport {
    async fn send_typing(&self, _chat: &ChatId) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send_reply(&self, _chat: &ChatId, reply: &OutboundReply) -> Result<(), TransportError> {
        *self.last_options.lock() = reply.options.clone().filter(|o| !o.is_empty());

        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "\n{}\n", reply.to_plain_text().trim_end())?;
        stdout.flush()?;
        Ok(())
    }

    async fn acknowledge(&self, _callback_id: &str) -> Result<(), TransportError> {
        Ok(())
    }
}
