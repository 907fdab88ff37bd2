//! Scripted collaborators for unit tests

use crate::provider::{CompletionService, ProviderError};
use crate::reply::OutboundReply;
use crate::transport::{ChatId, Transport, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Completion service that replays queued answers
///
/// Plain and structured calls have separate queues. An empty queue answers with
/// `ProviderError::EmptyResponse`.
#[derive(Default)]
pub struct ScriptedCompletion {
    answers: Mutex<VecDeque<Result<String, ProviderError>>>,
    structured: Mutex<VecDeque<Result<serde_json::Value, ProviderError>>>,
    complete_calls: Mutex<Vec<(String, String)>>,
    structured_calls: Mutex<Vec<(String, String)>>,
}

fn scripted_failure() -> ProviderError {
    ProviderError::Api {
        status: 500,
        message: "scripted failure".to_string(),
    }
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(self, text: &str) -> Self {
        self.answers.lock().push_back(Ok(text.to_string()));
        self
    }

    pub fn fail_complete(self) -> Self {
        self.answers.lock().push_back(Err(scripted_failure()));
        self
    }

    pub fn structured(self, value: serde_json::Value) -> Self {
        self.structured.lock().push_back(Ok(value));
        self
    }

    pub fn fail_structured(self) -> Self {
        self.structured.lock().push_back(Err(scripted_failure()));
        self
    }

    /// (system, user) pairs of plain completion calls
    pub fn complete_calls(&self) -> Vec<(String, String)> {
        self.complete_calls.lock().clone()
    }

    /// (system, user) pairs of structured completion calls
    pub fn structured_calls(&self) -> Vec<(String, String)> {
        self.structured_calls.lock().clone()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, system: &str, user: &str) -> Result<String, ProviderError> {
        self.complete_calls
            .lock()
            .push((system.to_string(), user.to_string()));
        self.answers
            .lock()
            .pop_front()
            .unwrap_or(Err(ProviderError::EmptyResponse))
    }

    async fn complete_structured(
        &self,
        system: &str,
        user: &str,
        _schema_name: &str,
        _schema: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        self.structured_calls
            .lock()
            .push((system.to_string(), user.to_string()));
        self.structured
            .lock()
            .pop_front()
            .unwrap_or(Err(ProviderError::EmptyResponse))
    }
}

/// Transport that records everything sent through it
#[derive(Default)]
pub struct RecordingTransport {
    typing: Mutex<Vec<ChatId>>,
    replies: Mutex<Vec<(ChatId, OutboundReply)>>,
    acknowledged: Mutex<Vec<String>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn typing_count(&self) -> usize {
        self.typing.lock().len()
    }

    pub fn replies(&self) -> Vec<(ChatId, OutboundReply)> {
        self.replies.lock().clone()
    }

    pub fn acknowledged(&self) -> Vec<String> {
        self.acknowledged.lock().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_typing(&self, chat: &ChatId) -> Result<(), TransportError> {
        self.typing.lock().push(chat.clone());
        Ok(())
    }

    async fn send_reply(&self, chat: &ChatId, reply: &OutboundReply) -> Result<(), TransportError> {
        self.replies.lock().push((chat.clone(), reply.clone()));
        Ok(())
    }

    async fn acknowledge(&self, callback_id: &str) -> Result<(), TransportError> {
        self.acknowledged.lock().push(callback_id.to_string());
        Ok(())
    }
}

/// A request seen by `FakeHttpServer`. Header names are lowercase.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: serde_json::Value,
}

type Responder = dyn Fn(&CapturedRequest) -> (u16, String) + Send + Sync;

/// HTTP/1.1 server on a local port that answers every request through a closure
/// and records what it received. One request per connection.
pub struct FakeHttpServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    task: JoinHandle<()>,
}

impl FakeHttpServer {
    /// `respond` maps a request to a status code and a response body
    pub async fn start<F>(respond: F) -> Self
    where
        F: Fn(&CapturedRequest) -> (u16, String) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let respond: Arc<Responder> = Arc::new(respond);

        let captured = requests.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let respond = respond.clone();
                let captured = captured.clone();
                tokio::spawn(async move {
                    let _ = serve_connection(stream, respond.as_ref(), &captured).await;
                });
            }
        });

        Self { addr, requests, task }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().clone()
    }
}

impl Drop for FakeHttpServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    respond: &Responder,
    captured: &Mutex<Vec<CapturedRequest>>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();
    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();

    let length = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body_end = buf.len().min(header_end + length);
    let body = serde_json::from_slice(&buf[header_end..body_end]).unwrap_or(serde_json::Value::Null);

    let request = CapturedRequest {
        method,
        path,
        headers,
        body,
    };
    let (status, payload) = respond(&request);
    captured.lock().push(request);

    let response = format!(
        "HTTP/1.1 {} Fake\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        payload.len(),
        payload
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}
