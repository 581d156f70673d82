//! Streaming Chat Completions client.
//!
//! Each client runs at most one request at a time. Starting a new
//! send cancels the one in flight and waits for its read loop to
//! drop the connection before opening another.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use futures_util::StreamExt;
use reqwest::header::{CONTENT_TYPE, HeaderMap, RETRY_AFTER};
use serde::Deserialize;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::core::RequestEnvelope;
use super::error::ChatError;
use super::sse::{SseFrame, SseLineBuffer, parse_line};

pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

const COMPLETIONS_PATH: &str = "/chat/completions";

// Base URLs containing any of these are already complete endpoints
const COMPLETE_ENDPOINT_FRAGMENTS: &[&str] = &["/chat/completions", "/external/"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Delta(String),
    Completed,
    Failed(ChatError),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Delta(_))
    }
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Time allowed to establish the connection.
    pub connect_timeout: Duration,
    /// Time allowed between sending the request and the status line.
    pub response_timeout: Duration,
    /// Longest allowed silence between two body chunks.
    pub idle_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            response_timeout: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(120),
        }
    }
}

/// Uses `base_url` as is when it already names a completions
/// endpoint, otherwise appends `/chat/completions`.
pub fn resolve_endpoint(base_url: &str) -> Result<reqwest::Url, ChatError> {
    let base_url = base_url.trim();
    let url = if COMPLETE_ENDPOINT_FRAGMENTS
        .iter()
        .any(|fragment| base_url.contains(fragment))
    {
        base_url.to_string()
    } else {
        format!("{}{}", base_url.trim_end_matches('/'), COMPLETIONS_PATH)
    };

    let parsed = reqwest::Url::parse(&url).map_err(|_| ChatError::InvalidUrl(url.clone()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        _ => Err(ChatError::InvalidUrl(url)),
    }
}

struct InFlight {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct StreamingChatClient {
    http: reqwest::Client,
    options: ClientOptions,
    generation: Arc<AtomicU64>,
    in_flight: Mutex<Option<InFlight>>,
}

impl StreamingChatClient {
    pub fn new() -> Result<Self, ChatError> {
        Self::with_options(ClientOptions::default())
    }

    pub fn with_options(options: ClientOptions) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(|e| ChatError::StreamingError(e.to_string()))?;

        Ok(Self {
            http,
            options,
            generation: Arc::new(AtomicU64::new(0)),
            in_flight: Mutex::new(None),
        })
    }

    /// Sends `envelope` to the endpoint derived from `base_url` and
    /// returns the events of the response as a stream.
    ///
    /// The stream yields deltas in the order they were received and
    /// ends after exactly one `Completed` or `Failed` event. If
    /// `cancel` fires, or another send starts on this client, the
    /// stream ends right away without a terminal event.
    pub async fn send(
        &self,
        envelope: &RequestEnvelope,
        base_url: &str,
        api_key: &str,
        cancel: CancellationToken,
    ) -> ChatStream {
        let mut in_flight = self.in_flight.lock().await;
        if let Some(previous) = in_flight.take() {
            tracing::debug!("Cancelling in-flight request before starting a new one");
            previous.cancel.cancel();
            if let Err(e) = previous.handle.await {
                tracing::warn!("Previous request task ended abnormally: {}", e);
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = cancel.child_token();
        let (tx, rx) = mpsc::unbounded_channel();

        let emitter = Emitter {
            tx,
            cancel: cancel.clone(),
            generation,
            current: Arc::clone(&self.generation),
        };
        let request = PendingRequest {
            envelope: envelope.clone(),
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
        };
        let handle = tokio::spawn(run_request(
            self.http.clone(),
            self.options.clone(),
            request,
            emitter,
        ));

        *in_flight = Some(InFlight {
            cancel: cancel.clone(),
            handle,
        });

        ChatStream {
            rx,
            cancel,
            generation,
            current: Arc::clone(&self.generation),
            finished: false,
        }
    }

    /// Cancels the request in flight, if any, and waits for it to
    /// unwind.
    pub async fn cancel(&self) {
        let previous = self.in_flight.lock().await.take();
        if let Some(previous) = previous {
            previous.cancel.cancel();
            if let Err(e) = previous.handle.await {
                tracing::warn!("Cancelled request task ended abnormally: {}", e);
            }
        }
    }

    pub async fn is_busy(&self) -> bool {
        self.in_flight
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }
}

/// Events of a single send. Ends early, without a terminal event,
/// once the request is cancelled or superseded.
pub struct ChatStream {
    rx: mpsc::UnboundedReceiver<StreamEvent>,
    cancel: CancellationToken,
    generation: u64,
    current: Arc<AtomicU64>,
    finished: bool,
}

impl ChatStream {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn is_live(&self) -> bool {
        !self.finished
            && !self.cancel.is_cancelled()
            && self.current.load(Ordering::SeqCst) == self.generation
    }
}

impl Stream for ChatStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        // Anything still buffered after cancellation is dropped here
        if !self.is_live() {
            self.rx.close();
            return Poll::Ready(None);
        }

        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    self.finished = true;
                }
                Poll::Ready(Some(event))
            }
            other => other,
        }
    }
}

impl Drop for ChatStream {
    // Nobody is listening any more, so stop reading the response
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct PendingRequest {
    envelope: RequestEnvelope,
    base_url: String,
    api_key: String,
}

/// Forwards events for one generation only, and never after
/// cancellation.
pub(crate) struct Emitter {
    tx: mpsc::UnboundedSender<StreamEvent>,
    cancel: CancellationToken,
    generation: u64,
    current: Arc<AtomicU64>,
}

impl Emitter {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && self.current.load(Ordering::SeqCst) == self.generation
    }

    fn emit(&self, event: StreamEvent) -> bool {
        if !self.is_live() {
            return false;
        }
        self.tx.send(event).is_ok()
    }
}

async fn run_request(
    http: reqwest::Client,
    options: ClientOptions,
    request: PendingRequest,
    emitter: Emitter,
) {
    let result = tokio::select! {
        biased;
        _ = emitter.cancel.cancelled() => {
            tracing::debug!("Request cancelled");
            return;
        }
        result = execute(&http, &options, &request, &emitter) => result,
    };

    match result {
        Ok(()) => {
            emitter.emit(StreamEvent::Completed);
        }
        Err(e) => {
            if emitter.is_live() {
                tracing::error!("Chat completion failed: {}", e);
            }
            emitter.emit(StreamEvent::Failed(e));
        }
    }
}

async fn execute(
    http: &reqwest::Client,
    options: &ClientOptions,
    request: &PendingRequest,
    emitter: &Emitter,
) -> Result<(), ChatError> {
    let url = resolve_endpoint(&request.base_url)?;
    if request.api_key.trim().is_empty() {
        return Err(ChatError::Authentication);
    }
    let body = request.envelope.to_json()?;

    tracing::debug!(
        "Connecting to {} (model {}, {} messages)",
        url,
        request.envelope.model,
        request.envelope.messages.len()
    );
    let response = tokio::time::timeout(
        options.response_timeout,
        http.post(url)
            .bearer_auth(&request.api_key)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send(),
    )
    .await
    .map_err(|_| ChatError::NetworkTimeout)??;

    let status = response.status();
    tracing::debug!("Received status {}", status);
    if !status.is_success() {
        return Err(error_for_status(response, &request.envelope.model).await);
    }

    if is_json(response.headers()) {
        let text = tokio::time::timeout(options.idle_timeout, response.text())
            .await
            .map_err(|_| ChatError::NetworkTimeout)??;

        // Some proxies label event streams as JSON
        if looks_like_event_stream(&text) {
            let body = futures::stream::iter([Ok::<_, ChatError>(text.into_bytes())]);
            return relay_event_stream(body, options.idle_timeout, emitter).await;
        }

        // Others ignore `stream: true` and answer in one piece
        let content = full_completion_content(&text)?;
        if !content.is_empty() {
            emitter.emit(StreamEvent::Delta(content));
        }
        return Ok(());
    }

    relay_event_stream(response.bytes_stream(), options.idle_timeout, emitter).await
}

/// Reads SSE lines off `stream` and forwards each delta. Returns once
/// `[DONE]` arrives, the stream ends cleanly, or the request is no
/// longer live.
pub(crate) async fn relay_event_stream<S, B, E>(
    stream: S,
    idle_timeout: Duration,
    emitter: &Emitter,
) -> Result<(), ChatError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    ChatError: From<E>,
{
    tokio::pin!(stream);
    let mut lines = SseLineBuffer::new();

    loop {
        let next = tokio::time::timeout(idle_timeout, stream.next())
            .await
            .map_err(|_| ChatError::NetworkTimeout)?;
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk.map_err(ChatError::from)?;

        for line in lines.push(chunk.as_ref()) {
            if !emitter.is_live() {
                return Ok(());
            }
            if handle_line(&line, emitter)? {
                return Ok(());
            }
        }
    }

    // The connection closed without `[DONE]`, which still counts as
    // success
    if let Some(line) = lines.finish()
        && emitter.is_live()
    {
        handle_line(&line, emitter)?;
    }
    Ok(())
}

/// Returns true when reading should stop, either because the end
/// marker was reached or because nobody receives the events.
fn handle_line(line: &str, emitter: &Emitter) -> Result<bool, ChatError> {
    match parse_line(line) {
        Some(SseFrame::Delta(text)) => Ok(!emitter.emit(StreamEvent::Delta(text))),
        Some(SseFrame::Done) => Ok(true),
        Some(SseFrame::Error(message)) => Err(ChatError::StreamingError(message)),
        None => Ok(false),
    }
}

async fn error_for_status(response: reqwest::Response, model: &str) -> ChatError {
    let status = response.status();
    match status.as_u16() {
        401 => ChatError::Authentication,
        404 => ChatError::ModelNotFound(model.to_string()),
        429 => ChatError::RateLimitExceeded {
            retry_after: retry_after_secs(response.headers()),
        },
        code => {
            let message = response.text().await.unwrap_or_default();
            ChatError::ServerError {
                status: code,
                message,
            }
        }
    }
}

fn retry_after_secs(headers: &HeaderMap) -> u64 {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

fn looks_like_event_stream(body: &str) -> bool {
    body.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .is_some_and(|line| line.starts_with("data:"))
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().starts_with("application/json"))
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct Completion {
    choices: Vec<CompletionChoice>,
}

fn full_completion_content(body: &str) -> Result<String, ChatError> {
    let completion = serde_json::from_str::<Completion>(body)
        .map_err(|e| ChatError::InvalidResponseFormat(e.to_string()))?;
    let choice = completion.choices.into_iter().next().ok_or_else(|| {
        ChatError::InvalidResponseFormat("Completion has no choices".to_string())
    })?;
    Ok(choice.message.content.unwrap_or_default())
}
