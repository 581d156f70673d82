//! Test utilities for integration tests
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// One step of the response a connection plays back.
#[derive(Clone, Debug)]
pub enum Step {
    /// Write a `data:` frame followed by a blank line
    Frame(String),
    /// Wait before the next step
    Pause(Duration),
    /// Keep the connection open until the client goes away
    Hold,
}

pub fn delta(content: &str) -> Step {
    Step::Frame(
        serde_json::json!({"choices": [{"delta": {"content": content}}]}).to_string(),
    )
}

pub fn done() -> Step {
    Step::Frame("[DONE]".to_string())
}

/// A bare HTTP server that streams scripted SSE responses.
///
/// Mock servers send the whole body at once, which makes it
/// impossible to test what happens while a stream is still open. The
/// nth connection plays `scripts[n]`, connections past the end replay
/// the last script.
pub struct SseServer {
    pub base_url: String,
    accepted: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl SseServer {
    pub async fn start(scripts: Vec<Vec<Step>>) -> Self {
        assert!(!scripts.is_empty(), "At least one script is required");

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test server");
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));

        let scripts = Arc::new(scripts);
        let accepted_count = Arc::clone(&accepted);
        let closed_count = Arc::clone(&closed);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let n = accepted_count.fetch_add(1, Ordering::SeqCst);
                let script = scripts[n.min(scripts.len() - 1)].clone();
                let closed_count = Arc::clone(&closed_count);
                tokio::spawn(async move {
                    play(socket, script).await;
                    closed_count.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        Self {
            base_url: format!("http://{}", addr),
            accepted,
            closed,
        }
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Waits until `n` connections have been dropped by the client or
    /// finished their script. Returns false on timeout.
    pub async fn wait_closed(&self, n: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            while self.closed.load(Ordering::SeqCst) < n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok()
    }
}

async fn play(mut socket: TcpStream, script: Vec<Step>) {
    if read_request(&mut socket).await.is_none() {
        return;
    }

    let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n";
    if socket.write_all(head.as_bytes()).await.is_err() {
        return;
    }

    for step in script {
        match step {
            Step::Frame(data) => {
                let frame = format!("data: {}\n\n", data);
                if socket.write_all(frame.as_bytes()).await.is_err() {
                    return;
                }
                let _ = socket.flush().await;
            }
            Step::Pause(duration) => tokio::time::sleep(duration).await,
            Step::Hold => {
                // The client never writes again, so a read only
                // returns once the connection is gone
                let mut buf = [0u8; 64];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(_) => continue,
                    }
                }
            }
        }
    }
}

/// Reads the request head and body so the client isn't reset while
/// still writing.
async fn read_request(socket: &mut TcpStream) -> Option<Vec<u8>> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];

    let head_end = loop {
        let n = socket.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&data[..head_end]).to_lowercase();
    let content_length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while data.len() < head_end + content_length {
        let n = socket.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        data.extend_from_slice(&buf[..n]);
    }

    Some(data[head_end..].to_vec())
}
