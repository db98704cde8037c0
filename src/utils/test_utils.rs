//! Scripted HTTP servers for the streaming and relay tests.

use std::net::SocketAddr;
use std::sync::{Arc, Once};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::core::message::{Conversation, Turn};

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("request body should be JSON")
    }
}

/// One canned response. Chunks are written in order with `chunk_delay`
/// between them; `hold_open` keeps the connection alive afterwards.
/// `truncated` sends the body chunked and cuts it off inside a chunk.
#[derive(Debug, Clone)]
pub struct MockReply {
    pub status: u16,
    pub content_type: String,
    pub chunks: Vec<Vec<u8>>,
    pub chunk_delay: Duration,
    pub hold_open: bool,
    pub truncated: bool,
}

impl MockReply {
    pub fn event_stream<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        Self {
            status: 200,
            content_type: "text/event-stream;charset=utf-8".to_string(),
            chunks: chunks.into_iter().map(|c| c.as_ref().to_vec()).collect(),
            chunk_delay: Duration::ZERO,
            hold_open: false,
            truncated: false,
        }
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "application/json".to_string(),
            chunks: vec![body.as_bytes().to_vec()],
            chunk_delay: Duration::ZERO,
            hold_open: false,
            truncated: false,
        }
    }

    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = content_type.to_string();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    pub fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    pub fn truncated(mut self) -> Self {
        self.truncated = true;
        self
    }
}

/// Replies are served in order; the last one repeats for later connections.
pub struct MockServer {
    pub addr: SocketAddr,
    pub requests: Arc<Mutex<Vec<CapturedRequest>>>,
    handle: JoinHandle<()>,
}

impl MockServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn request_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    pub async fn captured(&self) -> Vec<CapturedRequest> {
        self.requests.lock().await.clone()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn spawn_mock_server(replies: Vec<MockReply>) -> MockServer {
    disable_proxies();
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("local addr should resolve");
    let requests = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&requests);

    let handle = tokio::spawn(async move {
        let mut connections = Vec::new();
        let mut served = 0_usize;
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let reply = replies
                .get(served)
                .or_else(|| replies.last())
                .cloned()
                .unwrap_or_else(|| MockReply::status(500, "{}"));
            served += 1;
            let captured = Arc::clone(&captured);
            connections.push(tokio::spawn(async move {
                let Ok(request) = read_http_request(&mut stream).await else {
                    return;
                };
                captured.lock().await.push(request);
                let _ = write_reply(&mut stream, &reply).await;
            }));
        }
        for connection in connections {
            connection.abort();
        }
    });

    MockServer {
        addr,
        requests,
        handle,
    }
}

async fn write_reply(stream: &mut TcpStream, reply: &MockReply) -> std::io::Result<()> {
    let framing = if reply.truncated {
        "transfer-encoding: chunked\r\n"
    } else {
        ""
    };
    let head = format!(
        "HTTP/1.1 {} MOCK\r\ncontent-type: {}\r\ncache-control: no-cache\r\n{framing}connection: close\r\n\r\n",
        reply.status, reply.content_type
    );
    stream.write_all(head.as_bytes()).await?;
    stream.flush().await?;
    for chunk in &reply.chunks {
        if !reply.chunk_delay.is_zero() {
            tokio::time::sleep(reply.chunk_delay).await;
        }
        if reply.truncated {
            stream
                .write_all(format!("{:x}\r\n", chunk.len()).as_bytes())
                .await?;
            stream.write_all(chunk).await?;
            stream.write_all(b"\r\n").await?;
        } else {
            stream.write_all(chunk).await?;
        }
        stream.flush().await?;
    }
    if reply.truncated {
        // Announces 255 bytes and sends a handful before hanging up.
        stream.write_all(b"ff\r\ndata: ").await?;
        stream.flush().await?;
        return stream.shutdown().await;
    }
    if reply.hold_open {
        std::future::pending::<()>().await;
    }
    stream.shutdown().await
}

pub async fn read_http_request(stream: &mut TcpStream) -> Result<CapturedRequest, String> {
    let mut buffer = Vec::new();
    let mut header_end = None;
    while header_end.is_none() {
        let mut chunk = [0_u8; 1024];
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP headers".to_string());
        }
        buffer.extend_from_slice(&chunk[..read]);
        header_end = buffer
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .map(|index| index + 4);
    }

    let header_end = header_end.expect("header end should exist");
    let header_text =
        std::str::from_utf8(&buffer[..header_end]).map_err(|err| err.to_string())?;
    let mut lines = header_text.split("\r\n").filter(|line| !line.is_empty());
    let request_line = lines
        .next()
        .ok_or_else(|| "Missing HTTP request line".to_string())?
        .to_string();

    let mut headers = Vec::new();
    let mut content_length = 0_usize;
    for line in lines {
        let mut parts = line.splitn(2, ':');
        let Some(name) = parts.next() else {
            continue;
        };
        let value = parts.next().unwrap_or_default().trim().to_string();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse::<usize>().map_err(|err| err.to_string())?;
        }
        headers.push((name.to_string(), value));
    }

    let mut body = buffer[header_end..].to_vec();
    while body.len() < content_length {
        let mut chunk = vec![0_u8; content_length.saturating_sub(body.len())];
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP body".to_string());
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);

    Ok(CapturedRequest {
        request_line,
        headers,
        body,
    })
}

/// Keeps loopback test traffic away from any proxy configured on the host.
pub fn disable_proxies() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        for var in [
            "HTTP_PROXY",
            "http_proxy",
            "HTTPS_PROXY",
            "https_proxy",
            "ALL_PROXY",
            "all_proxy",
        ] {
            std::env::remove_var(var);
        }
        std::env::set_var("NO_PROXY", "*");
        std::env::set_var("no_proxy", "*");
    });
}

/// OpenAI-style delta frame carrying `text`.
pub fn chat_delta(text: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({"choices": [{"delta": {"content": text}, "finish_reason": null}]})
    )
}

pub fn sample_conversation() -> Conversation {
    Conversation::from_turns(vec![
        Turn::human("Hello"),
        Turn::bot("Hi there!"),
        Turn::human("How are you?"),
    ])
}
