//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use retrieval_gateway::config::GatewayConfig;
use retrieval_gateway::{HttpServer, Shutdown};

/// What the mock upstream saw.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub method: String,
    /// Request target, query string included.
    pub target: String,
    pub body: String,
}

/// How the mock upstream answers.
pub enum MockReply {
    /// Plain response with a fixed body.
    Json(u16, String),
    /// Chunked SSE body, one chunk per item, `gap` apart.
    Stream { chunks: Vec<String>, gap: Duration },
    /// Like `Stream`, but the connection drops before the final chunk marker.
    BrokenStream { chunks: Vec<String> },
    /// Like `Stream`; reports on `written` how many chunks went out before
    /// the peer went away (or all of them).
    WatchedStream {
        chunks: Vec<String>,
        gap: Duration,
        written: mpsc::UnboundedSender<usize>,
    },
    /// Never answer.
    Hang,
}

fn status_line(status: u16) -> &'static str {
    match status {
        200 => "200 OK",
        400 => "400 Bad Request",
        404 => "404 Not Found",
        429 => "429 Too Many Requests",
        500 => "500 Internal Server Error",
        503 => "503 Service Unavailable",
        _ => "200 OK",
    }
}

/// Read one HTTP/1.1 request (headers plus `Content-Length` body).
async fn read_request(socket: &mut TcpStream) -> Option<MockRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();

    let content_length = lines
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[header_end..]).to_string();

    Some(MockRequest { method, target, body })
}

/// Write the chunked SSE head and body chunks; `Err` carries how many
/// chunks were fully written before the write failed.
async fn write_chunks(socket: &mut TcpStream, chunks: &[String], gap: Duration) -> Result<(), usize> {
    let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n";
    socket.write_all(head.as_bytes()).await.map_err(|_| 0usize)?;
    for (i, chunk) in chunks.iter().enumerate() {
        let frame = format!("{:x}\r\n{}\r\n", chunk.len(), chunk);
        socket.write_all(frame.as_bytes()).await.map_err(|_| i)?;
        socket.flush().await.map_err(|_| i)?;
        tokio::time::sleep(gap).await;
    }
    Ok(())
}

async fn respond(mut socket: TcpStream, reply: MockReply) {
    match reply {
        MockReply::Json(status, body) => {
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line(status),
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
        }
        MockReply::Stream { chunks, gap } => {
            if write_chunks(&mut socket, &chunks, gap).await.is_ok() {
                let _ = socket.write_all(b"0\r\n\r\n").await;
            }
        }
        MockReply::BrokenStream { chunks } => {
            let _ = write_chunks(&mut socket, &chunks, Duration::from_millis(10)).await;
        }
        MockReply::WatchedStream { chunks, gap, written } => {
            let count = match write_chunks(&mut socket, &chunks, gap).await {
                Ok(()) => chunks.len(),
                Err(count) => count,
            };
            let _ = written.send(count);
        }
        MockReply::Hang => {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }
    let _ = socket.shutdown().await;
}

/// Start a programmable mock upstream on an ephemeral port.
pub async fn start_mock_upstream<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(MockRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MockReply> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        if let Some(request) = read_request(&mut socket).await {
                            let reply = f(request).await;
                            respond(socket, reply).await;
                        }
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Gateway config pointed at a mock upstream, with fast retries.
pub fn test_config(upstream: SocketAddr) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.upstream.base_url = format!("http://{upstream}/v1beta");
    config.upstream.api_key = "test-key".into();
    config.upstream.file_search_store = "fileSearchStores/test".into();
    config.upstream.request_timeout_secs = 5;
    config.retries.base_delay_ms = 10;
    config.retries.max_delay_ms = 50;
    config.rate_limit.max_requests = 1000;
    config
}

/// Start the gateway on an ephemeral port.
pub async fn start_gateway(config: GatewayConfig) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();

    let server = HttpServer::from_config(config).unwrap();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    (addr, shutdown)
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// One upstream SSE frame carrying `text`.
pub fn text_frame(text: &str) -> String {
    let chunk = serde_json::json!({
        "candidates": [{ "content": { "parts": [{ "text": text }] } }]
    });
    format!("data: {chunk}\n\n")
}

/// JSON payloads of the `data:` lines of a downstream SSE body.
pub fn sse_payloads(body: &str) -> Vec<serde_json::Value> {
    body.lines()
        .filter_map(|l| l.strip_prefix("data:"))
        .filter_map(|p| serde_json::from_str(p.trim()).ok())
        .collect()
}
