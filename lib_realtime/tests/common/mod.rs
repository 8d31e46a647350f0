//! Local WebSocket and HTTP fixtures for the integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::io::{Read, Write};
use std::net::TcpListener as StdListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};

enum Outgoing {
    Text(String),
    Close(u16, String),
}

/// One accepted client socket.
pub struct MockConn {
    /// Query string of the upgrade request.
    pub query: String,
    inbound: mpsc::UnboundedReceiver<Value>,
    outbound: mpsc::UnboundedSender<Outgoing>,
}

impl MockConn {
    pub fn send_json(&self, value: Value) {
        let _ = self.outbound.send(Outgoing::Text(value.to_string()));
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.outbound.send(Outgoing::Close(code, reason.to_string()));
    }

    /// Next frame from the client, if one arrives in time.
    pub async fn recv(&mut self, wait: Duration) -> Option<Value> {
        timeout(wait, self.inbound.recv()).await.ok().flatten()
    }

    /// Skips frames until one of type `kind` arrives. Panics after 5 s.
    pub async fn recv_kind(&mut self, kind: &str) -> Value {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.recv(left).await {
                Some(v) if v["type"] == kind => return v,
                Some(_) => continue,
                None => panic!("no '{kind}' frame from the client"),
            }
        }
    }
}

pub struct MockServer {
    pub url: String,
    conns: mpsc::UnboundedReceiver<MockConn>,
}

impl MockServer {
    /// A server that answers `{"type":"ping"}` with `{"type":"pong"}`.
    pub async fn start() -> Self {
        Self::start_with(true).await
    }

    pub async fn start_with(auto_pong: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind test server");
        let addr = listener.local_addr().expect("local addr");
        let (conn_tx, conns) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let conn_tx = conn_tx.clone();
                tokio::spawn(async move {
                    let mut query = String::new();
                    let ws = accept_hdr_async(stream, |req: &Request, resp: Response| {
                        query = req.uri().query().unwrap_or_default().to_string();
                        Ok(resp)
                    })
                    .await;
                    let Ok(ws) = ws else {
                        return;
                    };
                    let (mut sink, mut stream) = ws.split();
                    let (in_tx, inbound) = mpsc::unbounded_channel();
                    let (outbound, mut out_rx) = mpsc::unbounded_channel::<Outgoing>();
                    let pong_tx = outbound.clone();

                    let _ = conn_tx.send(MockConn {
                        query,
                        inbound,
                        outbound,
                    });

                    tokio::spawn(async move {
                        while let Some(out) = out_rx.recv().await {
                            match out {
                                Outgoing::Text(text) => {
                                    if sink.send(Message::Text(text.into())).await.is_err() {
                                        break;
                                    }
                                }
                                Outgoing::Close(code, reason) => {
                                    let frame = CloseFrame {
                                        code: CloseCode::from(code),
                                        reason: reason.into(),
                                    };
                                    let _ = sink.send(Message::Close(Some(frame))).await;
                                    break;
                                }
                            }
                        }
                    });

                    while let Some(Ok(msg)) = stream.next().await {
                        if let Message::Text(text) = msg {
                            let Ok(value) = serde_json::from_str::<Value>(&text) else {
                                continue;
                            };
                            if auto_pong && value["type"] == "ping" {
                                let _ = pong_tx.send(Outgoing::Text(r#"{"type":"pong"}"#.to_string()));
                            }
                            let _ = in_tx.send(value);
                        }
                    }
                });
            }
        });

        Self {
            url: format!("ws://{addr}/ws"),
            conns,
        }
    }

    /// Next client connection. Panics after `wait`.
    pub async fn accept(&mut self, wait: Duration) -> MockConn {
        self.try_accept(wait).await.expect("client did not connect in time")
    }

    pub async fn try_accept(&mut self, wait: Duration) -> Option<MockConn> {
        timeout(wait, self.conns.recv()).await.ok().flatten()
    }
}

/// A TCP listener that accepts and then never speaks, so every upgrade
/// stalls. Returns the WebSocket URL and the number of accepted sockets.
pub async fn silent_tcp_server() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind silent server");
    let addr = listener.local_addr().expect("local addr");
    let accepted = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&accepted);

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            count.fetch_add(1, Ordering::SeqCst);
            held.push(stream);
        }
    });

    (format!("ws://{addr}/ws"), accepted)
}

/// Polls `check` every 20 ms until it holds. Panics after 5 s.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for: {what}");
}

/// One-shot HTTP server on a plain thread; answers the first request with
/// `status` and `body` and reports the request body through the handle.
pub fn mock_http_once(status: u16, body: &'static str) -> (String, thread::JoinHandle<String>) {
    let listener = StdListener::bind("127.0.0.1:0").expect("bind http mock");
    let addr = listener.local_addr().expect("local addr");

    let handle = thread::spawn(move || {
        let Ok((mut stream, _)) = listener.accept() else {
            return String::new();
        };
        let mut raw = Vec::new();
        let mut buf = [0u8; 1024];
        // Headers first, then as much body as Content-Length announces.
        loop {
            let n = stream.read(&mut buf).unwrap_or(0);
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&raw).to_string();
            if let Some(split) = text.find("\r\n\r\n") {
                let length = text[..split]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if raw.len() >= split + 4 + length {
                    break;
                }
            }
        }

        let reply = format!(
            "HTTP/1.1 {status} OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let _ = stream.write_all(reply.as_bytes());
        let text = String::from_utf8_lossy(&raw).to_string();
        text.split_once("\r\n\r\n").map(|(_, b)| b.to_string()).unwrap_or_default()
    });

    (format!("http://{addr}/auth/refresh"), handle)
}

/// HTTP endpoint that accepts requests and never answers them.
pub fn mock_http_silent() -> String {
    let listener = StdListener::bind("127.0.0.1:0").expect("bind http mock");
    let addr = listener.local_addr().expect("local addr");

    thread::spawn(move || {
        let mut held = Vec::new();
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => held.push(stream),
                Err(_) => break,
            }
        }
    });

    format!("http://{addr}/auth/refresh")
}
