//! Mock venue WebSocket server for integration tests.
//!
//! Speaks enough of the venue protocol to exercise the connection manager:
//! - Answers `{"ping":1}` with a ping reply
//! - Answers tick subscriptions with one tick frame carrying a stream id
//! - Records every text frame it receives
//! - Can drop all open connections on demand
//! - Can play a half-open venue that never answers pings

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// A mock WebSocket server for testing.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    drop_tx: broadcast::Sender<()>,
    messages: Arc<Mutex<VecDeque<String>>>,
    connections: Arc<Mutex<u32>>,
}

impl MockWsServer {
    /// Start a new mock WebSocket server on an available port.
    pub async fn start() -> Self {
        Self::start_with(false).await
    }

    /// Start a server that records pings but never answers them.
    pub async fn start_silent() -> Self {
        Self::start_with(true).await
    }

    async fn start_with(ignore_pings: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let messages: Arc<Mutex<VecDeque<String>>> = Arc::new(Mutex::new(VecDeque::new()));
        let connections: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (drop_tx, _) = broadcast::channel::<()>(4);

        let messages_clone = messages.clone();
        let connections_clone = connections.clone();
        let drop_clone = drop_tx.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        let messages = messages_clone.clone();
                        let connections = connections_clone.clone();
                        let drop_rx = drop_clone.subscribe();
                        tokio::spawn(handle_connection(
                            stream,
                            messages,
                            connections,
                            drop_rx,
                            ignore_pings,
                        ));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            drop_tx,
            messages,
            connections,
        }
    }

    /// Get the server's WebSocket URL.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Get the number of connections received.
    pub async fn connection_count(&self) -> u32 {
        *self.connections.lock().await
    }

    /// Get all received messages.
    pub async fn received_messages(&self) -> Vec<String> {
        self.messages.lock().await.iter().cloned().collect()
    }

    /// Received messages that are tick subscriptions for `symbol`.
    pub async fn tick_subscriptions(&self, symbol: &str) -> usize {
        self.received_messages()
            .await
            .iter()
            .filter_map(|m| serde_json::from_str::<Value>(m).ok())
            .filter(|v| v.get("ticks") == Some(&json!(symbol)))
            .count()
    }

    /// Close every open connection from the server side.
    pub fn drop_connections(&self) {
        let _ = self.drop_tx.send(());
    }

    /// Position of the first received message matching `pred`, at or after `from`.
    pub async fn position<F>(&self, from: usize, pred: F) -> Option<usize>
    where
        F: Fn(&Value) -> bool,
    {
        self.received_messages()
            .await
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, m)| serde_json::from_str::<Value>(m).is_ok_and(|v| pred(&v)))
            .map(|(i, _)| i)
    }

    /// Shutdown the server.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    messages: Arc<Mutex<VecDeque<String>>>,
    connections: Arc<Mutex<u32>>,
    mut drop_rx: broadcast::Receiver<()>,
    ignore_pings: bool,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    let stream_no = {
        let mut count = connections.lock().await;
        *count += 1;
        *count
    };

    let (mut write, mut read) = ws_stream.split();

    loop {
        let msg = tokio::select! {
            msg = read.next() => msg,
            _ = drop_rx.recv() => {
                let _ = write.send(Message::Close(None)).await;
                return;
            }
        };

        match msg {
            Some(Ok(Message::Text(text))) => {
                messages.lock().await.push_back(text.clone());

                let Ok(request) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                if ignore_pings && request.get("ping").is_some() {
                    continue;
                }
                if let Some(reply) = reply_to(&request, stream_no) {
                    let _ = write.send(Message::Text(reply.to_string())).await;
                }
            }
            Some(Ok(Message::Ping(data))) => {
                let _ = write.send(Message::Pong(data)).await;
            }
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
            _ => {}
        }
    }
}

fn reply_to(request: &Value, stream_no: u32) -> Option<Value> {
    let req_id = request.get("req_id").cloned().unwrap_or(Value::Null);

    if request.get("ping").is_some() {
        return Some(json!({"msg_type": "ping", "ping": "pong", "req_id": req_id}));
    }
    if let Some(symbol) = request.get("ticks") {
        return Some(json!({
            "msg_type": "tick",
            "req_id": req_id,
            "tick": {
                "symbol": symbol,
                "quote": 1234.57,
                "epoch": 1_700_000_000,
                "pip_size": 2
            },
            "subscription": {"id": format!("ticks-{stream_no}")}
        }));
    }
    if request.get("balance").is_some() {
        return Some(json!({
            "msg_type": "balance",
            "req_id": req_id,
            "balance": {"balance": 1000, "currency": "USD"},
            "subscription": {"id": format!("balance-{stream_no}")}
        }));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_server_starts() {
        let server = MockWsServer::start().await;
        assert!(server.url().starts_with("ws://127.0.0.1:"));
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_silent_server_starts() {
        let server = MockWsServer::start_silent().await;
        assert_eq!(server.connection_count().await, 0);
        assert_eq!(server.position(0, |_| true).await, None);
        server.shutdown().await;
    }

    #[test]
    fn test_replies() {
        let pong = reply_to(&json!({"ping": 1}), 1).unwrap();
        assert_eq!(pong["msg_type"], "ping");

        let tick = reply_to(&json!({"ticks": "R_100", "subscribe": 1, "req_id": 4}), 2).unwrap();
        assert_eq!(tick["subscription"]["id"], "ticks-2");
        assert_eq!(tick["req_id"], 4);

        assert!(reply_to(&json!({"forget": "x"}), 1).is_none());
    }
}
