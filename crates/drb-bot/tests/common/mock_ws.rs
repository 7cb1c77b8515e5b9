//! Mock JSON-RPC WebSocket server for integration tests.
//!
//! - Accepts connections and counts them
//! - Records every text frame
//! - Answers auth, subscribe, positions, heartbeat and test requests
//! - Pushes frames to every open connection
//! - Drops every open connection on demand

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

#[derive(Debug, Clone)]
enum Control {
    Push(String),
    Drop,
}

/// A mock WebSocket server for testing.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    control_tx: broadcast::Sender<Control>,
    messages: Arc<Mutex<Vec<Value>>>,
    connections: Arc<Mutex<u32>>,
}

impl MockWsServer {
    /// Start a new mock WebSocket server on an available port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let messages: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
        let connections: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (control_tx, _) = broadcast::channel::<Control>(64);

        let messages_clone = messages.clone();
        let connections_clone = connections.clone();
        let control_clone = control_tx.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        let control = control_clone.subscribe();
                        tokio::spawn(handle_connection(
                            stream,
                            messages_clone.clone(),
                            connections_clone.clone(),
                            control,
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
            control_tx,
            messages,
            connections,
        }
    }

    /// Get the server's WebSocket URL.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Get the number of connections accepted.
    pub async fn connection_count(&self) -> u32 {
        *self.connections.lock().await
    }

    /// Every text frame received, parsed.
    pub async fn received(&self) -> Vec<Value> {
        self.messages.lock().await.clone()
    }

    /// Received frames with the given method.
    pub async fn requests(&self, method: &str) -> Vec<Value> {
        self.messages
            .lock()
            .await
            .iter()
            .filter(|m| m["method"] == method)
            .cloned()
            .collect()
    }

    /// Wait until at least `count` frames with `method` arrived.
    ///
    /// Returns whatever arrived when `limit` passes.
    pub async fn wait_for_requests(&self, method: &str, count: usize, limit: Duration) -> Vec<Value> {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let found = self.requests(method).await;
            if found.len() >= count || tokio::time::Instant::now() >= deadline {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Wait until at least `count` connections were accepted.
    pub async fn wait_for_connections(&self, count: u32, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while self.connection_count().await < count {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        true
    }

    /// Send a frame to every open connection.
    pub fn push(&self, frame: Value) {
        let _ = self.control_tx.send(Control::Push(frame.to_string()));
    }

    /// Drop every open connection without a close handshake.
    pub fn drop_connections(&self) {
        let _ = self.control_tx.send(Control::Drop);
    }

    /// Shutdown the server.
    pub async fn shutdown(self) {
        self.drop_connections();
        let _ = self.shutdown_tx.send(()).await;
    }
}

fn reply(request: &Value) -> Option<Value> {
    let id = request.get("id")?.clone();
    let result = match request["method"].as_str()? {
        "public/auth" => json!({
            "access_token": "ws-access",
            "refresh_token": "ws-refresh",
            "expires_in": 900,
            "scope": "session:test",
            "token_type": "bearer"
        }),
        "public/subscribe" => request["params"]["channels"].clone(),
        "private/get_positions" => json!([{
            "instrument_name": format!("{}-PERPETUAL", request["params"]["currency"].as_str().unwrap_or("BTC")),
            "size": 10.0,
            "direction": "buy"
        }]),
        "public/set_heartbeat" => json!("ok"),
        "public/test" => json!({"version": "1.2.26"}),
        _ => return None,
    };
    Some(json!({"jsonrpc": "2.0", "id": id, "result": result, "usIn": 1, "usOut": 2}))
}

async fn handle_connection(
    stream: TcpStream,
    messages: Arc<Mutex<Vec<Value>>>,
    connections: Arc<Mutex<u32>>,
    mut control: broadcast::Receiver<Control>,
) {
    {
        let mut count = connections.lock().await;
        *count += 1;
    }

    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let Ok(parsed) = serde_json::from_str::<Value>(&text) else {
                        continue;
                    };
                    messages.lock().await.push(parsed.clone());
                    if let Some(response) = reply(&parsed) {
                        let _ = write.send(Message::Text(response.to_string())).await;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            ctl = control.recv() => match ctl {
                Ok(Control::Push(text)) => {
                    let _ = write.send(Message::Text(text)).await;
                }
                Ok(Control::Drop) | Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => {}
            },
        }
    }
}
