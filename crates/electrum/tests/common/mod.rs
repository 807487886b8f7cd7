//! In-process Electrum server for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

/// What the server does with one request.
pub enum Reply {
    /// Answer with `{"id", "result"}`.
    Result(Value),
    /// Answer with `{"id", "error"}`.
    Error(Value),
    /// Write these raw lines instead of a regular answer.
    Raw(Vec<String>),
    /// Never answer.
    Ignore,
    /// Drop this connection without answering and stop accepting new ones.
    Shutdown,
}

pub type Handler = Arc<dyn Fn(&Value) -> Reply + Send + Sync>;

/// Answers like a well-behaved ElectrumX: `server.version` with `1.4.2`,
/// `server.ping` with null, anything else with its own params.
pub fn electrum_handler() -> Handler {
    Arc::new(|request: &Value| match request["method"].as_str() {
        Some("server.version") => Reply::Result(json!("1.4.2")),
        Some("server.ping") => Reply::Result(Value::Null),
        _ => Reply::Result(request["params"].clone()),
    })
}

pub fn response(id: &Value, result: Value) -> String {
    json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string()
}

pub struct MockServer {
    pub port: u16,
    accepted: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Value>>>,
    push_tx: broadcast::Sender<String>,
    kill_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> Self {
        Self::with_handler(electrum_handler()).await
    }

    pub async fn with_handler(handler: Handler) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let accepted = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let (push_tx, _) = broadcast::channel(64);
        let (kill_tx, _) = broadcast::channel(4);
        let stop_accepting = Arc::new(Notify::new());

        let task = {
            let accepted = Arc::clone(&accepted);
            let requests = Arc::clone(&requests);
            let push_tx = push_tx.clone();
            let kill_tx = kill_tx.clone();
            tokio::spawn(async move {
                loop {
                    let socket = tokio::select! {
                        () = stop_accepting.notified() => return,
                        accepted = listener.accept() => match accepted {
                            Ok((socket, _)) => socket,
                            Err(_) => return,
                        },
                    };
                    accepted.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(
                        socket,
                        Arc::clone(&handler),
                        Arc::clone(&requests),
                        Arc::clone(&stop_accepting),
                        push_tx.subscribe(),
                        kill_tx.subscribe(),
                    ));
                }
            })
        };

        Self {
            port,
            accepted,
            requests,
            push_tx,
            kill_tx,
            task,
        }
    }

    /// Number of connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Every request received, in arrival order.
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().clone()
    }

    /// Methods of every request received, in arrival order.
    pub fn methods(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|request| request["method"].as_str().map(str::to_string))
            .collect()
    }

    /// Push a notification to every open connection.
    pub fn notify(&self, method: &str, params: Value) {
        let line = json!({"jsonrpc": "2.0", "method": method, "params": params}).to_string();
        let _ = self.push_tx.send(line);
    }

    /// Close every open connection from the server side.
    pub fn drop_connections(&self) {
        let _ = self.kill_tx.send(());
    }

    /// Wait until `count` connections have been accepted.
    pub async fn wait_for_accepted(&self, count: usize) {
        timeout(Duration::from_secs(5), async {
            while self.accepted() < count {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {count} connections, saw {}", self.accepted()));
    }

    /// Wait until `count` requests for `method` have arrived.
    pub async fn wait_for_requests(&self, method: &str, count: usize) {
        timeout(Duration::from_secs(5), async {
            while self.methods().iter().filter(|m| *m == method).count() < count {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {count} {method} requests"));
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        let _ = self.kill_tx.send(());
        self.task.abort();
    }
}

async fn serve(
    socket: TcpStream,
    handler: Handler,
    requests: Arc<Mutex<Vec<Value>>>,
    stop_accepting: Arc<Notify>,
    mut push_rx: broadcast::Receiver<String>,
    mut kill_rx: broadcast::Receiver<()>,
) {
    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        tokio::select! {
            biased;

            _ = kill_rx.recv() => return,
            pushed = push_rx.recv() => {
                let Ok(line) = pushed else { return };
                if write_half.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                    return;
                }
            }
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { return };
                let request: Value = serde_json::from_str(&line).unwrap();
                requests.lock().push(request.clone());

                let out = match handler(&request) {
                    Reply::Result(result) => vec![response(&request["id"], result)],
                    Reply::Error(error) => {
                        vec![json!({"jsonrpc": "2.0", "id": request["id"], "error": error}).to_string()]
                    }
                    Reply::Raw(lines) => lines,
                    Reply::Ignore => Vec::new(),
                    Reply::Shutdown => {
                        stop_accepting.notify_one();
                        return;
                    }
                };

                for line in out {
                    if write_half.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// Accepts TCP connections and holds them open without ever writing, so a
/// TLS handshake against it never completes.
pub struct SilentServer {
    pub port: u16,
    accepted: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl SilentServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));

        let task = {
            let accepted = Arc::clone(&accepted);
            tokio::spawn(async move {
                let mut held = Vec::new();
                while let Ok((socket, _)) = listener.accept().await {
                    accepted.fetch_add(1, Ordering::SeqCst);
                    held.push(socket);
                }
            })
        };

        Self {
            port,
            accepted,
            task,
        }
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl Drop for SilentServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
