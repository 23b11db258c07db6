//! In-memory RESP store.
//!
//! Serves the subset of Redis the sweep client speaks (`PING`, `AUTH`, `GET`,
//! `SET [NX|XX]`) from a `HashMap`. Integration tests point the real client at
//! it; it also makes a handy local target for smoke runs.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use redis_protocol::codec::Resp2;
use redis_protocol::resp2::types::{BytesFrame, Resp2Frame};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use crate::store::Credentials;

#[derive(Clone, Debug, PartialEq, Eq)]
enum SetCondition {
    Always,
    IfAbsent,
    IfPresent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum KvOp {
    Ping,
    Auth { user: String, password: String },
    Get { key: Vec<u8> },
    Set { key: Vec<u8>, value: Vec<u8>, condition: SetCondition },
}

/// Shared state behind every connection of a [`MemStore`] server.
#[derive(Debug, Default)]
pub struct MemStore {
    data: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    credentials: Option<Credentials>,
    sets: AtomicU64,
    gets: AtomicU64,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `AUTH user password` before any data command.
    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            credentials: Some(credentials),
            ..Self::default()
        }
    }

    pub fn value(&self, key: &str) -> Option<Vec<u8>> {
        self.data.lock().ok()?.get(key.as_bytes()).cloned()
    }

    pub fn len(&self) -> usize {
        self.data.lock().map(|data| data.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of SET commands applied (including failed NX/XX checks).
    pub fn set_count(&self) -> u64 {
        self.sets.load(Ordering::Relaxed)
    }

    pub fn get_count(&self) -> u64 {
        self.gets.load(Ordering::Relaxed)
    }

    fn apply(&self, op: KvOp) -> BytesFrame {
        match op {
            KvOp::Ping => BytesFrame::SimpleString(Bytes::from_static(b"PONG")),
            KvOp::Auth { user, password } => match &self.credentials {
                Some(expected) if expected.user == user && expected.password == password => ok(),
                Some(_) => error("WRONGPASS invalid username-password pair"),
                None => error("ERR AUTH called without any password configured"),
            },
            KvOp::Get { key } => {
                self.gets.fetch_add(1, Ordering::Relaxed);
                let Ok(data) = self.data.lock() else {
                    return error("ERR store poisoned");
                };
                match data.get(&key) {
                    Some(value) => BytesFrame::BulkString(Bytes::from(value.clone())),
                    None => BytesFrame::Null,
                }
            }
            KvOp::Set {
                key,
                value,
                condition,
            } => {
                self.sets.fetch_add(1, Ordering::Relaxed);
                let Ok(mut data) = self.data.lock() else {
                    return error("ERR store poisoned");
                };
                let exists = data.contains_key(&key);
                let allowed = match condition {
                    SetCondition::Always => true,
                    SetCondition::IfAbsent => !exists,
                    SetCondition::IfPresent => exists,
                };
                if !allowed {
                    return BytesFrame::Null;
                }
                data.insert(key, value);
                ok()
            }
        }
    }
}

/// Running server handle; dropping it leaves the server running, call
/// [`MemServer::shutdown`] to stop accepting.
pub struct MemServer {
    pub addr: SocketAddr,
    pub store: Arc<MemStore>,
    task: JoinHandle<()>,
}

impl MemServer {
    /// Bind on `addr` (use port 0 for an ephemeral port) and start serving.
    pub async fn start(addr: SocketAddr, store: Arc<MemStore>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(run(listener, store.clone()));
        Ok(Self { addr, store, task })
    }

    /// Stop accepting new connections. Open connections are left to finish.
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

async fn run(listener: TcpListener, store: Arc<MemStore>) {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                tracing::warn!(error = %err, "mem store accept failed");
                continue;
            }
        };
        let store = store.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_conn(socket, store).await {
                tracing::debug!(peer = %peer, error = ?err, "mem store connection closed");
            }
        });
    }
}

async fn handle_conn(socket: TcpStream, store: Arc<MemStore>) -> anyhow::Result<()> {
    socket.set_nodelay(true).ok();
    let mut framed = Framed::new(socket, Resp2::default());
    let mut authenticated = store.credentials.is_none();

    while let Some(frame) = framed.next().await {
        let frame = frame?;
        let resp = match parse_command(frame) {
            Ok(None) => continue,
            Ok(Some(op)) => match op {
                KvOp::Auth { .. } | KvOp::Ping => {
                    let resp = store.apply(op);
                    if matches!(resp, BytesFrame::SimpleString(ref s) if s.as_ref() == b"OK") {
                        authenticated = true;
                    }
                    resp
                }
                _ if !authenticated => error("NOAUTH Authentication required."),
                op => store.apply(op),
            },
            Err(err) => error(&format!("ERR {err}")),
        };
        framed.send(resp).await?;
    }
    Ok(())
}

fn parse_command(frame: BytesFrame) -> anyhow::Result<Option<KvOp>> {
    let BytesFrame::Array(parts) = frame else {
        anyhow::bail!("expected array frame");
    };

    if parts.is_empty() {
        return Ok(None);
    }

    let cmd = frame_str_upper(&parts[0]).ok_or_else(|| anyhow::anyhow!("invalid command"))?;
    match cmd.as_str() {
        "PING" => Ok(Some(KvOp::Ping)),
        "AUTH" => {
            anyhow::ensure!(parts.len() == 3, "AUTH expects 2 arguments");
            let user = frame_string(&parts[1]).ok_or_else(|| anyhow::anyhow!("invalid user"))?;
            let password =
                frame_string(&parts[2]).ok_or_else(|| anyhow::anyhow!("invalid password"))?;
            Ok(Some(KvOp::Auth { user, password }))
        }
        "GET" => {
            anyhow::ensure!(parts.len() == 2, "GET expects 1 argument");
            let key = frame_bytes(&parts[1]).ok_or_else(|| anyhow::anyhow!("invalid key"))?;
            Ok(Some(KvOp::Get { key }))
        }
        "SET" => {
            anyhow::ensure!(
                parts.len() == 3 || parts.len() == 4,
                "SET expects 2 or 3 arguments"
            );
            let key = frame_bytes(&parts[1]).ok_or_else(|| anyhow::anyhow!("invalid key"))?;
            let value = frame_bytes(&parts[2]).ok_or_else(|| anyhow::anyhow!("invalid value"))?;
            let condition = match parts.get(3).map(frame_str_upper) {
                None => SetCondition::Always,
                Some(Some(flag)) if flag == "NX" => SetCondition::IfAbsent,
                Some(Some(flag)) if flag == "XX" => SetCondition::IfPresent,
                Some(_) => anyhow::bail!("syntax error"),
            };
            Ok(Some(KvOp::Set {
                key,
                value,
                condition,
            }))
        }
        other => anyhow::bail!("unknown command {other}"),
    }
}

fn ok() -> BytesFrame {
    BytesFrame::SimpleString(Bytes::from_static(b"OK"))
}

fn error(msg: &str) -> BytesFrame {
    BytesFrame::Error(msg.to_string().into())
}

fn frame_str_upper(frame: &BytesFrame) -> Option<String> {
    frame.as_str().map(|s| s.to_ascii_uppercase())
}

fn frame_string(frame: &BytesFrame) -> Option<String> {
    frame.as_str().map(str::to_string)
}

fn frame_bytes(frame: &BytesFrame) -> Option<Vec<u8>> {
    match frame {
        BytesFrame::BulkString(b) | BytesFrame::SimpleString(b) => Some(b.to_vec()),
        _ => None,
    }
}
