//! RESP2 store client.
//!
//! One TCP connection is shared by every task. Requests are funnelled through
//! an mpsc queue into a single driver task that writes frames in order while
//! concurrently pairing replies with waiters FIFO, which is what RESP
//! pipelining guarantees.
//!
//! Mapping onto the store contract:
//! - each bin is stored under the wire key `{namespace}:{set}:{id}:{bin}`
//! - reads are `GET` (nil = record absent)
//! - writes are `SET key value NX` (create only) or `SET key value XX`
//!   (update only); a nil reply means the existence check failed

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use redis_protocol::codec::Resp2;
use redis_protocol::resp2::types::BytesFrame;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tokio_util::codec::Framed;

use crate::store::{
    Bin, ClientPolicy, Connector, Credentials, Key, ReadPolicy, Record, RecordExistsAction,
    StoreConnection, StoreError, StoreTarget, WritePolicy,
};

/// Requests queued ahead of the driver before callers start waiting.
const REQUEST_QUEUE_DEPTH: usize = 1024;

type Reply = oneshot::Sender<Result<BytesFrame, StoreError>>;

struct Request {
    frame: BytesFrame,
    reply: Reply,
}

/// Connects to RESP-speaking stores (HoloStore, Redis, `mem_server`).
#[derive(Clone, Debug, Default)]
pub struct RespConnector;

#[async_trait]
impl Connector for RespConnector {
    type Conn = RespConnection;

    async fn connect(
        &self,
        target: &StoreTarget,
        policy: &ClientPolicy,
    ) -> Result<RespConnection, StoreError> {
        let addr = target.to_string();
        let connect_err = |reason: String| StoreError::Connect {
            addr: addr.clone(),
            reason,
        };

        let socket = time::timeout(
            policy.connect_timeout,
            TcpStream::connect((target.host.as_str(), target.port)),
        )
        .await
        .map_err(|_| connect_err(format!("timed out after {:?}", policy.connect_timeout)))?
        .map_err(|err| connect_err(err.to_string()))?;
        socket.set_nodelay(true).ok();

        let mut framed = Framed::new(socket, Resp2::default());
        if let Some(credentials) = &policy.credentials {
            time::timeout(policy.connect_timeout, authenticate(&mut framed, credentials))
                .await
                .map_err(|_| connect_err("AUTH timed out".to_string()))??;
        }

        Ok(RespConnection::spawn(framed, addr))
    }
}

async fn authenticate(
    framed: &mut Framed<TcpStream, Resp2>,
    credentials: &Credentials,
) -> Result<(), StoreError> {
    let frame = command(&[
        Bytes::from_static(b"AUTH"),
        Bytes::from(credentials.user.clone()),
        Bytes::from(credentials.password.clone()),
    ]);
    framed
        .send(frame)
        .await
        .map_err(|err| StoreError::Auth(err.to_string()))?;
    match framed.next().await {
        Some(Ok(BytesFrame::SimpleString(s))) if s.as_ref() == b"OK" => Ok(()),
        Some(Ok(BytesFrame::Error(err))) => Err(StoreError::Auth(err.to_string())),
        Some(Ok(other)) => Err(StoreError::Protocol(format!("AUTH reply {other:?}"))),
        Some(Err(err)) => Err(StoreError::Auth(err.to_string())),
        None => Err(StoreError::Disconnected),
    }
}

/// Shared handle to one pipelined RESP connection.
pub struct RespConnection {
    tx: mpsc::Sender<Request>,
    connected: Arc<AtomicBool>,
    peer: String,
}

impl RespConnection {
    fn spawn(framed: Framed<TcpStream, Resp2>, peer: String) -> Self {
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let connected = Arc::new(AtomicBool::new(true));
        tokio::spawn(drive(framed, rx, connected.clone(), peer.clone()));
        Self {
            tx,
            connected,
            peer,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    async fn request(
        &self,
        frame: BytesFrame,
        timeout: Duration,
    ) -> Result<BytesFrame, StoreError> {
        let (reply, rx) = oneshot::channel();
        let exchange = async {
            self.tx
                .send(Request { frame, reply })
                .await
                .map_err(|_| StoreError::Disconnected)?;
            rx.await.map_err(|_| StoreError::Disconnected)?
        };
        // A request abandoned here still gets its reply consumed by the driver,
        // so the FIFO pairing stays aligned.
        time::timeout(timeout, exchange)
            .await
            .map_err(|_| StoreError::Timeout(timeout))?
    }
}

#[async_trait]
impl StoreConnection for RespConnection {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    async fn get(
        &self,
        policy: &ReadPolicy,
        key: &Key,
        bins: &[&str],
    ) -> Result<Option<Record>, StoreError> {
        let mut found = Vec::with_capacity(bins.len());
        for bin in bins {
            let frame = command(&[Bytes::from_static(b"GET"), wire_key(key, bin)]);
            let reply = self.request(frame, policy.timeout).await?;
            if let Some(value) = parse_get_reply(reply)? {
                found.push(Bin {
                    name: (*bin).to_string(),
                    value,
                });
            }
        }
        if found.is_empty() {
            return Ok(None);
        }
        Ok(Some(Record {
            key: key.clone(),
            bins: found,
        }))
    }

    async fn put(&self, policy: &WritePolicy, key: &Key, bins: &[Bin]) -> Result<(), StoreError> {
        let condition = match policy.exists {
            RecordExistsAction::CreateOnly => Bytes::from_static(b"NX"),
            RecordExistsAction::UpdateOnly => Bytes::from_static(b"XX"),
        };
        for bin in bins {
            let frame = command(&[
                Bytes::from_static(b"SET"),
                wire_key(key, &bin.name),
                Bytes::from(bin.value.clone()),
                condition.clone(),
            ]);
            let reply = self.request(frame, policy.timeout).await?;
            parse_set_reply(reply, policy.exists)?;
        }
        Ok(())
    }
}

/// Run the connection until the socket breaks or every handle is dropped.
///
/// Writing and reading run concurrently: a large outgoing frame must not stop
/// replies from being consumed, or both peers end up blocked on full socket
/// buffers. Dropping the reader drops every queued waiter, which callers see
/// as [`StoreError::Disconnected`].
async fn drive(
    framed: Framed<TcpStream, Resp2>,
    rx: mpsc::Receiver<Request>,
    connected: Arc<AtomicBool>,
    peer: String,
) {
    let (sink, stream) = framed.split();
    let (waiters_tx, waiters_rx) = mpsc::unbounded_channel();

    let lost = tokio::select! {
        lost = write_requests(sink, rx, waiters_tx) => lost,
        lost = read_replies(stream, waiters_rx) => lost,
    };

    connected.store(false, Ordering::Release);
    if let Some(reason) = lost {
        tracing::warn!(peer = %peer, reason = %reason, "store connection lost");
    }
}

/// Queue each waiter before its frame goes out so a reply always finds it.
async fn write_requests(
    mut sink: SplitSink<Framed<TcpStream, Resp2>, BytesFrame>,
    mut rx: mpsc::Receiver<Request>,
    waiters: mpsc::UnboundedSender<Reply>,
) -> Option<String> {
    while let Some(req) = rx.recv().await {
        if waiters.send(req.reply).is_err() {
            return Some("reply reader stopped".to_string());
        }
        if let Err(err) = sink.send(req.frame).await {
            return Some(format!("send failed: {err}"));
        }
    }
    // All handles dropped.
    None
}

/// Pair replies with waiters in FIFO order.
async fn read_replies(
    mut stream: SplitStream<Framed<TcpStream, Resp2>>,
    mut waiters: mpsc::UnboundedReceiver<Reply>,
) -> Option<String> {
    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => return Some(format!("recv failed: {err}")),
        };
        match waiters.try_recv() {
            // The waiter may have timed out already.
            Ok(reply) => {
                let _ = reply.send(Ok(frame));
            }
            Err(_) => return Some("reply without a pending request".to_string()),
        }
    }
    Some("closed by peer".to_string())
}

fn wire_key(key: &Key, bin: &str) -> Bytes {
    Bytes::from(format!("{key}:{bin}"))
}

/// Build a RESP command array from bulk-string parts.
fn command(parts: &[Bytes]) -> BytesFrame {
    BytesFrame::Array(
        parts
            .iter()
            .cloned()
            .map(BytesFrame::BulkString)
            .collect(),
    )
}

fn parse_get_reply(reply: BytesFrame) -> Result<Option<String>, StoreError> {
    match reply {
        BytesFrame::Null => Ok(None),
        BytesFrame::BulkString(bytes) | BytesFrame::SimpleString(bytes) => {
            Ok(Some(String::from_utf8_lossy(&bytes).to_string()))
        }
        BytesFrame::Error(err) => Err(StoreError::Server(err.to_string())),
        other => Err(StoreError::Protocol(format!("GET reply {other:?}"))),
    }
}

fn parse_set_reply(reply: BytesFrame, exists: RecordExistsAction) -> Result<(), StoreError> {
    match reply {
        BytesFrame::SimpleString(s) if s.as_ref() == b"OK" => Ok(()),
        // Nil means the NX/XX condition did not hold.
        BytesFrame::Null => match exists {
            RecordExistsAction::CreateOnly => Err(StoreError::KeyExists),
            RecordExistsAction::UpdateOnly => Err(StoreError::KeyNotFound),
        },
        BytesFrame::Error(err) => Err(StoreError::Server(err.to_string())),
        other => Err(StoreError::Protocol(format!("SET reply {other:?}"))),
    }
}
