//! sync/client.rs
use std::{
    fmt,
    net::SocketAddr,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::{
    sync::{mpsc, watch},
    time::{self, Instant},
};
use uuid::Uuid;

use super::{
    message::{parse_frame, FrameErr, Message},
    room::Room,
    Heartbeat,
};

type WsStream = Pin<Box<dyn Stream<Item = Result<WsMessage, axum::Error>> + Send>>;
type WsSink = Pin<Box<dyn Sink<WsMessage, Error = axum::Error> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self { Self(Uuid::new_v4()) }
}

impl Default for ClientId {
    fn default() -> Self { Self::new() }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
}

/* ------------ 連線 (兩半) ------------ */
/// Both halves of a viewer's transport.
pub struct Conn {
    stream: WsStream,
    sink:   WsSink,
    remote: Option<SocketAddr>,
}

impl Conn {
    pub fn new<S, K>(stream: S, sink: K) -> Self
    where
        S: Stream<Item = Result<WsMessage, axum::Error>> + Send + 'static,
        K: Sink<WsMessage, Error = axum::Error> + Send + 'static,
    {
        Self { stream: Box::pin(stream), sink: Box::pin(sink), remote: None }
    }

    pub fn from_socket(ws: WebSocket, remote: SocketAddr) -> Self {
        let (sink, stream) = ws.split();
        Self { remote: Some(remote), ..Self::new(stream, sink) }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum EnqueueErr {
    /// queue saturated: the peer stopped reading
    Full,
    Closed,
}

/// One viewer's session inside exactly one room.
pub struct Client {
    id:        ClientId,
    room:      Arc<Room>,
    remote:    Option<SocketAddr>,
    heartbeat: Heartbeat,
    outbound:  Mutex<Option<mpsc::Sender<Arc<Message>>>>,
    // transport + queue receiver, parked until the room starts the loops
    pending:   Mutex<Option<(Conn, mpsc::Receiver<Arc<Message>>)>>,
    closed:    AtomicBool,
    shutdown:  watch::Sender<bool>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

// the watch guard is dropped here, never held across the caller's awaits
async fn signalled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|c| *c).await;
}

impl Client {
    pub fn new(room: Arc<Room>, conn: Conn) -> Arc<Self> {
        let cfg = *room.config();
        let (tx, rx) = mpsc::channel(cfg.client_queue.max(1));
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            id: ClientId::new(),
            remote: conn.remote,
            heartbeat: cfg.heartbeat,
            room,
            outbound: Mutex::new(Some(tx)),
            pending: Mutex::new(Some((conn, rx))),
            closed: AtomicBool::new(false),
            shutdown,
        })
    }

    pub fn id(&self) -> ClientId { self.id }

    pub fn room(&self) -> &Arc<Room> { &self.room }

    pub fn is_closed(&self) -> bool { self.closed.load(Ordering::Acquire) }

    /// Non-blocking push onto the outbound queue.
    pub fn enqueue(&self, msg: Arc<Message>) -> Result<(), EnqueueErr> {
        let guard = lock(&self.outbound);
        let Some(tx) = guard.as_ref() else { return Err(EnqueueErr::Closed) };
        tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_)   => EnqueueErr::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueErr::Closed,
        })
    }

    /// Spawn the read and write loops. Only the first call does anything.
    pub(crate) fn start(self: &Arc<Self>) -> bool {
        let Some((conn, rx)) = lock(&self.pending).take() else { return false };
        if self.is_closed() {
            return false;
        }
        tokio::spawn(self.clone().read_loop(conn.stream));
        tokio::spawn(self.clone().write_loop(conn.sink, rx));
        true
    }

    /// Take the transport back from a client that was never started, so it
    /// can join another room. `None` once started or closed.
    pub(crate) fn reclaim(&self) -> Option<Conn> {
        if self.is_closed() {
            return None;
        }
        let conn = lock(&self.pending).take().map(|(conn, _)| conn);
        self.close();
        conn
    }

    /// Close the outbound queue and the transport.
    ///
    /// Safe to call from any loop or from the room; returns `true` only for
    /// the call that actually closed.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        lock(&self.outbound).take();
        // never started: dropping the parked halves drops the socket
        lock(&self.pending).take();
        self.shutdown.send_replace(true);
        true
    }

    /* ---------------- inbound ---------------- */
    async fn read_loop(self: Arc<Self>, mut stream: WsStream) {
        let mut shutdown = self.shutdown.subscribe();
        let pong_wait = self.heartbeat.pong_wait;
        let mut deadline = Instant::now() + pong_wait;

        loop {
            let next = tokio::select! {
                _ = signalled(&mut shutdown) => break,
                r = time::timeout_at(deadline, stream.next()) => r,
            };
            let frame = match next {
                Err(_) => {
                    tracing::info!(client = %self.id, room = %self.room.key(), "heartbeat timeout");
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    tracing::warn!(client = %self.id, remote = ?self.remote, error = %e, "read error");
                    break;
                }
                Ok(Some(Ok(f))) => f,
            };
            deadline = Instant::now() + pong_wait;

            match frame {
                WsMessage::Text(raw) => {
                    if !self.relay(&raw) {
                        break;
                    }
                }
                WsMessage::Binary(_) => {
                    tracing::warn!(client = %self.id, "binary frame dropped");
                }
                WsMessage::Ping(_) | WsMessage::Pong(_) => {}
                WsMessage::Close(_) => break,
            }
        }

        self.room.evict(self.id).await;
        self.close();
        tracing::info!(client = %self.id, room = %self.room.key(), remote = ?self.remote, "client disconnected");
    }

    // false when the room is gone
    fn relay(&self, raw: &str) -> bool {
        match parse_frame(raw, self.id) {
            Ok(msg) => self.room.submit(msg),
            Err(FrameErr::Malformed(e)) => {
                tracing::warn!(client = %self.id, error = %e, data = raw, "invalid JSON");
                true
            }
            Err(e) => {
                tracing::warn!(client = %self.id, error = %e, "frame discarded");
                true
            }
        }
    }

    /* ---------------- outbound ---------------- */
    async fn write_loop(self: Arc<Self>, mut sink: WsSink, mut rx: mpsc::Receiver<Arc<Message>>) {
        let mut shutdown = self.shutdown.subscribe();
        let Heartbeat { ping_period, write_wait, .. } = self.heartbeat;
        let mut ticker = time::interval_at(Instant::now() + ping_period, ping_period);

        loop {
            tokio::select! {
                biased;
                _ = signalled(&mut shutdown) => {
                    let _ = time::timeout(write_wait, sink.send(WsMessage::Close(None))).await;
                    break;
                }
                next = rx.recv() => {
                    let Some(msg) = next else { break };
                    let data = match msg.to_json() {
                        Ok(d) => d,
                        Err(e) => {
                            tracing::error!(error = %e, "failed to encode message");
                            continue;
                        }
                    };
                    if !matches!(time::timeout(write_wait, sink.send(WsMessage::Text(data))).await, Ok(Ok(()))) {
                        tracing::debug!(client = %self.id, "write failed");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if !matches!(time::timeout(write_wait, sink.send(WsMessage::Ping(Vec::new()))).await, Ok(Ok(()))) {
                        tracing::debug!(client = %self.id, "ping failed");
                        break;
                    }
                }
            }
        }

        self.close();
    }
}
