//! sync/room.rs
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use tokio::sync::{mpsc, oneshot, watch};

use super::{
    client::{Client, ClientId, Conn, EnqueueErr},
    message::Message,
    SyncConfig, SyncError,
};

/// `Running -> Draining -> Closed`, never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    Running,
    Draining,
    Closed,
}

enum Request {
    /// answered `true` once the client is a member and its loops run
    Admit(Arc<Client>, oneshot::Sender<bool>),
    Evict(ClientId),
    Broadcast(Arc<Message>),
}

/// An isolated broadcast domain.
///
/// The member set is owned by the event loop spawned in [`Room::spawn`];
/// admissions, evictions and broadcasts all go through one queue and are
/// handled in arrival order.
pub struct Room {
    key:       String,
    cfg:       SyncConfig,
    requests:  mpsc::Sender<Request>,
    lifecycle: watch::Sender<RoomState>,
    count:     AtomicUsize,
    torn_down: AtomicBool,
}

impl Room {
    pub(crate) fn spawn(key: String, cfg: SyncConfig) -> Arc<Self> {
        let (requests, rx) = mpsc::channel(cfg.room_queue.max(1));
        let (lifecycle, _) = watch::channel(RoomState::Running);
        let room = Arc::new(Self {
            key,
            cfg,
            requests,
            lifecycle,
            count: AtomicUsize::new(0),
            torn_down: AtomicBool::new(false),
        });
        tokio::spawn(room.clone().run(rx));
        room
    }

    pub fn key(&self) -> &str { &self.key }

    pub fn config(&self) -> &SyncConfig { &self.cfg }

    pub fn state(&self) -> RoomState { *self.lifecycle.borrow() }

    pub fn is_running(&self) -> bool { self.state() == RoomState::Running }

    /// Members as of the last request the loop finished.
    pub fn client_count(&self) -> usize { self.count.load(Ordering::Acquire) }

    /// Hand a client to the loop and wait until it is a member.
    ///
    /// Fails with `RoomClosed` when teardown begins before the loop gets to
    /// it; the client is then left untouched so its transport can be
    /// reclaimed for another room.
    pub async fn admit(&self, client: Arc<Client>) -> Result<(), SyncError> {
        if !std::ptr::eq(Arc::as_ptr(client.room()), self) {
            return Err(SyncError::ForeignClient);
        }
        if !self.is_running() {
            return Err(SyncError::RoomClosed);
        }
        let (ack, joined) = oneshot::channel();
        self.requests
            .send(Request::Admit(client, ack))
            .await
            .map_err(|_| SyncError::RoomClosed)?;
        match joined.await {
            Ok(true) => Ok(()),
            _ => Err(SyncError::RoomClosed),
        }
    }

    /// Wrap `conn` in a new client of this room and admit it.
    pub async fn connect(self: &Arc<Self>, conn: Conn) -> Result<Arc<Client>, SyncError> {
        let client = Client::new(self.clone(), conn);
        if let Err(e) = self.admit(client.clone()).await {
            client.close();
            return Err(e);
        }
        Ok(client)
    }

    /// Ask the loop to drop `id`. No-op if it is not a member or the room is gone.
    pub async fn evict(&self, id: ClientId) {
        let _ = self.requests.send(Request::Evict(id)).await;
    }

    /// Queue `msg` for everyone but its origin without waiting.
    ///
    /// Lossy under overload: a full room queue drops the message and the
    /// sender stays connected. Only a full outbound queue disconnects.
    /// Returns `false` once the room no longer takes requests.
    pub fn submit(&self, msg: Message) -> bool {
        match self.requests.try_send(Request::Broadcast(Arc::new(msg))) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(room = %self.key, "room queue full, message dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Start teardown. Idempotent.
    pub fn cancel(&self) {
        self.lifecycle.send_if_modified(|s| {
            if *s == RoomState::Running {
                *s = RoomState::Draining;
                true
            } else {
                false
            }
        });
    }

    /// Resolves once teardown has finished.
    pub async fn closed(&self) {
        let mut rx = self.lifecycle.subscribe();
        let _ = rx.wait_for(|s| *s == RoomState::Closed).await;
    }

    /* ---------------- event loop ---------------- */
    async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<Request>) {
        let mut members: HashMap<ClientId, Arc<Client>> = HashMap::new();
        let mut lifecycle = self.lifecycle.subscribe();

        loop {
            tokio::select! {
                biased;
                _ = cancelled(&mut lifecycle) => break,
                req = rx.recv() => match req {
                    Some(Request::Admit(c, ack)) => {
                        let _ = ack.send(self.admit_member(&mut members, c));
                    }
                    Some(Request::Evict(id))    => self.remove_member(&mut members, id),
                    Some(Request::Broadcast(m)) => self.broadcast(&mut members, m),
                    None => break,
                },
            }
        }

        self.teardown(&mut members, &mut rx);
    }

    fn admit_member(&self, members: &mut HashMap<ClientId, Arc<Client>>, client: Arc<Client>) -> bool {
        let id = client.id();
        if members.contains_key(&id) {
            return true;
        }
        if client.is_closed() {
            return false;
        }
        members.insert(id, client.clone());
        self.count.store(members.len(), Ordering::Release);
        client.start();
        tracing::info!(room = %self.key, client = %id, clients = members.len(), "client connected");
        true
    }

    fn remove_member(&self, members: &mut HashMap<ClientId, Arc<Client>>, id: ClientId) {
        let Some(client) = members.remove(&id) else { return };
        client.close();
        self.count.store(members.len(), Ordering::Release);
        tracing::debug!(room = %self.key, client = %id, clients = members.len(), "client evicted");

        if members.is_empty() {
            self.cancel();
        }
    }

    fn broadcast(&self, members: &mut HashMap<ClientId, Arc<Client>>, msg: Arc<Message>) {
        let mut dead = Vec::new();
        for (id, client) in members.iter() {
            if msg.origin == Some(*id) {
                continue;
            }
            match client.enqueue(msg.clone()) {
                Ok(()) => {}
                Err(EnqueueErr::Full) => {
                    tracing::warn!(room = %self.key, client = %id, "outbound queue full, disconnecting");
                    dead.push(*id);
                }
                Err(EnqueueErr::Closed) => dead.push(*id),
            }
        }
        for id in dead {
            self.remove_member(members, id);
        }
    }

    fn teardown(&self, members: &mut HashMap<ClientId, Arc<Client>>, rx: &mut mpsc::Receiver<Request>) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel();

        let count = members.len();
        for client in members.values() {
            client.close();
        }
        members.clear();
        self.count.store(0, Ordering::Release);

        // admissions queued behind the last eviction are refused: dropping
        // the ack tells `admit` to report RoomClosed
        rx.close();
        while rx.try_recv().is_ok() {}

        self.lifecycle.send_replace(RoomState::Closed);
        tracing::info!(room = %self.key, clients = count, "room closed");
    }
}

async fn cancelled(rx: &mut watch::Receiver<RoomState>) {
    let _ = rx.wait_for(|s| *s != RoomState::Running).await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::extract::ws::Message as WsMessage;
    use futures_util::{future, sink, stream};
    use serde_json::Value;

    use super::*;
    use crate::sync::{testing::pipe, Command, Hub};

    fn room(key: &str) -> Arc<Room> {
        Room::spawn(key.to_string(), SyncConfig::default())
    }

    // reads nothing, never finishes a write
    fn stuck() -> Conn {
        let sink = sink::unfold((), |(), _m: WsMessage| future::pending::<Result<(), axum::Error>>());
        Conn::new(stream::pending(), sink)
    }

    async fn settle(room: &Room, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while room.client_count() != n {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn seek_reaches_peer_but_not_sender() {
        let room = room("r1");
        let (a, mut peer_a) = pipe();
        let (b, mut peer_b) = pipe();
        room.connect(a).await.unwrap();
        room.connect(b).await.unwrap();
        settle(&room, 2).await;

        peer_a.send_text(r#"{"type":"seek","time":42.5}"#);

        let got = peer_b.next_text().await.unwrap();
        let v: Value = serde_json::from_str(&got).unwrap();
        assert_eq!(v["type"], "seek");
        assert_eq!(v["time"], 42.5);
        assert!(v["timestamp"].is_string());

        // one more round trip so anything stray for A would have arrived
        peer_b.send_text(r#"{"type":"play"}"#);
        let back = peer_a.next_text().await.unwrap();
        assert!(back.contains(r#""type":"play""#));
        assert!(peer_a.rx.try_recv().is_err());
        assert!(peer_b.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_and_error_frames_are_not_forwarded() {
        let room = room("r2");
        let (a, peer_a) = pipe();
        let (b, mut peer_b) = pipe();
        room.connect(a).await.unwrap();
        room.connect(b).await.unwrap();
        settle(&room, 2).await;

        peer_a.send_text(r#"{"type":"rewind","time":1}"#);
        peer_a.send_text(r#"{"type":"error"}"#);
        peer_a.send_text("{oops");
        peer_a.send_text(r#"{"type":"pause","time":3}"#);

        let got = peer_b.next_text().await.unwrap();
        assert!(got.contains(r#""type":"pause""#));
        assert_eq!(room.client_count(), 2);
    }

    #[tokio::test]
    async fn saturated_client_is_evicted_without_stalling_others() {
        let room = room("r3");
        let (a, peer_a) = pipe();
        let (b, mut peer_b) = pipe();
        room.connect(a).await.unwrap();
        room.connect(b).await.unwrap();
        let slow = room.connect(stuck()).await.unwrap();
        settle(&room, 3).await;

        // B keeps up one message at a time; only the stuck client backs up
        let sends = room.config().client_queue + 2;
        for i in 0..sends {
            peer_a.send_text(&format!(r#"{{"type":"sync","time":{i}}}"#));
            let got = peer_b.next_text().await.unwrap();
            let v: Value = serde_json::from_str(&got).unwrap();
            assert_eq!(v["time"], i as f64);
        }
        settle(&room, 2).await;

        assert!(slow.is_closed());
        assert_eq!(room.client_count(), 2);
        assert!(room.is_running());
    }

    #[tokio::test]
    async fn last_eviction_closes_the_room() {
        let room = room("r4");
        let (a, peer_a) = pipe();
        let client = room.connect(a).await.unwrap();
        settle(&room, 1).await;

        drop(peer_a);
        room.closed().await;

        assert_eq!(room.state(), RoomState::Closed);
        assert_eq!(room.client_count(), 0);
        assert!(client.is_closed());

        let (late, _peer) = pipe();
        assert_eq!(room.connect(late).await.err(), Some(SyncError::RoomClosed));
    }

    #[tokio::test]
    async fn admission_behind_last_eviction_is_refused() {
        let room = room("r4b");
        let (a, _peer_a) = pipe();
        let a = room.connect(a).await.unwrap();

        room.evict(a.id()).await;
        let (b, _peer_b) = pipe();
        assert_eq!(room.connect(b).await.err(), Some(SyncError::RoomClosed));

        room.closed().await;
        assert_eq!(room.client_count(), 0);
    }

    #[tokio::test]
    async fn full_room_queue_drops_message_but_keeps_sender() {
        let cfg = SyncConfig { room_queue: 1, ..SyncConfig::default() };
        let room = Room::spawn("r7".to_string(), cfg);
        let (a, _peer_a) = pipe();
        let a = room.connect(a).await.unwrap();

        let msg = |t| Message { origin: Some(a.id()), ..Message::new(Command::Seek, Some(t)) };
        assert!(room.submit(msg(1.0)));
        assert!(room.submit(msg(2.0)));
        assert!(room.submit(msg(3.0)));

        tokio::task::yield_now().await;
        assert_eq!(room.client_count(), 1);
        assert!(!a.is_closed());
        assert!(room.is_running());
    }

    #[tokio::test]
    async fn redundant_evictions_are_harmless() {
        let room = room("r5");
        let (a, _peer_a) = pipe();
        let (b, _peer_b) = pipe();
        let a = room.connect(a).await.unwrap();
        room.connect(b).await.unwrap();
        settle(&room, 2).await;

        room.evict(a.id()).await;
        room.evict(a.id()).await;
        room.evict(ClientId::new()).await;
        settle(&room, 1).await;

        assert!(a.is_closed());
        assert!(room.is_running());
    }

    #[tokio::test]
    async fn cancel_tears_down_every_member() {
        let room = room("r6");
        let mut peers = Vec::new();
        let mut clients = Vec::new();
        for _ in 0..3 {
            let (conn, peer) = pipe();
            clients.push(room.connect(conn).await.unwrap());
            peers.push(peer);
        }
        settle(&room, 3).await;

        room.cancel();
        room.cancel();
        room.closed().await;

        assert!(clients.iter().all(|c| c.is_closed()));
        for peer in &mut peers {
            assert_eq!(peer.next_text().await, None);
        }
    }

    #[tokio::test]
    async fn client_of_another_room_is_refused() {
        let hub = Hub::new(SyncConfig::default());
        let one = hub.resolve_room("one").await.unwrap();
        let two = hub.resolve_room("two").await.unwrap();
        let (conn, _peer) = pipe();
        let stray = Client::new(one, conn);

        assert_eq!(two.admit(stray).await, Err(SyncError::ForeignClient));
    }
}
