//! Real-time playback sync.
//!
//! ```text
//!   Hub ──key──► Room (one event loop) ──► Client ─┬─ read loop  ──► Room::submit
//!                                                  └─ write loop ◄── outbound queue
//! ```
//!
//! A room's member set lives only inside its event loop. Everything else talks
//! to the loop through its request queue.
use std::time::Duration;

pub mod client;
pub mod hub;
pub mod message;
pub mod room;

pub use client::{Client, ClientId, Conn};
pub use hub::Hub;
pub use message::{Command, Message};
pub use room::{Room, RoomState};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("room key must not be empty")]
    EmptyKey,
    #[error("room is closed")]
    RoomClosed,
    #[error("client belongs to another room")]
    ForeignClient,
}

/// Liveness timings for every connection.
#[derive(Debug, Clone, Copy)]
pub struct Heartbeat {
    /// interval between pings, independent of traffic
    pub ping_period: Duration,
    /// read deadline, refreshed by any inbound frame (pongs included)
    pub pong_wait: Duration,
    /// deadline for a single write
    pub write_wait: Duration,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            ping_period: Duration::from_secs(25),
            pong_wait: Duration::from_secs(30),
            write_wait: Duration::from_secs(10),
        }
    }
}

/// Everything the hub hands to the rooms it creates.
#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    pub heartbeat: Heartbeat,
    /// per-client outbound queue
    pub client_queue: usize,
    /// per-room request queue
    pub room_queue: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { heartbeat: Heartbeat::default(), client_queue: 10, room_queue: 64 }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transport standing in for a WebSocket.
    use axum::extract::ws::Message as WsMessage;
    use futures_util::{sink, stream};
    use tokio::sync::mpsc;

    use super::Conn;

    /// The far end of a [`Conn`]: what a browser would hold.
    pub struct Peer {
        pub tx: mpsc::UnboundedSender<Result<WsMessage, axum::Error>>,
        pub rx: mpsc::UnboundedReceiver<WsMessage>,
    }

    impl Peer {
        pub fn send_text(&self, raw: &str) {
            let _ = self.tx.send(Ok(WsMessage::Text(raw.to_string())));
        }

        /// Next text frame, skipping pings.
        pub async fn next_text(&mut self) -> Option<String> {
            while let Some(m) = self.rx.recv().await {
                match m {
                    WsMessage::Text(t) => return Some(t),
                    WsMessage::Close(_) => return None,
                    _ => continue,
                }
            }
            None
        }
    }

    pub fn pipe() -> (Conn, Peer) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel::<WsMessage>();

        let stream = stream::unfold(in_rx, |mut rx| async move {
            rx.recv().await.map(|m| (m, rx))
        });
        let sink = sink::unfold(out_tx, |tx, m: WsMessage| async move {
            tx.send(m).map_err(axum::Error::new)?;
            Ok::<_, axum::Error>(tx)
        });

        (Conn::new(stream, sink), Peer { tx: in_tx, rx: out_rx })
    }
}
