//! sync/hub.rs
use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;

use super::{
    client::{Client, Conn},
    room::Room,
    SyncConfig, SyncError,
};

type RoomMap = Arc<RwLock<HashMap<String, Arc<Room>>>>;

/// Directory of live rooms. Cheap to clone; clones share the directory.
#[derive(Clone)]
pub struct Hub {
    rooms: RoomMap,
    cfg:   SyncConfig,
}

impl Hub {
    pub fn new(cfg: SyncConfig) -> Self {
        Self { rooms: RoomMap::default(), cfg }
    }

    /// Existing live room for `key`, or a freshly started one.
    ///
    /// Check and insert happen under one write lock, so concurrent first
    /// lookups for the same key all get the same room.
    pub async fn resolve_room(&self, key: &str) -> Result<Arc<Room>, SyncError> {
        if key.is_empty() {
            return Err(SyncError::EmptyKey);
        }

        if let Some(room) = self.rooms.read().await.get(key) {
            if room.is_running() {
                return Ok(room.clone());
            }
        }

        let mut m = self.rooms.write().await;
        if let Some(room) = m.get(key) {
            if room.is_running() {
                return Ok(room.clone());
            }
        }

        // a draining room may still be listed until its watcher runs
        let room = Room::spawn(key.to_string(), self.cfg);
        m.insert(key.to_string(), room.clone());
        drop(m);

        tokio::spawn(self.clone().forget_when_closed(room.clone()));
        tracing::debug!(room = key, "room created");
        Ok(room)
    }

    /// Resolve `key` and admit `conn` there.
    ///
    /// A room can close between lookup and admission (its last viewer left
    /// first); the transport is then taken back and offered to the fresh
    /// room once.
    pub async fn connect(&self, key: &str, mut conn: Conn) -> Result<(Arc<Room>, Arc<Client>), SyncError> {
        for _ in 0..2 {
            let room = self.resolve_room(key).await?;
            let client = Client::new(room.clone(), conn);
            match room.admit(client.clone()).await {
                Ok(()) => return Ok((room, client)),
                Err(SyncError::RoomClosed) => match client.reclaim() {
                    Some(c) => conn = c,
                    None => break,
                },
                Err(e) => {
                    client.close();
                    return Err(e);
                }
            }
            tracing::debug!(room = key, "room closed during admission, retrying");
        }
        Err(SyncError::RoomClosed)
    }

    /// Live room for `key` without creating one.
    pub async fn get(&self, key: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(key).filter(|r| r.is_running()).cloned()
    }

    /// Live rooms; entries already draining are not counted.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.values().filter(|r| r.is_running()).count()
    }

    /// Cancel every room and wait for each teardown.
    pub async fn shutdown(&self) {
        let rooms: Vec<_> = self.rooms.read().await.values().cloned().collect();
        for room in &rooms {
            room.cancel();
        }
        for room in &rooms {
            room.closed().await;
        }
        tracing::info!(rooms = rooms.len(), "hub shut down");
    }

    async fn forget_when_closed(self, room: Arc<Room>) {
        room.closed().await;
        let mut m = self.rooms.write().await;
        // only our entry: the key may already point at a newer room
        if m.get(room.key()).is_some_and(|r| Arc::ptr_eq(r, &room)) {
            m.remove(room.key());
            tracing::info!(room = room.key(), "room removed from hub");
        }
    }
}
