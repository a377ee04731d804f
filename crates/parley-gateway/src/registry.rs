use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use parley_types::frames::ServerFrame;

/// One live connection inside a room. Frames go through an unbounded
/// channel so a slow peer can never block the sender's task.
#[derive(Clone)]
struct RoomHandle {
    conn_id: Uuid,
    tx: mpsc::UnboundedSender<ServerFrame>,
}

/// In-memory map of room → participant → live handle: the sole source of
/// "who is online in this room right now". Injected into every connection
/// task; process-scoped, rebuilt empty on restart.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    rooms: RwLock<HashMap<String, HashMap<i64, RoomHandle>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner { rooms: RwLock::new(HashMap::new()) }),
        }
    }

    /// Register a (room, participant) handle, silently replacing any prior
    /// one for the same key. Returns the connection id and the frame
    /// receiver; the id lets a stale connection's cleanup recognise that a
    /// newer connection has taken over.
    pub async fn register(
        &self,
        room: &str,
        participant: i64,
    ) -> (Uuid, mpsc::UnboundedReceiver<ServerFrame>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut rooms = self.inner.rooms.write().await;
        rooms
            .entry(room.to_string())
            .or_default()
            .insert(participant, RoomHandle { conn_id, tx });
        (conn_id, rx)
    }

    /// Remove the entry, but only if `conn_id` still owns it. Drops the
    /// room map entry entirely once the room is empty, so churned rooms do
    /// not accumulate.
    pub async fn unregister(&self, room: &str, participant: i64, conn_id: Uuid) {
        let mut rooms = self.inner.rooms.write().await;
        let Some(handles) = rooms.get_mut(room) else { return };
        if handles.get(&participant).is_some_and(|h| h.conn_id == conn_id) {
            handles.remove(&participant);
        }
        if handles.is_empty() {
            rooms.remove(room);
        }
    }

    /// Best-effort fan-out to everyone currently in the room. A handle
    /// whose receiver is gone is skipped; the message is already durable,
    /// so a transient miss is recovered by history replay on reconnect.
    pub async fn broadcast(&self, room: &str, frame: ServerFrame) {
        let handles: Vec<RoomHandle> = {
            let rooms = self.inner.rooms.read().await;
            match rooms.get(room) {
                Some(map) => map.values().cloned().collect(),
                None => return,
            }
        };
        for handle in handles {
            let _ = handle.tx.send(frame.clone());
        }
    }

    /// Targeted best-effort send to one participant of a room.
    pub async fn send_to(&self, room: &str, participant: i64, frame: ServerFrame) -> bool {
        let rooms = self.inner.rooms.read().await;
        rooms
            .get(room)
            .and_then(|map| map.get(&participant))
            .is_some_and(|h| h.tx.send(frame).is_ok())
    }

    pub async fn is_registered(&self, room: &str, participant: i64) -> bool {
        let rooms = self.inner.rooms.read().await;
        rooms.get(room).is_some_and(|map| map.contains_key(&participant))
    }

    /// Participants currently connected to a room.
    pub async fn occupants(&self, room: &str) -> Vec<i64> {
        let rooms = self.inner.rooms.read().await;
        rooms
            .get(room)
            .map(|map| map.keys().copied().collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) async fn room_count(&self) -> usize {
        self.inner.rooms.read().await.len()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
