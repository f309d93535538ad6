//! Resource mirror: the client's copy of one location's rooms
//!
//! Rooms are keyed by id. A full load replaces everything; a point update
//! swaps whole rooms whose id is already known and never merges fields.
//! Every mutation that changes state bumps the version and notifies
//! subscribers with the full current room list and a fresh summary.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::network::directory::{self, Link};
use crate::occupancy::{self, OccupancySummary};
use crate::types::{Building, Room, RoomId};

/// What a mirror mutation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorChange {
    Reloaded,
    Updated(Vec<RoomId>),
}

/// Change notification delivered to subscribers.
#[derive(Debug, Clone)]
pub struct MirrorUpdate {
    pub change: MirrorChange,
    pub rooms: Vec<Room>,
    pub summary: OccupancySummary,
    pub version: u64,
}

type Listener = dyn Fn(&MirrorUpdate) + Send + Sync;

#[derive(Default)]
struct MirrorState {
    location: Option<String>,
    full_name: String,
    default_capacity: u32,
    links: Vec<Link>,
    rooms: Vec<Room>,
    index: HashMap<RoomId, usize>,
    version: u64,
}

impl MirrorState {
    fn snapshot(&self, change: MirrorChange) -> MirrorUpdate {
        MirrorUpdate {
            change,
            rooms: self.rooms.clone(),
            summary: occupancy::summarize(&self.rooms),
            version: self.version,
        }
    }
}

/// In-memory copy of one location.
pub struct ResourceMirror {
    state: RwLock<MirrorState>,
    listeners: RwLock<HashMap<Uuid, Arc<Listener>>>,
    updates_tx: broadcast::Sender<MirrorUpdate>,
}

impl Default for ResourceMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceMirror {
    pub fn new() -> Self {
        let (updates_tx, _) = broadcast::channel(64);
        Self {
            state: RwLock::new(MirrorState::default()),
            listeners: RwLock::new(HashMap::new()),
            updates_tx,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, MirrorState> {
        match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, MirrorState> {
        match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Replace the whole room list with `building`'s.
    pub fn load_full(&self, building: Building) {
        let update = {
            let mut state = self.write();
            let mut rooms = Vec::with_capacity(building.rooms.len());
            let mut index = HashMap::with_capacity(building.rooms.len());
            for room in building.rooms {
                if index.contains_key(&room.room_id) {
                    log::warn!(
                        "Building {} lists room {} twice, keeping the first",
                        building.location,
                        room.room_id
                    );
                    continue;
                }
                index.insert(room.room_id, rooms.len());
                rooms.push(room);
            }

            state.location = Some(building.location);
            state.full_name = building.location_full_name;
            state.default_capacity = building.default_capacity;
            state.links = building.links;
            state.rooms = rooms;
            state.index = index;
            state.version += 1;
            log::debug!(
                "Mirror loaded {} rooms for {:?} (v{})",
                state.rooms.len(),
                state.location,
                state.version
            );
            state.snapshot(MirrorChange::Reloaded)
        };
        self.notify(update);
    }

    /// Replace each known room with the snapshot carrying its id.
    ///
    /// Ids not in the mirror are ignored. Returns the ids whose content
    /// actually changed; subscribers hear nothing when that is empty, so
    /// applying the same payload twice is a no-op the second time.
    pub fn apply_point_updates(&self, rooms: Vec<Room>) -> Vec<RoomId> {
        let update = {
            let mut state = self.write();
            let mut changed = Vec::new();
            for room in rooms {
                let Some(&slot) = state.index.get(&room.room_id) else {
                    log::debug!("Ignoring update for unknown room {}", room.room_id);
                    continue;
                };
                if state.rooms[slot] != room {
                    changed.push(room.room_id);
                    state.rooms[slot] = room;
                }
            }
            if changed.is_empty() {
                return changed;
            }
            state.version += 1;
            state.snapshot(MirrorChange::Updated(changed))
        };

        let changed = match &update.change {
            MirrorChange::Updated(ids) => ids.clone(),
            MirrorChange::Reloaded => Vec::new(),
        };
        self.notify(update);
        changed
    }

    fn notify(&self, update: MirrorUpdate) {
        let listeners: Vec<Arc<Listener>> = match self.listeners.read() {
            Ok(guard) => guard.values().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
        };
        for listener in listeners {
            listener(&update);
        }
        let _ = self.updates_tx.send(update);
    }

    /// Register a change callback. It runs on the mutating task after the
    /// new state is visible.
    pub fn subscribe<F>(&self, listener: F) -> Uuid
    where
        F: Fn(&MirrorUpdate) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        let listener: Arc<Listener> = Arc::new(listener);
        match self.listeners.write() {
            Ok(mut guard) => guard.insert(id, listener),
            Err(poisoned) => poisoned.into_inner().insert(id, listener),
        };
        id
    }

    pub fn unsubscribe(&self, id: &Uuid) -> bool {
        match self.listeners.write() {
            Ok(mut guard) => guard.remove(id).is_some(),
            Err(poisoned) => poisoned.into_inner().remove(id).is_some(),
        }
    }

    /// Change notifications as a broadcast stream.
    pub fn updates(&self) -> broadcast::Receiver<MirrorUpdate> {
        self.updates_tx.subscribe()
    }

    pub fn get(&self, id: RoomId) -> Option<Room> {
        let state = self.read();
        state.index.get(&id).map(|&slot| state.rooms[slot].clone())
    }

    /// Rooms for `ids`, in the same order, all read under one lock.
    pub fn get_many<I>(&self, ids: I) -> Vec<Option<Room>>
    where
        I: IntoIterator<Item = RoomId>,
    {
        let state = self.read();
        ids.into_iter()
            .map(|id| state.index.get(&id).map(|&slot| state.rooms[slot].clone()))
            .collect()
    }

    pub fn contains(&self, id: RoomId) -> bool {
        self.read().index.contains_key(&id)
    }

    pub fn rooms(&self) -> Vec<Room> {
        self.read().rooms.clone()
    }

    pub fn room_ids(&self) -> Vec<RoomId> {
        self.read().rooms.iter().map(|r| r.room_id).collect()
    }

    pub fn len(&self) -> usize {
        self.read().rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().rooms.is_empty()
    }

    /// Location code of the loaded building.
    pub fn location(&self) -> Option<String> {
        self.read().location.clone()
    }

    pub fn full_name(&self) -> String {
        self.read().full_name.clone()
    }

    pub fn default_capacity(&self) -> u32 {
        self.read().default_capacity
    }

    /// Links of the loaded building aggregate.
    pub fn links(&self) -> Vec<Link> {
        self.read().links.clone()
    }

    pub fn link(&self, rel: &str) -> Link {
        directory::resolve(&self.read().links, rel)
    }

    pub fn summary(&self) -> OccupancySummary {
        occupancy::summarize(&self.read().rooms)
    }

    pub fn version(&self) -> u64 {
        self.read().version
    }
}
