//! Chunk cache and per-player chunk subscriptions
//!
//! The world keeps two indices that mirror each other:
//! - per chunk: the cached blob and the set of sessions subscribed to it
//! - per session: the set of chunks that session currently has loaded
//!
//! Each chunk has its own lock, so sessions moving through unrelated parts of
//! the world never contend. A chunk removed by the eviction sweep is flagged
//! under its lock; anyone who grabbed the entry before the removal sees the
//! flag and retries against a fresh entry.

use crate::client_manager::ClientManager;
use crate::session::{SessionHandle, SessionId};
use crate::terrain;
use dashmap::DashMap;
use log::{debug, info};
use shared::{ChunkPos, ClientboundPacket, CHUNK_DEPTH, CHUNK_HEIGHT, CHUNK_WIDTH};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Cached state of one chunk column
#[derive(Debug)]
struct ChunkState {
    blob: Vec<u8>,
    /// Compressed copy of `blob`, dropped on every block write
    compressed: Option<Arc<Vec<u8>>>,
    subscribers: HashSet<SessionId>,
    last_access: Instant,
    evicted: bool,
}

impl ChunkState {
    fn generate(ground_level: usize) -> Self {
        Self {
            blob: terrain::generate(ground_level),
            compressed: None,
            subscribers: HashSet::new(),
            last_access: Instant::now(),
            evicted: false,
        }
    }

    fn compressed_payload(&mut self) -> std::io::Result<Arc<Vec<u8>>> {
        if let Some(data) = &self.compressed {
            return Ok(Arc::clone(data));
        }
        let data = Arc::new(terrain::compress(&self.blob)?);
        self.compressed = Some(Arc::clone(&data));
        Ok(data)
    }
}

/// Chunks a single session has loaded
#[derive(Debug, Default)]
struct SessionView {
    chunks: HashSet<ChunkPos>,
    closed: bool,
}

pub struct World {
    chunks: DashMap<ChunkPos, Arc<Mutex<ChunkState>>>,
    views: DashMap<SessionId, Arc<Mutex<SessionView>>>,
    clients: Arc<ClientManager>,
    view_distance: i32,
    ground_level: usize,
}

impl World {
    pub fn new(clients: Arc<ClientManager>, view_distance: i32, ground_level: usize) -> Self {
        Self {
            chunks: DashMap::new(),
            views: DashMap::new(),
            clients,
            view_distance: view_distance.max(0),
            ground_level,
        }
    }

    pub fn view_distance(&self) -> i32 {
        self.view_distance
    }

    /// Number of chunks currently cached.
    pub fn loaded_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_loaded(&self, pos: ChunkPos) -> bool {
        self.chunks.contains_key(&pos)
    }

    /// Locks a chunk, generating it on first reference.
    async fn lock_chunk(&self, pos: ChunkPos) -> OwnedMutexGuard<ChunkState> {
        loop {
            let entry = self
                .chunks
                .entry(pos)
                .or_insert_with(|| Arc::new(Mutex::new(ChunkState::generate(self.ground_level))))
                .clone();
            let guard = entry.lock_owned().await;
            if !guard.evicted {
                return guard;
            }
        }
    }

    /// Locks a chunk only if it is cached.
    async fn lock_existing(&self, pos: ChunkPos) -> Option<OwnedMutexGuard<ChunkState>> {
        let entry = self.chunks.get(&pos).map(|e| Arc::clone(e.value()))?;
        let guard = entry.lock_owned().await;
        (!guard.evicted).then_some(guard)
    }

    /// Starts tracking subscriptions for a session.
    pub fn add_session(&self, id: SessionId) {
        self.views.entry(id).or_default();
    }

    /// Drops every subscription held by a session. Later position updates for
    /// it are ignored.
    pub async fn remove_session(&self, id: SessionId) {
        let Some((_, view)) = self.views.remove(&id) else {
            return;
        };
        let mut view = view.lock().await;
        view.closed = true;

        for pos in view.chunks.drain() {
            if let Some(mut chunk) = self.lock_existing(pos).await {
                chunk.subscribers.remove(&id);
            }
        }
        debug!("Session {} left the world", id);
    }

    /// Re-centres a session's subscriptions on the world position (`x`, `z`).
    ///
    /// Chunks entering the view square are subscribed and streamed (PreChunk
    /// then MapChunk), nearest first. Chunks leaving it are unsubscribed and
    /// the client is told to unload them. Calling this again with a position
    /// in the same chunk sends nothing.
    pub async fn update_position(&self, session: &SessionHandle, x: f64, z: f64) -> std::io::Result<()> {
        let Some(view) = self.views.get(&session.id).map(|v| Arc::clone(v.value())) else {
            return Ok(());
        };
        let mut view = view.lock().await;
        if view.closed {
            return Ok(());
        }

        let center = ChunkPos::containing(x, z);
        let desired: HashSet<ChunkPos> = center.square_around(self.view_distance).collect();

        let mut entering: Vec<ChunkPos> = desired.difference(&view.chunks).copied().collect();
        entering.sort_by_key(|pos| {
            let dx = (pos.x - center.x) as i64;
            let dz = (pos.z - center.z) as i64;
            dx * dx + dz * dz
        });
        let leaving: Vec<ChunkPos> = view.chunks.difference(&desired).copied().collect();

        for pos in entering {
            let data = {
                let mut chunk = self.lock_chunk(pos).await;
                chunk.subscribers.insert(session.id);
                chunk.last_access = Instant::now();
                view.chunks.insert(pos);
                chunk.compressed_payload()?
            };
            session.send(ClientboundPacket::PreChunk {
                x: pos.x,
                z: pos.z,
                load: true,
            });
            session.send(ClientboundPacket::map_chunk(pos.x, pos.z, data.to_vec()));
        }

        for pos in leaving {
            if let Some(mut chunk) = self.lock_existing(pos).await {
                chunk.subscribers.remove(&session.id);
                chunk.last_access = Instant::now();
            }
            view.chunks.remove(&pos);
            session.send(ClientboundPacket::PreChunk {
                x: pos.x,
                z: pos.z,
                load: false,
            });
        }

        Ok(())
    }

    /// Whether `id` is currently subscribed to `pos`.
    pub async fn is_subscribed(&self, id: SessionId, pos: ChunkPos) -> bool {
        let Some(view) = self.views.get(&id).map(|v| Arc::clone(v.value())) else {
            return false;
        };
        let view = view.lock().await;
        view.chunks.contains(&pos)
    }

    /// Chunks a session has loaded.
    pub async fn subscriptions(&self, id: SessionId) -> HashSet<ChunkPos> {
        match self.views.get(&id).map(|v| Arc::clone(v.value())) {
            Some(view) => view.lock().await.chunks.clone(),
            None => HashSet::new(),
        }
    }

    /// Sessions subscribed to a chunk; empty if the chunk is not cached.
    pub async fn subscribers(&self, pos: ChunkPos) -> HashSet<SessionId> {
        match self.lock_existing(pos).await {
            Some(chunk) => chunk.subscribers.clone(),
            None => HashSet::new(),
        }
    }

    /// Reads the block type and metadata at a world block position.
    pub async fn get_block(&self, x: i32, y: i32, z: i32) -> Option<(u8, u8)> {
        if !(0..CHUNK_HEIGHT as i32).contains(&y) {
            return None;
        }
        let chunk = self.lock_chunk(ChunkPos::of_block(x, z)).await;
        let index = local_index(x, y, z);
        let metadata = terrain::get_nibble(&chunk.blob[terrain::METADATA_OFFSET..], index);
        Some((chunk.blob[index], metadata))
    }

    /// Writes a block and notifies the chunk's subscribers.
    ///
    /// Returns false without touching anything when `y` is outside the chunk.
    pub async fn set_block(&self, x: i32, y: i32, z: i32, block_type: u8, metadata: u8) -> bool {
        if !(0..CHUNK_HEIGHT as i32).contains(&y) {
            return false;
        }

        let subscribers = {
            let mut chunk = self.lock_chunk(ChunkPos::of_block(x, z)).await;
            let index = local_index(x, y, z);
            chunk.blob[index] = block_type;
            terrain::set_nibble(&mut chunk.blob[terrain::METADATA_OFFSET..], index, metadata);
            chunk.compressed = None;
            chunk.last_access = Instant::now();
            chunk.subscribers.clone()
        };

        let packet = ClientboundPacket::BlockChange {
            x,
            y: y as u8,
            z,
            block_type,
            metadata: metadata & 0x0F,
        };
        for id in subscribers {
            if let Some(session) = self.clients.get(id) {
                session.send(packet.clone());
            }
        }
        true
    }

    /// Drops every cached chunk that has no subscribers and has not been
    /// touched for `idle`. Returns how many were removed.
    pub async fn evict_idle(&self, idle: Duration) -> usize {
        let candidates: Vec<(ChunkPos, Arc<Mutex<ChunkState>>)> = self
            .chunks
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();

        let mut evicted = 0;
        for (pos, entry) in candidates {
            let mut chunk = entry.lock().await;
            if chunk.evicted || !chunk.subscribers.is_empty() || chunk.last_access.elapsed() < idle {
                continue;
            }
            chunk.evicted = true;
            self.chunks.remove_if(&pos, |_, current| Arc::ptr_eq(current, &entry));
            evicted += 1;
        }

        if evicted > 0 {
            info!("Evicted {} idle chunks, {} remain cached", evicted, self.chunks.len());
        }
        evicted
    }
}

/// Index of a world block inside its chunk's blob.
fn local_index(x: i32, y: i32, z: i32) -> usize {
    let local_x = x.rem_euclid(CHUNK_WIDTH as i32) as usize;
    let local_z = z.rem_euclid(CHUNK_DEPTH as i32) as usize;
    terrain::block_index(local_x, y as usize, local_z)
}
