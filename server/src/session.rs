//! One connected client: protocol state machine, keep-alive and teardown
//!
//! Each connection runs three tasks:
//! - the read loop, which decodes packets and handles them strictly in order
//! - the writer, which drains the session's outbound queue onto the socket
//! - the keep-alive probe, which pings the client and enforces the timeout
//!
//! Anything that ends the session goes through [`disconnect`], which runs the
//! teardown sequence exactly once no matter how many callers race into it.

use crate::error::DisconnectReason;
use crate::movement::{self, MoveRequest, MoveVerdict};
use crate::network::ServerContext;
use crate::player::{PlayerState, Position, SPAWN_HEALTH};
use crate::visibility;
use bytes::BytesMut;
use log::{debug, error, info, trace, warn};
use shared::{
    ChunkPos, ClientboundPacket, ServerboundPacket, MAX_CHAT_LENGTH, MAX_USERNAME_LENGTH,
    PROTOCOL_VERSION,
};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::time::Instant;

pub type SessionId = u64;

/// Reply to a handshake: no authentication.
const OFFLINE_CONNECTION_HASH: &str = "-";

/// Highest hotbar slot a client may select
const MAX_HOTBAR_SLOT: i16 = 8;

/// Time queued packets get to reach the client once teardown has started
const CLOSE_LINGER: Duration = Duration::from_millis(500);

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    AwaitingHandshake = 0,
    AwaitingLogin = 1,
    Active = 2,
    Disconnecting = 3,
    Closed = 4,
}

impl ProtocolState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ProtocolState::AwaitingHandshake,
            1 => ProtocolState::AwaitingLogin,
            2 => ProtocolState::Active,
            3 => ProtocolState::Disconnecting,
            _ => ProtocolState::Closed,
        }
    }
}

/// Messages for the writer task
#[derive(Debug)]
pub enum Outbound {
    Packet(ClientboundPacket),
    /// Flush what is queued, then close the socket.
    Close,
}

/// Shared handle to a session
///
/// Other sessions hold this to send packets and read the player's position.
/// Only the owning read loop writes the player state.
pub struct SessionHandle {
    pub id: SessionId,
    pub entity_id: i32,
    pub peer_addr: SocketAddr,
    outbound: mpsc::Sender<Outbound>,
    state: AtomicU8,
    pub(crate) player: RwLock<PlayerState>,
    /// Entity ids this client currently has spawned
    pub(crate) known_entities: Mutex<HashSet<i32>>,
    created: Instant,
    /// Milliseconds after `created` of the last inbound packet
    last_seen_ms: AtomicU64,
    closing: AtomicBool,
    /// Set when a writer-side failure asks the read loop to tear down
    aborted: OnceLock<DisconnectReason>,
    cancel: watch::Sender<bool>,
}

impl SessionHandle {
    pub fn new(
        id: SessionId,
        entity_id: i32,
        peer_addr: SocketAddr,
        outbound: mpsc::Sender<Outbound>,
    ) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            id,
            entity_id,
            peer_addr,
            outbound,
            state: AtomicU8::new(ProtocolState::AwaitingHandshake as u8),
            player: RwLock::new(PlayerState::default()),
            known_entities: Mutex::new(HashSet::new()),
            created: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
            closing: AtomicBool::new(false),
            aborted: OnceLock::new(),
            cancel,
        }
    }

    /// Queues a packet for the client. A full queue means the client is not
    /// keeping up, and the session is aborted.
    pub fn send(&self, packet: ClientboundPacket) {
        match self.outbound.try_send(Outbound::Packet(packet)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.abort(DisconnectReason::SlowClient),
            Err(TrySendError::Closed(_)) => {
                trace!("Session {}: dropped packet, writer closed", self.id);
            }
        }
    }

    /// Stops the session's tasks and leaves `reason` for the read loop, which
    /// runs the teardown. Only the first reason is kept.
    pub fn abort(&self, reason: DisconnectReason) {
        if !self.is_closing() && self.aborted.set(reason.clone()).is_ok() {
            warn!("Session {} aborted: {}", self.id, reason);
        }
        self.cancel.send_replace(true);
    }

    pub fn abort_reason(&self) -> Option<DisconnectReason> {
        self.aborted.get().cloned()
    }

    pub fn state(&self) -> ProtocolState {
        ProtocolState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ProtocolState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn advance_state(&self, from: ProtocolState, to: ProtocolState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_active(&self) -> bool {
        self.state() == ProtocolState::Active
    }

    /// True once teardown has started.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Claims the right to tear this session down. Only the first caller
    /// gets true.
    pub fn begin_close(&self) -> bool {
        !self.closing.swap(true, Ordering::AcqRel)
    }

    /// Refreshes the liveness timestamp.
    pub fn touch(&self) {
        let elapsed = self.created.elapsed().as_millis() as u64;
        self.last_seen_ms.fetch_max(elapsed, Ordering::AcqRel);
    }

    /// Time since the last inbound packet (or since connect).
    pub fn idle_time(&self) -> Duration {
        let last_seen = Duration::from_millis(self.last_seen_ms.load(Ordering::Acquire));
        self.created.elapsed().saturating_sub(last_seen)
    }

    pub async fn username(&self) -> String {
        self.player.read().await.username.clone()
    }

    pub async fn position(&self) -> Position {
        self.player.read().await.position
    }

    /// Whether this client has `entity_id` spawned.
    pub async fn knows(&self, entity_id: i32) -> bool {
        self.known_entities.lock().await.contains(&entity_id)
    }

    fn cancelled(&self) -> watch::Receiver<bool> {
        self.cancel.subscribe()
    }
}

/// Runs a freshly accepted connection until it is torn down.
pub async fn serve(
    ctx: Arc<ServerContext>,
    session: Arc<SessionHandle>,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    outbound: mpsc::Receiver<Outbound>,
) {
    let write_timeout = ctx.config.write_timeout();
    tokio::spawn(write_loop(Arc::clone(&session), outbound, writer, write_timeout));
    tokio::spawn(keep_alive(Arc::clone(&ctx), Arc::clone(&session)));
    read_loop(&ctx, &session, reader).await;
}

async fn read_loop(ctx: &ServerContext, session: &Arc<SessionHandle>, reader: OwnedReadHalf) {
    let mut cancel = session.cancelled();
    let mut reader = BufReader::new(reader);

    loop {
        if *cancel.borrow() {
            break;
        }
        let result = tokio::select! {
            _ = cancel.changed() => break,
            result = ServerboundPacket::read_from(&mut reader) => result,
        };

        let outcome = match result {
            Ok(packet) => {
                session.touch();
                handle_packet(ctx, session, packet).await
            }
            Err(e) if e.is_eof() => {
                debug!("Session {}: connection closed by peer", session.id);
                Err(DisconnectReason::ClientQuit)
            }
            Err(e) => {
                warn!("Session {}: {}", session.id, e);
                Err(DisconnectReason::Protocol(e.to_string()))
            }
        };

        if let Err(reason) = outcome {
            disconnect(ctx, session, reason).await;
            break;
        }
    }

    // The loop can also end because someone else tore the session down; this
    // is then a no-op.
    let reason = session.abort_reason().unwrap_or(DisconnectReason::ClientQuit);
    disconnect(ctx, session, reason).await;
}

/// Drains the outbound queue onto the socket, batching whatever is queued.
///
/// After the session is cancelled the writer only flushes what is already
/// queued, and gives that [`CLOSE_LINGER`] before dropping the socket. A write
/// that stalls past `write_timeout` aborts the session.
async fn write_loop(
    session: Arc<SessionHandle>,
    mut outbound: mpsc::Receiver<Outbound>,
    mut writer: OwnedWriteHalf,
    write_timeout: Duration,
) {
    let mut cancel = session.cancelled();
    let mut buf = BytesMut::with_capacity(8 * 1024);

    loop {
        let cancelled = *cancel.borrow();
        let first = if cancelled {
            match outbound.try_recv() {
                Ok(message) => message,
                Err(_) => break,
            }
        } else {
            tokio::select! {
                message = outbound.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
                _ = until_cancelled(&mut cancel) => continue,
            }
        };

        buf.clear();
        let mut closing = false;
        let mut next = Some(first);
        while let Some(message) = next {
            match message {
                Outbound::Packet(packet) => packet.encode(&mut buf),
                Outbound::Close => {
                    closing = true;
                    break;
                }
            }
            next = outbound.try_recv().ok();
        }

        if !buf.is_empty() {
            if let Err(e) = write_batch(&mut writer, &buf, write_timeout, &mut cancel).await {
                debug!("Session {}: write failed: {}", session.id, e);
                if e.kind() == io::ErrorKind::TimedOut {
                    session.abort(DisconnectReason::SlowClient);
                } else {
                    session.abort(DisconnectReason::ClientQuit);
                }
                break;
            }
        }
        if closing {
            break;
        }
    }

    if let Err(e) = writer.shutdown().await {
        trace!("Session {}: socket shutdown: {}", session.id, e);
    }
}

/// Writes one batch, giving up after `limit`, or [`CLOSE_LINGER`] after the
/// session is cancelled, whichever comes first.
async fn write_batch(
    writer: &mut OwnedWriteHalf,
    buf: &[u8],
    limit: Duration,
    cancel: &mut watch::Receiver<bool>,
) -> io::Result<()> {
    let stalled = || io::Error::new(io::ErrorKind::TimedOut, "write stalled");
    let write = tokio::time::timeout(limit, writer.write_all(buf));
    tokio::pin!(write);

    let cancelled = *cancel.borrow();
    if !cancelled {
        tokio::select! {
            result = &mut write => return result.unwrap_or_else(|_| Err(stalled())),
            _ = until_cancelled(cancel) => {}
        }
    }
    match tokio::time::timeout(CLOSE_LINGER, &mut write).await {
        Ok(result) => result.unwrap_or_else(|_| Err(stalled())),
        Err(_) => Err(stalled()),
    }
}

/// Resolves once the session is cancelled, or its handle is gone.
async fn until_cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        let cancelled = *cancel.borrow_and_update();
        if cancelled || cancel.changed().await.is_err() {
            return;
        }
    }
}

/// Pings the client every interval and drops it after the timeout.
async fn keep_alive(ctx: Arc<ServerContext>, session: Arc<SessionHandle>) {
    let mut cancel = session.cancelled();
    let timeout = ctx.config.keep_alive_timeout();
    let mut ticker = tokio::time::interval(ctx.config.keep_alive_interval());

    loop {
        if *cancel.borrow() {
            break;
        }
        tokio::select! {
            _ = cancel.changed() => break,
            _ = ticker.tick() => {
                if session.idle_time() > timeout {
                    info!("Session {} timed out", session.id);
                    disconnect(&ctx, &session, DisconnectReason::Timeout).await;
                    break;
                }
                session.send(ClientboundPacket::KeepAlive);
            }
        }
    }
}

async fn handle_packet(
    ctx: &ServerContext,
    session: &Arc<SessionHandle>,
    packet: ServerboundPacket,
) -> Result<(), DisconnectReason> {
    match (session.state(), packet) {
        (_, ServerboundPacket::KeepAlive) => Ok(()),
        (_, ServerboundPacket::Disconnect { reason }) => {
            debug!("Session {} quit: {}", session.id, reason);
            Err(DisconnectReason::ClientQuit)
        }

        (ProtocolState::AwaitingHandshake, ServerboundPacket::Handshake { username }) => {
            handshake(session, username).await
        }
        (ProtocolState::AwaitingHandshake, ServerboundPacket::LoginRequest { .. }) => {
            Err(DisconnectReason::no_handshake())
        }

        (ProtocolState::AwaitingLogin, ServerboundPacket::LoginRequest { protocol_version, .. }) => {
            if protocol_version != PROTOCOL_VERSION {
                info!(
                    "Session {} rejected: protocol {} instead of {}",
                    session.id, protocol_version, PROTOCOL_VERSION
                );
                return Err(DisconnectReason::outdated_client());
            }
            login(ctx, session).await.map_err(|e| {
                error!("Session {}: login failed: {}", session.id, e);
                DisconnectReason::login_failed()
            })
        }

        (ProtocolState::Active, ServerboundPacket::LoginRequest { .. }) => {
            Err(DisconnectReason::already_logged_in())
        }
        (ProtocolState::Active, packet) => handle_gameplay(ctx, session, packet).await,

        (state, packet) => {
            trace!("Session {}: ignoring {:?} while {:?}", session.id, packet, state);
            Ok(())
        }
    }
}

async fn handshake(session: &SessionHandle, username: String) -> Result<(), DisconnectReason> {
    if username.chars().count() > MAX_USERNAME_LENGTH {
        return Err(DisconnectReason::username_too_long());
    }
    debug!("Session {}: handshake from {}", session.id, username);
    session.player.write().await.username = username;
    session.send(ClientboundPacket::Handshake {
        connection_hash: OFFLINE_CONNECTION_HASH.to_string(),
    });
    session.set_state(ProtocolState::AwaitingLogin);
    Ok(())
}

async fn login(ctx: &ServerContext, session: &Arc<SessionHandle>) -> std::io::Result<()> {
    let spawn = Position::SPAWN;
    {
        let mut player = session.player.write().await;
        player.reset_to_spawn();
        player.mark_broadcast();
    }

    session.send(ClientboundPacket::LoginResponse {
        entity_id: session.entity_id,
        unused: String::new(),
        map_seed: 0,
        dimension: 0,
    });
    session.send(ClientboundPacket::SpawnPosition {
        x: spawn.x as i32,
        y: spawn.y as i32,
        z: spawn.z as i32,
    });
    session.send(ClientboundPacket::TimeUpdate { time: 0 });
    session.send(ClientboundPacket::UpdateHealth {
        health: SPAWN_HEALTH,
    });

    ctx.world.add_session(session.id);
    ctx.world.update_position(session, spawn.x, spawn.z).await?;
    if session.is_closing() {
        // Teardown may have released the view before it was added.
        ctx.world.remove_session(session.id).await;
        return Ok(());
    }
    visibility::broadcast_movement(&ctx.clients, session).await;

    let (username, position_packet) = {
        let player = session.player.read().await;
        (player.username.clone(), player.position_packet())
    };
    session.send(position_packet);

    if !session.advance_state(ProtocolState::AwaitingLogin, ProtocolState::Active) {
        // Torn down while logging in.
        return Ok(());
    }
    info!("{} logged in as entity {}", username, session.entity_id);
    ctx.clients.broadcast(&ClientboundPacket::Chat {
        message: format!("§e{} joined the game.", username),
    });
    // Peers that finished logging in alongside this one were not Active during
    // the first pass. Already-spawned pairs are skipped.
    visibility::broadcast_movement(&ctx.clients, session).await;
    Ok(())
}

async fn handle_gameplay(
    ctx: &ServerContext,
    session: &Arc<SessionHandle>,
    packet: ServerboundPacket,
) -> Result<(), DisconnectReason> {
    match packet {
        ServerboundPacket::Chat { message } => chat(ctx, session, message).await,
        ServerboundPacket::Flying { on_ground } => {
            session.player.write().await.on_ground = on_ground;
            Ok(())
        }
        ServerboundPacket::PlayerPosition {
            x,
            y,
            stance,
            z,
            on_ground,
        } => handle_move(ctx, session, MoveRequest { x, y, stance, z }, None, on_ground).await,
        ServerboundPacket::PlayerPositionAndLook {
            x,
            y,
            stance,
            z,
            yaw,
            pitch,
            on_ground,
        } => {
            let request = MoveRequest { x, y, stance, z };
            handle_move(ctx, session, request, Some((yaw, pitch)), on_ground).await
        }
        ServerboundPacket::PlayerLook {
            yaw,
            pitch,
            on_ground,
        } => {
            if !yaw.is_finite() || !pitch.is_finite() {
                return Err(DisconnectReason::invalid_position());
            }
            {
                let mut player = session.player.write().await;
                player.set_rotation(yaw, pitch);
                player.on_ground = on_ground;
            }
            visibility::broadcast_look(&ctx.clients, session).await;
            Ok(())
        }
        ServerboundPacket::HoldingChange { slot } => {
            if (0..=MAX_HOTBAR_SLOT).contains(&slot) {
                session.player.write().await.held_slot = slot;
            } else {
                warn!("Session {}: ignoring held slot {}", session.id, slot);
            }
            Ok(())
        }
        other => {
            trace!("Session {}: ignoring {:?}", session.id, other);
            Ok(())
        }
    }
}

async fn chat(
    ctx: &ServerContext,
    session: &SessionHandle,
    message: String,
) -> Result<(), DisconnectReason> {
    if message.chars().count() > MAX_CHAT_LENGTH {
        return Err(DisconnectReason::chat_too_long());
    }
    let line = format!("<{}> {}", session.username().await, message);
    info!("{}", line);
    ctx.clients.broadcast(&ClientboundPacket::Chat { message: line });
    Ok(())
}

async fn handle_move(
    ctx: &ServerContext,
    session: &Arc<SessionHandle>,
    request: MoveRequest,
    look: Option<(f32, f32)>,
    on_ground: bool,
) -> Result<(), DisconnectReason> {
    if let Some((yaw, pitch)) = look {
        if !yaw.is_finite() || !pitch.is_finite() {
            return Err(DisconnectReason::invalid_position());
        }
    }

    let last = session.position().await;
    let destination = ChunkPos::containing(request.x, request.z);
    let chunk_loaded = ctx.world.is_subscribed(session.id, destination).await;

    match movement::validate(&last, &request, chunk_loaded) {
        Ok(MoveVerdict::Accept) => {
            {
                let mut player = session.player.write().await;
                player.position = request.position();
                player.stance = request.stance;
                player.on_ground = on_ground;
                if let Some((yaw, pitch)) = look {
                    player.set_rotation(yaw, pitch);
                }
            }
            if let Err(e) = ctx.world.update_position(session, request.x, request.z).await {
                error!("Session {}: failed to stream chunks: {}", session.id, e);
            }
            visibility::broadcast_movement(&ctx.clients, session).await;
            Ok(())
        }
        Ok(MoveVerdict::SnapToSpawn) => {
            warn!(
                "Session {} moved into unloaded chunk ({}, {}), sending back to spawn",
                session.id, destination.x, destination.z
            );
            snap_to_spawn(ctx, session).await;
            Ok(())
        }
        Err(reason) => {
            warn!(
                "Session {} rejected move from ({:.2}, {:.2}, {:.2}) to ({:.2}, {:.2}, {:.2}): {}",
                session.id, last.x, last.y, last.z, request.x, request.y, request.z, reason
            );
            Err(reason)
        }
    }
}

async fn snap_to_spawn(ctx: &ServerContext, session: &Arc<SessionHandle>) {
    let position_packet = {
        let mut player = session.player.write().await;
        player.reset_to_spawn();
        player.position_packet()
    };
    session.send(position_packet);

    let spawn = Position::SPAWN;
    if let Err(e) = ctx.world.update_position(session, spawn.x, spawn.z).await {
        error!("Session {}: failed to stream chunks: {}", session.id, e);
    }
    visibility::broadcast_movement(&ctx.clients, session).await;
}

/// Tears a session down. Safe to call any number of times from any task;
/// only the first call does anything.
///
/// Steps, each of which logs and carries on if it fails:
/// 1. destroy this player's entity on every client that has it
/// 2. leave the registry and the world's chunk subscriptions
/// 3. send the Disconnect notice
/// 4. stop the read loop and keep-alive
/// 5. close the socket once queued packets are written, or after a short
///    linger if the client is not reading
/// 6. announce the departure if the player had logged in
pub async fn disconnect(ctx: &ServerContext, session: &Arc<SessionHandle>, reason: DisconnectReason) {
    if !session.begin_close() {
        return;
    }
    let previous = ProtocolState::from_u8(
        session
            .state
            .swap(ProtocolState::Disconnecting as u8, Ordering::AcqRel),
    );
    let username = session.username().await;
    info!(
        "Session {} ({}) disconnecting: {}",
        session.id,
        if username.is_empty() { "-" } else { &username },
        reason
    );

    visibility::despawn_everywhere(&ctx.clients, session).await;

    if !ctx.clients.unregister(session.id) {
        warn!("Session {} was not registered", session.id);
    }
    ctx.world.remove_session(session.id).await;

    if session
        .outbound
        .try_send(Outbound::Packet(ClientboundPacket::Disconnect {
            reason: reason.to_string(),
        }))
        .is_err()
    {
        debug!("Session {}: could not queue disconnect notice", session.id);
    }

    session.cancel.send_replace(true);

    if session.outbound.try_send(Outbound::Close).is_err() {
        debug!("Session {}: writer already closed", session.id);
    }

    if previous == ProtocolState::Active {
        ctx.clients.broadcast(&ClientboundPacket::Chat {
            message: format!("§e{} left the game.", username),
        });
    }

    session.set_state(ProtocolState::Closed);
}
