//! TCP connection to a server
//!
//! A background task decodes clientbound packets into a queue, so waiting
//! with a timeout never leaves half a packet unread on the socket.

use log::{debug, info};
use shared::{ClientboundPacket, ProtocolError, ServerboundPacket, PLAYER_EYE_HEIGHT, PROTOCOL_VERSION};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("disconnected by server: {0}")]
    Kicked(String),

    #[error("connection closed")]
    Closed,

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

pub struct Connection {
    writer: OwnedWriteHalf,
    inbound: mpsc::UnboundedReceiver<Result<ClientboundPacket, ProtocolError>>,
}

impl Connection {
    pub async fn connect(addr: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        let (tx, inbound) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            loop {
                let result = ClientboundPacket::read_from(&mut reader).await;
                let failed = result.is_err();
                if tx.send(result).is_err() || failed {
                    break;
                }
            }
        });

        debug!("Connected to {}", addr);
        Ok(Connection { writer, inbound })
    }

    pub async fn send(&mut self, packet: &ServerboundPacket) -> Result<(), ClientError> {
        self.writer.write_all(&packet.to_bytes()).await?;
        Ok(())
    }

    /// Waits for the next packet.
    pub async fn recv(&mut self) -> Result<ClientboundPacket, ClientError> {
        match self.inbound.recv().await {
            Some(Ok(packet)) => Ok(packet),
            Some(Err(e)) if e.is_eof() => Err(ClientError::Closed),
            Some(Err(e)) => Err(e.into()),
            None => Err(ClientError::Closed),
        }
    }

    /// Waits up to `timeout` for the next packet; None if nothing arrived.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<ClientboundPacket>, ClientError> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Reads packets until one matches `pred`, returning it together with
    /// everything skipped on the way.
    pub async fn wait_for<F>(
        &mut self,
        timeout: Duration,
        what: &'static str,
        mut pred: F,
    ) -> Result<(ClientboundPacket, Vec<ClientboundPacket>), ClientError>
    where
        F: FnMut(&ClientboundPacket) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut skipped = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.recv_timeout(remaining).await? {
                Some(packet) if pred(&packet) => return Ok((packet, skipped)),
                Some(packet) => skipped.push(packet),
                None => return Err(ClientError::Timeout(what)),
            }
        }
    }

    /// Collects every packet until the server stays quiet for `quiet`.
    pub async fn drain(&mut self, quiet: Duration) -> Result<Vec<ClientboundPacket>, ClientError> {
        let mut packets = Vec::new();
        while let Some(packet) = self.recv_timeout(quiet).await? {
            packets.push(packet);
        }
        Ok(packets)
    }

    /// Sends the handshake and returns the server's connection hash.
    pub async fn handshake(&mut self, username: &str) -> Result<String, ClientError> {
        self.send(&ServerboundPacket::Handshake {
            username: username.to_string(),
        })
        .await?;

        let (reply, _) = self
            .wait_for(Duration::from_secs(5), "handshake", |p| {
                matches!(
                    p,
                    ClientboundPacket::Handshake { .. } | ClientboundPacket::Disconnect { .. }
                )
            })
            .await?;
        match reply {
            ClientboundPacket::Handshake { connection_hash } => Ok(connection_hash),
            ClientboundPacket::Disconnect { reason } => Err(ClientError::Kicked(reason)),
            _ => Err(ClientError::Closed),
        }
    }

    /// Handshakes, logs in and waits for the initial position. Returns the
    /// assigned entity id and every packet received during login.
    pub async fn login(&mut self, username: &str) -> Result<(i32, Vec<ClientboundPacket>), ClientError> {
        self.handshake(username).await?;
        self.send(&ServerboundPacket::LoginRequest {
            protocol_version: PROTOCOL_VERSION,
            username: username.to_string(),
            map_seed: 0,
            dimension: 0,
        })
        .await?;

        let mut received = Vec::new();
        let mut entity_id = None;
        loop {
            let packet = self
                .recv_timeout(Duration::from_secs(5))
                .await?
                .ok_or(ClientError::Timeout("login"))?;
            match &packet {
                ClientboundPacket::LoginResponse { entity_id: id, .. } => entity_id = Some(*id),
                ClientboundPacket::Disconnect { reason } => return Err(ClientError::Kicked(reason.clone())),
                _ => {}
            }
            let done = matches!(packet, ClientboundPacket::PlayerPositionAndLook { .. });
            received.push(packet);
            if done {
                break;
            }
        }

        let entity_id = entity_id.ok_or(ClientError::Timeout("login response"))?;
        info!("Logged in as {} (entity {})", username, entity_id);
        Ok((entity_id, received))
    }

    /// Sends a position update with the stance at eye height.
    pub async fn move_to(&mut self, x: f64, y: f64, z: f64) -> Result<(), ClientError> {
        self.send(&ServerboundPacket::PlayerPosition {
            x,
            y,
            stance: y + PLAYER_EYE_HEIGHT,
            z,
            on_ground: true,
        })
        .await
    }

    pub async fn disconnect(mut self, reason: &str) -> Result<(), ClientError> {
        self.send(&ServerboundPacket::Disconnect {
            reason: reason.to_string(),
        })
        .await?;
        self.writer.shutdown().await?;
        Ok(())
    }
}
