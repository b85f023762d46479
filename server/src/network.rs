//! Server network layer: TCP accept loop, admission and shutdown

use crate::client_manager::ClientManager;
use crate::config::ServerConfig;
use crate::error::{DisconnectReason, ServerError};
use crate::session::{self, SessionHandle};
use crate::world::World;
use log::{debug, error, info, warn};
use shared::ClientboundPacket;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

const SERVER_FULL: &str = "The server is full!";

/// State shared by every connection task
pub struct ServerContext {
    pub config: ServerConfig,
    pub clients: Arc<ClientManager>,
    pub world: World,
}

impl ServerContext {
    pub fn new(config: ServerConfig) -> Self {
        let clients = Arc::new(ClientManager::new(config.max_players));
        let world = World::new(Arc::clone(&clients), config.view_distance, config.ground_level);
        Self {
            config,
            clients,
            world,
        }
    }
}

/// Main server accepting connections and owning the shared state
pub struct Server {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    shutdown_tx: watch::Sender<bool>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.bind_addr.clone(),
                source,
            })?;
        info!("Server listening on {}", listener.local_addr()?);

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Server {
            listener,
            ctx: Arc::new(ServerContext::new(config)),
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn context(&self) -> Arc<ServerContext> {
        Arc::clone(&self.ctx)
    }

    /// Accepts connections until [`Server::shutdown`] is called.
    pub async fn run(&self) -> Result<(), ServerError> {
        let mut shutdown = self.shutdown_tx.subscribe();
        self.spawn_eviction_sweep();

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.admit(stream, addr).await,
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    }
                },
            }
        }

        info!("Accept loop stopped");
        Ok(())
    }

    /// Stops accepting and disconnects every session with "Server closed".
    pub async fn shutdown(&self) {
        info!("Shutting down, disconnecting {} sessions", self.ctx.clients.len());
        self.shutdown_tx.send_replace(true);

        for session in self.ctx.clients.sessions() {
            session::disconnect(&self.ctx, &session, DisconnectReason::ServerShutdown).await;
        }
    }

    /// Registers a new connection and starts its tasks, or turns it away if
    /// the server is full.
    async fn admit(&self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
        }
        let (reader, mut writer) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::channel(self.ctx.config.outbound_capacity());

        let Some(session) = self
            .ctx
            .clients
            .register(|id, entity_id| SessionHandle::new(id, entity_id, addr, outbound_tx))
        else {
            warn!("Rejecting {}: server full", addr);
            let notice = ClientboundPacket::Disconnect {
                reason: SERVER_FULL.to_string(),
            };
            tokio::spawn(async move {
                if let Err(e) = writer.write_all(&notice.to_bytes()).await {
                    debug!("Could not notify {}: {}", addr, e);
                }
                let _ = writer.shutdown().await;
            });
            return;
        };

        tokio::spawn(session::serve(
            Arc::clone(&self.ctx),
            session,
            reader,
            writer,
            outbound_rx,
        ));
    }

    fn spawn_eviction_sweep(&self) {
        let ctx = Arc::clone(&self.ctx);
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(ctx.config.eviction_interval());
            let idle = ctx.config.chunk_idle();

            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = interval.tick() => {
                        ctx.world.evict_idle(idle).await;
                    }
                }
            }
        });
    }
}
