use clap::Parser;
use client::game::ClientWorld;
use client::network::{ClientError, Connection};
use log::{info, warn};
use rand::Rng;
use shared::{ClientboundPacket, ServerboundPacket};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:25565")]
    server: String,

    /// Name to log in with
    #[arg(short = 'u', long, default_value = "Wanderer")]
    username: String,

    /// Milliseconds between steps
    #[arg(short = 't', long, default_value = "250")]
    tick_ms: u64,

    /// Stop after this many steps (0 wanders until kicked)
    #[arg(short = 'n', long, default_value = "0")]
    steps: u64,

    /// Largest step along each axis, in blocks
    #[arg(long, default_value = "0.8")]
    stride: f64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    info!("Connecting to: {}", args.server);
    let mut connection = Connection::connect(&args.server).await?;
    let (entity_id, login_packets) = connection.login(&args.username).await?;

    let mut world = ClientWorld::new();
    for packet in &login_packets {
        world.apply(packet);
    }
    info!(
        "Spawned as entity {} at {:?}",
        entity_id,
        world.position.map(|p| (p.x, p.y, p.z))
    );

    match wander(&mut connection, &mut world, &args).await {
        Ok(()) => {
            info!("Done wandering, leaving");
            connection.disconnect("Quitting").await?;
        }
        Err(ClientError::Kicked(reason)) => warn!("Kicked: {}", reason),
        Err(e) => return Err(e.into()),
    }

    info!(
        "Saw {} chunks and {} players, {} chat lines",
        world.chunks.len(),
        world.players.len(),
        world.chat.len()
    );
    Ok(())
}

/// Random walk on the ground plane, reading everything the server sends
/// between steps.
async fn wander(
    connection: &mut Connection,
    world: &mut ClientWorld,
    args: &Args,
) -> Result<(), ClientError> {
    let tick = Duration::from_millis(args.tick_ms.max(1));
    let mut interval = tokio::time::interval(tick);
    let mut taken = 0u64;

    loop {
        interval.tick().await;

        while let Some(packet) = connection.recv_timeout(Duration::ZERO).await? {
            match &packet {
                ClientboundPacket::KeepAlive => connection.send(&ServerboundPacket::KeepAlive).await?,
                ClientboundPacket::Chat { message } => info!("[chat] {}", message),
                ClientboundPacket::PlayerPositionAndLook { x, y, z, .. } => {
                    info!("Server moved us to ({:.2}, {:.2}, {:.2})", x, y, z)
                }
                ClientboundPacket::NamedEntitySpawn { name, .. } => info!("{} came into view", name),
                ClientboundPacket::Disconnect { reason } => {
                    return Err(ClientError::Kicked(reason.clone()))
                }
                _ => {}
            }
            world.apply(&packet);
        }

        if args.steps > 0 && taken >= args.steps {
            return Ok(());
        }

        let Some(position) = world.position else {
            continue;
        };
        let (dx, dz) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_range(-args.stride..=args.stride),
                rng.gen_range(-args.stride..=args.stride),
            )
        };
        let (x, y, z) = (position.x + dx, position.y, position.z + dz);
        connection.move_to(x, y, z).await?;
        if let Some(own) = world.position.as_mut() {
            own.x = x;
            own.z = z;
        }
        taken += 1;
    }
}
