use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::network::Server;
use std::path::PathBuf;
use std::sync::Arc;

/// Main-method of the application.
/// Loads configuration, binds the listener and serves until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// JSON config file; flags below override it
        #[clap(short, long)]
        config: Option<PathBuf>,
        /// Server IP address to bind to
        #[clap(short = 'H', long)]
        host: Option<String>,
        /// Server port to listen on
        #[clap(short, long)]
        port: Option<u16>,
        /// Maximum number of connected players
        #[clap(short, long)]
        max_players: Option<usize>,
        /// Chunks streamed in each direction around a player
        #[clap(short, long)]
        view_distance: Option<i32>,
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    if args.host.is_some() || args.port.is_some() {
        let (default_host, default_port) = config
            .bind_addr
            .rsplit_once(':')
            .map(|(host, port)| (host.to_string(), port.parse().unwrap_or(25565)))
            .unwrap_or_else(|| ("0.0.0.0".to_string(), 25565));
        config.bind_addr = format!(
            "{}:{}",
            args.host.unwrap_or(default_host),
            args.port.unwrap_or(default_port)
        );
    }
    if let Some(max_players) = args.max_players {
        config.max_players = max_players;
    }
    if let Some(view_distance) = args.view_distance {
        config.view_distance = view_distance;
    }

    info!(
        "Starting server: max {} players, view distance {}",
        config.max_players, config.view_distance
    );
    let server = Arc::new(Server::bind(config).await?);

    let server_handle = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.run().await })
    };

    // Handle shutdown gracefully
    tokio::select! {
        result = server_handle => {
            match result {
                Ok(Err(e)) => error!("Server stopped: {}", e),
                Err(e) => error!("Server task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            server.shutdown().await;
            // Let writer tasks flush the disconnect notices.
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        }
    }

    Ok(())
}
