use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::network::Server;
use shared::{DEFAULT_MAX_PLAYERS, PROTOCOL_VERSION, TCP_PORT, UDP_PORT};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind both sockets to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Reliable stream port
    #[arg(short = 't', long, default_value_t = TCP_PORT)]
    tcp_port: u16,

    /// Datagram port
    #[arg(short = 'u', long, default_value_t = UDP_PORT)]
    udp_port: u16,

    /// Maximum number of joined players
    #[arg(short = 'm', long, default_value_t = DEFAULT_MAX_PLAYERS)]
    max_players: usize,

    /// Protocol version clients must present
    #[arg(long, default_value = PROTOCOL_VERSION)]
    protocol_version: String,

    /// Snapshot broadcast interval in milliseconds
    #[arg(short = 'b', long, default_value = "50")]
    broadcast_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ServerConfig {
        tcp_addr: format!("{}:{}", args.host, args.tcp_port),
        udp_addr: format!("{}:{}", args.host, args.udp_port),
        protocol_version: args.protocol_version,
        max_players: args.max_players,
        broadcast_interval: std::time::Duration::from_millis(args.broadcast_ms),
        ..ServerConfig::default()
    };

    info!("Starting server...");
    info!(
        "Max players: {}, protocol version {:?}",
        config.max_players, config.protocol_version
    );

    let server = Server::bind(config).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
