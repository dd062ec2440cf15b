use clap::Parser;
use client::config::ClientConfig;
use client::input::{InputIntent, InputSampler};
use client::{ClientEvent, SyncClient};
use log::{info, warn};
use shared::{PROTOCOL_VERSION, TCP_PORT, UDP_PORT};
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};

/// Headless client that joins a server and plays a scripted pattern
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1")]
    server: String,

    /// Display name sent with the join request
    #[arg(short = 'n', long, default_value = "bot")]
    name: String,

    /// Character variant sent with the join request
    #[arg(short = 'c', long, default_value = "0")]
    variant: u32,

    /// Reliable stream port
    #[arg(short = 't', long, default_value_t = TCP_PORT)]
    tcp_port: u16,

    /// Datagram port
    #[arg(short = 'u', long, default_value_t = UDP_PORT)]
    udp_port: u16,

    /// Protocol version to present
    #[arg(long, default_value = PROTOCOL_VERSION)]
    protocol_version: String,
}

/// Runs right, then left, jumping and attacking now and then.
fn scripted_intent(elapsed: Duration) -> InputIntent {
    let ms = elapsed.as_millis();
    let phase = (ms / 2000) % 2;
    InputIntent {
        horizontal_axis: if phase == 0 { 1.0 } else { -1.0 },
        jump: ms % 1500 < 50,
        dash: ms % 3000 < 20,
        attack: ms % 2500 < 30,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ClientConfig {
        protocol_version: args.protocol_version,
        ..ClientConfig::with_ports(args.tcp_port, args.udp_port)
    };

    info!("Starting client...");
    let mut client = SyncClient::new(config, &args.name, args.variant);
    let mut local_id = client.connect_and_join(&args.server).await?;
    info!("Playing as player {}", local_id);

    let mut sampler = InputSampler::new();
    let mut frame = interval(Duration::from_millis(16));
    frame.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let started = Instant::now();
    let mut last_report = Instant::now();

    loop {
        tokio::select! {
            _ = frame.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, disconnecting");
                client.disconnect();
                break;
            }
        }

        for event in client.poll() {
            match event {
                ClientEvent::Joined { id } => local_id = id,
                ClientEvent::PlayerJoined(profile) => {
                    info!("{} joined as player {}", profile.display_name, profile.id);
                }
                ClientEvent::PlayerLeft { id, reason } => {
                    info!("Player {} left: {}", id, reason);
                    if id == local_id {
                        client.rejoin()?;
                    }
                }
                ClientEvent::Disconnected => {
                    warn!("Lost connection to server");
                    return Ok(());
                }
                ClientEvent::Rejected { reason } => {
                    warn!("Rejoin refused: {}", reason);
                    return Ok(());
                }
                ClientEvent::ConnectFailed(e) => return Err(e.into()),
            }
        }

        if let Some(command) = sampler.sample(scripted_intent(started.elapsed()), Instant::now()) {
            client.send_input(command);
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            if let Some(me) = client.interpolate(local_id, 1.0) {
                info!(
                    "tick {:?}: ({:.1}, {:.1}) {} latency {:.1}ms",
                    client.game().tick(),
                    me.x,
                    me.y,
                    me.animation.as_str(),
                    client.latency_ms()
                );
            }
        }
    }

    Ok(())
}
