use shared::{DEFAULT_MAX_PLAYERS, FIXED_STEP, PROTOCOL_VERSION, TCP_PORT, UDP_PORT};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the reliable stream listener binds to.
    pub tcp_addr: String,
    /// Address the datagram socket binds to.
    pub udp_addr: String,
    pub protocol_version: String,
    pub max_players: usize,
    /// Duration of one simulation step in seconds.
    pub fixed_step: f32,
    pub broadcast_interval: Duration,
    pub stale_threshold: Duration,
    pub sweep_interval: Duration,
    /// Upper bound on time accumulated by a single input event.
    pub max_accumulated: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tcp_addr: format!("0.0.0.0:{}", TCP_PORT),
            udp_addr: format!("0.0.0.0:{}", UDP_PORT),
            protocol_version: PROTOCOL_VERSION.to_string(),
            max_players: DEFAULT_MAX_PLAYERS,
            fixed_step: FIXED_STEP,
            broadcast_interval: Duration::from_millis(50),
            stale_threshold: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(5),
            max_accumulated: Duration::from_millis(250),
        }
    }
}

impl ServerConfig {
    /// Loopback config on ephemeral ports.
    pub fn local() -> Self {
        Self {
            tcp_addr: "127.0.0.1:0".to_string(),
            udp_addr: "127.0.0.1:0".to_string(),
            ..Self::default()
        }
    }
}
