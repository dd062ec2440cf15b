use shared::{CONNECT_TIMEOUT, PROTOCOL_VERSION, TCP_PORT, UDP_PORT};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub tcp_port: u16,
    pub udp_port: u16,
    pub protocol_version: String,
    /// Upper bound for connecting and receiving the join response
    pub connect_timeout: Duration,
    /// EMA weight of each new latency sample
    pub latency_smoothing: f32,
    /// Minimum gap between datagram bind attempts
    pub bind_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            tcp_port: TCP_PORT,
            udp_port: UDP_PORT,
            protocol_version: PROTOCOL_VERSION.to_string(),
            connect_timeout: CONNECT_TIMEOUT,
            latency_smoothing: 0.2,
            bind_interval: Duration::from_millis(250),
        }
    }
}

impl ClientConfig {
    pub fn with_ports(tcp_port: u16, udp_port: u16) -> Self {
        Self {
            tcp_port,
            udp_port,
            ..Self::default()
        }
    }
}
