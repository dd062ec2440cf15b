//! Server network layer: reliable stream connections, the datagram socket and
//! the snapshot broadcast cadence.

use crate::authority::Authority;
use crate::client_manager::ConnectionId;
use crate::config::ServerConfig;
use log::{debug, error, info, warn};
use shared::codec::{self, CodecError, MAX_DATAGRAM_SIZE};
use shared::{timestamp_ms, Packet};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    Reliable { conn: ConnectionId, packet: Packet },
    Datagram { addr: SocketAddr, packet: Packet },
    Disconnected { conn: ConnectionId },
}

/// Authoritative server coordinating connections and the simulation
pub struct Server {
    listener: TcpListener,
    socket: Arc<UdpSocket>,
    authority: Arc<RwLock<Authority>>,
    config: ServerConfig,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(&config.tcp_addr).await?;
        let socket = Arc::new(UdpSocket::bind(&config.udp_addr).await?);
        info!(
            "Server listening on tcp {} / udp {}",
            listener.local_addr()?,
            socket.local_addr()?
        );

        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener,
            socket,
            authority: Arc::new(RwLock::new(Authority::new(config.clone()))),
            config,
            server_tx,
            server_rx,
        })
    }

    pub fn tcp_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn udp_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Shared handle to the server state, mostly for inspection.
    pub fn authority(&self) -> Arc<RwLock<Authority>> {
        Arc::clone(&self.authority)
    }

    /// Spawns task that continuously listens for incoming datagrams
    fn spawn_datagram_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_DATAGRAM_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match codec::decode_datagram(&buffer[..len]) {
                        Ok(packet) => {
                            if server_tx
                                .send(ServerMessage::Datagram { addr, packet })
                                .is_err()
                            {
                                break;
                            }
                        }
                        Err(e) => warn!("Dropped datagram from {}: {}", addr, e),
                    },
                    Err(e) => {
                        // ICMP port unreachable from a departed client surfaces here.
                        debug!("Error receiving datagram: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that copies the world on a fixed cadence and sends it to
    /// every bound player
    fn spawn_broadcaster(&self) {
        let socket = Arc::clone(&self.socket);
        let authority = Arc::clone(&self.authority);
        let period = self.config.broadcast_interval;

        tokio::spawn(async move {
            let mut ticker = interval(period);

            loop {
                ticker.tick().await;

                let (snapshot, targets) = {
                    let authority = authority.read().await;
                    authority.build_snapshot(timestamp_ms())
                };

                if targets.is_empty() {
                    continue;
                }

                let tick = snapshot.tick;
                let bytes = match codec::encode_datagram(&Packet::Snapshot(snapshot)) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        error!("Failed to encode snapshot for tick {}: {}", tick, e);
                        continue;
                    }
                };

                for addr in targets {
                    if let Err(e) = socket.send_to(&bytes, addr).await {
                        debug!("Failed to send snapshot to {}: {}", addr, e);
                    }
                }
            }
        });
    }

    /// Spawns task that sweeps stale players even when no input arrives
    fn spawn_sweeper(&self) {
        let authority = Arc::clone(&self.authority);
        let period = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let removed = authority.write().await.sweep(timestamp_ms());
                if !removed.is_empty() {
                    debug!("Sweep removed players {:?}", removed);
                }
            }
        });
    }

    /// Registers a new stream and spawns its reader and writer tasks
    async fn accept_connection(&self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<Packet>();
        let conn = self.authority.write().await.connect(addr, tx);
        let (mut reader, mut writer) = stream.into_split();

        tokio::spawn(async move {
            while let Some(packet) = rx.recv().await {
                if let Err(e) = codec::write_frame(&mut writer, &packet).await {
                    debug!("Write to connection {} failed: {}", conn, e);
                    break;
                }
            }
        });

        let server_tx = self.server_tx.clone();
        tokio::spawn(async move {
            loop {
                match codec::read_frame(&mut reader).await {
                    Ok(packet) => {
                        if server_tx
                            .send(ServerMessage::Reliable { conn, packet })
                            .is_err()
                        {
                            return;
                        }
                    }
                    Err(CodecError::ConnectionClosed) => break,
                    Err(e @ (CodecError::Io(_) | CodecError::FrameTooLarge { .. })) => {
                        warn!("Connection {} failed: {}", conn, e);
                        break;
                    }
                    Err(e) => warn!("Dropped frame from connection {}: {}", conn, e),
                }
            }
            let _ = server_tx.send(ServerMessage::Disconnected { conn });
        });
    }

    async fn handle_message(&self, message: ServerMessage) {
        let mut authority = self.authority.write().await;
        match message {
            ServerMessage::Reliable { conn, packet } => {
                authority.handle_reliable(conn, packet);
            }
            ServerMessage::Datagram { addr, packet } => {
                authority.handle_datagram(addr, packet, Instant::now(), timestamp_ms());
            }
            ServerMessage::Disconnected { conn } => {
                authority.disconnect(conn);
            }
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(mut self) -> io::Result<()> {
        self.spawn_datagram_receiver();
        self.spawn_broadcaster();
        self.spawn_sweeper();

        info!("Server started successfully");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.accept_connection(stream, addr).await,
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                },

                message = self.server_rx.recv() => {
                    match message {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{InputCommand, PROTOCOL_VERSION};
    use tokio::time::timeout;

    async fn start() -> (SocketAddr, SocketAddr, Arc<RwLock<Authority>>) {
        let server = Server::bind(ServerConfig::local()).await.unwrap();
        let tcp = server.tcp_addr().unwrap();
        let udp = server.udp_addr().unwrap();
        let authority = server.authority();
        tokio::spawn(server.run());
        (tcp, udp, authority)
    }

    async fn request_join(stream: &mut TcpStream, version: &str) -> Packet {
        codec::write_frame(
            stream,
            &Packet::JoinRequest {
                protocol_version: version.to_string(),
                display_name: "tester".to_string(),
                character_variant: 0,
                previous_id: 0,
            },
        )
        .await
        .unwrap();

        timeout(Duration::from_secs(2), codec::read_frame(stream))
            .await
            .expect("no join response")
            .unwrap()
    }

    #[tokio::test]
    async fn test_join_over_tcp() {
        let (tcp, _, authority) = start().await;
        let mut stream = TcpStream::connect(tcp).await.unwrap();

        match request_join(&mut stream, PROTOCOL_VERSION).await {
            Packet::JoinResponse {
                accepted,
                assigned_id,
                max_players,
                current_players,
                ..
            } => {
                assert!(accepted);
                assert_eq!(assigned_id, 1);
                assert_eq!(max_players, 2);
                assert_eq!(current_players, 1);
            }
            other => panic!("Unexpected packet: {:?}", other),
        }

        assert!(authority.read().await.game().contains(1));
    }

    #[tokio::test]
    async fn test_bound_socket_receives_snapshots() {
        let (tcp, udp, _) = start().await;
        let mut stream = TcpStream::connect(tcp).await.unwrap();

        let (id, token) = match request_join(&mut stream, PROTOCOL_VERSION).await {
            Packet::JoinResponse {
                assigned_id,
                session_token,
                ..
            } => (assigned_id, session_token),
            other => panic!("Unexpected packet: {:?}", other),
        };

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let bind = codec::encode_datagram(&Packet::BindDatagram {
            player_id: id,
            session_token: token,
        })
        .unwrap();
        socket.send_to(&bind, udp).await.unwrap();

        let input = codec::encode_datagram(&Packet::Input(InputCommand {
            player_id: id,
            horizontal_axis: 1.0,
            jump: false,
            dash: false,
            attack: false,
            facing_left: false,
            client_time: timestamp_ms(),
        }))
        .unwrap();
        socket.send_to(&input, udp).await.unwrap();

        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];
        let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buffer))
            .await
            .expect("no snapshot")
            .unwrap();

        match codec::decode_datagram(&buffer[..len]).unwrap() {
            Packet::Snapshot(snapshot) => {
                assert!(snapshot.player(id).is_some());
                let profiles = snapshot.profiles.unwrap();
                assert_eq!(profiles[&id].display_name, "tester");
            }
            other => panic!("Unexpected packet: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_closing_stream_removes_player() {
        let (tcp, _, authority) = start().await;
        let mut stream = TcpStream::connect(tcp).await.unwrap();
        request_join(&mut stream, PROTOCOL_VERSION).await;
        drop(stream);

        let mut removed = false;
        for _ in 0..50 {
            if authority.read().await.game().is_empty() {
                removed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(removed);
        assert_eq!(authority.read().await.clients().connection_count(), 0);
    }
}
