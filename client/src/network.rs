//! Client synchronizer: connection lifecycle, inbound queue and input sending.
//!
//! Network I/O runs on background tasks which only ever append to one
//! inbound queue. The owner of [`SyncClient`] drains that queue once per
//! frame with [`SyncClient::poll`], which is the only place client state
//! changes.

use crate::config::ClientConfig;
use crate::game::ClientGameState;
use crate::latency::LatencyEstimator;
use log::{debug, info, warn};
use shared::codec::{self, CodecError, MAX_DATAGRAM_SIZE};
use shared::{timestamp_ms, InputCommand, Packet, PlayerProfile, PlayerState};
use std::io;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connection attempt timed out")]
    ConnectTimeout,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("join rejected: {reason}")]
    Rejected { reason: String },

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("not connected")]
    NotConnected,
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// What [`SyncClient::poll`] reports to the game.
#[derive(Debug)]
pub enum ClientEvent {
    Joined { id: u32 },
    Rejected { reason: String },
    /// Transport failure; distinct from a rejection.
    ConnectFailed(ClientError),
    PlayerJoined(PlayerProfile),
    PlayerLeft { id: u32, reason: String },
    Disconnected,
}

/// Everything the I/O tasks hand to the consumer. The generation ties an
/// event to the connection attempt that produced it.
enum Inbound {
    Established { generation: u64, link: Link },
    Failed { generation: u64, error: ClientError },
    Packet { generation: u64, packet: Packet },
    Closed { generation: u64 },
}

/// Live transport of one connection.
struct Link {
    reliable_tx: mpsc::UnboundedSender<Packet>,
    socket: Arc<UdpSocket>,
    /// Sending `true` stops every task of this link.
    shutdown_tx: watch::Sender<bool>,
}

impl Link {
    fn send_datagram(&self, packet: &Packet) -> Result<(), ClientError> {
        let bytes = codec::encode_datagram(packet)?;
        match self.socket.try_send(&bytes) {
            Ok(_) => Ok(()),
            // A full send buffer drops the datagram like the network would.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(ClientError::Io(e)),
        }
    }

    fn close(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

pub struct SyncClient {
    config: ClientConfig,
    profile: PlayerProfile,
    state: ConnectionState,
    local_id: Option<u32>,
    session_token: u64,

    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    generation: u64,
    link: Option<Link>,
    /// Events decoded while waiting inside [`SyncClient::connect_and_join`]
    pending_events: Vec<ClientEvent>,

    attempt_started: Option<Instant>,
    last_bind: Option<Instant>,
    snapshot_seen: bool,

    game: ClientGameState,
    latency: LatencyEstimator,
}

impl SyncClient {
    pub fn new(config: ClientConfig, display_name: &str, character_variant: u32) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let latency = LatencyEstimator::new(config.latency_smoothing);
        Self {
            config,
            profile: PlayerProfile {
                id: 0,
                display_name: display_name.to_string(),
                character_variant,
            },
            state: ConnectionState::Disconnected,
            local_id: None,
            session_token: 0,
            inbound_tx,
            inbound_rx,
            generation: 0,
            link: None,
            pending_events: Vec::new(),
            attempt_started: None,
            last_bind: None,
            snapshot_seen: false,
            game: ClientGameState::new(),
            latency,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn local_id(&self) -> Option<u32> {
        self.local_id
    }

    pub fn profile(&self) -> &PlayerProfile {
        &self.profile
    }

    pub fn game(&self) -> &ClientGameState {
        &self.game
    }

    pub fn latency_ms(&self) -> f32 {
        self.latency.average_ms()
    }

    pub fn interpolate(&self, player_id: u32, alpha: f32) -> Option<PlayerState> {
        self.game.interpolate(player_id, alpha)
    }

    /// Starts a connection attempt on a background task and returns at once.
    /// The outcome arrives through [`SyncClient::poll`]. Must be called from
    /// within a Tokio runtime.
    pub fn connect(&mut self, host: &str) {
        if self.state != ConnectionState::Disconnected {
            warn!("Connect requested while {:?}", self.state);
            return;
        }

        self.generation += 1;
        self.state = ConnectionState::Connecting;
        self.attempt_started = Some(Instant::now());
        self.local_id = None;
        self.session_token = 0;
        self.snapshot_seen = false;
        self.last_bind = None;

        let generation = self.generation;
        let host = host.to_string();
        let config = self.config.clone();
        let join = Packet::JoinRequest {
            protocol_version: config.protocol_version.clone(),
            display_name: self.profile.display_name.clone(),
            character_variant: self.profile.character_variant,
            previous_id: self.profile.id,
        };
        let inbound_tx = self.inbound_tx.clone();

        info!("Connecting to {}:{}...", host, config.tcp_port);

        tokio::spawn(async move {
            let attempt = timeout(config.connect_timeout, establish(&host, &config, &join)).await;

            match attempt {
                Ok(Ok((link, reader, shutdown_rx))) => {
                    let socket = Arc::clone(&link.socket);
                    // Announce the link before any packet read from it.
                    if inbound_tx
                        .send(Inbound::Established { generation, link })
                        .is_ok()
                    {
                        spawn_readers(reader, socket, shutdown_rx, generation, inbound_tx);
                    }
                }
                Ok(Err(error)) => {
                    let _ = inbound_tx.send(Inbound::Failed { generation, error });
                }
                Err(_) => {
                    let _ = inbound_tx.send(Inbound::Failed {
                        generation,
                        error: ClientError::ConnectTimeout,
                    });
                }
            }
        });
    }

    /// Connects and waits for the join outcome. Other events seen while
    /// waiting are kept for the next [`SyncClient::poll`].
    pub async fn connect_and_join(&mut self, host: &str) -> Result<u32, ClientError> {
        if let Some(id) = self.local_id {
            return Ok(id);
        }
        self.connect(host);

        loop {
            let remaining = self
                .attempt_started
                .map(|started| self.config.connect_timeout.saturating_sub(started.elapsed()))
                .unwrap_or_default();

            let message = match timeout(remaining, self.inbound_rx.recv()).await {
                Ok(Some(message)) => message,
                Ok(None) => return Err(ClientError::NotConnected),
                Err(_) => {
                    self.teardown();
                    return Err(ClientError::ConnectTimeout);
                }
            };

            let mut events = Vec::new();
            self.dispatch(message, &mut events);

            for event in events {
                match event {
                    ClientEvent::Joined { id } => {
                        self.pending_events.push(ClientEvent::Joined { id });
                        return Ok(id);
                    }
                    ClientEvent::Rejected { reason } => {
                        return Err(ClientError::Rejected { reason });
                    }
                    ClientEvent::ConnectFailed(error) => return Err(error),
                    ClientEvent::Disconnected => return Err(ClientError::NotConnected),
                    other => self.pending_events.push(other),
                }
            }
        }
    }

    /// Drains the inbound queue without blocking and applies every message.
    pub fn poll(&mut self) -> Vec<ClientEvent> {
        let mut events = std::mem::take(&mut self.pending_events);

        while let Ok(message) = self.inbound_rx.try_recv() {
            self.dispatch(message, &mut events);
        }

        if self.state != ConnectionState::Disconnected && self.local_id.is_none() {
            let expired = self
                .attempt_started
                .map_or(false, |started| started.elapsed() >= self.config.connect_timeout);
            if expired {
                warn!("Join did not complete in {:?}", self.config.connect_timeout);
                self.teardown();
                events.push(ClientEvent::ConnectFailed(ClientError::ConnectTimeout));
            }
        }

        self.maybe_bind();
        events
    }

    fn dispatch(&mut self, message: Inbound, events: &mut Vec<ClientEvent>) {
        match message {
            Inbound::Established { generation, link } => {
                if generation != self.generation || self.state != ConnectionState::Connecting {
                    link.close();
                    return;
                }
                info!("Connected, waiting for join response");
                self.link = Some(link);
                self.state = ConnectionState::Connected;
            }
            Inbound::Failed { generation, error } => {
                if generation != self.generation {
                    return;
                }
                warn!("Connection attempt failed: {}", error);
                self.teardown();
                events.push(ClientEvent::ConnectFailed(error));
            }
            Inbound::Closed { generation } => {
                if generation != self.generation || self.state == ConnectionState::Disconnected {
                    return;
                }
                info!("Server closed the connection");
                self.teardown();
                events.push(ClientEvent::Disconnected);
            }
            Inbound::Packet { generation, packet } => {
                if generation == self.generation && self.state == ConnectionState::Connected {
                    self.handle_packet(packet, events);
                }
            }
        }
    }

    fn handle_packet(&mut self, packet: Packet, events: &mut Vec<ClientEvent>) {
        match packet {
            Packet::JoinResponse {
                accepted,
                assigned_id,
                reason,
                max_players,
                current_players,
                session_token,
            } => {
                if accepted {
                    info!(
                        "Joined as player {} ({}/{})",
                        assigned_id, current_players, max_players
                    );
                    self.local_id = Some(assigned_id);
                    self.profile.id = assigned_id;
                    self.session_token = session_token;
                    self.last_bind = None;
                    self.maybe_bind();
                    events.push(ClientEvent::Joined { id: assigned_id });
                } else {
                    warn!("Join rejected: {}", reason);
                    self.teardown();
                    events.push(ClientEvent::Rejected { reason });
                }
            }
            Packet::Snapshot(snapshot) => {
                let local_now = timestamp_ms();
                let reported = self
                    .local_id
                    .and_then(|id| snapshot.player(id))
                    .map(|p| p.last_update);

                if self.game.apply_snapshot(snapshot, local_now) {
                    self.snapshot_seen = true;
                    if let Some(last_update) = reported {
                        self.latency.record(local_now, last_update);
                    }
                }
            }
            Packet::PlayerJoined {
                id,
                display_name,
                character_variant,
            } => {
                let profile = PlayerProfile {
                    id,
                    display_name,
                    character_variant,
                };
                self.game.insert_profile(profile.clone());
                events.push(ClientEvent::PlayerJoined(profile));
            }
            Packet::PlayerLeft { id, reason } => {
                self.game.remove_profile(id);
                if Some(id) == self.local_id {
                    warn!("Server removed the local player: {}", reason);
                    self.local_id = None;
                    self.attempt_started = None;
                }
                events.push(ClientEvent::PlayerLeft { id, reason });
            }
            other => {
                warn!("Unexpected {} from server", other.kind());
            }
        }
    }

    /// Repeats the datagram bind until the first snapshot shows it worked.
    fn maybe_bind(&mut self) {
        if self.snapshot_seen {
            return;
        }
        let (Some(player_id), Some(link)) = (self.local_id, &self.link) else {
            return;
        };
        let due = self
            .last_bind
            .map_or(true, |sent| sent.elapsed() >= self.config.bind_interval);
        if !due {
            return;
        }

        let bind = Packet::BindDatagram {
            player_id,
            session_token: self.session_token,
        };
        if let Err(e) = link.send_datagram(&bind) {
            debug!("Failed to send datagram bind: {}", e);
        }
        self.last_bind = Some(Instant::now());
    }

    /// Stamps and sends one command on the unreliable channel. Returns false
    /// when suppressed because the client is not connected and joined.
    pub fn send_input(&mut self, mut command: InputCommand) -> bool {
        let (Some(player_id), Some(link)) = (self.local_id, &self.link) else {
            return false;
        };
        if self.state != ConnectionState::Connected {
            return false;
        }

        command.player_id = player_id;
        command.client_time = timestamp_ms();

        match link.send_datagram(&Packet::Input(command)) {
            Ok(()) => true,
            Err(e) => {
                debug!("Failed to send input: {}", e);
                false
            }
        }
    }

    /// Asks again on the open stream after the server dropped the local
    /// player, reclaiming the previous id if the server still knows it.
    pub fn rejoin(&mut self) -> Result<(), ClientError> {
        if self.local_id.is_some() {
            return Ok(());
        }
        let link = match (&self.link, self.state) {
            (Some(link), ConnectionState::Connected) => link,
            _ => return Err(ClientError::NotConnected),
        };

        let join = Packet::JoinRequest {
            protocol_version: self.config.protocol_version.clone(),
            display_name: self.profile.display_name.clone(),
            character_variant: self.profile.character_variant,
            previous_id: self.profile.id,
        };
        link.reliable_tx
            .send(join)
            .map_err(|_| ClientError::NotConnected)?;

        self.attempt_started = Some(Instant::now());
        self.snapshot_seen = false;
        info!("Rejoining as player {}", self.profile.id);
        Ok(())
    }

    /// Closes the connection. The server sees the stream close and removes
    /// the player.
    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        info!("Disconnecting");
        self.teardown();
    }

    fn teardown(&mut self) {
        if let Some(link) = self.link.take() {
            link.close();
        }
        self.generation += 1;
        self.state = ConnectionState::Disconnected;
        self.local_id = None;
        self.attempt_started = None;
        self.snapshot_seen = false;
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            link.close();
        }
    }
}

/// Opens both sockets, sends the join request and spawns the writer task.
async fn establish(
    host: &str,
    config: &ClientConfig,
    join: &Packet,
) -> Result<(Link, OwnedReadHalf, watch::Receiver<bool>), ClientError> {
    let stream = TcpStream::connect((host, config.tcp_port)).await?;
    stream.set_nodelay(true)?;
    let peer = stream.peer_addr()?;

    let bind_addr = if peer.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.connect((peer.ip(), config.udp_port)).await?;

    let (reader, mut writer) = stream.into_split();
    codec::write_frame(&mut writer, join).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (reliable_tx, mut reliable_rx) = mpsc::unbounded_channel::<Packet>();

    let mut shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                packet = reliable_rx.recv() => {
                    let Some(packet) = packet else { break };
                    if let Err(e) = codec::write_frame(&mut writer, &packet).await {
                        debug!("Reliable write failed: {}", e);
                        break;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    });

    let link = Link {
        reliable_tx,
        socket: Arc::new(socket),
        shutdown_tx,
    };
    Ok((link, reader, shutdown_rx))
}

/// Spawns the reliable and datagram readers feeding the inbound queue.
fn spawn_readers(
    mut reader: OwnedReadHalf,
    socket: Arc<UdpSocket>,
    shutdown_rx: watch::Receiver<bool>,
    generation: u64,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
) {
    let mut shutdown = shutdown_rx.clone();
    let tx = inbound_tx.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = codec::read_frame(&mut reader) => match frame {
                    Ok(packet) => {
                        if tx.send(Inbound::Packet { generation, packet }).is_err() {
                            return;
                        }
                    }
                    Err(CodecError::ConnectionClosed) => break,
                    Err(e @ (CodecError::Io(_) | CodecError::FrameTooLarge { .. })) => {
                        warn!("Reliable stream failed: {}", e);
                        break;
                    }
                    Err(e) => warn!("Dropped reliable frame: {}", e),
                },
                _ = shutdown.changed() => return,
            }
        }
        let _ = tx.send(Inbound::Closed { generation });
    });

    let mut shutdown = shutdown_rx;
    tokio::spawn(async move {
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            tokio::select! {
                received = socket.recv(&mut buffer) => match received {
                    Ok(len) => match codec::decode_datagram(&buffer[..len]) {
                        Ok(packet) => {
                            if inbound_tx.send(Inbound::Packet { generation, packet }).is_err() {
                                return;
                            }
                        }
                        Err(e) => warn!("Dropped datagram: {}", e),
                    },
                    // Port unreachable until the server socket is up; keep listening.
                    Err(e) => debug!("Datagram receive failed: {}", e),
                },
                _ = shutdown.changed() => return,
            }
        }
    });
}
