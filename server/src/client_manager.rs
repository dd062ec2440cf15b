//! Connection records, player identities and the join rules.
//!
//! This module owns everything the server knows about *who* is connected:
//! - Reliable connections and the outbound queue of each
//! - The datagram address bound to a connection
//! - Player identities (profile per id) and the monotonic id counter
//! - Capacity and protocol version checks for join requests
//!
//! It never touches player simulation state; see [`crate::game`] for that.

use log::{debug, info, warn};
use rand::Rng;
use shared::{Packet, PlayerProfile, REASON_SERVER_FULL, REASON_VERSION_MISMATCH};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Server-local handle for one reliable connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One reliable connection and, once joined, the player it owns.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    /// Peer address of the reliable stream
    pub addr: SocketAddr,
    /// Source address of datagrams, set by a valid bind
    pub datagram_addr: Option<SocketAddr>,
    pub player_id: Option<u32>,
    /// Secret the client must echo to bind its datagram address
    pub session_token: u64,
    /// Frames queued here are written by the connection's writer task
    sender: mpsc::UnboundedSender<Packet>,
    pub connected_at: Instant,
}

impl Connection {
    /// Queues a reliable packet. Returns false once the writer is gone.
    pub fn send(&self, packet: Packet) -> bool {
        self.sender.send(packet).is_ok()
    }

    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }

    pub fn is_joined(&self) -> bool {
        self.player_id.is_some()
    }
}

/// Fields of a join request relevant to admission.
#[derive(Debug, Clone)]
pub struct JoinAttempt {
    pub protocol_version: String,
    pub display_name: String,
    pub character_variant: u32,
    pub previous_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinDecision {
    Accepted {
        player_id: u32,
        /// A previously issued identity was reclaimed
        reused: bool,
        /// The connection had already joined; nothing changed
        already_joined: bool,
    },
    Rejected(&'static str),
}

/// How long a departed identity can still be reclaimed by default.
pub const DEFAULT_IDENTITY_RETENTION: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct Identity {
    profile: PlayerProfile,
    /// Set while no connection owns the identity
    departed_at: Option<Instant>,
}

/// Tracks all connections and identities and enforces the join rules.
pub struct ClientManager {
    connections: HashMap<ConnectionId, Connection>,
    /// Joined player id to the connection that owns it
    player_index: HashMap<u32, ConnectionId>,
    /// Identities of joined players, plus departed ones until
    /// [`ClientManager::forget_departed`] evicts them after the retention
    /// window
    identities: HashMap<u32, Identity>,
    identity_retention: Duration,
    next_player_id: u32,
    next_connection_id: u64,
    max_players: usize,
    protocol_version: String,
}

impl ClientManager {
    /// Player ids start at 1; 0 is the "no id" value on the wire.
    pub fn new(max_players: usize, protocol_version: impl Into<String>) -> Self {
        Self {
            connections: HashMap::new(),
            player_index: HashMap::new(),
            identities: HashMap::new(),
            identity_retention: DEFAULT_IDENTITY_RETENTION,
            next_player_id: 1,
            next_connection_id: 1,
            max_players,
            protocol_version: protocol_version.into(),
        }
    }

    pub fn with_identity_retention(mut self, retention: Duration) -> Self {
        self.identity_retention = retention;
        self
    }

    pub fn max_players(&self) -> usize {
        self.max_players
    }

    /// Registers a freshly accepted reliable connection in the UNJOINED state.
    pub fn register(
        &mut self,
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<Packet>,
    ) -> ConnectionId {
        let id = ConnectionId(self.next_connection_id);
        self.next_connection_id += 1;

        self.connections.insert(
            id,
            Connection {
                id,
                addr,
                datagram_addr: None,
                player_id: None,
                session_token: 0,
                sender,
                connected_at: Instant::now(),
            },
        );
        info!("Connection {} opened from {}", id, addr);
        id
    }

    /// Drops a connection. Returns the player it owned, if any.
    pub fn remove_connection(&mut self, conn: ConnectionId) -> Option<u32> {
        let connection = self.connections.remove(&conn)?;
        info!("Connection {} from {} closed", conn, connection.addr);

        let player_id = connection.player_id?;
        if self.player_index.get(&player_id) == Some(&conn) {
            self.player_index.remove(&player_id);
            self.mark_departed(player_id);
            Some(player_id)
        } else {
            None
        }
    }

    fn mark_departed(&mut self, player_id: u32) {
        if let Some(identity) = self.identities.get_mut(&player_id) {
            identity.departed_at = Some(Instant::now());
        }
    }

    /// Evicts identities that have had no owner for longer than the
    /// retention window. Returns how many were dropped.
    pub fn forget_departed(&mut self, now: Instant) -> usize {
        let retention = self.identity_retention;
        let before = self.identities.len();
        self.identities.retain(|id, identity| {
            let keep = identity
                .departed_at
                .map_or(true, |at| now.saturating_duration_since(at) <= retention);
            if !keep {
                debug!("Forgot identity {}", id);
            }
            keep
        });
        before - self.identities.len()
    }

    /// True when `player_id` is owned by a connection that is still open.
    fn owned_by_live_connection(&self, player_id: u32) -> bool {
        self.player_index
            .get(&player_id)
            .and_then(|conn| self.connections.get(conn))
            .map_or(false, |c| c.is_connected())
    }

    /// Applies the admission rules in order: protocol version, already joined,
    /// capacity, then identity reuse or allocation. A rejection leaves every
    /// counter and map untouched.
    pub fn try_join(&mut self, conn: ConnectionId, attempt: &JoinAttempt) -> JoinDecision {
        if !self.connections.contains_key(&conn) {
            warn!("Join attempt from unknown connection {}", conn);
            return JoinDecision::Rejected(shared::REASON_DISCONNECTED);
        }

        if attempt.protocol_version != self.protocol_version {
            info!(
                "Rejecting {}: version {:?}, expected {:?}",
                conn, attempt.protocol_version, self.protocol_version
            );
            return JoinDecision::Rejected(REASON_VERSION_MISMATCH);
        }

        if let Some(player_id) = self.connections.get(&conn).and_then(|c| c.player_id) {
            return JoinDecision::Accepted {
                player_id,
                reused: false,
                already_joined: true,
            };
        }

        if self.player_index.len() >= self.max_players {
            info!(
                "Rejecting {}: server full ({}/{})",
                conn,
                self.player_index.len(),
                self.max_players
            );
            return JoinDecision::Rejected(REASON_SERVER_FULL);
        }

        let previous = attempt.previous_id;
        let live_owner = previous != 0 && self.owned_by_live_connection(previous);
        if live_owner {
            info!(
                "{} asked for player {}, still owned by a live connection",
                conn, previous
            );
        }

        let reused = previous != 0 && !live_owner && self.identities.contains_key(&previous);
        let player_id = if reused {
            let player_id = previous;
            // Only a closed connection can still hold the index entry here.
            if let Some(old_conn) = self.player_index.remove(&player_id) {
                if let Some(old) = self.connections.get_mut(&old_conn) {
                    old.player_id = None;
                    old.datagram_addr = None;
                }
                info!("Player {} moved from {} to {}", player_id, old_conn, conn);
            }
            player_id
        } else {
            let player_id = self.next_player_id;
            self.next_player_id += 1;
            player_id
        };

        self.identities.insert(
            player_id,
            Identity {
                profile: PlayerProfile {
                    id: player_id,
                    display_name: attempt.display_name.clone(),
                    character_variant: attempt.character_variant,
                },
                departed_at: None,
            },
        );
        self.player_index.insert(player_id, conn);

        let mut token = 0;
        while token == 0 {
            token = rand::thread_rng().gen();
        }
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.player_id = Some(player_id);
            connection.session_token = token;
        }

        info!(
            "Player {} ({:?}) joined on {}{}",
            player_id,
            attempt.display_name,
            conn,
            if reused { " (returning)" } else { "" }
        );

        JoinDecision::Accepted {
            player_id,
            reused,
            already_joined: false,
        }
    }

    /// Binds `addr` as the datagram source of the connection owning
    /// `player_id` when `token` matches. Any other connection holding the
    /// same address loses it.
    pub fn bind_datagram(&mut self, addr: SocketAddr, player_id: u32, token: u64) -> bool {
        let Some(conn) = self.player_index.get(&player_id).copied() else {
            return false;
        };
        let matches = self
            .connections
            .get(&conn)
            .map_or(false, |c| token != 0 && c.session_token == token);
        if !matches {
            warn!("Rejected datagram bind for player {} from {}", player_id, addr);
            return false;
        }

        for connection in self.connections.values_mut() {
            if connection.id != conn && connection.datagram_addr == Some(addr) {
                connection.datagram_addr = None;
            }
        }

        if let Some(connection) = self.connections.get_mut(&conn) {
            if connection.datagram_addr != Some(addr) {
                info!("Player {} bound datagrams from {}", player_id, addr);
            }
            connection.datagram_addr = Some(addr);
        }
        true
    }

    /// The player owned by the connection whose datagrams come from `addr`.
    pub fn player_for_datagram(&self, addr: SocketAddr) -> Option<u32> {
        self.connections
            .values()
            .find(|c| c.datagram_addr == Some(addr))
            .and_then(|c| c.player_id)
    }

    /// Detaches a player from its connection without closing it.
    pub fn remove_player(&mut self, player_id: u32) -> Option<ConnectionId> {
        let conn = self.player_index.remove(&player_id)?;
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.player_id = None;
            connection.datagram_addr = None;
        }
        self.mark_departed(player_id);
        Some(conn)
    }

    pub fn connection(&self, conn: ConnectionId) -> Option<&Connection> {
        self.connections.get(&conn)
    }

    pub fn connection_for_player(&self, player_id: u32) -> Option<&Connection> {
        self.player_index
            .get(&player_id)
            .and_then(|conn| self.connections.get(conn))
    }

    pub fn profile(&self, player_id: u32) -> Option<&PlayerProfile> {
        self.identities.get(&player_id).map(|identity| &identity.profile)
    }

    pub fn identity_count(&self) -> usize {
        self.identities.len()
    }

    /// Profiles of currently joined players.
    pub fn profiles(&self) -> HashMap<u32, PlayerProfile> {
        self.player_index
            .keys()
            .filter_map(|id| self.profile(*id).map(|p| (*id, p.clone())))
            .collect()
    }

    pub fn joined_players(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.player_index.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn joined_count(&self) -> usize {
        self.player_index.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Next id the counter would hand out.
    pub fn next_player_id(&self) -> u32 {
        self.next_player_id
    }

    /// Datagram addresses of joined, bound connections.
    pub fn datagram_targets(&self) -> Vec<SocketAddr> {
        self.player_index
            .values()
            .filter_map(|conn| self.connections.get(conn))
            .filter_map(|c| c.datagram_addr)
            .collect()
    }

    pub fn send_to(&self, conn: ConnectionId, packet: Packet) -> bool {
        match self.connections.get(&conn) {
            Some(connection) => connection.send(packet),
            None => false,
        }
    }

    /// Sends a reliable packet to every joined connection except `exclude`.
    pub fn broadcast(&self, packet: &Packet, exclude: Option<ConnectionId>) {
        for conn in self.player_index.values() {
            if Some(*conn) == exclude {
                continue;
            }
            if let Some(connection) = self.connections.get(conn) {
                if !connection.send(packet.clone()) {
                    warn!("Dropped {} for closed connection {}", packet.kind(), conn);
                }
            }
        }
    }
}
