//! The server's single critical section.
//!
//! [`Authority`] bundles connection records, identities and the player arena.
//! The network layer keeps it behind one lock and calls into it for every
//! event, so joins, leaves, input processing, sweeps and snapshot copies are
//! all serialized against each other.

use crate::client_manager::{ClientManager, ConnectionId, JoinAttempt, JoinDecision};
use crate::config::ServerConfig;
use crate::game::GameState;
use log::{debug, info, warn};
use shared::{Packet, WorldSnapshot, REASON_DISCONNECTED, REASON_TIMEOUT};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

pub struct Authority {
    config: ServerConfig,
    clients: ClientManager,
    game: GameState,
    /// Time of the previous input-processing event
    last_input_event: Option<Instant>,
    /// Simulated time accumulated since the last sweep
    since_sweep: Duration,
}

impl Authority {
    pub fn new(config: ServerConfig) -> Self {
        // A departed identity stays reclaimable as long as a silent player
        // would stay joined.
        let clients = ClientManager::new(config.max_players, config.protocol_version.clone())
            .with_identity_retention(config.stale_threshold);
        let game = GameState::new(
            Duration::from_secs_f32(config.fixed_step),
            config.max_accumulated,
        );
        Self {
            config,
            clients,
            game,
            last_input_event: None,
            since_sweep: Duration::ZERO,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    pub fn game(&self) -> &GameState {
        &self.game
    }

    pub fn connect(
        &mut self,
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<Packet>,
    ) -> ConnectionId {
        self.clients.register(addr, sender)
    }

    /// Handles a packet from a reliable connection.
    pub fn handle_reliable(&mut self, conn: ConnectionId, packet: Packet) {
        match packet {
            Packet::JoinRequest {
                protocol_version,
                display_name,
                character_variant,
                previous_id,
            } => {
                let attempt = JoinAttempt {
                    protocol_version,
                    display_name,
                    character_variant,
                    previous_id,
                };
                self.handle_join(conn, &attempt);
            }
            other => {
                warn!("Unexpected {} on connection {}", other.kind(), conn);
            }
        }
    }

    /// Runs admission and answers the requesting connection. A fresh join is
    /// announced to every joined connection.
    pub fn handle_join(&mut self, conn: ConnectionId, attempt: &JoinAttempt) -> JoinDecision {
        let decision = self.clients.try_join(conn, attempt);
        let max_players = self.clients.max_players() as u32;

        match &decision {
            JoinDecision::Rejected(reason) => {
                self.clients.send_to(
                    conn,
                    Packet::JoinResponse {
                        accepted: false,
                        assigned_id: 0,
                        reason: reason.to_string(),
                        max_players,
                        current_players: self.clients.joined_count() as u32,
                        session_token: 0,
                    },
                );
            }
            JoinDecision::Accepted {
                player_id,
                already_joined,
                ..
            } => {
                let player_id = *player_id;
                self.game.add_player(player_id);

                let session_token = self
                    .clients
                    .connection(conn)
                    .map_or(0, |c| c.session_token);
                self.clients.send_to(
                    conn,
                    Packet::JoinResponse {
                        accepted: true,
                        assigned_id: player_id,
                        reason: String::new(),
                        max_players,
                        current_players: self.clients.joined_count() as u32,
                        session_token,
                    },
                );

                if !already_joined {
                    if let Some(profile) = self.clients.profile(player_id) {
                        let joined = Packet::PlayerJoined {
                            id: player_id,
                            display_name: profile.display_name.clone(),
                            character_variant: profile.character_variant,
                        };
                        self.clients.broadcast(&joined, None);
                    }
                }
            }
        }

        decision
    }

    /// Transport-level disconnect of a reliable connection.
    pub fn disconnect(&mut self, conn: ConnectionId) {
        if let Some(player_id) = self.clients.remove_connection(conn) {
            self.game.remove_player(&player_id);
            self.clients.broadcast(
                &Packet::PlayerLeft {
                    id: player_id,
                    reason: REASON_DISCONNECTED.to_string(),
                },
                None,
            );
            info!("Player {} left ({})", player_id, REASON_DISCONNECTED);
        }
    }

    /// Handles a packet from the datagram socket. Anything that fails
    /// validation is dropped without a reply.
    pub fn handle_datagram(&mut self, addr: SocketAddr, packet: Packet, now: Instant, now_ms: u64) {
        match packet {
            Packet::BindDatagram {
                player_id,
                session_token,
            } => {
                self.clients.bind_datagram(addr, player_id, session_token);
            }
            Packet::Input(input) => {
                let owner = self.clients.player_for_datagram(addr);
                if owner != Some(input.player_id) || !self.game.contains(input.player_id) {
                    debug!(
                        "Dropped input for player {} from {} (owner {:?})",
                        input.player_id, addr, owner
                    );
                    return;
                }

                self.game.queue_input(input);
                self.process_inputs(now, now_ms);
            }
            other => {
                warn!("Unexpected {} datagram from {}", other.kind(), addr);
            }
        }
    }

    /// Advances the simulation by the real time since the previous input
    /// event and sweeps once enough of it has passed.
    fn process_inputs(&mut self, now: Instant, now_ms: u64) {
        let elapsed = match self.last_input_event {
            Some(previous) => now.saturating_duration_since(previous),
            None => self.game.fixed_step(),
        };
        self.last_input_event = Some(now);

        self.game.advance(elapsed, now_ms);

        self.since_sweep += elapsed;
        if self.since_sweep >= self.config.sweep_interval {
            self.since_sweep = Duration::ZERO;
            self.sweep(now_ms);
        }
    }

    /// Removes players that went stale or whose connection is gone and
    /// announces each removal once. Identities departed for longer than the
    /// stale threshold are forgotten. Returns the removed ids.
    pub fn sweep(&mut self, now_ms: u64) -> Vec<u32> {
        self.clients.forget_departed(Instant::now());

        let mut removed = self.game.stale_players(now_ms, self.config.stale_threshold);
        for player_id in self.clients.joined_players() {
            let disconnected = self
                .clients
                .connection_for_player(player_id)
                .map_or(true, |c| !c.is_connected());
            if disconnected && !removed.contains(&player_id) {
                removed.push(player_id);
            }
        }
        removed.sort_unstable();

        for player_id in &removed {
            // Announce first so the timed-out connection hears about it too.
            self.clients.broadcast(
                &Packet::PlayerLeft {
                    id: *player_id,
                    reason: REASON_TIMEOUT.to_string(),
                },
                None,
            );
            self.clients.remove_player(*player_id);
            self.game.remove_player(player_id);
            info!("Player {} left ({})", player_id, REASON_TIMEOUT);
        }

        removed
    }

    /// Copies the world for broadcast along with the datagram targets.
    pub fn build_snapshot(&self, now_ms: u64) -> (WorldSnapshot, Vec<SocketAddr>) {
        let snapshot = self.game.snapshot(now_ms, Some(self.clients.profiles()));
        (snapshot, self.clients.datagram_targets())
    }
}
