//! Wire schema shared by the authoritative server and the client synchronizer.
//!
//! Every message kind is a variant of [`Packet`]. Each variant is bound to a
//! fixed [`Channel`]: lifecycle events travel on the ordered-reliable stream,
//! per-tick traffic on the unordered-unreliable datagram socket. The
//! [`codec`] module enforces that binding at the serialization boundary.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub mod codec;

pub const TCP_PORT: u16 = 54555;
pub const UDP_PORT: u16 = 54777;
pub const PROTOCOL_VERSION: &str = "1.0";
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_PLAYERS: usize = 2;

pub const REASON_VERSION_MISMATCH: &str = "Version mismatch";
pub const REASON_SERVER_FULL: &str = "Server full";
pub const REASON_TIMEOUT: &str = "Timeout";
pub const REASON_DISCONNECTED: &str = "Disconnected";

// Movement tuning, y axis points up.
pub const FIXED_STEP: f32 = 1.0 / 60.0;
pub const GROUND_Y: f32 = 100.0;
pub const MAX_SPEED: f32 = 200.0;
pub const HORIZONTAL_SMOOTHING: f32 = 0.25;
pub const JUMP_VELOCITY: f32 = 350.0;
pub const GRAVITY: f32 = 900.0;
pub const DASH_IMPULSE: f32 = 500.0;
pub const DASH_DURATION: f32 = 0.15;
pub const DASH_COOLDOWN: f32 = 1.0;
pub const ATTACK_DURATION: f32 = 0.4;

/// Transport class a message kind is pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Ordered, exactly-once per connection (TCP).
    Reliable,
    /// Best effort, may drop, duplicate or reorder (UDP).
    Unreliable,
}

/// Discrete animation selected by the server step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Animation {
    #[default]
    Idle,
    Run,
    Jump,
    Fall,
    Attack,
}

impl Animation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Animation::Idle => "idle",
            Animation::Run => "run",
            Animation::Jump => "jump",
            Animation::Fall => "fall",
            Animation::Attack => "attack",
        }
    }
}

/// Replicated state of one player as produced by the server step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub id: u32,
    pub x: f32,
    pub y: f32,
    pub vel_x: f32,
    pub vel_y: f32,
    /// Position before the most recent step.
    pub last_x: f32,
    pub last_y: f32,
    pub on_ground: bool,
    pub facing_left: bool,
    pub dashing: bool,
    pub attacking: bool,
    pub animation: Animation,
    pub animation_time: f32,
    /// Server wall-clock time (ms) of the last step applied to this player.
    pub last_update: u64,
}

impl PlayerState {
    pub fn new(id: u32, x: f32, y: f32) -> Self {
        Self {
            id,
            x,
            y,
            vel_x: 0.0,
            vel_y: 0.0,
            last_x: x,
            last_y: y,
            on_ground: true,
            facing_left: false,
            dashing: false,
            attacking: false,
            animation: Animation::Idle,
            animation_time: 0.0,
            last_update: timestamp_ms(),
        }
    }
}

/// Display data for a joined player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub id: u32,
    pub display_name: String,
    pub character_variant: u32,
}

/// One sample of local intent. Never mutated after it is sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputCommand {
    pub player_id: u32,
    /// Clamped to [-1, 1] by the server.
    pub horizontal_axis: f32,
    pub jump: bool,
    pub dash: bool,
    pub attack: bool,
    pub facing_left: bool,
    pub client_time: u64,
}

/// Full copy of the world at one broadcast instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub tick: u64,
    pub server_time: u64,
    /// Ordered by player id.
    pub players: Vec<PlayerState>,
    /// Profile side channel for players whose join event a client missed.
    pub profiles: Option<HashMap<u32, PlayerProfile>>,
}

impl WorldSnapshot {
    pub fn player(&self, id: u32) -> Option<&PlayerState> {
        self.players.iter().find(|p| p.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    JoinRequest {
        protocol_version: String,
        display_name: String,
        character_variant: u32,
        /// 0 for a first join.
        previous_id: u32,
    },
    JoinResponse {
        accepted: bool,
        assigned_id: u32,
        reason: String,
        max_players: u32,
        current_players: u32,
        /// Secret the client echoes in [`Packet::BindDatagram`]; 0 on rejection.
        session_token: u64,
    },
    PlayerJoined {
        id: u32,
        display_name: String,
        character_variant: u32,
    },
    PlayerLeft {
        id: u32,
        reason: String,
    },

    Input(InputCommand),
    Snapshot(WorldSnapshot),
    BindDatagram {
        player_id: u32,
        session_token: u64,
    },
}

impl Packet {
    /// The only channel this kind may travel on.
    pub fn channel(&self) -> Channel {
        match self {
            Packet::JoinRequest { .. }
            | Packet::JoinResponse { .. }
            | Packet::PlayerJoined { .. }
            | Packet::PlayerLeft { .. } => Channel::Reliable,
            Packet::Input(_) | Packet::Snapshot(_) | Packet::BindDatagram { .. } => {
                Channel::Unreliable
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Packet::JoinRequest { .. } => "JoinRequest",
            Packet::JoinResponse { .. } => "JoinResponse",
            Packet::PlayerJoined { .. } => "PlayerJoined",
            Packet::PlayerLeft { .. } => "PlayerLeft",
            Packet::Input(_) => "InputCommand",
            Packet::Snapshot(_) => "WorldSnapshot",
            Packet::BindDatagram { .. } => "BindDatagram",
        }
    }
}

/// `a + (b - a) * t`
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Milliseconds since the Unix epoch.
pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn join_request() -> Packet {
        Packet::JoinRequest {
            protocol_version: PROTOCOL_VERSION.to_string(),
            display_name: "Ada".to_string(),
            character_variant: 1,
            previous_id: 0,
        }
    }

    #[test]
    fn test_player_creation() {
        let player = PlayerState::new(1, 50.0, GROUND_Y);
        assert_eq!(player.id, 1);
        assert_eq!(player.x, 50.0);
        assert_eq!(player.y, GROUND_Y);
        assert_eq!(player.last_x, 50.0);
        assert_eq!(player.vel_x, 0.0);
        assert!(player.on_ground);
        assert_eq!(player.animation, Animation::Idle);
    }

    #[test]
    fn test_lifecycle_kinds_are_reliable() {
        assert_eq!(join_request().channel(), Channel::Reliable);

        let left = Packet::PlayerLeft {
            id: 3,
            reason: REASON_TIMEOUT.to_string(),
        };
        assert_eq!(left.channel(), Channel::Reliable);

        let joined = Packet::PlayerJoined {
            id: 3,
            display_name: "Bo".to_string(),
            character_variant: 0,
        };
        assert_eq!(joined.channel(), Channel::Reliable);
    }

    #[test]
    fn test_per_tick_kinds_are_unreliable() {
        let input = Packet::Input(InputCommand {
            player_id: 1,
            horizontal_axis: 0.5,
            jump: false,
            dash: false,
            attack: false,
            facing_left: false,
            client_time: 10,
        });
        assert_eq!(input.channel(), Channel::Unreliable);

        let snapshot = Packet::Snapshot(WorldSnapshot {
            tick: 1,
            server_time: 2,
            players: vec![],
            profiles: None,
        });
        assert_eq!(snapshot.channel(), Channel::Unreliable);

        let bind = Packet::BindDatagram {
            player_id: 1,
            session_token: 99,
        };
        assert_eq!(bind.channel(), Channel::Unreliable);
        assert_eq!(bind.kind(), "BindDatagram");
    }

    #[test]
    fn test_snapshot_player_lookup() {
        let snapshot = WorldSnapshot {
            tick: 7,
            server_time: 100,
            players: vec![PlayerState::new(1, 0.0, 0.0), PlayerState::new(4, 9.0, 0.0)],
            profiles: None,
        };

        assert_eq!(snapshot.player(4).map(|p| p.x), Some(9.0));
        assert!(snapshot.player(2).is_none());
    }

    #[test]
    fn test_lerp_bounds() {
        assert_approx_eq!(lerp(10.0, 20.0, 0.0), 10.0);
        assert_approx_eq!(lerp(10.0, 20.0, 1.0), 20.0);
        assert_approx_eq!(lerp(10.0, 20.0, 0.25), 12.5);
        assert_approx_eq!(lerp(-3.0, -3.0, 0.7), -3.0);
    }

    #[test]
    fn test_animation_names() {
        assert_eq!(Animation::Attack.as_str(), "attack");
        assert_eq!(Animation::default().as_str(), "idle");
    }

    #[test]
    fn test_get_timestamp() {
        let timestamp1 = timestamp_ms();
        std::thread::sleep(Duration::from_millis(2));
        let timestamp2 = timestamp_ms();
        assert!(timestamp2 > timestamp1);
    }
}
