use log::debug;
use shared::{lerp, PlayerProfile, PlayerState, WorldSnapshot};
use std::collections::HashMap;

/// The two most recent snapshots plus what the client learned alongside them.
#[derive(Debug, Default)]
pub struct ClientGameState {
    previous: Option<WorldSnapshot>,
    current: Option<WorldSnapshot>,
    /// `server_time - local_now` at the last accepted snapshot
    server_time_offset: i64,
    profiles: HashMap<u32, PlayerProfile>,
}

impl ClientGameState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shifts `current` into `previous` and stores `snapshot` as current.
    /// A snapshot that is not newer than the current one is dropped. Newer
    /// means a later broadcast time; the tick only breaks ties, since it
    /// stands still while nobody sends input.
    pub fn apply_snapshot(&mut self, mut snapshot: WorldSnapshot, local_now: u64) -> bool {
        if let Some(current) = &self.current {
            if (snapshot.server_time, snapshot.tick) <= (current.server_time, current.tick) {
                debug!(
                    "Dropped late snapshot {}@{} (current {}@{})",
                    snapshot.tick, snapshot.server_time, current.tick, current.server_time
                );
                return false;
            }
        }

        self.server_time_offset = snapshot.server_time as i64 - local_now as i64;

        if let Some(profiles) = snapshot.profiles.take() {
            self.profiles.extend(profiles);
        }

        self.previous = self.current.take();
        self.current = Some(snapshot);
        true
    }

    /// Blends the player's position between the two buffered snapshots.
    /// Everything except position comes from the current snapshot.
    pub fn interpolate(&self, player_id: u32, alpha: f32) -> Option<PlayerState> {
        let current = self.current.as_ref()?.player(player_id)?;
        let previous = self
            .previous
            .as_ref()
            .and_then(|snapshot| snapshot.player(player_id));

        let mut state = current.clone();
        if let Some(previous) = previous {
            let alpha = if alpha.is_finite() {
                alpha.clamp(0.0, 1.0)
            } else {
                1.0
            };
            state.x = lerp(previous.x, current.x, alpha);
            state.y = lerp(previous.y, current.y, alpha);
        }
        Some(state)
    }

    /// Every player in the current snapshot, interpolated.
    pub fn interpolate_all(&self, alpha: f32) -> Vec<PlayerState> {
        let Some(current) = &self.current else {
            return Vec::new();
        };
        current
            .players
            .iter()
            .filter_map(|p| self.interpolate(p.id, alpha))
            .collect()
    }

    pub fn current(&self) -> Option<&WorldSnapshot> {
        self.current.as_ref()
    }

    pub fn previous(&self) -> Option<&WorldSnapshot> {
        self.previous.as_ref()
    }

    pub fn tick(&self) -> Option<u64> {
        self.current.as_ref().map(|s| s.tick)
    }

    pub fn server_time_offset(&self) -> i64 {
        self.server_time_offset
    }

    /// Local clock translated to the server's clock.
    pub fn server_now(&self, local_now: u64) -> u64 {
        (local_now as i64 + self.server_time_offset).max(0) as u64
    }

    pub fn profile(&self, player_id: u32) -> Option<&PlayerProfile> {
        self.profiles.get(&player_id)
    }

    pub fn insert_profile(&mut self, profile: PlayerProfile) {
        self.profiles.insert(profile.id, profile);
    }

    pub fn remove_profile(&mut self, player_id: u32) {
        self.profiles.remove(&player_id);
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
