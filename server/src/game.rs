use crate::physics::SimPlayer;
use log::{debug, info};
use shared::{InputCommand, PlayerProfile, PlayerState, WorldSnapshot, GROUND_Y};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Inputs buffered per player beyond this are dropped oldest-first. Clients
/// send slightly faster than one command per step, so a deeper queue only
/// turns into input lag.
const MAX_PENDING_INPUTS: usize = 2;

#[derive(Debug)]
struct PlayerSlot {
    sim: SimPlayer,
    pending: VecDeque<InputCommand>,
}

/// Authoritative player arena driven by a fixed-step accumulator.
#[derive(Debug)]
pub struct GameState {
    pub tick: u64,
    players: HashMap<u32, PlayerSlot>,
    fixed_step: Duration,
    max_accumulated: Duration,
    accumulator: Duration,
}

impl GameState {
    pub fn new(fixed_step: Duration, max_accumulated: Duration) -> Self {
        Self {
            tick: 0,
            players: HashMap::new(),
            fixed_step,
            max_accumulated,
            accumulator: Duration::ZERO,
        }
    }

    pub fn fixed_step(&self) -> Duration {
        self.fixed_step
    }

    pub fn spawn_position(player_id: u32) -> (f32, f32) {
        let slot = (player_id.saturating_sub(1) % 6) as f32;
        (50.0 + slot * 100.0, GROUND_Y)
    }

    /// Creates the player if absent. A reclaimed identity keeps its state.
    pub fn add_player(&mut self, player_id: u32) -> &PlayerState {
        let slot = self.players.entry(player_id).or_insert_with(|| {
            let (x, y) = Self::spawn_position(player_id);
            info!("Added player {} at ({}, {})", player_id, x, y);
            PlayerSlot {
                sim: SimPlayer::new(player_id, x, y),
                pending: VecDeque::new(),
            }
        });
        &slot.sim.state
    }

    pub fn remove_player(&mut self, player_id: &u32) -> bool {
        let removed = self.players.remove(player_id).is_some();
        if removed {
            info!("Removed player {}", player_id);
        }
        removed
    }

    pub fn contains(&self, player_id: u32) -> bool {
        self.players.contains_key(&player_id)
    }

    pub fn player(&self, player_id: u32) -> Option<&PlayerState> {
        self.players.get(&player_id).map(|slot| &slot.sim.state)
    }

    pub fn sim_player(&self, player_id: u32) -> Option<&SimPlayer> {
        self.players.get(&player_id).map(|slot| &slot.sim)
    }

    pub fn pending_inputs(&self, player_id: u32) -> usize {
        self.players
            .get(&player_id)
            .map_or(0, |slot| slot.pending.len())
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Buffers a command for its player. Returns false when the player
    /// does not exist.
    pub fn queue_input(&mut self, input: InputCommand) -> bool {
        match self.players.get_mut(&input.player_id) {
            Some(slot) => {
                let mut input = input;
                while slot.pending.len() >= MAX_PENDING_INPUTS {
                    let Some(dropped) = slot.pending.pop_front() else {
                        break;
                    };
                    // Presses in a dropped command still count.
                    match slot.pending.front_mut() {
                        Some(next) => carry_presses(&dropped, next),
                        None => carry_presses(&dropped, &mut input),
                    }
                }
                slot.pending.push_back(input);
                true
            }
            None => false,
        }
    }

    /// Adds `elapsed` to the accumulator and drains whole steps from it.
    /// Returns the number of steps run.
    pub fn advance(&mut self, elapsed: Duration, now: u64) -> u32 {
        self.accumulator += elapsed.min(self.max_accumulated);

        let mut steps = 0;
        while self.accumulator >= self.fixed_step {
            self.accumulator -= self.fixed_step;
            self.step(now);
            steps += 1;
        }

        if steps > 1 {
            debug!("Tick {}: drained {} steps", self.tick, steps);
        }
        steps
    }

    /// One fixed step: every player with a buffered command consumes exactly
    /// one of them. Players without input are left untouched.
    fn step(&mut self, now: u64) {
        let dt = self.fixed_step.as_secs_f32();
        for slot in self.players.values_mut() {
            if let Some(input) = slot.pending.pop_front() {
                slot.sim.step(&input, dt, now);
            }
        }
        self.tick += 1;
    }

    /// Builds a detached copy of the world.
    pub fn snapshot(
        &self,
        server_time: u64,
        profiles: Option<HashMap<u32, PlayerProfile>>,
    ) -> WorldSnapshot {
        let mut players: Vec<PlayerState> = self
            .players
            .values()
            .map(|slot| slot.sim.state.clone())
            .collect();
        players.sort_by_key(|p| p.id);

        WorldSnapshot {
            tick: self.tick,
            server_time,
            players,
            profiles,
        }
    }

    /// Players whose state was last stepped more than `threshold` before `now`.
    pub fn stale_players(&self, now: u64, threshold: Duration) -> Vec<u32> {
        let threshold_ms = threshold.as_millis() as u64;
        let mut stale: Vec<u32> = self
            .players
            .iter()
            .filter(|(_, slot)| now.saturating_sub(slot.sim.state.last_update) > threshold_ms)
            .map(|(id, _)| *id)
            .collect();
        stale.sort_unstable();
        stale
    }
}

fn carry_presses(from: &InputCommand, into: &mut InputCommand) {
    into.jump |= from.jump;
    into.dash |= from.dash;
    into.attack |= from.attack;
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{FIXED_STEP, MAX_SPEED};

    fn game() -> GameState {
        GameState::new(Duration::from_secs_f32(FIXED_STEP), Duration::from_millis(250))
    }

    fn input(player_id: u32, axis: f32) -> InputCommand {
        InputCommand {
            player_id,
            horizontal_axis: axis,
            jump: false,
            dash: false,
            attack: false,
            facing_left: false,
            client_time: 0,
        }
    }

    /// Slightly more than one step, well short of two.
    fn step_duration() -> Duration {
        Duration::from_millis(20)
    }

    #[test]
    fn test_add_and_remove_player() {
        let mut game = game();
        let state = game.add_player(1);
        assert_eq!(state.id, 1);
        assert_eq!((state.x, state.y), GameState::spawn_position(1));
        assert_eq!(game.len(), 1);

        assert!(game.remove_player(&1));
        assert!(!game.remove_player(&1));
        assert!(game.is_empty());
    }

    #[test]
    fn test_reclaimed_player_keeps_state() {
        let mut game = game();
        game.add_player(1);
        game.queue_input(input(1, 1.0));
        game.advance(step_duration(), 10);
        let moved_x = game.player(1).unwrap().x;

        let state = game.add_player(1);
        assert_eq!(state.x, moved_x);
    }

    #[test]
    fn test_queue_input_requires_player() {
        let mut game = game();
        assert!(!game.queue_input(input(7, 1.0)));

        game.add_player(7);
        assert!(game.queue_input(input(7, 1.0)));
        assert_eq!(game.pending_inputs(7), 1);
    }

    #[test]
    fn test_pending_inputs_are_bounded() {
        let mut game = game();
        game.add_player(1);
        for _ in 0..(MAX_PENDING_INPUTS + 10) {
            game.queue_input(input(1, 1.0));
        }
        assert_eq!(game.pending_inputs(1), MAX_PENDING_INPUTS);
    }

    #[test]
    fn test_trimmed_input_keeps_its_presses() {
        let mut game = game();
        game.add_player(1);

        let mut jump = input(1, 0.0);
        jump.jump = true;
        game.queue_input(jump);
        for _ in 0..MAX_PENDING_INPUTS {
            game.queue_input(input(1, 0.0));
        }
        assert_eq!(game.pending_inputs(1), MAX_PENDING_INPUTS);

        game.advance(step_duration(), 10);
        let player = game.player(1).unwrap();
        assert!(!player.on_ground);
        assert!(player.vel_y > 0.0);
    }

    #[test]
    fn test_keepalive_cadence_does_not_build_a_backlog() {
        let mut game = game();
        game.add_player(1);

        // One command every 16ms for 20s, each followed by its processing
        // event, outpaces the 60Hz step.
        for i in 0..1250u64 {
            game.queue_input(input(1, 1.0));
            game.advance(Duration::from_millis(16), i * 16);
            assert!(game.pending_inputs(1) <= MAX_PENDING_INPUTS);
        }

        // At most one step worth of input is waiting.
        let lag = game.fixed_step() * game.pending_inputs(1) as u32;
        assert!(lag <= Duration::from_millis(34), "input lag {:?}", lag);
    }

    #[test]
    fn test_accumulator_drains_whole_steps() {
        let mut game = game();
        game.add_player(1);

        // Less than a step: nothing happens yet.
        assert_eq!(game.advance(Duration::from_millis(10), 0), 0);
        assert_eq!(game.tick, 0);

        // 10ms + 30ms = 40ms covers two 16.6ms steps.
        assert_eq!(game.advance(Duration::from_millis(30), 0), 2);
        assert_eq!(game.tick, 2);
    }

    #[test]
    fn test_accumulator_is_capped() {
        let mut game = game();
        game.add_player(1);

        let steps = game.advance(Duration::from_secs(10), 0);
        assert!((14..=15).contains(&steps), "drained {} steps", steps);
        assert_eq!(game.tick, steps as u64);
    }

    #[test]
    fn test_one_input_per_player_per_step() {
        let mut game = game();
        game.add_player(1);
        game.add_player(2);

        game.queue_input(input(1, 1.0));
        game.queue_input(input(1, 1.0));
        game.queue_input(input(2, -1.0));

        game.advance(step_duration(), 500);

        assert_eq!(game.pending_inputs(1), 1);
        assert_eq!(game.pending_inputs(2), 0);

        let p1 = game.player(1).unwrap();
        let p2 = game.player(2).unwrap();
        assert!(p1.vel_x > 0.0 && p1.vel_x < MAX_SPEED);
        assert!(p2.vel_x < 0.0);
        assert_eq!(p1.last_update, 500);
    }

    #[test]
    fn test_player_without_input_is_not_stepped() {
        let mut game = game();
        let stamp = game.add_player(1).last_update;
        game.add_player(2);
        game.queue_input(input(2, 1.0));

        game.advance(step_duration(), stamp + 1000);

        assert_eq!(game.player(1).unwrap().last_update, stamp);
        assert_eq!(game.player(2).unwrap().last_update, stamp + 1000);
    }

    #[test]
    fn test_snapshot_is_a_detached_copy() {
        let mut game = game();
        game.add_player(2);
        game.add_player(1);

        let snapshot = game.snapshot(42, None);
        assert_eq!(snapshot.server_time, 42);
        assert_eq!(
            snapshot.players.iter().map(|p| p.id).collect::<Vec<_>>(),
            vec![1, 2]
        );

        game.queue_input(input(1, 1.0));
        game.advance(step_duration(), 43);

        // The live state moved, the snapshot did not.
        assert_ne!(game.player(1).unwrap().x, snapshot.players[0].x);
        assert_eq!(snapshot.players[0].x, GameState::spawn_position(1).0);
    }

    #[test]
    fn test_stale_players() {
        let mut game = game();
        let stamp = game.add_player(1).last_update;
        game.add_player(2);
        game.queue_input(input(2, 0.0));
        game.advance(step_duration(), stamp + 9_000);

        let threshold = Duration::from_secs(10);
        assert!(game.stale_players(stamp + 10_000, threshold).is_empty());
        assert_eq!(game.stale_players(stamp + 10_001, threshold), vec![1]);
        assert_eq!(game.stale_players(stamp + 19_001, threshold), vec![1, 2]);
    }
}
