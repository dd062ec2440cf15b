//! Client input sampling with change detection and a keep-alive cadence

use shared::InputCommand;
use std::time::{Duration, Instant};

/// Send at least this often while joined, even if nothing changed.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(16);

/// What the local player wants to do this frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputIntent {
    pub horizontal_axis: f32,
    pub jump: bool,
    pub dash: bool,
    pub attack: bool,
}

/// Turns per-frame intent into the commands worth sending.
pub struct InputSampler {
    last_intent: InputIntent,
    last_sent: Option<Instant>,
    facing_left: bool,
    keepalive: Duration,
}

impl InputSampler {
    pub fn new() -> Self {
        Self::with_keepalive(KEEPALIVE_INTERVAL)
    }

    pub fn with_keepalive(keepalive: Duration) -> Self {
        Self {
            last_intent: InputIntent::default(),
            last_sent: None,
            facing_left: false,
            keepalive,
        }
    }

    /// Returns a command when the intent changed or the keep-alive is due.
    /// Player id and client time are left for the sender to stamp.
    pub fn sample(&mut self, intent: InputIntent, now: Instant) -> Option<InputCommand> {
        // Facing sticks to the last non-zero direction.
        if intent.horizontal_axis < 0.0 {
            self.facing_left = true;
        } else if intent.horizontal_axis > 0.0 {
            self.facing_left = false;
        }

        let changed = intent != self.last_intent;
        let due = self
            .last_sent
            .map_or(true, |sent| now.saturating_duration_since(sent) >= self.keepalive);

        if !changed && !due {
            return None;
        }

        self.last_intent = intent;
        self.last_sent = Some(now);

        Some(InputCommand {
            player_id: 0,
            horizontal_axis: intent.horizontal_axis,
            jump: intent.jump,
            dash: intent.dash,
            attack: intent.attack,
            facing_left: self.facing_left,
            client_time: 0,
        })
    }

    pub fn facing_left(&self) -> bool {
        self.facing_left
    }
}

impl Default for InputSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_right() -> InputIntent {
        InputIntent {
            horizontal_axis: 1.0,
            ..InputIntent::default()
        }
    }

    #[test]
    fn test_first_sample_is_sent() {
        let mut sampler = InputSampler::new();
        assert!(sampler.sample(InputIntent::default(), Instant::now()).is_some());
    }

    #[test]
    fn test_unchanged_intent_waits_for_keepalive() {
        let mut sampler = InputSampler::new();
        let start = Instant::now();
        sampler.sample(run_right(), start);

        assert!(sampler
            .sample(run_right(), start + Duration::from_millis(5))
            .is_none());
        assert!(sampler
            .sample(run_right(), start + KEEPALIVE_INTERVAL)
            .is_some());
    }

    #[test]
    fn test_change_is_sent_immediately() {
        let mut sampler = InputSampler::new();
        let start = Instant::now();
        sampler.sample(run_right(), start);

        let jump = InputIntent {
            jump: true,
            ..run_right()
        };
        let command = sampler
            .sample(jump, start + Duration::from_millis(1))
            .unwrap();
        assert!(command.jump);
        assert_eq!(command.horizontal_axis, 1.0);
        assert_eq!(command.player_id, 0);
    }

    #[test]
    fn test_facing_follows_last_direction() {
        let mut sampler = InputSampler::with_keepalive(Duration::ZERO);
        let now = Instant::now();

        let left = InputIntent {
            horizontal_axis: -1.0,
            ..InputIntent::default()
        };
        assert!(sampler.sample(left, now).unwrap().facing_left);

        // Releasing the stick keeps facing left.
        let idle = sampler.sample(InputIntent::default(), now).unwrap();
        assert!(idle.facing_left);

        assert!(!sampler.sample(run_right(), now).unwrap().facing_left);
    }
}
