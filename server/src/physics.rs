//! One fixed simulation step for a single player.

use shared::{
    Animation, InputCommand, PlayerState, ATTACK_DURATION, DASH_COOLDOWN, DASH_DURATION,
    DASH_IMPULSE, GRAVITY, GROUND_Y, HORIZONTAL_SMOOTHING, JUMP_VELOCITY, MAX_SPEED,
};

/// Below this horizontal speed a grounded player counts as standing still.
const RUN_THRESHOLD: f32 = 5.0;

/// Server-side view of a player: the replicated state plus the timers that
/// never leave the server.
#[derive(Debug, Clone)]
pub struct SimPlayer {
    pub state: PlayerState,
    pub can_jump: bool,
    /// Seconds until another dash is allowed.
    pub dash_cooldown: f32,
    /// Seconds left in the active dash window.
    pub dash_remaining: f32,
    /// Seconds left in the active attack, doubles as the attack cooldown.
    pub attack_remaining: f32,
}

impl SimPlayer {
    pub fn new(id: u32, x: f32, y: f32) -> Self {
        Self {
            state: PlayerState::new(id, x, y),
            can_jump: true,
            dash_cooldown: 0.0,
            dash_remaining: 0.0,
            attack_remaining: 0.0,
        }
    }

    /// Applies `input` for one step of `dt` seconds and stamps the state
    /// with `now` (server ms).
    pub fn step(&mut self, input: &InputCommand, dt: f32, now: u64) {
        let state = &mut self.state;

        state.last_x = state.x;
        state.last_y = state.y;
        state.facing_left = input.facing_left;

        // Exponential approach toward the target speed; never overshoots.
        let axis = if input.horizontal_axis.is_finite() {
            input.horizontal_axis.clamp(-1.0, 1.0)
        } else {
            0.0
        };
        let target = axis * MAX_SPEED;
        state.vel_x += (target - state.vel_x) * HORIZONTAL_SMOOTHING;

        if input.dash && self.dash_cooldown <= 0.0 {
            let direction = if state.facing_left { -1.0 } else { 1.0 };
            state.vel_x += direction * DASH_IMPULSE;
            self.dash_cooldown = DASH_COOLDOWN;
            self.dash_remaining = DASH_DURATION;
            state.dashing = true;
        }

        if input.attack && self.attack_remaining <= 0.0 {
            self.attack_remaining = ATTACK_DURATION;
            state.attacking = true;
        }

        state.x += state.vel_x * dt;

        let launched = input.jump && state.on_ground && self.can_jump;
        if launched {
            state.vel_y = JUMP_VELOCITY;
            state.on_ground = false;
            self.can_jump = false;
        }

        if !state.on_ground {
            // Gravity starts on the step after launch.
            if !launched {
                state.vel_y -= GRAVITY * dt;
            }
            state.y += state.vel_y * dt;
        }

        if state.y <= GROUND_Y {
            state.y = GROUND_Y;
            state.vel_y = 0.0;
            if !state.on_ground {
                state.on_ground = true;
                self.can_jump = true;
            }
        }

        let animation = select_animation(state);
        if animation == state.animation {
            state.animation_time += dt;
        } else {
            state.animation = animation;
            state.animation_time = 0.0;
        }

        self.dash_cooldown = (self.dash_cooldown - dt).max(0.0);
        self.dash_remaining = (self.dash_remaining - dt).max(0.0);
        self.attack_remaining = (self.attack_remaining - dt).max(0.0);
        state.dashing = self.dash_remaining > 0.0;
        state.attacking = self.attack_remaining > 0.0;

        state.last_update = now;
    }
}

/// Attacking beats running beats idle on the ground; in the air the sign of
/// the vertical velocity picks jump or fall.
pub fn select_animation(state: &PlayerState) -> Animation {
    if !state.on_ground {
        if state.vel_y > 0.0 {
            Animation::Jump
        } else {
            Animation::Fall
        }
    } else if state.attacking {
        Animation::Attack
    } else if state.vel_x.abs() > RUN_THRESHOLD {
        Animation::Run
    } else {
        Animation::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::FIXED_STEP;

    fn input(axis: f32) -> InputCommand {
        InputCommand {
            player_id: 1,
            horizontal_axis: axis,
            jump: false,
            dash: false,
            attack: false,
            facing_left: axis < 0.0,
            client_time: 0,
        }
    }

    fn grounded_player() -> SimPlayer {
        SimPlayer::new(1, 50.0, GROUND_Y)
    }

    #[test]
    fn test_run_approaches_max_speed_monotonically() {
        let mut player = grounded_player();
        let mut previous = player.state.vel_x;

        for step in 0..10 {
            player.step(&input(1.0), FIXED_STEP, step);

            assert!(player.state.vel_x > previous, "step {} did not accelerate", step);
            assert!(player.state.vel_x <= MAX_SPEED, "step {} overshot", step);
            assert!(player.state.on_ground);
            previous = player.state.vel_x;
        }

        assert!(player.state.vel_x > MAX_SPEED * 0.9);
        assert_eq!(player.state.animation, Animation::Run);
    }

    #[test]
    fn test_jump_launch_and_landing() {
        let mut player = grounded_player();
        let mut jump = input(0.0);
        jump.jump = true;

        player.step(&jump, FIXED_STEP, 1);
        assert!(!player.state.on_ground);
        assert_approx_eq!(player.state.vel_y, JUMP_VELOCITY);
        assert!(!player.can_jump);
        assert!(player.state.y > GROUND_Y);
        assert_eq!(player.state.animation, Animation::Jump);

        // Holding jump in the air must not relaunch.
        let mut landed_after = None;
        for step in 0..200 {
            player.step(&jump, FIXED_STEP, 2 + step);
            if player.state.on_ground {
                landed_after = Some(step);
                break;
            }
            assert!(!player.can_jump);
            assert!(player.state.vel_y < JUMP_VELOCITY);
        }

        assert!(landed_after.is_some(), "player never landed");
        assert!(player.can_jump);
        assert_eq!(player.state.y, GROUND_Y);
        assert_eq!(player.state.vel_y, 0.0);
    }

    #[test]
    fn test_fall_animation_after_apex() {
        let mut player = grounded_player();
        let mut jump = input(0.0);
        jump.jump = true;
        player.step(&jump, FIXED_STEP, 0);

        let idle = input(0.0);
        while player.state.vel_y > 0.0 {
            player.step(&idle, FIXED_STEP, 0);
        }
        assert!(!player.state.on_ground);
        assert_eq!(player.state.animation, Animation::Fall);
    }

    #[test]
    fn test_dash_impulse_respects_cooldown() {
        let mut player = grounded_player();
        let mut dash = input(0.0);
        dash.dash = true;
        dash.facing_left = true;

        player.step(&dash, FIXED_STEP, 0);
        assert!(player.state.vel_x < -DASH_IMPULSE * 0.9);
        assert!(player.state.dashing);
        assert_approx_eq!(player.dash_cooldown, DASH_COOLDOWN - FIXED_STEP);

        let speed_after_first = player.state.vel_x;
        player.step(&dash, FIXED_STEP, 0);
        // Second request inside the cooldown only decays toward zero.
        assert!(player.state.vel_x > speed_after_first);

        for _ in 0..120 {
            player.step(&input(0.0), FIXED_STEP, 0);
        }
        assert_eq!(player.dash_cooldown, 0.0);
        assert_eq!(player.dash_remaining, 0.0);
        assert!(!player.state.dashing);
    }

    #[test]
    fn test_attack_animation_has_priority_on_ground() {
        let mut player = grounded_player();
        let mut attack = input(1.0);
        attack.attack = true;

        player.step(&attack, FIXED_STEP, 0);
        assert!(player.state.attacking);
        assert_eq!(player.state.animation, Animation::Attack);

        let steps = (ATTACK_DURATION / FIXED_STEP).ceil() as usize + 1;
        for _ in 0..steps {
            player.step(&input(1.0), FIXED_STEP, 0);
        }
        assert!(!player.state.attacking);
        assert_eq!(player.attack_remaining, 0.0);
        assert_eq!(player.state.animation, Animation::Run);
    }

    #[test]
    fn test_animation_time_resets_on_change() {
        let mut player = grounded_player();
        player.step(&input(0.0), FIXED_STEP, 0);
        player.step(&input(0.0), FIXED_STEP, 0);
        assert_eq!(player.state.animation, Animation::Idle);
        assert_approx_eq!(player.state.animation_time, 2.0 * FIXED_STEP);

        let mut jump = input(0.0);
        jump.jump = true;
        player.step(&jump, FIXED_STEP, 0);
        assert_eq!(player.state.animation, Animation::Jump);
        assert_eq!(player.state.animation_time, 0.0);
    }

    #[test]
    fn test_previous_position_and_stamp() {
        let mut player = grounded_player();
        player.step(&input(1.0), FIXED_STEP, 1234);

        assert_eq!(player.state.last_x, 50.0);
        assert_eq!(player.state.last_y, GROUND_Y);
        assert!(player.state.x > 50.0);
        assert_eq!(player.state.last_update, 1234);
    }

    #[test]
    fn test_axis_is_sanitized() {
        let mut player = grounded_player();
        player.step(&input(f32::NAN), FIXED_STEP, 0);
        assert_eq!(player.state.vel_x, 0.0);

        player.step(&input(50.0), FIXED_STEP, 0);
        assert_approx_eq!(player.state.vel_x, MAX_SPEED * HORIZONTAL_SMOOTHING);
    }
}
