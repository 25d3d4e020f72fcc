use std::f32::consts::PI;

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::env::Environment;
use crate::matrix::Matrix;

const G: f32 = 9.81;
const LENGTH: f32 = 1.0;
const MASS: f32 = 1.0;
// Moment of inertia of a simple pendulum.
const INERTIA: f32 = MASS * LENGTH * LENGTH;

const MAX_TORQUE: f32 = 2.0;
const MAX_STEPS: u32 = 200;

/// Pendulum stabilization task. State is `[cos(theta), sin(theta), omega]^T`,
/// the action is a torque clamped to `[-2, 2]`, and the reward is the
/// negative cost `theta^2 + 0.1*omega^2 + 0.001*torque^2`.
pub struct PendulumEnvironment {
    players: Vec<String>,

    theta: f32,
    theta_dot: f32,
    torque: f32,
    steps: u32,
    done: bool,
    initialized: bool,

    state_matrix: Matrix,
    rng: StdRng,
}

impl PendulumEnvironment {
    pub fn new(seed: u64) -> Self {
        Self {
            players: vec!["agent".to_string()],
            theta: 0.0,
            theta_dot: 0.0,
            torque: 0.0,
            steps: 0,
            done: false,
            initialized: false,
            state_matrix: Matrix::column_vector(&[1.0, 0.0, 0.0]),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn update_state_matrix(&mut self) {
        self.state_matrix =
            Matrix::column_vector(&[self.theta.cos(), self.theta.sin(), self.theta_dot]);
    }
}

impl Environment for PendulumEnvironment {
    fn players(&self) -> &[String] {
        &self.players
    }

    fn observation_dimension(&self) -> usize {
        3
    }

    fn action_dimension(&self) -> usize {
        1
    }

    fn initialize(&mut self) {
        self.reset();
        self.initialized = true;
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn close(&mut self) {
        self.initialized = false;
    }

    fn reset(&mut self) {
        self.theta = self.rng.gen_range(-0.2..0.2);
        self.theta_dot = self.rng.gen_range(-0.2..0.2);
        self.torque = 0.0;
        self.steps = 0;
        self.done = false;
        self.update_state_matrix();
    }

    fn is_finished(&self) -> bool {
        self.done
    }

    fn update(&mut self, delta_time: f32) {
        if self.done {
            return;
        }

        let theta_ddot = -(G / LENGTH) * self.theta.sin() + self.torque / INERTIA;

        self.theta_dot += delta_time * theta_ddot;
        self.theta += delta_time * self.theta_dot;

        // Wrap theta into [-pi, pi] for numerical stability.
        if self.theta > PI {
            self.theta -= 2.0 * PI;
        } else if self.theta < -PI {
            self.theta += 2.0 * PI;
        }

        self.steps += 1;
        self.update_state_matrix();

        if self.steps >= MAX_STEPS {
            self.done = true;
        }
    }

    fn get_state(&self, _player_id: &str) -> &Matrix {
        &self.state_matrix
    }

    fn set_action(&mut self, _player_id: &str, action: &Matrix) {
        self.torque = action.get(0).clamp(-MAX_TORQUE, MAX_TORQUE);
    }

    fn get_reward(&self, _player_id: &str) -> f32 {
        let cost = self.theta * self.theta
            + 0.1 * self.theta_dot * self.theta_dot
            + 0.001 * self.torque * self.torque;
        -cost
    }

    fn render(&self) {
        println!(
            "step: {}, theta: {:.4}, theta_dot: {:.4}, torque: {:.3}",
            self.steps, self.theta, self.theta_dot, self.torque
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_encodes_the_angle_as_cos_sin() {
        let mut env = PendulumEnvironment::new(0);
        env.initialize();
        let state = env.get_state("agent");
        let (c, s) = (state.get(0), state.get(1));
        assert!((c * c + s * s - 1.0).abs() < 1e-5);
    }

    #[test]
    fn reward_drops_when_driven_away_from_rest() {
        let mut env = PendulumEnvironment::new(4);
        env.initialize();
        let near_rest = env.get_reward("agent");
        // Push with constant torque; at some point the swing must cost more
        // than the near-rest start.
        let max = Matrix::column_vector(&[MAX_TORQUE]);
        let mut worst = f32::INFINITY;
        for _ in 0..50 {
            env.set_action("agent", &max);
            env.update(1.0 / 60.0);
            worst = worst.min(env.get_reward("agent"));
        }
        assert!(near_rest > worst);
    }

    #[test]
    fn torque_is_clamped() {
        let mut env = PendulumEnvironment::new(1);
        env.initialize();
        env.set_action("agent", &Matrix::column_vector(&[50.0]));
        assert!(env.torque <= MAX_TORQUE);
    }

    #[test]
    fn episode_ends_after_the_step_budget() {
        let mut env = PendulumEnvironment::new(2);
        env.initialize();
        let idle = Matrix::column_vector(&[0.0]);
        for _ in 0..MAX_STEPS {
            env.set_action("agent", &idle);
            env.update(1.0 / 60.0);
        }
        assert!(env.is_finished());
    }
}
