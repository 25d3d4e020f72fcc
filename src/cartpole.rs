use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::env::Environment;
use crate::matrix::Matrix;

const GRAVITY: f32 = 9.8;
const MASS_CART: f32 = 1.0;
const MASS_POLE: f32 = 0.1;
const TOTAL_MASS: f32 = MASS_CART + MASS_POLE;
// Half the pole's length.
const POLE_LENGTH: f32 = 0.5;
const POLE_MASS_LENGTH: f32 = MASS_POLE * POLE_LENGTH;

const X_LIMIT: f32 = 2.4;
const THETA_LIMIT: f32 = 0.209;
const MAX_STEPS: u32 = 500;

/// Cart-pole balancing task. State is `[x, v, theta, omega]^T`, the action is
/// a single horizontal force, and the agent earns +1 for every step the pole
/// stays upright inside the track bounds.
pub struct CartPoleEnvironment {
    players: Vec<String>,

    x: f32,
    v: f32,
    theta: f32,
    omega: f32,
    force: f32,
    steps: u32,
    done: bool,
    initialized: bool,

    state_matrix: Matrix,
    rng: StdRng,
}

impl CartPoleEnvironment {
    pub fn new(seed: u64) -> Self {
        Self {
            players: vec!["agent".to_string()],
            x: 0.0,
            v: 0.0,
            theta: 0.0,
            omega: 0.0,
            force: 0.0,
            steps: 0,
            done: false,
            initialized: false,
            state_matrix: Matrix::column_vector(&[0.0, 0.0, 0.0, 0.0]),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn update_state_matrix(&mut self) {
        self.state_matrix = Matrix::column_vector(&[self.x, self.v, self.theta, self.omega]);
    }
}

impl Environment for CartPoleEnvironment {
    fn players(&self) -> &[String] {
        &self.players
    }

    fn observation_dimension(&self) -> usize {
        4
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
        self.x = self.rng.gen_range(-0.05..0.05);
        self.v = self.rng.gen_range(-0.05..0.05);
        self.theta = self.rng.gen_range(-0.05..0.05);
        self.omega = self.rng.gen_range(-0.05..0.05);
        self.force = 0.0;
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

        let costheta = self.theta.cos();
        let sintheta = self.theta.sin();

        let temp =
            (self.force + POLE_MASS_LENGTH * self.omega * self.omega * sintheta) / TOTAL_MASS;
        let theta_acc = (GRAVITY * sintheta - costheta * temp)
            / (POLE_LENGTH * (4.0 / 3.0 - MASS_POLE * costheta * costheta / TOTAL_MASS));
        let x_acc = temp - POLE_MASS_LENGTH * theta_acc * costheta / TOTAL_MASS;

        // Euler integration.
        self.x += delta_time * self.v;
        self.v += delta_time * x_acc;
        self.theta += delta_time * self.omega;
        self.omega += delta_time * theta_acc;

        self.steps += 1;
        self.update_state_matrix();

        if self.x < -X_LIMIT
            || self.x > X_LIMIT
            || self.theta < -THETA_LIMIT
            || self.theta > THETA_LIMIT
            || self.steps >= MAX_STEPS
        {
            self.done = true;
        }
    }

    fn get_state(&self, _player_id: &str) -> &Matrix {
        &self.state_matrix
    }

    fn set_action(&mut self, _player_id: &str, action: &Matrix) {
        self.force = action.get(0);
    }

    fn get_reward(&self, _player_id: &str) -> f32 {
        if self.done { 0.0 } else { 1.0 }
    }

    /// Console render: a bar with the pole position marked inside the
    /// allowed angle range.
    fn render(&self) {
        let slot = ((self.theta + THETA_LIMIT) / (2.0 * THETA_LIMIT / 11.0)) as i32;
        let mut line = String::with_capacity(11);
        for i in 0..11 {
            line.push(if slot == i { '*' } else { '_' });
        }
        println!("{line}");
    }
}
