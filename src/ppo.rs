use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;

use crate::activations::{Activation, Loss};
use crate::config::{AdvantageMode, PpoConfig};
use crate::db::{IterationRecord, TrainingDb};
use crate::env::Environment;
use crate::error::MlError;
use crate::log;
use crate::matrix::Matrix;
use crate::network::NeuralNetwork;
use crate::sampler::GaussianSampler;
use crate::utils::{has_non_finite, shuffled_index_sequence, z_score_normalize};

/// Simulation step handed to the environment on every timestep.
const DELTA_TIME: f32 = 1.0 / 60.0;

/// One collected batch of experience, column-indexed by timestep. Created
/// fresh by every trajectory collection, read-only during the update passes,
/// and dropped at the end of the outer iteration.
pub struct TrainingData {
    /// obs_dim x N
    pub observations: Matrix,
    /// act_dim x N
    pub actions: Matrix,
    /// 1 x N, log-probs under the policy that sampled the actions.
    pub log_probabilities: Matrix,
    /// 1 x N, z-score normalized; feeds only the policy-gradient term.
    pub advantages: Matrix,
    /// 1 x N, critic value estimates at collection time.
    pub state_values: Matrix,
    /// 1 x N, un-normalized discounted-return estimates; the critic's
    /// regression target.
    pub value_targets: Matrix,
    pub episode_lengths: Vec<usize>,
}

struct CollectStats {
    timesteps: usize,
    episodes: usize,
    avg_episode_reward: f32,
}

/// Proximal Policy Optimization over an actor/critic network pair.
///
/// The actor maps observations to action means for the fixed-sigma Gaussian
/// sampler; the critic estimates state values. Both use leaky-ReLU hidden
/// layers and Identity outputs - the surrogate gradient below is derived with
/// respect to the raw mean output, and the critic regresses unbounded
/// returns.
pub struct Ppo {
    env: Box<dyn Environment>,
    critic: NeuralNetwork,
    actor: NeuralNetwork,
    sampler: GaussianSampler,
    rng: StdRng,
    config: PpoConfig,

    critic_file: String,
    actor_file: String,
    history_file: String,

    player_id: String,
    timesteps_learned: u64,
    best_episode_avg: f32,
}

impl Ppo {
    pub fn new(
        mut env: Box<dyn Environment>,
        config: PpoConfig,
        critic_file: &str,
        actor_file: &str,
    ) -> Self {
        assert!(config.timesteps_per_batch >= 1, "timesteps_per_batch must be positive");
        assert!(config.minibatch_size >= 1, "minibatch_size must be positive");
        assert!(config.max_timesteps_per_episode >= 1, "max_timesteps_per_episode must be positive");

        if !env.is_initialized() {
            env.initialize();
        }
        let player_id = env.players()[0].clone();
        let obs_dim = env.observation_dimension();
        let act_dim = env.action_dimension();

        let mut rng = StdRng::seed_from_u64(config.seed);
        let critic = NeuralNetwork::with_activations(
            &[obs_dim, config.hidden_layer_size, 1],
            Activation::LeakyRelu,
            Activation::Identity,
            Loss::SquareError,
            &mut rng,
        );
        let actor = NeuralNetwork::with_activations(
            &[obs_dim, config.hidden_layer_size, act_dim],
            Activation::LeakyRelu,
            Activation::Identity,
            Loss::SquareError,
            &mut rng,
        );
        let sampler = GaussianSampler::new(config.action_sigma, config.seed ^ 0xA5A5_5A5A);

        Self {
            env,
            critic,
            actor,
            sampler,
            rng,
            config,
            critic_file: critic_file.to_string(),
            actor_file: actor_file.to_string(),
            history_file: "training.db".to_string(),
            player_id,
            timesteps_learned: 0,
            best_episode_avg: f32::NEG_INFINITY,
        }
    }

    pub fn timesteps_learned(&self) -> u64 {
        self.timesteps_learned
    }

    /// Standard deviation of the action distribution used during training.
    pub fn set_action_sigma(&mut self, action_sigma: f32) {
        self.sampler.set_sigma(action_sigma);
    }

    /// Where the per-iteration history rows go.
    pub fn set_history_file(&mut self, path: &str) {
        self.history_file = path.to_string();
    }

    /// Tries to resume from the checkpoint files. The critic file carries the
    /// cumulative timestep counter in front of the network. Returns false
    /// (and keeps the fresh networks) when either file is missing or corrupt.
    pub fn load_from_files(&mut self) -> bool {
        match self.try_load_files() {
            Ok(()) => {
                log::info(&format!(
                    "resumed networks from '{}' / '{}' at {} timesteps",
                    self.critic_file, self.actor_file, self.timesteps_learned
                ));
                true
            }
            Err(err) => {
                log::warn(&format!("no usable checkpoint ({err}) - starting fresh"));
                false
            }
        }
    }

    fn try_load_files(&mut self) -> Result<(), MlError> {
        let mut input = BufReader::new(File::open(&self.critic_file)?);
        let mut word = [0u8; 8];
        input.read_exact(&mut word)?;
        let timesteps = u64::from_le_bytes(word);
        let critic = NeuralNetwork::load(
            &mut input,
            Activation::LeakyRelu,
            Activation::Identity,
            Loss::SquareError,
        )?;
        let actor = NeuralNetwork::load_from_file(
            &self.actor_file,
            Activation::LeakyRelu,
            Activation::Identity,
            Loss::SquareError,
        )?;

        self.timesteps_learned = timesteps;
        self.critic = critic;
        self.actor = actor;
        Ok(())
    }

    fn save(&self) -> std::io::Result<()> {
        let mut out = BufWriter::new(File::create(&self.critic_file)?);
        out.write_all(&self.timesteps_learned.to_le_bytes())?;
        self.critic.save(&mut out)?;
        out.flush()?;
        self.actor.save_to_file(&self.actor_file)
    }

    /// Outer training loop: collect a batch, estimate advantages, then run
    /// `updates_per_iter` passes of minibatched policy/critic updates with a
    /// linearly decaying learning rate, persisting after every iteration.
    pub fn learn(&mut self, max_timesteps: u64) -> Result<(), MlError> {
        let history = match TrainingDb::open(&self.history_file) {
            Ok(db) => Some(db),
            Err(err) => {
                log::warn(&format!("training history unavailable: {err}"));
                None
            }
        };

        let mut iteration = 0u64;
        while self.timesteps_learned < max_timesteps {
            iteration += 1;

            let (data, stats) = self.collect_trajectories()?;
            self.timesteps_learned += stats.timesteps as u64;

            // lr_t = lr_0 * (1 - elapsed / budget)
            let progress = (self.timesteps_learned as f32 / max_timesteps as f32).min(1.0);
            let current_lr = self.config.learning_rate * (1.0 - progress);

            let n = data.observations.cols();
            let mut clip_fraction = 0.0;
            for _ in 0..self.config.updates_per_iter {
                let sequence = shuffled_index_sequence(n, &mut self.rng);
                let mut start = 0;
                while start < n {
                    let minibatch = Self::generate_minibatch(
                        &data,
                        &sequence,
                        start,
                        self.config.minibatch_size,
                    );
                    clip_fraction = self.update_policy(&minibatch, current_lr);
                    self.fit_value_function(&minibatch, current_lr);
                    start += self.config.minibatch_size;
                }
            }

            self.critic.forward(&data.observations);
            let critic_loss = self.critic.sum_loss(&data.value_targets);

            log::info(&format!(
                "iter {iteration} | {} timesteps total | {} episodes | avg reward {:.2} | critic loss {:.4} | lr {:.6}",
                self.timesteps_learned, stats.episodes, stats.avg_episode_reward, critic_loss, current_lr
            ));
            log::scalar(self.timesteps_learned, "avg_episode_reward", stats.avg_episode_reward);
            log::scalar(self.timesteps_learned, "critic_loss", critic_loss);
            log::scalar(self.timesteps_learned, "clip_fraction", clip_fraction);
            log::scalar(self.timesteps_learned, "learning_rate", current_lr);

            if let Some(db) = &history {
                let record = IterationRecord {
                    iteration,
                    timesteps_learned: self.timesteps_learned,
                    episodes: stats.episodes as u64,
                    avg_episode_reward: stats.avg_episode_reward,
                    critic_loss,
                    learning_rate: current_lr,
                };
                if let Err(err) = db.insert_iteration(&record) {
                    log::warn(&format!("failed to record iteration: {err}"));
                }
            }

            if self.config.save_threshold < 0.0
                || stats.avg_episode_reward >= self.best_episode_avg - self.config.save_threshold
            {
                if let Err(err) = self.save() {
                    log::error(&format!("failed to save checkpoint: {err}"));
                }
            }
            if stats.avg_episode_reward > self.best_episode_avg {
                self.best_episode_avg = stats.avg_episode_reward;
            }
        }

        Ok(())
    }

    /// Runs episodes until the batch holds at least `timesteps_per_batch`
    /// timesteps, recording per-timestep observation, sampled action, its
    /// log-probability and reward, plus the critic's value estimates per
    /// episode. Episodes are never mixed across the backward advantage pass.
    fn collect_trajectories(&mut self) -> Result<(TrainingData, CollectStats), MlError> {
        let player = self.player_id.clone();

        let mut observations: Vec<Matrix> = Vec::new();
        let mut actions: Vec<Matrix> = Vec::new();
        let mut log_probabilities: Vec<f32> = Vec::new();
        let mut advantages_raw: Vec<f32> = Vec::new();
        let mut state_values: Vec<f32> = Vec::new();
        let mut value_targets: Vec<f32> = Vec::new();
        let mut episode_lengths: Vec<usize> = Vec::new();
        let mut episode_reward_sums: Vec<f32> = Vec::new();

        let mut batch_timesteps = 0usize;
        while batch_timesteps < self.config.timesteps_per_batch {
            self.env.reset();

            let mut episode_observations: Vec<Matrix> = Vec::new();
            let mut episode_rewards: Vec<f32> = Vec::new();

            for _ in 0..self.config.max_timesteps_per_episode {
                if self.env.is_finished() {
                    break;
                }

                let observation = self.env.get_state(&player).clone();
                let action_mean = self.actor.forward(&observation).clone();
                let action = self.sampler.sample(&action_mean);
                let log_probability = self.sampler.log_probability(&action_mean, &action);

                self.env.set_action(&player, &action);
                self.env.update(DELTA_TIME);
                let reward = self.env.get_reward(&player);

                episode_observations.push(observation.clone());
                observations.push(observation);
                actions.push(action);
                log_probabilities.push(log_probability);
                episode_rewards.push(reward);
                batch_timesteps += 1;
            }

            if episode_rewards.is_empty() {
                return Err(MlError::EmptyInput {
                    context: "collect_trajectories (episode produced no timesteps)",
                });
            }

            // Critic values for the whole episode in one batched pass.
            let episode_obs = vector_data_to_matrix(&episode_observations)?;
            let values = self.critic.forward(&episode_obs).clone();
            state_values.extend_from_slice(values.data());

            match self.config.advantage_mode {
                AdvantageMode::RewardToGo => {
                    let rtgs = rewards_to_go(&episode_rewards, self.config.discount_factor);
                    for (t, &rtg) in rtgs.iter().enumerate() {
                        advantages_raw.push(rtg - values.get(t));
                        value_targets.push(rtg);
                    }
                }
                AdvantageMode::Gae => {
                    let gaes = generalized_advantage_estimates(
                        &episode_rewards,
                        values.data(),
                        self.config.discount_factor,
                        self.config.gae_lambda,
                    );
                    for (t, &gae) in gaes.iter().enumerate() {
                        advantages_raw.push(gae);
                        value_targets.push(gae + values.get(t));
                    }
                }
            }

            episode_lengths.push(episode_rewards.len());
            episode_reward_sums.push(episode_rewards.iter().sum());
        }

        let advantages = z_score_normalize(&Matrix::row_vector(&advantages_raw));

        let data = TrainingData {
            observations: vector_data_to_matrix(&observations)?,
            actions: vector_data_to_matrix(&actions)?,
            log_probabilities: Matrix::row_vector(&log_probabilities),
            advantages,
            state_values: Matrix::row_vector(&state_values),
            value_targets: Matrix::row_vector(&value_targets),
            episode_lengths,
        };

        let episodes = episode_reward_sums.len();
        let avg_episode_reward = episode_reward_sums.iter().sum::<f32>() / episodes as f32;

        Ok((
            data,
            CollectStats { timesteps: batch_timesteps, episodes, avg_episode_reward },
        ))
    }

    /// Clipped-surrogate policy update on one (mini)batch. Recomputes the
    /// current policy's means and log-probs for the already-collected
    /// actions, forms the probability ratios, and feeds the surrogate
    /// gradient straight into the actor's external-gradient backprop path.
    /// Returns the fraction of timesteps where the clip was binding.
    fn update_policy(&mut self, data: &TrainingData, learning_rate: f32) -> f32 {
        let means = self.actor.forward(&data.observations).clone();
        let current_log_probs = self.sampler.batch_log_probabilities(&means, &data.actions);

        let n = data.observations.cols();
        let act_dim = data.actions.rows();

        let ratios: Vec<f32> = (0..n)
            .map(|t| (current_log_probs.get(t) - data.log_probabilities.get(t)).exp())
            .collect();

        let clip = self.config.clip_threshold;
        let sigma_sq = self.sampler.sigma() * self.sampler.sigma();
        let advantages = data.advantages.data();
        let actions = &data.actions;

        // Every (dim, timestep) cell is independent: parallel map over the
        // flat index, disjoint writes only.
        let grad_data: Vec<f32> = (0..act_dim * n)
            .into_par_iter()
            .map(|idx| {
                let t = idx % n;
                let i = idx / n;
                surrogate_gradient(
                    advantages[t],
                    ratios[t],
                    clip,
                    sigma_sq,
                    actions.at(i, t),
                    means.at(i, t),
                )
            })
            .collect();

        if has_non_finite(&grad_data) {
            log::error("non-finite policy gradient - skipping this update");
            return 1.0;
        }

        let clipped = ratios
            .iter()
            .zip(advantages)
            .filter(|&(&ratio, &adv)| {
                !((adv > 0.0 && ratio < 1.0 + clip) || (adv < 0.0 && ratio > 1.0 - clip))
            })
            .count();

        let gradients = Matrix::from_flat(act_dim, n, grad_data);
        self.actor.backward_from_gradient(gradients, learning_rate);

        clipped as f32 / n as f32
    }

    /// Supervised regression of the critic toward the stored un-normalized
    /// return estimates. Returns the pre-update loss.
    fn fit_value_function(&mut self, data: &TrainingData, learning_rate: f32) -> f32 {
        self.critic.forward(&data.observations);
        let loss = self.critic.sum_loss(&data.value_targets);
        self.critic.backward_to_target(&data.value_targets, learning_rate);
        loss
    }

    /// Slices the columns `sequence[start .. start+minibatch_size]` out of
    /// the batch; the tail minibatch clamps to whatever remains.
    fn generate_minibatch(
        data: &TrainingData,
        sequence: &[usize],
        start: usize,
        minibatch_size: usize,
    ) -> TrainingData {
        let end = (start + minibatch_size).min(sequence.len());
        let idx = &sequence[start..end];
        TrainingData {
            observations: data.observations.gather_columns(idx),
            actions: data.actions.gather_columns(idx),
            log_probabilities: data.log_probabilities.gather_columns(idx),
            advantages: data.advantages.gather_columns(idx),
            state_values: data.state_values.gather_columns(idx),
            value_targets: data.value_targets.gather_columns(idx),
            // Minibatches mix episodes, so per-episode lengths stop being
            // meaningful here.
            episode_lengths: Vec::new(),
        }
    }

    /// Runs the greedy policy (mean action, no sampling noise) with console
    /// rendering, roughly in real time.
    pub fn show_real_time(&mut self, episodes: usize) {
        let player = self.player_id.clone();
        for _ in 0..episodes {
            self.env.reset();
            let mut total_reward = 0.0f32;
            for _ in 0..self.config.max_timesteps_per_episode {
                if self.env.is_finished() {
                    break;
                }
                let observation = self.env.get_state(&player).clone();
                let action = self.actor.forward(&observation).clone();
                self.env.set_action(&player, &action);
                self.env.update(DELTA_TIME);
                total_reward += self.env.get_reward(&player);
                self.env.render();
                std::thread::sleep(std::time::Duration::from_secs_f32(DELTA_TIME));
            }
            log::info(&format!("episode finished with total reward {total_reward:.2}"));
        }
    }
}

/// Discounted cumulative future reward per timestep of one episode,
/// iterating backward: `rtg[t] = r[t] + gamma * rtg[t+1]`.
fn rewards_to_go(rewards: &[f32], discount_factor: f32) -> Vec<f32> {
    let mut rtgs = vec![0.0f32; rewards.len()];
    let mut discounted = 0.0f32;
    for t in (0..rewards.len()).rev() {
        discounted = rewards[t] + discount_factor * discounted;
        rtgs[t] = discounted;
    }
    rtgs
}

/// Generalized Advantage Estimation over one episode. The final step has no
/// bootstrap (`gae = r - V`); episodes are treated as fully terminating.
fn generalized_advantage_estimates(
    rewards: &[f32],
    values: &[f32],
    discount_factor: f32,
    gae_lambda: f32,
) -> Vec<f32> {
    let n = rewards.len();
    let mut gaes = vec![0.0f32; n];
    let mut gae = 0.0f32;
    for t in (0..n).rev() {
        if t == n - 1 {
            gae = rewards[t] - values[t];
        } else {
            let delta = rewards[t] + discount_factor * values[t + 1] - values[t];
            gae = delta + discount_factor * gae_lambda * gae;
        }
        gaes[t] = gae;
    }
    gaes
}

/// Per-cell clipped-surrogate gradient. When the clip is binding the
/// surrogate is flat and the contribution is exactly zero; otherwise the
/// gradient of `-advantage * ratio` with respect to the action mean is
/// `-advantage * ratio / sigma^2 * (action - mean)` (the Gaussian
/// log-density's own mean-gradient, with sigma constant across the batch).
fn surrogate_gradient(
    advantage: f32,
    ratio: f32,
    clip: f32,
    sigma_sq: f32,
    action: f32,
    mean: f32,
) -> f32 {
    let unclipped =
        (advantage > 0.0 && ratio < 1.0 + clip) || (advantage < 0.0 && ratio > 1.0 - clip);
    if unclipped {
        -advantage * ratio / sigma_sq * (action - mean)
    } else {
        0.0
    }
}

/// Converts a sequence of column vectors into one matrix, one column per
/// element. Refuses empty input instead of producing a degenerate matrix.
fn vector_data_to_matrix(data: &[Matrix]) -> Result<Matrix, MlError> {
    let Some(first) = data.first() else {
        return Err(MlError::EmptyInput { context: "vector_data_to_matrix" });
    };

    let rows = first.size();
    let cols = data.len();
    let mut converted = Matrix::zeros(rows, cols);
    for (i, column) in data.iter().enumerate() {
        debug_assert!(
            column.size() == rows,
            "all collected vectors must share one dimension"
        );
        for j in 0..rows {
            converted.data_mut()[j * cols + i] = column.get(j);
        }
    }
    Ok(converted)
}
