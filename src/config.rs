use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// How advantages are estimated from collected episodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvantageMode {
    /// Discounted reward-to-go minus the critic's value estimate.
    RewardToGo,
    /// Generalized Advantage Estimation over the TD-residual sequence.
    Gae,
}

/// Hyperparameters for the PPO trainer. Serialized as JSON so a run's
/// settings can be kept next to its checkpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PpoConfig {
    pub learning_rate: f32,
    pub discount_factor: f32,
    pub gae_lambda: f32,
    pub clip_threshold: f32,
    pub timesteps_per_batch: usize,
    pub max_timesteps_per_episode: usize,
    pub minibatch_size: usize,
    pub updates_per_iter: usize,
    pub action_sigma: f32,
    /// Margin against the best episode average when deciding whether to
    /// write checkpoints; negative means save every iteration.
    pub save_threshold: f32,
    pub advantage_mode: AdvantageMode,
    pub hidden_layer_size: usize,
    /// Total environment timesteps to train for.
    pub total_timesteps: u64,
    pub seed: u64,
}

impl Default for PpoConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.005,
            discount_factor: 0.95,
            gae_lambda: 0.98,
            clip_threshold: 0.2,
            timesteps_per_batch: 4800,
            max_timesteps_per_episode: 1600,
            minibatch_size: 400,
            updates_per_iter: 5,
            action_sigma: 0.5,
            save_threshold: -1.0,
            advantage_mode: AdvantageMode::Gae,
            hidden_layer_size: 64,
            total_timesteps: 1_000_000,
            seed: 0,
        }
    }
}

impl PpoConfig {
    /// Reads a config from a JSON file; `None` when the file is missing or
    /// malformed, so callers can fall back to defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Option<Self> {
        let content = fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self).expect("config is always serializable");
        fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip_preserves_every_field() {
        let mut config = PpoConfig::default();
        config.learning_rate = 0.001;
        config.advantage_mode = AdvantageMode::RewardToGo;
        config.minibatch_size = 128;

        let path = std::env::temp_dir().join("rlnet_config_test.json");
        config.save(&path).unwrap();
        let loaded = PpoConfig::load(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded.learning_rate, 0.001);
        assert_eq!(loaded.advantage_mode, AdvantageMode::RewardToGo);
        assert_eq!(loaded.minibatch_size, 128);
        assert_eq!(loaded.timesteps_per_batch, config.timesteps_per_batch);
    }

    #[test]
    fn missing_file_yields_none() {
        assert!(PpoConfig::load("no_such_config.json").is_none());
    }
}
