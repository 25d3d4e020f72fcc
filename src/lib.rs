//! A small feed-forward neural-network engine with hand-derived gradients,
//! plus a PPO trainer built on top of it. No autograd, no GPU - dense
//! matrices, manual backpropagation, Adam updates, and a clipped-surrogate
//! policy optimizer that drives an `Environment` implementation.

pub mod activations;
pub mod cartpole;
pub mod config;
pub mod db;
pub mod env;
pub mod error;
pub mod layer;
pub mod log;
pub mod matrix;
pub mod network;
pub mod pendulum;
pub mod ppo;
pub mod sampler;
pub mod utils;
