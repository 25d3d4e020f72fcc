use std::f32::consts::PI;

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::matrix::Matrix;

/// Fixed-sigma Gaussian action distribution.
///
/// Every action dimension and every timestep of a batch shares the same
/// standard deviation. The batched log-probability formula below depends on
/// that assumption; a per-dimension or per-step sigma would need a different
/// computation, and so would the probability-ratio gradient in the policy
/// trainer.
pub struct GaussianSampler {
    rng: StdRng,
    sigma: f32,
}

impl GaussianSampler {
    pub fn new(sigma: f32, seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed), sigma }
    }

    pub fn sigma(&self) -> f32 {
        self.sigma
    }

    pub fn set_sigma(&mut self, sigma: f32) {
        self.sigma = sigma;
    }

    /// Standard normal draw via the Box-Muller transform.
    fn next_standard_normal(&mut self) -> f32 {
        let u1: f32 = self.rng.gen_range(0.0f32..1.0).max(1.0e-10);
        let u2: f32 = self.rng.gen_range(0.0f32..1.0);
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }

    pub fn sample_scalar(&mut self, mean: f32) -> f32 {
        mean + self.next_standard_normal() * self.sigma
    }

    /// `mean + N(0, sigma)` for every element of the mean vector.
    pub fn sample(&mut self, mean: &Matrix) -> Matrix {
        let mut sample = mean.clone();
        for v in sample.data_mut() {
            *v += self.next_standard_normal() * self.sigma;
        }
        sample
    }

    /// Gaussian log-density of `sample` under `mean`, summed across
    /// dimensions: per dimension `-log(sigma*sqrt(2*pi)) - (x-mu)^2 / (2*sigma^2)`.
    pub fn log_probability(&self, mean: &Matrix, sample: &Matrix) -> f32 {
        debug_assert!(
            mean.size() == sample.size(),
            "invalid sizes in log probability calculation"
        );

        let shared_part = (self.sigma * (2.0 * PI).sqrt()).ln();
        let mut log_probability = 0.0f32;
        for i in 0..sample.size() {
            let diff = sample.get(i) - mean.get(i);
            log_probability += -shared_part - 0.5 * (diff * diff) / (self.sigma * self.sigma);
        }
        log_probability
    }

    /// Vectorized log-probabilities over a batch of columns. Returns a
    /// 1 x batch row vector; column t holds the summed log-density of
    /// `samples[:, t]` under `means[:, t]`.
    pub fn batch_log_probabilities(&self, means: &Matrix, samples: &Matrix) -> Matrix {
        debug_assert!(
            means.rows() == samples.rows() && means.cols() == samples.cols(),
            "invalid sizes in log probability calculation"
        );

        let shared_part = (self.sigma * (2.0 * PI).sqrt()).ln();
        let inv_two_sigma_sq = 0.5 / (self.sigma * self.sigma);

        let mut log_probs = Matrix::zeros(1, samples.cols());
        for t in 0..samples.cols() {
            let mut log_probability = 0.0f32;
            for j in 0..samples.rows() {
                let diff = samples.at(j, t) - means.at(j, t);
                log_probability += -shared_part - diff * diff * inv_two_sigma_sq;
            }
            log_probs.data_mut()[t] = log_probability;
        }
        log_probs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vanishing_sigma_collapses_samples_onto_the_mean() {
        let mut sampler = GaussianSampler::new(1.0e-12, 99);
        let mean = Matrix::column_vector(&[1.0, -2.0, 0.5]);
        let sample = sampler.sample(&mean);
        for i in 0..mean.size() {
            assert!((sample.get(i) - mean.get(i)).abs() < 1e-6);
        }
    }

    #[test]
    fn log_probability_peaks_at_the_mean() {
        let sampler = GaussianSampler::new(0.5, 0);
        let mean = Matrix::column_vector(&[0.3, -0.1]);
        let at_mean = sampler.log_probability(&mean, &mean);

        let off = Matrix::column_vector(&[0.4, -0.1]);
        assert!(at_mean > sampler.log_probability(&mean, &off));

        let far = Matrix::column_vector(&[2.0, 1.0]);
        assert!(sampler.log_probability(&mean, &off) > sampler.log_probability(&mean, &far));
    }

    #[test]
    fn scalar_log_density_matches_the_closed_form() {
        let sampler = GaussianSampler::new(2.0, 0);
        let mean = Matrix::column_vector(&[1.0]);
        let sample = Matrix::column_vector(&[2.0]);

        let expected = -(2.0f32 * (2.0 * PI).sqrt()).ln() - 0.5 * (1.0 / 4.0);
        assert!((sampler.log_probability(&mean, &sample) - expected).abs() < 1e-6);
    }

    #[test]
    fn batched_log_probabilities_agree_with_per_column_sums() {
        let sampler = GaussianSampler::new(0.7, 0);
        let means = Matrix::from_rows(&[vec![0.0, 1.0, -1.0], vec![0.5, 0.5, 0.5]]).unwrap();
        let samples = Matrix::from_rows(&[vec![0.1, 0.8, -1.2], vec![0.4, 0.9, 0.0]]).unwrap();

        let batch = sampler.batch_log_probabilities(&means, &samples);
        assert_eq!(batch.rows(), 1);
        assert_eq!(batch.cols(), 3);

        for t in 0..3 {
            let mean_col = Matrix::column_vector(&[means.at(0, t), means.at(1, t)]);
            let sample_col = Matrix::column_vector(&[samples.at(0, t), samples.at(1, t)]);
            let single = sampler.log_probability(&mean_col, &sample_col);
            assert!((batch.get(t) - single).abs() < 1e-5);
        }
    }

    #[test]
    fn seeded_samplers_are_reproducible() {
        let mean = Matrix::column_vector(&[0.0, 0.0, 0.0, 0.0]);
        let a = GaussianSampler::new(1.0, 1234).sample(&mean);
        let b = GaussianSampler::new(1.0, 1234).sample(&mean);
        assert_eq!(a, b);
    }
}
