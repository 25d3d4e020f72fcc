use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;

use crate::matrix::Matrix;

/// Xavier-style init limit scaled for leaky-ReLU layers.
pub fn init_from_num_inputs(num_inputs: usize, rng: &mut StdRng) -> f32 {
    let gain = (2.0f32 / (1.0 + 0.01 * 0.01)).sqrt();
    let limit = (6.0 / num_inputs as f32).sqrt() * gain;
    rng.gen_range(-limit..limit)
}

/// Subtracts the mean and divides by the standard deviation (plus a small
/// epsilon) over every element. Elements are independent, so the write pass
/// runs in parallel.
pub fn z_score_normalize(mat: &Matrix) -> Matrix {
    if mat.size() == 0 {
        return mat.clone();
    }

    let n = mat.size() as f32;
    let mut mean = 0.0f32;
    let mut variance = 0.0f32;
    for &v in mat.data() {
        mean += v;
        variance += v * v;
    }
    mean /= n;
    variance = variance / n - mean * mean;
    let stddev = variance.max(0.0).sqrt();

    let mut norm = mat.clone();
    norm.data_mut()
        .par_iter_mut()
        .for_each(|v| *v = (*v - mean) / (stddev + 1.0e-8));
    norm
}

/// A random permutation of `0..range_length`, used to slice collected
/// timesteps into minibatches.
pub fn shuffled_index_sequence(range_length: usize, rng: &mut StdRng) -> Vec<usize> {
    let mut values: Vec<usize> = (0..range_length).collect();
    values.shuffle(rng);
    values
}

pub fn has_non_finite(xs: &[f32]) -> bool {
    xs.iter().any(|v| !v.is_finite())
}

/// min / max / mean summary of a slice, for logging.
pub struct Stats {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
}

pub fn vec_stats(xs: &[f32]) -> Stats {
    if xs.is_empty() {
        return Stats { min: 0.0, max: 0.0, mean: 0.0 };
    }
    let mut mn = xs[0];
    let mut mx = xs[0];
    let mut sum = 0.0f32;
    for &v in xs {
        if v < mn {
            mn = v;
        }
        if v > mx {
            mx = v;
        }
        sum += v;
    }
    Stats { min: mn, max: mx, mean: sum / (xs.len() as f32) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn z_score_normalize_centers_and_scales() {
        let m = Matrix::row_vector(&[1.0, 2.0, 3.0, 4.0]);
        let n = z_score_normalize(&m);

        let mean: f32 = n.data().iter().sum::<f32>() / 4.0;
        assert!(mean.abs() < 1e-5);

        let var: f32 = n.data().iter().map(|v| v * v).sum::<f32>() / 4.0;
        assert!((var - 1.0).abs() < 1e-3);
    }

    #[test]
    fn z_score_normalize_survives_constant_input() {
        let m = Matrix::row_vector(&[5.0, 5.0, 5.0]);
        let n = z_score_normalize(&m);
        assert!(!has_non_finite(n.data()));
    }

    #[test]
    fn shuffled_sequence_is_a_permutation() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut seq = shuffled_index_sequence(100, &mut rng);
        seq.sort_unstable();
        assert_eq!(seq, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn shuffled_sequence_is_reproducible_for_a_seed() {
        let a = shuffled_index_sequence(50, &mut StdRng::seed_from_u64(3));
        let b = shuffled_index_sequence(50, &mut StdRng::seed_from_u64(3));
        assert_eq!(a, b);
    }

    #[test]
    fn non_finite_detection() {
        assert!(!has_non_finite(&[1.0, -2.0, 0.0]));
        assert!(has_non_finite(&[1.0, f32::NAN]));
        assert!(has_non_finite(&[f32::INFINITY]));
    }

    #[test]
    fn stats_summary() {
        let s = vec_stats(&[1.0, -3.0, 2.0]);
        assert_eq!(s.min, -3.0);
        assert_eq!(s.max, 2.0);
        assert!((s.mean - 0.0).abs() < 1e-6);
    }
}
