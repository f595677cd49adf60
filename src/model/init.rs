// Weight initialization helpers for demo and test models.

use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};

/// Xavier/Glorot uniform samples: U(-a, a) with a = sqrt(6 / (fan_in + fan_out)).
pub fn xavier_uniform(fan_in: usize, fan_out: usize, n: usize) -> Vec<f32> {
    let a = (6.0 / (fan_in + fan_out) as f32).sqrt();
    let uniform = Uniform::new(-a, a).expect("valid uniform bounds");
    let mut rng = rand::rng();
    (0..n).map(|_| uniform.sample(&mut rng)).collect()
}

/// Kaiming/He normal samples: N(0, sqrt(2 / fan_in)), for ReLU stacks.
pub fn kaiming_normal(fan_in: usize, n: usize) -> Vec<f32> {
    let std = (2.0 / fan_in as f32).sqrt();
    let normal = Normal::new(0.0f32, std).expect("valid normal distribution");
    let mut rng = rand::rng();
    (0..n).map(|_| normal.sample(&mut rng)).collect()
}

/// Uniform samples in [0, 1), occasionally handy for toy fixtures.
pub fn uniform01(n: usize) -> Vec<f32> {
    let mut rng = rand::rng();
    (0..n).map(|_| rng.random::<f32>()).collect()
}
