//! Seeded random-number service.
//!
//! A single root seed drives one [`rand::rngs::StdRng`] stream; every draw
//! is made against that one stream so that, for a fixed seed and fixed call
//! sequence, outputs are bit-reproducible. Reseeding mid-simulation is not
//! exposed — there is deliberately no `reseed` method.
//!
//! `uniform_int(min, max)` uses the half-open convention `[min, max)`,
//! matching `rand::Rng::gen_range`.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, WeightedIndex};

pub struct RngService {
    rng: StdRng,
}

impl RngService {
    pub fn new(seed: u64) -> Self {
        RngService {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Uniform draw in `[min, max)`.
    pub fn uniform(&mut self, min: f64, max: f64) -> f64 {
        if max <= min {
            return min;
        }
        self.rng.gen_range(min..max)
    }

    /// Uniform integer draw in `[min, max)`.
    pub fn uniform_int(&mut self, min: u64, max: u64) -> u64 {
        if max <= min {
            return min;
        }
        self.rng.gen_range(min..max)
    }

    /// A full-range uniform `u64`, used for block ids and node ids.
    pub fn uniform_u64(&mut self) -> u64 {
        self.rng.gen()
    }

    pub fn normal(&mut self, mean: f64, variance: f64) -> f64 {
        let std_dev = variance.max(0.0).sqrt();
        if std_dev == 0.0 {
            return mean;
        }
        let dist = Normal::new(mean, std_dev).expect("finite mean/variance");
        dist.sample(&mut self.rng)
    }

    /// Normal draw, resampled until non-negative. Several retry/backoff
    /// schedules in the original model (bucket refresh, missing-block
    /// recovery) reject negative draws this way rather than clamping, to
    /// avoid skewing the distribution's mean toward zero.
    pub fn normal_duration_nonneg(&mut self, mean_secs: f64, variance_secs2: f64) -> Duration {
        loop {
            let secs = self.normal(mean_secs, variance_secs2);
            if secs >= 0.0 {
                return Duration::from_secs_f64(secs);
            }
        }
    }

    /// Exponential inter-arrival draw via inverse-transform sampling:
    /// `Δt = -mean * ln(1 - u)` for `u ~ Uniform[0, 1)`. Never negative by
    /// construction since `ln(1 - u) <= 0` for `u` in `[0, 1)`.
    pub fn exponential_duration(&mut self, mean_secs: f64) -> Duration {
        let u: f64 = self.uniform(0.0, 1.0);
        Duration::from_secs_f64(-mean_secs * (1.0 - u).ln())
    }

    /// Draw an index with probability proportional to `weights`.
    pub fn discrete(&mut self, weights: &[f64]) -> usize {
        let dist = WeightedIndex::new(weights).expect("at least one positive weight");
        dist.sample(&mut self.rng)
    }

    /// Sample from a piecewise-linear density defined by `densities[i]` at
    /// breakpoint `intervals[i]`. Segment selection is weighted by
    /// trapezoid area; within a segment the draw is inverse-transformed
    /// against the (possibly sloped) linear density rather than just
    /// uniform, so a steeper density still biases samples correctly.
    pub fn piecewise_linear(&mut self, intervals: &[f64], densities: &[f64]) -> f64 {
        assert!(intervals.len() >= 2 && intervals.len() == densities.len());
        let n = intervals.len() - 1;
        let weights: Vec<f64> = (0..n)
            .map(|i| {
                let width = intervals[i + 1] - intervals[i];
                0.5 * (densities[i] + densities[i + 1]) * width
            })
            .collect();
        let seg = self.discrete(&weights);
        let (x0, x1) = (intervals[seg], intervals[seg + 1]);
        let (y0, y1) = (densities[seg], densities[seg + 1]);
        let u: f64 = self.uniform(0.0, 1.0);
        if (y1 - y0).abs() < 1e-12 {
            return x0 + u * (x1 - x0);
        }
        // Invert the CDF of a linear ramp from y0 to y1 over [0,1]:
        // F(t) = (y0*t + 0.5*(y1-y0)*t^2) / area, solve F(t) = u for t.
        let area = 0.5 * (y0 + y1);
        let a = 0.5 * (y1 - y0) / area;
        let b = y0 / area;
        let c = -u;
        let t = if a.abs() < 1e-12 {
            -c / b
        } else {
            let disc = (b * b - 4.0 * a * c).max(0.0).sqrt();
            (-b + disc) / (2.0 * a)
        };
        x0 + t.clamp(0.0, 1.0) * (x1 - x0)
    }

    pub fn shuffle<T>(&mut self, slice: &mut [T]) {
        slice.shuffle(&mut self.rng);
    }

    /// Pick up to `n` unique elements from `pool` uniformly at random,
    /// without replacement, preserving neither input order nor stability.
    pub fn choose_unique<'a, T>(&mut self, pool: &'a [T], n: usize) -> Vec<&'a T> {
        let mut indices: Vec<usize> = (0..pool.len()).collect();
        self.shuffle(&mut indices);
        indices.into_iter().take(n).map(|i| &pool[i]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        let mut a = RngService::new(42);
        let mut b = RngService::new(42);
        let seq_a: Vec<f64> = (0..20).map(|_| a.uniform(0.0, 1.0)).collect();
        let seq_b: Vec<f64> = (0..20).map(|_| b.uniform(0.0, 1.0)).collect();
        assert_eq!(seq_a, seq_b);
    }

    #[test]
    fn uniform_int_is_half_open() {
        let mut r = RngService::new(7);
        for _ in 0..1000 {
            let v = r.uniform_int(0, 3);
            assert!(v < 3);
        }
    }

    #[test]
    fn exponential_draw_never_negative() {
        let mut r = RngService::new(1);
        for _ in 0..1000 {
            assert!(r.exponential_duration(5.0).as_secs_f64() >= 0.0);
        }
    }

    #[test]
    fn exponential_mean_converges() {
        let mut r = RngService::new(99);
        let mean = 10.0;
        let n = 20_000;
        let sum: f64 = (0..n).map(|_| r.exponential_duration(mean).as_secs_f64()).sum();
        let observed_mean = sum / n as f64;
        // std dev of Exp(mean) is `mean`; tolerate 3 sigma / sqrt(n).
        let tolerance = 3.0 * mean / (n as f64).sqrt();
        assert!((observed_mean - mean).abs() < tolerance, "{observed_mean} vs {mean}");
    }

    #[test]
    fn discrete_respects_zero_weights() {
        let mut r = RngService::new(3);
        for _ in 0..200 {
            let idx = r.discrete(&[0.0, 1.0, 0.0]);
            assert_eq!(idx, 1);
        }
    }
}
