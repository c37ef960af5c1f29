//! Mining: stochastic block-discovery and size generation.

use std::time::Duration;

use crate::rng::RngService;
use crate::scheduler::{EventHandle, Scheduler};

/// `2^32`, matching the original's `difficulty * 2**32 / hashRate` mean
/// formula. Expressed as a named constant rather than a magic literal.
const DIFFICULTY_SCALE: f64 = 4_294_967_296.0;

/// Representative historical block-size buckets (bytes) and their relative
/// weights. The real `btcBlockSizes` table from the source model was not
/// retrievable (a pure data file, filtered out of the reference corpus);
/// this is a synthesized stand-in with the same qualitative shape — a long
/// tail of near-empty and near-cap blocks with a broad middle.
const BLOCK_SIZE_BUCKETS: &[(u32, f64)] = &[
    (8_000, 0.10),
    (250_000, 0.25),
    (500_000, 0.30),
    (900_000, 0.20),
    (1_350_000, 0.10),
    (1_990_000, 0.05),
];

pub fn sample_block_size(rng: &mut RngService, block_size_factor: f64, block_interval_factor: f64) -> u32 {
    let weights: Vec<f64> = BLOCK_SIZE_BUCKETS.iter().map(|(_, w)| *w).collect();
    let idx = rng.discrete(&weights);
    let (base, _) = BLOCK_SIZE_BUCKETS[idx];
    ((base as f64) * block_size_factor * block_interval_factor).max(0.0) as u32
}

/// Per-peer miner. Only peers configured as miners hold one.
pub struct Miner {
    pub hash_rate: f64,
    pub difficulty: f64,
    pub block_interval_factor: f64,
    pub block_size_factor: f64,
    mining: bool,
    current_event: Option<EventHandle>,
}

impl Miner {
    pub fn new(hash_rate: f64, difficulty: f64, block_interval_factor: f64, block_size_factor: f64) -> Self {
        Miner {
            hash_rate,
            difficulty,
            block_interval_factor,
            block_size_factor,
            mining: false,
            current_event: None,
        }
    }

    pub fn is_mining(&self) -> bool {
        self.mining
    }

    fn mean_interval_secs(&self) -> f64 {
        self.difficulty * DIFFICULTY_SCALE / self.hash_rate * self.block_interval_factor
    }

    pub fn draw_interval(&self, rng: &mut RngService) -> Duration {
        rng.exponential_duration(self.mean_interval_secs())
    }

    pub fn stop_mining<Ctx>(&mut self, scheduler: &mut Scheduler<Ctx>) {
        if let Some(h) = self.current_event.take() {
            scheduler.cancel(h);
        }
        self.mining = false;
    }

    pub fn set_mining(&mut self) {
        self.mining = true;
    }

    pub fn set_event(&mut self, handle: EventHandle) {
        self.current_event = Some(handle);
    }

    pub fn clear_event(&mut self) {
        self.current_event = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_interval_matches_difficulty_formula() {
        let m = Miner::new(1.0, 1.0, 1.0, 1.0);
        assert_eq!(m.mean_interval_secs(), DIFFICULTY_SCALE);
    }

    #[test]
    fn block_interval_factor_scales_mean() {
        let m = Miner::new(1.0, 1.0, 0.5, 1.0);
        assert_eq!(m.mean_interval_secs(), DIFFICULTY_SCALE * 0.5);
    }

    #[test]
    fn block_size_respects_scaling_factors() {
        let mut rng = RngService::new(11);
        for _ in 0..50 {
            let size = sample_block_size(&mut rng, 2.0, 1.0);
            assert!(size >= 2 * 8_000 / 2); // sanity: non-trivial scaled size
        }
    }

    #[test]
    fn draw_interval_is_never_negative() {
        let m = Miner::new(1_000_000.0, 1.0, 0.001, 1.0);
        let mut rng = RngService::new(5);
        for _ in 0..500 {
            assert!(m.draw_interval(&mut rng).as_secs_f64() >= 0.0);
        }
    }
}
