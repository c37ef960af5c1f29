//! Run parameters and CLI surface, validated before a
//! [`crate::simulation::Simulation`] is constructed.

use clap::{Parser, ValueEnum};

use crate::error::ConfigError;

/// Number of simulated mining pools the original model distributes hash
/// rate across (`btcNumPools`; its comment cites "16 major bitcoin
/// pools"). `n_miners` must be 1 or a multiple of this.
pub const NUM_POOLS: u32 = 16;

/// A small built-in weight table approximating the skew of real mining
/// pool shares; degenerates to an even split when all weights are equal.
/// The original's `btcHashRateDistribution` table was not present in the
/// retrieved source (a pure data file) — this is a documented stand-in.
const POOL_WEIGHTS: [f64; NUM_POOLS as usize] = [
    0.18, 0.14, 0.12, 0.10, 0.08, 0.07, 0.06, 0.05, 0.05, 0.04, 0.03, 0.03, 0.02, 0.02, 0.005, 0.005,
];

/// Share of total hash rate assigned to `pool` out of `num_pools` simulated
/// pools. Uses the built-in weight table when `num_pools` matches its size
/// (the common/default case); otherwise degenerates to an even split so an
/// operator-chosen `--num-pools` still produces a sane distribution.
pub fn pool_hash_rate_share(pool: usize, num_pools: u32) -> f64 {
    if num_pools as usize == POOL_WEIGHTS.len() {
        POOL_WEIGHTS[pool % POOL_WEIGHTS.len()]
    } else if num_pools == 0 {
        1.0
    } else {
        1.0 / num_pools as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NetProtocol {
    Vanilla,
    Kadcast,
    Mincast,
}

impl std::str::FromStr for NetProtocol {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vanilla" => Ok(NetProtocol::Vanilla),
            "kadcast" => Ok(NetProtocol::Kadcast),
            "mincast" => Ok(NetProtocol::Mincast),
            other => Err(ConfigError::UnknownNet(other.to_string())),
        }
    }
}

impl NetProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetProtocol::Vanilla => "vanilla",
            NetProtocol::Kadcast => "kadcast",
            NetProtocol::Mincast => "mincast",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Topo {
    Star,
    Geo,
}

impl Topo {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topo::Star => "star",
            Topo::Geo => "geo",
        }
    }
}

/// CLI parameters, all with defaults.
#[derive(Parser, Debug, Clone)]
#[command(name = "bns", about = "Discrete-event block-propagation network simulator")]
pub struct Params {
    #[arg(long, default_value_t = 1)]
    pub seed: u64,

    #[arg(long, default_value_t = 5)]
    pub n_minutes: u64,

    #[arg(long, default_value_t = 100)]
    pub n_peers: u32,

    #[arg(long, default_value_t = 8)]
    pub n_bootstrap: u32,

    #[arg(long, default_value_t = 1)]
    pub n_miners: u32,

    /// 0 = unbounded (run until `n_minutes` elapses instead).
    #[arg(long, default_value_t = 0)]
    pub n_blocks: u32,

    #[arg(long, default_value_t = 1.0)]
    pub block_size_factor: f64,

    #[arg(long, default_value_t = 1.0)]
    pub block_interval_factor: f64,

    #[arg(long, default_value_t = 0.0)]
    pub byzantine_factor: f64,

    #[arg(long, value_enum, default_value_t = NetProtocol::Vanilla)]
    pub net: NetProtocol,

    #[arg(long, value_enum, default_value_t = Topo::Star)]
    pub topo: Topo,

    #[arg(long, default_value_t = true)]
    pub unsolicited: bool,

    /// Number of simulated mining pools hash rate is distributed across.
    /// `n_miners` must be 1 or a multiple of this.
    #[arg(long, default_value_t = NUM_POOLS)]
    pub num_pools: u32,

    #[arg(long, default_value_t = 20)]
    pub kad_k: u32,

    #[arg(long, default_value_t = 3)]
    pub kad_alpha: u32,

    #[arg(long, default_value_t = 3)]
    pub kad_beta: u32,

    #[arg(long, default_value_t = 0.10)]
    pub kad_fec_overhead: f64,

    /// Accepted for CLI-surface parity with the original model's
    /// score-weighted INFORM-recipient selection. No retrievable source
    /// document (spec.md §6 or `original_source/`) specifies what the
    /// scoring function was, so this crate's recipient selection is
    /// uniform-random regardless of this flag — a documented no-op kept
    /// only so existing invocations with this flag set don't break. See
    /// DESIGN.md.
    #[arg(long, default_value_t = true)]
    pub mincast_use_scores: bool,

    #[arg(long, default_value_t = 1_000_000.0)]
    pub star_leaf_data_rate: f64,

    #[arg(long, default_value_t = 100_000_000.0)]
    pub star_hub_data_rate: f64,

    /// Mining difficulty, scaling the exponential block-interval mean
    ///; default tuned for ~10-minute blocks at `hash_rate = 1.0`.
    #[arg(long, default_value_t = 1.0 / 42_949_672.96)]
    pub difficulty: f64,

    #[arg(long, default_value_t = String::from("."))]
    pub output_dir: String,

    /// `RUST_LOG`-style filter directive; falls back to the `BNS_LOG`/
    /// `RUST_LOG` environment variables when unset.
    #[arg(long)]
    pub log: Option<String>,
}

impl Params {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_peers == 0 {
            return Err(ConfigError::NoPeers);
        }
        if self.n_bootstrap > self.n_peers {
            return Err(ConfigError::TooManyBootstrap {
                n_bootstrap: self.n_bootstrap,
                n_peers: self.n_peers,
            });
        }
        if self.n_miners != 1 && self.num_pools != 0 && self.n_miners % self.num_pools != 0 {
            return Err(ConfigError::BadMinerCount {
                n_miners: self.n_miners,
                num_pools: self.num_pools,
            });
        }
        Ok(())
    }

    pub fn deadline(&self) -> crate::time::VirtualTime {
        crate::time::VirtualTime::from_secs_f64(self.n_minutes as f64 * 60.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Params {
        Params {
            seed: 1,
            n_minutes: 5,
            n_peers: 10,
            n_bootstrap: 4,
            n_miners: 1,
            n_blocks: 0,
            block_size_factor: 1.0,
            block_interval_factor: 1.0,
            byzantine_factor: 0.0,
            net: NetProtocol::Vanilla,
            topo: Topo::Star,
            unsolicited: true,
            num_pools: NUM_POOLS,
            kad_k: 20,
            kad_alpha: 3,
            kad_beta: 3,
            kad_fec_overhead: 0.1,
            mincast_use_scores: true,
            star_leaf_data_rate: 1_000_000.0,
            star_hub_data_rate: 100_000_000.0,
            difficulty: 1.0,
            output_dir: ".".into(),
            log: None,
        }
    }

    #[test]
    fn rejects_bad_miner_count() {
        let mut p = base();
        p.n_miners = 5; // not 1, not a multiple of 16
        assert!(matches!(p.validate(), Err(ConfigError::BadMinerCount { .. })));
    }

    #[test]
    fn accepts_single_miner_or_pool_multiple() {
        let mut p = base();
        p.n_miners = 1;
        assert!(p.validate().is_ok());
        p.n_miners = 32;
        assert!(p.validate().is_ok());
    }

    #[test]
    fn custom_num_pools_is_respected() {
        let mut p = base();
        p.num_pools = 4;
        p.n_miners = 6; // not 1, not a multiple of 4
        assert!(matches!(p.validate(), Err(ConfigError::BadMinerCount { .. })));
        p.n_miners = 8;
        assert!(p.validate().is_ok());
    }

    #[test]
    fn rejects_bootstrap_exceeding_peers() {
        let mut p = base();
        p.n_bootstrap = 99;
        assert!(matches!(p.validate(), Err(ConfigError::TooManyBootstrap { .. })));
    }

    #[test]
    fn rejects_zero_peers() {
        let mut p = base();
        p.n_peers = 0;
        assert!(matches!(p.validate(), Err(ConfigError::NoPeers)));
    }
}
