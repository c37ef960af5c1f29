//! Discrete-event simulator for Bitcoin-style P2P block-propagation
//! protocols (Vanilla gossip, Kadcast, Mincast). See [`config::Params`] for
//! the run configuration surface and [`evaluator::Report`] for the metrics
//! a run produces.

pub mod block;
pub mod blockchain;
pub mod config;
pub mod csv_output;
pub mod error;
pub mod evaluator;
pub mod kad_message;
pub mod kadcast;
pub mod message;
pub mod mincast;
pub mod miner;
pub mod peer;
pub mod rng;
pub mod routing;
pub mod scheduler;
pub mod simulation;
pub mod time;
pub mod topology;
pub mod vanilla;

use scheduler::Scheduler;
use simulation::Simulation;

/// Build a [`Simulation`] from validated `params`, wire up miners and the
/// chosen propagation protocol, run the event loop to completion, and
/// return the aggregated [`evaluator::Report`].
///
/// Callers are expected to have already run [`config::Params::validate`];
/// this function assumes a valid configuration.
pub fn run(params: config::Params) -> evaluator::Report {
    let mut sim = Simulation::new(params);
    let mut scheduler = Scheduler::new();

    match sim.config.net {
        config::NetProtocol::Vanilla => vanilla::start_all(&mut sim, &mut scheduler),
        config::NetProtocol::Kadcast => kadcast::start_all(&mut sim, &mut scheduler),
        config::NetProtocol::Mincast => mincast::start_all(&mut sim, &mut scheduler),
    }
    simulation::start_all_miners(&mut sim, &mut scheduler);

    let deadline = sim.config.deadline();
    scheduler.run_until(&mut sim, deadline);

    evaluator::evaluate(&sim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{NetProtocol, Params, Topo};

    fn params(net: NetProtocol) -> Params {
        Params {
            seed: 23,
            n_minutes: 5,
            n_peers: 10,
            n_bootstrap: 4,
            n_miners: 1,
            n_blocks: 0,
            block_size_factor: 1.0,
            block_interval_factor: 1.0,
            byzantine_factor: 0.0,
            net,
            topo: Topo::Star,
            unsolicited: true,
            num_pools: 16,
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
    fn single_miner_vanilla_run_reaches_full_coverage() {
        let report = run(params(NetProtocol::Vanilla));
        assert!(report.coverage > 0.0);
        assert_eq!(report.stale_rate, 0.0);
    }

    #[test]
    fn kadcast_run_produces_a_report() {
        let report = run(params(NetProtocol::Kadcast));
        assert!(report.coverage >= 0.0);
    }

    #[test]
    fn mincast_run_produces_a_report() {
        let report = run(params(NetProtocol::Mincast));
        assert!(report.coverage >= 0.0);
    }

    /// Two runs with identical parameters and seed must produce
    /// byte-identical evaluator output, including per-block order — the
    /// hard determinism invariant from spec §8. Enough blocks and peers
    /// that `per_block`/`ttfb_values` ordering would actually betray a
    /// `HashMap`-keyed aggregation if one crept back in.
    #[test]
    fn identical_seed_and_params_produce_identical_report() {
        let mut p = params(NetProtocol::Kadcast);
        p.n_peers = 24;
        p.n_bootstrap = 6;
        p.n_blocks = 15;
        p.n_minutes = 120;

        let first = run(p.clone());
        let second = run(p);

        assert_eq!(first.per_block.len(), second.per_block.len());
        assert!(first.per_block.len() > 1, "need multiple blocks to exercise ordering");
        let first_ids: Vec<u64> = first.per_block.iter().map(|b| b.block_id).collect();
        let second_ids: Vec<u64> = second.per_block.iter().map(|b| b.block_id).collect();
        assert_eq!(first_ids, second_ids, "per-block order must be identical run to run");
        assert_eq!(first, second);
    }

    /// The same determinism invariant, exercised through the CSV writer:
    /// two runs must emit byte-identical rows (order included), since the
    /// evaluator's `per_block` order feeds directly into
    /// `csv_output::write_results`.
    #[test]
    fn identical_seed_and_params_produce_identical_csv_bytes() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();

        let mut p = params(NetProtocol::Vanilla);
        p.n_peers = 20;
        p.n_blocks = 10;
        p.n_minutes = 60;

        let mut p_a = p.clone();
        p_a.output_dir = dir_a.path().to_string_lossy().into_owned();
        let report_a = run(p_a.clone());
        crate::csv_output::write_results(&p_a, &report_a).unwrap();

        p.output_dir = dir_b.path().to_string_lossy().into_owned();
        let report_b = run(p.clone());
        crate::csv_output::write_results(&p, &report_b).unwrap();

        for name in [
            "bns_results_star_vanilla.csv",
            "bns_results_ttfbValues_star_vanilla.csv",
            "bns_results_ttlbValues_star_vanilla.csv",
        ] {
            let a = std::fs::read_to_string(dir_a.path().join(name)).unwrap();
            let b = std::fs::read_to_string(dir_b.path().join(name)).unwrap();
            assert_eq!(a, b, "{name} differed between two runs of the same seed");
        }
    }
}
