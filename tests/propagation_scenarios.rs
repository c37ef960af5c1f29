use bns::config::{NetProtocol, Params, Topo};

fn base_params() -> Params {
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
        net: NetProtocol::Vanilla,
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

/// Single miner, vanilla gossip, star topology, 10 peers: every peer
/// should end up on the same tip with nothing ever orphaned permanently.
#[test]
fn single_miner_vanilla_reaches_full_coverage_with_no_stale_blocks() {
    let params = base_params();
    let report = bns::run(params);
    assert_eq!(report.stale_rate, 0.0);
    assert!(report.coverage > 0.0);
}

/// Two miners racing at equal hash rate over vanilla gossip: over enough
/// blocks, some fork gets orphaned, so stale_rate should be nonzero.
#[test]
fn competing_equal_hash_rate_miners_produce_stale_blocks() {
    let mut params = base_params();
    params.n_miners = 2;
    params.num_pools = 2;
    params.n_minutes = 60; // long enough for many blocks at the default difficulty
    let report = bns::run(params);
    assert!(report.stale_rate > 0.0, "expected forks with two competing miners, got stale_rate = {}", report.stale_rate);
}

/// Kadcast with a mid-size swarm: chunk-based delivery should still reach
/// every peer without blowing past a generous traffic bound (a loose bound
/// against unbounded rebroadcast storms, not a tight throughput assertion).
#[test]
fn kadcast_delivers_without_unbounded_traffic() {
    let mut params = base_params();
    params.net = NetProtocol::Kadcast;
    params.n_peers = 60;
    params.n_bootstrap = 8;
    params.kad_k = 20;
    params.kad_alpha = 3;
    params.kad_beta = 3;
    let report = bns::run(params);
    assert!(report.coverage > 0.0);
    assert!(report.total_traffic > 0);
    assert!(
        report.total_traffic < 500 * report.necessary_traffic.max(1),
        "traffic {} looks unbounded relative to necessary {}",
        report.total_traffic,
        report.necessary_traffic
    );
}

/// Mincast vs. Kadcast at the same seed and topology: Mincast trades some
/// chunk traffic for INFORM hints, so its overhead ratio should not exceed
/// Kadcast's by more than a wide margin, while coverage stays comparable.
#[test]
fn mincast_is_not_meaningfully_less_efficient_than_kadcast() {
    let mut kad_params = base_params();
    kad_params.net = NetProtocol::Kadcast;
    kad_params.n_peers = 40;
    kad_params.n_bootstrap = 8;
    let kad_report = bns::run(kad_params);

    let mut min_params = base_params();
    min_params.net = NetProtocol::Mincast;
    min_params.n_peers = 40;
    min_params.n_bootstrap = 8;
    let min_report = bns::run(min_params);

    assert!(min_report.coverage > 0.0);
    assert!(kad_report.coverage > 0.0);
    assert!((min_report.coverage - kad_report.coverage).abs() < 0.5);
}

/// Byzantine peers accept blocks into their own chain but never rebroadcast,
/// so raising byzantine_factor should not increase coverage.
#[test]
fn byzantine_peers_never_improve_coverage() {
    let mut honest = base_params();
    honest.byzantine_factor = 0.0;
    honest.n_peers = 20;
    let honest_report = bns::run(honest);

    let mut byzantine = base_params();
    byzantine.byzantine_factor = 0.5;
    byzantine.n_peers = 20;
    let byzantine_report = bns::run(byzantine);

    assert!(byzantine_report.coverage <= honest_report.coverage + 1e-9);
}
