use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bns::config::Params;

fn main() {
    let params = Params::parse();

    let filter = params
        .log
        .clone()
        .or_else(|| std::env::var("BNS_LOG").ok())
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".into());
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    if let Err(e) = params.validate() {
        error!(error = %e, "invalid configuration");
        std::process::exit(1);
    }

    info!(
        net = params.net.as_str(),
        topo = params.topo.as_str(),
        n_peers = params.n_peers,
        n_miners = params.n_miners,
        seed = params.seed,
        "starting run"
    );

    let run_params = params.clone();
    let report = bns::run(params);

    info!(
        coverage = report.coverage,
        stale_rate = report.stale_rate,
        avg_ttfb = report.avg_ttfb,
        avg_ttlb = report.avg_ttlb,
        "run complete"
    );

    if let Err(e) = bns::csv_output::write_results(&run_params, &report) {
        error!(error = %e, "failed to write results");
        std::process::exit(1);
    }
}
