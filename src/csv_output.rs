//! Append-mode CSV output, resolved from
//! `original_source/bns/bns.cc::writeResults`: one row per run in the
//! summary file, plus one row per (block, peer-observation) in the
//! `ttfbValues`/`ttlbValues` side files. This is an outer-collaborator
//! concern (CSV mechanics are explicitly out of scope for the core), kept
//! deliberately dependency-free rather than pulling in the `csv` crate,
//! which nothing in the retrieval pack uses.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use crate::config::Params;
use crate::evaluator::Report;

/// Column order confirmed against `writeResults` (see `DESIGN.md`).
const SUMMARY_HEADER: &str = "seed,n_minutes,n_peers,n_miners,n_bootstrap,block_size_factor,block_interval_factor,byzantine_factor,net,topo,kad_k,kad_alpha,kad_beta,kad_fec_overhead,avg_ttfb,avg_ttlb,median_ttfb,median_ttlb,stale_rate,coverage,overhead_ratio,total_traffic,necessary_traffic";

const VALUES_HEADER: &str = "seed,n_minutes,n_peers,n_miners,n_bootstrap,block_size_factor,block_interval_factor,byzantine_factor,net,topo,kad_k,kad_alpha,kad_beta,kad_fec_overhead,block_id,value";

fn param_prefix(params: &Params) -> String {
    format!(
        "{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
        params.seed,
        params.n_minutes,
        params.n_peers,
        params.n_miners,
        params.n_bootstrap,
        params.block_size_factor,
        params.block_interval_factor,
        params.byzantine_factor,
        params.net.as_str(),
        params.topo.as_str(),
        params.kad_k,
        params.kad_alpha,
        params.kad_beta,
        params.kad_fec_overhead,
    )
}

/// Append a line to `path`, creating the file (and writing a header) if it
/// doesn't exist yet. Mirrors the original's append-mode, header-once CSVs.
fn append_line(path: &Path, header: &str, line: &str) -> io::Result<()> {
    let is_new = !path.exists();
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if is_new {
        writeln!(file, "{header}")?;
    }
    writeln!(file, "{line}")?;
    Ok(())
}

/// Write the three output files for one completed run: the aggregated
/// summary row, and one row per recorded TTFB/TTLB observation.
pub fn write_results(params: &Params, report: &Report) -> io::Result<()> {
    let out_dir = Path::new(&params.output_dir);
    std::fs::create_dir_all(out_dir)?;

    let prefix = param_prefix(params);
    let net = params.net.as_str();
    let topo = params.topo.as_str();

    let summary_path = out_dir.join(format!("bns_results_{topo}_{net}.csv"));
    let summary_line = format!(
        "{prefix},{},{},{},{},{},{},{},{}",
        report.avg_ttfb,
        report.avg_ttlb,
        report.median_ttfb,
        report.median_ttlb,
        report.stale_rate,
        report.coverage,
        report.overhead_ratio,
        report.total_traffic,
        report.necessary_traffic,
    );
    append_line(&summary_path, SUMMARY_HEADER, &summary_line)?;

    let ttfb_path = out_dir.join(format!("bns_results_ttfbValues_{topo}_{net}.csv"));
    let ttlb_path = out_dir.join(format!("bns_results_ttlbValues_{topo}_{net}.csv"));
    for block in &report.per_block {
        for v in &block.ttfb_values {
            let line = format!("{prefix},{},{v}", block.block_id);
            append_line(&ttfb_path, VALUES_HEADER, &line)?;
        }
        for v in &block.ttlb_values {
            let line = format!("{prefix},{},{v}", block.block_id);
            append_line(&ttlb_path, VALUES_HEADER, &line)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NetProtocol, Topo};
    use crate::evaluator::PerBlockMetrics;

    fn params(dir: &Path) -> Params {
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
            num_pools: 16,
            kad_k: 20,
            kad_alpha: 3,
            kad_beta: 3,
            kad_fec_overhead: 0.1,
            mincast_use_scores: true,
            star_leaf_data_rate: 1_000_000.0,
            star_hub_data_rate: 100_000_000.0,
            difficulty: 1.0,
            output_dir: dir.to_string_lossy().into_owned(),
            log: None,
        }
    }

    #[test]
    fn writes_header_once_and_appends_rows() {
        let dir = tempfile::tempdir().unwrap();
        let p = params(dir.path());
        let report = Report {
            avg_ttfb: 1.0,
            avg_ttlb: 2.0,
            median_ttfb: 1.0,
            median_ttlb: 2.0,
            stale_rate: 0.0,
            coverage: 1.0,
            overhead_ratio: 0.5,
            total_traffic: 100,
            necessary_traffic: 90,
            per_block: vec![PerBlockMetrics {
                block_id: 42,
                mean_ttfb: 1.0,
                median_ttfb: 1.0,
                mean_ttlb: 2.0,
                median_ttlb: 2.0,
                coverage: 1.0,
                ttfb_values: vec![1.0, 1.5],
                ttlb_values: vec![2.0],
            }],
        };
        write_results(&p, &report).unwrap();
        write_results(&p, &report).unwrap();

        let summary = std::fs::read_to_string(dir.path().join("bns_results_star_vanilla.csv")).unwrap();
        assert_eq!(summary.lines().count(), 3); // header + 2 runs
        assert_eq!(summary.lines().next().unwrap(), SUMMARY_HEADER);

        let ttfb = std::fs::read_to_string(dir.path().join("bns_results_ttfbValues_star_vanilla.csv")).unwrap();
        assert_eq!(ttfb.lines().count(), 5); // header + 2 values x 2 runs
    }
}
