//! Network fabric: peer placement and packet transmit-delay modeling.

use crate::rng::RngService;
use std::time::Duration;

pub type PeerId = usize;

/// A small set of named regions with an asymmetric-looking but here
/// symmetric pairwise RTT table, standing in for the original's geographic
/// latency matrix (the full per-continent constants were not present in
/// the retrieved source; this is a representative simplification —
/// documented in `DESIGN.md`).
const REGIONS: &[&str] = &["us-east", "us-west", "europe", "asia", "south-america"];

fn geo_rtt_ms(a: usize, b: usize) -> f64 {
    const TABLE: [[f64; 5]; 5] = [
        [10.0, 70.0, 90.0, 180.0, 130.0],
        [70.0, 10.0, 150.0, 140.0, 170.0],
        [90.0, 150.0, 10.0, 220.0, 200.0],
        [180.0, 140.0, 220.0, 10.0, 250.0],
        [130.0, 170.0, 200.0, 250.0, 10.0],
    ];
    TABLE[a][b]
}

/// Flat access-link rate used for geo topology transmit-time modeling.
/// The star topology's rates are operator-configured (`star_leaf_data_rate`
/// / `star_hub_data_rate`); geo has no equivalent CLI knob in the source
/// model, so a representative broadband rate is used.
const GEO_ACCESS_RATE_BPS: f64 = 20_000_000.0;

pub enum Topology {
    Star {
        leaf_rate_bps: f64,
        hub_rate_bps: f64,
    },
    Geo {
        /// Region index assigned to each peer at construction time.
        peer_region: Vec<usize>,
    },
}

impl Topology {
    pub fn star(leaf_rate_bps: f64, hub_rate_bps: f64) -> Self {
        Topology::Star { leaf_rate_bps, hub_rate_bps }
    }

    pub fn geo(n_peers: usize, rng: &mut RngService) -> Self {
        let peer_region = (0..n_peers)
            .map(|_| rng.uniform_int(0, REGIONS.len() as u64) as usize)
            .collect();
        Topology::Geo { peer_region }
    }

    /// End-to-end delay for sending `bytes` from `from` to `to`: a
    /// bandwidth-limited transmit time plus a topology-appropriate
    /// propagation delay. Both peer ids are only used to look up star
    /// (always hub-routed, so identical regardless of which two leaves)
    /// or geo (pairwise regional RTT) propagation components.
    pub fn transmit_delay(&self, from: PeerId, to: PeerId, bytes: usize) -> Duration {
        match self {
            Topology::Star { leaf_rate_bps, hub_rate_bps } => {
                let _ = (from, to);
                let uplink = bytes as f64 * 8.0 / leaf_rate_bps;
                let downlink = bytes as f64 * 8.0 / hub_rate_bps;
                // Fixed hub relay latency; the original models the hub as a
                // single switching point with negligible queuing delay.
                let hub_latency = 0.010;
                Duration::from_secs_f64(uplink + downlink + hub_latency)
            }
            Topology::Geo { peer_region } => {
                let ra = peer_region[from];
                let rb = peer_region[to];
                let rtt_ms = geo_rtt_ms(ra, rb);
                let prop = rtt_ms / 2.0 / 1_000.0;
                let xmit = bytes as f64 * 8.0 / GEO_ACCESS_RATE_BPS;
                Duration::from_secs_f64(prop + xmit)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_delay_grows_with_size() {
        let t = Topology::star(1_000_000.0, 10_000_000.0);
        let small = t.transmit_delay(0, 1, 100);
        let large = t.transmit_delay(0, 1, 100_000);
        assert!(large > small);
    }

    #[test]
    fn geo_same_region_is_cheapest() {
        let mut rng = RngService::new(1);
        let t = Topology::geo(10, &mut rng);
        if let Topology::Geo { peer_region } = &t {
            // self-to-self uses the diagonal, always the minimum in the table.
            let same = t.transmit_delay(0, 0, 1000);
            let region = peer_region[0];
            for other in 0..REGIONS.len() {
                if other != region {
                    let cross = Duration::from_secs_f64(geo_rtt_ms(region, other) / 2000.0);
                    assert!(same <= cross + Duration::from_millis(1));
                }
            }
        }
    }
}
