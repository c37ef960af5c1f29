//! Virtual time. The simulator never touches the wall clock; every
//! timestamp and delay is expressed in microseconds since the start of the
//! run, matching the resolution the original NS-3 model used for mining
//! draws (`ns3::MicroSeconds`).

use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::time::Duration;

/// A point on the simulation's virtual timeline, in microseconds since t=0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VirtualTime(u64);

impl VirtualTime {
    pub const ZERO: VirtualTime = VirtualTime(0);

    pub fn from_micros(micros: u64) -> Self {
        VirtualTime(micros)
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        VirtualTime((secs.max(0.0) * 1_000_000.0).round() as u64)
    }

    pub fn as_micros(self) -> u64 {
        self.0
    }

    pub fn as_millis_f64(self) -> f64 {
        self.0 as f64 / 1_000.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    pub fn saturating_sub(self, rhs: VirtualTime) -> VirtualTime {
        VirtualTime(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for VirtualTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}ms", self.as_millis_f64())
    }
}

impl Add<Duration> for VirtualTime {
    type Output = VirtualTime;
    fn add(self, rhs: Duration) -> VirtualTime {
        VirtualTime(self.0.saturating_add(rhs.as_micros() as u64))
    }
}

impl AddAssign<Duration> for VirtualTime {
    fn add_assign(&mut self, rhs: Duration) {
        self.0 = self.0.saturating_add(rhs.as_micros() as u64);
    }
}

impl Sub for VirtualTime {
    type Output = Duration;
    fn sub(self, rhs: VirtualTime) -> Duration {
        Duration::from_micros(self.0.saturating_sub(rhs.0))
    }
}

/// Build a [`Duration`] from a fractional number of seconds, clamping
/// negative draws to zero. The exponential draw can never go negative by
/// construction, but normal draws can; callers of those must clamp
/// explicitly — see [`crate::rng::RngService::normal_duration_nonneg`].
pub fn duration_from_secs_f64(secs: f64) -> Duration {
    Duration::from_secs_f64(secs.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtraction_is_saturating() {
        let a = VirtualTime::from_micros(5);
        let b = VirtualTime::from_micros(10);
        assert_eq!((a - b), Duration::ZERO);
        assert_eq!((b - a), Duration::from_micros(5));
    }

    #[test]
    fn from_secs_round_trips() {
        let t = VirtualTime::from_secs_f64(1.5);
        assert_eq!(t.as_micros(), 1_500_000);
    }
}
