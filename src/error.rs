//! Error types for the simulator core.
//!
//! Configuration problems are validated before a [`crate::simulation::Simulation`]
//! is constructed and abort the process ("Configuration errors... abort
//! before simulation starts"). Wire decode problems are logged and the
//! offending packet is dropped; they never unwind out of the event loop.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("n_miners ({n_miners}) must be 1 or a multiple of num_pools ({num_pools})")]
    BadMinerCount { n_miners: u32, num_pools: u32 },

    #[error("n_peers must be at least 1")]
    NoPeers,

    #[error("n_bootstrap ({n_bootstrap}) cannot exceed n_peers ({n_peers})")]
    TooManyBootstrap { n_bootstrap: u32, n_peers: u32 },

    #[error("unknown network protocol {0:?}")]
    UnknownNet(String),

    #[error("unknown topology {0:?}")]
    UnknownTopo(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame too short: need at least {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("unknown message type byte {0:#04x}")]
    UnknownType(u8),

    #[error("declared length {declared} does not match body length {actual}")]
    LengthMismatch { declared: u32, actual: usize },
}
