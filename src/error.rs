//! Consensus failure taxonomy
//!
//! Every variant is terminal for the block being checked; nothing here is
//! retried internally. Resource-level failures (disk persistence) never show
//! up in this enum because the store degrades to in-memory generation.

use primitive_types::U256;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("unknown ancestor")]
    UnknownAncestor,

    #[error("block in the future")]
    FutureBlock,

    #[error("timestamp not after parent's")]
    InvalidTimestamp,

    #[error("invalid difficulty: have {have}, want {want}")]
    InvalidDifficulty { have: U256, want: U256 },

    #[error("invalid gas limit: have {have}, parent {parent}")]
    InvalidGasLimit { have: u64, parent: u64 },

    #[error("invalid gas used: have {have}, limit {limit}")]
    InvalidGasUsed { have: u64, limit: u64 },

    #[error("invalid block number")]
    InvalidNumber,

    #[error("extra-data too long: {have} > {max}")]
    ExtraDataTooLong { have: usize, max: usize },

    #[error("too many uncles")]
    TooManyUncles,

    #[error("duplicate uncle")]
    DuplicateUncle,

    #[error("uncle is ancestor")]
    UncleIsAncestor,

    #[error("uncle's parent is not ancestor")]
    DanglingUncle,

    #[error("invalid mix digest")]
    InvalidMixDigest,

    #[error("invalid proof-of-work")]
    InvalidProofOfWork,
}

/// Remote-sealer lifecycle errors, kept apart from consensus errors so a
/// caller can tell "rejected" from "shut down".
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SealerError {
    #[error("no mining work available yet")]
    NoWork,

    #[error("ethash stopped")]
    Stopped,

    #[error("not supported")]
    NotSupported,
}
