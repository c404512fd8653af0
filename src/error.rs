//! Crate-wide error taxonomy.
//!
//! Each layer defines its own `Error` enum (following the teacher's
//! one-enum-per-module convention: `pager::Error`, `dbheader::Error`,
//! `serial_type::Error`, ...). This module unifies them at the public
//! API boundary with `#[from]` conversions, so callers working through
//! `sharc::Database`/`sharc::Reader` only need to match one type.

use std::fmt;

/// Top-level error type returned by the public API (§7).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid database: {0}")]
    InvalidDatabase(String),

    #[error("corrupt page: {0}")]
    CorruptPage(String),

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("ledger sequence conflict at sequence {sequence}")]
    SequenceConflict { sequence: u64 },

    #[error("hash chain broken at sequence {sequence}")]
    HashChainBroken { sequence: u64 },

    #[error("invalid signature at sequence {sequence}")]
    InvalidSignature { sequence: u64 },

    #[error("unknown agent {agent_id:?} at sequence {sequence}")]
    UnknownAgent { agent_id: String, sequence: u64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Marker trait implemented by every per-layer error enum so `?` can
/// convert into the unified [`Error`] without a manual `From` impl per
/// call site. Layers still keep their own concrete error type for
/// precise local matching (the teacher's pattern); only the public API
/// surface collapses them.
pub(crate) fn corrupt(msg: impl fmt::Display) -> Error {
    Error::CorruptPage(msg.to_string())
}

pub(crate) fn invalid_db(msg: impl fmt::Display) -> Error {
    Error::InvalidDatabase(msg.to_string())
}

pub(crate) fn unsupported(msg: impl fmt::Display) -> Error {
    Error::UnsupportedFeature(msg.to_string())
}

pub(crate) fn invalid_arg(msg: impl fmt::Display) -> Error {
    Error::InvalidArgument(msg.to_string())
}
