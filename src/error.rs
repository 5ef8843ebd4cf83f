use std::time::Duration;

use ethers::types::{Address, H256};
use serde::Serialize;
use thiserror::Error;

use crate::models::Direction;

pub type Result<T, E = ChainError> = std::result::Result<T, E>;

/// Failures that abort a chain read.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Connection failure or non-2xx HTTP status.
    #[error("transport error (status {status:?}): {body}")]
    Transport { status: Option<u16>, body: String },

    /// Well-formed JSON-RPC error object returned by the node.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Malformed hex or decimal input.
    #[error("format error: {0}")]
    Format(String),

    #[error("rpc call timed out after {0:?}")]
    Timeout(Duration),

    /// The response could not be decoded into the expected schema.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("subscription error: {0}")]
    Subscription(String),
}

impl ChainError {
    pub fn transport(status: Option<u16>, body: impl Into<String>) -> Self {
        Self::Transport { status, body: body.into() }
    }
}

/// A sub-call failed but the surrounding operation still produced a best-effort result.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PartialDataWarning {
    #[error("no contract code at token address {address:?}, token balance defaulted to zero")]
    TokenContractMissing { address: Address },

    #[error("token balance unavailable, defaulted to zero: {reason}")]
    TokenBalance { reason: String },

    #[error("{direction:?} transfer log query failed: {reason}")]
    LogQuery { direction: Direction, reason: String },

    #[error("skipped undecodable transfer log in tx {tx_hash:?}: {reason}")]
    UndecodableLog { tx_hash: Option<H256>, reason: String },

    #[error("receipt lookup for {tx_hash:?} failed: {reason}")]
    Receipt { tx_hash: H256, reason: String },
}

/// A value together with the non-fatal conditions met while producing it.
#[derive(Debug, Clone, Serialize)]
pub struct Fetched<T> {
    pub value: T,
    pub warnings: Vec<PartialDataWarning>,
}

impl<T> Fetched<T> {
    pub fn new(value: T, warnings: Vec<PartialDataWarning>) -> Self {
        Self { value, warnings }
    }

    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }
}
