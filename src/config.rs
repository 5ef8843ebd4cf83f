use std::time::Duration;

use clap::ValueEnum;
use ethers::types::Address;
use serde::Serialize;

/// Which balance the USD price applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UsdBasis {
    #[default]
    Native,
    Token,
}

/// How the session reconstructs transaction history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStrategy {
    /// Transfer-event log filter around the wallet.
    #[default]
    Logs,
    /// Backward scan of full block bodies.
    Scan,
}

/// Per-deployment chain settings. Decimals have no default: deployments disagree.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub ws_url: Option<String>,
    pub token_contract: Address,
    pub native_decimals: u8,
    pub token_decimals: u8,
    pub usd_price: Option<f64>,
    pub usd_basis: UsdBasis,
    pub rpc_timeout: Duration,
}

impl ChainConfig {
    pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(20);

    pub fn new(rpc_url: impl Into<String>, token_contract: Address, native_decimals: u8, token_decimals: u8) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            ws_url: None,
            token_contract,
            native_decimals,
            token_decimals,
            usd_price: None,
            usd_basis: UsdBasis::default(),
            rpc_timeout: Self::DEFAULT_RPC_TIMEOUT,
        }
    }
}
