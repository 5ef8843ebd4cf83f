//! Typed chain reads on top of an [`RpcTransport`]: balances and the two
//! transaction-history strategies.
//!
//! Aggregate reads never fail because of a non-essential sub-call. Those
//! failures come back as [`PartialDataWarning`]s next to the value.

use std::collections::HashSet;

use alloy_primitives::U256;
use ethers::types::{Address, H256};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::config::{ChainConfig, UsdBasis};
use crate::error::{ChainError, Fetched, PartialDataWarning, Result};
use crate::models::{
    balance_of_calldata, BalanceSnapshot, Block, CallRequest, Direction, LogFilter, Receipt,
    RecentTransaction, RpcLog, TransferLogEvent, EMPTY_CODE,
};
use crate::quantity::{hex_to_integer, scale_to_decimal, to_hex_quantity, HexQuantity};
use crate::rpc::RpcTransport;

/// Blocks behind head covered by the transfer log filter.
pub const LOG_LOOKBACK_BLOCKS: u64 = 100;
/// Merged transfer history is cut to this many entries.
pub const TRANSFER_HISTORY_LIMIT: usize = 5;
const MIN_SCAN_BLOCKS: usize = 20;
const SCAN_BLOCKS_PER_TX: usize = 5;

/// How many blocks a backward scan for `count` transactions may visit.
pub fn scan_budget(count: usize) -> usize {
    MIN_SCAN_BLOCKS.max(count.saturating_mul(SCAN_BLOCKS_PER_TX))
}

fn note(warnings: &mut Vec<PartialDataWarning>, warning: PartialDataWarning) {
    warn!(%warning, "partial data");
    warnings.push(warning);
}

pub struct ChainReader<T> {
    transport: T,
    config: ChainConfig,
}

impl<T: RpcTransport> ChainReader<T> {
    pub fn new(transport: T, config: ChainConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn call<R: DeserializeOwned>(&self, method: &str, params: Value) -> Result<R> {
        let limit = self.config.rpc_timeout;
        let value = tokio::time::timeout(limit, self.transport.request(method, params))
            .await
            .map_err(|_| ChainError::Timeout(limit))??;
        serde_json::from_value(value).map_err(|e| ChainError::Decode(format!("{method}: {e}")))
    }

    async fn call_quantity(&self, method: &str, params: Value) -> Result<U256> {
        let raw: String = self.call(method, params).await?;
        hex_to_integer(&raw)
    }

    pub async fn block_number(&self) -> Result<u64> {
        let latest = self.call_quantity("eth_blockNumber", json!([])).await?;
        HexQuantity(latest).as_u64()
    }

    /// Full block with transaction objects; `None` if the node does not know it.
    pub async fn block_by_number(&self, number: u64) -> Result<Option<Block>> {
        self.call("eth_getBlockByNumber", json!([to_hex_quantity(U256::from(number)), true]))
            .await
    }

    pub async fn transaction_receipt(&self, hash: H256) -> Result<Option<Receipt>> {
        self.call("eth_getTransactionReceipt", json!([hash])).await
    }

    pub async fn native_balance(&self, address: &Address) -> Result<U256> {
        self.call_quantity("eth_getBalance", json!([address, "latest"])).await
    }

    pub async fn code_at(&self, address: &Address) -> Result<String> {
        self.call("eth_getCode", json!([address, "latest"])).await
    }

    /// `balanceOf(owner)` on the configured token contract.
    pub async fn token_balance_of(&self, owner: &Address) -> Result<U256> {
        let request = CallRequest {
            to: self.config.token_contract,
            data: balance_of_calldata(owner),
        };
        self.call_quantity("eth_call", json!([request, "latest"])).await
    }

    pub async fn logs(&self, filter: &LogFilter) -> Result<Vec<RpcLog>> {
        self.call("eth_getLogs", json!([filter])).await
    }

    async fn probe_token_balance(&self, owner: &Address) -> std::result::Result<U256, PartialDataWarning> {
        let contract = self.config.token_contract;
        let code = self
            .code_at(&contract)
            .await
            .map_err(|e| PartialDataWarning::TokenBalance { reason: e.to_string() })?;
        if code.is_empty() || code == EMPTY_CODE {
            return Err(PartialDataWarning::TokenContractMissing { address: contract });
        }
        self.token_balance_of(owner)
            .await
            .map_err(|e| PartialDataWarning::TokenBalance { reason: e.to_string() })
    }

    /// Native and token balance of `owner`, valued at `usd_price` when one is known.
    ///
    /// Only the native balance is essential; the token side degrades to zero with a warning.
    pub async fn balance_snapshot(&self, owner: &Address, usd_price: Option<f64>) -> Result<Fetched<BalanceSnapshot>> {
        let (native, token) = tokio::join!(self.native_balance(owner), self.probe_token_balance(owner));
        let native_raw = native?;

        let mut warnings = Vec::new();
        let token_raw = token.unwrap_or_else(|warning| {
            note(&mut warnings, warning);
            U256::ZERO
        });

        let native_balance = scale_to_decimal(native_raw, self.config.native_decimals);
        let token_balance = scale_to_decimal(token_raw, self.config.token_decimals);
        let basis = match self.config.usd_basis {
            UsdBasis::Native => &native_balance,
            UsdBasis::Token => &token_balance,
        };
        let usd_value = usd_price.and_then(|price| basis.parse::<f64>().ok().map(|amount| amount * price));

        info!(address = ?owner, native = %native_balance, token = %token_balance, "balance fetched");
        Ok(Fetched::new(
            BalanceSnapshot {
                native_raw,
                native_balance,
                token_raw,
                token_balance,
                usd_value,
                as_of: OffsetDateTime::now_utc().unix_timestamp(),
            },
            warnings,
        ))
    }

    /// Walk back from head collecting up to `count` transactions, newest first.
    ///
    /// Within a block the transaction list is read last to first. That order is a
    /// convention of this reader, not something the chain guarantees. With
    /// `involving` set, only transactions from or to that address are collected.
    pub async fn recent_transactions(
        &self,
        count: usize,
        involving: Option<Address>,
    ) -> Result<Fetched<Vec<RecentTransaction>>> {
        let budget = scan_budget(count);
        let latest = self.block_number().await?;
        info!(latest, count, budget, "scanning recent blocks");

        let mut collected: Vec<RecentTransaction> = Vec::new();
        let mut seen: HashSet<H256> = HashSet::new();
        let mut next = Some(latest);

        for _ in 0..budget {
            if collected.len() >= count {
                break;
            }
            let Some(number) = next else { break };

            if let Some(block) = self.block_by_number(number).await? {
                let block_number = block.number.as_u64()?;
                let timestamp = block.timestamp.as_u64()?;
                for tx in block.transactions.into_iter().rev() {
                    if collected.len() >= count {
                        break;
                    }
                    if involving.is_some_and(|wallet| !tx.involves(&wallet)) {
                        continue;
                    }
                    if seen.insert(tx.hash) {
                        collected.push(RecentTransaction::new(tx, block_number, timestamp));
                    }
                }
            } else {
                debug!(block = number, "block not found");
            }
            next = number.checked_sub(1);
        }

        let mut warnings = Vec::new();
        for recent in collected.iter_mut().filter(|r| r.is_contract_creation()) {
            let tx_hash = recent.transaction.hash;
            match self.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    debug!(?tx_hash, status = ?receipt.status, created = ?receipt.contract_address, "creation receipt");
                    recent.created_contract_address = receipt.contract_address;
                }
                Ok(None) => debug!(?tx_hash, "no receipt for contract creation"),
                Err(e) => note(&mut warnings, PartialDataWarning::Receipt { tx_hash, reason: e.to_string() }),
            }
        }

        if collected.is_empty() {
            info!(budget, "no transactions found in scanned blocks");
        }
        Ok(Fetched::new(collected, warnings))
    }

    /// Recent Transfer events of `token` sent or received by `wallet`, newest block first.
    pub async fn transfer_history(&self, wallet: &Address, token: Address) -> Result<Fetched<Vec<TransferLogEvent>>> {
        let latest = self.block_number().await?;
        let from_block = to_hex_quantity(U256::from(latest.saturating_sub(LOG_LOOKBACK_BLOCKS)));

        let sent_filter = LogFilter::transfers(token, wallet, Direction::Sent, from_block.clone());
        let received_filter = LogFilter::transfers(token, wallet, Direction::Received, from_block);
        let (sent, received) = tokio::join!(self.logs(&sent_filter), self.logs(&received_filter));

        let mut warnings = Vec::new();
        let mut events = Vec::new();
        for (direction, outcome) in [(Direction::Sent, sent), (Direction::Received, received)] {
            let logs = match outcome {
                Ok(logs) => logs,
                Err(e) => {
                    note(&mut warnings, PartialDataWarning::LogQuery { direction, reason: e.to_string() });
                    continue;
                }
            };
            for log in logs.iter().filter(|log| !log.removed) {
                match TransferLogEvent::from_log(log, direction) {
                    Ok(event) => events.push(event),
                    Err(reason) => note(
                        &mut warnings,
                        PartialDataWarning::UndecodableLog { tx_hash: log.transaction_hash, reason },
                    ),
                }
            }
        }

        events.sort_by(|a, b| b.block_number.cmp(&a.block_number));
        events.truncate(TRANSFER_HISTORY_LIMIT);
        info!(latest, found = events.len(), "transfer history fetched");
        Ok(Fetched::new(events, warnings))
    }
}
