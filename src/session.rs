//! Per-wallet state kept fresh by a single guarded refresh.
//!
//! Timer ticks and subscription events both arrive as [`RefreshTrigger`]s. A
//! trigger that lands while a refresh is still running is dropped, not queued.
//! Readers observe whole [`WalletState`] snapshots through a watch channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::types::{Address, H256};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::config::HistoryStrategy;
use crate::error::{Fetched, PartialDataWarning, Result};
use crate::models::{BalanceSnapshot, RecentTransaction, TransferLogEvent};
use crate::reader::ChainReader;
use crate::rpc::RpcTransport;

/// Source of the USD price used to value balances.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn usd_price(&self) -> Option<f64>;
}

/// A fixed price from configuration; `None` means unknown.
pub struct StaticPrice(pub Option<f64>);

#[async_trait]
impl PriceFeed for StaticPrice {
    async fn usd_price(&self) -> Option<f64> {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "strategy", content = "items", rename_all = "snake_case")]
pub enum History {
    Transfers(Vec<TransferLogEvent>),
    Transactions(Vec<RecentTransaction>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletState {
    pub wallet: Address,
    pub balance: Option<BalanceSnapshot>,
    pub history: History,
    pub warnings: Vec<PartialDataWarning>,
    pub last_error: Option<String>,
    pub refreshed_at: Option<i64>,
    /// Bumped on every published snapshot.
    pub generation: u64,
}

impl WalletState {
    fn empty(wallet: Address) -> Self {
        Self {
            wallet,
            balance: None,
            history: History::Transfers(Vec::new()),
            warnings: Vec::new(),
            last_error: None,
            refreshed_at: None,
            generation: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed,
    /// Another refresh was already in flight.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshTrigger {
    Tick,
    Transfer { tx_hash: Option<H256> },
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct WalletSession<T> {
    reader: ChainReader<T>,
    wallet: Address,
    strategy: HistoryStrategy,
    scan_count: usize,
    prices: Box<dyn PriceFeed>,
    state: watch::Sender<Arc<WalletState>>,
    refreshing: AtomicBool,
}

impl<T: RpcTransport> WalletSession<T> {
    pub fn new(
        reader: ChainReader<T>,
        wallet: Address,
        strategy: HistoryStrategy,
        scan_count: usize,
        prices: impl PriceFeed + 'static,
    ) -> Self {
        let (state, _) = watch::channel(Arc::new(WalletState::empty(wallet)));
        Self {
            reader,
            wallet,
            strategy,
            scan_count,
            prices: Box::new(prices),
            state,
            refreshing: AtomicBool::new(false),
        }
    }

    #[cfg(test)]
    pub fn reader(&self) -> &ChainReader<T> {
        &self.reader
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<WalletState>> {
        self.state.subscribe()
    }

    pub fn state(&self) -> Arc<WalletState> {
        self.state.borrow().clone()
    }

    async fn fetch_history(&self) -> Result<Fetched<History>> {
        Ok(match self.strategy {
            HistoryStrategy::Logs => {
                let token = self.reader.config().token_contract;
                let fetched = self.reader.transfer_history(&self.wallet, token).await?;
                Fetched::new(History::Transfers(fetched.value), fetched.warnings)
            }
            HistoryStrategy::Scan => {
                let fetched = self.reader.recent_transactions(self.scan_count, Some(self.wallet)).await?;
                Fetched::new(History::Transactions(fetched.value), fetched.warnings)
            }
        })
    }

    /// Reload balance and history and publish them as one snapshot.
    ///
    /// Returns [`RefreshOutcome::Skipped`] without touching the chain when a
    /// refresh is already running. On failure the previous data stays published
    /// with `last_error` set.
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(wallet = ?self.wallet, "refresh already in flight, skipping");
            return Ok(RefreshOutcome::Skipped);
        }
        let _in_flight = InFlight(&self.refreshing);

        let price = self.prices.usd_price().await;
        let (balance, history) = tokio::join!(
            self.reader.balance_snapshot(&self.wallet, price),
            self.fetch_history()
        );
        let previous = self.state();

        match (balance, history) {
            (Ok(balance), Ok(history)) => {
                let mut warnings = balance.warnings;
                warnings.extend(history.warnings);
                let next = WalletState {
                    wallet: self.wallet,
                    balance: Some(balance.value),
                    history: history.value,
                    warnings,
                    last_error: None,
                    refreshed_at: Some(OffsetDateTime::now_utc().unix_timestamp()),
                    generation: previous.generation + 1,
                };
                info!(wallet = ?self.wallet, generation = next.generation, degraded = !next.warnings.is_empty(), "wallet refreshed");
                self.state.send_replace(Arc::new(next));
                Ok(RefreshOutcome::Refreshed)
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(wallet = ?self.wallet, error = %e, "wallet refresh failed");
                let mut next = (*previous).clone();
                next.last_error = Some(e.to_string());
                next.generation = previous.generation + 1;
                self.state.send_replace(Arc::new(next));
                Err(e)
            }
        }
    }
}

impl<T: RpcTransport + 'static> WalletSession<T> {
    /// Refresh once per trigger until every sender is gone.
    pub async fn run(self: Arc<Self>, mut triggers: mpsc::Receiver<RefreshTrigger>) {
        while let Some(trigger) = triggers.recv().await {
            debug!(?trigger, "refresh requested");
            let session = self.clone();
            tokio::spawn(async move {
                if let Ok(RefreshOutcome::Skipped) = session.refresh().await {
                    debug!(?trigger, "trigger coalesced into running refresh");
                }
            });
        }
        info!("all refresh triggers closed");
    }
}

/// Emit a [`RefreshTrigger::Tick`] every `period`, starting immediately.
pub fn spawn_ticker(period: Duration, triggers: mpsc::Sender<RefreshTrigger>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = IntervalStream::new(tokio::time::interval(period));
        while ticks.next().await.is_some() {
            if triggers.send(RefreshTrigger::Tick).await.is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::error::ChainError;
    use crate::testing::{block_json, config, requested_block, tx_json, wallet, FakeTransport};

    fn healthy_chain() -> FakeTransport {
        FakeTransport::new(|method, params| match method {
            "eth_getBalance" => Ok(json!("0x5f5e100")),
            "eth_getCode" => Ok(json!("0x6080")),
            "eth_call" => Ok(json!("0x0de0b6b3a7640000")),
            "eth_blockNumber" => Ok(json!("0x64")),
            "eth_getLogs" => Ok(json!([])),
            "eth_getBlockByNumber" => {
                let n = requested_block(params);
                let me = format!("{:?}", wallet());
                Ok(block_json(n, vec![tx_json(n, 0, &me, Some("0x00000000000000000000000000000000000000aa"))]))
            }
            other => panic!("unexpected call {other}"),
        })
    }

    fn session(fake: FakeTransport, strategy: HistoryStrategy) -> Arc<WalletSession<FakeTransport>> {
        Arc::new(WalletSession::new(
            ChainReader::new(fake, config()),
            wallet(),
            strategy,
            2,
            StaticPrice(Some(45_000.0)),
        ))
    }

    #[tokio::test]
    async fn refresh_publishes_one_snapshot() {
        let s = session(healthy_chain(), HistoryStrategy::Logs);
        let mut rx = s.subscribe();
        assert_eq!(rx.borrow().generation, 0);

        assert_eq!(s.refresh().await.unwrap(), RefreshOutcome::Refreshed);
        assert!(rx.has_changed().unwrap());
        let state = rx.borrow_and_update().clone();
        assert_eq!(state.generation, 1);
        let balance = state.balance.as_ref().unwrap();
        assert_eq!(balance.native_balance, "1.0");
        assert_eq!(balance.token_balance, "1.0");
        assert_eq!(balance.usd_value, Some(45_000.0));
        assert_eq!(state.history, History::Transfers(vec![]));
        assert!(state.last_error.is_none());
    }

    #[tokio::test]
    async fn scan_strategy_collects_wallet_transactions() {
        let s = session(healthy_chain(), HistoryStrategy::Scan);
        s.refresh().await.unwrap();

        match &s.state().history {
            History::Transactions(txs) => {
                let blocks: Vec<u64> = txs.iter().map(|t| t.block_number).collect();
                assert_eq!(blocks, vec![100, 99]);
            }
            other => panic!("unexpected history {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_refresh_while_in_flight_is_a_no_op() {
        let gate = Arc::new(Semaphore::new(0));
        let s = session(healthy_chain().gated(gate.clone()), HistoryStrategy::Logs);

        let first = tokio::spawn({
            let s = s.clone();
            async move { s.refresh().await }
        });
        while s.reader().transport().total_calls() == 0 {
            tokio::task::yield_now().await;
        }

        let calls_before = s.reader().transport().total_calls();
        assert_eq!(s.refresh().await.unwrap(), RefreshOutcome::Skipped);
        assert_eq!(s.reader().transport().total_calls(), calls_before);
        assert_eq!(s.state().generation, 0);

        gate.add_permits(64);
        assert_eq!(first.await.unwrap().unwrap(), RefreshOutcome::Refreshed);

        // exactly one refresh worth of calls
        let fake = s.reader().transport();
        assert_eq!(fake.count("eth_getBalance"), 1);
        assert_eq!(fake.count("eth_getCode"), 1);
        assert_eq!(fake.count("eth_call"), 1);
        assert_eq!(fake.count("eth_blockNumber"), 1);
        assert_eq!(fake.count("eth_getLogs"), 2);
        assert_eq!(fake.total_calls(), 6);
        assert_eq!(s.state().generation, 1);

        // guard released
        assert_eq!(s.refresh().await.unwrap(), RefreshOutcome::Refreshed);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_data() {
        let broken = Arc::new(AtomicBool::new(false));
        let fake = FakeTransport::new({
            let broken = broken.clone();
            move |method, _| {
                if broken.load(Ordering::SeqCst) {
                    return Err(ChainError::transport(None, "connection refused"));
                }
                match method {
                    "eth_getBalance" => Ok(json!("0x5f5e100")),
                    "eth_getCode" => Ok(json!("0x")),
                    "eth_blockNumber" => Ok(json!("0x1")),
                    "eth_getLogs" => Ok(json!([])),
                    other => panic!("unexpected call {other}"),
                }
            }
        });
        let s = session(fake, HistoryStrategy::Logs);

        s.refresh().await.unwrap();
        assert_eq!(s.state().warnings.len(), 1);

        broken.store(true, Ordering::SeqCst);
        assert!(s.refresh().await.is_err());

        let state = s.state();
        assert_eq!(state.generation, 2);
        assert!(state.last_error.as_deref().unwrap().contains("connection refused"));
        assert_eq!(state.balance.as_ref().unwrap().native_balance, "1.0");
    }

    #[tokio::test]
    async fn triggers_drive_refreshes() {
        let s = session(healthy_chain(), HistoryStrategy::Logs);
        let mut rx = s.subscribe();
        let (tx, triggers) = mpsc::channel(4);
        let runner = tokio::spawn(s.clone().run(triggers));

        tx.send(RefreshTrigger::Transfer { tx_hash: None }).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().generation, 1);

        drop(tx);
        runner.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_fires_immediately_then_periodically() {
        let (tx, mut rx) = mpsc::channel(4);
        let ticker = spawn_ticker(Duration::from_secs(60), tx);

        assert_eq!(rx.recv().await, Some(RefreshTrigger::Tick));
        assert_eq!(rx.recv().await, Some(RefreshTrigger::Tick));
        ticker.abort();
    }
}
