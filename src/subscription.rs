use ethers::{
    providers::{Middleware, Provider, StreamExt, Ws},
    types::{Address, Filter, H256, U256},
};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::backoff::{BackoffConfig, ExponentialBackoff};
use crate::error::{ChainError, Result};
use crate::models::{transfer_parties, Direction, TRANSFER_TOPIC};
use crate::session::RefreshTrigger;

/// Which side of a Transfer the wallet is on, if either.
pub fn wallet_direction(topics: &[H256], wallet: &Address) -> Option<Direction> {
    let (from, to) = transfer_parties(topics)?;
    if from == *wallet {
        Some(Direction::Sent)
    } else if to == *wallet {
        Some(Direction::Received)
    } else {
        None
    }
}

/// Live `logs` subscription for token Transfers, turned into refresh triggers
/// whenever the tracked wallet is involved.
pub struct TransferSubscription {
    ws_url: String,
    token: Address,
    wallet: Address,
    backoff: BackoffConfig,
    subscription_id: Option<U256>,
}

impl TransferSubscription {
    pub fn new(ws_url: String, token: Address, wallet: Address, backoff: BackoffConfig) -> Self {
        Self { ws_url, token, wallet, backoff, subscription_id: None }
    }

    /// Id of the live subscription, if connected.
    pub fn subscription_id(&self) -> Option<U256> {
        self.subscription_id
    }

    pub fn filter(&self) -> Filter {
        Filter::new().address(self.token).topic0(TRANSFER_TOPIC)
    }

    /// Stay subscribed, reconnecting with backoff, until the trigger receiver is
    /// dropped or reconnect attempts run out.
    pub async fn run(&mut self, triggers: mpsc::Sender<RefreshTrigger>) -> Result<()> {
        let mut backoff = ExponentialBackoff::new(self.backoff.clone());

        loop {
            match self.stream_once(&triggers, &mut backoff).await {
                Ok(()) => warn!(id = ?self.subscription_id(), "transfer log stream ended"),
                Err(e) => warn!(id = ?self.subscription_id(), error = %e, "transfer log subscription failed"),
            }
            self.subscription_id = None;

            if triggers.is_closed() {
                info!("refresh triggers closed, stopping subscription");
                return Ok(());
            }
            let Some(delay) = backoff.next() else {
                return Err(ChainError::Subscription(format!(
                    "gave up after {} reconnect attempts",
                    backoff.attempt()
                )));
            };
            info!(attempt = backoff.attempt(), ?delay, "reconnecting transfer log subscription");
            tokio::time::sleep(delay).await;
        }
    }

    async fn stream_once(
        &mut self,
        triggers: &mpsc::Sender<RefreshTrigger>,
        backoff: &mut ExponentialBackoff,
    ) -> Result<()> {
        let ws = Ws::connect(self.ws_url.as_str())
            .await
            .map_err(|e| ChainError::Subscription(e.to_string()))?;
        let provider = Provider::new(ws);

        let filter = self.filter();
        let mut stream = provider
            .subscribe_logs(&filter)
            .await
            .map_err(|e| ChainError::Subscription(e.to_string()))?;

        self.subscription_id = Some(stream.id);
        backoff.reset();
        info!(id = ?stream.id, token = ?self.token, "Subscribed to transfer logs");

        while let Some(log) = stream.next().await {
            let Some(direction) = wallet_direction(&log.topics, &self.wallet) else {
                continue;
            };
            info!(tx = ?log.transaction_hash, ?direction, block = ?log.block_number, "Transfer touching wallet");
            let trigger = RefreshTrigger::Transfer { tx_hash: log.transaction_hash };
            if triggers.send(trigger).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}
