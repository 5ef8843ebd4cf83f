//! Scripted, call-counting transport for reader and session tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ethers::types::Address;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use crate::config::ChainConfig;
use crate::error::{ChainError, Result};
use crate::models::parse_address;
use crate::rpc::RpcTransport;

type Handler = dyn Fn(&str, &Value) -> Result<Value> + Send + Sync;

pub struct FakeTransport {
    handler: Box<Handler>,
    calls: Mutex<Vec<(String, Value)>>,
    gate: Option<Arc<Semaphore>>,
}

impl FakeTransport {
    pub fn new(handler: impl Fn(&str, &Value) -> Result<Value> + Send + Sync + 'static) -> Self {
        Self { handler: Box::new(handler), calls: Mutex::new(Vec::new()), gate: None }
    }

    /// Every call waits for a permit from `gate` after being recorded.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(m, _)| m == method).count()
    }
}

#[async_trait]
impl RpcTransport for FakeTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        self.calls.lock().unwrap().push((method.to_string(), params.clone()));
        if let Some(gate) = &self.gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|_| ChainError::transport(None, "gate closed"))?;
        }
        (self.handler)(method, &params)
    }
}

pub fn wallet() -> Address {
    parse_address("0xe81430d54414dc122a6cd8ef48834fd17a41141b").unwrap()
}

pub fn token() -> Address {
    parse_address("0x5425890298aed601595a70ab815c96711a31bc65").unwrap()
}

pub fn config() -> ChainConfig {
    let mut config = ChainConfig::new("http://fake", token(), 8, 18);
    config.rpc_timeout = Duration::from_secs(10);
    config
}

pub fn hash(n: u64) -> String {
    format!("0x{n:064x}")
}

pub fn tx_json(n: u64, index: u64, from: &str, to: Option<&str>) -> Value {
    json!({
        "hash": hash(n),
        "from": from,
        "to": to,
        "value": "0x5f5e100",
        "gasPrice": "0x5d21dba00",
        "gas": "0x5208",
        "input": "0x",
        "transactionIndex": format!("0x{index:x}"),
    })
}

pub fn block_json(number: u64, transactions: Vec<Value>) -> Value {
    json!({
        "number": format!("0x{number:x}"),
        "timestamp": format!("0x{:x}", 1_700_000_000 + number),
        "transactions": transactions,
    })
}

/// Block number requested by an `eth_getBlockByNumber` call.
pub fn requested_block(params: &Value) -> u64 {
    let hex = params[0].as_str().unwrap();
    u64::from_str_radix(hex.trim_start_matches("0x"), 16).unwrap()
}
