use alloy_primitives::U256;
use ethers::types::{Address, H160, H256};
use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};

use crate::quantity::{hex_to_integer, HexQuantity};

// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: H256 = H256([
    0xdd, 0xf2, 0x52, 0xad, 0x1b, 0xe2, 0xc8, 0x9b,
    0x69, 0xc2, 0xb0, 0x68, 0xfc, 0x37, 0x8d, 0xaa,
    0x95, 0x2b, 0xa7, 0xf1, 0x63, 0xc4, 0xa1, 0x16,
    0x28, 0xf5, 0x5a, 0x4d, 0xf5, 0x23, 0xb3, 0xef,
]);

// bytes4(keccak256("balanceOf(address)"))
pub const BALANCE_OF_SELECTOR: &str = "70a08231";

/// Code returned by `eth_getCode` for an address without a contract.
pub const EMPTY_CODE: &str = "0x";

pub fn parse_address(s: &str) -> Result<Address> {
    s.trim()
        .parse::<H160>()
        .map_err(|_| eyre!("Invalid address: {}", s))
}

/// Left-pad an address to a 32-byte log topic.
pub fn address_topic(address: &Address) -> H256 {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_bytes());
    H256(word)
}

/// The address held in the low 20 bytes of an indexed topic.
pub fn topic_address(topic: &H256) -> Address {
    H160::from_slice(&topic.as_bytes()[12..])
}

/// `(from, to)` of an ERC20 Transfer log, if the topics have that shape.
///
/// ERC721 shares the event signature but indexes the token id as a fourth
/// topic, so only exactly three topics qualify.
pub fn transfer_parties(topics: &[H256]) -> Option<(Address, Address)> {
    if topics.len() != 3 || topics[0] != TRANSFER_TOPIC {
        return None;
    }
    Some((topic_address(&topics[1]), topic_address(&topics[2])))
}

/// Call data for `balanceOf(owner)`: selector followed by the 32-byte padded owner.
pub fn balance_of_calldata(owner: &Address) -> String {
    format!("0x{}{}", BALANCE_OF_SELECTOR, hex::encode(address_topic(owner).as_bytes()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Sent,
    Received,
}

// ---- JSON-RPC wire schemas ----

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub number: HexQuantity,
    pub timestamp: HexQuantity,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: H256,
    pub from: Address,
    /// `None` for contract creation.
    pub to: Option<Address>,
    pub value: HexQuantity,
    #[serde(default)]
    pub gas_price: Option<HexQuantity>,
    pub gas: HexQuantity,
    #[serde(default)]
    pub input: String,
    pub transaction_index: HexQuantity,
}

impl Transaction {
    pub fn involves(&self, wallet: &Address) -> bool {
        self.from == *wallet || self.to.as_ref() == Some(wallet)
    }

    pub fn input_hex_len(&self) -> usize {
        self.input.strip_prefix("0x").unwrap_or(&self.input).len()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    #[serde(default)]
    pub contract_address: Option<Address>,
    #[serde(default)]
    pub status: Option<HexQuantity>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub topics: Vec<H256>,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub block_number: Option<HexQuantity>,
    #[serde(default)]
    pub transaction_hash: Option<H256>,
    #[serde(default)]
    pub log_index: Option<HexQuantity>,
    #[serde(default)]
    pub removed: bool,
}

/// `eth_call` transaction object.
#[derive(Debug, Clone, Serialize)]
pub struct CallRequest {
    pub to: Address,
    pub data: String,
}

/// `eth_getLogs` filter object.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    pub from_block: String,
    pub to_block: String,
    pub address: Address,
    pub topics: Vec<Option<H256>>,
}

impl LogFilter {
    /// Transfers of `token` with the wallet in the indexed slot for `direction`.
    pub fn transfers(token: Address, wallet: &Address, direction: Direction, from_block: String) -> Self {
        let wallet_topic = Some(address_topic(wallet));
        let topics = match direction {
            Direction::Sent => vec![Some(TRANSFER_TOPIC), wallet_topic],
            Direction::Received => vec![Some(TRANSFER_TOPIC), None, wallet_topic],
        };
        Self {
            from_block,
            to_block: "latest".to_string(),
            address: token,
            topics,
        }
    }
}

// ---- Domain values ----

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferLogEvent {
    pub transaction_hash: H256,
    pub block_number: u64,
    pub log_index: Option<u64>,
    pub from_address: Address,
    pub to_address: Address,
    pub amount: U256,
    pub direction: Direction,
}

impl TransferLogEvent {
    pub fn from_log(log: &RpcLog, direction: Direction) -> std::result::Result<Self, String> {
        let (from_address, to_address) =
            transfer_parties(&log.topics).ok_or_else(|| format!("expected Transfer topics, got {}", log.topics.len()))?;
        let transaction_hash = log.transaction_hash.ok_or("log has no transaction hash")?;
        let block_number = log
            .block_number
            .ok_or("log has no block number")?
            .as_u64()
            .map_err(|e| e.to_string())?;
        let log_index = log.log_index.map(HexQuantity::as_u64).transpose().map_err(|e| e.to_string())?;

        // uint256 amount is the last data word
        let data = log.data.strip_prefix("0x").unwrap_or(&log.data);
        if !data.is_ascii() {
            return Err("log data is not hex".to_string());
        }
        if data.len() < 64 {
            return Err(format!("log data holds {} hex chars, expected a 32-byte amount", data.len()));
        }
        let word = &data[data.len() - 64..];
        let amount = hex_to_integer(&format!("0x{word}")).map_err(|e| e.to_string())?;

        Ok(Self {
            transaction_hash,
            block_number,
            log_index,
            from_address,
            to_address,
            amount,
            direction,
        })
    }
}

/// A transaction found by block scanning, stamped with its block.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentTransaction {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub block_number: u64,
    pub block_timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_contract_address: Option<Address>,
    pub has_input_data: bool,
    pub input_length: usize,
}

impl RecentTransaction {
    pub fn new(transaction: Transaction, block_number: u64, block_timestamp: u64) -> Self {
        let input_length = transaction.input_hex_len();
        Self {
            transaction,
            block_number,
            block_timestamp,
            created_contract_address: None,
            has_input_data: input_length > 0,
            input_length,
        }
    }

    pub fn is_contract_creation(&self) -> bool {
        self.transaction.to.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSnapshot {
    pub native_raw: U256,
    pub native_balance: String,
    pub token_raw: U256,
    pub token_balance: String,
    /// `None` when no price was available; not a confirmed zero.
    pub usd_value: Option<f64>,
    pub as_of: i64,
}
