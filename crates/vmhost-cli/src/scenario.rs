//! JSON descriptions of the initial world and of the transactions to run.
//!
//! Addresses are written either in the host's own format (`drt1...` or
//! `0x...`) or as a short name, which becomes a readable fixture address.
//! Byte strings are hex and amounts are decimal strings.

use anyhow::Context;
use num_bigint::BigInt;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use vmhost_types::{Address, CallType};

/// Initial world state.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorldSpec {
    pub block: BlockSpec,
    pub accounts: Vec<AccountSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BlockSpec {
    pub nonce: u64,
    pub round: u64,
    pub epoch: u32,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AccountSpec {
    pub address: String,
    pub nonce: u64,
    pub balance: String,
    pub shard: u32,
    /// Contract code file, relative to the world file.
    pub code: Option<PathBuf>,
    pub code_metadata: String,
    pub owner: Option<String>,
    pub storage: BTreeMap<String, String>,
}

/// One transaction of the run.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TxSpec {
    Deploy(DeploySpec),
    Call(CallSpec),
    /// A call whose effects are reported but never committed.
    Query(CallSpec),
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeploySpec {
    pub caller: String,
    /// Contract code file, relative to the transactions file.
    pub code: PathBuf,
    #[serde(default = "default_code_metadata")]
    pub code_metadata: String,
    #[serde(default)]
    pub value: String,
    pub gas: u64,
    #[serde(default)]
    pub arguments: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallSpec {
    pub caller: String,
    pub contract: String,
    pub function: String,
    #[serde(default)]
    pub value: String,
    pub gas: u64,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub call_type: CallType,
    /// Original transaction hash, hex; callbacks name the transaction
    /// that started their batch.
    #[serde(default)]
    pub tx_hash: String,
}

fn default_code_metadata() -> String {
    "0100".to_string()
}

pub fn load_world(path: &Path) -> anyhow::Result<WorldSpec> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading world {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing world {}", path.display()))
}

pub fn load_transactions(path: &Path) -> anyhow::Result<Vec<TxSpec>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading transactions {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("parsing transactions {}", path.display()))
}

pub fn parse_address(text: &str) -> Address {
    Address::from_str(text).unwrap_or_else(|_| Address::from_name(text))
}

pub fn parse_bytes(text: &str) -> anyhow::Result<Vec<u8>> {
    let text = text.strip_prefix("0x").unwrap_or(text);
    hex::decode(text).with_context(|| format!("invalid hex string {text:?}"))
}

pub fn parse_arguments(arguments: &[String]) -> anyhow::Result<Vec<Vec<u8>>> {
    arguments.iter().map(|argument| parse_bytes(argument)).collect()
}

/// Decimal amount; the empty string is zero.
pub fn parse_amount(text: &str) -> anyhow::Result<BigInt> {
    if text.is_empty() {
        return Ok(BigInt::from(0));
    }
    BigInt::from_str(text).with_context(|| format!("invalid amount {text:?}"))
}

/// Read a code file named relative to `base`.
pub fn read_code(base: &Path, code: &Path) -> anyhow::Result<Vec<u8>> {
    let path = base.parent().unwrap_or_else(|| Path::new(".")).join(code);
    std::fs::read(&path).with_context(|| format!("reading code {}", path.display()))
}
