use crate::address::Address;
use crate::error::TypesError;
use crate::input::CallType;
use num_bigint::BigInt;
use num_traits::Zero;
use std::collections::BTreeMap;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Outcome class of a contract execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ReturnCode {
    #[default]
    Ok,
    FunctionNotFound,
    FunctionWrongSignature,
    ContractNotFound,
    UserError,
    OutOfGas,
    AccountCollision,
    OutOfFunds,
    CallStackOverFlow,
    ContractInvalid,
    ExecutionFailed,
    UpgradeFailed,
    SimulateFailed,
}

impl ReturnCode {
    pub fn as_u64(&self) -> u64 {
        *self as u64
    }

    /// Big-endian minimal encoding, as passed to callbacks (Ok is empty).
    pub fn to_bytes(&self) -> Vec<u8> {
        BigInt::from(self.as_u64()).to_bytes_be().1.into_iter().skip_while(|b| *b == 0).collect()
    }

    pub fn is_ok(&self) -> bool {
        *self == ReturnCode::Ok
    }
}

impl TryFrom<u64> for ReturnCode {
    type Error = TypesError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        let code = match value {
            0 => ReturnCode::Ok,
            1 => ReturnCode::FunctionNotFound,
            2 => ReturnCode::FunctionWrongSignature,
            3 => ReturnCode::ContractNotFound,
            4 => ReturnCode::UserError,
            5 => ReturnCode::OutOfGas,
            6 => ReturnCode::AccountCollision,
            7 => ReturnCode::OutOfFunds,
            8 => ReturnCode::CallStackOverFlow,
            9 => ReturnCode::ContractInvalid,
            10 => ReturnCode::ExecutionFailed,
            11 => ReturnCode::UpgradeFailed,
            12 => ReturnCode::SimulateFailed,
            other => return Err(TypesError::UnknownReturnCode(other)),
        };
        Ok(code)
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ReturnCode::Ok => "ok",
            ReturnCode::FunctionNotFound => "function not found",
            ReturnCode::FunctionWrongSignature => "wrong signature for function",
            ReturnCode::ContractNotFound => "contract not found",
            ReturnCode::UserError => "user error",
            ReturnCode::OutOfGas => "out of gas",
            ReturnCode::AccountCollision => "account collision",
            ReturnCode::OutOfFunds => "out of funds",
            ReturnCode::CallStackOverFlow => "call stack overflow",
            ReturnCode::ContractInvalid => "contract invalid",
            ReturnCode::ExecutionFailed => "execution failed",
            ReturnCode::UpgradeFailed => "upgrade failed",
            ReturnCode::SimulateFailed => "simulate failed",
        };
        f.write_str(text)
    }
}

/// A single storage write produced by a call.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StorageUpdate {
    #[cfg_attr(feature = "serde", serde(with = "crate::serialization::hex_bytes"))]
    pub offset: Vec<u8>,
    #[cfg_attr(feature = "serde", serde(with = "crate::serialization::hex_bytes"))]
    pub data: Vec<u8>,
}

/// Event emitted by a contract.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LogEntry {
    #[cfg_attr(feature = "serde", serde(with = "crate::serialization::hex_bytes"))]
    pub identifier: Vec<u8>,
    pub address: Address,
    #[cfg_attr(feature = "serde", serde(with = "crate::serialization::hex_bytes_vec"))]
    pub topics: Vec<Vec<u8>>,
    #[cfg_attr(feature = "serde", serde(with = "crate::serialization::hex_bytes"))]
    pub data: Vec<u8>,
}

/// Value or message sent to an account as a side effect of the call.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OutputTransfer {
    #[cfg_attr(feature = "serde", serde(with = "crate::serialization::bigint_dec"))]
    pub value: BigInt,
    pub gas_limit: u64,
    pub gas_locked: u64,
    #[cfg_attr(feature = "serde", serde(with = "crate::serialization::hex_bytes"))]
    pub data: Vec<u8>,
    pub call_type: CallType,
    pub sender_address: Address,
}

/// Effects of a call on one account.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct OutputAccount {
    pub address: Address,
    pub nonce: u64,
    #[cfg_attr(feature = "serde", serde(with = "crate::serialization::bigint_dec_opt"))]
    pub balance: Option<BigInt>,
    #[cfg_attr(feature = "serde", serde(with = "crate::serialization::bigint_dec"))]
    pub balance_delta: BigInt,
    #[cfg_attr(feature = "serde", serde(with = "crate::serialization::hex_key_map"))]
    pub storage_updates: BTreeMap<Vec<u8>, StorageUpdate>,
    #[cfg_attr(feature = "serde", serde(with = "crate::serialization::hex_bytes"))]
    pub code: Vec<u8>,
    #[cfg_attr(feature = "serde", serde(with = "crate::serialization::hex_bytes"))]
    pub code_metadata: Vec<u8>,
    pub code_deployer_address: Option<Address>,
    pub gas_used: u64,
    pub output_transfers: Vec<OutputTransfer>,
}

impl OutputAccount {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            ..Default::default()
        }
    }

    /// Sum of gas limits and locked gas over the account's transfers.
    pub fn transfers_gas(&self) -> u64 {
        self.output_transfers
            .iter()
            .fold(0u64, |acc, t| acc.saturating_add(t.gas_limit).saturating_add(t.gas_locked))
    }
}

/// Complete result of a top-level or nested call.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct VMOutput {
    #[cfg_attr(feature = "serde", serde(with = "crate::serialization::hex_bytes_vec"))]
    pub return_data: Vec<Vec<u8>>,
    pub return_code: ReturnCode,
    pub return_message: String,
    pub gas_remaining: u64,
    #[cfg_attr(feature = "serde", serde(with = "crate::serialization::bigint_dec"))]
    pub gas_refund: BigInt,
    pub output_accounts: BTreeMap<Address, OutputAccount>,
    pub deleted_accounts: Vec<Address>,
    pub touched_accounts: Vec<Address>,
    pub logs: Vec<LogEntry>,
}

impl VMOutput {
    /// Output carrying only a failure code and message.
    pub fn with_error(return_code: ReturnCode, return_message: impl Into<String>) -> Self {
        Self {
            return_code,
            return_message: return_message.into(),
            ..Default::default()
        }
    }

    /// Sum of balance deltas over all output accounts.
    pub fn balance_delta_sum(&self) -> BigInt {
        self.output_accounts
            .values()
            .fold(BigInt::zero(), |acc, account| acc + &account.balance_delta)
    }

    /// Gas accounted for by accounts, transfers and the remainder.
    pub fn total_gas_accounted(&self) -> u64 {
        self.output_accounts
            .values()
            .fold(self.gas_remaining, |acc, account| {
                acc.saturating_add(account.gas_used).saturating_add(account.transfers_gas())
            })
    }
}
