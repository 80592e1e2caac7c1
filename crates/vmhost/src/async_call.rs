//! Async call descriptors and the persisted pending batch.

use crate::error::VmHostError;
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use vmhost_types::Address;

/// How a suspended async call is carried out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AsyncCallExecutionMode {
    /// Destination has code in this shard: run it and its callback now.
    SyncCall,
    /// Built-in function on a same-shard destination.
    AsyncBuiltinFuncIntraShard,
    /// Token transfer answering the caller of the current async call.
    DcdtTransferOnCallBack,
    /// Built-in function whose destination lives in another shard.
    AsyncBuiltinFuncCrossShard,
    /// Destination unknown here: emit an outgoing transfer.
    AsyncUnknown,
}

/// Resolution state of a generated call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AsyncCallStatus {
    #[default]
    Pending,
    Resolved,
    Rejected,
}

/// The single async call requested by the legacy `asyncCall` import.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct AsyncCallInfo {
    pub destination: Address,
    pub data: Vec<u8>,
    pub gas_limit: u64,
    pub gas_locked: u64,
    pub value_bytes: Vec<u8>,
}

impl AsyncCallInfo {
    pub fn value(&self) -> BigInt {
        BigInt::from_bytes_be(num_bigint::Sign::Plus, &self.value_bytes)
    }
}

/// One call of an async batch.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AsyncGeneratedCall {
    pub status: AsyncCallStatus,
    pub destination: Address,
    #[serde(with = "vmhost_types::serialization::hex_bytes")]
    pub data: Vec<u8>,
    pub gas_limit: u64,
    pub gas_locked: u64,
    #[serde(with = "vmhost_types::serialization::hex_bytes")]
    pub value_bytes: Vec<u8>,
    pub success_callback: String,
    pub error_callback: String,
    pub provided_gas: u64,
}

impl AsyncGeneratedCall {
    pub fn is_pending(&self) -> bool {
        self.status == AsyncCallStatus::Pending
    }

    pub fn value(&self) -> BigInt {
        BigInt::from_bytes_be(num_bigint::Sign::Plus, &self.value_bytes)
    }

    /// View as a single-call descriptor.
    pub fn call_info(&self) -> AsyncCallInfo {
        AsyncCallInfo {
            destination: self.destination,
            data: self.data.clone(),
            gas_limit: self.gas_limit,
            gas_locked: self.gas_locked,
            value_bytes: self.value_bytes.clone(),
        }
    }
}

/// Calls grouped under one context identifier.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AsyncContext {
    pub callback: String,
    pub calls: Vec<AsyncGeneratedCall>,
}

/// Every async call a contract generated during one execution.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AsyncContextInfo {
    pub caller_addr: Address,
    #[serde(with = "vmhost_types::serialization::hex_bytes")]
    pub return_data: Vec<u8>,
    pub async_context_map: BTreeMap<String, AsyncContext>,
}

impl AsyncContextInfo {
    pub fn new(caller_addr: Address) -> Self {
        Self {
            caller_addr,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.async_context_map.is_empty()
    }

    pub fn add_call(&mut self, context_identifier: &[u8], call: AsyncGeneratedCall) {
        self.async_context_map
            .entry(hex::encode(context_identifier))
            .or_default()
            .calls
            .push(call);
    }

    pub fn context(&self, context_identifier: &[u8]) -> Result<&AsyncContext, VmHostError> {
        self.async_context_map
            .get(&hex::encode(context_identifier))
            .ok_or(VmHostError::AsyncContextDoesNotExist)
    }

    pub fn context_mut(
        &mut self,
        context_identifier: &[u8],
    ) -> Result<&mut AsyncContext, VmHostError> {
        self.async_context_map
            .get_mut(&hex::encode(context_identifier))
            .ok_or(VmHostError::AsyncContextDoesNotExist)
    }

    pub fn calls(&self) -> impl Iterator<Item = &AsyncGeneratedCall> {
        self.async_context_map.values().flat_map(|ctx| ctx.calls.iter())
    }

    pub fn calls_mut(&mut self) -> impl Iterator<Item = &mut AsyncGeneratedCall> {
        self.async_context_map
            .values_mut()
            .flat_map(|ctx| ctx.calls.iter_mut())
    }

    pub fn pending_count(&self) -> usize {
        self.calls().filter(|call| call.is_pending()).count()
    }

    /// Drop resolved and rejected calls, then contexts left without calls.
    pub fn retain_pending(&mut self) {
        for context in self.async_context_map.values_mut() {
            context.calls.retain(AsyncGeneratedCall::is_pending);
        }
        self.async_context_map
            .retain(|_, context| !context.calls.is_empty());
    }

    pub fn to_json(&self) -> Result<Vec<u8>, VmHostError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, VmHostError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
