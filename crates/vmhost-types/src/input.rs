use crate::address::Address;
use crate::error::TypesError;
use num_bigint::BigInt;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How a contract call was initiated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CallType {
    #[default]
    DirectCall,
    AsynchronousCall,
    AsynchronousCallBack,
}

impl CallType {
    pub fn as_u64(&self) -> u64 {
        match self {
            CallType::DirectCall => 0,
            CallType::AsynchronousCall => 1,
            CallType::AsynchronousCallBack => 2,
        }
    }
}

impl TryFrom<u64> for CallType {
    type Error = TypesError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CallType::DirectCall),
            1 => Ok(CallType::AsynchronousCall),
            2 => Ok(CallType::AsynchronousCallBack),
            other => Err(TypesError::UnknownCallType(other)),
        }
    }
}

impl fmt::Display for CallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallType::DirectCall => "DirectCall",
            CallType::AsynchronousCall => "AsynchronousCall",
            CallType::AsynchronousCallBack => "AsynchronousCallBack",
        };
        f.write_str(name)
    }
}

/// Token type carried by a token transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TokenType {
    #[default]
    Fungible,
    NonFungible,
}

/// A protocol-level token transfer attached to a call.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DcdtTransfer {
    #[cfg_attr(feature = "serde", serde(with = "crate::serialization::hex_bytes"))]
    pub token_name: Vec<u8>,
    pub token_nonce: u64,
    #[cfg_attr(feature = "serde", serde(with = "crate::serialization::bigint_dec"))]
    pub value: BigInt,
    pub token_type: TokenType,
}

/// Fields shared by every kind of contract invocation.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct VMInput {
    pub caller_addr: Address,
    #[cfg_attr(feature = "serde", serde(with = "crate::serialization::hex_bytes_vec"))]
    pub arguments: Vec<Vec<u8>>,
    #[cfg_attr(feature = "serde", serde(with = "crate::serialization::bigint_dec"))]
    pub call_value: BigInt,
    pub call_type: CallType,
    pub gas_price: u64,
    pub gas_provided: u64,
    pub gas_locked: u64,
    #[cfg_attr(feature = "serde", serde(with = "crate::serialization::hex_bytes"))]
    pub original_tx_hash: Vec<u8>,
    #[cfg_attr(feature = "serde", serde(with = "crate::serialization::hex_bytes"))]
    pub current_tx_hash: Vec<u8>,
    #[cfg_attr(feature = "serde", serde(with = "crate::serialization::hex_bytes"))]
    pub prev_tx_hash: Vec<u8>,
    pub dcdt_transfers: Vec<DcdtTransfer>,
    pub return_call_after_error: bool,
}

impl VMInput {
    pub fn new(caller_addr: Address, gas_provided: u64) -> Self {
        Self {
            caller_addr,
            gas_provided,
            ..Default::default()
        }
    }

    pub fn with_value(mut self, value: impl Into<BigInt>) -> Self {
        self.call_value = value.into();
        self
    }

    pub fn with_arguments(mut self, arguments: Vec<Vec<u8>>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_call_type(mut self, call_type: CallType) -> Self {
        self.call_type = call_type;
        self
    }

    pub fn with_tx_hashes(mut self, original: &[u8], current: &[u8]) -> Self {
        self.original_tx_hash = original.to_vec();
        self.current_tx_hash = current.to_vec();
        self
    }
}

/// Input for calling a function of an already deployed contract.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ContractCallInput {
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub vm_input: VMInput,
    pub recipient_addr: Address,
    pub function: String,
    pub allow_init_function: bool,
}

impl ContractCallInput {
    pub fn new(vm_input: VMInput, recipient_addr: Address, function: impl Into<String>) -> Self {
        Self {
            vm_input,
            recipient_addr,
            function: function.into(),
            allow_init_function: false,
        }
    }
}

/// Input for deploying new contract code.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ContractCreateInput {
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub vm_input: VMInput,
    #[cfg_attr(feature = "serde", serde(with = "crate::serialization::hex_bytes"))]
    pub contract_code: Vec<u8>,
    #[cfg_attr(feature = "serde", serde(with = "crate::serialization::hex_bytes"))]
    pub contract_code_metadata: Vec<u8>,
}

impl ContractCreateInput {
    pub fn new(vm_input: VMInput, contract_code: Vec<u8>, contract_code_metadata: Vec<u8>) -> Self {
        Self {
            vm_input,
            contract_code,
            contract_code_metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_type_u64_roundtrip() {
        for call_type in [
            CallType::DirectCall,
            CallType::AsynchronousCall,
            CallType::AsynchronousCallBack,
        ] {
            assert_eq!(CallType::try_from(call_type.as_u64()).unwrap(), call_type);
        }
        assert!(CallType::try_from(7).is_err());
    }

    #[test]
    fn test_vm_input_builder() {
        let caller = Address::from_name("caller");
        let input = VMInput::new(caller, 1000)
            .with_value(10)
            .with_arguments(vec![b"a".to_vec()])
            .with_tx_hashes(b"orig", b"curr");
        assert_eq!(input.caller_addr, caller);
        assert_eq!(input.call_value, BigInt::from(10));
        assert_eq!(input.arguments.len(), 1);
        assert_eq!(input.original_tx_hash, b"orig");
        assert_eq!(input.call_type, CallType::DirectCall);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_call_input_json_shape() {
        let input = ContractCallInput::new(
            VMInput::new(Address::from_name("caller"), 5).with_value(3),
            Address::from_name("sc"),
            "doSomething",
        );
        let json = serde_json::to_value(&input).unwrap();
        assert_eq!(json["call_value"], "3");
        assert_eq!(json["function"], "doSomething");
        let back: ContractCallInput = serde_json::from_value(json).unwrap();
        assert_eq!(back, input);
    }
}
