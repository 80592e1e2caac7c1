use crate::address::Address;
use crate::error::TypesError;
use crate::hash::Hash;
use num_bigint::BigInt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Contract properties packed into two bytes.
///
/// Byte 0 carries `upgradeable` (bit 1) and `readable` (bit 4); byte 1
/// carries `payable` (bit 2).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CodeMetadata {
    pub upgradeable: bool,
    pub readable: bool,
    pub payable: bool,
}

impl CodeMetadata {
    pub const LEN: usize = 2;

    const UPGRADEABLE: u8 = 1;
    const READABLE: u8 = 4;
    const PAYABLE: u8 = 2;

    /// Lenient decoding: short buffers decode to all flags off.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        if bytes.len() < Self::LEN {
            return Self::default();
        }
        Self {
            upgradeable: bytes[0] & Self::UPGRADEABLE != 0,
            readable: bytes[0] & Self::READABLE != 0,
            payable: bytes[1] & Self::PAYABLE != 0,
        }
    }

    /// Strict decoding used when metadata is supplied by a deployer.
    pub fn parse(bytes: &[u8]) -> Result<Self, TypesError> {
        if bytes.len() != Self::LEN {
            return Err(TypesError::InvalidCodeMetadata(bytes.len()));
        }
        Ok(Self::from_bytes(bytes))
    }

    pub fn to_bytes(&self) -> [u8; 2] {
        let mut bytes = [0u8; 2];
        if self.upgradeable {
            bytes[0] |= Self::UPGRADEABLE;
        }
        if self.readable {
            bytes[0] |= Self::READABLE;
        }
        if self.payable {
            bytes[1] |= Self::PAYABLE;
        }
        bytes
    }
}

/// Account state as seen by the host through the world provider.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct UserAccount {
    pub address: Address,
    pub nonce: u64,
    pub balance: BigInt,
    pub code_hash: Option<Hash>,
    pub code_metadata: Vec<u8>,
    pub owner_address: Option<Address>,
    pub developer_reward: BigInt,
}

impl UserAccount {
    pub fn metadata(&self) -> CodeMetadata {
        CodeMetadata::from_bytes(&self.code_metadata)
    }

    pub fn is_smart_contract(&self) -> bool {
        self.code_hash.is_some()
    }
}
