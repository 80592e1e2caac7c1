//! vmhost types - data model shared by the execution host and its callers.
//!
//! This crate provides:
//! - Addresses (32-byte, Bech32 encoded) and code hashes (blake3)
//! - Call and deploy inputs (`VMInput`, `ContractCallInput`, `ContractCreateInput`)
//! - Call results (`VMOutput`, `OutputAccount`, `OutputTransfer`, `LogEntry`)
//! - Return codes, call types and code metadata

pub mod account;
pub mod address;
pub mod error;
pub mod hash;
pub mod input;
pub mod output;

#[cfg(feature = "serde")]
pub mod serialization;

pub use account::{CodeMetadata, UserAccount};
pub use address::Address;
pub use error::TypesError;
pub use hash::Hash;
pub use input::{CallType, ContractCallInput, ContractCreateInput, DcdtTransfer, TokenType, VMInput};
pub use output::{LogEntry, OutputAccount, OutputTransfer, ReturnCode, StorageUpdate, VMOutput};

/// Re-exported so that callers can build values without a direct dependency.
pub use num_bigint::BigInt;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Address, BigInt, CallType, CodeMetadata, ContractCallInput, ContractCreateInput, Hash,
        OutputAccount, OutputTransfer, ReturnCode, TypesError, VMInput, VMOutput,
    };
}
