//! vmhost - deterministic WASM smart contract execution host.
//!
//! This crate provides:
//! - A generic state stack shared by every execution context
//! - Runtime, metering, output, storage, big integer and blockchain contexts
//! - Nested calls on the destination and on the same context
//! - The asynchronous call state machine with persisted pending batches
//! - A wasmtime-backed instance adapter and a mock world for tests

pub mod async_call;
pub mod bigint;
pub mod blockchain;
pub mod call_args;
pub mod config;
pub mod error;
pub mod gas_schedule;
pub mod host;
pub mod instance;
pub mod metering;
pub mod mock;
pub mod output;
pub mod runtime;
pub mod state_stack;
pub mod storage;
pub mod validator;
pub mod vmhooks;
pub mod wasm;

pub use async_call::{
    AsyncCallExecutionMode, AsyncCallInfo, AsyncCallStatus, AsyncContext, AsyncContextInfo,
    AsyncGeneratedCall,
};
pub use blockchain::{BlockInfo, BlockchainHook};
pub use config::{FaultPolicy, FeatureFlags, HostConfig};
pub use error::VmHostError;
pub use gas_schedule::GasSchedule;
pub use host::VmHost;
pub use instance::{
    Breakpoint, BreakpointValue, HookResult, Instance, InstanceBuilder, InstanceOptions,
    InstanceTrap, LinearMemory,
};
pub use state_stack::StateStack;
pub use storage::StorageStatus;
pub use wasm::WasmtimeInstanceBuilder;

pub use vmhost_types as types;

/// Name of the deployment entry point.
pub const INIT_FUNCTION_NAME: &str = "init";

/// Alternative deployment entry point name.
pub const INIT_FUNCTION_NAME_ETH: &str = "solidity.ctor";

/// Default callback invoked with the result of an async call.
pub const CALLBACK_FUNCTION_NAME: &str = "callBack";

/// Function name that routes a call into the upgrade path.
pub const UPGRADE_FUNCTION_NAME: &str = "upgradeContract";

/// Built-in function moving fungible tokens.
pub const BUILTIN_DCDT_TRANSFER: &str = "DCDTTransfer";

/// Built-in function moving semi- and non-fungible tokens.
pub const BUILTIN_DCDT_NFT_TRANSFER: &str = "DCDTNFTTransfer";

/// Storage keys starting with this prefix are writable only by the host.
pub const PROTECTED_STORAGE_PREFIX: &[u8] = b"VMHOST@";

/// Pending async batches live under this prefix followed by the original
/// transaction hash.
pub const ASYNC_DATA_PREFIX: &[u8] = b"VMHOST@asyncCalls";

/// Maximum number of pages a single `memory.grow` may request.
pub const MAX_MEMORY_GROW: u64 = 10;

/// Maximum pages added by one grow instruction.
pub const MAX_MEMORY_GROW_DELTA: u64 = 10;

/// Length of a WASM page in bytes.
pub const WASM_PAGE_SIZE: u32 = 65_536;

/// Maximum length of an exported function name.
pub const MAX_FUNCTION_NAME_LEN: usize = 256;

/// Storage key holding the pending async batch of a transaction.
pub fn async_data_storage_key(original_tx_hash: &[u8]) -> Vec<u8> {
    let mut key = ASYNC_DATA_PREFIX.to_vec();
    key.extend_from_slice(original_tx_hash);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_async_key_is_protected() {
        let key = async_data_storage_key(b"tx");
        assert!(key.starts_with(PROTECTED_STORAGE_PREFIX));
        assert!(key.ends_with(b"tx"));
    }

    #[test]
    fn test_vm_constants() {
        assert_eq!(MAX_MEMORY_GROW, 10);
        assert_eq!(WASM_PAGE_SIZE, 64 * 1024);
        assert_eq!(CALLBACK_FUNCTION_NAME, "callBack");
    }
}
