//! In-memory world and scripted contracts.
//!
//! `MockWorld` is a complete `BlockchainHook` with accounts, storage, token
//! balances, shards and the two token-transfer built-ins. `MockContract`
//! describes a contract as a set of Rust closures that drive the host API
//! directly, which makes nested and asynchronous flows easy to script.

mod instance;
mod world;

pub use instance::{MockContract, MockInstance, MockInstanceBuilder, MockMethod};
pub use world::{MockAccount, MockWorld};
