//! World provider boundary and the blockchain context built on it.

use crate::error::VmHostError;
use crate::output::OutputContext;
use crate::state_stack::StateStack;
use num_bigint::BigInt;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::trace;
use vmhost_types::{Address, ContractCallInput, Hash, UserAccount, VMOutput};

/// Block information exposed to contracts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockInfo {
    pub nonce: u64,
    pub round: u64,
    pub epoch: u32,
    pub timestamp: u64,
    pub random_seed: Vec<u8>,
}

/// Read access to the world state, plus the few operations the host may
/// perform on it directly (compiled-code cache, built-ins, snapshots).
pub trait BlockchainHook {
    /// Derive the address of a contract deployed by `creator`.
    fn new_address(
        &self,
        creator: &Address,
        creator_nonce: u64,
        vm_type: &[u8],
    ) -> Result<Address, VmHostError>;

    fn get_user_account(&self, address: &Address) -> Option<UserAccount>;

    fn account_exists(&self, address: &Address) -> bool {
        self.get_user_account(address).is_some()
    }

    fn get_storage_data(&self, address: &Address, key: &[u8]) -> Vec<u8>;

    fn get_code(&self, address: &Address) -> Option<Vec<u8>>;

    fn get_compiled_code(&self, code_hash: &Hash) -> Option<Vec<u8>>;

    fn save_compiled_code(&mut self, code_hash: &Hash, compiled: &[u8]);

    fn is_builtin_function(&self, name: &str) -> bool;

    fn builtin_function_names(&self) -> Vec<String>;

    /// Run a protocol built-in function outside the interpreter.
    fn process_builtin_function(
        &mut self,
        input: &ContractCallInput,
    ) -> Result<VMOutput, VmHostError>;

    fn shard_of_address(&self, address: &Address) -> u32;

    fn is_smart_contract(&self, address: &Address) -> bool;

    fn is_payable(&self, address: &Address) -> bool {
        match self.get_user_account(address) {
            Some(account) if account.is_smart_contract() => account.metadata().payable,
            _ => true,
        }
    }

    fn get_snapshot(&self) -> usize;

    fn revert_to_snapshot(&mut self, snapshot: usize);

    fn block_info(&self) -> BlockInfo;
}

impl<T: BlockchainHook> BlockchainHook for Rc<RefCell<T>> {
    fn new_address(
        &self,
        creator: &Address,
        creator_nonce: u64,
        vm_type: &[u8],
    ) -> Result<Address, VmHostError> {
        self.borrow().new_address(creator, creator_nonce, vm_type)
    }

    fn get_user_account(&self, address: &Address) -> Option<UserAccount> {
        self.borrow().get_user_account(address)
    }

    fn account_exists(&self, address: &Address) -> bool {
        self.borrow().account_exists(address)
    }

    fn get_storage_data(&self, address: &Address, key: &[u8]) -> Vec<u8> {
        self.borrow().get_storage_data(address, key)
    }

    fn get_code(&self, address: &Address) -> Option<Vec<u8>> {
        self.borrow().get_code(address)
    }

    fn get_compiled_code(&self, code_hash: &Hash) -> Option<Vec<u8>> {
        self.borrow().get_compiled_code(code_hash)
    }

    fn save_compiled_code(&mut self, code_hash: &Hash, compiled: &[u8]) {
        self.borrow_mut().save_compiled_code(code_hash, compiled)
    }

    fn is_builtin_function(&self, name: &str) -> bool {
        self.borrow().is_builtin_function(name)
    }

    fn builtin_function_names(&self) -> Vec<String> {
        self.borrow().builtin_function_names()
    }

    fn process_builtin_function(
        &mut self,
        input: &ContractCallInput,
    ) -> Result<VMOutput, VmHostError> {
        self.borrow_mut().process_builtin_function(input)
    }

    fn shard_of_address(&self, address: &Address) -> u32 {
        self.borrow().shard_of_address(address)
    }

    fn is_smart_contract(&self, address: &Address) -> bool {
        self.borrow().is_smart_contract(address)
    }

    fn is_payable(&self, address: &Address) -> bool {
        self.borrow().is_payable(address)
    }

    fn get_snapshot(&self) -> usize {
        self.borrow().get_snapshot()
    }

    fn revert_to_snapshot(&mut self, snapshot: usize) {
        self.borrow_mut().revert_to_snapshot(snapshot)
    }

    fn block_info(&self) -> BlockInfo {
        self.borrow().block_info()
    }
}

/// Façade over the world provider. Its state stack holds world snapshots
/// so that a failed nested call can roll back whatever the built-ins wrote.
pub struct BlockchainContext {
    hook: Box<dyn BlockchainHook>,
    snapshots: StateStack<usize>,
}

impl BlockchainContext {
    pub fn new(hook: Box<dyn BlockchainHook>) -> Self {
        Self {
            hook,
            snapshots: StateStack::new(0),
        }
    }

    pub fn hook(&self) -> &dyn BlockchainHook {
        self.hook.as_ref()
    }

    pub fn hook_mut(&mut self) -> &mut dyn BlockchainHook {
        self.hook.as_mut()
    }

    pub fn init_state(&mut self) {
        self.snapshots = StateStack::new(0);
    }

    /// Remember the current world snapshot.
    pub fn push_state(&mut self) {
        let snapshot = self.hook.get_snapshot();
        self.snapshots.set_active(snapshot);
        self.snapshots.push();
    }

    /// Roll the world back to the last remembered snapshot.
    pub fn pop_set_active_state(&mut self) {
        if self.snapshots.depth() == 0 {
            trace!("blockchain pop_set_active on empty stack");
            return;
        }
        self.snapshots.pop_set_active();
        let snapshot = *self.snapshots.active();
        self.hook.revert_to_snapshot(snapshot);
    }

    pub fn pop_discard(&mut self) {
        self.snapshots.pop_discard();
    }

    pub fn clear_state_stack(&mut self) {
        self.snapshots.clear();
    }

    pub fn depth(&self) -> usize {
        self.snapshots.depth()
    }

    /// Derive a new contract address from the creator's current nonce.
    pub fn new_address(
        &self,
        output: &mut OutputContext,
        creator: &Address,
        vm_type: &[u8],
    ) -> Result<Address, VmHostError> {
        let mut nonce = self.get_nonce(output, creator);
        if nonce > 0 {
            nonce -= 1;
        }
        self.hook.new_address(creator, nonce, vm_type)
    }

    /// Nonce as seen by the running transaction.
    pub fn get_nonce(&self, output: &mut OutputContext, address: &Address) -> u64 {
        let (account, is_new) = output.get_output_account(address);
        if is_new {
            if let Some(user) = self.hook.get_user_account(address) {
                account.nonce = user.nonce;
            }
        }
        account.nonce
    }

    pub fn increase_nonce(&self, output: &mut OutputContext, address: &Address) {
        let nonce = self.get_nonce(output, address);
        let (account, _) = output.get_output_account(address);
        account.nonce = nonce + 1;
    }

    /// Balance including the deltas accumulated by the running transaction.
    pub fn get_balance(&self, output: &mut OutputContext, address: &Address) -> BigInt {
        let (account, _) = output.get_output_account(address);
        if account.balance.is_none() {
            let balance = self
                .hook
                .get_user_account(address)
                .map(|user| user.balance)
                .unwrap_or_default();
            account.balance = Some(balance);
        }
        account.balance.clone().unwrap_or_default() + &account.balance_delta
    }

    pub fn account_exists(&self, address: &Address) -> bool {
        self.hook.account_exists(address)
    }

    pub fn get_code(&self, address: &Address) -> Result<Vec<u8>, VmHostError> {
        match self.hook.get_code(address) {
            Some(code) if !code.is_empty() => Ok(code),
            _ => Err(VmHostError::ContractNotFound),
        }
    }

    pub fn get_code_hash(&self, address: &Address) -> Option<Hash> {
        self.hook
            .get_user_account(address)
            .and_then(|account| account.code_hash)
    }

    pub fn get_user_account(&self, address: &Address) -> Result<UserAccount, VmHostError> {
        self.hook
            .get_user_account(address)
            .ok_or(VmHostError::InvalidAccount)
    }

    pub fn get_compiled_code(&self, code_hash: &Hash) -> Option<Vec<u8>> {
        self.hook.get_compiled_code(code_hash)
    }

    pub fn save_compiled_code(&mut self, code_hash: &Hash, compiled: &[u8]) {
        self.hook.save_compiled_code(code_hash, compiled);
    }

    pub fn get_shard_of_address(&self, address: &Address) -> u32 {
        self.hook.shard_of_address(address)
    }

    pub fn is_smart_contract(&self, address: &Address) -> bool {
        self.hook.is_smart_contract(address)
    }

    pub fn is_payable(&self, address: &Address) -> bool {
        self.hook.is_payable(address)
    }

    pub fn process_builtin_function(
        &mut self,
        input: &ContractCallInput,
    ) -> Result<VMOutput, VmHostError> {
        self.hook.process_builtin_function(input)
    }

    pub fn block_info(&self) -> BlockInfo {
        self.hook.block_info()
    }
}
