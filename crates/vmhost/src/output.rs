//! Output context: accumulates the effect log of the running call tree.

use crate::blockchain::BlockchainContext;
use crate::error::VmHostError;
use crate::state_stack::StateStack;
use num_bigint::{BigInt, Sign};
use num_traits::Zero;
use tracing::trace;
use vmhost_types::{
    Address, CallType, LogEntry, OutputAccount, OutputTransfer, ReturnCode, VMOutput,
};

/// Code and metadata written by a deployment or an upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeDeployInput {
    pub contract_code: Vec<u8>,
    pub contract_code_metadata: Vec<u8>,
    pub contract_address: Address,
    pub code_deployer_address: Address,
}

/// Effects of the active call, with saved copies for the enclosing calls.
#[derive(Debug, Clone, Default)]
pub struct OutputContext {
    state: StateStack<VMOutput>,
}

impl OutputContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init_state(&mut self) {
        self.state = StateStack::new(VMOutput::default());
    }

    pub fn push_state(&mut self) {
        self.state.push();
    }

    pub fn pop_set_active_state(&mut self) {
        self.state.pop_set_active();
    }

    pub fn pop_discard(&mut self) {
        self.state.pop_discard();
    }

    /// Fold the effects of a successful nested call into its caller.
    pub fn pop_merge_active_state(&mut self) {
        self.state.pop_merge(merge_vm_outputs);
    }

    pub fn clear_state_stack(&mut self) {
        self.state.clear();
    }

    pub fn depth(&self) -> usize {
        self.state.depth()
    }

    /// Hide the caller's results from a nested call while keeping its
    /// pending account changes visible.
    pub fn censor_vm_output(&mut self) {
        let active = self.state.active_mut();
        active.return_data.clear();
        active.return_code = ReturnCode::Ok;
        active.return_message.clear();
        active.gas_remaining = 0;
        active.gas_refund = BigInt::zero();
        active.logs.clear();
    }

    pub(crate) fn state(&self) -> &VMOutput {
        self.state.active()
    }

    pub(crate) fn state_mut(&mut self) -> &mut VMOutput {
        self.state.active_mut()
    }

    /// Output account for `address`, created on first use. The flag tells
    /// whether it was just created.
    pub fn get_output_account(&mut self, address: &Address) -> (&mut OutputAccount, bool) {
        let accounts = &mut self.state.active_mut().output_accounts;
        let is_new = !accounts.contains_key(address);
        let account = accounts
            .entry(*address)
            .or_insert_with(|| OutputAccount::new(*address));
        (account, is_new)
    }

    pub fn output_account(&self, address: &Address) -> Option<&OutputAccount> {
        self.state.active().output_accounts.get(address)
    }

    pub fn delete_output_account(&mut self, address: &Address) {
        self.state.active_mut().output_accounts.remove(address);
    }

    pub fn write_log(&mut self, address: &Address, topics: Vec<Vec<u8>>, data: Vec<u8>) {
        let (identifier, topics) = match topics.split_first() {
            Some((first, rest)) => (first.clone(), rest.to_vec()),
            None => (Vec::new(), Vec::new()),
        };
        trace!(address = %address, topics = topics.len(), "write log");
        self.state.active_mut().logs.push(LogEntry {
            identifier,
            address: *address,
            topics,
            data,
        });
    }

    /// Move value between accounts without emitting a transfer entry.
    pub fn transfer_value_only(
        &mut self,
        blockchain: &BlockchainContext,
        destination: &Address,
        sender: &Address,
        value: &BigInt,
        check_payable: bool,
    ) -> Result<(), VmHostError> {
        if value.sign() == Sign::Minus {
            return Err(VmHostError::TransferNegativeValue);
        }
        let sender_balance = blockchain.get_balance(self, sender);
        if &sender_balance < value {
            trace!(sender = %sender, "transfer: insufficient funds");
            return Err(VmHostError::TransferInsufficientFunds);
        }
        if check_payable && !value.is_zero() && !blockchain.is_payable(destination) {
            return Err(VmHostError::AccountNotPayable);
        }

        let (sender_account, _) = self.get_output_account(sender);
        sender_account.balance_delta -= value;
        let (dest_account, _) = self.get_output_account(destination);
        dest_account.balance_delta += value;
        Ok(())
    }

    /// Move value and record an outgoing transfer on the destination account.
    #[allow(clippy::too_many_arguments)]
    pub fn transfer(
        &mut self,
        blockchain: &BlockchainContext,
        destination: &Address,
        sender: &Address,
        gas_limit: u64,
        gas_locked: u64,
        value: &BigInt,
        data: Vec<u8>,
        call_type: CallType,
    ) -> Result<(), VmHostError> {
        self.transfer_value_only(blockchain, destination, sender, value, false)?;

        let (dest_account, _) = self.get_output_account(destination);
        dest_account.output_transfers.push(OutputTransfer {
            value: value.clone(),
            gas_limit,
            gas_locked,
            data,
            call_type,
            sender_address: *sender,
        });
        Ok(())
    }

    /// Mark `address` for deletion, sending its balance to `beneficiary`.
    pub fn self_destruct(
        &mut self,
        blockchain: &BlockchainContext,
        address: &Address,
        beneficiary: &Address,
    ) {
        let balance = blockchain.get_balance(self, address);
        if balance.sign() == Sign::Plus {
            let (account, _) = self.get_output_account(address);
            account.balance_delta -= &balance;
            let (dest, _) = self.get_output_account(beneficiary);
            dest.balance_delta += &balance;
        }
        let state = self.state.active_mut();
        if !state.deleted_accounts.contains(address) {
            state.deleted_accounts.push(*address);
        }
        if !state.touched_accounts.contains(beneficiary) {
            state.touched_accounts.push(*beneficiary);
        }
    }

    pub fn refund(&self) -> &BigInt {
        &self.state.active().gas_refund
    }

    pub fn add_refund(&mut self, gas: u64) {
        self.state.active_mut().gas_refund += gas;
    }

    pub fn return_code(&self) -> ReturnCode {
        self.state.active().return_code
    }

    pub fn set_return_code(&mut self, code: ReturnCode) {
        self.state.active_mut().return_code = code;
    }

    pub fn return_message(&self) -> &str {
        &self.state.active().return_message
    }

    pub fn set_return_message(&mut self, message: impl Into<String>) {
        self.state.active_mut().return_message = message.into();
    }

    pub fn return_data(&self) -> &[Vec<u8>] {
        &self.state.active().return_data
    }

    pub fn clear_return_data(&mut self) {
        self.state.active_mut().return_data.clear();
    }

    pub fn finish(&mut self, data: Vec<u8>) {
        self.state.active_mut().return_data.push(data);
    }

    pub fn prepend_finish(&mut self, data: Vec<u8>) {
        self.state.active_mut().return_data.insert(0, data);
    }

    pub fn add_tx_value_to_account(&mut self, address: &Address, value: &BigInt) {
        let (account, _) = self.get_output_account(address);
        account.balance_delta += value;
    }

    pub fn deploy_code(&mut self, input: &CodeDeployInput) {
        let (account, _) = self.get_output_account(&input.contract_address);
        account.code = input.contract_code.clone();
        account.code_metadata = input.contract_code_metadata.clone();
        account.code_deployer_address = Some(input.code_deployer_address);
    }

    /// Append the transfers and logs produced outside the interpreter (by a
    /// built-in function) to the active output.
    pub fn add_to_active_state(&mut self, right: &VMOutput) {
        for right_account in right.output_accounts.values() {
            let (left_account, _) = self.get_output_account(&right_account.address);
            left_account
                .output_transfers
                .extend(right_account.output_transfers.iter().cloned());
        }
        self.state
            .active_mut()
            .logs
            .extend(right.logs.iter().cloned());
    }

    /// Error output carrying no effects. User errors keep the message
    /// the contract signalled.
    pub fn create_vm_output_in_case_of_error(&self, err: &VmHostError) -> VMOutput {
        let active = self.state.active();
        let return_code = match err {
            VmHostError::ReturnCodeNotOk if !active.return_code.is_ok() => active.return_code,
            _ => err.return_code(),
        };
        let keeps_message = matches!(
            err,
            VmHostError::SignalError | VmHostError::ExecutionFailed | VmHostError::ReturnCodeNotOk
        );
        let return_message = if keeps_message && !active.return_message.is_empty() {
            active.return_message.clone()
        } else {
            err.to_string()
        };
        VMOutput::with_error(return_code, return_message)
    }

    /// Callback payload `@hex(code)@hex(data)...` describing the active result.
    pub fn callback_data(&self) -> Vec<u8> {
        let active = self.state.active();
        let mut data = format!("@{}", hex::encode(active.return_code.to_string()));
        for item in &active.return_data {
            data.push('@');
            data.push_str(&hex::encode(item));
        }
        data.into_bytes()
    }
}

/// Merge the output of a finished nested call into its caller's output.
pub fn merge_vm_outputs(left: &mut VMOutput, right: VMOutput) {
    for (address, right_account) in right.output_accounts {
        let left_account = left
            .output_accounts
            .entry(address)
            .or_insert_with(|| OutputAccount::new(address));
        merge_output_accounts(left_account, right_account);
    }
    for address in right.deleted_accounts {
        if !left.deleted_accounts.contains(&address) {
            left.deleted_accounts.push(address);
        }
    }
    for address in right.touched_accounts {
        if !left.touched_accounts.contains(&address) {
            left.touched_accounts.push(address);
        }
    }
    left.logs.extend(right.logs);
    left.return_data.extend(right.return_data);
    left.gas_remaining = right.gas_remaining;
    left.gas_refund = right.gas_refund;
    left.return_code = right.return_code;
    left.return_message = right.return_message;
}

fn merge_output_accounts(left: &mut OutputAccount, right: OutputAccount) {
    left.storage_updates.extend(right.storage_updates);
    if right.balance.is_some() {
        left.balance = right.balance;
    }
    left.balance_delta = right.balance_delta;
    if !right.code.is_empty() {
        left.code = right.code;
    }
    if !right.code_metadata.is_empty() {
        left.code_metadata = right.code_metadata;
    }
    if right.nonce > left.nonce {
        left.nonce = right.nonce;
    }
    let known = left.output_transfers.len();
    if right.output_transfers.len() > known {
        left.output_transfers
            .extend(right.output_transfers.into_iter().skip(known));
    }
    left.gas_used = right.gas_used;
    if right.code_deployer_address.is_some() {
        left.code_deployer_address = right.code_deployer_address;
    }
}
