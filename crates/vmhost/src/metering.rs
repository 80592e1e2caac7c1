//! Gas accounting for the running call tree.
//!
//! The instance's points counter is the single source of truth for gas
//! consumed by the active frame. The metering state records what the frame
//! was given and what it paid up front, plus a baseline of the output
//! accounts taken when the frame started, so that `get_vm_output` can
//! attribute gas to the right contract.

use crate::error::VmHostError;
use crate::gas_schedule::GasSchedule;
use crate::output::OutputContext;
use crate::runtime::RuntimeContext;
use crate::state_stack::StateStack;
use std::collections::BTreeMap;
use tracing::{trace, warn};
use vmhost_types::{Address, CallType, ContractCallInput, VMInput, VMOutput};

#[derive(Debug, Clone, Default)]
struct MeteringState {
    initial_gas_provided: u64,
    initial_cost: u64,
    gas_for_execution: u64,
    gas_used_at_start: BTreeMap<Address, u64>,
    transfers_gas_at_start: u64,
}

/// Gas metering context.
#[derive(Debug, Clone)]
pub struct MeteringContext {
    state: StateStack<MeteringState>,
    gas_schedule: GasSchedule,
    block_gas_limit: u64,
}

impl MeteringContext {
    pub fn new(gas_schedule: GasSchedule, block_gas_limit: u64) -> Self {
        Self {
            state: StateStack::new(MeteringState::default()),
            gas_schedule,
            block_gas_limit,
        }
    }

    pub fn gas_schedule(&self) -> &GasSchedule {
        &self.gas_schedule
    }

    pub fn set_gas_schedule(&mut self, gas_schedule: GasSchedule) {
        self.gas_schedule = gas_schedule;
    }

    pub fn block_gas_limit(&self) -> u64 {
        self.block_gas_limit
    }

    pub fn init_state(&mut self) {
        self.state = StateStack::new(MeteringState::default());
    }

    /// Start a frame for `input`, taking the gas baseline from `output`.
    pub fn init_state_from_input(&mut self, input: &VMInput, output: &VMOutput) {
        let state = self.state.active_mut();
        state.initial_gas_provided = input.gas_provided;
        state.gas_for_execution = input.gas_provided;
        state.initial_cost = 0;
        state.gas_used_at_start = output
            .output_accounts
            .iter()
            .map(|(address, account)| (*address, account.gas_used))
            .collect();
        state.transfers_gas_at_start = output
            .output_accounts
            .values()
            .map(|account| account.transfers_gas())
            .sum();
    }

    /// A callback may spend the gas its async call locked for it.
    pub fn unlock_gas_if_async_callback(input: &mut VMInput) {
        if input.call_type != CallType::AsynchronousCallBack {
            return;
        }
        input.gas_provided = input.gas_provided.saturating_add(input.gas_locked);
        input.gas_locked = 0;
    }

    pub fn push_state(&mut self) {
        self.state.push();
    }

    pub fn pop_set_active_state(&mut self) {
        self.state.pop_set_active();
    }

    /// Gas of a finished child is settled through `restore_gas`, so merging
    /// only restores the parent frame.
    pub fn pop_merge_active_state(&mut self) {
        self.state.pop_set_active();
    }

    pub fn pop_discard(&mut self) {
        self.state.pop_discard();
    }

    pub fn clear_state_stack(&mut self) {
        self.state.clear();
    }

    pub fn depth(&self) -> usize {
        self.state.depth()
    }

    /// Charge the code-size dependent cost of running already deployed code.
    pub fn deduct_initial_gas_for_execution(&mut self, code: &[u8]) -> Result<(), VmHostError> {
        let cost = &self.gas_schedule;
        let base = cost.base_ops_api_cost.get_code;
        let per_byte = cost.base_operation_cost.aot_prepare_per_byte;
        self.deduct_initial_gas(code, base, per_byte)
    }

    pub fn deduct_initial_gas_for_direct_deployment(
        &mut self,
        code: &[u8],
    ) -> Result<(), VmHostError> {
        let cost = &self.gas_schedule;
        let base = cost.base_ops_api_cost.create_contract;
        let per_byte = cost.base_operation_cost.compile_per_byte;
        self.deduct_initial_gas(code, base, per_byte)
    }

    /// Deployment from a running contract pays compilation out of the
    /// deployer's own gas.
    pub fn deduct_initial_gas_for_indirect_deployment(
        &self,
        runtime: &RuntimeContext,
        code: &[u8],
    ) -> Result<(), VmHostError> {
        let per_byte = self.gas_schedule.base_operation_cost.compile_per_byte;
        self.use_gas_bounded(runtime, per_byte.saturating_mul(code.len() as u64))
    }

    fn deduct_initial_gas(
        &mut self,
        code: &[u8],
        base_cost: u64,
        cost_per_byte: u64,
    ) -> Result<(), VmHostError> {
        let code_cost = cost_per_byte.saturating_mul(code.len() as u64);
        let initial_cost = base_cost.saturating_add(code_cost);
        let state = self.state.active_mut();
        if initial_cost > state.initial_gas_provided {
            trace!(initial_cost, provided = state.initial_gas_provided, "initial gas too high");
            return Err(VmHostError::NotEnoughGas);
        }
        state.initial_cost = initial_cost;
        state.gas_for_execution = state.initial_gas_provided - initial_cost;
        Ok(())
    }

    pub fn use_gas(&self, runtime: &RuntimeContext, gas: u64) {
        let points = runtime.points_used().saturating_add(gas);
        runtime.set_points_used(points);
    }

    /// Give back gas a child did not spend. Ignored if more than was used.
    pub fn restore_gas(&self, runtime: &RuntimeContext, gas: u64) {
        let points = runtime.points_used();
        if gas <= points {
            runtime.set_points_used(points - gas);
        }
    }

    pub fn free_gas(&self, output: &mut OutputContext, gas: u64) {
        output.add_refund(gas);
    }

    pub fn gas_left(&self, runtime: &RuntimeContext) -> u64 {
        self.state
            .active()
            .gas_for_execution
            .saturating_sub(runtime.points_used())
    }

    /// Charge `gas`, refusing to take the last unit.
    pub fn use_gas_bounded(&self, runtime: &RuntimeContext, gas: u64) -> Result<(), VmHostError> {
        if self.gas_left(runtime) <= gas {
            return Err(VmHostError::NotEnoughGas);
        }
        self.use_gas(runtime, gas);
        Ok(())
    }

    pub fn use_gas_for_async_step(&self, runtime: &RuntimeContext) -> Result<(), VmHostError> {
        let step = self.gas_schedule.base_ops_api_cost.async_call_step;
        self.use_gas_bounded(runtime, step)
    }

    /// Clamp a gas limit requested by a contract to what is left.
    pub fn bound_gas_limit(&self, runtime: &RuntimeContext, value: i64) -> u64 {
        if value < 0 {
            return 0;
        }
        (value as u64).min(self.gas_left(runtime))
    }

    pub fn gas_spent_by_contract(&self, runtime: &RuntimeContext) -> u64 {
        self.state
            .active()
            .initial_cost
            .saturating_add(runtime.points_used())
    }

    pub fn gas_used_for_execution(&self, runtime: &RuntimeContext) -> u64 {
        self.gas_for_execution()
            .saturating_sub(self.gas_left(runtime))
    }

    pub fn gas_for_execution(&self) -> u64 {
        self.state.active().gas_for_execution
    }

    pub fn gas_provided(&self) -> u64 {
        self.state.active().initial_gas_provided
    }

    pub fn gas_locked(&self, runtime: &RuntimeContext) -> u64 {
        runtime.vm_input().gas_locked
    }

    pub fn compute_gas_locked_for_async(&self, runtime: &RuntimeContext) -> u64 {
        let cost = &self.gas_schedule;
        cost.base_operation_cost
            .aot_prepare_per_byte
            .saturating_mul(runtime.code_size())
            .saturating_add(cost.base_ops_api_cost.async_callback_gas_lock)
    }

    /// Charge the caller for what a built-in function consumed, excluding
    /// the gas forwarded to the contract executed after it.
    pub fn track_gas_used_by_builtin_function(
        &self,
        runtime: &RuntimeContext,
        input: &ContractCallInput,
        output: &VMOutput,
        post_input: Option<&ContractCallInput>,
    ) {
        let mut gas_used = input
            .vm_input
            .gas_provided
            .saturating_sub(output.gas_remaining);
        if let Some(post) = post_input {
            gas_used = gas_used
                .saturating_sub(post.vm_input.gas_provided)
                .saturating_sub(post.vm_input.gas_locked);
        }
        self.use_gas(runtime, gas_used);
    }

    /// Fill gas remaining and the active contract's gas used, keeping
    /// `provided == Σ gas_used + remaining + Σ forwarded`.
    pub fn update_gas_state_on_success(
        &self,
        runtime: &RuntimeContext,
        output: &mut VMOutput,
        check_mismatch: bool,
    ) -> Result<(), VmHostError> {
        let state = self.state.active();
        let sc_address = runtime.sc_address();
        let gas_remaining = self.gas_left(runtime);
        output.gas_remaining = gas_remaining;

        let frame_used = state.initial_gas_provided.saturating_sub(gas_remaining);
        let mut others_used = 0u64;
        let mut transfers_gas = 0u64;
        for (address, account) in &output.output_accounts {
            transfers_gas = transfers_gas.saturating_add(account.transfers_gas());
            if *address == sc_address {
                continue;
            }
            let start = state.gas_used_at_start.get(address).copied().unwrap_or(0);
            others_used = others_used.saturating_add(account.gas_used.saturating_sub(start));
        }
        others_used =
            others_used.saturating_add(transfers_gas.saturating_sub(state.transfers_gas_at_start));

        if frame_used < others_used {
            warn!(
                sc = %sc_address,
                frame_used,
                others_used,
                "gas used by nested calls exceeds gas used by frame"
            );
            if check_mismatch {
                return Err(VmHostError::InputOutputGasMismatch);
            }
        }

        let start = state.gas_used_at_start.get(&sc_address).copied().unwrap_or(0);
        let account = output
            .output_accounts
            .entry(sc_address)
            .or_insert_with(|| vmhost_types::OutputAccount::new(sc_address));
        account.gas_used = start.saturating_add(frame_used.saturating_sub(others_used));
        trace!(sc = %sc_address, gas_used = account.gas_used, gas_remaining, "gas state");
        Ok(())
    }

    /// A failed frame forfeits everything it was given.
    pub fn update_gas_state_on_failure(&self, output: &mut VMOutput) {
        output.gas_remaining = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockInstanceBuilder;
    use crate::HostConfig;
    use vmhost_types::OutputAccount;

    fn runtime_with_instance(gas_limit: u64) -> RuntimeContext {
        let mut runtime = RuntimeContext::new(
            Box::new(MockInstanceBuilder::new()),
            HostConfig::default(),
        );
        runtime.set_instance_for_test(gas_limit);
        runtime
    }

    fn metering(provided: u64) -> MeteringContext {
        let mut metering = MeteringContext::new(GasSchedule::uniform(1), 1_000_000);
        metering.init_state_from_input(&VMInput::new(Address::ZERO, provided), &VMOutput::default());
        metering
    }

    #[test]
    fn test_deduct_initial_gas() {
        let mut m = metering(100);
        m.deduct_initial_gas_for_execution(&[0u8; 10]).unwrap();
        assert_eq!(m.gas_for_execution(), 89);

        let mut starved = metering(5);
        assert_eq!(
            starved.deduct_initial_gas_for_direct_deployment(&[0u8; 10]),
            Err(VmHostError::NotEnoughGas)
        );
    }

    #[test]
    fn test_use_and_restore_gas() {
        let runtime = runtime_with_instance(100);
        let metering = metering(100);
        metering.use_gas(&runtime, 30);
        assert_eq!(metering.gas_left(&runtime), 70);
        metering.restore_gas(&runtime, 50);
        assert_eq!(metering.gas_left(&runtime), 70);
        metering.restore_gas(&runtime, 10);
        assert_eq!(metering.gas_left(&runtime), 80);
        assert_eq!(metering.gas_spent_by_contract(&runtime), 20);
    }

    #[test]
    fn test_use_gas_bounded_keeps_last_unit() {
        let runtime = runtime_with_instance(10);
        let metering = metering(10);
        assert_eq!(
            metering.use_gas_bounded(&runtime, 10),
            Err(VmHostError::NotEnoughGas)
        );
        metering.use_gas_bounded(&runtime, 9).unwrap();
        assert_eq!(metering.gas_left(&runtime), 1);
    }

    #[test]
    fn test_bound_gas_limit() {
        let runtime = runtime_with_instance(50);
        let metering = metering(50);
        assert_eq!(metering.bound_gas_limit(&runtime, -5), 0);
        assert_eq!(metering.bound_gas_limit(&runtime, 20), 20);
        assert_eq!(metering.bound_gas_limit(&runtime, 500), 50);
    }

    #[test]
    fn test_unlock_gas_for_callback() {
        let mut input = VMInput::new(Address::ZERO, 10).with_call_type(CallType::AsynchronousCallBack);
        input.gas_locked = 5;
        MeteringContext::unlock_gas_if_async_callback(&mut input);
        assert_eq!((input.gas_provided, input.gas_locked), (15, 0));

        let mut input = VMInput::new(Address::ZERO, 10);
        input.gas_locked = 5;
        MeteringContext::unlock_gas_if_async_callback(&mut input);
        assert_eq!((input.gas_provided, input.gas_locked), (10, 5));
    }

    #[test]
    fn test_gas_state_attributes_forwarded_gas() {
        let runtime = runtime_with_instance(1_000);
        let metering = metering(1_000);
        metering.use_gas(&runtime, 400);

        let mut output = VMOutput::default();
        let mut other = OutputAccount::new(Address::from_name("other"));
        other.gas_used = 100;
        other.output_transfers.push(vmhost_types::OutputTransfer {
            gas_limit: 50,
            gas_locked: 25,
            ..Default::default()
        });
        output.output_accounts.insert(other.address, other);

        metering
            .update_gas_state_on_success(&runtime, &mut output, true)
            .unwrap();
        let own = &output.output_accounts[&runtime.sc_address()];
        assert_eq!(output.gas_remaining, 600);
        assert_eq!(own.gas_used, 225);
        assert_eq!(output.total_gas_accounted(), 1_000);
    }

    #[test]
    fn test_gas_mismatch_detected() {
        let runtime = runtime_with_instance(1_000);
        let metering = metering(1_000);
        let mut output = VMOutput::default();
        let mut other = OutputAccount::new(Address::from_name("other"));
        other.gas_used = 10;
        output.output_accounts.insert(other.address, other);
        assert_eq!(
            metering.update_gas_state_on_success(&runtime, &mut output, true),
            Err(VmHostError::InputOutputGasMismatch)
        );
        assert!(metering
            .update_gas_state_on_success(&runtime, &mut output, false)
            .is_ok());
    }
}
