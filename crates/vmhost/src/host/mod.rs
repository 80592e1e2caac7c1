//! The execution host.
//!
//! `VmHost` owns one of each context and implements the call protocols on
//! top of them: top-level deployment and calls, nested calls on the
//! destination or on the same context, protocol built-in functions and
//! the asynchronous call machinery. Host API functions in `vmhooks` reach
//! the contexts through the same struct.

mod async_exec;
mod breakpoints;
mod execution;

use crate::bigint::BigIntContext;
use crate::blockchain::{BlockInfo, BlockchainContext, BlockchainHook};
use crate::config::HostConfig;
use crate::error::VmHostError;
use crate::gas_schedule::GasSchedule;
use crate::instance::{Instance, InstanceBuilder, InstanceOptions};
use crate::metering::MeteringContext;
use crate::output::OutputContext;
use crate::runtime::RuntimeContext;
use crate::storage::StorageContext;
use crate::validator::WasmValidator;
use crate::vmhooks::API_NAMES;
use crate::UPGRADE_FUNCTION_NAME;
use std::rc::Rc;
use tracing::{debug, trace, warn};
use vmhost_types::{Address, ContractCallInput, ContractCreateInput, Hash, UserAccount, VMOutput};

/// Execution host for one sequence of top-level calls.
pub struct VmHost {
    pub(crate) config: HostConfig,
    pub(crate) blockchain: BlockchainContext,
    pub(crate) runtime: RuntimeContext,
    pub(crate) metering: MeteringContext,
    pub(crate) output: OutputContext,
    pub(crate) storage: StorageContext,
    pub(crate) bigint: BigIntContext,
}

impl VmHost {
    /// Build a host over a world provider and an interpreter adapter.
    pub fn new(
        config: HostConfig,
        gas_schedule: GasSchedule,
        blockchain_hook: Box<dyn BlockchainHook>,
        instance_builder: Box<dyn InstanceBuilder>,
    ) -> Result<Self, VmHostError> {
        config.validate()?;

        let builtin_names = blockchain_hook.builtin_function_names();
        let mut runtime = RuntimeContext::new(instance_builder, config.clone());
        runtime.set_validator(WasmValidator::new(API_NAMES, builtin_names));

        debug!(
            max_instances = config.max_instances,
            warm_instance = config.warm_instance,
            "vm host created"
        );
        Ok(Self {
            blockchain: BlockchainContext::new(blockchain_hook),
            runtime,
            metering: MeteringContext::new(gas_schedule, config.block_gas_limit),
            output: OutputContext::new(),
            storage: StorageContext::new(&config.protected_key_prefix),
            bigint: BigIntContext::new(),
            config,
        })
    }

    /// Host with this host's configuration and no world behind it. It
    /// holds the place of a host handed over to a running instance.
    pub(crate) fn vacant(&self) -> VmHost {
        Self {
            blockchain: BlockchainContext::new(Box::new(Vacant)),
            runtime: RuntimeContext::new(Box::new(Vacant), self.config.clone()),
            metering: MeteringContext::new(GasSchedule::default(), 0),
            output: OutputContext::new(),
            storage: StorageContext::new(""),
            bigint: BigIntContext::new(),
            config: self.config.clone(),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn runtime(&self) -> &RuntimeContext {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut RuntimeContext {
        &mut self.runtime
    }

    pub fn metering(&self) -> &MeteringContext {
        &self.metering
    }

    pub fn output(&self) -> &OutputContext {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut OutputContext {
        &mut self.output
    }

    pub fn storage(&self) -> &StorageContext {
        &self.storage
    }

    pub fn blockchain(&self) -> &BlockchainContext {
        &self.blockchain
    }

    pub fn blockchain_mut(&mut self) -> &mut BlockchainContext {
        &mut self.blockchain
    }

    pub fn bigint(&self) -> &BigIntContext {
        &self.bigint
    }

    pub fn gas_schedule(&self) -> &GasSchedule {
        self.metering.gas_schedule()
    }

    /// Replace the gas schedule used by the following calls.
    pub fn gas_schedule_change(&mut self, gas_schedule: GasSchedule) {
        debug!("gas schedule changed");
        self.metering.set_gas_schedule(gas_schedule);
    }

    /// Deploy a contract from a transaction.
    pub fn run_smart_contract_create(&mut self, input: &ContractCreateInput) -> VMOutput {
        debug!(
            caller = %input.vm_input.caller_addr,
            code_len = input.contract_code.len(),
            gas_provided = input.vm_input.gas_provided,
            "run smart contract create"
        );
        self.init_state();
        self.blockchain.push_state();
        let vm_output = self.do_run_smart_contract_create(input);
        self.settle_world(&vm_output);
        self.log_runtime_errors("run_smart_contract_create");
        self.clean();
        vm_output
    }

    /// Call a deployed contract from a transaction. Calls to
    /// `upgradeContract` replace the contract's code instead.
    pub fn run_smart_contract_call(&mut self, input: &ContractCallInput) -> VMOutput {
        debug!(
            caller = %input.vm_input.caller_addr,
            contract = %input.recipient_addr,
            function = %input.function,
            call_type = %input.vm_input.call_type,
            gas_provided = input.vm_input.gas_provided,
            "run smart contract call"
        );
        self.init_state();
        self.blockchain.push_state();
        let vm_output = if input.function == UPGRADE_FUNCTION_NAME {
            self.do_run_smart_contract_upgrade(input)
        } else {
            self.do_run_smart_contract_call(input)
        };
        self.settle_world(&vm_output);
        self.log_runtime_errors(&input.function);
        self.clean();
        vm_output
    }

    /// Reset every context before a top-level call.
    pub fn init_state(&mut self) {
        self.bigint.init_state();
        self.output.init_state();
        self.runtime.init_state();
        self.storage.init_state();
        self.blockchain.init_state();
        self.metering.init_state();
    }

    /// World changes made by built-in functions survive only a successful
    /// top-level call.
    fn settle_world(&mut self, vm_output: &VMOutput) {
        if vm_output.return_code.is_ok() {
            self.blockchain.pop_discard();
        } else {
            self.blockchain.pop_set_active_state();
        }
    }

    /// Release the running instance and whatever the stacks still hold.
    fn clean(&mut self) {
        self.runtime.clean_instance();
        self.bigint.clear_state_stack();
        self.output.clear_state_stack();
        self.runtime.clear_state_stack();
        self.storage.clear_state_stack();
        self.blockchain.clear_state_stack();
        self.metering.clear_state_stack();
    }

    fn log_runtime_errors(&self, function: &str) {
        let errors = self.runtime.errors();
        if errors.is_empty() {
            return;
        }
        trace!(function, errors = ?errors, "full error list");
    }

    /// Output of the active frame with gas settled. A gas accounting
    /// mismatch turns it into an error output.
    pub fn get_vm_output(&mut self) -> VMOutput {
        let check_mismatch = self.config.vmv2_enabled;
        let result = self.metering.update_gas_state_on_success(
            &self.runtime,
            self.output.state_mut(),
            check_mismatch,
        );
        match result {
            Ok(()) => self.output.state().clone(),
            Err(err) => {
                warn!(error = %err, sc = %self.runtime.sc_address(), "vm output gas check failed");
                self.output.create_vm_output_in_case_of_error(&err)
            }
        }
    }

    pub fn are_in_same_shard(&self, left: &Address, right: &Address) -> bool {
        self.blockchain.get_shard_of_address(left) == self.blockchain.get_shard_of_address(right)
    }

    /// Whether `name` is an active protocol built-in function.
    pub fn is_builtin_function_name(&self, name: &str) -> bool {
        self.config.features.builtin_functions && self.blockchain.hook().is_builtin_function(name)
    }

    /// Whether a call to `destination` can run in this host right now.
    pub(crate) fn can_execute_synchronously(&self, destination: &Address) -> bool {
        let sc_address = self.runtime.sc_address();
        self.are_in_same_shard(&sc_address, destination) && self.has_code(destination)
    }

    fn has_code(&self, address: &Address) -> bool {
        let deployed_here = self
            .output
            .output_account(address)
            .is_some_and(|account| !account.code.is_empty());
        deployed_here || self.blockchain.get_code(address).is_ok()
    }
}

/// Empty world and instance factory of a vacant host.
struct Vacant;

impl BlockchainHook for Vacant {
    fn new_address(&self, _: &Address, _: u64, _: &[u8]) -> Result<Address, VmHostError> {
        Err(VmHostError::InvalidAccount)
    }

    fn get_user_account(&self, _: &Address) -> Option<UserAccount> {
        None
    }

    fn get_storage_data(&self, _: &Address, _: &[u8]) -> Vec<u8> {
        Vec::new()
    }

    fn get_code(&self, _: &Address) -> Option<Vec<u8>> {
        None
    }

    fn get_compiled_code(&self, _: &Hash) -> Option<Vec<u8>> {
        None
    }

    fn save_compiled_code(&mut self, _: &Hash, _: &[u8]) {}

    fn is_builtin_function(&self, _: &str) -> bool {
        false
    }

    fn builtin_function_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn process_builtin_function(&mut self, _: &ContractCallInput) -> Result<VMOutput, VmHostError> {
        Err(VmHostError::InvalidAccount)
    }

    fn shard_of_address(&self, _: &Address) -> u32 {
        0
    }

    fn is_smart_contract(&self, _: &Address) -> bool {
        false
    }

    fn get_snapshot(&self) -> usize {
        0
    }

    fn revert_to_snapshot(&mut self, _: usize) {}

    fn block_info(&self) -> BlockInfo {
        BlockInfo::default()
    }
}

impl InstanceBuilder for Vacant {
    fn new_instance(&self, _: &[u8], _: &InstanceOptions) -> Result<Rc<dyn Instance>, VmHostError> {
        Err(VmHostError::ContractNotFound)
    }

    fn new_instance_from_compiled(
        &self,
        _: &[u8],
        _: &InstanceOptions,
    ) -> Result<Rc<dyn Instance>, VmHostError> {
        Err(VmHostError::ContractNotFound)
    }
}
