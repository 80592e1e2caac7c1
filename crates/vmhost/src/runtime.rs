//! Runtime context: the running instance and the logical call frame.

use crate::async_call::{AsyncCallInfo, AsyncContext, AsyncContextInfo, AsyncGeneratedCall};
use crate::blockchain::BlockchainContext;
use crate::config::HostConfig;
use crate::error::VmHostError;
use crate::instance::{self, BreakpointValue, Instance, InstanceBuilder, InstanceOptions};
use crate::metering::MeteringContext;
use crate::output::OutputContext;
use crate::state_stack::StateStack;
use crate::validator::WasmValidator;
use crate::{CALLBACK_FUNCTION_NAME, INIT_FUNCTION_NAME};
use std::rc::Rc;
use tracing::{error, trace};
use vmhost_types::{Address, ContractCallInput, Hash, ReturnCode, VMInput};

#[derive(Debug, Clone, Default)]
struct RuntimeState {
    vm_input: VMInput,
    sc_address: Address,
    function: String,
    read_only: bool,
    code_size: u64,
    async_call_info: Option<AsyncCallInfo>,
    async_context_info: AsyncContextInfo,
}

/// An error recorded during a run, with the function it happened in.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub function: String,
    pub error: VmHostError,
}

/// Owns the active instance, the instance stack and the warm instance.
pub struct RuntimeContext {
    state: StateStack<RuntimeState>,
    instance: Option<Rc<dyn Instance>>,
    instance_stack: Vec<Option<Rc<dyn Instance>>>,
    warm_instance: Option<(Address, Rc<dyn Instance>)>,
    instance_builder: Box<dyn InstanceBuilder>,
    validator: WasmValidator,
    config: HostConfig,
    verify_next_code: bool,
    errors: Vec<RuntimeError>,
}

impl RuntimeContext {
    pub fn new(instance_builder: Box<dyn InstanceBuilder>, config: HostConfig) -> Self {
        Self {
            state: StateStack::new(RuntimeState::default()),
            instance: None,
            instance_stack: Vec::new(),
            warm_instance: None,
            instance_builder,
            validator: WasmValidator::default(),
            config,
            verify_next_code: false,
            errors: Vec::new(),
        }
    }

    pub(crate) fn set_validator(&mut self, validator: WasmValidator) {
        self.validator = validator;
    }

    pub fn replace_instance_builder(&mut self, instance_builder: Box<dyn InstanceBuilder>) {
        self.instance_builder = instance_builder;
    }

    pub fn init_state(&mut self) {
        self.state.set_active(RuntimeState::default());
        self.verify_next_code = false;
        self.errors.clear();
        trace!("runtime init state");
    }

    /// Capture the input of a call and reset the async batch.
    pub fn init_state_from_call_input(&mut self, input: &ContractCallInput) {
        let state = self.state.active_mut();
        state.vm_input = input.vm_input.clone();
        state.sc_address = input.recipient_addr;
        state.function = input.function.clone();
        state.async_call_info = None;
        state.async_context_info = AsyncContextInfo::new(input.vm_input.caller_addr);
        trace!(
            caller = %input.vm_input.caller_addr,
            contract = %input.recipient_addr,
            function = %input.function,
            "init state from call input"
        );
    }

    /// Capture a bare input (deployments).
    pub fn init_state_from_input(&mut self, input: &VMInput) {
        let state = self.state.active_mut();
        state.vm_input = input.clone();
        state.async_call_info = None;
        state.async_context_info = AsyncContextInfo::new(input.caller_addr);
    }

    pub fn vm_input(&self) -> &VMInput {
        &self.state.active().vm_input
    }

    pub fn vm_input_mut(&mut self) -> &mut VMInput {
        &mut self.state.active_mut().vm_input
    }

    pub fn set_vm_input(&mut self, input: VMInput) {
        self.state.active_mut().vm_input = input;
    }

    pub fn vm_type(&self) -> &[u8] {
        &self.config.vm_type
    }

    pub fn sc_address(&self) -> Address {
        self.state.active().sc_address
    }

    pub fn set_sc_address(&mut self, address: Address) {
        self.state.active_mut().sc_address = address;
    }

    pub fn function(&self) -> &str {
        &self.state.active().function
    }

    pub fn set_custom_call_function(&mut self, function: &str) {
        trace!(function, "set custom call function");
        self.state.active_mut().function = function.to_string();
    }

    pub fn arguments(&self) -> &[Vec<u8>] {
        &self.state.active().vm_input.arguments
    }

    pub fn current_tx_hash(&self) -> &[u8] {
        &self.state.active().vm_input.current_tx_hash
    }

    pub fn original_tx_hash(&self) -> &[u8] {
        &self.state.active().vm_input.original_tx_hash
    }

    pub fn read_only(&self) -> bool {
        self.state.active().read_only
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.state.active_mut().read_only = read_only;
    }

    pub fn code_size(&self) -> u64 {
        self.state.active().code_size
    }

    /// Save the frame together with the running instance.
    pub fn push_state(&mut self) {
        self.state.push();
        self.instance_stack.push(self.instance.clone());
    }

    pub fn pop_set_active_state(&mut self) {
        if self.state.depth() == 0 {
            return;
        }
        self.state.pop_set_active();
        self.pop_instance();
    }

    pub fn pop_discard(&mut self) {
        if self.state.depth() == 0 {
            return;
        }
        self.state.pop_discard();
        self.pop_instance();
    }

    pub fn clear_state_stack(&mut self) {
        self.state.clear();
    }

    pub fn depth(&self) -> usize {
        self.state.depth()
    }

    fn pop_instance(&mut self) {
        let Some(previous) = self.instance_stack.pop() else {
            return;
        };
        if same_instance(&previous, &self.instance) {
            // Execution resumes on the instance that was running before the push.
            return;
        }
        self.clean_instance();
        self.instance = previous;
    }

    pub fn running_instances_count(&self) -> usize {
        self.instance_stack.len()
    }

    pub fn instance(&self) -> Option<Rc<dyn Instance>> {
        self.instance.clone()
    }

    pub fn set_instance(&mut self, instance: Rc<dyn Instance>) {
        self.instance = Some(instance);
    }

    #[cfg(test)]
    pub(crate) fn set_instance_for_test(&mut self, gas_limit: u64) {
        let options = InstanceOptions::with_gas_limit(gas_limit);
        let instance = crate::mock::MockInstance::new(crate::mock::MockContract::new(), &options);
        self.instance = Some(Rc::new(instance));
    }

    /// Load the active contract's code, remembering its size. Code deployed
    /// earlier in the same transaction is found in the output.
    pub fn get_sc_code(
        &mut self,
        blockchain: &BlockchainContext,
        output: &OutputContext,
    ) -> Result<Vec<u8>, VmHostError> {
        let address = self.sc_address();
        let code = match output.output_account(&address) {
            Some(account) if !account.code.is_empty() => account.code.clone(),
            _ => blockchain.get_code(&address)?,
        };
        self.state.active_mut().code_size = code.len() as u64;
        Ok(code)
    }

    /// Validate the code of the next started instance even if it is
    /// already deployed.
    pub fn must_verify_next_contract_code(&mut self) {
        self.verify_next_code = true;
    }

    pub fn set_code_size(&mut self, code_size: u64) {
        self.state.active_mut().code_size = code_size;
    }

    /// Make an instance for the active contract available.
    pub fn start_instance(
        &mut self,
        blockchain: &mut BlockchainContext,
        code: &[u8],
        gas_limit: u64,
        new_code: bool,
    ) -> Result<(), VmHostError> {
        let new_code = new_code || std::mem::take(&mut self.verify_next_code);
        if self.running_instances_count() >= self.config.max_instances {
            self.instance = None;
            error!(max = self.config.max_instances, "create instance: max instances reached");
            return Err(VmHostError::MaxInstancesReached);
        }

        if !new_code && self.set_warm_instance_when_needed(gas_limit) {
            return Ok(());
        }

        let code_hash = blockchain.get_code_hash(&self.sc_address());
        if self.make_instance_from_compiled_code(blockchain, code_hash, gas_limit, new_code) {
            return Ok(());
        }

        self.make_instance_from_contract_byte_code(blockchain, code, code_hash, gas_limit, new_code)
    }

    fn set_warm_instance_when_needed(&mut self, gas_limit: u64) -> bool {
        if !self.config.warm_instance {
            return false;
        }
        let sc_address = self.sc_address();
        let Some((warm_address, warm)) = &self.warm_instance else {
            return false;
        };
        if *warm_address != sc_address {
            return false;
        }
        // Suspended callers sit on the instance stack; the warm instance
        // cannot be reentered while one of them is using it.
        let running = self
            .instance_stack
            .iter()
            .flatten()
            .any(|instance| Rc::ptr_eq(instance, warm));
        if running {
            return false;
        }

        trace!(address = %sc_address, "reusing warm instance");
        let warm = warm.clone();
        warm.set_points_used(0);
        warm.set_gas_limit(gas_limit);
        warm.set_breakpoint_value(BreakpointValue::None);
        self.instance = Some(warm);
        true
    }

    fn instance_options(gas_limit: u64) -> InstanceOptions {
        InstanceOptions::with_gas_limit(gas_limit)
    }

    fn make_instance_from_compiled_code(
        &mut self,
        blockchain: &BlockchainContext,
        code_hash: Option<Hash>,
        gas_limit: u64,
        new_code: bool,
    ) -> bool {
        if !self.config.aot_compile || new_code {
            return false;
        }
        let Some(code_hash) = code_hash else {
            return false;
        };
        let Some(compiled) = blockchain.get_compiled_code(&code_hash) else {
            trace!("instance creation: compiled code was not found");
            return false;
        };

        match self
            .instance_builder
            .new_instance_from_compiled(&compiled, &Self::instance_options(gas_limit))
        {
            Ok(instance) => {
                self.instance = Some(instance);
                trace!("new instance created from cached compilation");
                true
            }
            Err(err) => {
                error!(error = %err, "instance creation from cached compilation failed");
                false
            }
        }
    }

    fn make_instance_from_contract_byte_code(
        &mut self,
        blockchain: &mut BlockchainContext,
        code: &[u8],
        code_hash: Option<Hash>,
        gas_limit: u64,
        new_code: bool,
    ) -> Result<(), VmHostError> {
        let instance = match self
            .instance_builder
            .new_instance(code, &Self::instance_options(gas_limit))
        {
            Ok(instance) => instance,
            Err(err) => {
                self.instance = None;
                trace!(error = %err, "instance creation from bytecode failed");
                return Err(err);
            }
        };

        let code_hash = match code_hash {
            Some(hash) if !new_code => hash,
            _ => Hash::of_code(code),
        };
        match instance.cache() {
            Ok(compiled) => blockchain.save_compiled_code(&code_hash, &compiled),
            Err(err) => error!(error = %err, "get compiled code from instance"),
        }

        if new_code {
            if let Err(err) = self
                .validator
                .verify_contract_code(instance.as_ref(), self.config.dcdt_functions_enabled)
            {
                instance.clean();
                self.instance = None;
                trace!(error = %err, "contract code verification failed");
                return Err(err);
            }
        }

        if self.config.warm_instance {
            self.warm_instance = Some((self.sc_address(), instance.clone()));
            trace!("updated warm instance");
        }
        self.instance = Some(instance);
        trace!("new instance created from bytecode");
        Ok(())
    }

    pub fn is_warm_instance(&self) -> bool {
        match (&self.instance, &self.warm_instance) {
            (Some(instance), Some((_, warm))) => Rc::ptr_eq(instance, warm),
            _ => false,
        }
    }

    pub fn reset_warm_instance(&mut self) {
        if let Some((_, warm)) = self.warm_instance.take() {
            warm.clean();
        }
        self.instance = None;
        trace!("warm instance cleaned");
    }

    /// Release the running instance unless it is the warm one.
    pub fn clean_instance(&mut self) {
        if self.instance.is_none() || self.is_warm_instance() {
            return;
        }
        if let Some(instance) = self.instance.take() {
            instance.clean();
        }
        trace!("instance cleaned");
    }

    pub fn points_used(&self) -> u64 {
        self.instance
            .as_ref()
            .map(|instance| instance.points_used())
            .unwrap_or(0)
    }

    pub fn set_points_used(&self, points: u64) {
        match &self.instance {
            Some(instance) => instance.set_points_used(points.min(i64::MAX as u64)),
            None => trace!("set points used without instance"),
        }
    }

    pub fn breakpoint_value(&self) -> BreakpointValue {
        self.instance
            .as_ref()
            .map(|instance| instance.breakpoint_value())
            .unwrap_or_default()
    }

    pub fn set_breakpoint_value(&self, value: BreakpointValue) {
        if let Some(instance) = &self.instance {
            instance.set_breakpoint_value(value);
            trace!(breakpoint = ?value, "runtime breakpoint set");
        }
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.instance
            .as_ref()
            .is_some_and(|instance| instance.has_function(name))
    }

    pub fn has_callback_method(&self) -> bool {
        self.has_function(CALLBACK_FUNCTION_NAME)
    }

    pub fn has_init_function(&self) -> bool {
        self.has_function(INIT_FUNCTION_NAME)
    }

    pub fn is_function_imported(&self, name: &str) -> bool {
        self.instance
            .as_ref()
            .is_some_and(|instance| instance.is_function_imported(name))
    }

    /// Resolve the frame's function against the instance exports.
    pub fn function_to_call(&self) -> Result<String, VmHostError> {
        let function = self.function();
        trace!(function, "get function to call");
        if self.has_function(function) {
            return Ok(function.to_string());
        }
        if function == CALLBACK_FUNCTION_NAME {
            return Err(VmHostError::NilCallbackFunction);
        }
        Err(VmHostError::FuncNotFound)
    }

    /// Record a legacy async call and suspend the contract.
    pub fn execute_async_call(
        &mut self,
        metering: &MeteringContext,
        destination: Address,
        data: Vec<u8>,
        value_bytes: Vec<u8>,
    ) -> Result<(), VmHostError> {
        metering.use_gas_for_async_step(self)?;

        let mut gas_locked = 0;
        if self.has_callback_method() || !self.config.dynamic_gas_locking {
            gas_locked = metering.compute_gas_locked_for_async(self);
            metering.use_gas_bounded(self, gas_locked)?;
        }

        let gas_limit = metering.gas_left(self);
        trace!(
            caller = %self.sc_address(),
            dest = %destination,
            gas_limit,
            gas_locked,
            "prepare async call"
        );
        self.state.active_mut().async_call_info = Some(AsyncCallInfo {
            destination,
            data,
            gas_limit,
            gas_locked,
            value_bytes,
        });
        self.set_breakpoint_value(BreakpointValue::AsyncCall);
        Ok(())
    }

    pub fn async_call_info(&self) -> Option<&AsyncCallInfo> {
        self.state.active().async_call_info.as_ref()
    }

    pub fn set_async_call_info(&mut self, info: Option<AsyncCallInfo>) {
        self.state.active_mut().async_call_info = info;
    }

    pub fn add_async_context_call(&mut self, context_identifier: &[u8], call: AsyncGeneratedCall) {
        self.state
            .active_mut()
            .async_context_info
            .add_call(context_identifier, call);
    }

    pub fn get_async_context(&self, context_identifier: &[u8]) -> Result<&AsyncContext, VmHostError> {
        self.state.active().async_context_info.context(context_identifier)
    }

    pub fn set_async_context_callback(
        &mut self,
        context_identifier: &[u8],
        callback: &str,
    ) -> Result<(), VmHostError> {
        let context = self
            .state
            .active_mut()
            .async_context_info
            .context_mut(context_identifier)?;
        context.callback = callback.to_string();
        Ok(())
    }

    pub fn async_context_info(&self) -> &AsyncContextInfo {
        &self.state.active().async_context_info
    }

    pub fn async_context_info_mut(&mut self) -> &mut AsyncContextInfo {
        &mut self.state.active_mut().async_context_info
    }

    /// Mark the running contract as failed and suspend it.
    pub fn fail_execution(&mut self, output: &mut OutputContext, err: Option<&VmHostError>) {
        let message = err
            .map(ToString::to_string)
            .unwrap_or_else(|| "execution failed".to_string());
        output.set_return_code(ReturnCode::ExecutionFailed);
        output.set_return_message(message.clone());
        self.add_error(err.cloned().unwrap_or(VmHostError::ExecutionFailed));
        self.set_breakpoint_value(BreakpointValue::ExecutionFailed);
        trace!(message, "execution failed");
    }

    /// Mark the running contract as rejected by its own logic.
    pub fn signal_user_error(&mut self, output: &mut OutputContext, message: &str) {
        output.set_return_code(ReturnCode::UserError);
        output.set_return_message(message);
        self.set_breakpoint_value(BreakpointValue::SignalError);
        self.add_error(VmHostError::SignalError);
        trace!(message, "user error signalled");
    }

    /// Split `[code, metadata, args...]`, leaving only `args` in the input.
    pub fn extract_code_upgrade_from_args(&mut self) -> Result<(Vec<u8>, Vec<u8>), VmHostError> {
        let arguments = &mut self.state.active_mut().vm_input.arguments;
        if arguments.len() < 2 {
            return Err(VmHostError::InvalidUpgradeArguments);
        }
        let mut rest = arguments.split_off(2);
        std::mem::swap(arguments, &mut rest);
        let mut upgrade = rest.into_iter();
        let code = upgrade.next().unwrap_or_default();
        let metadata = upgrade.next().unwrap_or_default();
        Ok((code, metadata))
    }

    /// Whether `address` is executing further up the call stack.
    pub fn is_contract_on_the_stack(&self, address: &Address) -> bool {
        self.state.saved().any(|state| state.sc_address == *address)
    }

    pub fn mem_load(&self, offset: i32, length: i32) -> Result<Vec<u8>, VmHostError> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let instance = self.instance.as_ref().ok_or(VmHostError::NilContract)?;
        let memory = instance
            .memory()
            .ok_or(VmHostError::MemoryDeclarationMissing)?;
        instance::mem_load(memory.as_ref(), offset, length)
    }

    pub fn mem_load_multiple(&self, offset: i32, lengths: &[i32]) -> Result<Vec<Vec<u8>>, VmHostError> {
        if lengths.is_empty() {
            return Ok(Vec::new());
        }
        let instance = self.instance.as_ref().ok_or(VmHostError::NilContract)?;
        let memory = instance
            .memory()
            .ok_or(VmHostError::MemoryDeclarationMissing)?;
        instance::mem_load_multiple(memory.as_ref(), offset, lengths)
    }

    pub fn mem_store(&self, offset: i32, data: &[u8]) -> Result<(), VmHostError> {
        if data.is_empty() {
            return Ok(());
        }
        let instance = self.instance.as_ref().ok_or(VmHostError::NilContract)?;
        let mut memory = instance
            .memory()
            .ok_or(VmHostError::MemoryDeclarationMissing)?;
        instance::mem_store(memory.as_mut(), offset, data)
    }

    pub fn add_error(&mut self, error: VmHostError) {
        let function = self.function().to_string();
        self.errors.push(RuntimeError { function, error });
    }

    pub fn errors(&self) -> &[RuntimeError] {
        &self.errors
    }
}

fn same_instance(a: &Option<Rc<dyn Instance>>, b: &Option<Rc<dyn Instance>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Rc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}
