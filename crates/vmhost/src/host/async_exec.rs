//! Asynchronous calls.
//!
//! A legacy `asyncCall` suspends the running contract and is resolved
//! here once the instance has stopped. Calls gathered in an async batch
//! run after the contract returns: those whose destination lives in this
//! shard run right away together with their callbacks, the rest leave as
//! outgoing transfers and stay recorded in the contract's protected
//! storage until their callbacks come back.

use super::VmHost;
use crate::async_call::{
    AsyncCallExecutionMode, AsyncCallInfo, AsyncCallStatus, AsyncContextInfo, AsyncGeneratedCall,
};
use crate::call_args::CallArgsParser;
use crate::error::VmHostError;
use crate::instance::BreakpointValue;
use crate::{
    async_data_storage_key, BUILTIN_DCDT_NFT_TRANSFER, BUILTIN_DCDT_TRANSFER,
    CALLBACK_FUNCTION_NAME,
};
use num_bigint::BigInt;
use num_traits::Zero;
use tracing::{debug, trace, warn};
use vmhost_types::{Address, CallType, ContractCallInput, VMInput, VMOutput};

impl VmHost {
    /// Resolve the legacy async call the contract stopped on.
    pub(super) fn handle_async_call_breakpoint(&mut self) -> Result<(), VmHostError> {
        self.runtime.set_breakpoint_value(BreakpointValue::None);
        let info = self
            .runtime
            .async_call_info()
            .cloned()
            .ok_or(VmHostError::UnhandledRuntimeBreakpoint)?;

        let mode = self.determine_async_call_execution_mode(&info)?;
        trace!(dest = %info.destination, ?mode, "async call breakpoint");

        match mode {
            AsyncCallExecutionMode::AsyncUnknown => self.send_async_call_to_destination(&info),
            AsyncCallExecutionMode::AsyncBuiltinFuncCrossShard => {
                let (_, result) = self.execute_sync_destination_call(&info);
                result
            }
            AsyncCallExecutionMode::DcdtTransferOnCallBack => {
                self.output.prepend_finish(info.data.clone());
                self.metering.restore_gas(&self.runtime, info.gas_locked);
                Ok(())
            }
            AsyncCallExecutionMode::SyncCall
            | AsyncCallExecutionMode::AsyncBuiltinFuncIntraShard => {
                let (dest_output, dest_result) = self.execute_sync_destination_call(&info);
                let (callback_output, callback_result) =
                    self.execute_sync_callback_call(&info, &dest_output, dest_result.err());
                self.process_callback_vm_output(callback_output, callback_result)
            }
        }
    }

    fn determine_async_call_execution_mode(
        &self,
        info: &AsyncCallInfo,
    ) -> Result<AsyncCallExecutionMode, VmHostError> {
        let (function, arguments) = CallArgsParser::parse_data(&info.data)?;
        let sc_address = self.runtime.sc_address();
        let same_shard = self.are_in_same_shard(&sc_address, &info.destination);

        if self.is_builtin_function_name(&function) {
            if !same_shard {
                return Ok(AsyncCallExecutionMode::AsyncBuiltinFuncCrossShard);
            }
            let vm_input = self.runtime.vm_input();
            let returns_tokens = self.is_dcdt_transfer_with_no_additional_data(&function, &arguments)
                && vm_input.call_type == CallType::AsynchronousCall
                && vm_input.caller_addr == info.destination;
            if returns_tokens {
                return Ok(AsyncCallExecutionMode::DcdtTransferOnCallBack);
            }
            return Ok(AsyncCallExecutionMode::AsyncBuiltinFuncIntraShard);
        }

        if same_shard && self.has_code(&info.destination) {
            return Ok(AsyncCallExecutionMode::SyncCall);
        }
        Ok(AsyncCallExecutionMode::AsyncUnknown)
    }

    fn is_dcdt_transfer_with_no_additional_data(&self, function: &str, arguments: &[Vec<u8>]) -> bool {
        if !self.config.dcdt_functions_enabled {
            return false;
        }
        match function {
            BUILTIN_DCDT_TRANSFER => arguments.len() == 2,
            BUILTIN_DCDT_NFT_TRANSFER => arguments.len() == 4,
            _ => false,
        }
    }

    fn execute_sync_destination_call(
        &mut self,
        info: &AsyncCallInfo,
    ) -> (VMOutput, Result<(), VmHostError>) {
        let gas_left = self.metering.gas_left(&self.runtime);
        let input = match self.create_destination_contract_call_input(info, gas_left) {
            Ok(input) => input,
            Err(err) => return (self.output.create_vm_output_in_case_of_error(&err), Err(err)),
        };
        let (vm_output, result) = self.execute_on_dest_context(input);
        (vm_output, result.map(|_| ()))
    }

    fn execute_sync_callback_call(
        &mut self,
        info: &AsyncCallInfo,
        dest_output: &VMOutput,
        dest_err: Option<VmHostError>,
    ) -> (Option<VMOutput>, Result<(), VmHostError>) {
        let sc_address = self.runtime.sc_address();
        let input = self.create_callback_contract_call_input(
            info.gas_locked,
            dest_output,
            info.destination,
            sc_address,
            CALLBACK_FUNCTION_NAME,
            dest_err.as_ref(),
        );
        let input = match input {
            Ok(input) => input,
            Err(err) => return (None, Err(err)),
        };

        // The locked gas was taken when the call was requested.
        self.metering.restore_gas(&self.runtime, info.gas_locked);
        let (vm_output, result) = self.execute_on_dest_context(input);
        (Some(vm_output), result.map(|_| ()))
    }

    fn create_destination_contract_call_input(
        &self,
        info: &AsyncCallInfo,
        gas_provided: u64,
    ) -> Result<ContractCallInput, VmHostError> {
        let (function, arguments) = CallArgsParser::parse_data(&info.data)?;
        let parent = self.runtime.vm_input();

        let mut vm_input = VMInput::new(self.runtime.sc_address(), gas_provided)
            .with_arguments(arguments)
            .with_value(info.value())
            .with_call_type(CallType::AsynchronousCall)
            .with_tx_hashes(&parent.original_tx_hash, &parent.current_tx_hash);
        vm_input.gas_price = parent.gas_price;
        vm_input.gas_locked = info.gas_locked;

        Ok(ContractCallInput::new(vm_input, info.destination, function))
    }

    /// Input of the callback reporting `dest_output` to `receiver`.
    ///
    /// The first argument is the destination's return code; it is followed
    /// by the return data on success and by the return message otherwise.
    /// Tokens handed back through the first return data item turn the
    /// callback into a transfer that executes the callback afterwards.
    fn create_callback_contract_call_input(
        &self,
        gas_locked: u64,
        dest_output: &VMOutput,
        initiator: Address,
        receiver: Address,
        function: &str,
        dest_err: Option<&VmHostError>,
    ) -> Result<ContractCallInput, VmHostError> {
        let return_with_error = dest_err.is_some() || !dest_output.return_code.is_ok();

        let mut arguments = vec![dest_output.return_code.to_bytes()];
        let mut token_transfer = None;
        if return_with_error {
            arguments.push(dest_output.return_message.as_bytes().to_vec());
        } else {
            token_transfer = self.dcdt_transfer_on_return_data(dest_output);
            arguments.extend(dest_output.return_data.iter().cloned());
        }

        let data_length = function.len()
            + arguments.len()
            + arguments.iter().map(Vec::len).sum::<usize>();
        let schedule = self.metering.gas_schedule();
        let cost = schedule.base_ops_api_cost.async_call_step.saturating_add(
            schedule
                .base_operation_cost
                .data_copy_per_byte
                .saturating_mul(data_length as u64),
        );
        let gas_limit = dest_output.gas_remaining.saturating_add(gas_locked);
        if gas_limit <= cost {
            trace!(gas_limit, cost, "not enough gas for callback");
            return Err(VmHostError::NotEnoughGas);
        }

        let parent = self.runtime.vm_input();
        let mut vm_input = VMInput::new(initiator, gas_limit - cost)
            .with_arguments(arguments)
            .with_value(self.compute_call_value_from_last_output_transfer(dest_output))
            .with_call_type(CallType::AsynchronousCallBack)
            .with_tx_hashes(&parent.original_tx_hash, &parent.current_tx_hash);
        vm_input.gas_price = parent.gas_price;
        vm_input.return_call_after_error = return_with_error;

        let mut input = ContractCallInput::new(vm_input, receiver, function);
        if let Some((token_function, token_arguments)) = token_transfer {
            let kept = if token_function == BUILTIN_DCDT_NFT_TRANSFER { 4 } else { 2 };
            let mut arguments: Vec<Vec<u8>> =
                token_arguments.into_iter().take(kept).collect();
            arguments.push(function.as_bytes().to_vec());
            arguments.push(dest_output.return_code.to_bytes());
            arguments.extend(dest_output.return_data.iter().skip(1).cloned());
            input.function = token_function;
            input.vm_input.arguments = arguments;
        }
        Ok(input)
    }

    /// Token transfer encoded as the first item of the destination's
    /// return data, if any.
    fn dcdt_transfer_on_return_data(&self, dest_output: &VMOutput) -> Option<(String, Vec<Vec<u8>>)> {
        let first = dest_output.return_data.first()?;
        let (function, arguments) = CallArgsParser::parse_data(first).ok()?;
        self.is_dcdt_transfer_with_no_additional_data(&function, &arguments)
            .then_some((function, arguments))
    }

    /// Value sent back by the destination to the caller with a plain
    /// transfer forwards to the callback.
    fn compute_call_value_from_last_output_transfer(&self, dest_output: &VMOutput) -> BigInt {
        if !self.config.vmv3_enabled || !dest_output.return_data.is_empty() {
            return BigInt::zero();
        }
        let receiver = self.runtime.sc_address();
        dest_output
            .output_accounts
            .get(&receiver)
            .and_then(|account| account.output_transfers.last())
            .filter(|transfer| transfer.data.is_empty())
            .map(|transfer| transfer.value.clone())
            .unwrap_or_else(BigInt::zero)
    }

    /// Report a failed callback in the caller's output instead of failing
    /// the caller, unless repairing is switched off.
    fn process_callback_vm_output(
        &mut self,
        callback_output: Option<VMOutput>,
        result: Result<(), VmHostError>,
    ) -> Result<(), VmHostError> {
        let Err(err) = result else {
            return Ok(());
        };
        if !self.config.features.repair_callback {
            return Err(err);
        }

        let callback_output = callback_output
            .unwrap_or_else(|| self.output.create_vm_output_in_case_of_error(&err));
        debug!(
            error = %err,
            return_code = %callback_output.return_code,
            "callback failed"
        );
        self.output.set_return_message(callback_output.return_message);
        self.output
            .finish(callback_output.return_code.to_string().into_bytes());
        let tx_hash = self.runtime.current_tx_hash().to_vec();
        self.output.finish(tx_hash);
        Ok(())
    }

    fn send_async_call_to_destination(&mut self, info: &AsyncCallInfo) -> Result<(), VmHostError> {
        let sc_address = self.runtime.sc_address();
        trace!(dest = %info.destination, gas_limit = info.gas_limit, "send async call");
        let result = self.output.transfer(
            &self.blockchain,
            &info.destination,
            &sc_address,
            info.gas_limit,
            info.gas_locked,
            &info.value(),
            info.data.clone(),
            CallType::AsynchronousCall,
        );
        if let Err(err) = result {
            self.use_all_gas();
            self.runtime.fail_execution(&mut self.output, Some(&err));
            return Err(err);
        }

        let gas_left = self.metering.gas_left(&self.runtime);
        self.metering
            .use_gas(&self.runtime, info.gas_limit.min(gas_left));
        Ok(())
    }

    /// Answer the caller of the current async call with the return code
    /// and return data of this execution.
    pub(super) fn send_callback_to_current_caller(&mut self) -> Result<(), VmHostError> {
        let caller = self.runtime.vm_input().caller_addr;
        let value = self.runtime.vm_input().call_value.clone();
        let data = self.output.callback_data();
        self.send_callback_transfer(caller, value, data)
    }

    fn send_storage_callback_to_destination(
        &mut self,
        caller: Address,
        return_data: Vec<u8>,
    ) -> Result<(), VmHostError> {
        let value = self.runtime.vm_input().call_value.clone();
        self.send_callback_transfer(caller, value, return_data)
    }

    fn send_callback_transfer(
        &mut self,
        destination: Address,
        value: BigInt,
        data: Vec<u8>,
    ) -> Result<(), VmHostError> {
        let sc_address = self.runtime.sc_address();
        let gas_left = self.metering.gas_left(&self.runtime);
        trace!(dest = %destination, gas_left, "send callback");
        let result = self.output.transfer(
            &self.blockchain,
            &destination,
            &sc_address,
            gas_left,
            0,
            &value,
            data,
            CallType::AsynchronousCallBack,
        );
        self.use_all_gas();
        if let Err(err) = result {
            self.runtime.fail_execution(&mut self.output, Some(&err));
            return Err(err);
        }
        Ok(())
    }

    fn use_all_gas(&self) {
        let gas_left = self.metering.gas_left(&self.runtime);
        self.metering.use_gas(&self.runtime, gas_left);
    }

    /// Run the calls of an async batch that can run here and send the rest
    /// away. Returns the calls still waiting for a callback, which are also
    /// persisted under the transaction's async data key.
    pub(super) fn process_async_info(
        &mut self,
        info: &mut AsyncContextInfo,
    ) -> Result<AsyncContextInfo, VmHostError> {
        if info.is_empty() {
            return Ok(info.clone());
        }
        self.setup_async_calls_gas(info)?;

        let identifiers: Vec<String> = info.async_context_map.keys().cloned().collect();
        for identifier in &identifiers {
            let count = info
                .async_context_map
                .get(identifier)
                .map_or(0, |context| context.calls.len());
            for index in 0..count {
                let Some(call) = info
                    .async_context_map
                    .get(identifier)
                    .and_then(|context| context.calls.get(index))
                    .cloned()
                else {
                    continue;
                };
                if !call.is_pending() || !self.can_execute_synchronously(&call.destination) {
                    continue;
                }

                let status = self.process_async_call(&call)?;
                if let Some(stored) = info
                    .async_context_map
                    .get_mut(identifier)
                    .and_then(|context| context.calls.get_mut(index))
                {
                    stored.status = status;
                }
            }
        }

        let mut pending = info.clone();
        pending.retain_pending();
        if pending.is_empty() {
            return Ok(pending);
        }

        debug!(
            sc = %self.runtime.sc_address(),
            pending = pending.pending_count(),
            "persisting pending async calls"
        );
        let key = async_data_storage_key(self.runtime.original_tx_hash());
        let encoded = pending.to_json()?;
        self.set_protected_storage(&key, &encoded)?;

        self.setup_async_calls_gas(&mut pending)?;
        let remote: Vec<AsyncCallInfo> = pending
            .calls()
            .filter(|call| !self.can_execute_synchronously(&call.destination))
            .map(AsyncGeneratedCall::call_info)
            .collect();
        for call in &remote {
            self.send_async_call_to_destination(call)?;
        }
        Ok(pending)
    }

    /// Run one same-shard call of a batch. The callback runs as soon as the
    /// destination has nothing left pending.
    fn process_async_call(&mut self, call: &AsyncGeneratedCall) -> Result<AsyncCallStatus, VmHostError> {
        let input = self.create_destination_contract_call_input(&call.call_info(), call.gas_limit)?;
        let (vm_output, result) = self.execute_on_dest_context(input);

        let dest_has_pending = match &result {
            Ok(dest_info) => dest_info.pending_count() > 0,
            Err(_) => false,
        };
        if dest_has_pending {
            return Ok(AsyncCallStatus::Pending);
        }
        self.callback_async(call, &vm_output, result.err())
    }

    fn callback_async(
        &mut self,
        call: &AsyncGeneratedCall,
        dest_output: &VMOutput,
        dest_err: Option<VmHostError>,
    ) -> Result<AsyncCallStatus, VmHostError> {
        let (status, callback) = if dest_output.return_code.is_ok() {
            (AsyncCallStatus::Resolved, call.success_callback.as_str())
        } else {
            (AsyncCallStatus::Rejected, call.error_callback.as_str())
        };
        trace!(dest = %call.destination, callback, ?status, "async call callback");

        let sc_address = self.runtime.sc_address();
        let input = self.create_callback_contract_call_input(
            call.gas_locked,
            dest_output,
            call.destination,
            sc_address,
            callback,
            dest_err.as_ref(),
        )?;
        let (callback_output, result) = self.execute_on_dest_context(input);
        self.process_callback_vm_output(Some(callback_output), result.map(|_| ()))?;
        Ok(status)
    }

    /// Give every call of the batch its gas limit. Calls without provided
    /// gas share what the others leave.
    fn setup_async_calls_gas(&self, info: &mut AsyncContextInfo) -> Result<(), VmHostError> {
        let gas_left = self.metering.gas_left(&self.runtime);
        let mut gas_needed: u64 = 0;
        let mut calls_with_zero_gas: u64 = 0;

        for call in info.calls_mut() {
            gas_needed = gas_needed
                .checked_add(call.provided_gas)
                .ok_or(VmHostError::NotEnoughGas)?;
            if gas_needed > gas_left {
                return Err(VmHostError::NotEnoughGas);
            }
            if call.provided_gas == 0 {
                calls_with_zero_gas += 1;
                continue;
            }
            call.gas_limit = call.provided_gas;
        }

        if calls_with_zero_gas == 0 {
            return Ok(());
        }
        if gas_left <= gas_needed {
            return Err(VmHostError::NotEnoughGas);
        }

        let gas_share = (gas_left - gas_needed) / calls_with_zero_gas;
        for call in info.calls_mut().filter(|call| call.provided_gas == 0) {
            call.gas_limit = gas_share;
        }
        Ok(())
    }

    fn load_async_context_info(&mut self) -> Result<Option<AsyncContextInfo>, VmHostError> {
        let key = async_data_storage_key(self.runtime.original_tx_hash());
        let stored = self.get_storage_unmetered(&key);
        if stored.is_empty() {
            return Ok(None);
        }
        AsyncContextInfo::from_json(&stored).map(Some)
    }

    /// Settle a callback arriving for a persisted batch. Once the batch is
    /// fully resolved its record is deleted and the contract that started
    /// it is called back.
    pub(super) fn process_callback_stack(&mut self) -> Result<(), VmHostError> {
        let Some(mut info) = self.load_async_context_info()? else {
            return Ok(());
        };

        let caller = self.runtime.vm_input().caller_addr;
        if !remove_call_by_destination(&mut info, &caller) {
            warn!(caller = %caller, sc = %self.runtime.sc_address(), "unexpected callback");
            return Err(VmHostError::CallBackFuncNotExpected);
        }

        let key = async_data_storage_key(self.runtime.original_tx_hash());
        if !info.is_empty() {
            let encoded = info.to_json()?;
            self.set_protected_storage(&key, &encoded)?;
            return Ok(());
        }
        self.set_protected_storage(&key, &[])?;

        if !self.can_execute_synchronously(&info.caller_addr) {
            return self.send_storage_callback_to_destination(info.caller_addr, info.return_data);
        }

        let vm_output = self.get_vm_output();
        let sc_address = self.runtime.sc_address();
        let input = self.create_callback_contract_call_input(
            0,
            &vm_output,
            sc_address,
            info.caller_addr,
            CALLBACK_FUNCTION_NAME,
            None,
        );
        let (callback_output, result) = match input {
            Ok(input) => {
                let (callback_output, result) = self.execute_on_dest_context(input);
                (Some(callback_output), result.map(|_| ()))
            }
            Err(err) => (None, Err(err)),
        };
        self.process_callback_vm_output(callback_output, result)
    }

    /// Export to run for the current call. Callbacks answering a persisted
    /// batch call run the callback that call named.
    pub(super) fn get_function_by_call_type(
        &mut self,
        call_type: CallType,
    ) -> Result<String, VmHostError> {
        if call_type != CallType::AsynchronousCallBack {
            return self.runtime.function_to_call();
        }

        let custom_callback = self.set_custom_callback_from_record()?;
        match self.runtime.function_to_call() {
            Err(_) if !custom_callback => Err(VmHostError::NilCallbackFunction),
            result => result,
        }
    }

    fn set_custom_callback_from_record(&mut self) -> Result<bool, VmHostError> {
        let Some(info) = self.load_async_context_info()? else {
            return Ok(false);
        };
        let vm_input = self.runtime.vm_input();
        let caller = vm_input.caller_addr;
        let succeeded = vm_input.arguments.first().map_or(true, Vec::is_empty);

        let Some(call) = info.calls().find(|call| call.destination == caller) else {
            return Ok(false);
        };
        let callback = if succeeded {
            call.success_callback.clone()
        } else {
            call.error_callback.clone()
        };
        self.runtime.set_custom_call_function(&callback);
        Ok(true)
    }
}

/// Drop the first call addressed to `destination`, and its context if it
/// becomes empty.
fn remove_call_by_destination(info: &mut AsyncContextInfo, destination: &Address) -> bool {
    let mut emptied = None;
    let mut removed = false;
    for (identifier, context) in info.async_context_map.iter_mut() {
        if let Some(index) = context
            .calls
            .iter()
            .position(|call| call.destination == *destination)
        {
            context.calls.swap_remove(index);
            removed = true;
            if context.calls.is_empty() {
                emptied = Some(identifier.clone());
            }
            break;
        }
    }
    if let Some(identifier) = emptied {
        info.async_context_map.remove(&identifier);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gas_schedule::GasSchedule;
    use crate::mock::{MockContract, MockInstanceBuilder, MockWorld};
    use crate::vmhooks;
    use crate::HostConfig;
    use std::cell::RefCell;
    use std::rc::Rc;
    use vmhost_types::{ReturnCode, UserAccount};

    const CODE_PARENT: &[u8] = b"parent-code";
    const CODE_CHILD: &[u8] = b"child-code";
    const GAS: u64 = 1_000_000;
    const TX_HASH: &[u8] = b"tx-hash";

    fn owner() -> Address {
        Address::from_name("owner")
    }

    fn parent() -> Address {
        Address::from_name("parent")
    }

    fn child() -> Address {
        Address::from_name("child")
    }

    fn remote() -> Address {
        Address::from_name("remote")
    }

    fn world() -> Rc<RefCell<MockWorld>> {
        let mut world = MockWorld::new();
        world.add_account(UserAccount {
            address: owner(),
            balance: BigInt::from(1_000),
            ..Default::default()
        });
        world.add_contract(parent(), CODE_PARENT.to_vec(), vec![1, 0], Some(owner()));
        world.add_contract(child(), CODE_CHILD.to_vec(), vec![1, 0], Some(owner()));
        world.add_account(UserAccount {
            address: remote(),
            ..Default::default()
        });
        world.set_shard(&remote(), 1);
        Rc::new(RefCell::new(world))
    }

    fn host(world: &Rc<RefCell<MockWorld>>, builder: MockInstanceBuilder) -> VmHost {
        host_with_schedule(world, builder, GasSchedule::uniform(1))
    }

    fn host_with_schedule(
        world: &Rc<RefCell<MockWorld>>,
        builder: MockInstanceBuilder,
        schedule: GasSchedule,
    ) -> VmHost {
        VmHost::new(
            HostConfig::default(),
            schedule,
            Box::new(world.clone()),
            Box::new(builder),
        )
        .unwrap()
    }

    fn call(function: &str) -> ContractCallInput {
        let vm_input = VMInput::new(owner(), GAS).with_tx_hashes(TX_HASH, TX_HASH);
        ContractCallInput::new(vm_input, parent(), function)
    }

    fn child_contract() -> MockContract {
        MockContract::new()
            .with_method("ping", |host| {
                vmhooks::finish(host, b"pong".to_vec())?;
                Ok(())
            })
            .with_method("fail", |host| {
                vmhooks::signal_error(host, b"refused")?;
                Ok(())
            })
    }

    fn store_argument(host: &mut VmHost, key: &[u8], index: usize) -> crate::HookResult<()> {
        let value = host.runtime().arguments().get(index).cloned().unwrap_or_default();
        vmhooks::storage_store(host, key, &value)?;
        Ok(())
    }

    fn storage_value(output: &VMOutput, address: &Address, key: &[u8]) -> Option<Vec<u8>> {
        output
            .output_accounts
            .get(address)?
            .storage_updates
            .get(key)
            .map(|update| update.data.clone())
    }

    #[test]
    fn test_legacy_async_call_runs_callback_in_shard() {
        let world = world();
        let parent_contract = MockContract::new()
            .with_method("run", |host| {
                vmhooks::async_call(host, &child(), &BigInt::zero(), b"ping".to_vec())
            })
            .with_method(CALLBACK_FUNCTION_NAME, |host| store_argument(host, b"answer", 1));
        let builder = MockInstanceBuilder::new()
            .with_contract(CODE_PARENT, parent_contract)
            .with_contract(CODE_CHILD, child_contract());
        let mut host = host(&world, builder);

        let output = host.run_smart_contract_call(&call("run"));
        assert_eq!(output.return_code, ReturnCode::Ok, "{}", output.return_message);
        assert_eq!(
            storage_value(&output, &parent(), b"answer"),
            Some(b"pong".to_vec())
        );
        let key = async_data_storage_key(TX_HASH);
        assert_eq!(storage_value(&output, &parent(), &key), None);
    }

    #[test]
    fn test_legacy_async_call_without_callback_export() {
        let world = world();
        let parent_contract = MockContract::new().with_method("run", |host| {
            vmhooks::async_call(host, &child(), &BigInt::zero(), b"ping".to_vec())
        });
        let builder = MockInstanceBuilder::new()
            .with_contract(CODE_PARENT, parent_contract)
            .with_contract(CODE_CHILD, child_contract());
        let mut host = host(&world, builder);

        let output = host.run_smart_contract_call(&call("run"));
        assert_eq!(output.return_code, ReturnCode::Ok, "{}", output.return_message);
        assert!(output
            .output_accounts
            .get(&parent())
            .map_or(true, |account| account.storage_updates.is_empty()));
    }

    #[test]
    fn test_legacy_async_call_to_other_shard_leaves_as_transfer() {
        let world = world();
        let parent_contract = MockContract::new().with_method("run", |host| {
            vmhooks::async_call(host, &remote(), &BigInt::zero(), b"ping".to_vec())
        });
        let builder = MockInstanceBuilder::new().with_contract(CODE_PARENT, parent_contract);
        let mut host = host(&world, builder);

        let output = host.run_smart_contract_call(&call("run"));
        assert_eq!(output.return_code, ReturnCode::Ok, "{}", output.return_message);
        let transfers = &output.output_accounts[&remote()].output_transfers;
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].call_type, CallType::AsynchronousCall);
        assert_eq!(transfers[0].data, b"ping".to_vec());
        assert_eq!(output.gas_remaining, 0);
    }

    #[test]
    fn test_failed_destination_reaches_callback_with_error() {
        let world = world();
        let parent_contract = MockContract::new()
            .with_method("run", |host| {
                vmhooks::async_call(host, &child(), &BigInt::zero(), b"fail".to_vec())
            })
            .with_method(CALLBACK_FUNCTION_NAME, |host| {
                store_argument(host, b"code", 0)?;
                store_argument(host, b"message", 1)
            });
        let builder = MockInstanceBuilder::new()
            .with_contract(CODE_PARENT, parent_contract)
            .with_contract(CODE_CHILD, child_contract());
        // A failed destination returns no gas; the callback runs on the
        // locked gas alone.
        let mut schedule = GasSchedule::uniform(1);
        schedule.base_ops_api_cost.async_callback_gas_lock = 10_000;
        let mut host = host_with_schedule(&world, builder, schedule);

        let output = host.run_smart_contract_call(&call("run"));
        assert_eq!(output.return_code, ReturnCode::Ok, "{}", output.return_message);
        assert_eq!(
            storage_value(&output, &parent(), b"code"),
            Some(ReturnCode::UserError.to_bytes())
        );
        assert_eq!(
            storage_value(&output, &parent(), b"message"),
            Some(b"refused".to_vec())
        );
    }

    #[test]
    fn test_batch_persists_only_remote_calls() {
        let world = world();
        let parent_contract = MockContract::new()
            .with_method("run", |host| {
                let zero = BigInt::zero();
                vmhooks::create_async_call(
                    host, b"ctx", &child(), &zero, b"ping".to_vec(), "onOk", "onErr", 0,
                )?;
                vmhooks::create_async_call(
                    host, b"ctx", &remote(), &zero, b"ping".to_vec(), "onOk", "onErr", 0,
                )
            })
            .with_method("onOk", |host| store_argument(host, b"ok", 1))
            .with_method("onErr", |host| store_argument(host, b"err", 1));
        let builder = MockInstanceBuilder::new()
            .with_contract(CODE_PARENT, parent_contract)
            .with_contract(CODE_CHILD, child_contract());
        let mut host = host(&world, builder);

        let output = host.run_smart_contract_call(&call("run"));
        assert_eq!(output.return_code, ReturnCode::Ok, "{}", output.return_message);
        assert_eq!(storage_value(&output, &parent(), b"ok"), Some(b"pong".to_vec()));
        assert_eq!(storage_value(&output, &parent(), b"err"), None);

        let key = async_data_storage_key(TX_HASH);
        let record = storage_value(&output, &parent(), &key).unwrap();
        let pending = AsyncContextInfo::from_json(&record).unwrap();
        let destinations: Vec<Address> = pending.calls().map(|call| call.destination).collect();
        assert_eq!(destinations, vec![remote()]);
        assert_eq!(pending.caller_addr, owner());

        let transfers = &output.output_accounts[&remote()].output_transfers;
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].call_type, CallType::AsynchronousCall);
    }

    fn persisted_record() -> Vec<u8> {
        let mut info = AsyncContextInfo::new(owner());
        info.add_call(
            b"ctx",
            AsyncGeneratedCall {
                destination: remote(),
                data: b"ping".to_vec(),
                success_callback: "onOk".to_string(),
                error_callback: "onErr".to_string(),
                ..Default::default()
            },
        );
        info.to_json().unwrap()
    }

    fn callback_from(sender: Address, arguments: Vec<Vec<u8>>) -> ContractCallInput {
        let vm_input = VMInput::new(sender, GAS)
            .with_arguments(arguments)
            .with_call_type(CallType::AsynchronousCallBack)
            .with_tx_hashes(TX_HASH, TX_HASH);
        ContractCallInput::new(vm_input, parent(), CALLBACK_FUNCTION_NAME)
    }

    #[test]
    fn test_callback_resumes_persisted_batch() {
        let world = world();
        let key = async_data_storage_key(TX_HASH);
        world
            .borrow_mut()
            .set_storage(&parent(), &key, &persisted_record());
        let parent_contract = MockContract::new()
            .with_method("onOk", |host| store_argument(host, b"ok", 1))
            .with_method("onErr", |host| store_argument(host, b"err", 1));
        let builder = MockInstanceBuilder::new().with_contract(CODE_PARENT, parent_contract);
        let mut host = host(&world, builder);

        let input = callback_from(remote(), vec![Vec::new(), b"pong".to_vec()]);
        let output = host.run_smart_contract_call(&input);
        assert_eq!(output.return_code, ReturnCode::Ok, "{}", output.return_message);
        assert_eq!(storage_value(&output, &parent(), b"ok"), Some(b"pong".to_vec()));
        assert_eq!(storage_value(&output, &parent(), &key), Some(Vec::new()));

        let transfers = &output.output_accounts[&owner()].output_transfers;
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].call_type, CallType::AsynchronousCallBack);
    }

    #[test]
    fn test_rejected_callback_runs_error_callback() {
        let world = world();
        let key = async_data_storage_key(TX_HASH);
        world
            .borrow_mut()
            .set_storage(&parent(), &key, &persisted_record());
        let parent_contract = MockContract::new()
            .with_method("onOk", |host| store_argument(host, b"ok", 1))
            .with_method("onErr", |host| store_argument(host, b"err", 1));
        let builder = MockInstanceBuilder::new().with_contract(CODE_PARENT, parent_contract);
        let mut host = host(&world, builder);

        let input = callback_from(remote(), vec![vec![4], b"refused".to_vec()]);
        let output = host.run_smart_contract_call(&input);
        assert_eq!(output.return_code, ReturnCode::Ok, "{}", output.return_message);
        assert_eq!(storage_value(&output, &parent(), b"err"), Some(b"refused".to_vec()));
        assert_eq!(storage_value(&output, &parent(), b"ok"), None);
    }

    #[test]
    fn test_unexpected_callback_is_rejected() {
        let world = world();
        let key = async_data_storage_key(TX_HASH);
        world
            .borrow_mut()
            .set_storage(&parent(), &key, &persisted_record());
        let builder = MockInstanceBuilder::new().with_contract(CODE_PARENT, MockContract::new());
        let mut host = host(&world, builder);

        let input = callback_from(Address::from_name("stranger"), vec![Vec::new()]);
        let output = host.run_smart_contract_call(&input);
        assert_ne!(output.return_code, ReturnCode::Ok);
    }

    #[test]
    fn test_batch_gas_split() {
        let world = world();
        let builder = MockInstanceBuilder::new();
        let mut host = host(&world, builder);
        host.runtime.set_instance_for_test(1_000);
        host.metering.init_state_from_input(&VMInput::new(owner(), 1_000), host.output.state());

        let mut info = AsyncContextInfo::new(owner());
        for provided_gas in [100, 0, 0] {
            info.add_call(
                b"ctx",
                AsyncGeneratedCall {
                    destination: remote(),
                    provided_gas,
                    ..Default::default()
                },
            );
        }
        host.setup_async_calls_gas(&mut info).unwrap();
        let limits: Vec<u64> = info.calls().map(|call| call.gas_limit).collect();
        let gas_left = host.metering.gas_left(&host.runtime);
        let share = (gas_left - 100) / 2;
        assert_eq!(limits, vec![100, share, share]);

        info.add_call(
            b"other",
            AsyncGeneratedCall {
                destination: remote(),
                provided_gas: gas_left,
                ..Default::default()
            },
        );
        assert_eq!(
            host.setup_async_calls_gas(&mut info),
            Err(VmHostError::NotEnoughGas)
        );
    }

    #[test]
    fn test_remove_call_by_destination_drops_empty_context() {
        let mut info = AsyncContextInfo::new(owner());
        info.add_call(
            b"ctx",
            AsyncGeneratedCall {
                destination: remote(),
                ..Default::default()
            },
        );
        assert!(!remove_call_by_destination(&mut info, &child()));
        assert!(remove_call_by_destination(&mut info, &remote()));
        assert!(info.is_empty());
    }
}
