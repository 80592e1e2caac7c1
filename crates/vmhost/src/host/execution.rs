//! Top-level entry points and the nested-call protocol.

use super::VmHost;
use crate::call_args::CallArgsParser;
use crate::error::VmHostError;
use crate::instance::InstanceTrap;
use crate::metering::MeteringContext;
use crate::output::CodeDeployInput;
use crate::{
    AsyncContextInfo, BUILTIN_DCDT_NFT_TRANSFER, BUILTIN_DCDT_TRANSFER, CALLBACK_FUNCTION_NAME,
    INIT_FUNCTION_NAME, INIT_FUNCTION_NAME_ETH, UPGRADE_FUNCTION_NAME,
};
use num_bigint::{BigInt, Sign};
use num_traits::Zero;
use tracing::trace;
use vmhost_types::{
    Address, CallType, ContractCallInput, ContractCreateInput, DcdtTransfer, OutputTransfer,
    ReturnCode, TokenType, VMInput, VMOutput,
};

impl VmHost {
    pub(super) fn do_run_smart_contract_create(&mut self, input: &ContractCreateInput) -> VMOutput {
        if !self.config.features.sc_deploy {
            return self
                .output
                .create_vm_output_in_case_of_error(&VmHostError::DeploymentDisabled);
        }

        let caller = input.vm_input.caller_addr;
        let address = match self
            .blockchain
            .new_address(&mut self.output, &caller, &self.config.vm_type)
        {
            Ok(address) => address,
            Err(err) => return self.output.create_vm_output_in_case_of_error(&err),
        };

        self.runtime.init_state_from_input(&input.vm_input);
        self.runtime.set_sc_address(address);
        self.runtime.set_custom_call_function(INIT_FUNCTION_NAME);
        self.metering
            .init_state_from_input(&input.vm_input, self.output.state());
        self.output
            .add_tx_value_to_account(&address, &input.vm_input.call_value);
        self.storage.set_address(address);

        let deploy = CodeDeployInput {
            contract_code: input.contract_code.clone(),
            contract_code_metadata: input.contract_code_metadata.clone(),
            contract_address: address,
            code_deployer_address: caller,
        };
        match self.perform_code_deployment(&deploy) {
            Ok(vm_output) => {
                trace!(
                    return_code = %vm_output.return_code,
                    message = %vm_output.return_message,
                    "run smart contract create finished"
                );
                vm_output
            }
            Err(err) => {
                trace!(error = %err, "run smart contract create");
                self.output.create_vm_output_in_case_of_error(&err)
            }
        }
    }

    fn perform_code_deployment(&mut self, input: &CodeDeployInput) -> Result<VMOutput, VmHostError> {
        trace!(
            address = %input.contract_address,
            code_len = input.contract_code.len(),
            "perform code deployment"
        );
        if let Err(err) = self
            .metering
            .deduct_initial_gas_for_direct_deployment(&input.contract_code)
        {
            self.output.set_return_code(ReturnCode::OutOfGas);
            return Err(err);
        }

        self.runtime.must_verify_next_contract_code();
        self.runtime.set_code_size(input.contract_code.len() as u64);
        let gas_limit = self.metering.gas_for_execution();
        if let Err(err) =
            self.runtime
                .start_instance(&mut self.blockchain, &input.contract_code, gas_limit, true)
        {
            trace!(error = %err, "perform code deployment: start instance");
            return Err(VmHostError::ContractInvalid);
        }

        self.call_init_function()?;

        self.output.deploy_code(input);
        let vm_output = self.get_vm_output();
        self.runtime.clean_instance();
        Ok(vm_output)
    }

    /// Replace the code of the called contract from a transaction.
    pub(super) fn do_run_smart_contract_upgrade(&mut self, input: &ContractCallInput) -> VMOutput {
        self.runtime.init_state_from_call_input(input);
        self.metering
            .init_state_from_input(&input.vm_input, self.output.state());
        self.output
            .add_tx_value_to_account(&input.recipient_addr, &input.vm_input.call_value);
        self.storage.set_address(input.recipient_addr);

        let (code, metadata) = match self.runtime.extract_code_upgrade_from_args() {
            Ok(upgrade) => upgrade,
            Err(_) => {
                return self
                    .output
                    .create_vm_output_in_case_of_error(&VmHostError::InvalidUpgradeArguments)
            }
        };

        let deploy = CodeDeployInput {
            contract_code: code,
            contract_code_metadata: metadata,
            contract_address: input.recipient_addr,
            code_deployer_address: input.vm_input.caller_addr,
        };
        match self.perform_code_deployment(&deploy) {
            Ok(vm_output) => vm_output,
            Err(err) => {
                trace!(error = %err, "run smart contract upgrade");
                self.output.create_vm_output_in_case_of_error(&err)
            }
        }
    }

    pub(super) fn do_run_smart_contract_call(&mut self, input: &ContractCallInput) -> VMOutput {
        let mut input = input.clone();
        MeteringContext::unlock_gas_if_async_callback(&mut input.vm_input);

        self.runtime.init_state_from_call_input(&input);
        self.metering
            .init_state_from_input(&input.vm_input, self.output.state());
        self.output
            .add_tx_value_to_account(&input.recipient_addr, &input.vm_input.call_value);
        self.storage.set_address(input.recipient_addr);

        if self.config.vmv2_enabled
            && input.vm_input.gas_provided < self.gas_schedule().base_ops_api_cost.get_code
        {
            trace!(error = %VmHostError::NotEnoughGas, "run smart contract call: get code");
            return self
                .output
                .create_vm_output_in_case_of_error(&VmHostError::NotEnoughGas);
        }

        let code = match self.runtime.get_sc_code(&self.blockchain, &self.output) {
            Ok(code) => code,
            Err(_) => {
                trace!(error = %VmHostError::ContractNotFound, "run smart contract call: get code");
                return self
                    .output
                    .create_vm_output_in_case_of_error(&VmHostError::ContractNotFound);
            }
        };

        if self.metering.deduct_initial_gas_for_execution(&code).is_err() {
            trace!(error = %VmHostError::NotEnoughGas, "run smart contract call: initial gas");
            return self
                .output
                .create_vm_output_in_case_of_error(&VmHostError::NotEnoughGas);
        }

        let gas_limit = self.metering.gas_for_execution();
        if self
            .runtime
            .start_instance(&mut self.blockchain, &code, gas_limit, false)
            .is_err()
        {
            return self
                .output
                .create_vm_output_in_case_of_error(&VmHostError::ContractInvalid);
        }

        if let Err(err) = self.call_sc_method() {
            trace!(error = %err, "run smart contract call");
            return self.output.create_vm_output_in_case_of_error(&err);
        }

        let vm_output = self.get_vm_output();
        trace!(
            return_code = %vm_output.return_code,
            message = %vm_output.return_message,
            "run smart contract call finished"
        );
        self.runtime.clean_instance();
        vm_output
    }

    /// Call an export on the active instance.
    pub(super) fn call_instance(&mut self, name: &str) -> Result<(), InstanceTrap> {
        let Some(instance) = self.runtime.instance() else {
            return Err(InstanceTrap::Trap("no running instance".to_string()));
        };
        instance.call(name, self)
    }

    fn call_init_function(&mut self) -> Result<(), VmHostError> {
        if !self.runtime.has_init_function() {
            return Ok(());
        }
        let result = self.call_instance(INIT_FUNCTION_NAME);
        self.handle_breakpoint_if_any(result)?;
        self.check_final_gas_after_exit()
    }

    fn check_final_gas_after_exit(&self) -> Result<(), VmHostError> {
        if !self.config.vmv2_enabled {
            return Ok(());
        }
        if self.runtime.points_used() > self.metering.gas_for_execution() {
            return Err(VmHostError::NotEnoughGas);
        }
        Ok(())
    }

    fn verify_allowed_function_call(&self) -> Result<(), VmHostError> {
        let function = self.runtime.function();
        if function == INIT_FUNCTION_NAME || function == INIT_FUNCTION_NAME_ETH {
            return Err(VmHostError::InitFuncCalledInRun);
        }
        let in_callback = self.runtime.vm_input().call_type == CallType::AsynchronousCallBack;
        if function == CALLBACK_FUNCTION_NAME && !in_callback {
            return Err(VmHostError::CallBackFuncCalledInRun);
        }
        Ok(())
    }

    fn call_sc_method(&mut self) -> Result<(), VmHostError> {
        trace!("call sc method");
        self.verify_allowed_function_call()?;

        let call_type = self.runtime.vm_input().call_type;
        let function = match self.get_function_by_call_type(call_type) {
            Ok(function) => function,
            Err(VmHostError::NilCallbackFunction)
                if call_type == CallType::AsynchronousCallBack =>
            {
                return self.process_callback_stack();
            }
            Err(err) => return Err(err),
        };

        let result = self.call_instance(&function);
        self.handle_breakpoint_if_any(result)?;
        self.check_final_gas_after_exit()?;

        match call_type {
            CallType::AsynchronousCall => {
                let mut info = self.runtime.async_context_info().clone();
                let pending = self.process_async_info(&mut info)?;
                if pending.is_empty() {
                    self.send_callback_to_current_caller()?;
                }
                Ok(())
            }
            CallType::AsynchronousCallBack => self.process_callback_stack(),
            CallType::DirectCall => {
                let mut info = self.runtime.async_context_info().clone();
                self.process_async_info(&mut info).map(|_| ())
            }
        }
    }

    fn call_sc_method_indirect(&mut self) -> Result<(), VmHostError> {
        let function = match self.runtime.function_to_call() {
            Ok(function) => function,
            Err(VmHostError::NilCallbackFunction) => return Ok(()),
            Err(err) => return Err(err),
        };
        let result = self.call_instance(&function);
        self.handle_breakpoint_if_any(result)
    }

    /// Run the call described by the active runtime frame on a new instance.
    /// Frames must already be pushed; popping them and restoring unused gas
    /// to the caller is left to the calling code.
    fn execute(&mut self, input: &ContractCallInput) -> Result<(), VmHostError> {
        let function = self.runtime.function();
        let is_init = function == INIT_FUNCTION_NAME || function == INIT_FUNCTION_NAME_ETH;
        if is_init && !input.allow_init_function {
            return Err(VmHostError::InitFuncCalledInRun);
        }

        // Charged on the caller's instance; the unused part is restored
        // when the frame is popped.
        self.metering
            .use_gas(&self.runtime, input.vm_input.gas_provided);

        if input.function == UPGRADE_FUNCTION_NAME {
            return self.execute_upgrade(input);
        }

        let code = self.runtime.get_sc_code(&self.blockchain, &self.output)?;
        self.metering.deduct_initial_gas_for_execution(&code)?;
        let gas_limit = self.metering.gas_for_execution();
        self.runtime
            .start_instance(&mut self.blockchain, &code, gas_limit, false)?;

        self.call_sc_method_indirect()?;

        if !self.output.return_code().is_ok() {
            return Err(VmHostError::ReturnCodeNotOk);
        }
        Ok(())
    }

    fn check_upgrade_permission(&self, input: &ContractCallInput) -> Result<(), VmHostError> {
        let contract = self.blockchain.get_user_account(&input.recipient_addr)?;
        let upgradeable = contract.metadata().upgradeable;
        let caller_is_owner = contract.owner_address == Some(input.vm_input.caller_addr);
        if upgradeable && caller_is_owner {
            return Ok(());
        }
        Err(VmHostError::UpgradeNotAllowed)
    }

    /// Upgrade requested by a running contract.
    fn execute_upgrade(&mut self, input: &ContractCallInput) -> Result<(), VmHostError> {
        self.check_upgrade_permission(input)?;

        let (code, metadata) = self
            .runtime
            .extract_code_upgrade_from_args()
            .map_err(|_| VmHostError::InvalidUpgradeArguments)?;
        let deploy = CodeDeployInput {
            contract_code: code,
            contract_code_metadata: metadata,
            contract_address: input.recipient_addr,
            code_deployer_address: input.vm_input.caller_addr,
        };

        if let Err(err) = self
            .metering
            .deduct_initial_gas_for_direct_deployment(&deploy.contract_code)
        {
            self.output.set_return_code(ReturnCode::OutOfGas);
            return Err(err);
        }

        self.runtime.must_verify_next_contract_code();
        self.runtime.set_code_size(deploy.contract_code.len() as u64);
        let gas_limit = self.metering.gas_for_execution();
        if let Err(err) =
            self.runtime
                .start_instance(&mut self.blockchain, &deploy.contract_code, gas_limit, true)
        {
            trace!(error = %err, "execute upgrade: start instance");
            return Err(VmHostError::ContractInvalid);
        }

        self.call_init_function()?;

        self.output.deploy_code(&deploy);
        if !self.output.return_code().is_ok() {
            return Err(VmHostError::ReturnCodeNotOk);
        }
        Ok(())
    }

    /// Run a nested call in fresh frames. The child's output is merged into
    /// the caller's on success and dropped otherwise; world changes made by
    /// built-in functions are rolled back on failure.
    pub fn execute_on_dest_context(
        &mut self,
        input: ContractCallInput,
    ) -> (VMOutput, Result<AsyncContextInfo, VmHostError>) {
        trace!(
            caller = %input.vm_input.caller_addr,
            dest = %input.recipient_addr,
            function = %input.function,
            "execute on dest context"
        );
        self.blockchain.push_state();

        let mut builtin_output = None;
        let execution_input = if self.is_builtin_function_name(&input.function) {
            match self.handle_builtin_function_call(&input) {
                Ok((post_input, vm_output)) => {
                    builtin_output = Some(vm_output);
                    post_input
                }
                Err(err) => {
                    self.blockchain.pop_set_active_state();
                    self.runtime.add_error(err.clone());
                    let vm_output = self.output.create_vm_output_in_case_of_error(&err);
                    return (vm_output, Err(err));
                }
            }
        } else {
            Some(input)
        };

        let (vm_output, result) = match execution_input {
            Some(input) => self.execute_on_dest_context_no_builtin(input),
            None => {
                let caller = self.runtime.sc_address();
                (
                    builtin_output.unwrap_or_default(),
                    Ok(AsyncContextInfo::new(caller)),
                )
            }
        };

        if result.is_err() {
            self.blockchain.pop_set_active_state();
        } else {
            self.blockchain.pop_discard();
        }
        (vm_output, result)
    }

    fn handle_builtin_function_call(
        &mut self,
        input: &ContractCallInput,
    ) -> Result<(Option<ContractCallInput>, VMOutput), VmHostError> {
        let (post_input, builtin_output) = self.call_builtin_function(input).map_err(|err| {
            trace!(error = %err, "execute on dest context: built-in function");
            err
        })?;
        self.output.add_to_active_state(&builtin_output);
        Ok((post_input, builtin_output))
    }

    fn call_builtin_function(
        &mut self,
        input: &ContractCallInput,
    ) -> Result<(Option<ContractCallInput>, VMOutput), VmHostError> {
        let mut vm_output = match self.blockchain.process_builtin_function(input) {
            Ok(vm_output) => vm_output,
            Err(err) => {
                self.metering
                    .use_gas(&self.runtime, input.vm_input.gas_provided);
                return Err(err);
            }
        };

        let post_input = match self.is_sc_execution_after_builtin_func(input, &vm_output) {
            Ok(post_input) => post_input,
            Err(err) => {
                self.metering
                    .use_gas(&self.runtime, input.vm_input.gas_provided);
                return Err(err);
            }
        };

        if post_input.is_some() {
            for account in vm_output.output_accounts.values_mut() {
                account.output_transfers.clear();
            }
        }

        self.metering.track_gas_used_by_builtin_function(
            &self.runtime,
            input,
            &vm_output,
            post_input.as_ref(),
        );
        self.add_dcdt_transfer_to_vm_output_sc_intra_shard_call(input, &mut vm_output);
        Ok((post_input, vm_output))
    }

    /// Input for the contract call that follows a token transfer carrying
    /// call data to a same-shard contract.
    fn is_sc_execution_after_builtin_func(
        &self,
        input: &ContractCallInput,
        vm_output: &VMOutput,
    ) -> Result<Option<ContractCallInput>, VmHostError> {
        if vm_output.return_code != ReturnCode::Ok {
            return Ok(None);
        }

        let caller = input.vm_input.caller_addr;
        let mut recipient = input.recipient_addr;
        if input.function == BUILTIN_DCDT_NFT_TRANSFER && caller == recipient {
            let Some(destination) = input.vm_input.arguments.get(3) else {
                return Ok(None);
            };
            recipient = Address::from_slice(destination)?;
        }
        if !self.are_in_same_shard(&caller, &recipient) {
            return Ok(None);
        }
        if !self.blockchain.is_smart_contract(&recipient) {
            return Ok(None);
        }

        let Some(account) = vm_output.output_accounts.get(&recipient) else {
            return Ok(None);
        };
        let [transfer] = account.output_transfers.as_slice() else {
            return Ok(None);
        };

        let (function, arguments) = CallArgsParser::parse_data(&transfer.data)?;
        let mut vm_input = VMInput::new(caller, transfer.gas_limit)
            .with_arguments(arguments)
            .with_call_type(input.vm_input.call_type)
            .with_tx_hashes(
                &input.vm_input.original_tx_hash,
                &input.vm_input.current_tx_hash,
            );
        vm_input.gas_price = input.vm_input.gas_price;
        vm_input.gas_locked = transfer.gas_locked;

        let mut post_input = ContractCallInput::new(vm_input, recipient, function);
        fill_with_dcdt_value(input, &mut post_input);
        Ok(Some(post_input))
    }

    /// Record a contract-to-contract token transfer within the shard as an
    /// output transfer so that it shows up in the effect log.
    fn add_dcdt_transfer_to_vm_output_sc_intra_shard_call(
        &self,
        input: &ContractCallInput,
        vm_output: &mut VMOutput,
    ) {
        if vm_output.return_code != ReturnCode::Ok {
            return;
        }
        if !self.are_in_same_shard(&input.recipient_addr, &input.vm_input.caller_addr) {
            return;
        }
        let is_dcdt_transfer =
            input.function == BUILTIN_DCDT_TRANSFER || input.function == BUILTIN_DCDT_NFT_TRANSFER;
        if !is_dcdt_transfer {
            return;
        }

        let mut recipient = input.recipient_addr;
        if input.function == BUILTIN_DCDT_NFT_TRANSFER {
            let [_, _, _, destination] = input.vm_input.arguments.as_slice() else {
                return;
            };
            match Address::from_slice(destination) {
                Ok(destination) => recipient = destination,
                Err(_) => return,
            }
        }

        let account = vm_output
            .output_accounts
            .entry(recipient)
            .or_insert_with(|| vmhost_types::OutputAccount::new(recipient));
        account.output_transfers.push(OutputTransfer {
            value: BigInt::zero(),
            gas_limit: 0,
            gas_locked: 0,
            data: CallArgsParser::build_data(&input.function, &input.vm_input.arguments),
            call_type: input.vm_input.call_type,
            sender_address: input.vm_input.caller_addr,
        });
    }

    fn execute_on_dest_context_no_builtin(
        &mut self,
        mut input: ContractCallInput,
    ) -> (VMOutput, Result<AsyncContextInfo, VmHostError>) {
        self.bigint.push_state();
        self.bigint.init_state();

        self.output.push_state();
        self.output.censor_vm_output();

        self.copy_tx_hashes_from_context(&mut input);
        MeteringContext::unlock_gas_if_async_callback(&mut input.vm_input);
        self.runtime.push_state();
        self.runtime.init_state_from_call_input(&input);

        self.metering.push_state();
        self.metering
            .init_state_from_input(&input.vm_input, self.output.state());

        self.storage.push_state();
        self.storage.set_address(input.recipient_addr);

        let result = self.run_on_dest_context(&input);
        let vm_output = self.finish_execute_on_dest_context(result.as_ref().err());

        match result {
            Ok(_) if !vm_output.return_code.is_ok() => {
                (vm_output, Err(VmHostError::ExecutionFailed))
            }
            result => (vm_output, result),
        }
    }

    fn run_on_dest_context(
        &mut self,
        input: &ContractCallInput,
    ) -> Result<AsyncContextInfo, VmHostError> {
        let vm_input = &input.vm_input;
        if vm_input.call_type != CallType::AsynchronousCallBack || vm_input.call_value.is_zero() {
            self.output
                .transfer_value_only(
                    &self.blockchain,
                    &input.recipient_addr,
                    &vm_input.caller_addr,
                    &vm_input.call_value,
                    false,
                )
                .map_err(|err| {
                    trace!(error = %err, "execute on dest context: transfer");
                    err
                })?;
        }

        self.execute(input).map_err(|err| {
            trace!(error = %err, "execute on dest context: execution");
            err
        })?;

        let mut info = self.runtime.async_context_info().clone();
        self.process_async_info(&mut info)?;
        Ok(info)
    }

    fn finish_execute_on_dest_context(&mut self, err: Option<&VmHostError>) -> VMOutput {
        let vm_output = match err {
            Some(err) => self.output.create_vm_output_in_case_of_error(err),
            // Taken before the runtime frame is popped so that gas remaining
            // is read from the child's instance.
            None => self.get_vm_output(),
        };
        let gas_spent = self.metering.gas_spent_by_contract(&self.runtime);

        self.bigint.pop_set_active_state();
        self.storage.pop_set_active_state();

        if vm_output.return_code.is_ok() {
            self.metering.pop_merge_active_state();
            self.output.pop_merge_active_state();
        } else {
            self.metering.pop_set_active_state();
            self.output.pop_set_active_state();
        }

        self.runtime.pop_set_active_state();
        self.metering
            .restore_gas(&self.runtime, vm_output.gas_remaining);

        trace!(gas_spent, "execute on dest context finished");
        vm_output
    }

    fn copy_tx_hashes_from_context(&self, input: &mut ContractCallInput) {
        if !self.config.dcdt_functions_enabled {
            return;
        }
        let parent = self.runtime.vm_input();
        if !parent.original_tx_hash.is_empty() {
            input.vm_input.original_tx_hash = parent.original_tx_hash.clone();
        }
        if !parent.current_tx_hash.is_empty() {
            input.vm_input.current_tx_hash = parent.current_tx_hash.clone();
        }
        if !parent.prev_tx_hash.is_empty() {
            input.vm_input.prev_tx_hash = parent.prev_tx_hash.clone();
        }
    }

    /// Run code of another contract over the caller's storage. Output and
    /// world changes are kept only if the call succeeds.
    pub fn execute_on_same_context(&mut self, mut input: ContractCallInput) -> Result<(), VmHostError> {
        trace!(function = %input.function, "execute on same context");
        if self.is_builtin_function_name(&input.function) {
            return Err(VmHostError::BuiltinCallOnSameContextDisallowed);
        }

        self.bigint.push_state();
        self.output.push_state();

        self.copy_tx_hashes_from_context(&mut input);
        self.runtime.push_state();
        self.runtime.init_state_from_call_input(&input);

        self.metering.push_state();
        self.metering
            .init_state_from_input(&input.vm_input, self.output.state());

        self.blockchain.push_state();

        let result = self.run_on_same_context(&input);
        if let Err(err) = &result {
            self.runtime.add_error(err.clone());
        }
        self.finish_execute_on_same_context(result.is_err());
        result
    }

    fn run_on_same_context(&mut self, input: &ContractCallInput) -> Result<(), VmHostError> {
        self.output.transfer_value_only(
            &self.blockchain,
            &input.recipient_addr,
            &input.vm_input.caller_addr,
            &input.vm_input.call_value,
            false,
        )?;
        self.execute(input)
    }

    fn finish_execute_on_same_context(&mut self, failed: bool) {
        if failed || !self.output.return_code().is_ok() {
            self.bigint.pop_set_active_state();
            self.metering.pop_set_active_state();
            self.output.pop_set_active_state();
            self.runtime.pop_set_active_state();
            self.blockchain.pop_set_active_state();
            return;
        }

        let vm_output = self.get_vm_output();

        self.metering.pop_merge_active_state();
        self.output.pop_discard();
        self.bigint.pop_discard();
        self.blockchain.pop_discard();
        self.runtime.pop_set_active_state();

        self.metering
            .restore_gas(&self.runtime, vm_output.gas_remaining);
    }

    /// Deploy a contract from a running contract and run its `init`.
    pub fn create_new_contract(&mut self, input: ContractCreateInput) -> Result<Address, VmHostError> {
        if !self.config.features.sc_deploy {
            return Err(VmHostError::DeploymentDisabled);
        }

        let caller = input.vm_input.caller_addr;
        self.metering
            .deduct_initial_gas_for_indirect_deployment(&self.runtime, &input.contract_code)?;

        if self.runtime.read_only() {
            return Err(VmHostError::InvalidCallOnReadOnlyMode);
        }

        let address = self
            .blockchain
            .new_address(&mut self.output, &caller, &self.config.vm_type)?;
        if self.blockchain.account_exists(&address) {
            return Err(VmHostError::DeploymentOverExistingAccount);
        }

        self.output.deploy_code(&CodeDeployInput {
            contract_code: input.contract_code,
            contract_code_metadata: input.contract_code_metadata,
            contract_address: address,
            code_deployer_address: caller,
        });
        self.runtime.must_verify_next_contract_code();

        let mut init_input = ContractCallInput::new(input.vm_input, address, INIT_FUNCTION_NAME);
        init_input.allow_init_function = true;
        let (_, result) = self.execute_on_dest_context(init_input);
        if let Err(err) = result {
            self.output.delete_output_account(&address);
            return Err(err);
        }

        self.blockchain.increase_nonce(&mut self.output, &caller);
        trace!(address = %address, "contract created");
        Ok(address)
    }

    /// Run the token-transfer built-in on behalf of `sender`. Returns the
    /// built-in output and the gas it consumed.
    pub(crate) fn execute_dcdt_transfer(
        &mut self,
        destination: &Address,
        sender: &Address,
        token: &[u8],
        nonce: u64,
        value: &BigInt,
        call_type: CallType,
    ) -> Result<(VMOutput, u64), VmHostError> {
        let gas_provided = self.metering.gas_left(&self.runtime);
        let (function, recipient, arguments) = if nonce > 0 {
            (
                BUILTIN_DCDT_NFT_TRANSFER,
                *sender,
                vec![
                    token.to_vec(),
                    uint_bytes(&BigInt::from(nonce)),
                    uint_bytes(value),
                    destination.to_vec(),
                ],
            )
        } else {
            (
                BUILTIN_DCDT_TRANSFER,
                *destination,
                vec![token.to_vec(), uint_bytes(value)],
            )
        };

        let mut vm_input = VMInput::new(*sender, gas_provided)
            .with_arguments(arguments)
            .with_call_type(call_type);
        vm_input.gas_price = self.runtime.vm_input().gas_price;
        let transfer_input = ContractCallInput::new(vm_input, recipient, function);

        trace!(sender = %sender, dest = %destination, nonce, "dcdt transfer");
        let vm_output = self
            .blockchain
            .process_builtin_function(&transfer_input)
            .map_err(|err| {
                trace!(error = %err, "dcdt transfer");
                err
            })?;
        if !vm_output.return_code.is_ok() {
            trace!(
                return_code = %vm_output.return_code,
                message = %vm_output.return_message,
                "dcdt transfer failed"
            );
            return Err(VmHostError::ExecutionFailed);
        }

        let forwarded: u64 = vm_output
            .output_accounts
            .values()
            .flat_map(|account| account.output_transfers.iter())
            .map(|transfer| transfer.gas_limit)
            .fold(0, u64::saturating_add);
        let gas_consumed = gas_provided
            .saturating_sub(vm_output.gas_remaining)
            .saturating_sub(forwarded);

        // Callbacks run on gas the async call already paid for.
        if call_type != CallType::AsynchronousCallBack {
            if self.metering.gas_left(&self.runtime) < gas_consumed {
                trace!(error = %VmHostError::NotEnoughGas, "dcdt transfer");
                return Err(VmHostError::NotEnoughGas);
            }
            self.metering.use_gas(&self.runtime, gas_consumed);
        }
        Ok((vm_output, gas_consumed))
    }

    /// Send tokens from the running contract and record the transfer on the
    /// destination account. Cross-shard contract calls get the call's gas
    /// forwarded with the transfer.
    pub fn transfer_dcdt(
        &mut self,
        destination: &Address,
        sender: &Address,
        token: &[u8],
        nonce: u64,
        value: &BigInt,
        call_input: Option<&ContractCallInput>,
    ) -> Result<u64, VmHostError> {
        let is_smart_contract = self.blockchain.is_smart_contract(destination);
        let is_to_self = sender == destination;
        let same_shard = self.are_in_same_shard(sender, destination);

        let (_, gas_consumed) =
            self.execute_dcdt_transfer(destination, sender, token, nonce, value, CallType::DirectCall)?;

        let mut gas_limit = 0;
        if let Some(call) = call_input {
            if !is_to_self && is_smart_contract && !same_shard {
                gas_limit = call.vm_input.gas_provided;
                if self.metering.gas_left(&self.runtime) < gas_limit {
                    return Err(VmHostError::NotEnoughGas);
                }
                self.metering.use_gas(&self.runtime, gas_limit);
            }
        }

        let mut arguments = vec![token.to_vec()];
        let function = if nonce > 0 {
            arguments.push(uint_bytes(&BigInt::from(nonce)));
            arguments.push(uint_bytes(value));
            arguments.push(destination.to_vec());
            BUILTIN_DCDT_NFT_TRANSFER
        } else {
            arguments.push(uint_bytes(value));
            BUILTIN_DCDT_TRANSFER
        };
        if let Some(call) = call_input {
            arguments.push(call.function.as_bytes().to_vec());
            arguments.extend(call.vm_input.arguments.iter().cloned());
        }

        let (account, _) = self.output.get_output_account(destination);
        account.output_transfers.push(OutputTransfer {
            value: BigInt::zero(),
            gas_limit,
            gas_locked: 0,
            data: CallArgsParser::build_data(function, &arguments),
            call_type: CallType::DirectCall,
            sender_address: *sender,
        });
        Ok(gas_consumed)
    }
}

/// Attach the token carried by a transfer built-in to the input of the
/// contract call that follows it.
fn fill_with_dcdt_value(full_input: &ContractCallInput, post_input: &mut ContractCallInput) {
    let arguments = &full_input.vm_input.arguments;
    let transfer = match full_input.function.as_str() {
        BUILTIN_DCDT_TRANSFER if arguments.len() >= 2 => DcdtTransfer {
            token_name: arguments[0].clone(),
            token_nonce: 0,
            value: BigInt::from_bytes_be(Sign::Plus, &arguments[1]),
            token_type: TokenType::Fungible,
        },
        BUILTIN_DCDT_NFT_TRANSFER if arguments.len() >= 3 => DcdtTransfer {
            token_name: arguments[0].clone(),
            token_nonce: u64_from_bytes(&arguments[1]),
            value: BigInt::from_bytes_be(Sign::Plus, &arguments[2]),
            token_type: TokenType::NonFungible,
        },
        _ => return,
    };
    post_input.vm_input.dcdt_transfers = vec![transfer];
}

/// Minimal big-endian bytes of a non-negative integer; zero is empty.
pub(crate) fn uint_bytes(value: &BigInt) -> Vec<u8> {
    if value.is_zero() {
        return Vec::new();
    }
    value.to_bytes_be().1
}

fn u64_from_bytes(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .skip(bytes.len().saturating_sub(8))
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte))
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
    use vmhost_types::UserAccount;

    const CODE_PARENT: &[u8] = b"parent-code";
    const CODE_CHILD: &[u8] = b"child-code";
    const GAS: u64 = 1_000_000;

    fn owner() -> Address {
        Address::from_name("owner")
    }

    fn parent() -> Address {
        Address::from_name("parent")
    }

    fn child() -> Address {
        Address::from_name("child")
    }

    fn world() -> Rc<RefCell<MockWorld>> {
        let mut world = MockWorld::new();
        world.add_account(UserAccount {
            address: owner(),
            nonce: 3,
            balance: BigInt::from(1_000),
            ..Default::default()
        });
        world.add_contract(parent(), CODE_PARENT.to_vec(), vec![1, 0], Some(owner()));
        world.add_contract(child(), CODE_CHILD.to_vec(), vec![1, 0], Some(owner()));
        Rc::new(RefCell::new(world))
    }

    fn host(world: &Rc<RefCell<MockWorld>>, builder: MockInstanceBuilder) -> VmHost {
        VmHost::new(
            HostConfig::default(),
            GasSchedule::uniform(1),
            Box::new(world.clone()),
            Box::new(builder),
        )
        .unwrap()
    }

    fn call(recipient: Address, function: &str) -> ContractCallInput {
        ContractCallInput::new(VMInput::new(owner(), GAS), recipient, function)
    }

    #[test]
    fn test_uint_bytes() {
        assert!(uint_bytes(&BigInt::zero()).is_empty());
        assert_eq!(uint_bytes(&BigInt::from(258)), vec![1, 2]);
        assert_eq!(u64_from_bytes(&[1, 2]), 258);
        assert_eq!(u64_from_bytes(&[]), 0);
    }

    #[test]
    fn test_simple_call_finishes_data() {
        let world = world();
        let contract = MockContract::new().with_method("hello", |host| {
            vmhooks::finish(host, b"world".to_vec())?;
            Ok(())
        });
        let builder = MockInstanceBuilder::new().with_contract(CODE_PARENT, contract);
        let mut host = host(&world, builder);

        let output = host.run_smart_contract_call(&call(parent(), "hello"));
        assert_eq!(output.return_code, ReturnCode::Ok);
        assert_eq!(output.return_data, vec![b"world".to_vec()]);
        assert_eq!(output.total_gas_accounted(), GAS);
    }

    #[test]
    fn test_missing_function_is_reported() {
        let world = world();
        let builder = MockInstanceBuilder::new().with_contract(CODE_PARENT, MockContract::new());
        let mut host = host(&world, builder);

        let output = host.run_smart_contract_call(&call(parent(), "absent"));
        assert_eq!(output.return_code, ReturnCode::FunctionNotFound);
        assert_eq!(output.gas_remaining, 0);
    }

    #[test]
    fn test_init_cannot_be_called_directly() {
        let world = world();
        let contract = MockContract::new().with_method("init", |_| Ok(()));
        let builder = MockInstanceBuilder::new().with_contract(CODE_PARENT, contract);
        let mut host = host(&world, builder);

        let output = host.run_smart_contract_call(&call(parent(), "init"));
        assert_eq!(output.return_code, ReturnCode::UserError);

        let output = host.run_smart_contract_call(&call(parent(), CALLBACK_FUNCTION_NAME));
        assert_eq!(output.return_code, ReturnCode::UserError);
    }

    #[test]
    fn test_unknown_contract() {
        let world = world();
        let mut host = host(&world, MockInstanceBuilder::new());
        let output = host.run_smart_contract_call(&call(Address::from_name("nobody"), "f"));
        assert_eq!(output.return_code, ReturnCode::ContractNotFound);
    }

    #[test]
    fn test_create_runs_init_and_deploys_code() {
        let world = world();
        let contract = MockContract::new().with_method("init", |host| {
            vmhooks::storage_store(host, b"counter", &[7])?;
            Ok(())
        });
        let builder = MockInstanceBuilder::new().with_contract(b"new-code", contract);
        let mut host = host(&world, builder);

        let input = ContractCreateInput::new(VMInput::new(owner(), GAS), b"new-code".to_vec(), vec![1, 0]);
        let output = host.run_smart_contract_create(&input);
        assert_eq!(output.return_code, ReturnCode::Ok, "{}", output.return_message);

        let deployed = output
            .output_accounts
            .values()
            .find(|account| account.code == b"new-code")
            .unwrap();
        assert_eq!(deployed.code_deployer_address, Some(owner()));
        assert_eq!(
            deployed.storage_updates.get(b"counter".as_slice()).unwrap().data,
            vec![7]
        );
    }

    #[test]
    fn test_create_disabled() {
        let world = world();
        let mut config = HostConfig::default();
        config.features.sc_deploy = false;
        let mut host = VmHost::new(
            config,
            GasSchedule::uniform(1),
            Box::new(world.clone()),
            Box::new(MockInstanceBuilder::new()),
        )
        .unwrap();

        let input = ContractCreateInput::new(VMInput::new(owner(), GAS), b"code".to_vec(), vec![]);
        let output = host.run_smart_contract_create(&input);
        assert_eq!(output.return_code, ReturnCode::ExecutionFailed);
        assert_eq!(output.return_message, "contract deployment is disabled");
    }

    #[test]
    fn test_create_with_invalid_code() {
        let world = world();
        let mut host = host(&world, MockInstanceBuilder::new());
        let input = ContractCreateInput::new(VMInput::new(owner(), GAS), b"garbage".to_vec(), vec![]);
        let output = host.run_smart_contract_create(&input);
        assert_eq!(output.return_code, ReturnCode::ContractInvalid);
    }

    #[test]
    fn test_dest_context_merges_child_output() {
        let world = world();
        let parent_contract = MockContract::new().with_method("callChild", |host| {
            let result = vmhooks::execute_on_dest_context(
                host,
                100_000,
                &child(),
                &BigInt::from(5),
                "store",
                vec![],
            )?;
            vmhooks::finish(host, vec![result as u8])?;
            Ok(())
        });
        let child_contract = MockContract::new().with_method("store", |host| {
            vmhooks::storage_store(host, b"key", b"value")?;
            vmhooks::finish(host, b"child".to_vec())?;
            Ok(())
        });
        let builder = MockInstanceBuilder::new()
            .with_contract(CODE_PARENT, parent_contract)
            .with_contract(CODE_CHILD, child_contract);
        let mut host = host(&world, builder);

        let input = ContractCallInput::new(
            VMInput::new(owner(), GAS).with_value(10),
            parent(),
            "callChild",
        );
        let output = host.run_smart_contract_call(&input);
        assert_eq!(output.return_code, ReturnCode::Ok, "{}", output.return_message);
        assert_eq!(output.return_data, vec![b"child".to_vec(), vec![0]]);

        let child_account = &output.output_accounts[&child()];
        assert_eq!(child_account.balance_delta, BigInt::from(5));
        assert!(child_account.storage_updates.contains_key(b"key".as_slice()));
        assert_eq!(output.output_accounts[&parent()].balance_delta, BigInt::from(5));
        assert_eq!(output.total_gas_accounted(), GAS);
        assert_eq!(output.balance_delta_sum(), BigInt::from(10));
    }

    #[test]
    fn test_dest_context_failure_discards_child() {
        let world = world();
        let parent_contract = MockContract::new().with_method("callChild", |host| {
            let result =
                vmhooks::execute_on_dest_context(host, 100_000, &child(), &BigInt::zero(), "fail", vec![])?;
            vmhooks::finish(host, vec![result as u8])?;
            Ok(())
        });
        let child_contract = MockContract::new().with_method("fail", |host| {
            vmhooks::storage_store(host, b"key", b"value")?;
            vmhooks::signal_error(host, b"nope")?;
            Ok(())
        });
        let builder = MockInstanceBuilder::new()
            .with_contract(CODE_PARENT, parent_contract)
            .with_contract(CODE_CHILD, child_contract);
        let mut config = HostConfig::default();
        config.fault_policy.sync_exec = false;
        let mut host = VmHost::new(
            config,
            GasSchedule::uniform(1),
            Box::new(world.clone()),
            Box::new(builder),
        )
        .unwrap();

        let output = host.run_smart_contract_call(&call(parent(), "callChild"));
        assert_eq!(output.return_code, ReturnCode::Ok, "{}", output.return_message);
        assert_eq!(output.return_data, vec![vec![1]]);
        assert!(output
            .output_accounts
            .get(&child())
            .map_or(true, |account| account.storage_updates.is_empty()));
        assert_eq!(output.total_gas_accounted(), GAS);
    }

    #[test]
    fn test_same_context_writes_caller_storage() {
        let world = world();
        let parent_contract = MockContract::new().with_method("delegate", |host| {
            vmhooks::execute_on_same_context(host, 100_000, &child(), &BigInt::zero(), "store", vec![])?;
            Ok(())
        });
        let child_contract = MockContract::new().with_method("store", |host| {
            vmhooks::storage_store(host, b"shared", b"yes")?;
            Ok(())
        });
        let builder = MockInstanceBuilder::new()
            .with_contract(CODE_PARENT, parent_contract)
            .with_contract(CODE_CHILD, child_contract);
        let mut host = host(&world, builder);

        let output = host.run_smart_contract_call(&call(parent(), "delegate"));
        assert_eq!(output.return_code, ReturnCode::Ok, "{}", output.return_message);
        let parent_account = &output.output_accounts[&parent()];
        assert!(parent_account.storage_updates.contains_key(b"shared".as_slice()));
        assert_eq!(output.total_gas_accounted(), GAS);
    }

    #[test]
    fn test_upgrade_from_transaction() {
        let world = world();
        let builder = MockInstanceBuilder::new().with_contract(b"v2", MockContract::new());
        let mut host = host(&world, builder);

        let input = ContractCallInput::new(
            VMInput::new(owner(), GAS).with_arguments(vec![b"v2".to_vec(), vec![1, 0]]),
            parent(),
            UPGRADE_FUNCTION_NAME,
        );
        let output = host.run_smart_contract_call(&input);
        assert_eq!(output.return_code, ReturnCode::Ok, "{}", output.return_message);
        assert_eq!(output.output_accounts[&parent()].code, b"v2".to_vec());
    }

    #[test]
    fn test_upgrade_without_arguments_fails() {
        let world = world();
        let mut host = host(&world, MockInstanceBuilder::new());
        let output = host.run_smart_contract_call(&call(parent(), UPGRADE_FUNCTION_NAME));
        assert_eq!(output.return_code, ReturnCode::UpgradeFailed);
    }

    #[test]
    fn test_indirect_create_increases_nonce() {
        let world = world();
        let parent_contract = MockContract::new().with_method("deploy", |host| {
            let address = vmhooks::create_contract(
                host,
                200_000,
                &BigInt::zero(),
                b"new-code".to_vec(),
                vec![1, 0],
                vec![],
            )?;
            vmhooks::finish(host, address.map(|a| a.to_vec()).unwrap_or_default())?;
            Ok(())
        });
        let new_contract = MockContract::new().with_method("init", |_| Ok(()));
        let builder = MockInstanceBuilder::new()
            .with_contract(CODE_PARENT, parent_contract)
            .with_contract(b"new-code", new_contract);
        let mut host = host(&world, builder);

        let output = host.run_smart_contract_call(&call(parent(), "deploy"));
        assert_eq!(output.return_code, ReturnCode::Ok, "{}", output.return_message);
        let address = Address::from_slice(&output.return_data[0]).unwrap();
        assert_eq!(output.output_accounts[&address].code, b"new-code".to_vec());
        assert_eq!(output.output_accounts[&parent()].nonce, 1);
    }
}
