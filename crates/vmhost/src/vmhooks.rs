//! Host API exposed to contracts.
//!
//! Every function here charges its gas, does its work on the host contexts
//! and reports a suspended contract as `Err(Breakpoint)`. The functions take
//! and return plain Rust values; the `wasm` adapter marshals them to and
//! from linear memory, and mock contracts call them directly.

use crate::async_call::AsyncGeneratedCall;
use crate::call_args::CallArgsParser;
use crate::config::FaultPolicy;
use crate::error::VmHostError;
use crate::gas_schedule::GasSchedule;
use crate::host::VmHost;
use crate::instance::{Breakpoint, BreakpointValue, HookResult};
use num_bigint::{BigInt, Sign};
use num_traits::{ToPrimitive, Zero};
use std::cmp::Ordering;
use tracing::trace;
use vmhost_types::{
    Address, CallType, ContractCallInput, ContractCreateInput, DcdtTransfer, TokenType, VMInput,
};

/// Names of the host functions. Contracts may not export them.
pub const API_NAMES: &[&str] = &[
    "getSCAddress",
    "getOwnerAddress",
    "getCaller",
    "getCallValue",
    "getNumArguments",
    "getArgumentLength",
    "getArgument",
    "storageStore",
    "storageLoad",
    "storageLoadLength",
    "storageLoadFromAddress",
    "finish",
    "signalError",
    "getGasLeft",
    "writeLog",
    "getBlockNonce",
    "getBlockTimestamp",
    "getBlockRound",
    "getBlockEpoch",
    "getDCDTValue",
    "getDCDTTokenName",
    "transferValue",
    "transferDCDTExecute",
    "transferDCDTNFTExecute",
    "asyncCall",
    "createAsyncCall",
    "setAsyncContextCallback",
    "executeOnDestContext",
    "executeOnSameContext",
    "createContract",
    "upgradeContract",
    "int64getArgument",
    "int64finish",
    "int64storageStore",
    "int64storageLoad",
    "bigIntNew",
    "bigIntAdd",
    "bigIntSub",
    "bigIntMul",
    "bigIntCmp",
    "bigIntGetUnsignedArgument",
    "bigIntFinishUnsigned",
    "bigIntGetCallValue",
    "bigIntStorageStoreUnsigned",
    "bigIntStorageLoadUnsigned",
];

/// Operands longer than this pay an extra per-byte charge.
const MAX_BIG_INT_BYTE_LEN_FOR_NORMAL_COST: u64 = 32;

const HASH_LEN: u64 = 32;

/// Charge `gas` to the running contract and stop it once it has spent more
/// than it was given.
pub fn charge(host: &mut VmHost, gas: u64) -> HookResult<()> {
    host.metering.use_gas(&host.runtime, gas);
    if host.runtime.points_used() > host.metering.gas_for_execution() {
        host.runtime.set_breakpoint_value(BreakpointValue::OutOfGas);
        return Err(Breakpoint(BreakpointValue::OutOfGas));
    }
    Ok(())
}

/// Charge the price `cost` picks from the gas schedule.
fn charge_api<F>(host: &mut VmHost, cost: F) -> HookResult<()>
where
    F: FnOnce(&GasSchedule) -> u64,
{
    let gas = cost(host.metering.gas_schedule());
    charge(host, gas)
}

/// Host API group whose errors share a fault policy flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultGroup {
    BaseOps,
    BigIntOps,
    SyncExec,
}

impl FaultGroup {
    fn should_fail(self, policy: &FaultPolicy) -> bool {
        match self {
            FaultGroup::BaseOps => policy.base_ops,
            FaultGroup::BigIntOps => policy.big_int_ops,
            FaultGroup::SyncExec => policy.sync_exec,
        }
    }
}

/// Apply the fault policy to a failed API call: either abort the contract
/// with all its gas consumed, or carry on with `fallback`.
pub fn with_fault<T>(
    host: &mut VmHost,
    err: VmHostError,
    group: FaultGroup,
    fallback: T,
) -> HookResult<T> {
    if !group.should_fail(&host.config.fault_policy) {
        trace!(error = %err, ?group, "host api error ignored");
        return Ok(fallback);
    }
    let gas_left = host.metering.gas_left(&host.runtime);
    host.metering.use_gas(&host.runtime, gas_left);
    host.runtime.fail_execution(&mut host.output, Some(&err));
    Err(Breakpoint(BreakpointValue::ExecutionFailed))
}

/// `value` unless a breakpoint was raised while producing it.
fn resume<T>(host: &VmHost, value: T) -> HookResult<T> {
    match host.runtime.breakpoint_value() {
        BreakpointValue::None => Ok(value),
        breakpoint => Err(Breakpoint(breakpoint)),
    }
}

fn data_copy_cost(host: &VmHost, len: usize) -> u64 {
    host.metering
        .gas_schedule()
        .base_operation_cost
        .data_copy_per_byte
        .saturating_mul(len as u64)
}

fn persist_cost(host: &VmHost, len: usize) -> u64 {
    host.metering
        .gas_schedule()
        .base_operation_cost
        .persist_per_byte
        .saturating_mul(len as u64)
}

// Context

pub fn get_sc_address(host: &mut VmHost) -> HookResult<Address> {
    charge_api(host, |cost| cost.base_ops_api_cost.get_sc_address)?;
    Ok(host.runtime.sc_address())
}

pub fn get_owner_address(host: &mut VmHost) -> HookResult<Address> {
    charge_api(host, |cost| cost.base_ops_api_cost.get_owner_address)?;
    let owner = host
        .blockchain
        .get_user_account(&host.runtime.sc_address())
        .map(|account| account.owner_address.unwrap_or_default());
    match owner {
        Ok(owner) => Ok(owner),
        Err(err) => with_fault(host, err, FaultGroup::BaseOps, Address::ZERO),
    }
}

pub fn get_caller(host: &mut VmHost) -> HookResult<Address> {
    charge_api(host, |cost| cost.base_ops_api_cost.get_caller)?;
    Ok(host.runtime.vm_input().caller_addr)
}

pub fn get_call_value(host: &mut VmHost) -> HookResult<BigInt> {
    charge_api(host, |cost| cost.base_ops_api_cost.get_call_value)?;
    Ok(host.runtime.vm_input().call_value.clone())
}

pub fn get_num_arguments(host: &mut VmHost) -> HookResult<i32> {
    charge_api(host, |cost| cost.base_ops_api_cost.get_num_arguments)?;
    Ok(host.runtime.arguments().len() as i32)
}

fn argument(host: &VmHost, id: i32) -> Option<Vec<u8>> {
    usize::try_from(id)
        .ok()
        .and_then(|id| host.runtime.arguments().get(id))
        .cloned()
}

/// Argument `id`, or `None` when there is no such argument.
pub fn get_argument(host: &mut VmHost, id: i32) -> HookResult<Option<Vec<u8>>> {
    charge_api(host, |cost| cost.base_ops_api_cost.get_argument)?;
    match argument(host, id) {
        Some(arg) => Ok(Some(arg)),
        None => with_fault(host, VmHostError::ArgIndexOutOfRange, FaultGroup::BaseOps, None),
    }
}

pub fn get_argument_length(host: &mut VmHost, id: i32) -> HookResult<i32> {
    charge_api(host, |cost| cost.base_ops_api_cost.get_argument)?;
    match argument(host, id) {
        Some(arg) => Ok(arg.len() as i32),
        None => with_fault(host, VmHostError::ArgIndexOutOfRange, FaultGroup::BaseOps, -1),
    }
}

// Storage

pub fn storage_store(host: &mut VmHost, key: &[u8], value: &[u8]) -> HookResult<i32> {
    charge_api(host, |cost| cost.base_ops_api_cost.storage_store)?;
    let status = host.set_storage(key, value);
    match status {
        Ok(status) => resume(host, status.as_i32()),
        Err(err) => with_fault(host, err, FaultGroup::BaseOps, -1),
    }
}

pub fn storage_load(host: &mut VmHost, key: &[u8]) -> HookResult<Vec<u8>> {
    charge_api(host, |cost| cost.base_ops_api_cost.storage_load)?;
    let value = host.get_storage(key);
    resume(host, value)
}

pub fn storage_load_length(host: &mut VmHost, key: &[u8]) -> HookResult<i32> {
    charge_api(host, |cost| cost.base_ops_api_cost.storage_load)?;
    Ok(host.get_storage_unmetered(key).len() as i32)
}

pub fn storage_load_from_address(
    host: &mut VmHost,
    address: &Address,
    key: &[u8],
) -> HookResult<Vec<u8>> {
    charge_api(host, |cost| cost.base_ops_api_cost.storage_load)?;
    let value = host.get_storage_from_address(address, key);
    resume(host, value)
}

// Output

pub fn finish(host: &mut VmHost, data: Vec<u8>) -> HookResult<()> {
    let gas = host
        .metering
        .gas_schedule()
        .base_ops_api_cost
        .finish
        .saturating_add(persist_cost(host, data.len()));
    charge(host, gas)?;
    host.output.finish(data);
    Ok(())
}

/// Reject the call with a user error. Always suspends the contract.
pub fn signal_error(host: &mut VmHost, message: &[u8]) -> HookResult<()> {
    let gas = host
        .metering
        .gas_schedule()
        .base_ops_api_cost
        .signal_error
        .saturating_add(persist_cost(host, message.len()));
    charge(host, gas)?;
    let message = String::from_utf8_lossy(message);
    host.runtime.signal_user_error(&mut host.output, &message);
    Err(Breakpoint(BreakpointValue::SignalError))
}

pub fn get_gas_left(host: &mut VmHost) -> HookResult<i64> {
    charge_api(host, |cost| cost.base_ops_api_cost.get_gas_left)?;
    Ok(host.metering.gas_left(&host.runtime) as i64)
}

pub fn write_log(host: &mut VmHost, topics: Vec<Vec<u8>>, data: Vec<u8>) -> HookResult<()> {
    let topics_len = (topics.len() as u64).saturating_mul(HASH_LEN);
    let gas = host
        .metering
        .gas_schedule()
        .base_ops_api_cost
        .log
        .saturating_add(data_copy_cost(host, data.len()))
        .saturating_add(data_copy_cost(host, topics_len as usize));
    charge(host, gas)?;
    let address = host.runtime.sc_address();
    host.output.write_log(&address, topics, data);
    Ok(())
}

// Block information

fn charge_block_info(host: &mut VmHost) -> HookResult<()> {
    charge_api(host, |cost| cost.base_ops_api_cost.get_block_info)
}

pub fn get_block_nonce(host: &mut VmHost) -> HookResult<i64> {
    charge_block_info(host)?;
    Ok(host.blockchain.block_info().nonce as i64)
}

pub fn get_block_timestamp(host: &mut VmHost) -> HookResult<i64> {
    charge_block_info(host)?;
    Ok(host.blockchain.block_info().timestamp as i64)
}

pub fn get_block_round(host: &mut VmHost) -> HookResult<i64> {
    charge_block_info(host)?;
    Ok(host.blockchain.block_info().round as i64)
}

pub fn get_block_epoch(host: &mut VmHost) -> HookResult<i64> {
    charge_block_info(host)?;
    Ok(host.blockchain.block_info().epoch as i64)
}

// Tokens

fn first_dcdt_transfer(host: &VmHost) -> DcdtTransfer {
    host.runtime
        .vm_input()
        .dcdt_transfers
        .first()
        .cloned()
        .unwrap_or_default()
}

pub fn get_dcdt_value(host: &mut VmHost) -> HookResult<BigInt> {
    charge_api(host, |cost| cost.base_ops_api_cost.get_call_value)?;
    Ok(first_dcdt_transfer(host).value)
}

pub fn get_dcdt_token_name(host: &mut VmHost) -> HookResult<Vec<u8>> {
    charge_api(host, |cost| cost.base_ops_api_cost.get_call_value)?;
    Ok(first_dcdt_transfer(host).token_name)
}

// Calls

fn is_builtin_function_call(host: &VmHost, data: &[u8]) -> bool {
    CallArgsParser::parse_data(data)
        .map(|(function, _)| host.is_builtin_function_name(&function))
        .unwrap_or(false)
}

/// Send value, and optionally call data, to `destination` as an outgoing
/// transfer. Returns 0 on success and 1 on failure.
pub fn transfer_value(
    host: &mut VmHost,
    destination: &Address,
    value: &BigInt,
    data: Vec<u8>,
) -> HookResult<i32> {
    charge_api(host, |cost| cost.base_ops_api_cost.transfer_value)?;
    let gas = persist_cost(host, data.len());
    charge(host, gas)?;

    if is_builtin_function_call(host, &data) {
        return with_fault(host, VmHostError::TransferValueOnDcdtCall, FaultGroup::BaseOps, 1);
    }

    let sender = host.runtime.sc_address();
    let result = host.output.transfer(
        &host.blockchain,
        destination,
        &sender,
        0,
        0,
        value,
        data,
        CallType::DirectCall,
    );
    match result {
        Ok(()) => Ok(0),
        Err(err) => with_fault(host, err, FaultGroup::BaseOps, 1),
    }
}

/// Build the input of a call made by the running contract, charging for
/// the copied call data and clamping the gas to what is left.
#[allow(clippy::too_many_arguments)]
fn prepare_indirect_call_input(
    host: &mut VmHost,
    sender: Address,
    value: BigInt,
    gas_limit: i64,
    destination: Address,
    function: &str,
    arguments: Vec<Vec<u8>>,
    sync_execution_required: bool,
) -> Result<ContractCallInput, VmHostError> {
    if sync_execution_required && !host.are_in_same_shard(&sender, &destination) {
        return Err(VmHostError::SyncExecutionNotInSameShard);
    }

    let data_len = function.len() + arguments.iter().map(Vec::len).sum::<usize>();
    let gas = data_copy_cost(host, data_len);
    host.metering.use_gas(&host.runtime, gas);

    let parent = host.runtime.vm_input();
    let mut vm_input = VMInput::new(sender, host.metering.bound_gas_limit(&host.runtime, gas_limit))
        .with_arguments(arguments)
        .with_value(value)
        .with_tx_hashes(&parent.original_tx_hash, &parent.current_tx_hash);
    vm_input.gas_price = parent.gas_price;
    Ok(ContractCallInput::new(vm_input, destination, function))
}

/// Run `function` on `destination` in a fresh context. Returns 0 on
/// success and 1 on failure.
pub fn execute_on_dest_context(
    host: &mut VmHost,
    gas_limit: i64,
    destination: &Address,
    value: &BigInt,
    function: &str,
    arguments: Vec<Vec<u8>>,
) -> HookResult<i32> {
    charge_api(host, |cost| cost.base_ops_api_cost.execute_on_dest_context)?;
    let sender = host.runtime.sc_address();
    let input = prepare_indirect_call_input(
        host,
        sender,
        value.clone(),
        gas_limit,
        *destination,
        function,
        arguments,
        true,
    );
    let input = match input {
        Ok(input) => input,
        Err(err) => return with_fault(host, err, FaultGroup::SyncExec, 1),
    };

    let (_, result) = host.execute_on_dest_context(input);
    match result {
        Ok(_) => resume(host, 0),
        Err(err) => with_fault(host, err, FaultGroup::SyncExec, 1),
    }
}

/// Run `function` of `destination` over the caller's storage and output.
pub fn execute_on_same_context(
    host: &mut VmHost,
    gas_limit: i64,
    destination: &Address,
    value: &BigInt,
    function: &str,
    arguments: Vec<Vec<u8>>,
) -> HookResult<i32> {
    charge_api(host, |cost| cost.base_ops_api_cost.execute_on_same_context)?;
    let sender = host.runtime.sc_address();
    let input = prepare_indirect_call_input(
        host,
        sender,
        value.clone(),
        gas_limit,
        *destination,
        function,
        arguments,
        true,
    );
    let input = match input {
        Ok(input) => input,
        Err(err) => return with_fault(host, err, FaultGroup::SyncExec, 1),
    };

    match host.execute_on_same_context(input) {
        Ok(()) => resume(host, 0),
        Err(err) => with_fault(host, err, FaultGroup::SyncExec, 1),
    }
}

/// Deploy a new contract from the running one. Returns its address, or
/// `None` when the deployment failed.
pub fn create_contract(
    host: &mut VmHost,
    gas_limit: i64,
    value: &BigInt,
    code: Vec<u8>,
    code_metadata: Vec<u8>,
    arguments: Vec<Vec<u8>>,
) -> HookResult<Option<Address>> {
    charge_api(host, |cost| cost.base_ops_api_cost.create_contract)?;
    let sender = host.runtime.sc_address();
    let parent = host.runtime.vm_input();
    let mut vm_input = VMInput::new(sender, host.metering.bound_gas_limit(&host.runtime, gas_limit))
        .with_arguments(arguments)
        .with_value(value.clone())
        .with_tx_hashes(&parent.original_tx_hash, &parent.current_tx_hash);
    vm_input.gas_price = parent.gas_price;
    let input = ContractCreateInput::new(vm_input, code, code_metadata);

    match host.create_new_contract(input) {
        Ok(address) => resume(host, Some(address)),
        Err(err) => with_fault(host, err, FaultGroup::SyncExec, None),
    }
}

/// Replace the code of `destination`, which must be upgradeable and owned
/// by the running contract.
#[allow(clippy::too_many_arguments)]
pub fn upgrade_contract(
    host: &mut VmHost,
    destination: &Address,
    gas_limit: i64,
    value: &BigInt,
    code: Vec<u8>,
    code_metadata: Vec<u8>,
    arguments: Vec<Vec<u8>>,
) -> HookResult<i32> {
    charge_api(host, |cost| cost.base_ops_api_cost.create_contract)?;
    let mut upgrade_arguments = vec![code, code_metadata];
    upgrade_arguments.extend(arguments);

    let sender = host.runtime.sc_address();
    let input = prepare_indirect_call_input(
        host,
        sender,
        value.clone(),
        gas_limit,
        *destination,
        crate::UPGRADE_FUNCTION_NAME,
        upgrade_arguments,
        true,
    );
    let input = match input {
        Ok(input) => input,
        Err(err) => return with_fault(host, err, FaultGroup::SyncExec, 1),
    };

    let (_, result) = host.execute_on_dest_context(input);
    match result {
        Ok(_) => resume(host, 0),
        Err(err) => {
            host.runtime.add_error(err.clone());
            with_fault(host, err, FaultGroup::SyncExec, 1)
        }
    }
}

/// Send tokens to `destination` and, when `function` is given and the
/// destination is a contract in this shard, call it with the tokens.
#[allow(clippy::too_many_arguments)]
pub fn transfer_dcdt_execute(
    host: &mut VmHost,
    destination: &Address,
    token_name: &[u8],
    nonce: u64,
    value: &BigInt,
    gas_limit: i64,
    function: &str,
    arguments: Vec<Vec<u8>>,
) -> HookResult<i32> {
    charge_api(host, |cost| cost.base_ops_api_cost.transfer_value)?;
    let sender = host.runtime.sc_address();

    let mut call_input = None;
    if !function.is_empty() {
        let input = prepare_indirect_call_input(
            host,
            sender,
            BigInt::zero(),
            gas_limit,
            *destination,
            function,
            arguments,
            false,
        );
        match input {
            Ok(mut input) => {
                input.vm_input.dcdt_transfers = vec![DcdtTransfer {
                    token_name: token_name.to_vec(),
                    token_nonce: nonce,
                    value: value.clone(),
                    token_type: if nonce > 0 {
                        TokenType::NonFungible
                    } else {
                        TokenType::Fungible
                    },
                }];
                call_input = Some(input);
            }
            Err(err) => return with_fault(host, err, FaultGroup::BaseOps, 1),
        }
    }

    let snapshot = host.blockchain.hook().get_snapshot();
    let transferred =
        host.transfer_dcdt(destination, &sender, token_name, nonce, value, call_input.as_ref());
    if let Err(err) = transferred {
        return with_fault(host, err, FaultGroup::BaseOps, 1);
    }

    let Some(input) = call_input else {
        return resume(host, 0);
    };
    if !host.are_in_same_shard(&sender, destination) || !host.blockchain.is_smart_contract(destination) {
        return resume(host, 0);
    }

    trace!(dest = %destination, function, "token transfer execution begin");
    let (_, result) = host.execute_on_dest_context(input);
    match result {
        Ok(_) => resume(host, 0),
        Err(err) => {
            trace!(error = %err, "token transfer execution failed");
            host.blockchain.hook_mut().revert_to_snapshot(snapshot);
            with_fault(host, err, FaultGroup::BaseOps, 1)
        }
    }
}

/// Request a legacy async call and suspend the contract.
pub fn async_call(
    host: &mut VmHost,
    destination: &Address,
    value: &BigInt,
    data: Vec<u8>,
) -> HookResult<()> {
    charge_api(host, |cost| cost.base_ops_api_cost.async_call_step)?;
    let gas = data_copy_cost(host, data.len());
    charge(host, gas)?;

    let value_bytes = value.to_bytes_be().1;
    match host
        .runtime
        .execute_async_call(&host.metering, *destination, data, value_bytes)
    {
        Ok(()) => resume(host, ()),
        Err(VmHostError::NotEnoughGas) => {
            host.runtime.set_breakpoint_value(BreakpointValue::OutOfGas);
            Err(Breakpoint(BreakpointValue::OutOfGas))
        }
        Err(err) => with_fault(host, err, FaultGroup::BaseOps, ()),
    }
}

/// Add a call to the async batch of the running contract. The contract
/// keeps running; the batch is processed when it returns.
#[allow(clippy::too_many_arguments)]
pub fn create_async_call(
    host: &mut VmHost,
    context_identifier: &[u8],
    destination: &Address,
    value: &BigInt,
    data: Vec<u8>,
    success_callback: &str,
    error_callback: &str,
    gas: i64,
) -> HookResult<()> {
    charge_api(host, |cost| cost.base_ops_api_cost.async_call_step)?;
    let copy_gas = data_copy_cost(host, data.len());
    charge(host, copy_gas)?;

    let call = AsyncGeneratedCall {
        destination: *destination,
        data,
        value_bytes: value.to_bytes_be().1,
        success_callback: success_callback.to_string(),
        error_callback: error_callback.to_string(),
        provided_gas: gas.max(0) as u64,
        ..Default::default()
    };
    host.runtime.add_async_context_call(context_identifier, call);
    Ok(())
}

pub fn set_async_context_callback(
    host: &mut VmHost,
    context_identifier: &[u8],
    callback: &str,
) -> HookResult<()> {
    charge_api(host, |cost| cost.base_ops_api_cost.async_call_step)?;
    match host
        .runtime
        .set_async_context_callback(context_identifier, callback)
    {
        Ok(()) => Ok(()),
        Err(err) => with_fault(host, err, FaultGroup::BaseOps, ()),
    }
}

// Small integers

fn signed_bytes(value: &BigInt) -> Vec<u8> {
    if value.is_zero() {
        return Vec::new();
    }
    value.to_signed_bytes_be()
}

pub fn int64_get_argument(host: &mut VmHost, id: i32) -> HookResult<i64> {
    charge_api(host, |cost| cost.base_ops_api_cost.int64_get_argument)?;
    let Some(arg) = argument(host, id) else {
        return with_fault(host, VmHostError::ArgIndexOutOfRange, FaultGroup::BaseOps, 0);
    };
    match BigInt::from_signed_bytes_be(&arg).to_i64() {
        Some(value) => Ok(value),
        None => with_fault(host, VmHostError::ArgOutOfRange, FaultGroup::BaseOps, 0),
    }
}

pub fn int64_finish(host: &mut VmHost, value: i64) -> HookResult<()> {
    charge_api(host, |cost| cost.base_ops_api_cost.int64_finish)?;
    host.output.finish(signed_bytes(&BigInt::from(value)));
    Ok(())
}

/// Store the unsigned interpretation of `value`.
pub fn int64_storage_store(host: &mut VmHost, key: &[u8], value: i64) -> HookResult<i32> {
    charge_api(host, |cost| cost.base_ops_api_cost.int64_storage_store)?;
    let bytes = unsigned_bytes(&BigInt::from(value as u64));
    match host.set_storage(key, &bytes) {
        Ok(status) => resume(host, status.as_i32()),
        Err(err) => with_fault(host, err, FaultGroup::BaseOps, -1),
    }
}

pub fn int64_storage_load(host: &mut VmHost, key: &[u8]) -> HookResult<i64> {
    charge_api(host, |cost| cost.base_ops_api_cost.int64_storage_load)?;
    let data = host.get_storage(key);
    match BigInt::from_bytes_be(Sign::Plus, &data).to_u64() {
        Some(value) => resume(host, value as i64),
        None => with_fault(host, VmHostError::StorageValueOutOfRange, FaultGroup::BaseOps, 0),
    }
}

// Big integers

fn charge_big_int_operands(host: &mut VmHost, operands: &[&BigInt]) -> HookResult<()> {
    for operand in operands {
        let byte_len = operand.bits() / 8;
        if byte_len > MAX_BIG_INT_BYTE_LEN_FOR_NORMAL_COST {
            let gas = data_copy_cost(host, byte_len as usize);
            charge(host, gas)?;
        }
    }
    Ok(())
}

pub fn big_int_new(host: &mut VmHost, small_value: i64) -> HookResult<i32> {
    charge_api(host, |cost| cost.big_int_api_cost.big_int_new)?;
    Ok(host.bigint.put(small_value))
}

fn big_int_binary_op<F>(
    host: &mut VmHost,
    gas: u64,
    destination: i32,
    op1: i32,
    op2: i32,
    op: F,
) -> HookResult<()>
where
    F: FnOnce(&BigInt, &BigInt) -> BigInt,
{
    charge(host, gas)?;
    let dest = host.bigint.get(destination);
    let a = host.bigint.get(op1);
    let b = host.bigint.get(op2);
    charge_big_int_operands(host, &[&dest, &a, &b])?;
    host.bigint.set(destination, op(&a, &b));
    Ok(())
}

pub fn big_int_add(host: &mut VmHost, destination: i32, op1: i32, op2: i32) -> HookResult<()> {
    let gas = host.metering.gas_schedule().big_int_api_cost.big_int_add;
    big_int_binary_op(host, gas, destination, op1, op2, |a, b| a + b)
}

pub fn big_int_sub(host: &mut VmHost, destination: i32, op1: i32, op2: i32) -> HookResult<()> {
    let gas = host.metering.gas_schedule().big_int_api_cost.big_int_sub;
    big_int_binary_op(host, gas, destination, op1, op2, |a, b| a - b)
}

pub fn big_int_mul(host: &mut VmHost, destination: i32, op1: i32, op2: i32) -> HookResult<()> {
    let gas = host.metering.gas_schedule().big_int_api_cost.big_int_mul;
    big_int_binary_op(host, gas, destination, op1, op2, |a, b| a * b)
}

pub fn big_int_cmp(host: &mut VmHost, op1: i32, op2: i32) -> HookResult<i32> {
    charge_api(host, |cost| cost.big_int_api_cost.big_int_cmp)?;
    let a = host.bigint.get(op1);
    let b = host.bigint.get(op2);
    charge_big_int_operands(host, &[&a, &b])?;
    Ok(match a.cmp(&b) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    })
}

/// Load argument `id` into `destination`. Missing arguments leave the
/// handle untouched.
pub fn big_int_get_unsigned_argument(host: &mut VmHost, id: i32, destination: i32) -> HookResult<()> {
    charge_api(host, |cost| cost.big_int_api_cost.big_int_get_unsigned_argument)?;
    if let Some(arg) = argument(host, id) {
        host.bigint
            .set(destination, BigInt::from_bytes_be(Sign::Plus, &arg));
    }
    Ok(())
}

pub fn big_int_finish_unsigned(host: &mut VmHost, reference: i32) -> HookResult<()> {
    charge_api(host, |cost| cost.big_int_api_cost.big_int_finish_unsigned)?;
    let bytes = unsigned_bytes(&host.bigint.get(reference));
    let gas = persist_cost(host, bytes.len());
    host.output.finish(bytes);
    charge(host, gas)
}

pub fn big_int_get_call_value(host: &mut VmHost, destination: i32) -> HookResult<()> {
    charge_api(host, |cost| cost.big_int_api_cost.big_int_get_call_value)?;
    let value = host.runtime.vm_input().call_value.clone();
    host.bigint.set(destination, value);
    Ok(())
}

pub fn big_int_storage_store_unsigned(host: &mut VmHost, key: &[u8], source: i32) -> HookResult<i32> {
    charge_api(host, |cost| cost.big_int_api_cost.big_int_storage_store_unsigned)?;
    let bytes = unsigned_bytes(&host.bigint.get(source));
    match host.set_storage(key, &bytes) {
        Ok(status) => resume(host, status.as_i32()),
        Err(err) => with_fault(host, err, FaultGroup::BigIntOps, -1),
    }
}

pub fn big_int_storage_load_unsigned(host: &mut VmHost, key: &[u8], destination: i32) -> HookResult<i32> {
    charge_api(host, |cost| cost.big_int_api_cost.big_int_storage_load_unsigned)?;
    let bytes = host.get_storage(key);
    host.bigint
        .set(destination, BigInt::from_bytes_be(Sign::Plus, &bytes));
    resume(host, bytes.len() as i32)
}

/// Magnitude as minimal big-endian bytes; zero is empty.
fn unsigned_bytes(value: &BigInt) -> Vec<u8> {
    if value.is_zero() {
        return Vec::new();
    }
    value.magnitude().to_bytes_be()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockInstanceBuilder, MockWorld};
    use crate::{GasSchedule, HostConfig, StorageStatus};
    use vmhost_types::UserAccount;

    fn sc() -> Address {
        Address::from_name("sc")
    }

    fn user() -> Address {
        Address::from_name("user")
    }

    fn host_with(config: HostConfig, input: VMInput) -> VmHost {
        let mut world = MockWorld::new();
        world.add_account(UserAccount {
            address: sc(),
            balance: BigInt::from(1_000),
            owner_address: Some(user()),
            ..Default::default()
        });
        world.add_account(UserAccount {
            address: user(),
            ..Default::default()
        });
        let mut host = VmHost::new(
            config,
            GasSchedule::uniform(1),
            Box::new(world),
            Box::new(MockInstanceBuilder::new()),
        )
        .unwrap();
        host.init_state();
        host.runtime.init_state_from_input(&input);
        host.runtime.set_sc_address(sc());
        host.storage.set_address(sc());
        host.runtime.set_instance_for_test(input.gas_provided);
        host.metering.init_state_from_input(&input, &Default::default());
        host
    }

    fn host() -> VmHost {
        let input = VMInput::new(user(), 1_000)
            .with_value(7)
            .with_arguments(vec![vec![1, 2], vec![0xff]]);
        host_with(HostConfig::default(), input)
    }

    #[test]
    fn test_context_getters_charge_gas() {
        let mut host = host();
        assert_eq!(get_sc_address(&mut host).unwrap(), sc());
        assert_eq!(get_caller(&mut host).unwrap(), user());
        assert_eq!(get_owner_address(&mut host).unwrap(), user());
        assert_eq!(get_call_value(&mut host).unwrap(), BigInt::from(7));
        assert_eq!(get_num_arguments(&mut host).unwrap(), 2);
        assert_eq!(host.runtime.points_used(), 5);
    }

    #[test]
    fn test_argument_out_of_range_follows_fault_policy() {
        let mut host = host();
        assert_eq!(get_argument(&mut host, 1).unwrap(), Some(vec![0xff]));
        assert_eq!(get_argument_length(&mut host, 0).unwrap(), 2);

        assert_eq!(
            get_argument(&mut host, 5),
            Err(Breakpoint(BreakpointValue::ExecutionFailed))
        );
        assert_eq!(host.metering.gas_left(&host.runtime), 0);
        assert_eq!(host.output.return_message(), "argument index out of range");

        let mut config = HostConfig::default();
        config.fault_policy.base_ops = false;
        let mut host = host_with(config, VMInput::new(user(), 1_000));
        assert_eq!(get_argument_length(&mut host, -1).unwrap(), -1);
        assert!(host.runtime.breakpoint_value().is_none());
    }

    #[test]
    fn test_out_of_gas_breakpoint() {
        let mut host = host_with(HostConfig::default(), VMInput::new(user(), 3));
        finish(&mut host, vec![1]).unwrap();
        assert_eq!(
            finish(&mut host, vec![1]),
            Err(Breakpoint(BreakpointValue::OutOfGas))
        );
        assert_eq!(host.runtime.breakpoint_value(), BreakpointValue::OutOfGas);
    }

    #[test]
    fn test_signal_error_suspends() {
        let mut host = host();
        assert_eq!(
            signal_error(&mut host, b"bad input"),
            Err(Breakpoint(BreakpointValue::SignalError))
        );
        assert_eq!(host.output.return_message(), "bad input");
        assert_eq!(host.output.return_code(), vmhost_types::ReturnCode::UserError);
    }

    #[test]
    fn test_storage_hooks() {
        let mut host = host();
        assert_eq!(
            storage_store(&mut host, b"key", b"abc").unwrap(),
            StorageStatus::Added.as_i32()
        );
        assert_eq!(storage_load(&mut host, b"key").unwrap(), b"abc".to_vec());
        assert_eq!(storage_load_length(&mut host, b"key").unwrap(), 3);
        assert_eq!(
            storage_store(&mut host, b"VMHOST@key", b"x"),
            Err(Breakpoint(BreakpointValue::ExecutionFailed))
        );
    }

    #[test]
    fn test_int64_hooks() {
        let input = VMInput::new(user(), 100_000).with_arguments(vec![vec![0xff], vec![1; 9]]);
        let mut host = host_with(HostConfig::default(), input);
        assert_eq!(int64_get_argument(&mut host, 0).unwrap(), -1);

        int64_storage_store(&mut host, b"n", 300).unwrap();
        assert_eq!(int64_storage_load(&mut host, b"n").unwrap(), 300);
        int64_finish(&mut host, -2).unwrap();
        assert_eq!(host.output.return_data(), &[vec![0xfe]]);

        assert_eq!(
            int64_get_argument(&mut host, 1),
            Err(Breakpoint(BreakpointValue::ExecutionFailed))
        );
    }

    #[test]
    fn test_big_int_hooks() {
        let input = VMInput::new(user(), 100_000)
            .with_value(5)
            .with_arguments(vec![vec![0x01, 0x00]]);
        let mut host = host_with(HostConfig::default(), input);
        let a = big_int_new(&mut host, 0).unwrap();
        let b = big_int_new(&mut host, 0).unwrap();
        big_int_get_unsigned_argument(&mut host, 0, a).unwrap();
        big_int_get_call_value(&mut host, b).unwrap();
        big_int_add(&mut host, a, a, b).unwrap();
        assert_eq!(host.bigint.get(a), BigInt::from(261));
        big_int_mul(&mut host, b, b, b).unwrap();
        big_int_sub(&mut host, b, b, a).unwrap();
        assert_eq!(big_int_cmp(&mut host, b, a).unwrap(), -1);

        big_int_storage_store_unsigned(&mut host, b"total", a).unwrap();
        let c = big_int_new(&mut host, 0).unwrap();
        assert_eq!(big_int_storage_load_unsigned(&mut host, b"total", c).unwrap(), 2);
        big_int_finish_unsigned(&mut host, c).unwrap();
        assert_eq!(host.output.return_data(), &[vec![0x01, 0x05]]);
    }

    #[test]
    fn test_transfer_value_records_transfer() {
        let mut host = host();
        let dest = Address::from_name("dest");
        assert_eq!(
            transfer_value(&mut host, &dest, &BigInt::from(10), b"hello".to_vec()).unwrap(),
            0
        );
        let account = host.output.output_account(&dest).unwrap();
        assert_eq!(account.output_transfers.len(), 1);
        assert_eq!(account.balance_delta, BigInt::from(10));

        assert_eq!(
            transfer_value(&mut host, &dest, &BigInt::from(10), b"DCDTTransfer@01".to_vec()),
            Err(Breakpoint(BreakpointValue::ExecutionFailed))
        );
    }

    #[test]
    fn test_async_call_suspends_with_descriptor() {
        let mut host = host_with(HostConfig::default(), VMInput::new(user(), 10_000));
        let dest = Address::from_name("dest");
        assert_eq!(
            async_call(&mut host, &dest, &BigInt::from(3), b"ping".to_vec()),
            Err(Breakpoint(BreakpointValue::AsyncCall))
        );
        let info = host.runtime.async_call_info().unwrap();
        assert_eq!(info.destination, dest);
        assert_eq!(info.value_bytes, vec![3]);
    }

    #[test]
    fn test_create_async_call_and_callback() {
        let mut host = host();
        let dest = Address::from_name("dest");
        create_async_call(&mut host, b"ctx", &dest, &BigInt::zero(), b"f".to_vec(), "ok", "err", 0)
            .unwrap();
        set_async_context_callback(&mut host, b"ctx", "done").unwrap();
        let context = host.runtime.get_async_context(b"ctx").unwrap();
        assert_eq!(context.callback, "done");
        assert_eq!(context.calls.len(), 1);

        assert_eq!(
            set_async_context_callback(&mut host, b"nope", "done"),
            Err(Breakpoint(BreakpointValue::ExecutionFailed))
        );
    }

    #[test]
    fn test_write_log_and_block_info() {
        let mut host = host();
        write_log(&mut host, vec![b"event".to_vec(), b"topic".to_vec()], b"data".to_vec())
            .unwrap();
        assert_eq!(get_block_nonce(&mut host).unwrap(), 0);
        let output = host.get_vm_output();
        assert_eq!(output.logs.len(), 1);
        assert_eq!(output.logs[0].identifier, b"event".to_vec());
    }
}
