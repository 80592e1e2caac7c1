//! A token contract keeping balances in storage, driven through the
//! big integer host API.

mod common;

use common::{host_with, owner, parent, storage_update, world};
use num_bigint::BigInt;
use vmhost::gas_schedule::GasSchedule;
use vmhost::mock::{MockContract, MockInstanceBuilder};
use vmhost::types::{Address, ContractCallInput, ReturnCode, VMInput, VMOutput};
use vmhost::{vmhooks, HookResult, HostConfig, VmHost};

const CODE: &[u8] = b"token-code";
const GAS: u64 = 5_000_000_000;
const STORE_COST: u64 = 100;
const CALLER_COST: u64 = 7;

fn receiver() -> Address {
    Address::from_name("receiver")
}

fn transfer_token(host: &mut VmHost) -> HookResult<()> {
    let sender = vmhooks::get_caller(host)?;
    let Some(receiver) = vmhooks::get_argument(host, 0)? else {
        return vmhooks::signal_error(host, b"missing receiver");
    };

    let amount = vmhooks::big_int_new(host, 0)?;
    vmhooks::big_int_get_unsigned_argument(host, 1, amount)?;
    let sender_balance = vmhooks::big_int_new(host, 0)?;
    vmhooks::big_int_storage_load_unsigned(host, sender.as_bytes(), sender_balance)?;
    if vmhooks::big_int_cmp(host, sender_balance, amount)? < 0 {
        return vmhooks::signal_error(host, b"insufficient funds");
    }
    let receiver_balance = vmhooks::big_int_new(host, 0)?;
    vmhooks::big_int_storage_load_unsigned(host, &receiver, receiver_balance)?;

    vmhooks::big_int_sub(host, sender_balance, sender_balance, amount)?;
    vmhooks::big_int_add(host, receiver_balance, receiver_balance, amount)?;
    vmhooks::big_int_storage_store_unsigned(host, sender.as_bytes(), sender_balance)?;
    vmhooks::big_int_storage_store_unsigned(host, &receiver, receiver_balance)?;
    Ok(())
}

/// Only the calls that matter for the transfer cost anything.
fn schedule() -> GasSchedule {
    let mut schedule = GasSchedule::uniform(0);
    schedule.big_int_api_cost.big_int_storage_store_unsigned = STORE_COST;
    schedule.base_ops_api_cost.get_caller = CALLER_COST;
    schedule
}

fn run(amount: u8) -> VMOutput {
    let world = world();
    {
        let mut world = world.borrow_mut();
        world.add_contract(parent(), CODE.to_vec(), vec![1, 0], Some(owner()));
        world.set_storage(&parent(), owner().as_bytes(), &[100]);
    }
    let contract = MockContract::new().with_method("transferToken", transfer_token);
    let builder = MockInstanceBuilder::new().with_contract(CODE, contract);
    let mut host = host_with(&world, builder, HostConfig::default(), schedule());

    let vm_input = VMInput::new(owner(), GAS)
        .with_value(10)
        .with_arguments(vec![receiver().to_vec(), vec![amount]]);
    host.run_smart_contract_call(&ContractCallInput::new(vm_input, parent(), "transferToken"))
}

#[test]
fn test_transfer_token_moves_balance() {
    let output = run(1);
    assert_eq!(output.return_code, ReturnCode::Ok, "{}", output.return_message);
    assert_eq!(storage_update(&output, &parent(), owner().as_bytes()), Some(vec![99]));
    assert_eq!(storage_update(&output, &parent(), receiver().as_bytes()), Some(vec![1]));
    let schedule = schedule();
    let spent = 2 * schedule.big_int_api_cost.big_int_storage_store_unsigned
        + schedule.base_ops_api_cost.get_caller;
    assert_eq!(spent, 2 * STORE_COST + CALLER_COST);
    assert_eq!(output.gas_remaining, GAS - spent);
    assert_eq!(output.total_gas_accounted(), GAS);
    assert_eq!(output.balance_delta_sum(), BigInt::from(10));
    assert_eq!(output.output_accounts[&parent()].balance_delta, BigInt::from(10));
}

#[test]
fn test_transfer_token_refuses_overdraft() {
    let output = run(101);
    assert_eq!(output.return_code, ReturnCode::UserError);
    assert_eq!(output.return_message, "insufficient funds");
    assert!(output.output_accounts.is_empty());
}
