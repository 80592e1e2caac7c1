//! Gas and balance conservation over nested destination-context calls.

mod common;

use common::{host, owner, world};
use num_bigint::BigInt;
use proptest::prelude::*;
use vmhost::mock::{MockContract, MockInstanceBuilder};
use vmhost::types::{Address, ContractCallInput, VMInput};
use vmhost::vmhooks;

const RELAY_CODE: &[u8] = b"relay-code";

fn relay_address(depth: u8) -> Address {
    Address::from_name(&format!("relay{depth}"))
}

/// Each relay stores its depth and, above depth zero, forwards half of its
/// gas and one unit of value to the relay one level down.
fn relay_contract() -> MockContract {
    MockContract::new().with_method("relay", |host| {
        let depth = host
            .runtime()
            .arguments()
            .first()
            .and_then(|argument| argument.first())
            .copied()
            .unwrap_or(0);
        vmhooks::storage_store(host, b"depth", &[depth + 1])?;
        if depth > 0 {
            let gas = vmhooks::get_gas_left(host)? / 2;
            let next = relay_address(depth - 1);
            vmhooks::execute_on_dest_context(
                host,
                gas,
                &next,
                &BigInt::from(1),
                "relay",
                vec![vec![depth - 1]],
            )?;
        }
        vmhooks::finish(host, vec![depth])?;
        Ok(())
    })
}

fn run_relay_chain(depth: u8, gas: u64, value: u64) -> vmhost::types::VMOutput {
    let world = world();
    for level in 0..=depth {
        let mut world = world.borrow_mut();
        world.add_contract(relay_address(level), RELAY_CODE.to_vec(), vec![1, 0], Some(owner()));
        world.set_balance(&relay_address(level), 10);
    }
    let builder = MockInstanceBuilder::new().with_contract(RELAY_CODE, relay_contract());
    let mut host = host(&world, builder);

    let vm_input = VMInput::new(owner(), gas)
        .with_value(value)
        .with_arguments(vec![vec![depth]]);
    host.run_smart_contract_call(&ContractCallInput::new(vm_input, relay_address(depth), "relay"))
}

#[test]
fn test_every_level_reports_its_output() {
    let output = run_relay_chain(3, 1_000_000, 7);
    assert!(output.return_code.is_ok(), "{}", output.return_message);
    assert_eq!(output.return_data, vec![vec![0], vec![1], vec![2], vec![3]]);
    for level in 0..=3 {
        let account = &output.output_accounts[&relay_address(level)];
        assert_eq!(account.storage_updates[b"depth".as_slice()].data, vec![level + 1]);
    }
    assert_eq!(output.output_accounts[&relay_address(3)].balance_delta, BigInt::from(6));
    assert_eq!(output.output_accounts[&relay_address(0)].balance_delta, BigInt::from(1));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_gas_and_value_are_conserved(
        depth in 0u8..5,
        gas in 1_000u64..2_000_000,
        value in 0u64..1_000,
    ) {
        let output = run_relay_chain(depth, gas, value);
        if gas >= 500_000 {
            prop_assert!(output.return_code.is_ok(), "{}", output.return_message);
        }
        if output.return_code.is_ok() {
            prop_assert_eq!(output.total_gas_accounted(), gas);
            prop_assert_eq!(output.balance_delta_sum(), BigInt::from(value));
        } else {
            prop_assert_eq!(output.gas_remaining, 0);
        }
    }
}
