//! An async batch that spans two transactions: local calls resolve at
//! once, the cross-shard call is persisted and resumed by its callback.

mod common;

use common::{
    child, host, owner, parent, remote, storage_update, world, world_storage, GAS, TX_HASH,
};
use num_bigint::BigInt;
use vmhost::mock::{MockContract, MockInstanceBuilder};
use vmhost::types::{CallType, ContractCallInput, ReturnCode, VMInput};
use vmhost::{async_data_storage_key, vmhooks, AsyncContextInfo, HookResult, VmHost};
use vmhost::CALLBACK_FUNCTION_NAME;

const CODE_PARENT: &[u8] = b"parent-code";
const CODE_CHILD: &[u8] = b"child-code";

fn store_argument(host: &mut VmHost, key: &[u8], index: usize) -> HookResult<()> {
    let value = host
        .runtime()
        .arguments()
        .get(index)
        .cloned()
        .unwrap_or_default();
    vmhooks::storage_store(host, key, &value)?;
    Ok(())
}

fn builder() -> MockInstanceBuilder {
    let parent_contract = MockContract::new()
        .with_method("run", |host| {
            let zero = BigInt::from(0);
            vmhooks::create_async_call(
                host,
                b"batch",
                &child(),
                &zero,
                b"ping".to_vec(),
                "onLocal",
                "onLocalError",
                0,
            )?;
            vmhooks::create_async_call(
                host,
                b"batch",
                &remote(),
                &zero,
                b"ping".to_vec(),
                "onRemote",
                "onRemoteError",
                0,
            )
        })
        .with_method("onLocal", |host| store_argument(host, b"local", 1))
        .with_method("onLocalError", |host| store_argument(host, b"local-error", 1))
        .with_method("onRemote", |host| store_argument(host, b"remote", 1))
        .with_method("onRemoteError", |host| store_argument(host, b"remote-error", 1));
    let child_contract = MockContract::new().with_method("ping", |host| {
        vmhooks::finish(host, b"pong".to_vec())?;
        Ok(())
    });
    MockInstanceBuilder::new()
        .with_contract(CODE_PARENT, parent_contract)
        .with_contract(CODE_CHILD, child_contract)
}

#[test]
fn test_batch_is_persisted_then_resolved_by_callback() {
    let world = world();
    {
        let mut world = world.borrow_mut();
        world.add_contract(parent(), CODE_PARENT.to_vec(), vec![1, 0], Some(owner()));
        world.add_contract(child(), CODE_CHILD.to_vec(), vec![1, 0], Some(owner()));
        world.set_shard(&remote(), 1);
    }
    let key = async_data_storage_key(TX_HASH);

    let mut host = host(&world, builder());
    let vm_input = VMInput::new(owner(), GAS).with_tx_hashes(TX_HASH, TX_HASH);
    let output = host.run_smart_contract_call(&ContractCallInput::new(vm_input, parent(), "run"));
    assert_eq!(output.return_code, ReturnCode::Ok, "{}", output.return_message);
    assert_eq!(storage_update(&output, &parent(), b"local"), Some(b"pong".to_vec()));
    assert_eq!(
        output.output_accounts[&remote()].output_transfers[0].call_type,
        CallType::AsynchronousCall
    );
    world.borrow_mut().commit(&output);

    let record = world_storage(&world, &parent(), &key).expect("pending batch persisted");
    let pending = AsyncContextInfo::from_json(&record).unwrap();
    assert_eq!(pending.calls().count(), 1);
    assert_eq!(pending.caller_addr, owner());

    // The remote shard answers with a callback transaction.
    let vm_input = VMInput::new(remote(), GAS)
        .with_arguments(vec![Vec::new(), b"remote-pong".to_vec()])
        .with_call_type(CallType::AsynchronousCallBack)
        .with_tx_hashes(TX_HASH, b"callback-tx");
    let output = host.run_smart_contract_call(&ContractCallInput::new(
        vm_input,
        parent(),
        CALLBACK_FUNCTION_NAME,
    ));
    assert_eq!(output.return_code, ReturnCode::Ok, "{}", output.return_message);
    assert_eq!(
        storage_update(&output, &parent(), b"remote"),
        Some(b"remote-pong".to_vec())
    );
    assert_eq!(
        output.output_accounts[&owner()].output_transfers[0].call_type,
        CallType::AsynchronousCallBack
    );
    world.borrow_mut().commit(&output);

    assert_eq!(world_storage(&world, &parent(), &key), None);
    assert_eq!(world_storage(&world, &parent(), b"remote-error"), None);
}

#[test]
fn test_contract_cannot_write_the_batch_record() {
    let world = world();
    world
        .borrow_mut()
        .add_contract(parent(), CODE_PARENT.to_vec(), vec![1, 0], Some(owner()));
    let contract = MockContract::new().with_method("forge", |host| {
        let key = async_data_storage_key(TX_HASH);
        vmhooks::storage_store(host, &key, b"forged")?;
        Ok(())
    });
    let mut host = host(&world, MockInstanceBuilder::new().with_contract(CODE_PARENT, contract));

    let vm_input = VMInput::new(owner(), GAS).with_tx_hashes(TX_HASH, TX_HASH);
    let output = host.run_smart_contract_call(&ContractCallInput::new(vm_input, parent(), "forge"));
    assert_ne!(output.return_code, ReturnCode::Ok);
}
