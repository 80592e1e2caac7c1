#![allow(dead_code)]

use num_bigint::BigInt;
use std::cell::RefCell;
use std::rc::Rc;
use vmhost::gas_schedule::GasSchedule;
use vmhost::instance::InstanceBuilder;
use vmhost::mock::MockWorld;
use vmhost::types::{Address, UserAccount, VMOutput};
use vmhost::{HostConfig, VmHost};

pub const GAS: u64 = 1_000_000;
pub const TX_HASH: &[u8] = b"integration-tx";

pub fn owner() -> Address {
    Address::from_name("owner")
}

pub fn parent() -> Address {
    Address::from_name("parent")
}

pub fn child() -> Address {
    Address::from_name("child")
}

pub fn remote() -> Address {
    Address::from_name("remote")
}

/// World with a funded owner and no contracts.
pub fn world() -> Rc<RefCell<MockWorld>> {
    let mut world = MockWorld::new();
    world.add_account(UserAccount {
        address: owner(),
        nonce: 1,
        balance: BigInt::from(1_000_000),
        ..Default::default()
    });
    Rc::new(RefCell::new(world))
}

pub fn host(world: &Rc<RefCell<MockWorld>>, builder: impl InstanceBuilder + 'static) -> VmHost {
    host_with(world, builder, HostConfig::default(), GasSchedule::uniform(1))
}

pub fn host_with(
    world: &Rc<RefCell<MockWorld>>,
    builder: impl InstanceBuilder + 'static,
    config: HostConfig,
    schedule: GasSchedule,
) -> VmHost {
    VmHost::new(config, schedule, Box::new(world.clone()), Box::new(builder))
        .expect("host configuration is valid")
}

pub fn storage_update(output: &VMOutput, address: &Address, key: &[u8]) -> Option<Vec<u8>> {
    output
        .output_accounts
        .get(address)?
        .storage_updates
        .get(key)
        .map(|update| update.data.clone())
}

pub fn world_storage(world: &Rc<RefCell<MockWorld>>, address: &Address, key: &[u8]) -> Option<Vec<u8>> {
    world
        .borrow()
        .account(address)
        .and_then(|account| account.storage.get(key).cloned())
}
