//! Contract storage access with the protection policy.

use crate::error::VmHostError;
use crate::host::VmHost;
use crate::state_stack::StateStack;
use crate::PROTECTED_STORAGE_PREFIX;
use std::collections::BTreeMap;
use tracing::trace;
use vmhost_types::{Address, StorageUpdate};

/// Effect of a storage write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageStatus {
    Unchanged,
    Added,
    Modified,
    Deleted,
}

impl StorageStatus {
    /// Code returned to contracts by the storage write APIs.
    pub fn as_i32(&self) -> i32 {
        match self {
            StorageStatus::Unchanged => 0,
            StorageStatus::Modified => 1,
            StorageStatus::Added => 2,
            StorageStatus::Deleted => 3,
        }
    }
}

/// Address whose storage the active frame reads and writes.
#[derive(Debug, Clone)]
pub struct StorageContext {
    address: StateStack<Address>,
    protection_enabled: bool,
    reserved_prefix: Vec<u8>,
}

impl StorageContext {
    pub fn new(reserved_prefix: &str) -> Self {
        Self {
            address: StateStack::new(Address::ZERO),
            protection_enabled: true,
            reserved_prefix: reserved_prefix.as_bytes().to_vec(),
        }
    }

    pub fn init_state(&mut self) {
        self.address = StateStack::new(Address::ZERO);
        self.protection_enabled = true;
    }

    pub fn set_address(&mut self, address: Address) {
        self.address.set_active(address);
    }

    pub fn address(&self) -> Address {
        *self.address.active()
    }

    pub fn push_state(&mut self) {
        self.address.push();
    }

    pub fn pop_set_active_state(&mut self) {
        self.address.pop_set_active();
    }

    pub fn pop_discard(&mut self) {
        self.address.pop_discard();
    }

    pub fn clear_state_stack(&mut self) {
        self.address.clear();
    }

    pub fn depth(&self) -> usize {
        self.address.depth()
    }

    pub fn enable_storage_protection(&mut self) {
        self.protection_enabled = true;
    }

    pub fn disable_storage_protection(&mut self) {
        self.protection_enabled = false;
    }

    pub fn is_protection_enabled(&self) -> bool {
        self.protection_enabled
    }

    fn check_key(&self, key: &[u8]) -> Result<(), VmHostError> {
        if !self.reserved_prefix.is_empty() && key.starts_with(&self.reserved_prefix) {
            return Err(VmHostError::StoreReservedKey);
        }
        if self.protection_enabled && key.starts_with(PROTECTED_STORAGE_PREFIX) {
            return Err(VmHostError::CannotWriteProtectedKey);
        }
        Ok(())
    }
}

impl VmHost {
    /// Write `value` under `key` in the active contract's storage. An empty
    /// value deletes the key.
    pub fn set_storage(&mut self, key: &[u8], value: &[u8]) -> Result<StorageStatus, VmHostError> {
        if self.runtime.read_only() {
            trace!("storage write skipped in read only mode");
            return Ok(StorageStatus::Unchanged);
        }
        self.storage.check_key(key)?;

        let address = self.storage.address();
        let old_value = self.get_storage_unmetered(key);
        let schedule = self.metering.gas_schedule().base_operation_cost.clone();
        let length = value.len() as u64;
        let old_length = old_value.len() as u64;

        if old_value == value {
            self.metering
                .use_gas(&self.runtime, schedule.data_copy_per_byte.saturating_mul(length));
            return Ok(StorageStatus::Unchanged);
        }

        let status = if old_value.is_empty() {
            self.metering
                .use_gas(&self.runtime, schedule.store_per_byte.saturating_mul(length));
            StorageStatus::Added
        } else if value.is_empty() {
            let freed = schedule.release_per_byte.saturating_mul(old_length);
            self.metering.free_gas(&mut self.output, freed);
            StorageStatus::Deleted
        } else {
            if length > old_length {
                let persist = schedule.persist_per_byte.saturating_mul(old_length);
                let store = schedule
                    .store_per_byte
                    .saturating_mul(length - old_length);
                self.metering
                    .use_gas(&self.runtime, persist.saturating_add(store));
            } else {
                self.metering
                    .use_gas(&self.runtime, schedule.persist_per_byte.saturating_mul(length));
                if length < old_length {
                    let freed = schedule
                        .release_per_byte
                        .saturating_mul(old_length - length);
                    self.metering.free_gas(&mut self.output, freed);
                }
            }
            StorageStatus::Modified
        };

        let (account, _) = self.output.get_output_account(&address);
        account.storage_updates.insert(
            key.to_vec(),
            StorageUpdate {
                offset: key.to_vec(),
                data: value.to_vec(),
            },
        );
        trace!(address = %address, ?status, "storage write");
        Ok(status)
    }

    /// Read a key of the active contract, charging per byte.
    pub fn get_storage(&mut self, key: &[u8]) -> Vec<u8> {
        let value = self.get_storage_unmetered(key);
        let per_byte = self.metering.gas_schedule().base_operation_cost.data_copy_per_byte;
        self.metering
            .use_gas(&self.runtime, per_byte.saturating_mul(value.len() as u64));
        value
    }

    /// Latest value of a key: pending writes first, then the world.
    pub fn get_storage_unmetered(&mut self, key: &[u8]) -> Vec<u8> {
        let address = self.storage.address();
        self.read_storage(&address, key)
    }

    /// Read another contract's storage. Only readable contracts and the
    /// storage the active frame runs on can be read; anything else reads as
    /// empty.
    pub fn get_storage_from_address(&mut self, address: &Address, key: &[u8]) -> Vec<u8> {
        if *address != self.storage.address() {
            let readable = self
                .blockchain
                .get_user_account(address)
                .map(|account| account.metadata().readable)
                .unwrap_or(false);
            if !readable {
                return Vec::new();
            }
        }
        let value = self.read_storage(address, key);
        let per_byte = self.metering.gas_schedule().base_operation_cost.data_copy_per_byte;
        self.metering
            .use_gas(&self.runtime, per_byte.saturating_mul(value.len() as u64));
        value
    }

    /// Host-only write that bypasses protection and read-only mode.
    pub fn set_protected_storage(
        &mut self,
        key: &[u8],
        value: &[u8],
    ) -> Result<StorageStatus, VmHostError> {
        let read_only = self.runtime.read_only();
        self.runtime.set_read_only(false);
        self.storage.disable_storage_protection();
        let result = self.set_storage(key, value);
        self.storage.enable_storage_protection();
        self.runtime.set_read_only(read_only);
        result
    }

    /// Pending storage writes of `address`.
    pub fn get_storage_updates(&self, address: &Address) -> BTreeMap<Vec<u8>, StorageUpdate> {
        self.output
            .output_account(address)
            .map(|account| account.storage_updates.clone())
            .unwrap_or_default()
    }

    fn read_storage(&mut self, address: &Address, key: &[u8]) -> Vec<u8> {
        if let Some(update) = self
            .output
            .output_account(address)
            .and_then(|account| account.storage_updates.get(key))
        {
            return update.data.clone();
        }
        self.blockchain.hook().get_storage_data(address, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockInstanceBuilder, MockWorld};
    use crate::{GasSchedule, HostConfig};
    use vmhost_types::{UserAccount, VMInput};

    fn sc() -> Address {
        Address::from_name("sc")
    }

    fn host_with_world(world: MockWorld) -> VmHost {
        let mut host = VmHost::new(
            HostConfig::default(),
            GasSchedule::uniform(1),
            Box::new(world),
            Box::new(MockInstanceBuilder::new()),
        )
        .unwrap();
        host.init_state();
        host.runtime
            .init_state_from_input(&VMInput::new(Address::from_name("user"), 1_000_000));
        host.runtime.set_sc_address(sc());
        host.storage.set_address(sc());
        host.runtime.set_instance_for_test(1_000_000);
        host.metering.init_state_from_input(
            &VMInput::new(Address::from_name("user"), 1_000_000),
            &Default::default(),
        );
        host
    }

    fn host() -> VmHost {
        let mut world = MockWorld::new();
        world.add_account(UserAccount {
            address: sc(),
            ..Default::default()
        });
        world.set_storage(&sc(), b"existing", b"abcd");
        host_with_world(world)
    }

    #[test]
    fn test_storage_status_transitions() {
        let mut host = host();
        assert_eq!(host.set_storage(b"new", b"x").unwrap(), StorageStatus::Added);
        assert_eq!(host.set_storage(b"new", b"x").unwrap(), StorageStatus::Unchanged);
        assert_eq!(host.set_storage(b"new", b"yy").unwrap(), StorageStatus::Modified);
        assert_eq!(host.set_storage(b"new", b"").unwrap(), StorageStatus::Deleted);
        assert_eq!(
            host.set_storage(b"existing", b"ab").unwrap(),
            StorageStatus::Modified
        );
        assert_eq!(host.get_storage(b"existing"), b"ab".to_vec());
        assert_eq!(host.get_storage_updates(&sc()).len(), 2);
    }

    #[test]
    fn test_storage_gas_and_refund() {
        let mut host = host();
        let before = host.runtime.points_used();
        host.set_storage(b"k", b"abc").unwrap();
        assert_eq!(host.runtime.points_used() - before, 3);

        host.set_storage(b"existing", b"a").unwrap();
        assert_eq!(host.output.refund(), &num_bigint::BigInt::from(3));
    }

    #[test]
    fn test_protected_and_reserved_keys() {
        let mut host = host();
        assert_eq!(
            host.set_storage(b"DHARITRIkey", b"v"),
            Err(VmHostError::StoreReservedKey)
        );
        assert_eq!(
            host.set_storage(b"VMHOST@thing", b"v"),
            Err(VmHostError::CannotWriteProtectedKey)
        );
        assert_eq!(
            host.set_protected_storage(b"VMHOST@thing", b"v").unwrap(),
            StorageStatus::Added
        );
        assert!(host.storage.is_protection_enabled());
    }

    #[test]
    fn test_read_only_skips_writes() {
        let mut host = host();
        host.runtime.set_read_only(true);
        assert_eq!(host.set_storage(b"k", b"v").unwrap(), StorageStatus::Unchanged);
        assert!(host.get_storage_updates(&sc()).is_empty());

        host.set_protected_storage(b"VMHOST@k", b"v").unwrap();
        assert!(host.runtime.read_only());
        assert_eq!(host.get_storage_updates(&sc()).len(), 1);
    }

    #[test]
    fn test_read_from_other_address() {
        let mut world = MockWorld::new();
        let readable = Address::from_name("readable");
        let closed = Address::from_name("closed");
        world.add_account(UserAccount {
            address: readable,
            code_metadata: vec![0x04, 0x00],
            ..Default::default()
        });
        world.add_account(UserAccount {
            address: closed,
            ..Default::default()
        });
        world.set_storage(&readable, b"k", b"open");
        world.set_storage(&closed, b"k", b"secret");
        let mut host = host_with_world(world);

        assert_eq!(host.get_storage_from_address(&readable, b"k"), b"open".to_vec());
        assert!(host.get_storage_from_address(&closed, b"k").is_empty());
    }

    #[test]
    fn test_same_context_frame_reads_the_storage_it_runs_on() {
        let mut world = MockWorld::new();
        let child = Address::from_name("child");
        world.add_account(UserAccount {
            address: sc(),
            ..Default::default()
        });
        world.add_account(UserAccount {
            address: child,
            ..Default::default()
        });
        world.set_storage(&sc(), b"k", b"caller-data");
        world.set_storage(&child, b"k", b"child-data");
        let mut host = host_with_world(world);

        // Same-context frame: the code is the child's, the storage the caller's.
        host.runtime.set_sc_address(child);
        assert_eq!(host.storage.address(), sc());
        assert_eq!(
            host.get_storage_from_address(&sc(), b"k"),
            b"caller-data".to_vec()
        );
        assert!(host.get_storage_from_address(&child, b"k").is_empty());
    }
}
