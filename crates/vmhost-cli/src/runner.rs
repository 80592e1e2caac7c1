//! Runs transactions against a `MockWorld` through the wasmtime adapter.

use crate::scenario::{
    parse_address, parse_amount, parse_arguments, parse_bytes, read_code, CallSpec, DeploySpec,
    TxSpec, WorldSpec,
};
use serde::Serialize;
use std::cell::{Ref, RefCell};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, info};
use vmhost::blockchain::BlockInfo;
use vmhost::mock::MockWorld;
use vmhost::{GasSchedule, HostConfig, VmHost, WasmtimeInstanceBuilder};
use vmhost_types::{
    ContractCallInput, ContractCreateInput, UserAccount, VMInput, VMOutput,
};

/// Result of one transaction.
#[derive(Debug, Serialize)]
pub struct TxReport {
    pub index: usize,
    pub kind: &'static str,
    /// Whether the output was applied to the world.
    pub committed: bool,
    pub output: VMOutput,
}

pub struct Runner {
    world: Rc<RefCell<MockWorld>>,
    host: VmHost,
    /// Directory code paths in transactions are relative to.
    tx_base: PathBuf,
}

impl Runner {
    pub fn new(
        config: HostConfig,
        gas_schedule: GasSchedule,
        world_spec: &WorldSpec,
        world_path: &Path,
        tx_path: &Path,
    ) -> anyhow::Result<Self> {
        let world = Rc::new(RefCell::new(build_world(world_spec, world_path)?));
        let builder = WasmtimeInstanceBuilder::new()?;
        let host = VmHost::new(
            config,
            gas_schedule,
            Box::new(world.clone()),
            Box::new(builder),
        )?;
        Ok(Self {
            world,
            host,
            tx_base: tx_path.to_path_buf(),
        })
    }

    pub fn world(&self) -> Ref<'_, MockWorld> {
        self.world.borrow()
    }

    pub fn run_all(&mut self, transactions: &[TxSpec]) -> anyhow::Result<Vec<TxReport>> {
        transactions
            .iter()
            .enumerate()
            .map(|(index, tx)| self.run(index, tx))
            .collect()
    }

    pub fn run(&mut self, index: usize, tx: &TxSpec) -> anyhow::Result<TxReport> {
        let tx_hash = format!("tx-{index}").into_bytes();
        let (kind, output, commit) = match tx {
            TxSpec::Deploy(deploy) => ("deploy", self.deploy(deploy, &tx_hash)?, true),
            TxSpec::Call(call) => ("call", self.call(call, &tx_hash)?, true),
            TxSpec::Query(call) => ("query", self.call(call, &tx_hash)?, false),
        };

        let committed = commit && output.return_code.is_ok();
        if committed {
            self.world.borrow_mut().commit(&output);
        }
        info!(
            index,
            kind,
            return_code = %output.return_code,
            gas_remaining = output.gas_remaining,
            committed,
            "transaction finished"
        );
        Ok(TxReport {
            index,
            kind,
            committed,
            output,
        })
    }

    fn deploy(&mut self, deploy: &DeploySpec, tx_hash: &[u8]) -> anyhow::Result<VMOutput> {
        let code = read_code(&self.tx_base, &deploy.code)?;
        let vm_input = VMInput::new(parse_address(&deploy.caller), deploy.gas)
            .with_value(parse_amount(&deploy.value)?)
            .with_arguments(parse_arguments(&deploy.arguments)?)
            .with_tx_hashes(tx_hash, tx_hash);
        let input = ContractCreateInput::new(vm_input, code, parse_bytes(&deploy.code_metadata)?);
        debug!(code = %deploy.code.display(), "deploying contract");
        Ok(self.host.run_smart_contract_create(&input))
    }

    fn call(&mut self, call: &CallSpec, tx_hash: &[u8]) -> anyhow::Result<VMOutput> {
        let original = if call.tx_hash.is_empty() {
            tx_hash.to_vec()
        } else {
            parse_bytes(&call.tx_hash)?
        };
        let vm_input = VMInput::new(parse_address(&call.caller), call.gas)
            .with_value(parse_amount(&call.value)?)
            .with_arguments(parse_arguments(&call.arguments)?)
            .with_call_type(call.call_type)
            .with_tx_hashes(&original, tx_hash);
        let input = ContractCallInput::new(vm_input, parse_address(&call.contract), &call.function);
        Ok(self.host.run_smart_contract_call(&input))
    }
}

fn build_world(spec: &WorldSpec, world_path: &Path) -> anyhow::Result<MockWorld> {
    let mut world = MockWorld::new();
    world.set_block_info(BlockInfo {
        nonce: spec.block.nonce,
        round: spec.block.round,
        epoch: spec.block.epoch,
        timestamp: spec.block.timestamp,
        random_seed: Vec::new(),
    });

    for account in &spec.accounts {
        let address = parse_address(&account.address);
        world.add_account(UserAccount {
            address,
            nonce: account.nonce,
            balance: parse_amount(&account.balance)?,
            ..Default::default()
        });
        if let Some(code) = &account.code {
            let code = read_code(world_path, code)?;
            let metadata = if account.code_metadata.is_empty() {
                vec![1, 0]
            } else {
                parse_bytes(&account.code_metadata)?
            };
            let owner = account.owner.as_deref().map(parse_address);
            world.add_contract(address, code, metadata, owner);
        }
        world.set_shard(&address, account.shard);
        for (key, value) in &account.storage {
            world.set_storage(&address, &parse_bytes(key)?, &parse_bytes(value)?);
        }
    }
    debug!(accounts = spec.accounts.len(), "world loaded");
    Ok(world)
}
