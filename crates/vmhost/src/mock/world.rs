use crate::blockchain::{BlockInfo, BlockchainHook};
use crate::call_args::CallArgsParser;
use crate::error::VmHostError;
use crate::{BUILTIN_DCDT_NFT_TRANSFER, BUILTIN_DCDT_TRANSFER};
use num_bigint::{BigInt, Sign};
use num_traits::{ToPrimitive, Zero};
use std::collections::BTreeMap;
use tracing::{debug, trace};
use vmhost_types::{
    Address, ContractCallInput, Hash, OutputAccount, OutputTransfer, UserAccount, VMOutput,
};

/// Account held by the mock world.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockAccount {
    pub account: UserAccount,
    pub code: Vec<u8>,
    pub storage: BTreeMap<Vec<u8>, Vec<u8>>,
    /// Token balances keyed by `(token identifier, nonce)`.
    pub tokens: BTreeMap<(Vec<u8>, u64), BigInt>,
}

impl MockAccount {
    pub fn new(address: Address) -> Self {
        Self {
            account: UserAccount {
                address,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// In-memory world state.
#[derive(Debug, Clone)]
pub struct MockWorld {
    accounts: BTreeMap<Address, MockAccount>,
    compiled: BTreeMap<Hash, Vec<u8>>,
    shards: BTreeMap<Address, u32>,
    /// Account states overwritten by built-ins, oldest first.
    journal: Vec<(Address, Option<MockAccount>)>,
    block_info: BlockInfo,
    builtins_enabled: bool,
    builtin_gas_cost: u64,
}

impl Default for MockWorld {
    fn default() -> Self {
        Self {
            accounts: BTreeMap::new(),
            compiled: BTreeMap::new(),
            shards: BTreeMap::new(),
            journal: Vec::new(),
            block_info: BlockInfo::default(),
            builtins_enabled: true,
            builtin_gas_cost: 0,
        }
    }
}

impl MockWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gas charged by each built-in function call.
    pub fn with_builtin_gas_cost(mut self, cost: u64) -> Self {
        self.builtin_gas_cost = cost;
        self
    }

    pub fn with_builtins_enabled(mut self, enabled: bool) -> Self {
        self.builtins_enabled = enabled;
        self
    }

    pub fn add_account(&mut self, account: UserAccount) {
        let entry = self
            .accounts
            .entry(account.address)
            .or_insert_with(|| MockAccount::new(account.address));
        entry.account = account;
    }

    /// Install a contract account owned by `owner`.
    pub fn add_contract(
        &mut self,
        address: Address,
        code: Vec<u8>,
        code_metadata: Vec<u8>,
        owner: Option<Address>,
    ) {
        let entry = self
            .accounts
            .entry(address)
            .or_insert_with(|| MockAccount::new(address));
        entry.account.code_hash = Some(Hash::of_code(&code));
        entry.account.code_metadata = code_metadata;
        entry.account.owner_address = owner;
        entry.code = code;
    }

    pub fn account(&self, address: &Address) -> Option<&MockAccount> {
        self.accounts.get(address)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &MockAccount> {
        self.accounts.values()
    }

    pub fn balance(&self, address: &Address) -> BigInt {
        self.accounts
            .get(address)
            .map(|account| account.account.balance.clone())
            .unwrap_or_default()
    }

    pub fn set_balance(&mut self, address: &Address, balance: impl Into<BigInt>) {
        self.account_mut(address).account.balance = balance.into();
    }

    pub fn set_storage(&mut self, address: &Address, key: &[u8], value: &[u8]) {
        let account = self.account_mut(address);
        if value.is_empty() {
            account.storage.remove(key);
        } else {
            account.storage.insert(key.to_vec(), value.to_vec());
        }
    }

    pub fn token_balance(&self, address: &Address, token: &[u8], nonce: u64) -> BigInt {
        self.accounts
            .get(address)
            .and_then(|account| account.tokens.get(&(token.to_vec(), nonce)))
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_token_balance(
        &mut self,
        address: &Address,
        token: &[u8],
        nonce: u64,
        value: impl Into<BigInt>,
    ) {
        self.account_mut(address)
            .tokens
            .insert((token.to_vec(), nonce), value.into());
    }

    pub fn set_shard(&mut self, address: &Address, shard: u32) {
        self.shards.insert(*address, shard);
    }

    pub fn set_block_info(&mut self, block_info: BlockInfo) {
        self.block_info = block_info;
    }

    pub fn compiled_code_count(&self) -> usize {
        self.compiled.len()
    }

    /// Apply a successful top-level output to the world.
    pub fn commit(&mut self, output: &VMOutput) {
        for out in output.output_accounts.values() {
            let entry = self
                .accounts
                .entry(out.address)
                .or_insert_with(|| MockAccount::new(out.address));
            entry.account.balance += &out.balance_delta;
            entry.account.nonce = entry.account.nonce.max(out.nonce);
            for update in out.storage_updates.values() {
                if update.data.is_empty() {
                    entry.storage.remove(&update.offset);
                } else {
                    entry.storage.insert(update.offset.clone(), update.data.clone());
                }
            }
            if !out.code.is_empty() {
                entry.account.code_hash = Some(Hash::of_code(&out.code));
                entry.account.code_metadata = out.code_metadata.clone();
                entry.account.owner_address = out.code_deployer_address;
                entry.code = out.code.clone();
            }
        }
        for address in &output.deleted_accounts {
            self.accounts.remove(address);
        }
        self.journal.clear();
        debug!(accounts = output.output_accounts.len(), "world committed output");
    }

    fn account_mut(&mut self, address: &Address) -> &mut MockAccount {
        self.accounts
            .entry(*address)
            .or_insert_with(|| MockAccount::new(*address))
    }

    fn record(&mut self, address: &Address) {
        let previous = self.accounts.get(address).cloned();
        self.journal.push((*address, previous));
    }

    fn move_tokens(
        &mut self,
        sender: &Address,
        destination: &Address,
        token: &[u8],
        nonce: u64,
        value: &BigInt,
    ) -> Result<(), VmHostError> {
        if value.sign() == Sign::Minus {
            return Err(builtin_error("negative token value"));
        }
        let available = self.token_balance(sender, token, nonce);
        if &available < value {
            return Err(builtin_error("insufficient token funds"));
        }
        self.record(sender);
        self.record(destination);
        let key = (token.to_vec(), nonce);
        self.account_mut(sender)
            .tokens
            .insert(key.clone(), available - value);
        *self.account_mut(destination).tokens.entry(key).or_default() += value;
        trace!(sender = %sender, dest = %destination, %value, "token transfer");
        Ok(())
    }

    fn dcdt_transfer(&mut self, input: &ContractCallInput) -> Result<VMOutput, VmHostError> {
        let args = &input.vm_input.arguments;
        if args.len() < 2 {
            return Err(builtin_error("DCDTTransfer expects token and value"));
        }
        if !input.vm_input.call_value.is_zero() {
            return Err(VmHostError::TransferValueOnDcdtCall);
        }
        let value = BigInt::from_bytes_be(Sign::Plus, &args[1]);
        self.move_tokens(
            &input.vm_input.caller_addr,
            &input.recipient_addr,
            &args[0],
            0,
            &value,
        )?;
        self.builtin_output(input, &input.recipient_addr, &args[2..])
    }

    fn dcdt_nft_transfer(&mut self, input: &ContractCallInput) -> Result<VMOutput, VmHostError> {
        let args = &input.vm_input.arguments;
        if args.len() < 4 {
            return Err(builtin_error(
                "DCDTNFTTransfer expects token, nonce, value and destination",
            ));
        }
        if input.vm_input.caller_addr != input.recipient_addr {
            return Err(builtin_error("DCDTNFTTransfer must be sent to the sender"));
        }
        let nonce = BigInt::from_bytes_be(Sign::Plus, &args[1])
            .to_u64()
            .unwrap_or(u64::MAX);
        let value = BigInt::from_bytes_be(Sign::Plus, &args[2]);
        let destination = Address::from_slice(&args[3])?;
        self.move_tokens(
            &input.vm_input.caller_addr,
            &destination,
            &args[0],
            nonce,
            &value,
        )?;
        self.builtin_output(input, &destination, &args[4..])
    }

    /// Output of a token transfer. When a function follows the transfer
    /// arguments, the remaining gas is forwarded to it.
    fn builtin_output(
        &self,
        input: &ContractCallInput,
        destination: &Address,
        call_args: &[Vec<u8>],
    ) -> Result<VMOutput, VmHostError> {
        let provided = input.vm_input.gas_provided;
        if provided < self.builtin_gas_cost {
            return Err(VmHostError::NotEnoughGas);
        }
        let mut output = VMOutput {
            gas_remaining: provided - self.builtin_gas_cost,
            ..Default::default()
        };

        let Some((function, arguments)) = call_args.split_first() else {
            return Ok(output);
        };
        if !self.is_smart_contract(destination) {
            return Ok(output);
        }
        let function = String::from_utf8(function.clone())
            .map_err(|_| builtin_error("function name is not valid utf-8"))?;

        let mut account = OutputAccount::new(*destination);
        account.output_transfers.push(OutputTransfer {
            value: BigInt::zero(),
            gas_limit: output.gas_remaining,
            gas_locked: input.vm_input.gas_locked,
            data: CallArgsParser::build_data(&function, arguments),
            call_type: input.vm_input.call_type,
            sender_address: input.vm_input.caller_addr,
        });
        output.gas_remaining = 0;
        output.output_accounts.insert(*destination, account);
        Ok(output)
    }
}

fn builtin_error(message: &str) -> VmHostError {
    VmHostError::BuiltinFunction(message.to_string())
}

impl BlockchainHook for MockWorld {
    /// `[0; 8] ++ vm_type ++ hash(creator, nonce)[10..30] ++ creator[30..]`,
    /// which keeps the new contract in its creator's shard.
    fn new_address(
        &self,
        creator: &Address,
        creator_nonce: u64,
        vm_type: &[u8],
    ) -> Result<Address, VmHostError> {
        let mut seed = creator.to_vec();
        seed.extend_from_slice(&creator_nonce.to_be_bytes());
        let hash = Hash::of_code(&seed);

        let mut bytes = [0u8; 32];
        let vm_len = vm_type.len().min(2);
        bytes[8..8 + vm_len].copy_from_slice(&vm_type[..vm_len]);
        bytes[10..30].copy_from_slice(&hash.as_bytes()[10..30]);
        bytes[30..].copy_from_slice(&creator.as_bytes()[30..]);
        Ok(Address::from_bytes(bytes))
    }

    fn get_user_account(&self, address: &Address) -> Option<UserAccount> {
        self.accounts
            .get(address)
            .map(|account| account.account.clone())
    }

    fn get_storage_data(&self, address: &Address, key: &[u8]) -> Vec<u8> {
        self.accounts
            .get(address)
            .and_then(|account| account.storage.get(key))
            .cloned()
            .unwrap_or_default()
    }

    fn get_code(&self, address: &Address) -> Option<Vec<u8>> {
        self.accounts
            .get(address)
            .filter(|account| !account.code.is_empty())
            .map(|account| account.code.clone())
    }

    fn get_compiled_code(&self, code_hash: &Hash) -> Option<Vec<u8>> {
        self.compiled.get(code_hash).cloned()
    }

    fn save_compiled_code(&mut self, code_hash: &Hash, compiled: &[u8]) {
        self.compiled.insert(*code_hash, compiled.to_vec());
    }

    fn is_builtin_function(&self, name: &str) -> bool {
        self.builtins_enabled && (name == BUILTIN_DCDT_TRANSFER || name == BUILTIN_DCDT_NFT_TRANSFER)
    }

    fn builtin_function_names(&self) -> Vec<String> {
        vec![
            BUILTIN_DCDT_TRANSFER.to_string(),
            BUILTIN_DCDT_NFT_TRANSFER.to_string(),
        ]
    }

    fn process_builtin_function(
        &mut self,
        input: &ContractCallInput,
    ) -> Result<VMOutput, VmHostError> {
        trace!(function = %input.function, caller = %input.vm_input.caller_addr, "process built-in");
        match input.function.as_str() {
            BUILTIN_DCDT_TRANSFER if self.builtins_enabled => self.dcdt_transfer(input),
            BUILTIN_DCDT_NFT_TRANSFER if self.builtins_enabled => self.dcdt_nft_transfer(input),
            other => Err(builtin_error(&format!("unknown built-in function {other}"))),
        }
    }

    fn shard_of_address(&self, address: &Address) -> u32 {
        self.shards.get(address).copied().unwrap_or(0)
    }

    fn is_smart_contract(&self, address: &Address) -> bool {
        self.accounts
            .get(address)
            .is_some_and(|account| account.account.is_smart_contract())
    }

    fn get_snapshot(&self) -> usize {
        self.journal.len()
    }

    fn revert_to_snapshot(&mut self, snapshot: usize) {
        while self.journal.len() > snapshot {
            let Some((address, previous)) = self.journal.pop() else {
                break;
            };
            match previous {
                Some(account) => {
                    self.accounts.insert(address, account);
                }
                None => {
                    self.accounts.remove(&address);
                }
            }
        }
    }

    fn block_info(&self) -> BlockInfo {
        self.block_info.clone()
    }
}
