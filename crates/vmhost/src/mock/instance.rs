use crate::error::VmHostError;
use crate::host::VmHost;
use crate::instance::{
    Breakpoint, BreakpointValue, HookResult, Instance, InstanceBuilder, InstanceOptions,
    InstanceTrap, LinearMemory, VecMemory,
};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;
use tracing::trace;

/// Body of a scripted export.
pub type MockMethod = Rc<dyn Fn(&mut VmHost) -> HookResult<()>>;

/// A contract whose exports are Rust closures.
#[derive(Clone)]
pub struct MockContract {
    methods: BTreeMap<String, MockMethod>,
    nonvoid: BTreeSet<String>,
    imports: BTreeSet<String>,
    has_memory: bool,
}

impl Default for MockContract {
    fn default() -> Self {
        Self {
            methods: BTreeMap::new(),
            nonvoid: BTreeSet::new(),
            imports: BTreeSet::new(),
            has_memory: true,
        }
    }
}

impl fmt::Debug for MockContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockContract")
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("nonvoid", &self.nonvoid)
            .field("imports", &self.imports)
            .field("has_memory", &self.has_memory)
            .finish()
    }
}

impl MockContract {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_method<F>(mut self, name: &str, method: F) -> Self
    where
        F: Fn(&mut VmHost) -> HookResult<()> + 'static,
    {
        self.methods.insert(name.to_string(), Rc::new(method));
        self
    }

    /// Declare an export as taking parameters or returning values.
    pub fn with_nonvoid(mut self, name: &str) -> Self {
        self.nonvoid.insert(name.to_string());
        self
    }

    pub fn with_import(mut self, name: &str) -> Self {
        self.imports.insert(name.to_string());
        self
    }

    pub fn without_memory(mut self) -> Self {
        self.has_memory = false;
        self
    }
}

/// Instance of a `MockContract`.
pub struct MockInstance {
    contract: MockContract,
    code: Vec<u8>,
    points_used: Cell<u64>,
    gas_limit: Cell<u64>,
    breakpoint: Cell<BreakpointValue>,
    memory: RefCell<VecMemory>,
}

impl MockInstance {
    pub fn new(contract: MockContract, options: &InstanceOptions) -> Self {
        let max_pages = 2 + options.max_memory_grow as u32;
        Self {
            contract,
            code: Vec::new(),
            points_used: Cell::new(0),
            gas_limit: Cell::new(options.gas_limit),
            breakpoint: Cell::new(BreakpointValue::None),
            memory: RefCell::new(VecMemory::with_pages(2, max_pages)),
        }
    }

    fn with_code(mut self, code: &[u8]) -> Self {
        self.code = code.to_vec();
        self
    }
}

impl Instance for MockInstance {
    fn call(&self, name: &str, host: &mut VmHost) -> Result<(), InstanceTrap> {
        let method = self
            .contract
            .methods
            .get(name)
            .cloned()
            .ok_or_else(|| InstanceTrap::Trap(format!("export {name} not found")))?;

        match method(host) {
            Err(Breakpoint(value)) => Err(InstanceTrap::Breakpoint(value)),
            Ok(()) => {
                let value = self.breakpoint.get();
                if value.is_none() {
                    Ok(())
                } else {
                    Err(InstanceTrap::Breakpoint(value))
                }
            }
        }
    }

    fn has_function(&self, name: &str) -> bool {
        self.contract.methods.contains_key(name)
    }

    fn exported_functions(&self) -> Vec<String> {
        self.contract.methods.keys().cloned().collect()
    }

    fn has_void_signature(&self, name: &str) -> bool {
        !self.contract.nonvoid.contains(name)
    }

    fn has_memory(&self) -> bool {
        self.contract.has_memory
    }

    fn is_function_imported(&self, name: &str) -> bool {
        self.contract.imports.contains(name)
    }

    fn memory(&self) -> Option<Box<dyn LinearMemory + '_>> {
        if !self.contract.has_memory {
            return None;
        }
        let memory = self.memory.try_borrow_mut().ok()?;
        Some(Box::new(memory))
    }

    fn points_used(&self) -> u64 {
        self.points_used.get()
    }

    fn set_points_used(&self, points: u64) {
        self.points_used.set(points);
    }

    fn gas_limit(&self) -> u64 {
        self.gas_limit.get()
    }

    fn set_gas_limit(&self, gas_limit: u64) {
        self.gas_limit.set(gas_limit);
    }

    fn breakpoint_value(&self) -> BreakpointValue {
        self.breakpoint.get()
    }

    fn set_breakpoint_value(&self, value: BreakpointValue) {
        self.breakpoint.set(value);
    }

    fn cache(&self) -> Result<Vec<u8>, VmHostError> {
        Ok(self.code.clone())
    }

    fn clean(&self) {
        trace!(code_len = self.code.len(), "mock instance cleaned");
    }
}

/// Builds mock instances for the contracts registered by code.
#[derive(Debug, Clone, Default)]
pub struct MockInstanceBuilder {
    contracts: BTreeMap<Vec<u8>, MockContract>,
}

impl MockInstanceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the contract instantiated for `code`.
    pub fn with_contract(mut self, code: &[u8], contract: MockContract) -> Self {
        self.contracts.insert(code.to_vec(), contract);
        self
    }

    fn instantiate(
        &self,
        code: &[u8],
        options: &InstanceOptions,
    ) -> Result<Rc<dyn Instance>, VmHostError> {
        let contract = self
            .contracts
            .get(code)
            .cloned()
            .ok_or(VmHostError::ContractInvalid)?;
        Ok(Rc::new(MockInstance::new(contract, options).with_code(code)))
    }
}

impl InstanceBuilder for MockInstanceBuilder {
    fn new_instance(
        &self,
        code: &[u8],
        options: &InstanceOptions,
    ) -> Result<Rc<dyn Instance>, VmHostError> {
        self.instantiate(code, options)
    }

    /// The cached artifact of a mock instance is its code.
    fn new_instance_from_compiled(
        &self,
        compiled: &[u8],
        options: &InstanceOptions,
    ) -> Result<Rc<dyn Instance>, VmHostError> {
        self.instantiate(compiled, options)
    }
}
