//! Wasmtime adapter.
//!
//! Contracts are compiled by a fuel-metered wasmtime engine and linked
//! against the host API under the `env` module. One unit of fuel is one
//! unit of gas: the fuel left in the store and the points used by the
//! instance are synchronized every time control crosses between the
//! contract and the host.

mod hooks;

use crate::error::VmHostError;
use crate::host::VmHost;
use crate::instance::{
    Breakpoint, BreakpointValue, Instance, InstanceBuilder, InstanceOptions, InstanceTrap,
    LinearMemory,
};
use crate::WASM_PAGE_SIZE;
use std::cell::{Cell, RefCell, RefMut};
use std::rc::Rc;
use tracing::{debug, trace};
use wasmtime::{
    Config, Engine, ExternType, Linker, Memory, Module, OptLevel, Store, StoreLimits,
    StoreLimitsBuilder, Trap,
};

/// Fuel given to stores of instances that are not metered.
const UNMETERED_FUEL: u64 = i64::MAX as u64;

/// Name of the exported linear memory.
const MEMORY_EXPORT: &str = "memory";

/// Gas accounting shared by an instance and its host functions.
#[derive(Debug, Default)]
pub(crate) struct Meter {
    enabled: bool,
    points_used: Cell<u64>,
    gas_limit: Cell<u64>,
    /// Fuel in the store when it was last refueled or read.
    fuel_mark: Cell<u64>,
    breakpoint: Cell<BreakpointValue>,
}

impl Meter {
    fn new(options: &InstanceOptions) -> Self {
        Self {
            enabled: options.metering,
            gas_limit: Cell::new(options.gas_limit),
            ..Default::default()
        }
    }

    /// Charge the fuel burned since the store was last refueled.
    pub(crate) fn absorb(&self, fuel: u64) {
        if !self.enabled {
            return;
        }
        let burned = self.fuel_mark.get().saturating_sub(fuel);
        self.points_used
            .set(self.points_used.get().saturating_add(burned));
        self.fuel_mark.set(fuel);
    }

    /// Fuel to put back in the store so that it matches the gas left.
    pub(crate) fn refuel(&self) -> u64 {
        if !self.enabled {
            return UNMETERED_FUEL;
        }
        let fuel = self.gas_limit.get().saturating_sub(self.points_used.get());
        self.fuel_mark.set(fuel);
        fuel
    }
}

/// Data of a contract's store.
pub(crate) struct HostEnv {
    /// Host driving the export currently running, handed back to the
    /// caller of `Instance::call` when the export returns.
    host: Option<VmHost>,
    memory: Option<Memory>,
    meter: Rc<Meter>,
    limits: StoreLimits,
}

impl HostEnv {
    fn new(meter: Rc<Meter>, limits: StoreLimits) -> Self {
        Self {
            host: None,
            memory: None,
            meter,
            limits,
        }
    }
}

/// Builds wasmtime instances sharing one engine and one linker.
pub struct WasmtimeInstanceBuilder {
    engine: Engine,
    linker: Linker<HostEnv>,
}

impl WasmtimeInstanceBuilder {
    pub fn new() -> Result<Self, VmHostError> {
        let mut config = Config::new();
        config
            .consume_fuel(true)
            .wasm_bulk_memory(true)
            .wasm_multi_value(true)
            .wasm_reference_types(false)
            .wasm_relaxed_simd(false)
            .wasm_simd(false)
            .wasm_threads(false)
            .cranelift_nan_canonicalization(true)
            .cranelift_opt_level(OptLevel::Speed);

        let engine = Engine::new(&config)?;
        let mut linker = Linker::new(&engine);
        hooks::register(&mut linker)?;
        debug!(imports = crate::vmhooks::API_NAMES.len(), "wasmtime engine ready");
        Ok(Self { engine, linker })
    }

    fn instantiate(
        &self,
        module: Module,
        options: &InstanceOptions,
    ) -> Result<Rc<dyn Instance>, VmHostError> {
        let meter = Rc::new(Meter::new(options));
        let initial_pages = memory_minimum(&module).unwrap_or(0);
        let max_bytes = initial_pages
            .saturating_add(options.max_memory_grow)
            .saturating_mul(u64::from(WASM_PAGE_SIZE));
        let limits = StoreLimitsBuilder::new()
            .memory_size(usize::try_from(max_bytes).unwrap_or(usize::MAX))
            .instances(1)
            .build();

        let mut store = Store::new(&self.engine, HostEnv::new(meter.clone(), limits));
        store.limiter(|env| &mut env.limits);
        store.set_fuel(meter.refuel())?;

        let instance = self.linker.instantiate(&mut store, &module).map_err(|err| {
            trace!(error = %err, "wasm instantiation failed");
            VmHostError::ContractInvalid
        })?;
        meter.absorb(store.get_fuel()?);

        let memory = instance.get_memory(&mut store, MEMORY_EXPORT);
        store.data_mut().memory = memory;

        Ok(Rc::new(WasmtimeInstance {
            store: RefCell::new(store),
            instance,
            module,
            meter,
        }))
    }
}

impl InstanceBuilder for WasmtimeInstanceBuilder {
    fn new_instance(
        &self,
        code: &[u8],
        options: &InstanceOptions,
    ) -> Result<Rc<dyn Instance>, VmHostError> {
        let module = Module::new(&self.engine, code).map_err(|err| {
            trace!(error = %err, "wasm compilation failed");
            VmHostError::ContractInvalid
        })?;
        self.instantiate(module, options)
    }

    fn new_instance_from_compiled(
        &self,
        compiled: &[u8],
        options: &InstanceOptions,
    ) -> Result<Rc<dyn Instance>, VmHostError> {
        // SAFETY: compiled artifacts only come from `Instance::cache` of an
        // instance built by this engine configuration; wasmtime rejects
        // artifacts produced by an incompatible engine.
        let module = unsafe { Module::deserialize(&self.engine, compiled) }?;
        self.instantiate(module, options)
    }
}

fn memory_minimum(module: &Module) -> Option<u64> {
    let exported = module.exports().map(|export| export.ty());
    let imported = module.imports().map(|import| import.ty());
    exported.chain(imported).find_map(|ty| match ty {
        ExternType::Memory(memory) => Some(memory.minimum()),
        _ => None,
    })
}

/// A contract instantiated in its own wasmtime store.
pub struct WasmtimeInstance {
    store: RefCell<Store<HostEnv>>,
    instance: wasmtime::Instance,
    module: Module,
    meter: Rc<Meter>,
}

impl WasmtimeInstance {
    fn export_type(&self, name: &str) -> Option<ExternType> {
        self.module.get_export(name)
    }

    fn run(
        &self,
        store: &mut Store<HostEnv>,
        name: &str,
        host: &mut VmHost,
    ) -> Result<(), InstanceTrap> {
        let func = self
            .instance
            .get_typed_func::<(), ()>(&mut *store, name)
            .map_err(|err| InstanceTrap::Trap(err.to_string()))?;

        store
            .set_fuel(self.meter.refuel())
            .map_err(|err| InstanceTrap::Trap(err.to_string()))?;
        let vacant = host.vacant();
        store.data_mut().host = Some(std::mem::replace(host, vacant));
        let result = func.call(&mut *store, ());
        match store.data_mut().host.take() {
            Some(owner) => *host = owner,
            None => return Err(InstanceTrap::Trap("host was not handed back".to_string())),
        }
        if let Ok(fuel) = store.get_fuel() {
            self.meter.absorb(fuel);
        }

        match result {
            Ok(()) => {
                let breakpoint = self.meter.breakpoint.get();
                if breakpoint.is_none() {
                    Ok(())
                } else {
                    Err(InstanceTrap::Breakpoint(breakpoint))
                }
            }
            Err(err) => Err(self.classify(err)),
        }
    }

    fn classify(&self, err: wasmtime::Error) -> InstanceTrap {
        if let Some(Breakpoint(value)) = err.downcast_ref::<Breakpoint>() {
            return InstanceTrap::Breakpoint(*value);
        }
        if let Some(Trap::OutOfFuel) = err.downcast_ref::<Trap>() {
            self.meter.breakpoint.set(BreakpointValue::OutOfGas);
            return InstanceTrap::Breakpoint(BreakpointValue::OutOfGas);
        }
        trace!(error = %err, "wasm trap");
        InstanceTrap::Trap(err.to_string())
    }
}

impl Instance for WasmtimeInstance {
    fn call(&self, name: &str, host: &mut VmHost) -> Result<(), InstanceTrap> {
        let mut store = self
            .store
            .try_borrow_mut()
            .map_err(|_| InstanceTrap::Trap("instance is already running".to_string()))?;
        self.run(&mut store, name, host)
    }

    fn has_function(&self, name: &str) -> bool {
        matches!(self.export_type(name), Some(ExternType::Func(_)))
    }

    fn exported_functions(&self) -> Vec<String> {
        self.module
            .exports()
            .filter(|export| matches!(export.ty(), ExternType::Func(_)))
            .map(|export| export.name().to_string())
            .collect()
    }

    fn has_void_signature(&self, name: &str) -> bool {
        match self.export_type(name) {
            Some(ExternType::Func(func)) => {
                func.params().len() == 0 && func.results().len() == 0
            }
            _ => false,
        }
    }

    fn has_memory(&self) -> bool {
        memory_minimum(&self.module).is_some()
    }

    fn is_function_imported(&self, name: &str) -> bool {
        self.module
            .imports()
            .any(|import| import.module() == hooks::IMPORT_MODULE && import.name() == name)
    }

    fn memory(&self) -> Option<Box<dyn LinearMemory + '_>> {
        let store = self.store.try_borrow_mut().ok()?;
        let memory = store.data().memory?;
        Some(Box::new(WasmtimeMemory { store, memory }))
    }

    fn points_used(&self) -> u64 {
        self.meter.points_used.get()
    }

    fn set_points_used(&self, points: u64) {
        self.meter.points_used.set(points);
    }

    fn gas_limit(&self) -> u64 {
        self.meter.gas_limit.get()
    }

    fn set_gas_limit(&self, gas_limit: u64) {
        self.meter.gas_limit.set(gas_limit);
    }

    fn breakpoint_value(&self) -> BreakpointValue {
        self.meter.breakpoint.get()
    }

    fn set_breakpoint_value(&self, value: BreakpointValue) {
        self.meter.breakpoint.set(value);
    }

    fn cache(&self) -> Result<Vec<u8>, VmHostError> {
        Ok(self.module.serialize()?)
    }

    fn clean(&self) {
        trace!("wasm instance cleaned");
    }
}

/// Linear memory of an instance that is not running.
struct WasmtimeMemory<'a> {
    store: RefMut<'a, Store<HostEnv>>,
    memory: Memory,
}

impl LinearMemory for WasmtimeMemory<'_> {
    fn length(&self) -> u32 {
        u32::try_from(self.memory.data_size(&*self.store)).unwrap_or(u32::MAX)
    }

    fn data(&self) -> &[u8] {
        self.memory.data(&*self.store)
    }

    fn data_mut(&mut self) -> &mut [u8] {
        self.memory.data_mut(&mut *self.store)
    }

    fn grow(&mut self, pages: u32) -> Result<(), VmHostError> {
        self.memory
            .grow(&mut *self.store, u64::from(pages))
            .map(|_| ())
            .map_err(|_| VmHostError::BadUpperBounds)
    }
}
