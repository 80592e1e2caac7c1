//! Interpreter adapter seam.
//!
//! The host never talks to a WebAssembly engine directly. It creates
//! instances through an `InstanceBuilder` and drives them through the
//! `Instance` trait, which reports breakpoints as a tagged result instead
//! of an out-of-band flag.

use crate::error::VmHostError;
use crate::host::VmHost;
use crate::WASM_PAGE_SIZE;
use std::rc::Rc;
use thiserror::Error;

/// Reason a running contract was suspended by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum BreakpointValue {
    #[default]
    None,
    ExecutionFailed,
    AsyncCall,
    SignalError,
    OutOfGas,
}

impl BreakpointValue {
    pub fn as_u64(&self) -> u64 {
        match self {
            BreakpointValue::None => 0,
            BreakpointValue::ExecutionFailed => 1,
            BreakpointValue::AsyncCall => 2,
            BreakpointValue::SignalError => 3,
            BreakpointValue::OutOfGas => 4,
        }
    }

    pub fn is_none(&self) -> bool {
        *self == BreakpointValue::None
    }
}

impl From<u64> for BreakpointValue {
    fn from(value: u64) -> Self {
        match value {
            1 => BreakpointValue::ExecutionFailed,
            2 => BreakpointValue::AsyncCall,
            3 => BreakpointValue::SignalError,
            4 => BreakpointValue::OutOfGas,
            _ => BreakpointValue::None,
        }
    }
}

/// Error a host hook returns to unwind the running contract.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("runtime breakpoint {0:?}")]
pub struct Breakpoint(pub BreakpointValue);

/// Result of a host hook.
pub type HookResult<T> = Result<T, Breakpoint>;

/// Abnormal end of an exported function call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceTrap {
    /// The host suspended the contract.
    Breakpoint(BreakpointValue),
    /// The engine trapped on its own (unreachable, bad memory access, ...).
    Trap(String),
}

/// Compilation and metering settings for a new instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceOptions {
    pub gas_limit: u64,
    pub max_memory_grow: u64,
    pub max_memory_grow_delta: u64,
    pub metering: bool,
}

impl InstanceOptions {
    pub fn with_gas_limit(gas_limit: u64) -> Self {
        Self {
            gas_limit,
            ..Default::default()
        }
    }
}

impl Default for InstanceOptions {
    fn default() -> Self {
        Self {
            gas_limit: 0,
            max_memory_grow: crate::MAX_MEMORY_GROW,
            max_memory_grow_delta: crate::MAX_MEMORY_GROW_DELTA,
            metering: true,
        }
    }
}

/// Linear memory of an instance.
pub trait LinearMemory {
    /// Size in bytes.
    fn length(&self) -> u32;
    fn data(&self) -> &[u8];
    fn data_mut(&mut self) -> &mut [u8];
    /// Grow by the given number of pages.
    fn grow(&mut self, pages: u32) -> Result<(), VmHostError>;
}

/// A compiled and instantiated contract.
///
/// Methods take `&self` so that an instance can stay on the runtime's
/// instance stack while one of its exports is running.
pub trait Instance {
    /// Run an exported function to completion or until a breakpoint.
    fn call(&self, name: &str, host: &mut VmHost) -> Result<(), InstanceTrap>;

    fn has_function(&self, name: &str) -> bool;

    fn exported_functions(&self) -> Vec<String>;

    /// The export takes no parameters and returns nothing.
    fn has_void_signature(&self, name: &str) -> bool;

    fn has_memory(&self) -> bool;

    fn is_function_imported(&self, name: &str) -> bool;

    /// Memory view, or `None` when the memory is not reachable from the
    /// outside (for example while an export is running).
    fn memory(&self) -> Option<Box<dyn LinearMemory + '_>>;

    fn points_used(&self) -> u64;

    fn set_points_used(&self, points: u64);

    fn gas_limit(&self) -> u64;

    fn set_gas_limit(&self, gas_limit: u64);

    fn breakpoint_value(&self) -> BreakpointValue;

    fn set_breakpoint_value(&self, value: BreakpointValue);

    /// Serialized compiled artifact, reusable by `new_instance_from_compiled`.
    fn cache(&self) -> Result<Vec<u8>, VmHostError>;

    /// Release engine resources.
    fn clean(&self);
}

/// Factory for instances.
pub trait InstanceBuilder {
    fn new_instance(
        &self,
        code: &[u8],
        options: &InstanceOptions,
    ) -> Result<Rc<dyn Instance>, VmHostError>;

    fn new_instance_from_compiled(
        &self,
        compiled: &[u8],
        options: &InstanceOptions,
    ) -> Result<Rc<dyn Instance>, VmHostError>;
}

/// Read `length` bytes at `offset`.
pub fn mem_load(
    memory: &dyn LinearMemory,
    offset: i32,
    length: i32,
) -> Result<Vec<u8>, VmHostError> {
    if length == 0 {
        return Ok(Vec::new());
    }

    let memory_length = memory.length() as i64;
    if offset < 0 || offset as i64 > memory_length {
        return Err(VmHostError::BadBounds);
    }
    if length < 0 {
        return Err(VmHostError::NegativeLength);
    }

    let end = offset as i64 + length as i64;
    if end > memory_length {
        return Err(VmHostError::BadUpperBounds);
    }

    Ok(memory.data()[offset as usize..end as usize].to_vec())
}

/// Read consecutive chunks starting at `offset`.
pub fn mem_load_multiple(
    memory: &dyn LinearMemory,
    mut offset: i32,
    lengths: &[i32],
) -> Result<Vec<Vec<u8>>, VmHostError> {
    let mut results = Vec::with_capacity(lengths.len());
    for &length in lengths {
        results.push(mem_load(memory, offset, length)?);
        offset = offset.saturating_add(length);
    }
    Ok(results)
}

/// Write `data` at `offset`, growing the memory by one page if needed.
pub fn mem_store(
    memory: &mut dyn LinearMemory,
    offset: i32,
    data: &[u8],
) -> Result<(), VmHostError> {
    if data.is_empty() {
        return Ok(());
    }
    if offset < 0 {
        return Err(VmHostError::BadLowerBounds);
    }

    let end = offset as u64 + data.len() as u64;
    if end > memory.length() as u64 {
        memory.grow(1)?;
    }
    if end > memory.length() as u64 {
        return Err(VmHostError::BadUpperBounds);
    }

    memory.data_mut()[offset as usize..end as usize].copy_from_slice(data);
    Ok(())
}

/// Plain byte-vector memory used by mock instances and tests.
#[derive(Debug, Clone, Default)]
pub struct VecMemory {
    bytes: Vec<u8>,
    max_pages: u32,
}

impl VecMemory {
    pub fn with_pages(pages: u32, max_pages: u32) -> Self {
        Self {
            bytes: vec![0u8; (pages * WASM_PAGE_SIZE) as usize],
            max_pages,
        }
    }
}

impl LinearMemory for VecMemory {
    fn length(&self) -> u32 {
        self.bytes.len() as u32
    }

    fn data(&self) -> &[u8] {
        &self.bytes
    }

    fn data_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    fn grow(&mut self, pages: u32) -> Result<(), VmHostError> {
        let current = self.length() / WASM_PAGE_SIZE;
        if current + pages > self.max_pages {
            return Err(VmHostError::BadUpperBounds);
        }
        self.bytes
            .resize(((current + pages) * WASM_PAGE_SIZE) as usize, 0);
        Ok(())
    }
}

impl<T: LinearMemory> LinearMemory for std::cell::RefMut<'_, T> {
    fn length(&self) -> u32 {
        (**self).length()
    }

    fn data(&self) -> &[u8] {
        (**self).data()
    }

    fn data_mut(&mut self) -> &mut [u8] {
        (**self).data_mut()
    }

    fn grow(&mut self, pages: u32) -> Result<(), VmHostError> {
        (**self).grow(pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breakpoint_values() {
        for value in [
            BreakpointValue::None,
            BreakpointValue::ExecutionFailed,
            BreakpointValue::AsyncCall,
            BreakpointValue::SignalError,
            BreakpointValue::OutOfGas,
        ] {
            assert_eq!(BreakpointValue::from(value.as_u64()), value);
        }
        assert_eq!(BreakpointValue::from(99), BreakpointValue::None);
    }

    #[test]
    fn test_mem_load_bounds() {
        let memory = VecMemory::with_pages(1, 2);
        let len = WASM_PAGE_SIZE as i32;

        assert_eq!(mem_load(&memory, 10, 0).unwrap(), Vec::<u8>::new());
        assert_eq!(mem_load(&memory, -1, 4), Err(VmHostError::BadBounds));
        assert_eq!(mem_load(&memory, len + 1, 4), Err(VmHostError::BadBounds));
        assert_eq!(mem_load(&memory, 0, -4), Err(VmHostError::NegativeLength));
        assert_eq!(mem_load(&memory, len - 2, 4), Err(VmHostError::BadUpperBounds));
        assert_eq!(mem_load(&memory, len - 4, 4).unwrap().len(), 4);
    }

    #[test]
    fn test_mem_store_grows_one_page() {
        let mut memory = VecMemory::with_pages(1, 3);
        let len = WASM_PAGE_SIZE as i32;

        mem_store(&mut memory, len - 2, b"abcd").unwrap();
        assert_eq!(memory.length(), 2 * WASM_PAGE_SIZE);
        assert_eq!(mem_load(&memory, len - 2, 4).unwrap(), b"abcd");

        let too_far = 3 * len;
        assert_eq!(
            mem_store(&mut memory, too_far, b"x"),
            Err(VmHostError::BadUpperBounds)
        );
        assert_eq!(memory.length(), 3 * WASM_PAGE_SIZE);
    }

    #[test]
    fn test_mem_store_rejects_negative_offset_and_ignores_empty() {
        let mut memory = VecMemory::with_pages(1, 1);
        assert_eq!(
            mem_store(&mut memory, -1, b"a"),
            Err(VmHostError::BadLowerBounds)
        );
        assert!(mem_store(&mut memory, -1, b"").is_ok());
    }

    #[test]
    fn test_mem_load_multiple() {
        let mut memory = VecMemory::with_pages(1, 1);
        mem_store(&mut memory, 0, b"helloworld").unwrap();
        let chunks = mem_load_multiple(&memory, 0, &[5, 5]).unwrap();
        assert_eq!(chunks, vec![b"hello".to_vec(), b"world".to_vec()]);
    }
}
