//! Arbitrary-precision integer handles exposed to contracts.

use crate::state_stack::StateStack;
use num_bigint::BigInt;
use std::collections::BTreeMap;

/// Handle arena. Each frame starts empty and sees only its own handles.
#[derive(Debug, Clone, Default)]
pub struct BigIntContext {
    values: StateStack<BTreeMap<i32, BigInt>>,
}

impl BigIntContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init_state(&mut self) {
        self.values.set_active(BTreeMap::new());
    }

    pub fn push_state(&mut self) {
        self.values.push();
    }

    pub fn pop_set_active_state(&mut self) {
        self.values.pop_set_active();
    }

    pub fn pop_discard(&mut self) {
        self.values.pop_discard();
    }

    pub fn clear_state_stack(&mut self) {
        self.values.clear();
    }

    pub fn depth(&self) -> usize {
        self.values.depth()
    }

    /// Store a small value under a fresh handle.
    pub fn put(&mut self, value: i64) -> i32 {
        self.put_big(BigInt::from(value))
    }

    pub fn put_big(&mut self, value: BigInt) -> i32 {
        let values = self.values.active_mut();
        let handle = values
            .keys()
            .next_back()
            .map(|last| last.saturating_add(1))
            .unwrap_or(0);
        values.insert(handle, value);
        handle
    }

    /// Value behind `handle`; unknown handles read as zero.
    pub fn get(&self, handle: i32) -> BigInt {
        self.values
            .active()
            .get(&handle)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set(&mut self, handle: i32, value: BigInt) {
        self.values.active_mut().insert(handle, value);
    }

    pub fn contains(&self, handle: i32) -> bool {
        self.values.active().contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.values.active().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.active().is_empty()
    }
}
