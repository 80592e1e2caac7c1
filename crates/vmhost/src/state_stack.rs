//! Generic push/pop stack of context states.
//!
//! Every execution context keeps its mutable fields in one `S` value and
//! saves a copy of it here when a nested call starts. The nested call
//! then finishes with exactly one of the pop operations.

use tracing::trace;

/// Active state plus the saved states of the enclosing calls.
#[derive(Debug, Clone, Default)]
pub struct StateStack<S: Clone> {
    active: S,
    stack: Vec<S>,
}

impl<S: Clone> StateStack<S> {
    pub fn new(initial: S) -> Self {
        Self {
            active: initial,
            stack: Vec::new(),
        }
    }

    /// Get the active state.
    pub fn active(&self) -> &S {
        &self.active
    }

    /// Get the active state mutably.
    pub fn active_mut(&mut self) -> &mut S {
        &mut self.active
    }

    /// Replace the active state, keeping the saved ones.
    pub fn set_active(&mut self, state: S) {
        self.active = state;
    }

    /// Save a copy of the active state.
    pub fn push(&mut self) {
        self.stack.push(self.active.clone());
    }

    /// Restore the most recently saved state, dropping the active one.
    pub fn pop_set_active(&mut self) {
        match self.stack.pop() {
            Some(prev) => self.active = prev,
            None => trace!("pop_set_active on empty state stack"),
        }
    }

    /// Drop the most recently saved state and keep the active one.
    pub fn pop_discard(&mut self) {
        if self.stack.pop().is_none() {
            trace!("pop_discard on empty state stack");
        }
    }

    /// Restore the saved state after folding the active one into it.
    pub fn pop_merge<F>(&mut self, merge: F)
    where
        F: FnOnce(&mut S, S),
    {
        match self.stack.pop() {
            Some(parent) => {
                let child = std::mem::replace(&mut self.active, parent);
                merge(&mut self.active, child);
            }
            None => trace!("pop_merge on empty state stack"),
        }
    }

    /// Drop every saved state.
    pub fn clear(&mut self) {
        self.stack.clear();
    }

    /// Number of saved states.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Iterate over the saved states, outermost first.
    pub fn saved(&self) -> impl Iterator<Item = &S> {
        self.stack.iter()
    }
}
