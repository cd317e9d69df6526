#![allow(missing_docs)] // Don't require docs for test code
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Debug,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use super::{BusAccess, BusError};

/// A recorded bus transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read(u64),
    Write(u64, u64),
}

type WriteHook = Box<dyn FnMut(&mut BTreeMap<u64, u64>, u64, u64) + Send>;

#[derive(Default)]
struct FakeBusState {
    registers: BTreeMap<u64, u64>,
    unreachable: BTreeSet<u64>,
    operations: Vec<Operation>,
    write_hook: Option<WriteHook>,
}

/// This is a mock debug bus which can be used for mocking things in tests or for dry runs.
///
/// Registers live in a map keyed by bus address; reading a register nobody wrote
/// returns zero. Clones share the same register file and operation log, so a test
/// can keep one handle while the target tree owns another.
#[derive(Clone, Default)]
pub struct FakeBus {
    state: Arc<Mutex<FakeBusState>>,
}

impl FakeBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeBusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Presets the value of a register without recording an operation.
    pub fn set_register(&self, address: u64, value: u64) {
        self.state().registers.insert(address, value);
    }

    /// The current value of a register.
    pub fn register(&self, address: u64) -> u64 {
        self.state().registers.get(&address).copied().unwrap_or(0)
    }

    /// Makes every access to `address` fail with [`BusError::NoResponse`].
    pub fn make_unreachable(&self, address: u64) {
        self.state().unreachable.insert(address);
    }

    /// Installs a hook run after every write, used to model hardware side effects.
    pub fn on_write(&self, hook: impl FnMut(&mut BTreeMap<u64, u64>, u64, u64) + Send + 'static) {
        self.state().write_hook = Some(Box::new(hook));
    }

    /// All transactions seen so far, in order.
    pub fn operations(&self) -> Vec<Operation> {
        self.state().operations.clone()
    }

    /// All writes seen so far, in order.
    pub fn writes(&self) -> Vec<(u64, u64)> {
        self.state()
            .operations
            .iter()
            .filter_map(|operation| match *operation {
                Operation::Write(address, value) => Some((address, value)),
                Operation::Read(_) => None,
            })
            .collect()
    }

    /// Number of reads of `address` seen so far.
    pub fn read_count(&self, address: u64) -> usize {
        self.state()
            .operations
            .iter()
            .filter(|operation| **operation == Operation::Read(address))
            .count()
    }

    pub fn clear_operations(&self) {
        self.state().operations.clear();
    }
}

impl Debug for FakeBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("FakeBus")
            .field("registers", &state.registers)
            .field("operations", &state.operations.len())
            .finish()
    }
}

impl BusAccess for FakeBus {
    fn read(&mut self, address: u64) -> Result<u64, BusError> {
        let mut state = self.state();
        state.operations.push(Operation::Read(address));

        if state.unreachable.contains(&address) {
            return Err(BusError::NoResponse(address));
        }

        Ok(state.registers.get(&address).copied().unwrap_or(0))
    }

    fn write(&mut self, address: u64, value: u64) -> Result<(), BusError> {
        let mut state = self.state();
        state.operations.push(Operation::Write(address, value));

        if state.unreachable.contains(&address) {
            return Err(BusError::NoResponse(address));
        }

        let FakeBusState {
            registers,
            write_hook,
            ..
        } = &mut *state;

        registers.insert(address, value);
        if let Some(hook) = write_hook {
            hook(registers, address, value);
        }

        Ok(())
    }
}
