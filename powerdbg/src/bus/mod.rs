//! Access to the out-of-band debug bus.
//!
//! The bus moves one 64-bit value per transaction to or from a register
//! identified by its bus address. How this happens (FSI, i2c, a kernel driver)
//! is up to the [`BusAccess`] implementation.

pub(crate) mod fake_bus;

use std::fmt;
use std::sync::Arc;

use crate::target::CoreControl;

/// Errors reported by a debug bus backend.
#[derive(thiserror::Error, Debug)]
pub enum BusError {
    /// The bus could not be reached at all.
    #[error("The debug bus is not reachable")]
    Unreachable,
    /// Fewer bytes than requested were transferred.
    #[error("Short transfer on the debug bus: {transferred} of {expected} bytes")]
    ShortTransfer {
        /// Bytes actually moved.
        transferred: usize,
        /// Bytes requested.
        expected: usize,
    },
    /// Nothing answered at the given address.
    #[error("No register responded at bus address {0:#010x}")]
    NoResponse(u64),
    /// A backend specific error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A handle to the debug bus of one processor module.
pub trait BusAccess: fmt::Debug + Send {
    /// Reads the 64-bit register at `address`.
    fn read(&mut self, address: u64) -> Result<u64, BusError>;

    /// Writes `value` to the 64-bit register at `address`.
    fn write(&mut self, address: u64, value: u64) -> Result<(), BusError>;
}

impl<T: BusAccess + ?Sized> BusAccess for Box<T> {
    fn read(&mut self, address: u64) -> Result<u64, BusError> {
        (**self).read(address)
    }

    fn write(&mut self, address: u64, value: u64) -> Result<(), BusError> {
        (**self).write(address, value)
    }
}

/// One address translation step on the way from a target to its bus.
#[derive(Clone)]
pub(crate) struct Translation {
    pub(crate) driver: Arc<dyn CoreControl>,
    pub(crate) index: u32,
}

/// Bus access scoped to one target.
///
/// Addresses handed to a `ScopedBus` are relative to the target it was created
/// for. They are translated by every translating ancestor, innermost first,
/// before reaching the bus.
pub struct ScopedBus<'a> {
    bus: &'a mut dyn BusAccess,
    translations: Vec<Translation>,
}

impl<'a> ScopedBus<'a> {
    pub(crate) fn new(bus: &'a mut dyn BusAccess, translations: Vec<Translation>) -> Self {
        Self { bus, translations }
    }

    /// The bus address a target relative `address` resolves to.
    pub fn translate(&self, address: u64) -> u64 {
        self.translations
            .iter()
            .fold(address, |address, step| step.driver.translate(step.index, address))
    }

    /// Reads a target relative register.
    pub fn read(&mut self, address: u64) -> Result<u64, BusError> {
        let translated = self.translate(address);
        let value = self.bus.read(translated)?;
        tracing::trace!("bus read  {:#010x} ({:#010x}) = {:#018x}", address, translated, value);
        Ok(value)
    }

    /// Writes a target relative register.
    pub fn write(&mut self, address: u64, value: u64) -> Result<(), BusError> {
        let translated = self.translate(address);
        tracing::trace!("bus write {:#010x} ({:#010x}) = {:#018x}", address, translated, value);
        self.bus.write(translated, value)
    }
}

impl fmt::Debug for ScopedBus<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedBus")
            .field("bus", &self.bus)
            .field("translations", &self.translations.len())
            .finish()
    }
}
