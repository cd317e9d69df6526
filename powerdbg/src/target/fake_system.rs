#![allow(missing_docs)] // Don't require docs for test code
use std::collections::BTreeMap;

use super::SystemBackend;
use crate::architecture::power::fake_ram::FakeRam;
use crate::architecture::power::RamTransport;
use crate::bus::fake_bus::FakeBus;
use crate::bus::{BusAccess, BusError};

/// A system made of fake buses and fake RAM transports.
///
/// Every processor module gets its own [`FakeBus`]; handles to them stay
/// available through [`FakeSystem::bus_handle`]. Threads get a fresh [`FakeRam`] each,
/// unless RAM is disabled.
#[derive(Debug, Default)]
pub struct FakeSystem {
    buses: BTreeMap<u32, FakeBus>,
    without_ram: bool,
}

impl FakeSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Threads get no RAM transport.
    pub fn without_ram(mut self) -> Self {
        self.without_ram = true;
        self
    }

    /// The bus of processor module `proc`.
    pub fn bus_handle(&mut self, proc: u32) -> FakeBus {
        self.buses.entry(proc).or_default().clone()
    }
}

impl SystemBackend for FakeSystem {
    fn bus(&mut self, proc: u32) -> Result<Box<dyn BusAccess>, BusError> {
        Ok(Box::new(self.bus_handle(proc)))
    }

    fn ram_transport(&mut self, _proc: u32, _core: u32, _thread: u32) -> Option<Box<dyn RamTransport>> {
        if self.without_ram {
            return None;
        }
        Some(Box::new(FakeRam::new()))
    }
}
