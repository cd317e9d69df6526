//! POWER10 thread and core control.
//!
//! All registers are addressed relative to the core and reach the bus through
//! [`P10Core::translate`](CoreControl::translate). Timeouts and procedures
//! follow the firmware's direct-control code.

use std::thread;

use powerdbg_target::PollConfig;

use crate::bits::{get_field, ppc_bit, ppc_bitmask};
use crate::bus::{BusError, ScopedBus};
use crate::target::{
    ControlOutcome, CoreContext, CoreControl, SleepState, SmtState, ThreadContext, ThreadControl,
    ThreadState,
};
use crate::Error;

/// Per thread sleep state of the core.
pub const CORE_THREAD_STATE: u64 = 0x28412;
/// Active threads and SMT mode of the core.
pub const THREAD_INFO: u64 = 0x28413;
/// Thread start, stop and reset requests.
pub const DIRECT_CONTROL: u64 = 0x28449;
/// Per thread quiesce status.
pub const RAS_STATUS: u64 = 0x28454;

/// Special wakeup status, as seen by the service processor.
pub const QME_SSH_FSP: u64 = 0xE8824;
/// Set in `QME_SSH_FSP` once the core is awake.
pub const SPECIAL_WKUP_DONE: u64 = ppc_bit(1);
/// Special wakeup request, as issued by the service processor.
pub const QME_SPWU_FSP: u64 = 0xE8834;
/// Requests special wakeup in `QME_SPWU_FSP`.
pub const SPECIAL_WKUP_REQUEST: u64 = ppc_bit(0);

const CORES_PER_EQ: u32 = 4;
const EQ0_CHIPLET_ID: u64 = 0x20;

/// Direct control actions, one bit per thread and action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectControl {
    /// Clear maintenance mode, resuming an inactive or stopped thread.
    ClearMaint,
    /// System reset.
    Sreset,
    /// Start instruction execution.
    Start,
    /// Stop instruction execution.
    Stop,
}

impl DirectControl {
    /// The `DIRECT_CONTROL` value requesting this action on thread `id`.
    pub const fn bit(self, id: u32) -> u64 {
        let offset = match self {
            DirectControl::ClearMaint => 3,
            DirectControl::Sreset => 4,
            DirectControl::Start => 6,
            DirectControl::Stop => 7,
        };
        ppc_bit(offset + 8 * id)
    }
}

/// The `RAS_STATUS` field that reads all ones once thread `id` is quiesced.
pub const fn quiesce_mask(id: u32) -> u64 {
    ppc_bitmask(1 + 8 * id, 3 + 8 * id)
}

fn read_state(bus: &mut ScopedBus<'_>, id: u32) -> Result<ThreadState, BusError> {
    let ras_status = bus.read(RAS_STATUS)?;
    let quiesced = get_field(quiesce_mask(id), ras_status) == 0x7;

    let thread_info = bus.read(THREAD_INFO)?;
    let active = thread_info & ppc_bit(id) != 0;
    let smt_state = match get_field(ppc_bitmask(8, 9), thread_info) {
        0 => SmtState::Smt1,
        2 => SmtState::Smt2,
        3 => SmtState::Smt4,
        _ => SmtState::Unknown,
    };

    let core_thread_state = bus.read(CORE_THREAD_STATE)?;
    let sleep_state = if core_thread_state & ppc_bit(56 + id) != 0 {
        SleepState::Stop
    } else {
        SleepState::Run
    };

    Ok(ThreadState {
        quiesced,
        active,
        sleep_state,
        smt_state,
    })
}

/// A POWER10 hardware thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct P10Thread {
    poll: PollConfig,
}

impl P10Thread {
    /// Creates the driver, polling for quiesce as `poll` says.
    pub fn new(poll: PollConfig) -> Self {
        Self { poll }
    }
}

impl ThreadControl for P10Thread {
    fn probe(&self, ctx: &mut ThreadContext<'_>) -> Result<(), Error> {
        ctx.thread.id = ctx.index;

        match read_state(&mut ctx.bus, ctx.thread.id) {
            Ok(state) => ctx.thread.status = state,
            Err(error) => tracing::warn!("Could not read the state of thread {}: {}", ctx.index, error),
        }

        Ok(())
    }

    fn release(&self, ctx: &mut ThreadContext<'_>) -> Result<(), Error> {
        if ctx.thread.status.quiesced {
            // Someone else stopped this thread and needs the core awake.
            ctx.core.release_spwkup = false;
        }
        Ok(())
    }

    fn state(&self, ctx: &mut ThreadContext<'_>) -> Result<ThreadState, Error> {
        Ok(read_state(&mut ctx.bus, ctx.thread.id)?)
    }

    fn start(&self, ctx: &mut ThreadContext<'_>) -> Result<ControlOutcome, Error> {
        let status = ctx.thread.status;
        if !status.quiesced {
            return Ok(ControlOutcome::NotQuiesced);
        }

        let action = if !status.active || status.sleep_state == SleepState::Stop {
            DirectControl::ClearMaint
        } else {
            DirectControl::Start
        };
        tracing::debug!("starting thread {} with {:?}", ctx.thread.id, action);
        ctx.bus.write(DIRECT_CONTROL, action.bit(ctx.thread.id))?;

        ctx.thread.status = read_state(&mut ctx.bus, ctx.thread.id)?;

        Ok(ControlOutcome::Completed)
    }

    fn stop(&self, ctx: &mut ThreadContext<'_>) -> Result<(), Error> {
        let id = ctx.thread.id;

        ctx.bus.write(DIRECT_CONTROL, DirectControl::Stop.bit(id))?;

        let mut state = read_state(&mut ctx.bus, id)?;
        let mut polls = 0;
        while !state.quiesced {
            if polls == self.poll.limit {
                tracing::error!("Unable to quiesce thread {}", id);
                break;
            }
            thread::sleep(self.poll.interval());
            state = read_state(&mut ctx.bus, id)?;
            polls += 1;
        }

        ctx.thread.status = state;

        Ok(())
    }

    fn sreset(&self, ctx: &mut ThreadContext<'_>) -> Result<ControlOutcome, Error> {
        if !ctx.thread.status.quiesced {
            return Ok(ControlOutcome::NotQuiesced);
        }

        ctx.bus.write(DIRECT_CONTROL, DirectControl::Sreset.bit(ctx.thread.id))?;

        ctx.thread.status = read_state(&mut ctx.bus, ctx.thread.id)?;

        Ok(ControlOutcome::Completed)
    }
}

/// A POWER10 core.
#[derive(Debug, Clone, Copy, Default)]
pub struct P10Core {
    poll: PollConfig,
}

impl P10Core {
    /// Creates the driver, polling for special wakeup as `poll` says.
    pub fn new(poll: PollConfig) -> Self {
        Self { poll }
    }
}

impl CoreControl for P10Core {
    fn probe(&self, ctx: &mut CoreContext<'_>) -> Result<(), Error> {
        ctx.bus.write(QME_SPWU_FSP, SPECIAL_WKUP_REQUEST)?;

        let mut done = false;
        for _ in 0..self.poll.limit {
            thread::sleep(self.poll.interval());
            if ctx.bus.read(QME_SSH_FSP)? & SPECIAL_WKUP_DONE != 0 {
                done = true;
                break;
            }
        }

        if !done {
            tracing::error!(
                "Timeout waiting for special wakeup on core {} ({:#010x})",
                ctx.index,
                ctx.bus.translate(0)
            );
        }

        ctx.core.release_spwkup = true;

        Ok(())
    }

    fn release(&self, ctx: &mut CoreContext<'_>) -> Result<(), Error> {
        if !ctx.core.release_spwkup {
            tracing::debug!("leaving special wakeup asserted on core {}", ctx.index);
            return Ok(());
        }

        ctx.bus.write(QME_SPWU_FSP, 0)?;

        Ok(())
    }

    fn translate(&self, index: u32, address: u64) -> u64 {
        let chiplet_id = EQ0_CHIPLET_ID + u64::from(index / CORES_PER_EQ);
        let region: u64 = match index % CORES_PER_EQ {
            0 => 8,
            1 => 4,
            2 => 2,
            _ => 1,
        };

        let address = (address & 0xFFFF_FFFF_C0FF_FFFF) | ((chiplet_id & 0x3F) << 24);
        (address & 0xFFFF_FFFF_FFFF_0FFF) | ((region & 0xF) << 12)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::set_field;
    use crate::bus::fake_bus::FakeBus;
    use crate::target::fake_system::FakeSystem;
    use crate::target::{HwUnitRegistry, TargetStatus, TargetTree, ThreadId, UnitClass};
    use powerdbg_target::TopologyDescription;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    const CORE: u32 = 5;

    fn poll() -> PollConfig {
        PollConfig {
            interval_us: 1,
            limit: 100,
        }
    }

    fn at(register: u64) -> u64 {
        P10Core::new(poll()).translate(CORE, register)
    }

    /// One processor with core 5 and four threads. The bus acknowledges
    /// special wakeup but ignores direct control.
    fn system() -> (TargetTree, FakeBus) {
        let mut system = FakeSystem::new();
        let bus = system.bus_handle(0);
        bus.on_write(|registers, address, value| {
            if address == at(QME_SPWU_FSP) {
                let done = if value & SPECIAL_WKUP_REQUEST != 0 {
                    SPECIAL_WKUP_DONE
                } else {
                    0
                };
                registers.insert(at(QME_SSH_FSP), done);
            }
        });

        let description = TopologyDescription::power10("test", 1, &[CORE], 4);
        let tree = TargetTree::build(&description, &HwUnitRegistry::builtin(poll()), &mut system).unwrap();

        (tree, bus)
    }

    fn thread(tree: &TargetTree, index: usize) -> ThreadId {
        let id = tree.targets_of_class(UnitClass::Thread)[index];
        tree.as_thread(id).unwrap()
    }

    fn quiesce(bus: &FakeBus, id: u32) {
        let ras = bus.register(at(RAS_STATUS));
        bus.set_register(at(RAS_STATUS), ras | quiesce_mask(id));
    }

    #[test_case(0, 0x20, 8)]
    #[test_case(1, 0x20, 4)]
    #[test_case(2, 0x20, 2)]
    #[test_case(3, 0x20, 1)]
    #[test_case(4, 0x21, 8)]
    #[test_case(5, 0x21, 4)]
    #[test_case(10, 0x22, 2)]
    #[test_case(31, 0x27, 1)]
    fn core_translation(index: u32, chiplet: u64, region: u64) {
        let core = P10Core::default();

        assert_eq!(core.translate(index, 0), chiplet << 24 | region << 12);
        assert_eq!(
            core.translate(index, RAS_STATUS),
            0x0002_0454 | chiplet << 24 | region << 12
        );
    }

    #[test]
    fn translation_keeps_unrelated_bits() {
        assert_eq!(P10Core::default().translate(5, u64::MAX), 0xFFFF_FFFF_E1FF_4FFF);
    }

    #[test]
    fn thread_state_decoding() {
        let (mut tree, bus) = system();
        tree.probe_all().unwrap();

        quiesce(&bus, 1);
        bus.set_register(at(THREAD_INFO), ppc_bit(1) | set_field(ppc_bitmask(8, 9), 0, 3));
        bus.set_register(at(CORE_THREAD_STATE), ppc_bit(57));

        let state = tree.thread_state(thread(&tree, 1)).unwrap();
        assert_eq!(
            state,
            ThreadState {
                quiesced: true,
                active: true,
                sleep_state: SleepState::Stop,
                smt_state: SmtState::Smt4,
            }
        );

        let other = tree.thread_state(thread(&tree, 0)).unwrap();
        assert_eq!(
            other,
            ThreadState {
                quiesced: false,
                active: false,
                sleep_state: SleepState::Run,
                smt_state: SmtState::Smt4,
            }
        );
    }

    #[test_case(0, SmtState::Smt1)]
    #[test_case(1, SmtState::Unknown)]
    #[test_case(2, SmtState::Smt2)]
    #[test_case(3, SmtState::Smt4)]
    fn smt_modes(field: u64, expected: SmtState) {
        let (mut tree, bus) = system();
        tree.probe_all().unwrap();

        bus.set_register(at(THREAD_INFO), set_field(ppc_bitmask(8, 9), 0, field));

        assert_eq!(tree.thread_state(thread(&tree, 0)).unwrap().smt_state, expected);
    }

    #[test]
    fn probe_caches_state() {
        let (mut tree, bus) = system();
        quiesce(&bus, 2);

        tree.probe_all().unwrap();

        let cached = |index| tree.target(thread(&tree, index)).thread_status().unwrap();
        assert!(cached(2).quiesced);
        assert!(!cached(3).quiesced);
        assert_eq!(tree.target(thread(&tree, 2)).status(), TargetStatus::Enabled);
    }

    #[test]
    fn start_refuses_running_thread() {
        let (mut tree, bus) = system();
        tree.probe_all().unwrap();
        bus.clear_operations();

        let outcome = tree.thread_start(thread(&tree, 0)).unwrap();

        assert_eq!(outcome, ControlOutcome::NotQuiesced);
        assert!(bus.writes().is_empty());
    }

    #[test]
    fn sreset_refuses_running_thread() {
        let (mut tree, bus) = system();
        tree.probe_all().unwrap();
        bus.clear_operations();

        let outcome = tree.thread_sreset(thread(&tree, 3)).unwrap();

        assert_eq!(outcome, ControlOutcome::NotQuiesced);
        assert!(bus.writes().is_empty());
    }

    #[test_case(false, 0, DirectControl::ClearMaint; "inactive")]
    #[test_case(true, ppc_bit(58), DirectControl::ClearMaint; "active and stopped")]
    #[test_case(true, 0, DirectControl::Start; "active and running")]
    fn start_picks_action_from_state(active: bool, core_thread_state: u64, action: DirectControl) {
        let (mut tree, bus) = system();
        quiesce(&bus, 2);
        if active {
            bus.set_register(at(THREAD_INFO), ppc_bit(2));
        }
        bus.set_register(at(CORE_THREAD_STATE), core_thread_state);
        tree.probe_all().unwrap();
        bus.clear_operations();

        let outcome = tree.thread_start(thread(&tree, 2)).unwrap();

        assert_eq!(outcome, ControlOutcome::Completed);
        assert_eq!(bus.writes(), vec![(at(DIRECT_CONTROL), action.bit(2))]);
    }

    #[test]
    fn sreset_quiesced_thread() {
        let (mut tree, bus) = system();
        quiesce(&bus, 1);
        tree.probe_all().unwrap();
        bus.clear_operations();

        let outcome = tree.thread_sreset(thread(&tree, 1)).unwrap();

        assert_eq!(outcome, ControlOutcome::Completed);
        assert_eq!(bus.writes(), vec![(at(DIRECT_CONTROL), ppc_bit(12))]);
    }

    #[test]
    fn stop_gives_up_after_the_poll_limit() {
        let (mut tree, bus) = system();
        tree.probe_all().unwrap();
        bus.clear_operations();

        tree.thread_stop(thread(&tree, 3)).unwrap();

        assert_eq!(bus.writes(), vec![(at(DIRECT_CONTROL), ppc_bit(31))]);
        // One read before polling, then one per poll.
        assert_eq!(bus.read_count(at(RAS_STATUS)), poll().limit as usize + 1);
        assert!(!tree.target(thread(&tree, 3)).thread_status().unwrap().quiesced);
    }

    #[test]
    fn stop_returns_once_quiesced() {
        let (mut tree, bus) = system();
        tree.probe_all().unwrap();

        let ras_status = at(RAS_STATUS);
        let direct_control = at(DIRECT_CONTROL);
        let spwu = at(QME_SPWU_FSP);
        let ssh = at(QME_SSH_FSP);
        bus.on_write(move |registers, address, value| {
            if address == direct_control && value == DirectControl::Stop.bit(0) {
                *registers.entry(ras_status).or_default() |= quiesce_mask(0);
            }
            if address == spwu {
                registers.insert(ssh, 0);
            }
        });
        bus.clear_operations();

        tree.thread_stop(thread(&tree, 0)).unwrap();

        assert_eq!(bus.read_count(at(RAS_STATUS)), 1);
        assert!(tree.target(thread(&tree, 0)).thread_status().unwrap().quiesced);
    }

    #[test]
    fn core_probe_requests_special_wakeup() {
        let (mut tree, bus) = system();
        let core = tree.targets_of_class(UnitClass::Core)[0];

        assert_eq!(tree.probe(core).unwrap(), TargetStatus::Enabled);

        assert_eq!(bus.writes(), vec![(at(QME_SPWU_FSP), SPECIAL_WKUP_REQUEST)]);
        assert_eq!(bus.read_count(at(QME_SSH_FSP)), 1);
        assert_eq!(tree.target(core).release_spwkup(), Some(true));
    }

    #[test]
    fn core_probe_survives_wakeup_timeout() {
        let mut system = FakeSystem::new();
        let bus = system.bus_handle(0);
        let description = TopologyDescription::power10("test", 1, &[CORE], 1);
        let mut tree = TargetTree::build(&description, &HwUnitRegistry::builtin(poll()), &mut system).unwrap();
        let core = tree.targets_of_class(UnitClass::Core)[0];

        assert_eq!(tree.probe(core).unwrap(), TargetStatus::Enabled);

        assert_eq!(bus.read_count(at(QME_SSH_FSP)), poll().limit as usize);
        assert_eq!(tree.target(core).release_spwkup(), Some(true));
    }

    #[test]
    fn core_release_clears_wakeup_when_no_thread_is_quiesced() {
        let (mut tree, bus) = system();
        let core = tree.targets_of_class(UnitClass::Core)[0];
        tree.probe(core).unwrap();

        tree.release(core).unwrap();

        assert_eq!(bus.register(at(QME_SPWU_FSP)), 0);
        assert_eq!(bus.writes().last(), Some(&(at(QME_SPWU_FSP), 0)));
        for index in 0..4 {
            assert_eq!(tree.target(thread(&tree, index)).status(), TargetStatus::Released);
        }
        assert_eq!(tree.target(core).status(), TargetStatus::Released);
    }

    #[test]
    fn core_release_keeps_wakeup_for_quiesced_thread() {
        let (mut tree, bus) = system();
        quiesce(&bus, 3);
        let core = tree.targets_of_class(UnitClass::Core)[0];
        tree.probe_all().unwrap();

        tree.release(core).unwrap();

        assert_eq!(tree.target(core).release_spwkup(), Some(false));
        assert_eq!(bus.register(at(QME_SPWU_FSP)), SPECIAL_WKUP_REQUEST);
        assert!(!bus.writes().contains(&(at(QME_SPWU_FSP), 0)));
    }

    #[test]
    fn thread_released_first_still_counts() {
        let (mut tree, bus) = system();
        quiesce(&bus, 0);
        tree.probe_all().unwrap();

        // Released on its own before the core goes.
        tree.release(thread(&tree, 0)).unwrap();
        let core = tree.targets_of_class(UnitClass::Core)[0];
        tree.release(core).unwrap();

        assert_eq!(bus.register(at(QME_SPWU_FSP)), SPECIAL_WKUP_REQUEST);
    }
}
