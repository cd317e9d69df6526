use powerdbg::architecture::power::p10::{
    quiesce_mask, DirectControl, P10Core, DIRECT_CONTROL, QME_SPWU_FSP, QME_SSH_FSP, RAS_STATUS,
    SPECIAL_WKUP_DONE, SPECIAL_WKUP_REQUEST,
};
use powerdbg::target::{
    ChipletContext, ControlOutcome, CoreControl, HwUnitRegistry, RingAccess, TargetStatus,
    ThreadId, UnitClass, UnitDriver,
};
use powerdbg::{Error, FakeBus, FakeSystem, PowerError, TargetError, TargetTree};
use powerdbg_target::{DescriptionError, TopologyDescription, UnitDescription};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const SYSTEM: &str = r#"
name: two-socket
poll:
  interval_us: 1
units:
  - compatible: ibm,power-proc
    children:
      - compatible: ibm,power10-core
        index: 5
        children:
          - compatible: ibm,power10-thread
          - compatible: ibm,power10-thread
          - compatible: ibm,power10-thread
            status: disabled
          - compatible: ibm,power10-thread
      - compatible: test,chiplet
        index: 2
  - compatible: ibm,power-proc
    status: disabled
    children:
      - compatible: ibm,power10-core
        children:
          - compatible: ibm,power10-thread
"#;

const CORE: u32 = 5;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn at(register: u64) -> u64 {
    P10Core::default().translate(CORE, register)
}

/// Reads one bus register per ring word, starting at the ring address.
#[derive(Debug)]
struct ScanRing;

impl RingAccess for ScanRing {
    fn getring(
        &self,
        ctx: &mut ChipletContext<'_>,
        ring_addr: u64,
        ring_len: u64,
        result: &mut [u32],
    ) -> Result<(), Error> {
        let words = ring_len.div_ceil(32) as usize;
        for (address, word) in (ring_addr..).zip(result.iter_mut().take(words)) {
            *word = ctx.bus.read(address)? as u32;
        }
        Ok(())
    }
}

/// Wakes up core 5 on request and lets its threads quiesce when stopped.
fn simulate_core(bus: &FakeBus) {
    let (spwu, ssh, direct_control, ras_status) = (
        at(QME_SPWU_FSP),
        at(QME_SSH_FSP),
        at(DIRECT_CONTROL),
        at(RAS_STATUS),
    );

    bus.on_write(move |registers, address, value| {
        if address == spwu {
            let done = if value & SPECIAL_WKUP_REQUEST != 0 {
                SPECIAL_WKUP_DONE
            } else {
                0
            };
            registers.insert(ssh, done);
        }

        if address == direct_control {
            for id in 0..4 {
                let ras = registers.entry(ras_status).or_default();
                if value & DirectControl::Stop.bit(id) != 0 {
                    *ras |= quiesce_mask(id);
                }
                if value & (DirectControl::Start.bit(id) | DirectControl::ClearMaint.bit(id)) != 0 {
                    *ras &= !quiesce_mask(id);
                }
            }
        }
    });
}

fn build() -> (TargetTree, FakeBus) {
    init_logging();

    let description = TopologyDescription::from_yaml_str(SYSTEM).unwrap();

    let mut registry = HwUnitRegistry::builtin(description.poll);
    registry.register("Test chiplet", "test,chiplet", UnitDriver::Chiplet(Arc::new(ScanRing)));

    let mut system = FakeSystem::new();
    let bus = system.bus_handle(0);
    simulate_core(&bus);

    let tree = TargetTree::build(&description, &registry, &mut system).unwrap();

    (tree, bus)
}

fn thread(tree: &TargetTree, path: &str) -> ThreadId {
    let id = tree.find(path).unwrap_or_else(|| panic!("{path} not found"));
    tree.as_thread(id).unwrap()
}

#[test]
fn topology_lookup() {
    let (tree, _bus) = build();

    let procs = tree.targets_of_class(UnitClass::Proc);
    assert_eq!(procs.len(), 2);
    assert_eq!(tree.path(procs[1]), "/proc1");

    let threads = tree.descendants_of_class(procs[0], UnitClass::Thread);
    let paths: Vec<_> = threads.iter().map(|&id| tree.path(id)).collect();
    assert_eq!(
        paths,
        vec![
            "/proc0/core5/thread0",
            "/proc0/core5/thread1",
            "/proc0/core5/thread2",
            "/proc0/core5/thread3",
        ]
    );

    let core = tree.parent_of_class(threads[1], UnitClass::Core).unwrap();
    assert_eq!(tree.path(core), "/proc0/core5");
    assert_eq!(tree.parent_of_class(threads[1], UnitClass::Proc), Some(procs[0]));
    assert_eq!(tree.parent_of_class(procs[0], UnitClass::Core), None);

    assert_eq!(tree.target(core).name(), "POWER10 core");
    assert!(tree.find("/proc0/chiplet2").is_some());
    assert!(tree.find("/proc0/core4").is_none());
}

#[test]
fn probe_respects_description_and_parents() {
    let (mut tree, _bus) = build();

    tree.probe_all().unwrap();

    let status = |path: &str| tree.target(tree.find(path).unwrap()).status();
    assert_eq!(status("/proc0"), TargetStatus::Enabled);
    assert_eq!(status("/proc0/core5"), TargetStatus::Enabled);
    assert_eq!(status("/proc0/core5/thread1"), TargetStatus::Enabled);
    assert_eq!(status("/proc0/core5/thread2"), TargetStatus::Disabled);
    assert_eq!(status("/proc1"), TargetStatus::Disabled);
    assert_eq!(status("/proc1/core0"), TargetStatus::Disabled);
    assert_eq!(status("/proc1/core0/thread0"), TargetStatus::Disabled);
}

#[test]
fn probing_a_thread_probes_its_core() {
    let (mut tree, bus) = build();
    let id = thread(&tree, "/proc0/core5/thread3");

    assert_eq!(tree.probe(id).unwrap(), TargetStatus::Enabled);

    let core = tree.find("/proc0/core5").unwrap();
    assert_eq!(tree.target(core).status(), TargetStatus::Enabled);
    assert_eq!(bus.writes()[0], (at(QME_SPWU_FSP), SPECIAL_WKUP_REQUEST));
}

#[test]
fn stop_inspect_and_resume_a_thread() {
    let (mut tree, bus) = build();
    tree.probe_all().unwrap();
    let id = thread(&tree, "/proc0/core5/thread1");

    tree.thread_stop(id).unwrap();
    assert!(tree.target(id).thread_status().unwrap().quiesced);

    let ram = tree.ram(id).unwrap();
    ram.putgpr(5, 0xfeed_face_cafe_beef).unwrap();
    ram.putnia(0xc000_0000_0000_7000).unwrap();
    ram.putcr(0x8000_0004).unwrap();
    assert_eq!(ram.getgpr(5).unwrap(), 0xfeed_face_cafe_beef);

    let registers = ram.getregs().unwrap();
    assert_eq!(registers.gprs[5], 0xfeed_face_cafe_beef);
    assert_eq!(registers.nia, 0xc000_0000_0000_7000);
    assert_eq!(registers.cr, 0x8000_0004);
    assert!(!ram.is_setup());

    bus.clear_operations();
    assert_eq!(tree.thread_start(id).unwrap(), ControlOutcome::Completed);
    // The thread is inactive, so it is resumed by clearing maintenance mode.
    assert_eq!(bus.writes(), vec![(at(DIRECT_CONTROL), DirectControl::ClearMaint.bit(1))]);
    assert!(!tree.target(id).thread_status().unwrap().quiesced);

    // Running again, a second start is refused without touching the bus.
    bus.clear_operations();
    assert_eq!(tree.thread_start(id).unwrap(), ControlOutcome::NotQuiesced);
    assert!(bus.writes().is_empty());
}

#[test]
fn ram_sequence_exception_is_an_outcome() {
    let (mut tree, _bus) = build();
    tree.probe_all().unwrap();
    let id = thread(&tree, "/proc0/core5/thread0");

    let ram = tree.ram(id).unwrap();
    // Not an instruction the thread understands.
    let outcome = ram.execute(&[0xffff_ffff], &mut [0]).unwrap();

    assert_eq!(outcome, powerdbg::RamOutcome::Exception { index: 0 });
    assert!(matches!(
        ram.getmem(0x1000),
        Err(PowerError::SequenceException { index: 2 })
    ));
}

#[test]
fn release_clears_wakeup_when_nothing_is_stopped() {
    let (mut tree, bus) = build();
    tree.probe_all().unwrap();

    tree.release_all().unwrap();

    assert_eq!(bus.register(at(QME_SPWU_FSP)), 0);
    let core = tree.find("/proc0/core5").unwrap();
    assert_eq!(tree.target(core).status(), TargetStatus::Released);
    // Disabled units are skipped.
    let fused = tree.find("/proc0/core5/thread2").unwrap();
    assert_eq!(tree.target(fused).status(), TargetStatus::Disabled);
}

#[test]
fn release_keeps_wakeup_for_a_stopped_thread() {
    let (mut tree, bus) = build();
    tree.probe_all().unwrap();
    tree.thread_stop(thread(&tree, "/proc0/core5/thread3")).unwrap();

    tree.release_all().unwrap();

    assert_eq!(bus.register(at(QME_SPWU_FSP)), SPECIAL_WKUP_REQUEST);
    assert!(!bus.writes().contains(&(at(QME_SPWU_FSP), 0)));
}

#[test]
fn releasing_an_unprobed_core_leaves_the_hardware_alone() {
    let (mut tree, bus) = build();
    let core = tree.find("/proc0/core5").unwrap();

    tree.release(core).unwrap();

    assert!(bus.operations().is_empty());
    assert_eq!(tree.target(core).status(), TargetStatus::Released);
    let id = thread(&tree, "/proc0/core5/thread0");
    assert_eq!(tree.target(id).status(), TargetStatus::Unprobed);
    assert!(matches!(
        tree.probe(id),
        Err(Error::Target(TargetError::Released { .. }))
    ));
}

#[test]
fn released_targets_stay_released() {
    let (mut tree, _bus) = build();
    let id = thread(&tree, "/proc0/core5/thread0");
    tree.probe(id).unwrap();
    tree.release(id).unwrap();

    assert!(matches!(
        tree.probe(id),
        Err(Error::Target(TargetError::Released { .. }))
    ));
    assert!(matches!(
        tree.thread_stop(id),
        Err(Error::Target(TargetError::NotEnabled {
            status: TargetStatus::Released,
            ..
        }))
    ));
}

#[test]
fn disabled_thread_cannot_be_controlled() {
    let (mut tree, bus) = build();
    tree.probe_all().unwrap();
    let id = thread(&tree, "/proc0/core5/thread2");
    bus.clear_operations();

    assert!(matches!(
        tree.thread_start(id),
        Err(Error::Target(TargetError::NotEnabled { .. }))
    ));
    assert!(matches!(
        tree.ram(id),
        Err(Error::Target(TargetError::NotEnabled { .. }))
    ));
    assert!(bus.operations().is_empty());
}

#[test]
fn capabilities_follow_the_class() {
    let (tree, _bus) = build();
    let core = tree.find("/proc0/core5").unwrap();
    let chiplet = tree.find("/proc0/chiplet2").unwrap();

    assert!(matches!(
        tree.as_thread(core),
        Err(TargetError::WrongClass {
            expected: UnitClass::Thread,
            found: UnitClass::Core,
            ..
        })
    ));
    assert!(tree.as_chiplet(core).is_err());
    assert!(tree.as_core(core).is_ok());
    assert!(tree.as_chiplet(chiplet).is_ok());
}

#[test]
fn ring_read_from_a_chiplet() {
    let (mut tree, bus) = build();
    tree.probe_all().unwrap();
    let chiplet = tree.as_chiplet(tree.find("/proc0/chiplet2").unwrap()).unwrap();
    bus.set_register(0x3000, 0xaaaa_5555);
    bus.set_register(0x3001, 0x1234_5678);

    let mut ring = [0u32; 2];
    tree.getring(chiplet, 0x3000, 40, &mut ring).unwrap();
    assert_eq!(ring, [0xaaaa_5555, 0x1234_5678]);

    let mut short = [0u32; 1];
    assert!(matches!(
        tree.getring(chiplet, 0x3000, 40, &mut short),
        Err(Error::Target(TargetError::RingBufferTooSmall {
            ring_len: 40,
            words: 1
        }))
    ));
}

#[test]
fn threads_without_transport_have_no_ram() {
    init_logging();
    let description = TopologyDescription::power10("no-ram", 1, &[0], 1);
    let mut system = FakeSystem::new().without_ram();
    system.bus_handle(0).on_write(|registers, address, _| {
        if address == P10Core::default().translate(0, QME_SPWU_FSP) {
            registers.insert(P10Core::default().translate(0, QME_SSH_FSP), SPECIAL_WKUP_DONE);
        }
    });
    let mut tree = TargetTree::build(&description, &HwUnitRegistry::builtin(description.poll), &mut system).unwrap();
    tree.probe_all().unwrap();

    let id = tree.as_thread(tree.targets_of_class(UnitClass::Thread)[0]).unwrap();

    assert!(matches!(
        tree.ram(id),
        Err(Error::Target(TargetError::RamUnavailable { .. }))
    ));
}

#[test]
fn unknown_compatible_is_rejected() {
    let description = TopologyDescription::from_yaml_str(
        r#"
name: unknown
units:
  - compatible: ibm,power-proc
    children:
      - compatible: ibm,power9-core
"#,
    )
    .unwrap();

    let error = TargetTree::build(
        &description,
        &HwUnitRegistry::builtin(description.poll),
        &mut FakeSystem::new(),
    )
    .unwrap_err();

    assert!(matches!(
        error,
        Error::Target(TargetError::UnknownCompatible(compatible)) if compatible == "ibm,power9-core"
    ));
}

#[test]
fn clashing_sibling_indexes_are_rejected() {
    let description = TopologyDescription {
        name: "clash".to_string(),
        poll: Default::default(),
        units: vec![UnitDescription::new(powerdbg_target::compatible::PROC).with_children([
            UnitDescription::new(powerdbg_target::compatible::POWER10_CORE).with_children([
                UnitDescription::new(powerdbg_target::compatible::POWER10_THREAD).with_index(1),
                UnitDescription::new(powerdbg_target::compatible::POWER10_THREAD),
            ]),
        ])],
    };

    let error = TargetTree::build(
        &description,
        &HwUnitRegistry::builtin(description.poll),
        &mut FakeSystem::new(),
    )
    .unwrap_err();

    assert!(matches!(
        error,
        Error::Description(DescriptionError::DuplicateIndex { index: 1, .. })
    ));
}
