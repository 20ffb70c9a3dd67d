//! Integration tests wiring the scheduler, interrupt line, and I/O bus
//! into a miniature machine core, then saving and restoring the whole
//! machine through a single snapshot container.

use std::cell::RefCell;
use std::rc::Rc;

use emu_core::{Cycles, IoDevice};
use emu_io::{DetachAction, IoBus, IoBusConfig, IoPriority, IoSource};
use emu_sched::{AlarmContext, AlarmHandle, InterruptLine, LineKind, SourceHandle};
use format_snapshot::{Snapshot, SnapshotError, Snapshottable};

const TIMER_PERIOD: u64 = 100;

/// A countdown timer chip: fires a periodic interrupt and exposes its
/// fire count as two read-only registers. The chip owns its schedule
/// (the absolute cycle of its next tick), so it survives a snapshot
/// reload with its phase intact.
struct TimerChip {
    name: String,
    fired: u32,
    next_tick: Cycles,
    line: Rc<RefCell<InterruptLine>>,
    irq: SourceHandle,
}

impl IoDevice for TimerChip {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, addr: u16) -> Option<u8> {
        match addr {
            0 => Some(self.fired as u8),
            1 => Some((self.fired >> 8) as u8),
            _ => None,
        }
    }

    fn write(&mut self, addr: u16, value: u8) {
        // writing either register acknowledges the interrupt
        let _ = (addr, value);
        self.line.borrow_mut().set_source(self.irq, false);
    }
}

impl Snapshottable for TimerChip {
    fn module_name(&self) -> &str {
        &self.name
    }

    fn module_version(&self) -> (u8, u8) {
        (1, 0)
    }

    fn snapshot_write(&self, snapshot: &mut Snapshot) -> Result<(), SnapshotError> {
        let mut m = snapshot.create_module(&self.name, 1, 0)?;
        m.write_u32(self.fired);
        m.write_clock(self.next_tick);
        m.close()
    }

    fn snapshot_read(&mut self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        let mut m = snapshot.open_module(&self.name)?;
        m.require_version(1, 0)?;
        let fired = m.read_u32();
        let next_tick = m.read_clock();
        m.close()?;
        self.fired = fired;
        self.next_tick = next_tick;
        Ok(())
    }
}

struct Machine {
    alarms: AlarmContext,
    line: Rc<RefCell<InterruptLine>>,
    bus: IoBus,
    timer: Rc<RefCell<TimerChip>>,
    timer_alarm: AlarmHandle,
}

fn make_machine() -> Machine {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut alarms = AlarmContext::new("MAINCPU");
    let line = Rc::new(RefCell::new(InterruptLine::new("INTLINE")));
    let irq = line.borrow_mut().new_source("TIMER", LineKind::Irq);

    let timer = Rc::new(RefCell::new(TimerChip {
        name: "TIMER".to_owned(),
        fired: 0,
        next_tick: Cycles::new(TIMER_PERIOD),
        line: Rc::clone(&line),
        irq,
    }));

    let callback_timer = Rc::clone(&timer);
    let callback_line = Rc::clone(&line);
    let timer_alarm = alarms.new_alarm(
        "timer",
        Box::new(move |ctx, handle, _offset| {
            let next_tick = {
                let mut chip = callback_timer.borrow_mut();
                chip.fired += 1;
                chip.next_tick += Cycles::new(TIMER_PERIOD);
                chip.next_tick
            };
            callback_line.borrow_mut().set_source(irq, true);
            ctx.set(handle, next_tick).unwrap();
        }),
    );
    alarms
        .set(timer_alarm, Cycles::new(TIMER_PERIOD))
        .unwrap();

    let mut bus = IoBus::new(&IoBusConfig::new("IOBUS", &[0xDE]));
    bus.register(IoSource {
        name: "TIMER".to_owned(),
        start: 0xDE00,
        end: 0xDEFF,
        address_mask: 0x01,
        priority: IoPriority::Normal,
        detach: DetachAction::None,
        device: Rc::clone(&timer) as Rc<RefCell<dyn IoDevice>>,
    });

    Machine {
        alarms,
        line,
        bus,
        timer,
        timer_alarm,
    }
}

impl Machine {
    /// The CPU loop: run in cycle groups sized by the nearest pending
    /// alarm, never overshooting one.
    fn run_to(&mut self, target: Cycles) {
        while self.alarms.clock() < target {
            let stop = self
                .alarms
                .next_pending()
                .map_or(target, |pending| pending.min(target));
            self.alarms.advance(stop);
        }
    }

    fn snapshot_write(&self, snapshot: &mut Snapshot) -> Result<(), SnapshotError> {
        self.alarms.snapshot_write(snapshot)?;
        self.line.borrow().snapshot_write(snapshot)?;
        self.bus.snapshot_write(snapshot)?;
        self.timer.borrow().snapshot_write(snapshot)
    }

    fn snapshot_read(&mut self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        self.alarms.snapshot_read(snapshot)?;
        self.line.borrow_mut().snapshot_read(snapshot)?;
        self.bus.snapshot_read(snapshot)?;
        self.timer.borrow_mut().snapshot_read(snapshot)
    }
}

#[test]
fn timer_alarm_raises_irq_and_bus_write_acknowledges() {
    let mut machine = make_machine();

    machine.run_to(Cycles::new(TIMER_PERIOD - 1));
    assert!(!machine.line.borrow().irq_asserted());

    machine.run_to(Cycles::new(TIMER_PERIOD));
    assert!(machine.line.borrow().irq_asserted());
    assert_eq!(machine.timer.borrow().fired, 1);

    // the interrupt handler reads the count and acknowledges
    assert_eq!(machine.bus.read(0xDE00), 1);
    machine.bus.write(0xDE00, 0);
    assert!(!machine.line.borrow().irq_asserted());
}

#[test]
fn periodic_timer_fires_once_per_period() {
    let mut machine = make_machine();

    machine.run_to(Cycles::new(TIMER_PERIOD * 5 + 50));
    assert_eq!(machine.timer.borrow().fired, 5);
    assert_eq!(
        machine.alarms.next_pending(),
        Some(Cycles::new(TIMER_PERIOD * 6))
    );
}

#[test]
fn whole_machine_round_trips_through_one_container() {
    let mut machine = make_machine();
    machine.run_to(Cycles::new(250));
    assert_eq!(machine.timer.borrow().fired, 2);
    assert!(machine.line.borrow().irq_asserted());

    let mut snapshot = Snapshot::new();
    machine.snapshot_write(&mut snapshot).unwrap();
    for name in ["MAINCPU", "INTLINE", "IOBUS", "TIMER"] {
        assert!(snapshot.has_module(name).unwrap(), "missing module {name}");
    }

    // load into a freshly built machine, as an emulator restart would
    let bytes = snapshot.into_bytes();
    let snapshot = Snapshot::from_bytes(bytes);
    let mut restored = make_machine();
    restored.snapshot_read(&snapshot).unwrap();

    assert_eq!(restored.alarms.clock(), Cycles::new(250));
    assert_eq!(restored.timer.borrow().fired, 2);
    assert!(restored.line.borrow().irq_asserted());
    assert_eq!(
        restored.alarms.next_fire(restored.timer_alarm),
        Some(Cycles::new(300)),
        "pending alarm survives the reload"
    );

    // both machines must stay in lockstep from here
    machine.run_to(Cycles::new(550));
    restored.run_to(Cycles::new(550));
    assert_eq!(machine.timer.borrow().fired, 5);
    assert_eq!(restored.timer.borrow().fired, 5);
    assert_eq!(machine.alarms.next_pending(), restored.alarms.next_pending());
}

#[test]
fn missing_optional_module_is_skippable() {
    let machine = make_machine();
    let mut snapshot = Snapshot::new();
    machine.snapshot_write(&mut snapshot).unwrap();

    // a loader probing for an absent optional component gets a clean
    // not-found it can ignore, and the container stays readable
    match snapshot.open_module("TAPE") {
        Err(SnapshotError::ModuleNotFound(_)) => {}
        Err(other) => panic!("expected ModuleNotFound, got {other:?}"),
        Ok(_) => panic!("expected ModuleNotFound, got a module"),
    }
    assert!(snapshot.has_module("MAINCPU").unwrap());
}
