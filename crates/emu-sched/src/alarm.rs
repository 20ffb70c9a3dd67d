//! Discrete-event alarm scheduler.
//!
//! Chip models register an alarm once at construction and then arm,
//! disarm, and re-arm it for the machine's whole lifetime. The CPU loop
//! calls [`AlarmContext::advance`] after each cycle group; every alarm
//! due by then fires exactly once, earliest cycle first, ties broken by
//! registration order.
//!
//! # Reentrancy
//!
//! A fired alarm is disarmed *before* its callback runs, so the callback
//! may immediately re-arm it without being fired twice in the same pass.
//! Alarms armed during a pass — even for a cycle inside the range already
//! scanned — wait for the next `advance`; alarms disarmed during a pass
//! no longer fire in it. Both rules keep the firing sequence a pure
//! function of the call sequence, which deterministic replay depends on.

use emu_core::Cycles;
use format_snapshot::{Snapshot, SnapshotError, Snapshottable};

use crate::SchedError;

/// Callback invoked when an alarm fires.
///
/// Receives the context (so it can re-arm itself or any other alarm),
/// the fired alarm's own handle, and the offset between the requested
/// fire cycle and the cycle the CPU loop actually reached. Chip state is
/// usually captured through an `Rc<RefCell<..>>` clone.
pub type AlarmCallback = Box<dyn FnMut(&mut AlarmContext, AlarmHandle, Cycles)>;

/// Stable handle to one registered alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmHandle(usize);

struct AlarmSlot {
    name: String,
    /// Taken out of the slot while the callback runs, so the callback
    /// can re-enter the context.
    callback: Option<AlarmCallback>,
    /// Absolute fire cycle; `None` while disarmed.
    next_fire: Option<Cycles>,
    /// Pass counter value at the moment the alarm was armed. An alarm
    /// armed during the current pass is skipped by it.
    armed_in_pass: u64,
}

/// An ordered collection of alarms plus the clock they fire against.
///
/// One per machine instance (and one per emulated drive unit), owned by
/// the object that owns the CPU loop.
pub struct AlarmContext {
    /// Context name; doubles as the snapshot module name.
    name: String,
    /// Slot index is registration order — the tie-breaker for alarms
    /// due at the same cycle.
    slots: Vec<AlarmSlot>,
    clock: Cycles,
    /// Completed-`advance` counter, used to tell pre-existing arms from
    /// same-pass re-arms.
    pass: u64,
}

impl AlarmContext {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            slots: Vec::new(),
            clock: Cycles::ZERO,
            pass: 0,
        }
    }

    /// Current clock, as of the last `advance`.
    #[must_use]
    pub fn clock(&self) -> Cycles {
        self.clock
    }

    /// Register a new alarm. Alarms live for the context's lifetime;
    /// there is no unregister, only disarm.
    pub fn new_alarm(&mut self, name: &str, callback: AlarmCallback) -> AlarmHandle {
        log::debug!("{}: new alarm '{name}'", self.name);
        self.slots.push(AlarmSlot {
            name: name.to_owned(),
            callback: Some(callback),
            next_fire: None,
            armed_in_pass: self.pass,
        });
        AlarmHandle(self.slots.len() - 1)
    }

    /// Arm (or re-arm) the alarm to fire at the absolute cycle `cycle`.
    ///
    /// Fails when `cycle` is strictly before the current clock; fires
    /// are never retroactive. Scheduling into the past is a chip-model
    /// timing bug worth a diagnostic, but not fatal — callers may drop
    /// the error and re-aim.
    pub fn set(&mut self, alarm: AlarmHandle, cycle: Cycles) -> Result<(), SchedError> {
        let slot = &mut self.slots[alarm.0];
        if cycle < self.clock {
            log::warn!(
                "{}: alarm '{}' set for cycle {cycle}, clock already at {}",
                self.name,
                slot.name,
                self.clock,
            );
            return Err(SchedError::CyclePassed {
                alarm: slot.name.clone(),
                requested: cycle,
                clock: self.clock,
            });
        }
        slot.next_fire = Some(cycle);
        slot.armed_in_pass = self.pass;
        Ok(())
    }

    /// Disarm the alarm. No-op when already disarmed. Takes effect
    /// immediately: an alarm disarmed mid-pass does not fire later in
    /// that pass.
    pub fn unset(&mut self, alarm: AlarmHandle) {
        self.slots[alarm.0].next_fire = None;
    }

    #[must_use]
    pub fn is_armed(&self, alarm: AlarmHandle) -> bool {
        self.slots[alarm.0].next_fire.is_some()
    }

    /// The cycle the alarm is armed for, if armed.
    #[must_use]
    pub fn next_fire(&self, alarm: AlarmHandle) -> Option<Cycles> {
        self.slots[alarm.0].next_fire
    }

    /// Earliest armed fire cycle, or `None` when nothing is pending.
    /// The CPU loop uses this to size its cycle groups.
    #[must_use]
    pub fn next_pending(&self) -> Option<Cycles> {
        self.slots.iter().filter_map(|s| s.next_fire).min()
    }

    /// Fire every alarm due by `to`, then move the clock there.
    ///
    /// Due alarms fire in increasing fire-cycle order, ties broken by
    /// registration order, each with `offset = to - next_fire`. The
    /// clock never moves backwards; a stale `to` is logged and ignored.
    pub fn advance(&mut self, to: Cycles) {
        if to < self.clock {
            log::warn!(
                "{}: advance to cycle {to} behind the clock at {}",
                self.name,
                self.clock,
            );
            return;
        }

        self.pass += 1;
        let pass = self.pass;

        loop {
            // Smallest (fire cycle, slot index) among alarms armed before
            // this pass. Linear scan: contexts hold dozens of alarms.
            let mut due: Option<(Cycles, usize)> = None;
            for (index, slot) in self.slots.iter().enumerate() {
                if slot.armed_in_pass >= pass {
                    continue;
                }
                let Some(fire) = slot.next_fire else {
                    continue;
                };
                if fire > to {
                    continue;
                }
                if due.is_none_or(|(best, _)| fire < best) {
                    due = Some((fire, index));
                }
            }
            let Some((fire, index)) = due else {
                break;
            };

            // Disarm before the callback so it can re-arm itself.
            self.slots[index].next_fire = None;
            if let Some(mut callback) = self.slots[index].callback.take() {
                callback(self, AlarmHandle(index), to - fire);
                self.slots[index].callback = Some(callback);
            }
        }

        // A callback may itself have advanced further; never regress.
        if self.clock < to {
            self.clock = to;
        }
    }

    /// Shift the clock and every armed alarm back by `amount`.
    ///
    /// Used by the outer loop to keep the cycle counter from
    /// overflowing on very long runs; relative distances between the
    /// clock and every armed alarm are preserved, so nothing fires
    /// early or late. The caller guarantees `amount <= clock()`.
    pub fn time_warp(&mut self, amount: Cycles) {
        self.clock = self.clock - amount;
        for slot in &mut self.slots {
            if let Some(fire) = slot.next_fire {
                slot.next_fire = Some(fire - amount);
            }
        }
    }

    /// Number of registered alarms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Name of a registered alarm, for diagnostics.
    #[must_use]
    pub fn alarm_name(&self, alarm: AlarmHandle) -> &str {
        &self.slots[alarm.0].name
    }
}

impl Snapshottable for AlarmContext {
    fn module_name(&self) -> &str {
        &self.name
    }

    fn module_version(&self) -> (u8, u8) {
        (1, 0)
    }

    fn snapshot_write(&self, snapshot: &mut Snapshot) -> Result<(), SnapshotError> {
        let (major, minor) = self.module_version();
        let mut m = snapshot.create_module(&self.name, major, minor)?;
        m.write_clock(self.clock);
        m.write_u32(self.slots.len() as u32);
        for slot in &self.slots {
            m.write_bool(slot.next_fire.is_some());
            m.write_clock(slot.next_fire.unwrap_or(Cycles::ZERO));
        }
        m.close()
    }

    fn snapshot_read(&mut self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        let (major, minor) = self.module_version();
        let mut m = snapshot.open_module(&self.name)?;
        m.require_version(major, minor)?;

        let clock = m.read_clock();
        let count = m.read_u32() as usize;
        if count != self.slots.len() {
            return Err(SnapshotError::InvalidContents {
                module: self.name.clone(),
                reason: format!(
                    "{count} alarms in snapshot, machine has {}",
                    self.slots.len()
                ),
            });
        }

        // Stage the fire cycles so a truncated module leaves the context
        // untouched.
        let mut fires = Vec::with_capacity(count);
        for _ in 0..count {
            let armed = m.read_bool();
            let fire = m.read_clock();
            fires.push(armed.then_some(fire));
        }
        m.close()?;

        self.clock = clock;
        self.pass = 0;
        for (slot, fire) in self.slots.iter_mut().zip(fires) {
            slot.next_fire = fire;
            slot.armed_in_pass = 0;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Shared fire log: (alarm name, offset in cycles).
    type FireLog = Rc<RefCell<Vec<(String, u64)>>>;

    fn logging_alarm(ctx: &mut AlarmContext, name: &'static str, log: &FireLog) -> AlarmHandle {
        let log = Rc::clone(log);
        ctx.new_alarm(
            name,
            Box::new(move |_, _, offset| {
                log.borrow_mut().push((name.to_owned(), offset.get()));
            }),
        )
    }

    #[test]
    fn fires_once_with_offset() {
        let log: FireLog = Rc::default();
        let mut ctx = AlarmContext::new("ALARMS");
        let a = logging_alarm(&mut ctx, "A", &log);

        ctx.set(a, Cycles::new(100)).unwrap();
        ctx.advance(Cycles::new(50));
        assert!(log.borrow().is_empty());
        assert!(ctx.is_armed(a));

        ctx.advance(Cycles::new(150));
        assert_eq!(*log.borrow(), [("A".to_owned(), 50)]);
        assert!(!ctx.is_armed(a));

        // already fired, must not fire again
        ctx.advance(Cycles::new(400));
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn same_cycle_fires_in_registration_order() {
        let log: FireLog = Rc::default();
        let mut ctx = AlarmContext::new("ALARMS");
        let a = logging_alarm(&mut ctx, "A", &log);
        let b = logging_alarm(&mut ctx, "B", &log);

        // arm B first: registration order must still win the tie
        ctx.set(b, Cycles::new(10)).unwrap();
        ctx.set(a, Cycles::new(10)).unwrap();
        ctx.advance(Cycles::new(10));

        assert_eq!(
            *log.borrow(),
            [("A".to_owned(), 0), ("B".to_owned(), 0)]
        );
    }

    #[test]
    fn earlier_cycle_fires_first() {
        let log: FireLog = Rc::default();
        let mut ctx = AlarmContext::new("ALARMS");
        let a = logging_alarm(&mut ctx, "A", &log);
        let b = logging_alarm(&mut ctx, "B", &log);

        ctx.set(a, Cycles::new(30)).unwrap();
        ctx.set(b, Cycles::new(20)).unwrap();
        ctx.advance(Cycles::new(40));

        assert_eq!(
            *log.borrow(),
            [("B".to_owned(), 20), ("A".to_owned(), 10)]
        );
    }

    #[test]
    fn set_in_the_past_is_an_error() {
        let mut ctx = AlarmContext::new("ALARMS");
        let a = ctx.new_alarm("A", Box::new(|_, _, _| {}));
        ctx.advance(Cycles::new(100));

        let err = ctx.set(a, Cycles::new(99)).unwrap_err();
        assert_eq!(ctx.alarm_name(a), "A", "diagnostic name matches the error");
        assert_eq!(
            err,
            SchedError::CyclePassed {
                alarm: "A".into(),
                requested: Cycles::new(99),
                clock: Cycles::new(100),
            }
        );
        assert!(!ctx.is_armed(a));

        // the current cycle itself is still legal
        ctx.set(a, Cycles::new(100)).unwrap();
    }

    #[test]
    fn unset_is_idempotent_and_immediate() {
        let log: FireLog = Rc::default();
        let mut ctx = AlarmContext::new("ALARMS");
        let a = logging_alarm(&mut ctx, "A", &log);

        ctx.unset(a); // never armed: no-op
        ctx.set(a, Cycles::new(5)).unwrap();
        ctx.unset(a);
        ctx.unset(a);
        ctx.advance(Cycles::new(10));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn callback_rearms_itself_without_double_fire() {
        let log: FireLog = Rc::default();
        let mut ctx = AlarmContext::new("ALARMS");
        let fired = Rc::clone(&log);
        let a = ctx.new_alarm(
            "TICK",
            Box::new(move |ctx, me, offset| {
                fired.borrow_mut().push(("TICK".to_owned(), offset.get()));
                // re-arm inside the already-scanned range; must wait for
                // the next advance
                let next = ctx.next_fire(me);
                assert_eq!(next, None, "disarmed before the callback runs");
                ctx.set(me, ctx.clock() + Cycles::new(1)).unwrap();
            }),
        );

        ctx.set(a, Cycles::new(10)).unwrap();
        ctx.advance(Cycles::new(100));
        assert_eq!(log.borrow().len(), 1, "re-arm must not fire this pass");
        assert!(ctx.is_armed(a));

        ctx.advance(Cycles::new(200));
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn callback_arming_another_alarm_in_range_defers_it() {
        let log: FireLog = Rc::default();
        let mut ctx = AlarmContext::new("ALARMS");
        let b_log = Rc::clone(&log);
        // registered first so handle 1 exists when A's callback runs
        let b = ctx.new_alarm(
            "B",
            Box::new(move |_, _, offset| {
                b_log.borrow_mut().push(("B".to_owned(), offset.get()));
            }),
        );
        let a_log = Rc::clone(&log);
        let a = ctx.new_alarm(
            "A",
            Box::new(move |ctx, _, _| {
                a_log.borrow_mut().push(("A".to_owned(), 0));
                // cycle 20 is before the pass target of 50, and even
                // before alarms the pass has already fired
                ctx.set(b, Cycles::new(20)).unwrap();
            }),
        );

        ctx.set(a, Cycles::new(30)).unwrap();
        ctx.advance(Cycles::new(50));
        assert_eq!(*log.borrow(), [("A".to_owned(), 0)]);

        // picked up by the next pass, with the offset measured from its
        // requested cycle
        ctx.advance(Cycles::new(60));
        assert_eq!(
            *log.borrow(),
            [("A".to_owned(), 0), ("B".to_owned(), 40)]
        );
    }

    #[test]
    fn callback_unsetting_a_due_alarm_cancels_it() {
        let log: FireLog = Rc::default();
        let mut ctx = AlarmContext::new("ALARMS");
        let b = logging_alarm(&mut ctx, "B", &log);
        // B registered first but A fires first (earlier cycle) and
        // cancels it mid-pass
        let a_log = Rc::clone(&log);
        let a = ctx.new_alarm(
            "A",
            Box::new(move |ctx, _, _| {
                a_log.borrow_mut().push(("A".to_owned(), 0));
                ctx.unset(b);
            }),
        );

        ctx.set(a, Cycles::new(10)).unwrap();
        ctx.set(b, Cycles::new(20)).unwrap();
        ctx.advance(Cycles::new(30));
        assert_eq!(*log.borrow(), [("A".to_owned(), 0)]);
    }

    #[test]
    fn next_pending_tracks_earliest() {
        let mut ctx = AlarmContext::new("ALARMS");
        let a = ctx.new_alarm("A", Box::new(|_, _, _| {}));
        let b = ctx.new_alarm("B", Box::new(|_, _, _| {}));

        assert_eq!(ctx.next_pending(), None);
        ctx.set(a, Cycles::new(70)).unwrap();
        ctx.set(b, Cycles::new(40)).unwrap();
        assert_eq!(ctx.next_pending(), Some(Cycles::new(40)));
        ctx.unset(b);
        assert_eq!(ctx.next_pending(), Some(Cycles::new(70)));
    }

    #[test]
    fn time_warp_preserves_distances() {
        let log: FireLog = Rc::default();
        let mut ctx = AlarmContext::new("ALARMS");
        let a = logging_alarm(&mut ctx, "A", &log);

        ctx.advance(Cycles::new(1000));
        ctx.set(a, Cycles::new(1500)).unwrap();
        ctx.time_warp(Cycles::new(900));
        assert_eq!(ctx.clock(), Cycles::new(100));
        assert_eq!(ctx.next_fire(a), Some(Cycles::new(600)));

        ctx.advance(Cycles::new(600));
        assert_eq!(*log.borrow(), [("A".to_owned(), 0)]);
    }

    #[test]
    fn snapshot_round_trip_does_not_fire() {
        let log: FireLog = Rc::default();
        let mut ctx = AlarmContext::new("ALARMS");
        let a = logging_alarm(&mut ctx, "A", &log);
        let b = logging_alarm(&mut ctx, "B", &log);

        ctx.advance(Cycles::new(50));
        ctx.set(a, Cycles::new(120)).unwrap();
        ctx.unset(b);

        let mut snapshot = Snapshot::new();
        ctx.snapshot_write(&mut snapshot).unwrap();

        // fresh context with the same alarm set
        let log2: FireLog = Rc::default();
        let mut restored = AlarmContext::new("ALARMS");
        let a2 = logging_alarm(&mut restored, "A", &log2);
        let b2 = logging_alarm(&mut restored, "B", &log2);
        restored.snapshot_read(&snapshot).unwrap();

        assert_eq!(restored.clock(), Cycles::new(50));
        assert_eq!(restored.next_fire(a2), Some(Cycles::new(120)));
        assert!(!restored.is_armed(b2));
        assert!(log2.borrow().is_empty(), "restore must not replay fires");

        restored.advance(Cycles::new(120));
        assert_eq!(*log2.borrow(), [("A".to_owned(), 0)]);
    }

    #[test]
    fn snapshot_alarm_count_mismatch_fails() {
        let mut ctx = AlarmContext::new("ALARMS");
        ctx.new_alarm("A", Box::new(|_, _, _| {}));

        let mut snapshot = Snapshot::new();
        ctx.snapshot_write(&mut snapshot).unwrap();

        let mut other = AlarmContext::new("ALARMS");
        other.new_alarm("A", Box::new(|_, _, _| {}));
        other.new_alarm("B", Box::new(|_, _, _| {}));
        assert!(matches!(
            other.snapshot_read(&snapshot),
            Err(SnapshotError::InvalidContents { .. })
        ));
    }

    #[test]
    fn two_contexts_are_independent() {
        let log: FireLog = Rc::default();
        let mut machine = AlarmContext::new("ALARMS");
        let mut drive = AlarmContext::new("DRV8ALARMS");
        let a = logging_alarm(&mut machine, "A", &log);
        let d = logging_alarm(&mut drive, "D", &log);

        machine.set(a, Cycles::new(10)).unwrap();
        drive.set(d, Cycles::new(10)).unwrap();
        machine.advance(Cycles::new(20));

        assert_eq!(*log.borrow(), [("A".to_owned(), 10)]);
        assert!(drive.is_armed(d));
    }
}
