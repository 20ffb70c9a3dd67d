//! CPU-side timing core: alarms and interrupt lines.
//!
//! The CPU loop owns the machine clock and drives everything else from
//! it. Chip models ask the [`AlarmContext`] to wake them at an absolute
//! cycle ("fire me at cycle N"), and raise or drop their request level on
//! the [`InterruptLine`], which merges all sources into the two lines the
//! CPU actually sees (IRQ and NMI).
//!
//! Both types are per-machine-instance context objects, never process
//! globals — an emulated disk drive unit carries its own pair next to the
//! main machine's.

mod alarm;
mod error;
mod interrupt;

pub use alarm::{AlarmCallback, AlarmContext, AlarmHandle};
pub use error::SchedError;
pub use interrupt::{InterruptLine, LineKind, SourceHandle};
