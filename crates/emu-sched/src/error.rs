//! Scheduler error type.

use std::fmt;

use emu_core::Cycles;

/// Errors raised by the alarm scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedError {
    /// An alarm was set for a cycle the clock has already passed.
    /// Fires are never retroactive; the caller decides whether to
    /// re-aim or drop the request.
    CyclePassed {
        alarm: String,
        requested: Cycles,
        clock: Cycles,
    },
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CyclePassed {
                alarm,
                requested,
                clock,
            } => write!(
                f,
                "alarm '{alarm}' set for cycle {requested}, but the clock is \
                 already at {clock}"
            ),
        }
    }
}

impl std::error::Error for SchedError {}
