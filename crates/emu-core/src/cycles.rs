//! The fundamental unit of time in a machine core.

use core::fmt;

/// An absolute count of machine clock cycles.
///
/// This is the fundamental unit of time: alarms fire at an absolute cycle,
/// snapshots record absolute cycles, and the CPU loop advances the machine
/// clock in these units. The counter is monotonically increasing for the
/// life of a machine run; the scheduler's time warp is the only sanctioned
/// way to pull it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Cycles(pub u64);

impl Cycles {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn new(count: u64) -> Self {
        Self(count)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Difference to an earlier point in time, `None` if `earlier` is
    /// actually later.
    #[must_use]
    pub const fn checked_sub(self, earlier: Self) -> Option<Self> {
        match self.0.checked_sub(earlier.0) {
            Some(d) => Some(Self(d)),
            None => None,
        }
    }
}

impl fmt::Display for Cycles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl core::ops::Add for Cycles {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl core::ops::AddAssign for Cycles {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl core::ops::Sub for Cycles {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl From<u64> for Cycles {
    fn from(count: u64) -> Self {
        Self(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_saturates() {
        assert_eq!(Cycles::new(5) - Cycles::new(9), Cycles::ZERO);
    }

    #[test]
    fn checked_sub_detects_order() {
        assert_eq!(
            Cycles::new(9).checked_sub(Cycles::new(5)),
            Some(Cycles::new(4))
        );
        assert_eq!(Cycles::new(5).checked_sub(Cycles::new(9)), None);
    }
}
