//! Bus configuration: supported pages and collision handling.

use std::fmt;

/// How simultaneous, electrically conflicting reads are resolved.
///
/// A conflict exists when two or more normal-priority devices drive
/// *different* values onto the same address. Matching values are
/// indistinguishable on a real bus and are not treated as a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollisionPolicy {
    /// Report the conflict and detach every involved device; the read
    /// yields the floating bus value.
    #[default]
    DetachAll,
    /// Report the conflict and detach all involved devices except the
    /// earliest-registered one, whose value the read yields.
    DetachLast,
    /// Log the conflict, detach nothing, and yield the bitwise AND of
    /// the conflicting values (open-drain wired-AND bus model).
    AndWires,
}

impl CollisionPolicy {
    /// Snapshot encoding. Stable; saved states depend on these values.
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Self::DetachAll => 0,
            Self::DetachLast => 1,
            Self::AndWires => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::DetachAll),
            1 => Some(Self::DetachLast),
            2 => Some(Self::AndWires),
            _ => None,
        }
    }
}

impl fmt::Display for CollisionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DetachAll => write!(f, "detach all"),
            Self::DetachLast => write!(f, "detach last"),
            Self::AndWires => write!(f, "AND wires"),
        }
    }
}

/// Configuration for constructing an [`crate::IoBus`].
pub struct IoBusConfig {
    /// Bus name; doubles as the snapshot module name.
    pub name: String,
    /// Top bytes of the 256-byte pages this machine decodes as I/O
    /// (`0xD0` for $D000-$D0FF, and so on). A registration whose range
    /// starts outside these pages is a chip-model defect and aborts.
    pub pages: Vec<u8>,
    /// Conflict resolution for multi-driver reads.
    pub collision_policy: CollisionPolicy,
}

impl IoBusConfig {
    /// Convenience constructor with the default collision policy.
    #[must_use]
    pub fn new(name: &str, pages: &[u8]) -> Self {
        Self {
            name: name.to_owned(),
            pages: pages.to_vec(),
            collision_policy: CollisionPolicy::default(),
        }
    }
}
