//! Memory-mapped I/O bus arbitration.
//!
//! The CPU's reads and writes in the I/O area are routed to whichever
//! chips and cartridges are currently mapped there. More than one device
//! may claim the same address — two cartridges both answering at $DE00 is
//! a user configuration mistake, not a programming error — and the bus
//! resolves the resulting electrical conflict under a configurable
//! policy, up to forcibly detaching the offenders.
//!
//! Dispatch granularity is the 256-byte bus page: a device's page is
//! chosen by the top byte of its range start, and a range must fit the
//! pages the machine declares at bus construction.

mod bus;
mod config;
mod source;

pub use bus::{IoBus, IoHandle};
pub use config::{CollisionPolicy, IoBusConfig};
pub use source::{DetachAction, DetachEvent, IoPriority, IoSource, IoSourceInfo};
