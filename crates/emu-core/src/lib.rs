//! Core types and traits shared by every machine core.
//!
//! One virtual clock per machine instance. The CPU loop advances it cycle
//! by cycle and every peripheral chip derives its timing from it.

mod cycles;
mod device;

pub use cycles::Cycles;
pub use device::IoDevice;
