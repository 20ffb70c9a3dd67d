//! I/O device capability interface.

/// A peripheral chip reachable through the memory-mapped I/O bus.
///
/// The bus handles address decoding and routing; devices only see offsets
/// already reduced by their registered address mask. A device that decodes
/// an address but does not drive the data bus (a write-only register, an
/// idle expansion port) returns `None` from `read`, which is what lets the
/// bus distinguish "nobody home" from a real value and resolve multi-driver
/// conflicts.
pub trait IoDevice {
    /// Device name used in diagnostics and collision messages.
    fn name(&self) -> &str;

    /// Read the register at `addr` (already masked).
    ///
    /// `None` means the device did not drive the bus for this access.
    /// Side effects (latch clears, flag acknowledges) are allowed and
    /// happen even when the bus later discards the value in favour of a
    /// higher-priority device — exactly as on real hardware, where every
    /// listening chip sees every access.
    fn read(&mut self, addr: u16) -> Option<u8>;

    /// Write the register at `addr` (already masked).
    fn write(&mut self, addr: u16, value: u8);

    /// Side-effect-free register inspection for the monitor.
    ///
    /// Devices without a dedicated peek path keep the default; the bus
    /// falls back to `read` for them.
    fn peek(&mut self, addr: u16) -> Option<u8> {
        let _ = addr;
        None
    }
}
