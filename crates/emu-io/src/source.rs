//! I/O source descriptors.

use std::cell::RefCell;
use std::rc::Rc;

use emu_core::IoDevice;

/// Decode priority of a registered source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoPriority {
    /// A dedicated, non-shared decode line: its value wins immediately
    /// and devices later in the page list never see the access.
    High,
    /// An ordinary chip sharing the bus; subject to conflict
    /// resolution.
    Normal,
    /// A mirror range: always overridden when any normal device
    /// responds, and its writes apply only when nothing else claimed
    /// the address.
    Low,
}

/// What the front end must disable when a source is forcibly detached
/// after a bus collision. Unregistering alone silences the bus range but
/// leaves the cartridge or setting that created it active; this
/// descriptor tells the outer emulator what else to switch off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetachAction {
    /// A built-in chip with nothing further to disable.
    None,
    /// Detach the cartridge image with this id.
    Cartridge(u32),
    /// Switch the named setting off.
    Resource(String),
}

/// A peripheral's address-decode window plus its handlers.
///
/// `start` and `end` are inclusive; the page is chosen by the top byte
/// of `start` alone, so a window must not cross a page boundary the
/// machine does not decode. Handlers are reached through the shared
/// device object — the machine keeps its own reference so it can tick
/// the chip the bus merely routes to.
pub struct IoSource {
    /// Device name used in diagnostics and collision messages.
    pub name: String,
    /// First address of the decode window (inclusive).
    pub start: u16,
    /// Last address of the decode window (inclusive).
    pub end: u16,
    /// Mask applied to the CPU address before the device sees it, so a
    /// chip with mirrored registers only decodes its register bits.
    pub address_mask: u16,
    pub priority: IoPriority,
    pub detach: DetachAction,
    pub device: Rc<RefCell<dyn IoDevice>>,
}

/// A queued forced-detach notification for the outer emulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachEvent {
    /// Name of the detached source.
    pub name: String,
    /// What else to disable.
    pub action: DetachAction,
    /// The address whose collision triggered the detach.
    pub addr: u16,
}

/// One row of the monitor's registered-device listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoSourceInfo {
    pub name: String,
    pub start: u16,
    /// End of the window as the monitor should show it: clamped to
    /// `start + address_mask`, past which the device only mirrors.
    pub end: u16,
    pub priority: IoPriority,
    /// Registration order; the collision tie-breaker.
    pub order: u32,
}
