//! Save-state module format.
//!
//! A snapshot is a sequence of named, versioned, length-prefixed binary
//! sub-blocks ("modules"), one per stateful chip, written inside an outer
//! container whose header belongs to the wider emulator. Every module is
//! self-describing: a 16-byte NUL-padded name, a `(major, minor)` version
//! pair, and a 32-bit total size, followed by the module's fields.
//!
//! All multi-byte fields are little-endian regardless of host byte order.
//!
//! # Layout
//!
//! ```text
//! offset  size  field
//!      0    16  module name, ASCII, NUL padded
//!     16     1  major version
//!     17     1  minor version
//!     18     4  module size in bytes, including this header (LE)
//!     22     n  fields
//! ```
//!
//! Writers append fields in a fixed order; readers consume them in the
//! same order. Field reads past the module end set a sticky error that
//! surfaces at [`ModuleReader::close`], so the common path stays
//! branch-light and a torn module fails the whole load instead of
//! half-applying.

mod error;
mod module;
mod snapshot;

pub use error::SnapshotError;
pub use module::{ModuleReader, ModuleWriter};
pub use snapshot::Snapshot;

/// Save/restore contract for a stateful component.
///
/// Every chip model (and the scheduler and I/O bus themselves) pairs a
/// snapshot write with a snapshot read, keyed by a unique module name.
/// A missing module on read means the component was disabled when the
/// snapshot was taken; most callers skip it
/// ([`SnapshotError::ModuleNotFound`]) rather than failing the load.
pub trait Snapshottable {
    /// Unique module name, at most 16 ASCII bytes. An instance method so
    /// multiple contexts of the same component (main machine plus each
    /// disk-drive unit) can coexist in one container under distinct
    /// names.
    fn module_name(&self) -> &str;

    /// Version written by this implementation.
    fn module_version(&self) -> (u8, u8);

    /// Append this component's module to the snapshot.
    fn snapshot_write(&self, snapshot: &mut Snapshot) -> Result<(), SnapshotError>;

    /// Restore this component from its module in the snapshot.
    ///
    /// All-or-nothing at the call site: any failure must abort the whole
    /// load, the caller resets the machine instead of keeping a partial
    /// restore.
    fn snapshot_read(&mut self, snapshot: &Snapshot) -> Result<(), SnapshotError>;
}
