//! Snapshot error taxonomy.

use std::fmt;

/// Errors raised by snapshot module I/O.
///
/// `ModuleNotFound` is the only variant callers routinely swallow: an
/// absent module means the component was disabled when the snapshot was
/// taken. Everything else aborts the load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    /// Module name exceeds the 16-byte field.
    NameTooLong(String),
    /// A module with this name was already written to the container.
    DuplicateModule(String),
    /// No module with the requested name exists in the container.
    ModuleNotFound(String),
    /// Module payload grew past what the 32-bit size prefix can hold.
    ModuleTooLarge(String),
    /// A size prefix points outside the container, or a header is cut off.
    CorruptContainer,
    /// A field read ran past the module end.
    TruncatedModule(String),
    /// Fields decoded, but describe a component shape this machine does
    /// not have (wrong alarm count, wrong source count).
    InvalidContents { module: String, reason: String },
    /// The stored major version is newer than this reader understands.
    TooNew {
        module: String,
        found: (u8, u8),
        expected: (u8, u8),
    },
    /// The stored version is older than this reader and no migration path
    /// is implemented. Correctness over silent best-effort compatibility.
    Incompatible {
        module: String,
        found: (u8, u8),
        expected: (u8, u8),
    },
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NameTooLong(name) => {
                write!(f, "snapshot module name '{name}' exceeds 16 bytes")
            }
            Self::DuplicateModule(name) => {
                write!(f, "snapshot module '{name}' written twice")
            }
            Self::ModuleNotFound(name) => {
                write!(f, "snapshot module '{name}' not found")
            }
            Self::ModuleTooLarge(name) => {
                write!(f, "snapshot module '{name}' exceeds the 32-bit size field")
            }
            Self::CorruptContainer => write!(f, "snapshot container is corrupt"),
            Self::TruncatedModule(name) => {
                write!(f, "snapshot module '{name}' ended mid-field")
            }
            Self::InvalidContents { module, reason } => {
                write!(f, "snapshot module '{module}': {reason}")
            }
            Self::TooNew {
                module,
                found,
                expected,
            } => write!(
                f,
                "snapshot module '{module}' is version {}.{} but this build only \
                 understands up to major {}",
                found.0, found.1, expected.0,
            ),
            Self::Incompatible {
                module,
                found,
                expected,
            } => write!(
                f,
                "snapshot module '{module}' is version {}.{}, incompatible with \
                 the expected {}.{}",
                found.0, found.1, expected.0, expected.1,
            ),
        }
    }
}

impl std::error::Error for SnapshotError {}
