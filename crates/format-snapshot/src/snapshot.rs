//! The module sequence inside a save-state container.

use crate::SnapshotError;
use crate::module::{HEADER_SIZE, MODULE_NAME_SIZE, ModuleReader, ModuleWriter};

/// A sequence of snapshot modules.
///
/// The outer container's own header and file handling are external; this
/// type owns only the concatenated module records. One instance serves a
/// whole save (every chip appends its module) or a whole load (every chip
/// locates its module by name, in any order).
#[derive(Debug, Default)]
pub struct Snapshot {
    data: Vec<u8>,
}

impl Snapshot {
    /// Empty snapshot, ready for modules to be written.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap the module area of a loaded container.
    #[must_use]
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// The raw module records, for embedding in the outer container.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Open a writable, named, versioned module at the end of the
    /// snapshot. The returned writer must be [`ModuleWriter::close`]d to
    /// finalize the size prefix.
    pub fn create_module(
        &mut self,
        name: &str,
        major: u8,
        minor: u8,
    ) -> Result<ModuleWriter<'_>, SnapshotError> {
        if name.len() > MODULE_NAME_SIZE {
            return Err(SnapshotError::NameTooLong(name.to_owned()));
        }
        if self.find_module(name)?.is_some() {
            return Err(SnapshotError::DuplicateModule(name.to_owned()));
        }
        Ok(ModuleWriter::begin(&mut self.data, name, major, minor))
    }

    /// Locate a module by name. Fails with
    /// [`SnapshotError::ModuleNotFound`] when absent — callers treat that
    /// as "this optional component was disabled when the snapshot was
    /// taken" and skip it.
    pub fn open_module(&self, name: &str) -> Result<ModuleReader<'_>, SnapshotError> {
        match self.find_module(name)? {
            Some((start, size)) => Ok(ModuleReader::over(&self.data[start..start + size], name)),
            None => Err(SnapshotError::ModuleNotFound(name.to_owned())),
        }
    }

    /// Whether a module with this name exists.
    pub fn has_module(&self, name: &str) -> Result<bool, SnapshotError> {
        Ok(self.find_module(name)?.is_some())
    }

    /// Names of all modules, in write order. Diagnostics only.
    pub fn module_names(&self) -> Result<Vec<String>, SnapshotError> {
        let mut names = Vec::new();
        self.walk(|name, _, _| {
            names.push(name.to_owned());
            false
        })?;
        Ok(names)
    }

    /// Scan for `name`, returning its record offset and total size.
    fn find_module(&self, name: &str) -> Result<Option<(usize, usize)>, SnapshotError> {
        self.walk(|candidate, start, size| {
            let _ = (start, size);
            candidate == name
        })
    }

    /// Walk module headers until `visit` returns true. Each record
    /// self-delimits via its size prefix.
    fn walk(
        &self,
        mut visit: impl FnMut(&str, usize, usize) -> bool,
    ) -> Result<Option<(usize, usize)>, SnapshotError> {
        let mut offset = 0;
        while offset < self.data.len() {
            if offset + HEADER_SIZE > self.data.len() {
                return Err(SnapshotError::CorruptContainer);
            }
            let name_bytes = &self.data[offset..offset + MODULE_NAME_SIZE];
            let end = name_bytes
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(MODULE_NAME_SIZE);
            let name = core::str::from_utf8(&name_bytes[..end])
                .map_err(|_| SnapshotError::CorruptContainer)?;

            let size_at = offset + MODULE_NAME_SIZE + 2;
            let size = u32::from_le_bytes([
                self.data[size_at],
                self.data[size_at + 1],
                self.data[size_at + 2],
                self.data[size_at + 3],
            ]) as usize;
            if size < HEADER_SIZE || offset + size > self.data.len() {
                return Err(SnapshotError::CorruptContainer);
            }

            if visit(name, offset, size) {
                return Ok(Some((offset, size)));
            }
            offset += size;
        }
        Ok(None)
    }
}
