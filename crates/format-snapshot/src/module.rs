//! Module writer and reader.

use emu_core::Cycles;

use crate::SnapshotError;

/// Size of the NUL-padded module name field.
pub(crate) const MODULE_NAME_SIZE: usize = 16;

/// Full header size: name, major, minor, 32-bit module size.
pub(crate) const HEADER_SIZE: usize = MODULE_NAME_SIZE + 2 + 4;

/// Sequential field writer for one snapshot module.
///
/// Field writes are infallible into the in-memory container; the one
/// failure mode (payload outgrowing the 32-bit size prefix) surfaces at
/// [`close`](Self::close), keeping the per-field calls branch-light. A
/// writer that is dropped without `close` leaves a zero size prefix
/// behind, which every later scan rejects as corrupt — close is not
/// optional.
#[derive(Debug)]
pub struct ModuleWriter<'a> {
    data: &'a mut Vec<u8>,
    start: usize,
    name: String,
}

impl<'a> ModuleWriter<'a> {
    pub(crate) fn begin(data: &'a mut Vec<u8>, name: &str, major: u8, minor: u8) -> Self {
        let start = data.len();
        let mut name_field = [0u8; MODULE_NAME_SIZE];
        name_field[..name.len()].copy_from_slice(name.as_bytes());
        data.extend_from_slice(&name_field);
        data.push(major);
        data.push(minor);
        data.extend_from_slice(&[0u8; 4]); // size prefix, patched by close
        Self {
            data,
            start,
            name: name.to_owned(),
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.data.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.data.push(u8::from(value));
    }

    pub fn write_u16(&mut self, value: u16) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// Write an absolute clock value.
    pub fn write_clock(&mut self, value: Cycles) {
        self.write_u64(value.get());
    }

    /// Write raw bytes. No length prefix — the reader knows the count,
    /// as with every other field.
    pub fn write_bytes(&mut self, values: &[u8]) {
        self.data.extend_from_slice(values);
    }

    pub fn write_u16_array(&mut self, values: &[u16]) {
        for &v in values {
            self.write_u16(v);
        }
    }

    pub fn write_u32_array(&mut self, values: &[u32]) {
        for &v in values {
            self.write_u32(v);
        }
    }

    /// Write a length-prefixed string.
    pub fn write_string(&mut self, value: &str) {
        self.write_u32(value.len() as u32);
        self.data.extend_from_slice(value.as_bytes());
    }

    /// Finalize the size prefix, sealing the module.
    pub fn close(self) -> Result<(), SnapshotError> {
        let size = self.data.len() - self.start;
        let Ok(size) = u32::try_from(size) else {
            return Err(SnapshotError::ModuleTooLarge(self.name));
        };
        let at = self.start + MODULE_NAME_SIZE + 2;
        self.data[at..at + 4].copy_from_slice(&size.to_le_bytes());
        Ok(())
    }
}

/// Sequential field reader for one snapshot module.
///
/// Reads past the module end return zero values and set a sticky error
/// that [`close`](Self::close) surfaces, so a load over a torn module
/// fails as a whole rather than applying half a chip's state.
#[derive(Debug)]
pub struct ModuleReader<'a> {
    payload: &'a [u8],
    pos: usize,
    name: String,
    major: u8,
    minor: u8,
    failed: bool,
}

impl<'a> ModuleReader<'a> {
    /// `record` is the whole module including its header, already
    /// validated against the container bounds.
    pub(crate) fn over(record: &'a [u8], name: &str) -> Self {
        Self {
            payload: &record[HEADER_SIZE..],
            pos: 0,
            name: name.to_owned(),
            major: record[MODULE_NAME_SIZE],
            minor: record[MODULE_NAME_SIZE + 1],
            failed: false,
        }
    }

    /// The `(major, minor)` version stored in the module header.
    #[must_use]
    pub fn version(&self) -> (u8, u8) {
        (self.major, self.minor)
    }

    /// Enforce the compatibility rule against the version this reader
    /// understands.
    ///
    /// A stored major version above `major` is rejected as too new; a
    /// stored version strictly below `(major, minor)` is rejected as
    /// incompatible, since no migration path is implemented. A newer
    /// minor within the same major only appends fields and is accepted.
    pub fn require_version(&self, major: u8, minor: u8) -> Result<(), SnapshotError> {
        let found = (self.major, self.minor);
        let expected = (major, minor);
        if self.major > major {
            return Err(SnapshotError::TooNew {
                module: self.name.clone(),
                found,
                expected,
            });
        }
        if found < expected {
            return Err(SnapshotError::Incompatible {
                module: self.name.clone(),
                found,
                expected,
            });
        }
        if self.minor > minor {
            log::warn!(
                "snapshot module '{}' is {}.{}, newer than the expected {}.{}; \
                 trailing fields will be ignored",
                self.name,
                found.0,
                found.1,
                expected.0,
                expected.1,
            );
        }
        Ok(())
    }

    /// Bytes not yet consumed. A newer-minor module legitimately leaves
    /// trailing fields here.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.payload.len() - self.pos
    }

    fn take(&mut self, count: usize) -> Option<&'a [u8]> {
        if self.pos + count > self.payload.len() {
            self.failed = true;
            return None;
        }
        let slice = &self.payload[self.pos..self.pos + count];
        self.pos += count;
        Some(slice)
    }

    pub fn read_u8(&mut self) -> u8 {
        self.take(1).map_or(0, |b| b[0])
    }

    pub fn read_bool(&mut self) -> bool {
        self.read_u8() != 0
    }

    pub fn read_u16(&mut self) -> u16 {
        self.take(2)
            .map_or(0, |b| u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> u32 {
        self.take(4)
            .map_or(0, |b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> u64 {
        self.take(8).map_or(0, |b| {
            u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
        })
    }

    pub fn read_clock(&mut self) -> Cycles {
        Cycles::new(self.read_u64())
    }

    /// Fill `values` with raw bytes.
    pub fn read_bytes(&mut self, values: &mut [u8]) {
        if let Some(slice) = self.take(values.len()) {
            values.copy_from_slice(slice);
        }
    }

    pub fn read_u16_array(&mut self, values: &mut [u16]) {
        for v in values {
            *v = self.read_u16();
        }
    }

    pub fn read_u32_array(&mut self, values: &mut [u32]) {
        for v in values {
            *v = self.read_u32();
        }
    }

    /// Read a length-prefixed string. Non-UTF-8 data sets the sticky
    /// error.
    pub fn read_string(&mut self) -> String {
        let len = self.read_u32() as usize;
        match self.take(len).map(|b| core::str::from_utf8(b).ok()) {
            Some(Some(s)) => s.to_owned(),
            Some(None) => {
                self.failed = true;
                String::new()
            }
            None => String::new(),
        }
    }

    /// Surface the sticky error state.
    pub fn close(self) -> Result<(), SnapshotError> {
        if self.failed {
            Err(SnapshotError::TruncatedModule(self.name))
        } else {
            Ok(())
        }
    }
}
