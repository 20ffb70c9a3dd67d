//! Interrupt-line aggregation.
//!
//! Dozens of chips share the CPU's two interrupt inputs. Each chip owns
//! one source on the [`InterruptLine`]; the line merges them the way the
//! open-collector wiring does on the board: IRQ is level-sensitive (the
//! line stays asserted while any source holds it), NMI is edge-triggered
//! (a source's low-to-high transition latches a pulse the CPU must
//! acknowledge).

use format_snapshot::{Snapshot, SnapshotError, Snapshottable};

/// Which CPU input a source drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// Level-triggered: asserted while any source holds its level high.
    Irq,
    /// Edge-triggered: a low-to-high transition latches a one-shot pulse.
    Nmi,
}

/// Stable handle to one interrupt source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceHandle(usize);

struct Source {
    name: String,
    kind: LineKind,
    level: bool,
}

/// Per-source request levels merged into the CPU-visible IRQ and NMI
/// lines. One per machine instance.
pub struct InterruptLine {
    /// Line name; doubles as the snapshot module name.
    name: String,
    sources: Vec<Source>,
    /// Aggregated IRQ line, recomputed on every source change.
    irq: bool,
    /// Latched NMI pulse, set by an edge, cleared by `ack_nmi`.
    nmi_pending: bool,
}

impl InterruptLine {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            sources: Vec::new(),
            irq: false,
            nmi_pending: false,
        }
    }

    /// Register a new source, initially deasserted.
    pub fn new_source(&mut self, name: &str, kind: LineKind) -> SourceHandle {
        log::debug!("{}: new {kind:?} source '{name}'", self.name);
        self.sources.push(Source {
            name: name.to_owned(),
            kind,
            level: false,
        });
        SourceHandle(self.sources.len() - 1)
    }

    /// Update exactly one source's request level.
    ///
    /// An NMI source transitioning low to high latches the NMI pulse; an
    /// IRQ source simply contributes its level to the wired OR.
    pub fn set_source(&mut self, source: SourceHandle, level: bool) {
        let src = &mut self.sources[source.0];
        let rising = !src.level && level;
        src.level = level;
        if src.kind == LineKind::Nmi && rising {
            log::debug!("{}: NMI edge from '{}'", self.name, src.name);
            self.nmi_pending = true;
        }
        self.aggregate();
    }

    /// Snapshot-load path: write a source level without any edge
    /// bookkeeping, so a restored high NMI source does not re-pulse a
    /// tick that already happened before the save point.
    pub fn restore(&mut self, source: SourceHandle, level: bool) {
        self.sources[source.0].level = level;
        self.aggregate();
    }

    /// Recompute the aggregated IRQ line. The NMI latch is only set by
    /// edges and only cleared by `ack_nmi`, never by aggregation.
    pub fn aggregate(&mut self) {
        self.irq = self
            .sources
            .iter()
            .any(|s| s.kind == LineKind::Irq && s.level);
    }

    /// Current request level of one source.
    #[must_use]
    pub fn level(&self, source: SourceHandle) -> bool {
        self.sources[source.0].level
    }

    /// Aggregated IRQ input, as the CPU sees it.
    #[must_use]
    pub fn irq_asserted(&self) -> bool {
        self.irq
    }

    /// Latched NMI pulse, as the CPU sees it.
    #[must_use]
    pub fn nmi_pending(&self) -> bool {
        self.nmi_pending
    }

    /// CPU acknowledgement: clears the NMI latch. The next latch needs a
    /// fresh low-to-high edge on some source.
    pub fn ack_nmi(&mut self) {
        self.nmi_pending = false;
    }

    /// Number of registered sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl Snapshottable for InterruptLine {
    fn module_name(&self) -> &str {
        &self.name
    }

    fn module_version(&self) -> (u8, u8) {
        (1, 0)
    }

    fn snapshot_write(&self, snapshot: &mut Snapshot) -> Result<(), SnapshotError> {
        let (major, minor) = self.module_version();
        let mut m = snapshot.create_module(&self.name, major, minor)?;
        m.write_u32(self.sources.len() as u32);
        for source in &self.sources {
            m.write_bool(source.level);
        }
        m.write_bool(self.nmi_pending);
        m.close()
    }

    fn snapshot_read(&mut self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        let (major, minor) = self.module_version();
        let mut m = snapshot.open_module(&self.name)?;
        m.require_version(major, minor)?;

        let count = m.read_u32() as usize;
        if count != self.sources.len() {
            return Err(SnapshotError::InvalidContents {
                module: self.name.clone(),
                reason: format!(
                    "{count} sources in snapshot, machine has {}",
                    self.sources.len()
                ),
            });
        }
        let mut levels = Vec::with_capacity(count);
        for _ in 0..count {
            levels.push(m.read_bool());
        }
        let nmi_pending = m.read_bool();
        m.close()?;

        for i in 0..count {
            self.restore(SourceHandle(i), levels[i]);
        }
        self.nmi_pending = nmi_pending;
        Ok(())
    }
}
