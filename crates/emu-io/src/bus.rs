//! Per-page device registries and access arbitration.

use std::rc::Rc;

use format_snapshot::{Snapshot, SnapshotError, Snapshottable};

use crate::config::{CollisionPolicy, IoBusConfig};
use crate::source::{DetachEvent, IoPriority, IoSource, IoSourceInfo};

/// Stable handle to a registered source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoHandle {
    page: u8,
    id: u64,
}

struct Entry {
    source: IoSource,
    order: u32,
    id: u64,
}

struct Page {
    /// Top byte of the page's addresses.
    page: u8,
    /// Registration order within the page; iteration order for
    /// dispatch.
    entries: Vec<Entry>,
}

/// One matching source's answer during a read, captured before
/// resolution so resolution is a pure function of the responses.
struct Response {
    id: u64,
    value: u8,
    order: u32,
}

/// The memory-mapped I/O bus arbiter.
///
/// One per machine instance. Routes CPU accesses to the sources mapped
/// into each 256-byte page, resolves multi-driver conflicts under the
/// configured [`CollisionPolicy`], and queues forced-detach and
/// collision notifications for the outer emulator to drain.
pub struct IoBus {
    /// Bus name; doubles as the snapshot module name.
    name: String,
    pages: Vec<Page>,
    collision_policy: CollisionPolicy,
    /// Next registration order. See `unregister` for the deliberate
    /// reuse quirk.
    order: u32,
    next_id: u64,
    /// Sampled when no device drives the bus; the machine installs its
    /// own handler (e.g. last value the video chip fetched).
    floating: Box<dyn FnMut() -> u8>,
    detach_events: Vec<DetachEvent>,
    collision_messages: Vec<String>,
}

impl IoBus {
    #[must_use]
    pub fn new(config: &IoBusConfig) -> Self {
        Self {
            name: config.name.clone(),
            pages: config
                .pages
                .iter()
                .map(|&page| Page {
                    page,
                    entries: Vec::new(),
                })
                .collect(),
            collision_policy: config.collision_policy,
            order: 0,
            next_id: 0,
            floating: Box::new(|| 0xFF),
            detach_events: Vec::new(),
            collision_messages: Vec::new(),
        }
    }

    /// Install the handler that supplies the floating/idle bus value.
    pub fn set_floating_handler(&mut self, handler: Box<dyn FnMut() -> u8>) {
        self.floating = handler;
    }

    #[must_use]
    pub fn collision_policy(&self) -> CollisionPolicy {
        self.collision_policy
    }

    pub fn set_collision_policy(&mut self, policy: CollisionPolicy) {
        self.collision_policy = policy;
    }

    /// Register a source on the page selected by the top byte of its
    /// range start, assigning the next ascending order value.
    ///
    /// # Panics
    ///
    /// Panics when the start address lies outside every supported page.
    /// Only a chip-model defect can get here — never user input — so
    /// the emulator aborts instead of limping on with an unmapped chip.
    pub fn register(&mut self, source: IoSource) -> IoHandle {
        let page = (source.start >> 8) as u8;
        let Some(slot) = self.pages.iter_mut().find(|p| p.page == page) else {
            log::error!(
                "{}: register: I/O range ${:04X} does not fit any supported bus page",
                self.name,
                u32::from(source.start) & 0xFF00,
            );
            panic!(
                "I/O range ${:04X} does not fit any supported bus page",
                u32::from(source.start) & 0xFF00,
            );
        };

        let id = self.next_id;
        self.next_id += 1;
        let order = self.order;
        self.order += 1;
        log::debug!(
            "{}: register '{}' ${:04X}-${:04X} order {order}",
            self.name,
            source.name,
            source.start,
            source.end,
        );
        slot.entries.push(Entry { source, order, id });
        IoHandle { page, id }
    }

    /// Remove a registration. No-op when the handle is stale (already
    /// removed by a forced detach).
    pub fn unregister(&mut self, handle: IoHandle) {
        let Some(page) = self.pages.iter_mut().find(|p| p.page == handle.page) else {
            return;
        };
        let Some(index) = page.entries.iter().position(|e| e.id == handle.id) else {
            return;
        };
        let entry = page.entries.remove(index);
        log::debug!("{}: unregister '{}'", self.name, entry.source.name);

        // The order counter backs up only when the removed source held
        // the highest order. Interleaved attach/detach can therefore
        // hand two live sources the same order value, which is also the
        // detach-last tie-breaker. Long-established behavior that saved
        // machine states depend on; do not "fix".
        if self.order > 0 && entry.order == self.order - 1 {
            self.order -= 1;
        }
    }

    /// Remove every registration (machine shutdown/reset path).
    pub fn unregister_all(&mut self) {
        for page in &mut self.pages {
            page.entries.clear();
        }
    }

    /// Force the registration-order counter, used when a snapshot load
    /// rebuilds the device set and must reproduce saved order values.
    pub fn set_highest_order(&mut self, order: u32) {
        self.order = order;
    }

    /// Read with full conflict resolution.
    ///
    /// Every matching device's `read` runs and its side effects stick,
    /// exactly as on hardware where every listening chip sees every
    /// access — with one exception: a responding high-priority device
    /// models a dedicated decode line and short-circuits the rest of
    /// the page list.
    pub fn read(&mut self, addr: u16) -> u8 {
        let Some(page_index) = self.page_index(addr) else {
            return (self.floating)();
        };

        let mut normals: Vec<Response> = Vec::new();
        let mut low: Option<u8> = None;

        let mut index = 0;
        while index < self.pages[page_index].entries.len() {
            let entry = &self.pages[page_index].entries[index];
            index += 1;
            if addr < entry.source.start || addr > entry.source.end {
                continue;
            }
            let masked = addr & entry.source.address_mask;
            let priority = entry.source.priority;
            let (id, order) = (entry.id, entry.order);
            let device = Rc::clone(&entry.source.device);
            let Some(value) = device.borrow_mut().read(masked) else {
                continue;
            };
            match priority {
                IoPriority::High => return value,
                IoPriority::Normal => normals.push(Response { id, value, order }),
                IoPriority::Low => low = low.or(Some(value)),
            }
        }

        self.resolve_read(addr, page_index, normals, low)
    }

    /// Collapse the collected responses into the value the CPU sees.
    fn resolve_read(
        &mut self,
        addr: u16,
        page_index: usize,
        normals: Vec<Response>,
        low: Option<u8>,
    ) -> u8 {
        let Some(first) = normals.first() else {
            // a mirror answers only when no real device does
            return low.map_or_else(|| (self.floating)(), |value| value);
        };
        let first_value = first.value;
        if normals.iter().all(|r| r.value == first_value) {
            // one device, or several that agree: indistinguishable on a
            // real bus, not a conflict
            return first_value;
        }

        match self.collision_policy {
            CollisionPolicy::DetachAll => {
                self.report_collision(addr, page_index, &normals, None);
                self.detach_responders(addr, page_index, &normals, None);
                (self.floating)()
            }
            CollisionPolicy::DetachLast => {
                let keeper = normals
                    .iter()
                    .min_by_key(|r| r.order)
                    .map(|r| (r.id, r.value));
                let (keep_id, keep_value) = keeper.map_or((0, 0), |k| k);
                self.report_collision(addr, page_index, &normals, Some(keep_id));
                self.detach_responders(addr, page_index, &normals, Some(keep_id));
                keep_value
            }
            CollisionPolicy::AndWires => {
                self.report_collision(addr, page_index, &normals, None);
                normals.iter().fold(0xFF, |acc, r| acc & r.value)
            }
        }
    }

    /// Log the collision and queue the user-facing message.
    fn report_collision(
        &mut self,
        addr: u16,
        page_index: usize,
        responders: &[Response],
        keep_id: Option<u64>,
    ) {
        let names: Vec<&str> = responders
            .iter()
            .filter_map(|r| self.entry_by_id(page_index, r.id))
            .map(|e| e.source.name.as_str())
            .collect();
        let mut message = format!(
            "I/O read collision at ${addr:04X} from {}",
            join_names(&names)
        );
        match self.collision_policy {
            CollisionPolicy::DetachAll => {
                message.push_str(". All the named devices will be detached.");
            }
            CollisionPolicy::DetachLast => {
                let survivor = keep_id
                    .and_then(|id| self.entry_by_id(page_index, id))
                    .map_or("", |e| e.source.name.as_str());
                message.push_str(&format!(
                    ". All devices except {survivor} will be detached."
                ));
            }
            CollisionPolicy::AndWires => {}
        }
        log::warn!("{}: {message}", self.name);
        self.collision_messages.push(message);
    }

    /// Forcibly detach the conflicting responders, except `keep_id`.
    fn detach_responders(
        &mut self,
        addr: u16,
        page_index: usize,
        responders: &[Response],
        keep_id: Option<u64>,
    ) {
        let page = self.pages[page_index].page;
        for response in responders {
            if Some(response.id) == keep_id {
                continue;
            }
            let Some(entry) = self.entry_by_id(page_index, response.id) else {
                continue;
            };
            let event = DetachEvent {
                name: entry.source.name.clone(),
                action: entry.source.detach.clone(),
                addr,
            };
            log::debug!("{}: forced detach of '{}'", self.name, event.name);
            self.unregister(IoHandle {
                page,
                id: response.id,
            });
            self.detach_events.push(event);
        }
    }

    /// Side-effect-free read for the monitor: same address resolution,
    /// but the first responder wins and collisions are never triggered.
    /// Devices without a peek hook fall back to their read handler.
    pub fn peek(&mut self, addr: u16) -> u8 {
        let Some(page_index) = self.page_index(addr) else {
            return (self.floating)();
        };

        for entry in &self.pages[page_index].entries {
            if addr < entry.source.start || addr > entry.source.end {
                continue;
            }
            let masked = addr & entry.source.address_mask;
            let device = Rc::clone(&entry.source.device);
            let mut device = device.borrow_mut();
            if let Some(value) = device.peek(masked) {
                return value;
            }
            if let Some(value) = device.read(masked) {
                return value;
            }
        }
        (self.floating)()
    }

    /// Write, delivered to every high/normal device overlapping `addr`
    /// — a real bus lets every listening chip see every write. A mirror
    /// (low priority) write applies only when no real device claimed
    /// the address, so mirrors never shadow a primary device.
    pub fn write(&mut self, addr: u16, value: u8) {
        let Some(page_index) = self.page_index(addr) else {
            return;
        };

        let mut claimed = false;
        let mut mirror: Option<(Rc<std::cell::RefCell<dyn emu_core::IoDevice>>, u16)> = None;

        for entry in &self.pages[page_index].entries {
            if addr < entry.source.start || addr > entry.source.end {
                continue;
            }
            let masked = addr & entry.source.address_mask;
            if entry.source.priority == IoPriority::Low {
                // defer; the last mirror in the list models the device
                // the mirror range actually belongs to
                mirror = Some((Rc::clone(&entry.source.device), masked));
            } else {
                entry.source.device.borrow_mut().write(masked, value);
                claimed = true;
            }
        }
        if !claimed
            && let Some((device, masked)) = mirror
        {
            device.borrow_mut().write(masked, value);
        }
    }

    /// Monitor listing of everything registered, in page then
    /// registration order.
    pub fn registered_sources(&self) -> impl Iterator<Item = IoSourceInfo> + '_ {
        self.pages.iter().flat_map(|p| &p.entries).map(|entry| {
            let source = &entry.source;
            IoSourceInfo {
                name: source.name.clone(),
                start: source.start,
                end: source.end.min(source.start.saturating_add(source.address_mask)),
                priority: source.priority,
                order: entry.order,
            }
        })
    }

    /// Whether a handle still refers to a registered source (forced
    /// detach invalidates handles).
    #[must_use]
    pub fn is_registered(&self, handle: IoHandle) -> bool {
        self.pages
            .iter()
            .find(|p| p.page == handle.page)
            .is_some_and(|p| p.entries.iter().any(|e| e.id == handle.id))
    }

    /// Drain the queued forced-detach notifications.
    pub fn take_detach_events(&mut self) -> Vec<DetachEvent> {
        std::mem::take(&mut self.detach_events)
    }

    /// Drain the queued user-facing collision messages.
    pub fn take_collision_messages(&mut self) -> Vec<String> {
        std::mem::take(&mut self.collision_messages)
    }

    fn page_index(&self, addr: u16) -> Option<usize> {
        let page = (addr >> 8) as u8;
        self.pages.iter().position(|p| p.page == page)
    }

    fn entry_by_id(&self, page_index: usize, id: u64) -> Option<&Entry> {
        self.pages[page_index].entries.iter().find(|e| e.id == id)
    }
}

/// "A", "A and B", "A, B and C".
fn join_names(names: &[&str]) -> String {
    match names {
        [] => String::new(),
        [only] => (*only).to_owned(),
        [head @ .., last] => format!("{} and {last}", head.join(", ")),
    }
}

impl Snapshottable for IoBus {
    fn module_name(&self) -> &str {
        &self.name
    }

    fn module_version(&self) -> (u8, u8) {
        (1, 0)
    }

    /// Only the arbitration state travels in the snapshot; the
    /// registrations themselves are rebuilt by the chip attach code
    /// during the load.
    fn snapshot_write(&self, snapshot: &mut Snapshot) -> Result<(), SnapshotError> {
        let (major, minor) = self.module_version();
        let mut m = snapshot.create_module(&self.name, major, minor)?;
        m.write_u32(self.order);
        m.write_u8(self.collision_policy.to_u8());
        m.close()
    }

    fn snapshot_read(&mut self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        let (major, minor) = self.module_version();
        let mut m = snapshot.open_module(&self.name)?;
        m.require_version(major, minor)?;

        let order = m.read_u32();
        let policy = m.read_u8();
        m.close()?;

        let Some(policy) = CollisionPolicy::from_u8(policy) else {
            return Err(SnapshotError::InvalidContents {
                module: self.name.clone(),
                reason: format!("unknown collision policy {policy}"),
            });
        };
        self.set_highest_order(order);
        self.collision_policy = policy;
        Ok(())
    }
}
