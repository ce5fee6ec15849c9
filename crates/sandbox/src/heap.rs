use std::mem::size_of;
use std::rc::{Rc, Weak};

use crate::error::VmError;
use crate::value::{Cell, Closure, Entries, List, Shared, Value};

/// Accounted size of one value slot.
pub const SLOT: usize = size_of::<Value>();
const OBJECT_HEADER: usize = 32;
const TRACK_OVERHEAD: usize = size_of::<Tracked>();

enum Tracked {
    List(Weak<Shared<Vec<Value>>>),
    Entries(Weak<Shared<Vec<(Value, Value)>>>),
    Cell(Weak<Shared<Value>>),
    Str(Weak<str>),
    Closure(Weak<Closure>),
}

impl Tracked {
    /// Current footprint, or `None` once the object has been freed.
    fn live_size(&self) -> Option<usize> {
        let body = match self {
            Tracked::List(w) => {
                let list = w.upgrade()?;
                let len = list.try_borrow().map_or(0, |items| items.len());
                len * SLOT
            }
            Tracked::Entries(w) => {
                let map = w.upgrade()?;
                let len = map.try_borrow().map_or(0, |entries| entries.len());
                len * 2 * SLOT
            }
            Tracked::Cell(w) => {
                w.upgrade()?;
                SLOT
            }
            Tracked::Str(w) => w.upgrade()?.len(),
            Tracked::Closure(w) => w.upgrade()?.upvalues.len() * size_of::<Cell>(),
        };
        Some(body + OBJECT_HEADER + TRACK_OVERHEAD)
    }
}

/// Allocation ledger for one sandboxed run.
///
/// Every guest-visible object is created here and charged against `limit`.
/// When the running total would pass the limit, freed objects are swept out
/// of the ledger and the total is recounted from what is still alive.
pub struct Heap {
    used: usize,
    limit: usize,
    tracked: Vec<Tracked>,
    /// Host-side text still being assembled by an intrinsic; counted in `used`.
    scratch: usize,
    /// Ledger entries visited by sweeps, reported back to the step meter.
    work: u64,
}

impl Heap {
    pub fn new(limit: usize) -> Self {
        Heap {
            used: 0,
            limit,
            tracked: Vec::new(),
            scratch: 0,
            work: 0,
        }
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn take_work(&mut self) -> u64 {
        std::mem::take(&mut self.work)
    }

    /// Account for `bytes` of new guest data.
    pub fn charge(&mut self, bytes: usize) -> Result<(), VmError> {
        let next = self.used.saturating_add(bytes);
        if next <= self.limit {
            self.used = next;
            return Ok(());
        }
        self.collect();
        let next = self.used.saturating_add(bytes);
        if next > self.limit {
            log::debug!("heap limit {} reached ({} live, {} requested)", self.limit, self.used, bytes);
            return Err(VmError::OutOfMemory);
        }
        self.used = next;
        Ok(())
    }

    /// Reserve room for host text before it is built. The reservation holds
    /// across sweeps until released.
    pub fn reserve(&mut self, bytes: usize) -> Result<(), VmError> {
        self.charge(bytes)?;
        self.scratch = self.scratch.saturating_add(bytes);
        Ok(())
    }

    pub fn scratch(&self) -> usize {
        self.scratch
    }

    /// Drop reservations made since `mark`.
    pub fn release_scratch(&mut self, mark: usize) {
        let freed = self.scratch.saturating_sub(mark);
        self.release_bytes(freed);
    }

    /// Drop `bytes` of reservation, typically when the text becomes a guest string.
    pub fn release_bytes(&mut self, bytes: usize) {
        let freed = bytes.min(self.scratch);
        self.scratch -= freed;
        self.used = self.used.saturating_sub(freed);
    }

    /// Bytes still available, sweeping first when the ledger looks crowded.
    pub fn room(&mut self) -> usize {
        if self.used > self.limit / 2 {
            self.collect();
        }
        self.limit.saturating_sub(self.used)
    }

    /// Charge for `count` additional value slots.
    pub fn charge_slots(&mut self, count: usize) -> Result<(), VmError> {
        self.charge(count.saturating_mul(SLOT))
    }

    fn collect(&mut self) {
        self.work += self.tracked.len() as u64;
        let mut live = 0usize;
        self.tracked.retain(|t| match t.live_size() {
            Some(size) => {
                live += size;
                true
            }
            None => false,
        });
        self.used = live.saturating_add(self.scratch);
    }

    pub fn array(&mut self, items: Vec<Value>) -> Result<Value, VmError> {
        Ok(Value::Array(self.list(items)?))
    }

    pub fn list(&mut self, items: Vec<Value>) -> Result<List, VmError> {
        self.charge(OBJECT_HEADER + TRACK_OVERHEAD + items.len() * SLOT)?;
        let list = Shared::new(items);
        self.tracked.push(Tracked::List(Rc::downgrade(&list)));
        Ok(list)
    }

    pub fn set(&mut self, items: Vec<Value>) -> Result<Value, VmError> {
        Ok(Value::Set(self.list(items)?))
    }

    pub fn map(&mut self, entries: Vec<(Value, Value)>) -> Result<Value, VmError> {
        self.charge(OBJECT_HEADER + TRACK_OVERHEAD + entries.len() * 2 * SLOT)?;
        let map: Entries = Shared::new(entries);
        self.tracked.push(Tracked::Entries(Rc::downgrade(&map)));
        Ok(Value::Map(map))
    }

    pub fn string(&mut self, s: &str) -> Result<Value, VmError> {
        self.charge(OBJECT_HEADER + TRACK_OVERHEAD + s.len())?;
        let rc: Rc<str> = Rc::from(s);
        self.tracked.push(Tracked::Str(Rc::downgrade(&rc)));
        Ok(Value::Str(rc))
    }

    pub fn cell(&mut self, value: Value) -> Result<Cell, VmError> {
        self.charge(OBJECT_HEADER + TRACK_OVERHEAD + SLOT)?;
        let cell = Shared::new(value);
        self.tracked.push(Tracked::Cell(Rc::downgrade(&cell)));
        Ok(cell)
    }

    pub fn closure(&mut self, func: u32, upvalues: Vec<Cell>) -> Result<Value, VmError> {
        self.charge(OBJECT_HEADER + TRACK_OVERHEAD + upvalues.len() * size_of::<Cell>())?;
        let closure = Rc::new(Closure { func, upvalues });
        self.tracked.push(Tracked::Closure(Rc::downgrade(&closure)));
        Ok(Value::Closure(closure))
    }

    /// Empty every live container so reference cycles built by the guest
    /// are released along with the run.
    pub fn release(&mut self) {
        let mut graveyard = Vec::new();
        for tracked in self.tracked.drain(..) {
            match tracked {
                Tracked::List(w) => {
                    if let Some(list) = w.upgrade() {
                        list.take_into(&mut graveyard);
                    }
                }
                Tracked::Entries(w) => {
                    if let Some(map) = w.upgrade() {
                        map.take_into(&mut graveyard);
                    }
                }
                Tracked::Cell(w) => {
                    if let Some(cell) = w.upgrade() {
                        cell.take_into(&mut graveyard);
                    }
                }
                Tracked::Str(_) | Tracked::Closure(_) => {}
            }
        }
        self.used = 0;
        self.scratch = 0;
        drop(graveyard);
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        self.release();
    }
}
