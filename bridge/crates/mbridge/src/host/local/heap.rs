//! Object heap of the local host
//!
//! Objects live in a map keyed by a simulated address. Addresses are handed
//! out monotonically and never reused, so a stale handle always resolves to
//! `UseAfterFree` instead of aliasing a newer object.

use crate::error::{BridgeError, Result};
use crate::host::{ClassHandle, ManagedObjectHandle, Value};
use rustc_hash::{FxHashMap, FxHashSet};

/// First simulated object address
pub const HEAP_BASE: usize = 0x10_0000;

/// Address stride between objects
pub const OBJECT_ALIGNMENT: usize = 0x40;

/// Per-object header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    pub class: ClassHandle,
    /// Mark bit, only meaningful during a collection
    pub marked: bool,
    /// Slot count
    pub size: usize,
}

#[derive(Debug, Clone)]
pub struct HeapObject {
    pub header: ObjectHeader,
    pub fields: Vec<Value>,
}

impl HeapObject {
    /// Object handles referenced from this object's slots
    pub fn references(&self) -> impl Iterator<Item = ManagedObjectHandle> + '_ {
        self.fields.iter().filter_map(|v| match v {
            Value::Object(h) if !h.is_null() => Some(*h),
            _ => None,
        })
    }
}

#[derive(Debug)]
pub struct Heap {
    objects: FxHashMap<ManagedObjectHandle, HeapObject>,
    freed: FxHashSet<ManagedObjectHandle>,
    next_address: usize,
    allocated_total: usize,
}

impl Heap {
    pub fn new() -> Self {
        Self {
            objects: FxHashMap::default(),
            freed: FxHashSet::default(),
            next_address: HEAP_BASE,
            allocated_total: 0,
        }
    }

    pub fn allocate(&mut self, class: ClassHandle, fields: Vec<Value>) -> ManagedObjectHandle {
        let handle = ManagedObjectHandle::from_raw(self.next_address);
        let span = fields.len().max(1) * std::mem::size_of::<usize>();
        self.next_address += crate::util::Alignment::align_up(span, OBJECT_ALIGNMENT);
        self.allocated_total += 1;

        self.objects.insert(
            handle,
            HeapObject {
                header: ObjectHeader {
                    class,
                    marked: false,
                    size: fields.len(),
                },
                fields,
            },
        );
        handle
    }

    fn missing(&self, handle: ManagedObjectHandle) -> BridgeError {
        if self.freed.contains(&handle) {
            BridgeError::UseAfterFree { handle }
        } else {
            BridgeError::Host(format!("{} is not a heap object", handle))
        }
    }

    pub fn get(&self, handle: ManagedObjectHandle) -> Result<&HeapObject> {
        self.objects.get(&handle).ok_or_else(|| self.missing(handle))
    }

    pub fn get_mut(&mut self, handle: ManagedObjectHandle) -> Result<&mut HeapObject> {
        if !self.objects.contains_key(&handle) {
            return Err(self.missing(handle));
        }
        self.objects
            .get_mut(&handle)
            .ok_or_else(|| BridgeError::Internal("heap object vanished".to_string()))
    }

    pub fn is_live(&self, handle: ManagedObjectHandle) -> bool {
        self.objects.contains_key(&handle)
    }

    pub fn is_freed(&self, handle: ManagedObjectHandle) -> bool {
        self.freed.contains(&handle)
    }

    /// Drop an object; its address is never handed out again
    pub fn free(&mut self, handle: ManagedObjectHandle) -> bool {
        if self.objects.remove(&handle).is_some() {
            self.freed.insert(handle);
            true
        } else {
            false
        }
    }

    pub fn clear_marks(&mut self) {
        for object in self.objects.values_mut() {
            object.header.marked = false;
        }
    }

    /// Set the mark bit; returns false if already marked or not live
    pub fn mark(&mut self, handle: ManagedObjectHandle) -> bool {
        match self.objects.get_mut(&handle) {
            Some(object) if !object.header.marked => {
                object.header.marked = true;
                true
            },
            _ => false,
        }
    }

    /// Unmarked objects in address order
    pub fn unmarked(&self) -> Vec<ManagedObjectHandle> {
        let mut dead: Vec<_> = self
            .objects
            .iter()
            .filter(|(_, o)| !o.header.marked)
            .map(|(h, _)| *h)
            .collect();
        dead.sort();
        dead
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn allocated_total(&self) -> usize {
        self.allocated_total
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}
