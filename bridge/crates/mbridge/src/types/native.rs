//! Native cells for non-trivial fields
//!
//! The managed heap cannot hold owning native values, so a non-trivial field
//! slot stores a [`NativePtr`] naming a cell in the process-wide registry.
//! The constructor path registers cells and the destructor path removes
//! them. Before construction and after destruction the slot holds
//! `Value::Undefined`.
//!
//! Slot contents are never trusted: every access looks the id up in the
//! registry, and a borrower keeps its cell alive even if the destructor path
//! removes it mid-borrow.

use crate::host::{NativePtr, Value};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum NativeCell {
    Text(String),
    List(Vec<Value>),
}

impl NativeCell {
    pub fn kind(&self) -> &'static str {
        match self {
            NativeCell::Text(_) => "string",
            NativeCell::List(_) => "list",
        }
    }
}

/// Shared handle on a live cell
pub(crate) type CellRef = Arc<Mutex<NativeCell>>;

lazy_static::lazy_static! {
    /// Live cells keyed by the id their managed slot stores
    static ref CELLS: RwLock<FxHashMap<NativePtr, CellRef>> = RwLock::new(FxHashMap::default());
}

static NEXT_CELL: AtomicU64 = AtomicU64::new(1);

/// Register `cell` and return its id
pub(crate) fn alloc(cell: NativeCell) -> NativePtr {
    let ptr = NativePtr::from_id(NEXT_CELL.fetch_add(1, Ordering::Relaxed));
    CELLS.write().insert(ptr, Arc::new(Mutex::new(cell)));
    ptr
}

/// The live cell named by `ptr`
pub(crate) fn get(ptr: NativePtr) -> Option<CellRef> {
    CELLS.read().get(&ptr).cloned()
}

/// Remove a cell from the registry; false if it was not live
pub(crate) fn free(ptr: NativePtr) -> bool {
    CELLS.write().remove(&ptr).is_some()
}
