//! Stop-the-world mark-sweep for the local host
//!
//! Marking starts from the registered root set and follows object slots.
//! Finalizers of unreachable objects run after marking, outside every heap
//! lock and while the objects are still readable; memory is reclaimed last.

use super::LocalRuntime;
use crate::host::{ManagedObjectHandle, ManagedRuntime};

/// Result of one collection cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionStats {
    pub cycle: u64,
    /// Objects reachable from roots
    pub marked: usize,
    /// Objects reclaimed
    pub swept: usize,
    /// Finalizers run
    pub finalized: usize,
}

pub(super) fn collect(runtime: &LocalRuntime, cycle: u64) -> CollectionStats {
    let roots = runtime.root_handles();

    // Mark
    let (marked, dead) = {
        let mut heap = runtime.heap.lock();
        heap.clear_marks();

        let mut marked = 0;
        let mut worklist: Vec<ManagedObjectHandle> = roots;
        while let Some(handle) = worklist.pop() {
            if !heap.mark(handle) {
                continue;
            }
            marked += 1;
            if let Ok(object) = heap.get(handle) {
                worklist.extend(object.references());
            }
        }
        (marked, heap.unmarked())
    };

    // Finalize
    let mut finalized = 0;
    for &handle in &dead {
        let Ok(class) = runtime.class_of(handle) else {
            continue;
        };
        let finalizer = runtime.classes.read().finalizer_for(class);
        if let Some(finalizer) = finalizer {
            finalizer(runtime as &dyn ManagedRuntime, handle);
            finalized += 1;
        }
    }

    // Sweep
    let swept = {
        let mut heap = runtime.heap.lock();
        dead.iter().filter(|h| heap.free(**h)).count()
    };

    log::debug!(
        "local host collection #{}: marked={}, swept={}, finalized={}",
        cycle,
        marked,
        swept,
        finalized
    );

    CollectionStats {
        cycle,
        marked,
        swept,
        finalized,
    }
}
