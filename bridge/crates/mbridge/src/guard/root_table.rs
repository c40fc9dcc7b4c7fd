//! Process-wide root table
//!
//! Maps each pinned handle to its pin count and the de-registration token the
//! host returned when the handle entered the root set.

use super::ReferenceGuard;
use crate::error::Result;
use crate::host::{ManagedObjectHandle, RootRegistry, RootToken};
use crate::logging::{log_event, BridgeEvent};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
struct RootEntry {
    pins: usize,
    token: RootToken,
}

/// Root table statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RootTableStats {
    /// Distinct handles currently pinned
    pub pinned_handles: usize,
    /// Sum of pin counts
    pub total_pins: usize,
    /// Host root registrations performed
    pub registrations: u64,
    /// Host root de-registrations performed
    pub unregistrations: u64,
    /// Most distinct handles pinned at once
    pub peak_handles: usize,
}

pub struct RootTable {
    registry: Arc<dyn RootRegistry>,
    entries: Mutex<FxHashMap<ManagedObjectHandle, RootEntry>>,
    registrations: AtomicU64,
    unregistrations: AtomicU64,
    peak: AtomicUsize,
}

impl RootTable {
    pub fn new(registry: Arc<dyn RootRegistry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            entries: Mutex::new(FxHashMap::default()),
            registrations: AtomicU64::new(0),
            unregistrations: AtomicU64::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    /// Pin `handle` for the lifetime of the returned guard
    pub fn acquire(self: &Arc<Self>, handle: ManagedObjectHandle) -> Result<ReferenceGuard> {
        if handle.is_null() {
            return Ok(ReferenceGuard::empty());
        }

        let pins = {
            let mut entries = self.entries.lock();
            match entries.get_mut(&handle) {
                Some(entry) => {
                    entry.pins += 1;
                    entry.pins
                },
                None => {
                    let token = self.registry.register_root(handle)?;
                    self.registrations.fetch_add(1, Ordering::Relaxed);
                    entries.insert(handle, RootEntry { pins: 1, token });
                    self.peak.fetch_max(entries.len(), Ordering::Relaxed);
                    1
                },
            }
        };

        log_event(BridgeEvent::GuardPinned {
            handle: handle.as_raw(),
            pins,
        });
        Ok(ReferenceGuard::pinned(self.clone(), handle))
    }

    /// Add a pin to an existing entry; false if there is none
    pub(super) fn pin_existing(&self, handle: ManagedObjectHandle) -> bool {
        let pins = {
            let mut entries = self.entries.lock();
            match entries.get_mut(&handle) {
                Some(entry) => {
                    entry.pins += 1;
                    entry.pins
                },
                None => return false,
            }
        };
        log_event(BridgeEvent::GuardPinned {
            handle: handle.as_raw(),
            pins,
        });
        true
    }

    /// Remove a pin; the host root goes away with the last one
    pub(super) fn unpin(&self, handle: ManagedObjectHandle) {
        let erased = {
            let mut entries = self.entries.lock();
            let Some(entry) = entries.get_mut(&handle) else {
                log::error!("unpin of {} which has no root table entry", handle);
                return;
            };
            entry.pins -= 1;
            if entry.pins == 0 {
                entries.remove(&handle).map(|e| e.token)
            } else {
                log_event(BridgeEvent::GuardUnpinned {
                    handle: handle.as_raw(),
                    pins: entry.pins,
                });
                None
            }
        };

        if let Some(token) = erased {
            self.unregistrations.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = self.registry.unregister_root(token) {
                log::error!("failed to unregister root of {}: {}", handle, e);
            }
            log_event(BridgeEvent::RootErased {
                handle: handle.as_raw(),
            });
        }
    }

    /// Distinct pinned handles
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn pin_count(&self, handle: ManagedObjectHandle) -> usize {
        self.entries.lock().get(&handle).map(|e| e.pins).unwrap_or(0)
    }

    pub fn is_pinned(&self, handle: ManagedObjectHandle) -> bool {
        self.pin_count(handle) > 0
    }

    pub fn stats(&self) -> RootTableStats {
        let entries = self.entries.lock();
        RootTableStats {
            pinned_handles: entries.len(),
            total_pins: entries.values().map(|e| e.pins).sum(),
            registrations: self.registrations.load(Ordering::Relaxed),
            unregistrations: self.unregistrations.load(Ordering::Relaxed),
            peak_handles: self.peak.load(Ordering::Relaxed),
        }
    }
}
