//! Raw-address registry for half-ported programs.
//!
//! While a program is being converted, a raw address can reach `free()`
//! even though it came from a checked allocator, and the other way round.
//! When enabled, the registry remembers the first-element address of every
//! live checked allocation so [`uncertain_free`] can route each address to
//! the right deallocator.

#![allow(unsafe_code)]

use std::collections::HashSet;
use std::ffi::c_void;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::config::porting_registry_enabled;
use crate::header;
use crate::metrics::{MembraneMetrics, global_metrics};
use crate::tag::Tag;

/// Concurrent set of raw addresses owned by checked allocations.
#[derive(Debug, Default)]
pub struct PortingRegistry {
    enabled: AtomicBool,
    addrs: RwLock<HashSet<usize>>,
}

impl PortingRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            addrs: RwLock::new(HashSet::new()),
        }
    }

    /// Start tracking allocations made from now on.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    /// Stop tracking. Already registered addresses are kept.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        self.addrs.read().contains(&addr)
    }

    pub fn insert(&self, addr: usize) {
        self.addrs.write().insert(addr);
    }

    /// Returns true if `addr` was registered.
    pub fn remove(&self, addr: usize) -> bool {
        self.addrs.write().remove(&addr)
    }

    /// Number of registered addresses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.addrs.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn track(&self, addr: usize) {
        if self.is_enabled() {
            self.insert(addr);
        }
    }

    pub(crate) fn untrack(&self, addr: usize) {
        // Addresses may have been inserted by hand while tracking was off.
        if !self.is_empty() {
            self.remove(addr);
        }
    }
}

/// Process-wide registry; starts enabled when `MMSAFE_PORTING_REGISTRY=1`.
pub fn global_registry() -> &'static PortingRegistry {
    static REGISTRY: OnceLock<PortingRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| PortingRegistry::new(porting_registry_enabled()))
}

pub(crate) fn on_allocate(user: usize) {
    global_registry().track(user);
}

pub(crate) fn on_release(user: usize) {
    global_registry().untrack(user);
}

/// True if `p` is the raw address of a registered checked allocation.
#[must_use]
pub fn is_an_mmsafe_ptr(p: *const c_void) -> bool {
    global_registry().contains(p as usize)
}

/// Register `p` as the raw address of a checked allocation.
pub fn insert_mmsafe_ptr(p: *const c_void) {
    global_registry().insert(p as usize);
}

/// Forget `p`.
pub fn erase_mmsafe_ptr(p: *const c_void) {
    global_registry().remove(p as usize);
}

/// Drop-in replacement for `free()` in code that may hold either kind of
/// address. Registered addresses have their generation slot cleared and
/// their block released; anything else goes to libc `free`.
///
/// # Safety
///
/// `p` must be null, a live libc allocation, or the first-element address
/// of a live checked allocation.
pub unsafe fn uncertain_free(p: *mut c_void) {
    if p.is_null() {
        return;
    }
    let addr = p as usize;
    if global_registry().remove(addr) {
        let slot = header::slot_of_user(addr);
        // SAFETY: registered addresses are first elements of live blocks.
        unsafe {
            header::store_slot(slot, Tag::FREED.slot_value());
            header::release_block(slot);
        }
        MembraneMetrics::inc(&global_metrics().frees);
    } else {
        // SAFETY: caller guarantees `p` came from the libc allocator.
        unsafe { libc::free(p) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_registry_ignores_tracking() {
        let reg = PortingRegistry::new(false);
        reg.track(0x1000);
        assert!(!reg.contains(0x1000));
        reg.enable();
        reg.track(0x1000);
        assert!(reg.contains(0x1000));
        reg.untrack(0x1000);
        assert!(reg.is_empty());
    }

    #[test]
    fn explicit_insert_and_erase() {
        let reg = PortingRegistry::new(false);
        reg.insert(0x2000);
        assert_eq!(reg.len(), 1);
        assert!(reg.remove(0x2000));
        assert!(!reg.remove(0x2000));
    }

    #[test]
    fn uncertain_free_routes_plain_libc_memory() {
        // SAFETY: plain malloc/free pair.
        unsafe {
            let p = libc::malloc(32);
            assert!(!p.is_null());
            assert!(!is_an_mmsafe_ptr(p));
            uncertain_free(p);
            uncertain_free(std::ptr::null_mut());
        }
    }
}
