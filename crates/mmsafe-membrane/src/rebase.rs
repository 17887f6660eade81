//! Pointer fabrication for results of uninstrumented code.
//!
//! libc hands back raw addresses that point into a buffer the caller passed
//! in (a match, a token, a parse end). These helpers wrap such an address in
//! the metadata of the pointer it was derived from. They are the only place
//! outside the allocators that builds checked pointers from raw parts.
//!
//! Rebased pointers of either kind are marked as views: they check as live
//! exactly like their source, but freeing or reallocating through them is
//! refused.

#![allow(unsafe_code)]

use crate::array::ArrayPtr;
use crate::metrics::{MembraneMetrics, global_metrics};
use crate::object::ObjectPtr;
use crate::tag::Tag;

/// Object pointer carrying a marker address and tag 0.
///
/// Used to signal out-of-band conditions (`create_invalid_mm_ptr(usize::MAX)`
/// for "no entry"). It never checks as live and is never freeable.
#[must_use]
pub fn create_invalid_mm_ptr<T>(marker: usize) -> ObjectPtr<T> {
    MembraneMetrics::inc(&global_metrics().sentinels);
    ObjectPtr::from_parts(marker as *mut T, Tag::FREED, 0)
}

/// Array pointer carrying a marker address and tag 0.
#[must_use]
pub fn create_invalid_mm_array_ptr<T>(marker: usize) -> ArrayPtr<T> {
    MembraneMetrics::inc(&global_metrics().sentinels);
    ArrayPtr::from_parts(marker as *mut T, Tag::FREED, std::ptr::null_mut())
}

/// Wrap `new_raw` in `source`'s tag and slot reference.
///
/// A null `new_raw` (the usual "not found" answer) yields the null pointer.
///
/// # Safety
///
/// `new_raw` must be null or point into the allocation `source` names.
#[must_use]
pub unsafe fn rebase<T, U>(source: ArrayPtr<T>, new_raw: *mut U) -> ArrayPtr<U> {
    let metrics = global_metrics();
    if new_raw.is_null() {
        MembraneMetrics::inc(&metrics.null_rebases);
        return ArrayPtr::null();
    }
    MembraneMetrics::inc(&metrics.rebases);
    ArrayPtr::from_parts(new_raw, source.tag(), source.lock()).into_view()
}

/// Object-pointer flavour of [`rebase`]: the offset is recomputed from the
/// start of `source`'s allocation.
///
/// # Safety
///
/// `new_raw` must be null or point into the allocation `source` names, at
/// or after its start.
#[must_use]
pub unsafe fn rebase_object<T, U>(source: ObjectPtr<T>, new_raw: *mut U) -> ObjectPtr<U> {
    let metrics = global_metrics();
    if new_raw.is_null() {
        MembraneMetrics::inc(&metrics.null_rebases);
        return ObjectPtr::null();
    }
    MembraneMetrics::inc(&metrics.rebases);
    let tag = source.tag();
    let offset = if tag.is_reserved() {
        0
    } else {
        let start = source.addr().wrapping_sub(source.offset());
        (new_raw as usize).wrapping_sub(start) as u32
    };
    ObjectPtr::from_parts(new_raw, tag, offset).into_view()
}

/// In-place [`rebase`] for end-pointer outputs (`strtod`'s `endptr`).
///
/// # Safety
///
/// Same contract as [`rebase`], with `p` as the source.
pub unsafe fn set_raw_address<T>(p: &mut ArrayPtr<T>, new_raw: *mut T) {
    // SAFETY: forwarded caller contract.
    *p = unsafe { rebase(*p, new_raw) };
}

/// Raw addresses of a collection of checked pointers, in order.
///
/// The result is handed to code that only understands plain pointers
/// (`qsort`'s comparator); it carries no liveness information.
#[must_use]
pub fn marshal_shared_array_ptr<T>(ptrs: &[ArrayPtr<T>]) -> Vec<*mut T> {
    ptrs.iter().map(ArrayPtr::as_ptr).collect()
}
