//! `<stdlib.h>` wrappers: numeric parsing and sorting.

use std::collections::{HashMap, VecDeque};
use std::ffi::{c_char, c_int, c_long, c_ulong, c_void};

use mmsafe_membrane::{ArrayPtr, marshal_shared_array_ptr, set_raw_address};

/// Point `end` at the first unparsed byte of `src`.
///
/// # Safety
///
/// `raw_end` must be inside `src`'s allocation.
unsafe fn store_end(src: ArrayPtr<c_char>, end: Option<&mut ArrayPtr<c_char>>, raw_end: *mut c_char) {
    if let Some(end) = end {
        *end = src;
        // SAFETY: forwarded caller contract.
        unsafe { set_raw_address(end, raw_end) };
    }
}

/// `strtod` over a checked string. When `end` is given it receives a view
/// of `src` at the first unparsed byte.
///
/// # Safety
///
/// `src` must be live and NUL-terminated.
pub unsafe fn mm_strtod(src: ArrayPtr<c_char>, end: Option<&mut ArrayPtr<c_char>>) -> f64 {
    let mut raw_end: *mut c_char = std::ptr::null_mut();
    // SAFETY: caller guarantees `src` is a live C string; strtod sets
    // `raw_end` inside it.
    unsafe {
        let value = libc::strtod(src.as_ptr(), &mut raw_end);
        store_end(src, end, raw_end);
        value
    }
}

/// `strtol` over a checked string.
///
/// # Safety
///
/// `src` must be live and NUL-terminated.
pub unsafe fn mm_strtol(src: ArrayPtr<c_char>, end: Option<&mut ArrayPtr<c_char>>, base: c_int) -> c_long {
    let mut raw_end: *mut c_char = std::ptr::null_mut();
    // SAFETY: see `mm_strtod`.
    unsafe {
        let value = libc::strtol(src.as_ptr(), &mut raw_end, base);
        store_end(src, end, raw_end);
        value
    }
}

/// `strtoul` over a checked string.
///
/// # Safety
///
/// `src` must be live and NUL-terminated.
pub unsafe fn mm_strtoul(
    src: ArrayPtr<c_char>,
    end: Option<&mut ArrayPtr<c_char>>,
    base: c_int,
) -> c_ulong {
    let mut raw_end: *mut c_char = std::ptr::null_mut();
    // SAFETY: see `mm_strtod`.
    unsafe {
        let value = libc::strtoul(src.as_ptr(), &mut raw_end, base);
        store_end(src, end, raw_end);
        value
    }
}

/// C comparator over two elements of a raw pointer array.
pub type Comparator = unsafe extern "C" fn(*const c_void, *const c_void) -> c_int;

/// Sort a collection of checked pointers with a C comparator.
///
/// The comparator sees a plain `T*` array, as it would in unconverted code.
/// After libc `qsort` reorders the raw addresses, each slot gets back the
/// checked pointer that carried that address, so tags and slot references
/// follow their addresses. Equal addresses are handed back in their
/// original relative order.
///
/// # Safety
///
/// `compar` must be safe to call on any two elements, each a `*const *mut T`.
pub unsafe fn mm_qsort_ptrs<T>(items: &mut [ArrayPtr<T>], compar: Comparator) {
    if items.len() < 2 {
        return;
    }
    let mut raw = marshal_shared_array_ptr(items);
    // SAFETY: `raw` holds `items.len()` pointer-sized elements.
    unsafe {
        libc::qsort(
            raw.as_mut_ptr().cast::<c_void>(),
            raw.len(),
            std::mem::size_of::<*mut T>(),
            Some(compar),
        );
    }

    let mut by_addr: HashMap<usize, VecDeque<ArrayPtr<T>>> = HashMap::with_capacity(items.len());
    for p in items.iter() {
        by_addr.entry(p.addr()).or_default().push_back(*p);
    }
    for (slot, addr) in items.iter_mut().zip(raw) {
        if let Some(p) = by_addr.get_mut(&(addr as usize)).and_then(VecDeque::pop_front) {
            *slot = p;
        }
    }
}

/// [`mm_qsort_ptrs`] over `n` checked pointers stored in a checked array.
///
/// # Safety
///
/// `base` must be live with `n` initialized elements, and `compar` as for
/// [`mm_qsort_ptrs`].
pub unsafe fn mm_qsort_array<T>(base: ArrayPtr<ArrayPtr<T>>, n: usize, compar: Comparator) {
    if base.is_null() || n == 0 {
        return;
    }
    // SAFETY: forwarded caller contract.
    unsafe {
        let items = std::slice::from_raw_parts_mut(base.as_ptr(), n);
        mm_qsort_ptrs(items, compar);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::string_abi::mm_strdup_from_raw;
    use mmsafe_membrane::try_mm_array_free;

    unsafe extern "C" fn by_first_byte(a: *const c_void, b: *const c_void) -> c_int {
        // SAFETY: elements are `*mut c_char` pointing at live strings.
        unsafe {
            let a = *a.cast::<*const u8>();
            let b = *b.cast::<*const u8>();
            c_int::from(*a) - c_int::from(*b)
        }
    }

    #[test]
    fn strtol_end_pointer_is_a_view() {
        // SAFETY: the literal is a valid C string.
        let p = unsafe { mm_strdup_from_raw(c"  42xyz".as_ptr()) };
        let mut end = ArrayPtr::null();
        // SAFETY: p is live.
        unsafe {
            assert_eq!(mm_strtol(p, Some(&mut end), 10), 42);
            assert_eq!(end.byte_offset(), 4);
            assert_eq!(end.tag(), p.tag());
            assert!(end.is_view());
            assert_eq!(mm_strtoul(p, None, 10), 42);
            try_mm_array_free(p).unwrap();
        }
    }

    #[test]
    fn qsort_keeps_metadata_with_addresses() {
        // SAFETY: literals are valid C strings.
        let mut items: Vec<ArrayPtr<c_char>> = [c"pear", c"apple", c"fig"]
            .iter()
            .map(|s| unsafe { mm_strdup_from_raw(s.as_ptr()) })
            .collect();
        let before = items.clone();
        // SAFETY: comparator reads the first byte of live strings.
        unsafe {
            mm_qsort_ptrs(&mut items, by_first_byte);
            assert_eq!(items, vec![before[1], before[2], before[0]]);
            for p in items {
                try_mm_array_free(p).unwrap();
            }
        }
    }
}
