//! `<string.h>` wrappers.
//!
//! Locate and tokenize functions return views into their argument: the
//! result shares the argument's tag, checks as live for exactly as long as
//! the argument does, and is refused by `mm_array_free`. A null libc result
//! is returned as the null checked pointer.

use std::cell::Cell;
use std::ffi::{CStr, c_char, c_int, c_void};

use mmsafe_membrane::{ArrayPtr, mm_array_alloc, rebase};

// ---------------------------------------------------------------------------
// locate
// ---------------------------------------------------------------------------

/// `strchr` over a checked string.
///
/// # Safety
///
/// `p` must be live and NUL-terminated.
#[must_use]
pub unsafe fn mm_strchr(p: ArrayPtr<c_char>, c: c_int) -> ArrayPtr<c_char> {
    if p.is_null() {
        return ArrayPtr::null();
    }
    // SAFETY: caller guarantees `p` is a live C string.
    unsafe { rebase(p, libc::strchr(p.as_ptr(), c)) }
}

/// `strrchr` over a checked string.
///
/// # Safety
///
/// `p` must be live and NUL-terminated.
#[must_use]
pub unsafe fn mm_strrchr(p: ArrayPtr<c_char>, c: c_int) -> ArrayPtr<c_char> {
    if p.is_null() {
        return ArrayPtr::null();
    }
    // SAFETY: caller guarantees `p` is a live C string.
    unsafe { rebase(p, libc::strrchr(p.as_ptr(), c)) }
}

/// `memchr` over the first `n` bytes of a checked buffer.
///
/// # Safety
///
/// `p` must be live with at least `n` readable bytes.
#[must_use]
pub unsafe fn mm_memchr(p: ArrayPtr<c_char>, c: c_int, n: usize) -> ArrayPtr<c_char> {
    if p.is_null() {
        return ArrayPtr::null();
    }
    // SAFETY: caller guarantees `n` readable bytes.
    unsafe {
        let hit = libc::memchr(p.as_ptr().cast::<c_void>(), c, n);
        rebase(p, hit.cast::<c_char>())
    }
}

/// `memrchr` over the first `n` bytes of a checked buffer.
///
/// # Safety
///
/// `p` must be live with at least `n` readable bytes.
#[must_use]
pub unsafe fn mm_memrchr(p: ArrayPtr<c_char>, c: c_int, n: usize) -> ArrayPtr<c_char> {
    if p.is_null() || n == 0 {
        return ArrayPtr::null();
    }
    // SAFETY: caller guarantees `n` readable bytes.
    let hit = unsafe { raw_memrchr(p.as_ptr(), c, n) };
    // SAFETY: `hit` is null or inside the scanned range.
    unsafe { rebase(p, hit) }
}

#[cfg(target_os = "linux")]
unsafe fn raw_memrchr(s: *mut c_char, c: c_int, n: usize) -> *mut c_char {
    // SAFETY: forwarded caller contract.
    unsafe { libc::memrchr(s.cast::<c_void>(), c, n).cast::<c_char>() }
}

#[cfg(not(target_os = "linux"))]
unsafe fn raw_memrchr(s: *mut c_char, c: c_int, n: usize) -> *mut c_char {
    let needle = c as u8;
    // SAFETY: forwarded caller contract.
    let bytes = unsafe { std::slice::from_raw_parts(s.cast::<u8>(), n) };
    match bytes.iter().rposition(|&b| b == needle) {
        Some(i) => s.wrapping_add(i),
        None => std::ptr::null_mut(),
    }
}

/// `strpbrk` over a checked string.
///
/// # Safety
///
/// `p` must be live and NUL-terminated.
#[must_use]
pub unsafe fn mm_strpbrk(p: ArrayPtr<c_char>, accept: &CStr) -> ArrayPtr<c_char> {
    if p.is_null() {
        return ArrayPtr::null();
    }
    // SAFETY: caller guarantees `p` is a live C string.
    unsafe { rebase(p, libc::strpbrk(p.as_ptr(), accept.as_ptr())) }
}

/// `strstr` over a checked string.
///
/// # Safety
///
/// `p` must be live and NUL-terminated.
#[must_use]
pub unsafe fn mm_strstr(p: ArrayPtr<c_char>, needle: &CStr) -> ArrayPtr<c_char> {
    if p.is_null() {
        return ArrayPtr::null();
    }
    // SAFETY: caller guarantees `p` is a live C string.
    unsafe { rebase(p, libc::strstr(p.as_ptr(), needle.as_ptr())) }
}

// ---------------------------------------------------------------------------
// tokenize
// ---------------------------------------------------------------------------

// Per-thread save pointer for `mm_strtok`.
thread_local! {
    static STRTOK_SAVE: Cell<*mut c_char> = const { Cell::new(std::ptr::null_mut()) };
}

/// `strtok` over a checked buffer.
///
/// Pass the buffer as `s` on the first call and null afterwards. Tokens are
/// rebased onto `s` when it is non-null and onto `base` otherwise, so
/// `base` must name the buffer being tokenized on continuation calls. The
/// common form is `mm_strtok(buf, delim, buf)` then
/// `mm_strtok(ArrayPtr::null(), delim, buf)`.
///
/// # Safety
///
/// The buffer must be live, writable and NUL-terminated until the last
/// continuation call.
#[must_use]
pub unsafe fn mm_strtok(s: ArrayPtr<c_char>, delim: &CStr, base: ArrayPtr<c_char>) -> ArrayPtr<c_char> {
    STRTOK_SAVE.with(|save| {
        let mut saved = save.get();
        // SAFETY: forwarded caller contract; the save pointer is thread-local.
        let token = unsafe { mm_strtok_r(s, delim, &mut saved, base) };
        save.set(saved);
        token
    })
}

/// `strtok_r` over a checked buffer with caller-held state.
///
/// # Safety
///
/// Same contract as [`mm_strtok`]; `saveptr` must be the value left by the
/// previous call on the same buffer when `s` is null.
#[must_use]
pub unsafe fn mm_strtok_r(
    s: ArrayPtr<c_char>,
    delim: &CStr,
    saveptr: &mut *mut c_char,
    base: ArrayPtr<c_char>,
) -> ArrayPtr<c_char> {
    let origin = if s.is_null() { base } else { s };
    if s.is_null() && saveptr.is_null() {
        return ArrayPtr::null();
    }
    // SAFETY: forwarded caller contract.
    unsafe {
        let token = libc::strtok_r(s.as_ptr(), delim.as_ptr(), saveptr);
        rebase(origin, token)
    }
}

/// Iterator over the tokens of one checked buffer.
///
/// Holds its own save pointer and remembers the buffer, so tokens always
/// rebase onto the right allocation.
#[derive(Debug)]
pub struct Tokenizer<'d> {
    base: ArrayPtr<c_char>,
    delim: &'d CStr,
    save: *mut c_char,
    started: bool,
}

impl<'d> Tokenizer<'d> {
    /// # Safety
    ///
    /// `buf` must be live, writable and NUL-terminated for as long as the
    /// tokenizer is advanced. Delimiters are overwritten with NUL.
    #[must_use]
    pub unsafe fn new(buf: ArrayPtr<c_char>, delim: &'d CStr) -> Self {
        Self {
            base: buf,
            delim,
            save: std::ptr::null_mut(),
            started: false,
        }
    }

    /// The buffer being tokenized.
    #[must_use]
    pub fn base(&self) -> ArrayPtr<c_char> {
        self.base
    }
}

impl Iterator for Tokenizer<'_> {
    type Item = ArrayPtr<c_char>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.base.is_null() {
            return None;
        }
        let s = if self.started {
            ArrayPtr::null()
        } else {
            self.started = true;
            self.base
        };
        // SAFETY: upheld by the contract of `Tokenizer::new`.
        let token = unsafe { mm_strtok_r(s, self.delim, &mut self.save, self.base) };
        (!token.is_null()).then_some(token)
    }
}

// ---------------------------------------------------------------------------
// duplicate
// ---------------------------------------------------------------------------

/// Copy `len` bytes from `src` into a fresh checked allocation of `alloc`
/// bytes. Null if the allocation fails.
///
/// # Safety
///
/// `src` must be readable for `len` bytes and `len <= alloc`.
unsafe fn dup_bytes(src: *const c_char, len: usize, alloc: usize) -> ArrayPtr<c_char> {
    let out = mm_array_alloc::<c_char>(alloc);
    if out.is_null() {
        return out;
    }
    // SAFETY: `out` holds `alloc >= len` bytes and cannot overlap `src`.
    unsafe { std::ptr::copy_nonoverlapping(src, out.as_ptr(), len) };
    out
}

/// `strdup` into a new checked allocation.
///
/// # Safety
///
/// `p` must be null or live and NUL-terminated.
#[must_use]
pub unsafe fn mm_strdup(p: ArrayPtr<c_char>) -> ArrayPtr<c_char> {
    if p.is_null() {
        return ArrayPtr::null();
    }
    // SAFETY: forwarded caller contract.
    unsafe { mm_strdup_from_raw(p.as_ptr()) }
}

/// `strndup` into a new checked allocation: at most `n` bytes are copied
/// and the result is always NUL-terminated.
///
/// # Safety
///
/// `p` must be null, or live and readable up to `n` bytes or its NUL.
#[must_use]
pub unsafe fn mm_strndup(p: ArrayPtr<c_char>, n: usize) -> ArrayPtr<c_char> {
    if p.is_null() {
        return ArrayPtr::null();
    }
    // SAFETY: forwarded caller contract.
    unsafe {
        let len = libc::strnlen(p.as_ptr(), n);
        let Some(alloc) = len.checked_add(1) else {
            return ArrayPtr::null();
        };
        let out = dup_bytes(p.as_ptr(), len, alloc);
        if !out.is_null() {
            out.set(len, 0);
        }
        out
    }
}

/// `strdup` of a raw C string into a new checked allocation.
///
/// # Safety
///
/// `p` must be null or a valid NUL-terminated string.
#[must_use]
pub unsafe fn mm_strdup_from_raw(p: *const c_char) -> ArrayPtr<c_char> {
    if p.is_null() {
        return ArrayPtr::null();
    }
    // SAFETY: forwarded caller contract.
    unsafe {
        let len = libc::strlen(p);
        dup_bytes(p, len + 1, len + 1)
    }
}

/// Copy `len` bytes of `src` into a new checked allocation.
///
/// # Safety
///
/// `src` must be live with at least `len` readable bytes.
#[must_use]
pub unsafe fn mm_memdup<T>(src: ArrayPtr<T>, len: usize) -> ArrayPtr<T> {
    if src.is_null() {
        return ArrayPtr::null();
    }
    // SAFETY: forwarded caller contract.
    unsafe { dup_bytes(src.as_ptr().cast::<c_char>(), len, len).cast::<T>() }
}

/// Move a libc-allocated string into a checked allocation, releasing the
/// original with `free`.
///
/// # Safety
///
/// `p` must be null or a NUL-terminated string from the libc allocator that
/// the caller gives up.
#[must_use]
pub unsafe fn mmize_str(p: *mut c_char) -> ArrayPtr<c_char> {
    if p.is_null() {
        return ArrayPtr::null();
    }
    // SAFETY: forwarded caller contract.
    unsafe {
        let out = mm_strdup_from_raw(p);
        libc::free(p.cast::<c_void>());
        out
    }
}

// ---------------------------------------------------------------------------
// pass-through
// ---------------------------------------------------------------------------

/// # Safety
///
/// `p` must be live and NUL-terminated.
#[must_use]
pub unsafe fn mm_strlen(p: ArrayPtr<c_char>) -> usize {
    // SAFETY: forwarded caller contract.
    unsafe { libc::strlen(p.as_ptr()) }
}

/// # Safety
///
/// Both strings must be live and NUL-terminated.
#[must_use]
pub unsafe fn mm_strcmp(a: ArrayPtr<c_char>, b: ArrayPtr<c_char>) -> c_int {
    // SAFETY: forwarded caller contract.
    unsafe { libc::strcmp(a.as_ptr(), b.as_ptr()) }
}

/// # Safety
///
/// Both strings must be live and readable up to `n` bytes or their NUL.
#[must_use]
pub unsafe fn mm_strncmp(a: ArrayPtr<c_char>, b: ArrayPtr<c_char>, n: usize) -> c_int {
    // SAFETY: forwarded caller contract.
    unsafe { libc::strncmp(a.as_ptr(), b.as_ptr(), n) }
}

/// `memcpy`; returns `dst`.
///
/// # Safety
///
/// Both buffers must be live for `n` bytes and must not overlap.
pub unsafe fn mm_memcpy<T, U>(dst: ArrayPtr<T>, src: ArrayPtr<U>, n: usize) -> ArrayPtr<T> {
    // SAFETY: forwarded caller contract.
    unsafe {
        libc::memcpy(dst.as_ptr().cast::<c_void>(), src.as_ptr().cast::<c_void>(), n);
    }
    dst
}

/// `strcpy`; returns `dst`.
///
/// # Safety
///
/// `src` must be live and NUL-terminated and `dst` must have room for it.
pub unsafe fn mm_strcpy(dst: ArrayPtr<c_char>, src: ArrayPtr<c_char>) -> ArrayPtr<c_char> {
    // SAFETY: forwarded caller contract.
    unsafe {
        libc::strcpy(dst.as_ptr(), src.as_ptr());
    }
    dst
}
