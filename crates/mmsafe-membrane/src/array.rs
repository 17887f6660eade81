//! Array pointers and the array allocator.
//!
//! An [`ArrayPtr`] carries its generation slot address directly (`lock`), so
//! arithmetic only moves `raw` and never needs an offset. The first element
//! of the allocation always sits `SLOT_TO_USER` bytes past `lock`, which is
//! how frees tell the owning pointer from an interior one.

#![allow(unsafe_code)]

use std::fmt;
use std::marker::PhantomData;

use crate::diagnostics::fatal;
use crate::error::{AllocError, Violation};
use crate::header;
use crate::metrics::{MembraneMetrics, global_metrics};
use crate::object::ObjectPtr;
use crate::porting;
use crate::tag::{self, Tag};

const TAG_MASK: u64 = 0xFFFF_FFFF;
/// Set on pointers rebased from library results. Views are never freeable.
const VIEW_FLAG: u64 = 1 << 32;

/// Checked pointer into a heap array.
#[repr(C)]
pub struct ArrayPtr<T> {
    raw: *mut T,
    key: u64,
    lock: *mut u64,
    _marker: PhantomData<*mut T>,
}

impl<T> Clone for ArrayPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ArrayPtr<T> {}

// SAFETY: a checked pointer is an address plus metadata; every dereference
// and every slot access already requires `unsafe` at the use site.
unsafe impl<T> Send for ArrayPtr<T> {}
// SAFETY: see above.
unsafe impl<T> Sync for ArrayPtr<T> {}

impl<T> PartialEq for ArrayPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw && self.key == other.key && self.lock == other.lock
    }
}

impl<T> Eq for ArrayPtr<T> {}

impl<T> fmt::Debug for ArrayPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayPtr")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("tag", &self.tag())
            .field("lock", &self.lock)
            .field("view", &self.is_view())
            .finish()
    }
}

impl<T> Default for ArrayPtr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> ArrayPtr<T> {
    #[must_use]
    pub const fn null() -> Self {
        Self {
            raw: std::ptr::null_mut(),
            key: 0,
            lock: std::ptr::null_mut(),
            _marker: PhantomData,
        }
    }

    pub(crate) const fn from_parts(raw: *mut T, tag: Tag, lock: *mut u64) -> Self {
        Self {
            raw,
            key: tag.slot_value(),
            lock,
            _marker: PhantomData,
        }
    }

    pub(crate) const fn into_view(self) -> Self {
        Self {
            key: self.key | VIEW_FLAG,
            ..self
        }
    }

    /// `into_view` when `view` is set, `self` otherwise.
    pub(crate) const fn view_if(self, view: bool) -> Self {
        if view { self.into_view() } else { self }
    }

    /// Checked pointer to a stack buffer. Always live, never freeable.
    #[must_use]
    pub fn from_stack(buf: &mut [T]) -> Self {
        Self::from_parts(buf.as_mut_ptr(), Tag::STACK, std::ptr::null_mut())
    }

    /// Checked pointer to global or static storage. Always live, never freeable.
    #[must_use]
    pub const fn from_global(raw: *mut T) -> Self {
        Self::from_parts(raw, Tag::GLOBAL, std::ptr::null_mut())
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.raw.is_null()
    }

    #[must_use]
    pub const fn tag(&self) -> Tag {
        Tag::from_raw((self.key & TAG_MASK) as u32)
    }

    /// Full key word, tag plus flags.
    #[must_use]
    pub const fn key(&self) -> u64 {
        self.key
    }

    /// True for pointers produced by rebasing a library result.
    #[must_use]
    pub const fn is_view(&self) -> bool {
        self.key & VIEW_FLAG != 0
    }

    /// Generation slot reference.
    #[must_use]
    pub const fn lock(&self) -> *mut u64 {
        self.lock
    }

    #[must_use]
    pub const fn as_ptr(&self) -> *mut T {
        self.raw
    }

    #[must_use]
    pub fn addr(&self) -> usize {
        self.raw as usize
    }

    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        !self.is_null() && self.tag() == Tag::FREED
    }

    /// Address of the allocation's first element, or 0 for pointers that
    /// have no slot reference.
    #[must_use]
    pub fn first_element_addr(&self) -> usize {
        if self.lock.is_null() {
            0
        } else {
            header::user_of_slot(self.lock)
        }
    }

    /// Byte distance from the allocation's first element.
    #[must_use]
    pub fn byte_offset(&self) -> usize {
        if self.lock.is_null() {
            0
        } else {
            self.addr().wrapping_sub(self.first_element_addr())
        }
    }

    /// Move by `delta` elements. No validity check; tag and slot reference
    /// are unchanged.
    #[must_use]
    pub fn offset(self, delta: isize) -> Self {
        Self {
            raw: self.raw.wrapping_offset(delta),
            ..self
        }
    }

    #[must_use]
    pub fn add(self, count: usize) -> Self {
        Self {
            raw: self.raw.wrapping_add(count),
            ..self
        }
    }

    #[must_use]
    pub fn sub(self, count: usize) -> Self {
        Self {
            raw: self.raw.wrapping_sub(count),
            ..self
        }
    }

    /// `p++`
    pub fn inc(&mut self) {
        *self = self.add(1);
    }

    /// `p--`
    pub fn dec(&mut self) {
        *self = self.sub(1);
    }

    /// Reinterpret the element type, keeping address and metadata.
    #[must_use]
    pub const fn cast<U>(self) -> ArrayPtr<U> {
        ArrayPtr {
            raw: self.raw.cast(),
            key: self.key,
            lock: self.lock,
            _marker: PhantomData,
        }
    }

    /// Object pointer to element `index` (`&p[index]`), offset measured
    /// from the first element.
    #[must_use]
    pub fn element(&self, index: usize) -> ObjectPtr<T> {
        if self.is_null() {
            return ObjectPtr::null();
        }
        let target = self.add(index);
        let offset = if self.tag().is_static() {
            0
        } else {
            target.byte_offset() as u32
        };
        ObjectPtr::from_parts(target.raw, self.tag(), offset).view_if(self.is_view())
    }

    /// Read element `index`.
    ///
    /// # Safety
    ///
    /// The pointer must be live and `index` in bounds.
    #[must_use]
    pub unsafe fn get(&self, index: usize) -> T
    where
        T: Copy,
    {
        // SAFETY: forwarded caller contract.
        unsafe { self.raw.add(index).read() }
    }

    /// Write element `index`.
    ///
    /// # Safety
    ///
    /// The pointer must be live and `index` in bounds.
    pub unsafe fn set(&self, index: usize, value: T) {
        // SAFETY: forwarded caller contract.
        unsafe { self.raw.add(index).write(value) }
    }

    /// Validate the pointer against its generation slot.
    ///
    /// # Safety
    ///
    /// The header memory the slot reference names must still be mapped.
    pub unsafe fn check(&self) -> Result<(), Violation> {
        let tag = self.tag();
        if tag.is_static() {
            return Ok(());
        }
        if self.is_null() || tag == Tag::FREED || self.lock.is_null() {
            return Err(Violation::UnownedFree {
                addr: self.addr(),
                tag: tag.get(),
            });
        }
        // SAFETY: forwarded caller contract.
        let found = unsafe { header::load_slot(self.lock) };
        if found == tag.slot_value() {
            Ok(())
        } else {
            Err(Violation::DoubleFreeOrUseAfterFree {
                addr: self.addr(),
                expected: tag.get(),
                found,
            })
        }
    }

    /// # Safety
    ///
    /// Same contract as [`ArrayPtr::check`].
    #[must_use]
    pub unsafe fn is_live(&self) -> bool {
        // SAFETY: forwarded caller contract.
        unsafe { self.check().is_ok() }
    }

    /// Reasons this pointer may not be handed to free or realloc, checked
    /// without touching memory.
    fn owning_violation(&self) -> Option<Violation> {
        let tag = self.tag();
        if tag.is_reserved() || self.lock.is_null() {
            return Some(Violation::UnownedFree {
                addr: self.addr(),
                tag: tag.get(),
            });
        }
        if self.is_view() {
            return Some(Violation::ViewFree { addr: self.addr() });
        }
        let offset = self.byte_offset();
        if offset != 0 {
            return Some(Violation::InvalidFree {
                addr: self.addr(),
                offset,
            });
        }
        None
    }
}

/// Allocate `bytes` bytes for an array. Null on failure.
#[must_use]
pub fn mm_array_alloc<T>(bytes: usize) -> ArrayPtr<T> {
    or_null(try_mm_array_alloc(bytes))
}

/// Allocate room for `count` elements of `T`. Null on failure or overflow.
#[must_use]
pub fn mm_array_alloc_n<T>(count: usize) -> ArrayPtr<T> {
    let size = std::mem::size_of::<T>();
    or_null(
        count
            .checked_mul(size)
            .ok_or(AllocError::Overflow { nmemb: count, size })
            .and_then(try_mm_array_alloc),
    )
}

/// Zeroed allocation of `nmemb * size` bytes. Null on failure or overflow.
#[must_use]
pub fn mm_calloc<T>(nmemb: usize, size: usize) -> ArrayPtr<T> {
    or_null(
        nmemb
            .checked_mul(size)
            .ok_or(AllocError::Overflow { nmemb, size })
            .and_then(|bytes| alloc_array(bytes, true)),
    )
}

/// Allocate `bytes` bytes for an array, reporting why on failure.
pub fn try_mm_array_alloc<T>(bytes: usize) -> Result<ArrayPtr<T>, AllocError> {
    alloc_array(bytes, false)
}

fn alloc_array<T>(bytes: usize, zeroed: bool) -> Result<ArrayPtr<T>, AllocError> {
    let tag = tag::issue();
    let slot = header::allocate_block(bytes, tag, zeroed)?;
    let user = header::user_of_slot(slot);
    porting::on_allocate(user);
    MembraneMetrics::inc(&global_metrics().array_allocs);
    Ok(ArrayPtr::from_parts(user as *mut T, tag, slot))
}

fn or_null<T>(result: Result<ArrayPtr<T>, AllocError>) -> ArrayPtr<T> {
    result.unwrap_or_else(|_| {
        MembraneMetrics::inc(&global_metrics().alloc_failures);
        ArrayPtr::null()
    })
}

/// Resize the allocation `p` owns to `new_size` bytes.
///
/// Null `p` allocates. If the block stays in place the same pointer comes
/// back; if it moves, the new block gets a fresh tag and every pointer into
/// the old block becomes stale. On failure null is returned and `p` is
/// still live and freeable. Violations abort the process.
///
/// # Safety
///
/// `p` must be null or derived from an array allocation of this crate.
#[must_use]
pub unsafe fn mm_array_realloc<T>(p: ArrayPtr<T>, new_size: usize) -> ArrayPtr<T> {
    // SAFETY: forwarded caller contract.
    match unsafe { try_mm_array_realloc(p, new_size) } {
        Ok(q) => q,
        Err(violation) => fatal(violation, "mm_array_realloc"),
    }
}

/// [`mm_array_realloc`] that returns the violation instead of aborting.
///
/// # Safety
///
/// Same contract as [`mm_array_realloc`].
pub unsafe fn try_mm_array_realloc<T>(
    p: ArrayPtr<T>,
    new_size: usize,
) -> Result<ArrayPtr<T>, Violation> {
    let metrics = global_metrics();
    if p.is_null() {
        return Ok(mm_array_alloc(new_size));
    }
    if let Some(violation) = p.owning_violation() {
        metrics.record_violation(&violation);
        return Err(violation);
    }
    if new_size > header::MAX_USER_SIZE {
        MembraneMetrics::inc(&metrics.realloc_failures);
        return Ok(ArrayPtr::null());
    }

    let tag = p.tag();
    let old_slot = p.lock;
    // The slot reads 0 while the underlying realloc runs.
    // SAFETY: `p` owns its block, so `old_slot` is that block's slot.
    if let Err(found) = unsafe { header::retire_slot(old_slot, tag) } {
        let violation = Violation::DoubleFreeOrUseAfterFree {
            addr: p.addr(),
            expected: tag.get(),
            found,
        };
        metrics.record_violation(&violation);
        return Err(violation);
    }

    // SAFETY: the block is live; we just retired its tag ourselves.
    let Some(new_slot) = (unsafe { header::resize_block(old_slot, new_size) }) else {
        // SAFETY: the original block is untouched on failure.
        unsafe { header::store_slot(old_slot, tag.slot_value()) };
        MembraneMetrics::inc(&metrics.realloc_failures);
        return Ok(ArrayPtr::null());
    };

    if new_slot == old_slot {
        // SAFETY: same block, still ours.
        unsafe { header::store_slot(new_slot, tag.slot_value()) };
        MembraneMetrics::inc(&metrics.reallocs_in_place);
        return Ok(p);
    }

    let new_tag = tag::issue();
    // SAFETY: new_slot is the slot of the block realloc just returned.
    unsafe { header::store_slot(new_slot, new_tag.slot_value()) };
    let user = header::user_of_slot(new_slot);
    porting::on_release(p.addr());
    porting::on_allocate(user);
    MembraneMetrics::inc(&metrics.reallocs_moved);
    Ok(ArrayPtr::from_parts(user as *mut T, new_tag, new_slot))
}

/// Free an array allocation. Null is a no-op.
///
/// Aborts on a pointer that is not the allocation's first element, on a
/// view, and on a tag mismatch.
///
/// # Safety
///
/// `p` must be null or derived from an array allocation of this crate.
pub unsafe fn mm_array_free<T>(p: ArrayPtr<T>) {
    // SAFETY: forwarded caller contract.
    if let Err(violation) = unsafe { try_mm_array_free(p) } {
        fatal(violation, "mm_array_free");
    }
}

/// [`mm_array_free`] that returns the violation instead of aborting.
///
/// # Safety
///
/// Same contract as [`mm_array_free`].
pub unsafe fn try_mm_array_free<T>(p: ArrayPtr<T>) -> Result<(), Violation> {
    if p.is_null() {
        return Ok(());
    }
    let result = match p.owning_violation() {
        Some(violation) => Err(violation),
        // SAFETY: `p` owns its block, so `lock` is that block's slot.
        None => unsafe {
            match header::retire_slot(p.lock, p.tag()) {
                Ok(()) => {
                    porting::on_release(p.addr());
                    header::release_block(p.lock);
                    Ok(())
                }
                Err(found) => Err(Violation::DoubleFreeOrUseAfterFree {
                    addr: p.addr(),
                    expected: p.tag().get(),
                    found,
                }),
            }
        },
    };

    match &result {
        Ok(()) => MembraneMetrics::inc(&global_metrics().frees),
        Err(v) => global_metrics().record_violation(v),
    }
    result
}
