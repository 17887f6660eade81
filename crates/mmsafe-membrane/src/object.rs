//! Object pointers and the single-object allocator.
//!
//! An [`ObjectPtr`] is two words: the raw address and a packed
//! `tag << 32 | view << 31 | offset` word. The offset is the distance from
//! the start of the allocation, non-zero only for interior pointers
//! (address-of a field). The generation slot is found at `raw - offset - 8`.
//! The view bit survives conversion from a rebased array pointer, so a
//! token at offset 0 is still refused by `mm_free`.

#![allow(unsafe_code)]

use std::fmt;
use std::marker::PhantomData;

use crate::diagnostics::fatal;
use crate::error::{AllocError, Violation};
use crate::header;
use crate::metrics::{MembraneMetrics, global_metrics};
use crate::porting;
use crate::tag::{self, Tag};

const KEY_SHIFT: u32 = 32;
const OFFSET_MASK: u64 = 0x7FFF_FFFF;
/// Set on pointers derived from a rebased view. Views are never freeable.
const VIEW_FLAG: u64 = 1 << 31;

/// Checked pointer to a single heap object or one of its fields.
#[repr(C)]
pub struct ObjectPtr<T> {
    raw: *mut T,
    key_offset: u64,
    _marker: PhantomData<*mut T>,
}

impl<T> Clone for ObjectPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ObjectPtr<T> {}

// SAFETY: a checked pointer is an address plus metadata; every dereference
// and every slot access already requires `unsafe` at the use site.
unsafe impl<T> Send for ObjectPtr<T> {}
// SAFETY: see above.
unsafe impl<T> Sync for ObjectPtr<T> {}

impl<T> PartialEq for ObjectPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw && self.key_offset == other.key_offset
    }
}

impl<T> Eq for ObjectPtr<T> {}

impl<T> fmt::Debug for ObjectPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPtr")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("tag", &self.tag())
            .field("offset", &self.offset())
            .field("view", &self.is_view())
            .finish()
    }
}

impl<T> Default for ObjectPtr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> ObjectPtr<T> {
    /// The null checked pointer.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            raw: std::ptr::null_mut(),
            key_offset: 0,
            _marker: PhantomData,
        }
    }

    pub(crate) const fn from_parts(raw: *mut T, tag: Tag, offset: u32) -> Self {
        Self {
            raw,
            key_offset: ((tag.get() as u64) << KEY_SHIFT) | (offset as u64 & OFFSET_MASK),
            _marker: PhantomData,
        }
    }

    pub(crate) const fn into_view(self) -> Self {
        Self {
            key_offset: self.key_offset | VIEW_FLAG,
            ..self
        }
    }

    /// `into_view` when `view` is set, `self` otherwise.
    pub(crate) const fn view_if(self, view: bool) -> Self {
        if view { self.into_view() } else { self }
    }

    /// Checked pointer to stack storage. Always live, never freeable.
    #[must_use]
    pub fn from_stack(value: &mut T) -> Self {
        Self::from_parts(value, Tag::STACK, 0)
    }

    /// Checked pointer to global or static storage. Always live, never freeable.
    #[must_use]
    pub const fn from_global(raw: *mut T) -> Self {
        Self::from_parts(raw, Tag::GLOBAL, 0)
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.raw.is_null()
    }

    /// Generation tag carried by this pointer.
    #[must_use]
    pub const fn tag(&self) -> Tag {
        Tag::from_raw((self.key_offset >> KEY_SHIFT) as u32)
    }

    /// Byte distance from the start of the allocation.
    #[must_use]
    pub const fn offset(&self) -> usize {
        (self.key_offset & OFFSET_MASK) as usize
    }

    /// True for pointers derived from a rebased library result.
    #[must_use]
    pub const fn is_view(&self) -> bool {
        self.key_offset & VIEW_FLAG != 0
    }

    /// Packed `tag << 32 | view << 31 | offset` word.
    #[must_use]
    pub const fn key_offset(&self) -> u64 {
        self.key_offset
    }

    /// Raw address (the `_getptr_mm` escape hatch).
    #[must_use]
    pub const fn as_ptr(&self) -> *mut T {
        self.raw
    }

    #[must_use]
    pub fn addr(&self) -> usize {
        self.raw as usize
    }

    /// Address of the allocation's generation slot. Pure address arithmetic.
    #[must_use]
    pub fn slot(&self) -> *mut u64 {
        header::slot_of_user(self.addr().wrapping_sub(self.offset()))
    }

    /// True when this pointer names a sentinel rather than an allocation.
    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        !self.is_null() && self.tag() == Tag::FREED
    }

    /// Pointer to the field `byte_offset` bytes into the pointee, keeping
    /// the tag. The result is usable for access but is refused by `mm_free`.
    ///
    /// # Safety
    ///
    /// `byte_offset` must stay within the allocation (use `offset_of!`).
    #[must_use]
    pub unsafe fn project<U>(self, byte_offset: usize) -> ObjectPtr<U> {
        if self.is_null() {
            return ObjectPtr::null();
        }
        let raw = self.raw.cast::<u8>().wrapping_add(byte_offset).cast::<U>();
        let offset = if self.tag().is_static() {
            0
        } else {
            (self.offset() + byte_offset) as u32
        };
        ObjectPtr::from_parts(raw, self.tag(), offset).view_if(self.is_view())
    }

    /// Reinterpret the pointee type, keeping address and metadata.
    #[must_use]
    pub const fn cast<U>(self) -> ObjectPtr<U> {
        ObjectPtr {
            raw: self.raw.cast(),
            key_offset: self.key_offset,
            _marker: PhantomData,
        }
    }

    /// Validate the pointer against its generation slot.
    ///
    /// Static-region pointers always pass. Null and sentinel pointers fail.
    ///
    /// # Safety
    ///
    /// The header memory of the named allocation must still be mapped,
    /// which holds for blocks returned to the libc allocator.
    pub unsafe fn check(&self) -> Result<(), Violation> {
        let tag = self.tag();
        if tag.is_static() {
            return Ok(());
        }
        if self.is_null() || tag == Tag::FREED {
            return Err(Violation::UnownedFree {
                addr: self.addr(),
                tag: tag.get(),
            });
        }
        // SAFETY: forwarded caller contract.
        let found = unsafe { header::load_slot(self.slot()) };
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

    /// `check` as a boolean.
    ///
    /// # Safety
    ///
    /// Same contract as [`ObjectPtr::check`].
    #[must_use]
    pub unsafe fn is_live(&self) -> bool {
        // SAFETY: forwarded caller contract.
        unsafe { self.check().is_ok() }
    }
}

/// Allocate `size` bytes for one object.
///
/// Returns the null pointer if the underlying allocator fails.
#[must_use]
pub fn mm_alloc<T>(size: usize) -> ObjectPtr<T> {
    try_mm_alloc(size).unwrap_or_else(|_| {
        MembraneMetrics::inc(&global_metrics().alloc_failures);
        ObjectPtr::null()
    })
}

/// Zero-initialized variant of [`mm_alloc`].
#[must_use]
pub fn mm_single_calloc<T>(size: usize) -> ObjectPtr<T> {
    alloc_object(size, true).unwrap_or_else(|_| {
        MembraneMetrics::inc(&global_metrics().alloc_failures);
        ObjectPtr::null()
    })
}

/// Allocate `size` bytes for one object, reporting why on failure.
pub fn try_mm_alloc<T>(size: usize) -> Result<ObjectPtr<T>, AllocError> {
    alloc_object(size, false)
}

/// Allocate a `T` and move `value` into it.
#[must_use]
pub fn mm_new<T>(value: T) -> ObjectPtr<T> {
    let p = mm_alloc::<T>(std::mem::size_of::<T>());
    if !p.is_null() {
        // SAFETY: fresh allocation of size_of::<T>() bytes; malloc alignment
        // covers every T with alignment <= 16.
        unsafe { p.as_ptr().write(value) };
    }
    p
}

fn alloc_object<T>(size: usize, zeroed: bool) -> Result<ObjectPtr<T>, AllocError> {
    let tag = tag::issue();
    let slot = header::allocate_block(size, tag, zeroed)?;
    let user = header::user_of_slot(slot);
    porting::on_allocate(user);
    MembraneMetrics::inc(&global_metrics().object_allocs);
    Ok(ObjectPtr::from_parts(user as *mut T, tag, 0))
}

/// Free an object allocation. Null is a no-op.
///
/// Aborts the process with a diagnostic on an interior pointer or a view
/// (invalid free) and on a tag mismatch (double free or use after free).
///
/// # Safety
///
/// `p` must be null or derived from [`mm_alloc`]/[`mm_single_calloc`].
pub unsafe fn mm_free<T>(p: ObjectPtr<T>) {
    // SAFETY: forwarded caller contract.
    if let Err(violation) = unsafe { try_mm_free(p) } {
        fatal(violation, "mm_free");
    }
}

/// [`mm_free`] that returns the violation instead of aborting.
///
/// # Safety
///
/// Same contract as [`mm_free`].
pub unsafe fn try_mm_free<T>(p: ObjectPtr<T>) -> Result<(), Violation> {
    if p.is_null() {
        return Ok(());
    }
    let tag = p.tag();
    let result = if tag.is_reserved() {
        Err(Violation::UnownedFree {
            addr: p.addr(),
            tag: tag.get(),
        })
    } else if p.is_view() {
        Err(Violation::ViewFree { addr: p.addr() })
    } else if p.offset() != 0 {
        Err(Violation::InvalidFree {
            addr: p.addr(),
            offset: p.offset(),
        })
    } else {
        let slot = p.slot();
        // SAFETY: an owning pointer with a heap tag: the slot sits right
        // before `raw`.
        unsafe {
            match header::retire_slot(slot, tag) {
                Ok(()) => {
                    porting::on_release(p.addr());
                    header::release_block(slot);
                    Ok(())
                }
                Err(found) => Err(Violation::DoubleFreeOrUseAfterFree {
                    addr: p.addr(),
                    expected: tag.get(),
                    found,
                }),
            }
        }
    };

    match &result {
        Ok(()) => MembraneMetrics::inc(&global_metrics().frees),
        Err(v) => global_metrics().record_violation(v),
    }
    result
}
