//! Allocation header placed immediately before the user region.
//!
//! Every membrane-managed heap block is laid out as:
//!
//! ```text
//! base            base+8               base+16
//! | u64 user size | u64 generation slot | user bytes ...
//! ```
//!
//! The header is 16 bytes so the user region keeps the underlying
//! allocator's 16-byte alignment. The generation slot holds the tag that is
//! currently valid for the block, or 0 once the block is freed. Its address
//! is the only source of truth for liveness.

#![allow(unsafe_code)]

use std::mem::offset_of;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::AllocError;
use crate::tag::Tag;

/// Bytes reserved before every user region.
pub const HEADER_SIZE: usize = std::mem::size_of::<AllocationHeader>();

/// Distance from the generation slot to the first user byte.
pub const SLOT_TO_USER: usize = HEADER_SIZE - offset_of!(AllocationHeader, generation);

/// Largest user size whose interior offsets still fit an object pointer's
/// 31-bit offset field.
pub const MAX_USER_SIZE: usize = (1 << 31) - 1 - HEADER_SIZE;

/// In-memory header layout.
#[repr(C)]
pub struct AllocationHeader {
    /// User-requested size in bytes.
    size: u64,
    /// Generation slot.
    generation: AtomicU64,
}

const _: () = assert!(HEADER_SIZE == 16);
const _: () = assert!(SLOT_TO_USER == 8);

/// Allocate a header plus `user_size` bytes and stamp `tag` into the slot.
///
/// Returns the address of the generation slot; the user region starts
/// `SLOT_TO_USER` bytes later.
pub(crate) fn allocate_block(user_size: usize, tag: Tag, zeroed: bool) -> Result<*mut u64, AllocError> {
    if user_size > MAX_USER_SIZE {
        return Err(AllocError::TooLarge {
            requested: user_size,
            max: MAX_USER_SIZE,
        });
    }
    let total = user_size + HEADER_SIZE;

    // SAFETY: plain libc allocation; a null result is handled below.
    let raw = unsafe {
        if zeroed {
            libc::calloc(1, total)
        } else {
            libc::malloc(total)
        }
    };
    if raw.is_null() {
        return Err(AllocError::OutOfMemory { bytes: total });
    }

    let header = raw.cast::<AllocationHeader>();
    // SAFETY: raw is valid for `total >= HEADER_SIZE` bytes and malloc
    // alignment satisfies the header's 8-byte alignment.
    unsafe {
        header.write(AllocationHeader {
            size: user_size as u64,
            generation: AtomicU64::new(tag.slot_value()),
        });
        Ok(slot_ptr(header))
    }
}

/// Resize the block owning `slot` through `realloc`.
///
/// Returns the (possibly moved) slot address, or `None` if the underlying
/// call failed, in which case the original block is untouched. The caller
/// owns every slot write around this call.
///
/// # Safety
///
/// `slot` must be the generation slot of a live block from [`allocate_block`].
pub(crate) unsafe fn resize_block(slot: *mut u64, user_size: usize) -> Option<*mut u64> {
    let total = user_size.checked_add(HEADER_SIZE)?;
    // SAFETY: the caller guarantees `slot` belongs to a block we allocated.
    unsafe {
        let header = header_of(slot);
        let moved = libc::realloc(header.cast(), total).cast::<AllocationHeader>();
        if moved.is_null() {
            return None;
        }
        (*moved).size = user_size as u64;
        Some(slot_ptr(moved))
    }
}

/// Return the block owning `slot` to the underlying allocator.
///
/// # Safety
///
/// `slot` must be the generation slot of a block from [`allocate_block`]
/// that has not been released yet.
pub(crate) unsafe fn release_block(slot: *mut u64) {
    // SAFETY: forwarded caller contract.
    unsafe { libc::free(header_of(slot).cast()) }
}

/// Read the generation slot.
///
/// # Safety
///
/// `slot` must point at a generation slot whose memory is still mapped.
pub unsafe fn load_slot(slot: *const u64) -> u64 {
    // SAFETY: AtomicU64 has the same layout as u64; caller guarantees validity.
    unsafe { (*slot.cast::<AtomicU64>()).load(Ordering::Acquire) }
}

/// Overwrite the generation slot.
///
/// # Safety
///
/// `slot` must point at a writable generation slot.
pub(crate) unsafe fn store_slot(slot: *mut u64, value: u64) {
    // SAFETY: see `load_slot`.
    unsafe { (*slot.cast::<AtomicU64>()).store(value, Ordering::Release) }
}

/// Atomically replace `expected` with 0 in the slot.
///
/// On mismatch returns the value actually found. Two racing frees of one
/// allocation therefore yield exactly one success.
///
/// # Safety
///
/// `slot` must point at a writable generation slot.
pub(crate) unsafe fn retire_slot(slot: *mut u64, expected: Tag) -> Result<(), u64> {
    // SAFETY: see `load_slot`.
    unsafe {
        (*slot.cast::<AtomicU64>())
            .compare_exchange(
                expected.slot_value(),
                Tag::FREED.slot_value(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
    }
}

/// User-requested size recorded in the header.
///
/// # Safety
///
/// `slot` must be the generation slot of a block that is still allocated.
pub unsafe fn allocation_size(slot: *const u64) -> usize {
    // SAFETY: caller guarantees the header is mapped.
    unsafe { (*header_of(slot.cast_mut())).size as usize }
}

/// First user byte for a slot address. Pure address arithmetic.
#[must_use]
pub fn user_of_slot(slot: *const u64) -> usize {
    (slot as usize).wrapping_add(SLOT_TO_USER)
}

/// Slot address for a first-user-byte address. Pure address arithmetic.
#[must_use]
pub fn slot_of_user(user: usize) -> *mut u64 {
    user.wrapping_sub(SLOT_TO_USER) as *mut u64
}

fn header_of(slot: *mut u64) -> *mut AllocationHeader {
    slot.cast::<u8>()
        .wrapping_sub(offset_of!(AllocationHeader, generation))
        .cast()
}

/// # Safety
///
/// `header` must point at a valid header.
unsafe fn slot_ptr(header: *mut AllocationHeader) -> *mut u64 {
    // SAFETY: caller guarantees `header` is valid; no reference is created.
    unsafe { (&raw mut (*header).generation).cast() }
}
