//! Object <-> array pointer conversion.
//!
//! Both directions are lossless for heap pointers: the slot reference is
//! `raw - offset - 8`, and the offset is the distance from the slot's first
//! element. The view bit travels with the pointer either way.

use crate::array::ArrayPtr;
use crate::object::ObjectPtr;

impl<T> ObjectPtr<T> {
    /// Array pointer naming the same address, tag and allocation.
    #[must_use]
    pub fn into_array(self) -> ArrayPtr<T> {
        if self.is_null() {
            return ArrayPtr::null();
        }
        let tag = self.tag();
        let lock = if tag.is_reserved() {
            std::ptr::null_mut()
        } else {
            self.slot()
        };
        ArrayPtr::from_parts(self.as_ptr(), tag, lock).view_if(self.is_view())
    }
}

impl<T> ArrayPtr<T> {
    /// Object pointer naming the same address, with the offset taken from
    /// the distance to the first element.
    #[must_use]
    pub fn into_object(self) -> ObjectPtr<T> {
        if self.is_null() {
            return ObjectPtr::null();
        }
        let tag = self.tag();
        let offset = if tag.is_reserved() {
            0
        } else {
            self.byte_offset() as u32
        };
        ObjectPtr::from_parts(self.as_ptr(), tag, offset).view_if(self.is_view())
    }
}

/// `_MM_ptr` to `_MM_array_ptr`.
#[must_use]
pub fn mmptr_to_mmarrayptr<T>(p: ObjectPtr<T>) -> ArrayPtr<T> {
    p.into_array()
}

/// `_MM_array_ptr` to `_MM_ptr`.
#[must_use]
pub fn mmarrayptr_to_mmptr<T>(p: ArrayPtr<T>) -> ObjectPtr<T> {
    p.into_object()
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use crate::array::{mm_array_alloc_n, try_mm_array_free};
    use crate::error::Violation;
    use crate::object::{mm_alloc, try_mm_free};
    use crate::tag::Tag;

    #[test]
    fn object_to_array_derives_slot_reference() {
        let p = mm_alloc::<u64>(32);
        let a = mmptr_to_mmarrayptr(p);
        assert_eq!(a.addr(), p.addr());
        assert_eq!(a.tag(), p.tag());
        assert_eq!(a.lock(), p.slot());
        // SAFETY: the allocation is live; an array free of the first element
        // releases it.
        unsafe {
            assert!(a.is_live());
            try_mm_array_free(a).unwrap();
            assert!(!p.is_live());
        }
    }

    #[test]
    fn array_element_to_object_derives_offset() {
        let a = mm_array_alloc_n::<u32>(8);
        let o = mmarrayptr_to_mmptr(a.add(3));
        assert_eq!(o.offset(), 12);
        assert_eq!(o.slot(), a.lock());
        assert_eq!(mmptr_to_mmarrayptr(o), a.add(3));
        // SAFETY: o is interior and refused; a frees once.
        unsafe {
            assert!(try_mm_free(o).is_err());
            assert!(try_mm_free(mmarrayptr_to_mmptr(a)).is_ok());
        }
    }

    #[test]
    fn converted_views_stay_unfreeable() {
        let a = mm_array_alloc_n::<u8>(16);
        let view = a.into_view();
        let o = mmarrayptr_to_mmptr(view);
        assert!(o.is_view());
        assert_eq!(o.offset(), 0);
        assert_eq!(mmptr_to_mmarrayptr(o), view);
        // SAFETY: a is live until the final free.
        unsafe {
            assert!(o.is_live());
            assert_eq!(try_mm_free(o), Err(Violation::ViewFree { addr: a.addr() }));
            assert!(matches!(
                try_mm_array_free(mmptr_to_mmarrayptr(o)),
                Err(Violation::ViewFree { .. })
            ));
            assert!(a.is_live());
            try_mm_array_free(a).unwrap();
        }
    }

    #[test]
    fn static_and_null_pointers_convert_without_slots() {
        let mut x = 3u16;
        let o = ObjectPtr::from_stack(&mut x);
        let a = o.into_array();
        assert_eq!(a.tag(), Tag::STACK);
        assert!(a.lock().is_null());
        assert_eq!(a.into_object(), o);
        assert!(ObjectPtr::<u8>::null().into_array().is_null());
        assert!(ArrayPtr::<u8>::null().into_object().is_null());
    }
}
