use std::ffi::c_void;

use mmsafe_membrane::porting::global_registry;
use mmsafe_membrane::{
    erase_mmsafe_ptr, insert_mmsafe_ptr, is_an_mmsafe_ptr, mm_array_alloc, mm_new,
    try_mm_array_free, uncertain_free,
};

#[test]
fn registry_routes_raw_frees_to_the_right_allocator() {
    global_registry().enable();

    let checked = mm_array_alloc::<u8>(32);
    let object = mm_new(11u64);
    let raw_checked = checked.as_ptr().cast::<c_void>();
    assert!(is_an_mmsafe_ptr(raw_checked));
    assert!(is_an_mmsafe_ptr(object.as_ptr().cast::<c_void>()));

    // SAFETY: each address is released exactly once through its own route.
    unsafe {
        let plain = libc::malloc(32);
        assert!(!is_an_mmsafe_ptr(plain));
        uncertain_free(plain);

        uncertain_free(raw_checked);
        assert!(!is_an_mmsafe_ptr(raw_checked));
        assert!(!checked.is_live(), "raw free must retire the checked pointer");

        try_mm_array_free(object.into_array()).expect("checked free untracks too");
        assert!(!is_an_mmsafe_ptr(object.as_ptr().cast::<c_void>()));
    }
}

#[test]
fn manual_registration_round_trip() {
    let marker = 0x1000usize as *const c_void;
    insert_mmsafe_ptr(marker);
    assert!(is_an_mmsafe_ptr(marker));
    erase_mmsafe_ptr(marker);
    assert!(!is_an_mmsafe_ptr(marker));
}
