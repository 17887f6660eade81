//! # mmsafe-abi
//!
//! Checked-pointer wrappers over libc routines that return pointers into
//! their arguments.
//!
//! Each wrapper extracts raw addresses from its checked arguments, calls
//! libc, and rebases any pointer result onto the argument it points into,
//! so the result carries that allocation's tag and slot reference. Scalar
//! results pass through untouched. Wrappers that create new strings
//! allocate through the membrane and return owning pointers.
//!
//! ```text
//! caller -> wrapper (this crate) -> raw libc call -> rebase -> caller
//! ```

pub mod stdlib_abi;
pub mod string_abi;

pub use stdlib_abi::{mm_qsort_array, mm_qsort_ptrs, mm_strtod, mm_strtol, mm_strtoul};
pub use string_abi::{
    Tokenizer, mm_memchr, mm_memcpy, mm_memdup, mm_memrchr, mm_strchr, mm_strcmp, mm_strcpy,
    mm_strdup, mm_strdup_from_raw, mm_strlen, mm_strncmp, mm_strndup, mm_strpbrk, mm_strrchr,
    mm_strstr, mm_strtok, mm_strtok_r, mmize_str,
};
