//! Temporal safety membrane for checked C-style pointers.
//!
//! This crate supplies the pointer representation and the allocator
//! primitives that an external checker wires dereference-time checks into.
//! Every heap allocation carries a 16-byte header whose second word is the
//! *generation slot*; every checked pointer carries the tag that was written
//! into that slot when the allocation was made. Freeing compares the two, so
//! double frees and frees through stale pointers are caught, and interior
//! pointers are refused.
//!
//! # Architecture
//!
//! - **Tag generator** (`tag`): issues 32-bit generation tags, never 0/1/2
//! - **Allocation header** (`header`): `[u64 size | u64 generation]` before the user region
//! - **Object pointers** (`object`): `{raw, tag << 32 | offset}`, single-object allocations
//! - **Array pointers** (`array`): `{raw, tag, slot-ref}`, arithmetic and realloc
//! - **Conversions** (`convert`): object <-> array pointer interchange
//! - **Rebasing** (`rebase`): sentinel construction and re-tagging of raw
//!   addresses returned by uninstrumented code
//! - **Porting registry** (`porting`): optional raw-address set for half-ported code
//! - **Diagnostics** (`diagnostics`): fatal violation reporting
//! - **Configuration** (`config`): environment-driven runtime knobs
//! - **Metrics** (`metrics`): atomic counters for observability

#![deny(unsafe_code)]

pub mod array;
pub mod config;
pub mod convert;
pub mod diagnostics;
pub mod error;
pub mod header;
pub mod metrics;
pub mod object;
pub mod porting;
pub mod rebase;
pub mod tag;

pub use array::{
    ArrayPtr, mm_array_alloc, mm_array_alloc_n, mm_array_free, mm_array_realloc, mm_calloc,
    try_mm_array_alloc, try_mm_array_free, try_mm_array_realloc,
};
pub use config::{DiagnosticFormat, TagSource};
pub use convert::{mmarrayptr_to_mmptr, mmptr_to_mmarrayptr};
pub use error::{AllocError, Violation};
pub use metrics::{MembraneMetrics, MetricsSnapshot, global_metrics};
pub use object::{
    ObjectPtr, mm_alloc, mm_free, mm_new, mm_single_calloc, try_mm_alloc, try_mm_free,
};
pub use porting::{
    PortingRegistry, erase_mmsafe_ptr, insert_mmsafe_ptr, is_an_mmsafe_ptr, uncertain_free,
};
pub use rebase::{
    create_invalid_mm_array_ptr, create_invalid_mm_ptr, marshal_shared_array_ptr, rebase,
    rebase_object, set_raw_address,
};
pub use tag::{Tag, TagGenerator};
