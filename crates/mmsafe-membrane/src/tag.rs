//! Generation tag issuance.
//!
//! A tag identifies one generation of one allocation. The value is written
//! into the allocation's generation slot and carried by every checked pointer
//! derived from it. Values 0, 1 and 2 are reserved and never issued for heap
//! allocations.

#![allow(unsafe_code)]

use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use serde::Serialize;

use crate::config::{TagSource, tag_source};

/// Number of RDRAND attempts before falling back to the software generator.
const RDRAND_RETRIES: usize = 10;

/// Generation tag stored in a slot and carried by checked pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Tag(u32);

impl Tag {
    /// Slot value of a freed allocation; also the tag of sentinel pointers.
    pub const FREED: Self = Self(0);
    /// Pointers into stack storage.
    pub const STACK: Self = Self(1);
    /// Pointers into global or static storage.
    pub const GLOBAL: Self = Self(2);
    /// Smallest tag a heap allocation may receive.
    pub const FIRST_HEAP: Self = Self(3);

    /// Wrap a raw tag value.
    #[must_use]
    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    /// Raw tag value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// True for 0, 1 and 2.
    #[must_use]
    pub const fn is_reserved(self) -> bool {
        self.0 < Self::FIRST_HEAP.0
    }

    /// True for the stack and global region tags.
    #[must_use]
    pub const fn is_static(self) -> bool {
        self.0 == Self::STACK.0 || self.0 == Self::GLOBAL.0
    }

    /// Value as stored in a generation slot.
    #[must_use]
    pub const fn slot_value(self) -> u64 {
        self.0 as u64
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Thread-safe tag generator.
pub struct TagGenerator {
    source: TagSource,
    /// Next counter tag.
    counter: AtomicU32,
    /// Last tag issued by the random source, rejected on the next draw.
    last_random: AtomicU32,
    /// xorshift64* state used when RDRAND is unavailable. 0 = unseeded.
    fallback_state: AtomicU64,
}

impl TagGenerator {
    /// Create a generator using the given strategy.
    #[must_use]
    pub const fn new(source: TagSource) -> Self {
        Self {
            source,
            counter: AtomicU32::new(Tag::FIRST_HEAP.0),
            last_random: AtomicU32::new(Tag::FREED.0),
            fallback_state: AtomicU64::new(0),
        }
    }

    /// Strategy this generator was built with.
    #[must_use]
    pub const fn source(&self) -> TagSource {
        self.source
    }

    /// Issue a fresh tag. Never returns a reserved value.
    pub fn issue(&self) -> Tag {
        match self.source {
            TagSource::Counter => self.next_counter(),
            TagSource::Random => self.next_random(),
        }
    }

    fn next_counter(&self) -> Tag {
        // Wraps back to FIRST_HEAP after u32::MAX so reserved values stay unissued.
        let issued = match self.counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
            Some(if v == u32::MAX {
                Tag::FIRST_HEAP.0
            } else {
                v + 1
            })
        }) {
            Ok(prev) | Err(prev) => prev,
        };
        Tag(issued)
    }

    fn next_random(&self) -> Tag {
        loop {
            let candidate = Tag(self.draw());
            if candidate.is_reserved() {
                continue;
            }
            let last = self.last_random.swap(candidate.0, Ordering::Relaxed);
            if last == candidate.0 {
                continue;
            }
            return candidate;
        }
    }

    fn draw(&self) -> u32 {
        if let Some(v) = rdrand32() {
            return v;
        }
        self.software_draw()
    }

    fn software_draw(&self) -> u32 {
        let mut state = self.fallback_state.load(Ordering::Relaxed);
        if state == 0 {
            let seed = entropy_seed() | 1;
            state = match self.fallback_state.compare_exchange(
                0,
                seed,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => seed,
                Err(current) => current,
            };
        }
        loop {
            let mut x = state;
            x ^= x >> 12;
            x ^= x << 25;
            x ^= x >> 27;
            match self.fallback_state.compare_exchange_weak(
                state,
                x,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return (x.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 32) as u32,
                Err(current) => state = current,
            }
        }
    }
}

#[cfg(target_arch = "x86_64")]
fn rdrand32() -> Option<u32> {
    if !std::arch::is_x86_feature_detected!("rdrand") {
        return None;
    }
    let mut out = 0u32;
    for _ in 0..RDRAND_RETRIES {
        // SAFETY: the rdrand feature was detected above.
        if unsafe { std::arch::x86_64::_rdrand32_step(&mut out) } == 1 {
            return Some(out);
        }
    }
    None
}

#[cfg(not(target_arch = "x86_64"))]
fn rdrand32() -> Option<u32> {
    let _ = RDRAND_RETRIES;
    None
}

/// One-time seed for the software generator.
fn entropy_seed() -> u64 {
    #[cfg(target_os = "linux")]
    {
        let mut buf = [0u8; 8];
        // SAFETY: buf is valid for 8 writable bytes.
        let got = unsafe { libc::getrandom(buf.as_mut_ptr().cast(), buf.len(), 0) };
        if got == buf.len() as isize {
            return u64::from_le_bytes(buf);
        }
    }
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x9E37_79B9_7F4A_7C15);
    nanos ^ (std::process::id() as u64).rotate_left(32)
}

/// Process-wide generator, strategy taken from `MMSAFE_TAG_SOURCE`.
pub fn global_generator() -> &'static TagGenerator {
    static GENERATOR: OnceLock<TagGenerator> = OnceLock::new();
    GENERATOR.get_or_init(|| TagGenerator::new(tag_source()))
}

/// Issue a tag from the process-wide generator.
pub fn issue() -> Tag {
    global_generator().issue()
}
