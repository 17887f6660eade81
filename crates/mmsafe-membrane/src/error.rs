//! Error types.
//!
//! `AllocError` is recoverable: public allocators turn it into a null
//! pointer. `Violation` is a temporal-safety bug in the caller; the
//! non-`try_` entry points hand it to `diagnostics::fatal`.

use serde::Serialize;
use thiserror::Error;

/// Why an allocation could not be serviced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// Request exceeds the largest size whose offsets fit a pointer's offset field.
    #[error("allocation of {requested} bytes exceeds the {max}-byte limit")]
    TooLarge { requested: usize, max: usize },
    /// `nmemb * size` overflowed.
    #[error("allocation size overflowed ({nmemb} x {size})")]
    Overflow { nmemb: usize, size: usize },
    /// The underlying allocator returned null.
    #[error("underlying allocator returned null for {bytes} bytes")]
    OutOfMemory { bytes: usize },
}

/// Temporal safety violation detected at a free or realloc checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// Free of a pointer that is not the start of its allocation.
    #[error("invalid free: pointer {addr:#x} is {offset} bytes into its allocation")]
    InvalidFree { addr: usize, offset: usize },
    /// Free of a pointer that does not name a heap allocation at all
    /// (stack/global region pointer or sentinel).
    #[error("invalid free: pointer {addr:#x} with tag {tag} does not name a heap allocation")]
    UnownedFree { addr: usize, tag: u32 },
    /// Free of a pointer rebased from a library result (a token, a match).
    #[error("invalid free: pointer {addr:#x} is a non-owning view into its allocation")]
    ViewFree { addr: usize },
    /// The pointer's tag no longer matches the allocation's generation slot.
    #[error(
        "double free or use after free: pointer {addr:#x} carries tag {expected:#x} but the allocation holds {found:#x}"
    )]
    DoubleFreeOrUseAfterFree { addr: usize, expected: u32, found: u64 },
}

impl Violation {
    /// Stable short name; equals the `kind` field of the serialized form.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::InvalidFree { .. } => "invalid_free",
            Self::UnownedFree { .. } => "unowned_free",
            Self::ViewFree { .. } => "view_free",
            Self::DoubleFreeOrUseAfterFree { .. } => "double_free_or_use_after_free",
        }
    }

    /// Address of the offending pointer.
    #[must_use]
    pub const fn addr(&self) -> usize {
        match *self {
            Self::InvalidFree { addr, .. }
            | Self::UnownedFree { addr, .. }
            | Self::ViewFree { addr }
            | Self::DoubleFreeOrUseAfterFree { addr, .. } => addr,
        }
    }

    /// True for every variant except the tag mismatch.
    #[must_use]
    pub const fn is_invalid_free(&self) -> bool {
        matches!(
            self,
            Self::InvalidFree { .. } | Self::UnownedFree { .. } | Self::ViewFree { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_violation() {
        let v = Violation::InvalidFree {
            addr: 0x1008,
            offset: 8,
        };
        assert!(v.to_string().starts_with("invalid free"));

        let v = Violation::DoubleFreeOrUseAfterFree {
            addr: 0x2000,
            expected: 7,
            found: 0,
        };
        assert!(v.to_string().starts_with("double free or use after free"));
        assert_eq!(v.name(), "double_free_or_use_after_free");
        assert_eq!(v.addr(), 0x2000);
    }

    #[test]
    fn violation_serializes_with_kind_tag() {
        let v = Violation::UnownedFree { addr: 16, tag: 1 };
        let json = serde_json::to_value(v).unwrap();
        assert_eq!(json["kind"], "unowned_free");
        assert_eq!(json["tag"], 1);
    }

    #[test]
    fn name_matches_serialized_kind() {
        let all = [
            Violation::InvalidFree { addr: 8, offset: 4 },
            Violation::UnownedFree { addr: 8, tag: 2 },
            Violation::ViewFree { addr: 8 },
            Violation::DoubleFreeOrUseAfterFree {
                addr: 8,
                expected: 3,
                found: 0,
            },
        ];
        for v in all {
            let json = serde_json::to_value(v).unwrap();
            assert_eq!(json["kind"], v.name());
        }
    }

    #[test]
    fn alloc_error_display() {
        let e = AllocError::Overflow {
            nmemb: usize::MAX,
            size: 2,
        };
        assert!(e.to_string().contains("overflowed"));
    }
}
