use mmsafe_membrane::{
    ArrayPtr, ObjectPtr, Violation, mm_alloc, mm_array_alloc, try_mm_array_free,
    try_mm_array_realloc, try_mm_free,
};
use serde_json::json;

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_range_usize(&mut self, low: usize, high_inclusive: usize) -> usize {
        assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

#[derive(Clone, Copy, Debug)]
enum Slot {
    Empty,
    Object(ObjectPtr<u8>, usize),
    Array(ArrayPtr<u8>, usize),
}

#[derive(Debug, Default)]
struct Tally {
    allocs: u64,
    frees: u64,
    double_frees_detected: u64,
    interior_frees_refused: u64,
    reallocs: u64,
}

#[test]
fn deterministic_allocator_sequences_hold_core_invariants() {
    // Bounded and deterministic: invariant pressure, not a fuzz campaign.
    const SEEDS: [u64; 4] = [1, 2, 3, 4];
    const STEPS: usize = 2_000;
    const SLOTS: usize = 32;

    for seed in SEEDS {
        let mut rng = XorShift64::new(seed);
        let mut slots = [Slot::Empty; SLOTS];
        let mut tally = Tally::default();

        for step in 0..STEPS {
            let op = rng.gen_range_usize(0, 99);
            let idx = rng.gen_range_usize(0, SLOTS - 1);

            // SAFETY: every pointer in `slots` is live; freed pointers are
            // only inspected immediately after their free.
            unsafe {
                match (op, slots[idx]) {
                    (0..=39, Slot::Empty) => {
                        let size = rng.gen_range_usize(1, 1000);
                        slots[idx] = if rng.next_u64() & 1 == 0 {
                            let p = mm_alloc::<u8>(size);
                            assert!(!p.is_null(), "seed={seed} step={step}: alloc");
                            p.as_ptr().write(idx as u8);
                            Slot::Object(p, size)
                        } else {
                            let p = mm_array_alloc::<u8>(size);
                            assert!(!p.is_null(), "seed={seed} step={step}: array alloc");
                            p.set(size - 1, idx as u8);
                            Slot::Array(p, size)
                        };
                        tally.allocs += 1;
                    }
                    (40..=69, Slot::Object(p, _)) => {
                        assert!(p.is_live(), "seed={seed} step={step}: object must be live");
                        assert_eq!(*p.as_ptr(), idx as u8, "seed={seed} step={step}: contents");
                    }
                    (40..=69, Slot::Array(p, size)) => {
                        assert!(p.is_live(), "seed={seed} step={step}: array must be live");
                        assert_eq!(p.get(size - 1), idx as u8, "seed={seed} step={step}: contents");
                        let k = rng.gen_range_usize(0, size - 1) as isize;
                        let q = p.offset(k).offset(-k);
                        assert_eq!(q, p, "seed={seed} step={step}: arithmetic round trip");
                    }
                    (70..=79, Slot::Array(p, size)) => {
                        let new_size = rng.gen_range_usize(1, 1000);
                        let q = try_mm_array_realloc(p, new_size)
                            .unwrap_or_else(|v| panic!("seed={seed} step={step}: realloc {v}"));
                        assert!(!q.is_null(), "seed={seed} step={step}: realloc result");
                        if q.lock() == p.lock() {
                            assert_eq!(q.tag(), p.tag(), "seed={seed} step={step}: in place");
                        } else {
                            assert_ne!(q.tag(), p.tag(), "seed={seed} step={step}: moved");
                        }
                        let kept = size.min(new_size);
                        if kept == size {
                            assert_eq!(q.get(size - 1), idx as u8);
                        }
                        q.set(new_size - 1, idx as u8);
                        slots[idx] = Slot::Array(q, new_size);
                        tally.reallocs += 1;
                    }
                    (80..=89, Slot::Array(p, size)) if size > 1 => {
                        let interior = p.add(size / 2);
                        assert!(
                            matches!(try_mm_array_free(interior), Err(Violation::InvalidFree { .. })),
                            "seed={seed} step={step}: interior array free must be refused"
                        );
                        tally.interior_frees_refused += 1;
                    }
                    (80..=89, Slot::Object(p, size)) if size > 1 => {
                        let field: ObjectPtr<u8> = p.project(size / 2);
                        assert!(
                            matches!(try_mm_free(field), Err(Violation::InvalidFree { .. })),
                            "seed={seed} step={step}: interior object free must be refused"
                        );
                        tally.interior_frees_refused += 1;
                    }
                    (90..=99, Slot::Object(p, _)) => {
                        try_mm_free(p)
                            .unwrap_or_else(|v| panic!("seed={seed} step={step}: free {v}"));
                        assert!(
                            matches!(
                                try_mm_free(p),
                                Err(Violation::DoubleFreeOrUseAfterFree { .. })
                            ),
                            "seed={seed} step={step}: second free must be detected"
                        );
                        slots[idx] = Slot::Empty;
                        tally.frees += 1;
                        tally.double_frees_detected += 1;
                    }
                    (90..=99, Slot::Array(p, _)) => {
                        try_mm_array_free(p)
                            .unwrap_or_else(|v| panic!("seed={seed} step={step}: free {v}"));
                        assert!(
                            matches!(
                                try_mm_array_free(p),
                                Err(Violation::DoubleFreeOrUseAfterFree { .. })
                            ),
                            "seed={seed} step={step}: second free must be detected"
                        );
                        slots[idx] = Slot::Empty;
                        tally.frees += 1;
                        tally.double_frees_detected += 1;
                    }
                    _ => {}
                }
            }
        }

        // SAFETY: whatever is left is live.
        unsafe {
            for slot in slots {
                match slot {
                    Slot::Object(p, _) => try_mm_free(p).expect("drain object"),
                    Slot::Array(p, _) => try_mm_array_free(p).expect("drain array"),
                    Slot::Empty => {}
                }
            }
        }

        assert_eq!(tally.frees, tally.double_frees_detected);
        let report = json!({
            "seed": seed,
            "steps": STEPS,
            "allocs": tally.allocs,
            "frees": tally.frees,
            "reallocs": tally.reallocs,
            "interior_frees_refused": tally.interior_frees_refused,
            "double_frees_detected": tally.double_frees_detected,
        });
        assert!(report["allocs"].as_u64().unwrap_or(0) > 0, "{report}");
        eprintln!("{report}");
    }
}
