//! Deterministic pseudo-random number generator.
//!
//! A small xorshift64 generator used for steal-target selection. Given the
//! same seed the sequence is always identical, which keeps scheduler tests
//! reproducible. Not cryptographically secure.

/// A deterministic xorshift64 PRNG.
#[derive(Debug, Clone)]
pub struct DetRng {
    state: u64,
}

impl DetRng {
    /// Creates a new PRNG with the given seed. A zero seed is replaced
    /// with 1 (xorshift has a fixed point at zero).
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    /// Generates the next pseudo-random u64 value.
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Generates a pseudo-random usize in the range `[0, bound)`.
    ///
    /// # Panics
    ///
    /// Panics if `bound` is zero.
    #[allow(clippy::cast_possible_truncation)]
    pub fn next_usize(&mut self, bound: usize) -> usize {
        assert!(bound > 0, "bound must be non-zero");
        (self.next_u64() as usize) % bound
    }
}
