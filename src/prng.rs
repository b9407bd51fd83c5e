//! prng.rs
//!
//! 8-bit xorshift generator used for random-mode stimulation patterns.
//! Not cryptographically secure; it only needs to vary the pattern.

/// Replaces a zero seed, which is a fixed point of xorshift.
const NONZERO_SEED: u8 = 0x5A;

#[derive(Debug, Clone)]
pub struct PseudoRandomSource {
    state: u8,
}

impl PseudoRandomSource {
    /// Seed from a weakly random runtime value, e.g. a free-running counter.
    pub fn new(seed: u8) -> Self {
        PseudoRandomSource {
            state: if seed == 0 { NONZERO_SEED } else { seed },
        }
    }

    /// Convenience for seeding from a wide counter: the counter modulo 255.
    pub fn from_counter(counter: u32) -> Self {
        PseudoRandomSource::new((counter % 255) as u8)
    }

    pub fn next(&mut self) -> u8 {
        let mut x = self.state;
        x ^= x << 7;
        x ^= x >> 5;
        x ^= x << 3;
        self.state = x;
        x
    }
}
