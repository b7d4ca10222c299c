//! Deterministic Random Number Generator
//!
//! Xorshift128+ seeded through SplitMix64. Puzzle placement draws from this
//! generator so a session seed reproduces the same sequence of puzzles.

use sha2::{Digest, Sha256};

/// Deterministic PRNG using the Xorshift128+ algorithm.
///
/// Given the same seed the generator yields the same sequence on every
/// platform, which keeps restarts reproducible when a session seed is
/// configured.
#[derive(Clone, Debug)]
pub struct DeterministicRng {
    state: [u64; 2],
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeterministicRng {
    /// Create a new RNG from a 64-bit seed.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // Xorshift must never run from the all-zero state
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Generate a random integer in range [0, max).
    #[inline]
    pub fn next_int(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        (self.next_u64() % max as u64) as u32
    }

    /// Generate a random index into a collection of `len` elements.
    #[inline]
    pub fn next_index(&mut self, len: usize) -> usize {
        self.next_int(len.min(u32::MAX as usize) as u32) as usize
    }
}

/// SplitMix64 for seed initialization.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Derive the seed for one puzzle of a session.
///
/// Mixes the session seed, the puzzle generation counter and the roster in
/// turn order, so a restart with the same players still yields a new
/// puzzle while the whole run stays reproducible from the session seed.
pub fn derive_puzzle_seed(session_seed: u64, generation: u64, roster: &[String]) -> u64 {
    let mut hasher = Sha256::new();

    hasher.update(b"RDT_HUNT_PUZZLE_V1");
    hasher.update(session_seed.to_le_bytes());
    hasher.update(generation.to_le_bytes());

    for identity in roster {
        // Length prefix keeps ["ab", "c"] distinct from ["a", "bc"]
        hasher.update((identity.len() as u32).to_le_bytes());
        hasher.update(identity.as_bytes());
    }

    let hash = hasher.finalize();
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&hash[..8]);
    u64::from_le_bytes(seed)
}
