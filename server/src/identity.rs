//! Random 64-bit identifiers for connections and lobbies.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Hands out non-zero ids that are not yet taken in some registry.
///
/// The generator is seeded once when the allocator is built and then reused
/// for every id, so bursts of allocations draw from one stream.
pub struct IdAllocator {
    rng: StdRng,
}

impl IdAllocator {
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic allocator for tests.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Draws until the value is non-zero and `taken` reports it free.
    pub fn allocate(&mut self, taken: impl Fn(u64) -> bool) -> u64 {
        loop {
            let id: u64 = self.rng.gen();
            if id != 0 && !taken(id) {
                return id;
            }
        }
    }

    /// The underlying generator, shared with other per-process randomness
    /// such as credential shuffling.
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}
