//! Simple random number generator for reproducibility.
//!
//! This module provides a lightweight xorshift-based PRNG so that weight
//! initialization, dropout masks and distortions are reproducible from `SEED`.

/// Xorshift generator. Identical seeds give identical streams.
#[derive(Debug, Clone)]
pub struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    /// Create a new RNG with explicit seed (if zero, use a fixed value).
    pub fn new(seed: u64) -> Self {
        let state = if seed == 0 { 0x9e3779b97f4a7c15 } else { seed };
        Self { state }
    }

    /// Independent stream for the stochastic layer at `position`.
    ///
    /// Mixes the position into the seed so that two dropout layers in the same
    /// network never share a mask sequence.
    pub fn for_layer(seed: u64, position: usize) -> Self {
        let mixed = seed ^ (position as u64 + 1).wrapping_mul(0x9e3779b97f4a7c15);
        let mut rng = Self::new(mixed);
        // Discard the first outputs; nearby seeds start out correlated.
        for _ in 0..4 {
            rng.next_u32();
        }
        rng
    }

    /// Basic xorshift to generate u32.
    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        (x >> 32) as u32
    }

    /// Convert to [0, 1).
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u32() >> 8) as f32 / (1u32 << 24) as f32
    }

    /// Uniform sample in [low, high).
    pub fn gen_range_f32(&mut self, low: f32, high: f32) -> f32 {
        low + (high - low) * self.next_f32()
    }

    /// Integer sample in [0, upper).
    pub fn gen_usize(&mut self, upper: usize) -> usize {
        if upper == 0 {
            0
        } else {
            (self.next_u32() as usize) % upper
        }
    }
}
