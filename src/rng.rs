//! Seedable random source for non-secret values.
//!
//! Handshake randoms, session ids and ticket nonces come from here. With
//! [`Config::rng_seed`](crate::Config::rng_seed) set they become reproducible,
//! which the test suites rely on. Key material never comes from here; that
//! goes through the provider's `SecureRandom`.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

pub struct SeededRng {
    inner: Option<StdRng>,
}

impl SeededRng {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            inner: seed.map(StdRng::seed_from_u64),
        }
    }

    pub fn fill(&mut self, buf: &mut [u8]) {
        match self.inner.as_mut() {
            Some(rng) => rng.fill_bytes(buf),
            None => rand::thread_rng().fill_bytes(buf),
        }
    }

    pub fn bytes<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        self.fill(&mut out);
        out
    }

    pub fn next_u32(&mut self) -> u32 {
        u32::from_be_bytes(self.bytes())
    }
}

impl std::fmt::Debug for SeededRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeededRng")
            .field("seeded", &self.inner.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_rng_is_deterministic() {
        let mut rng1 = SeededRng::new(Some(12345));
        let mut rng2 = SeededRng::new(Some(12345));
        let a: [u8; 32] = rng1.bytes();
        let b: [u8; 32] = rng2.bytes();
        assert_eq!(a, b);
        assert_eq!(rng1.next_u32(), rng2.next_u32());
    }

    #[test]
    fn different_seeds_produce_different_values() {
        let mut rng1 = SeededRng::new(Some(12345));
        let mut rng2 = SeededRng::new(Some(54321));
        assert_ne!(rng1.bytes::<16>(), rng2.bytes::<16>());
    }
}
