//! Bin value generation.

use std::sync::Mutex;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Produces the value written for each key.
pub trait ValueGenerator: Send + Sync + 'static {
    fn generate(&self, len: usize) -> String;
}

/// Random ASCII letters. Unseeded instances draw from the thread-local RNG;
/// seeded instances share one deterministic RNG.
#[derive(Debug, Default)]
pub struct RandomLetters {
    seeded: Option<Mutex<SmallRng>>,
}

impl RandomLetters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            seeded: Some(Mutex::new(SmallRng::seed_from_u64(seed))),
        }
    }
}

impl ValueGenerator for RandomLetters {
    fn generate(&self, len: usize) -> String {
        if let Some(rng) = &self.seeded {
            // A poisoned lock only means another task panicked mid-draw.
            let mut rng = rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            return letters(&mut *rng, len);
        }
        letters(&mut rand::thread_rng(), len)
    }
}

fn letters<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| LETTERS[rng.gen_range(0..LETTERS.len())] as char)
        .collect()
}

/// Repeats one character; handy when tests need to predict the payload.
#[derive(Clone, Copy, Debug)]
pub struct Repeated(pub char);

impl ValueGenerator for Repeated {
    fn generate(&self, len: usize) -> String {
        std::iter::repeat(self.0).take(len).collect()
    }
}
