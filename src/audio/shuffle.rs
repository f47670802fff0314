use rand::{rngs::OsRng, Rng};

/// Fuente de enteros uniformes en `[0, bound)`.
pub trait RandomSource: Send + Sync {
    fn next_below(&self, bound: usize) -> usize;
}

/// Generador criptográficamente seguro respaldado por el sistema operativo.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecureRandom;

impl RandomSource for SecureRandom {
    fn next_below(&self, bound: usize) -> usize {
        if bound <= 1 {
            return 0;
        }
        OsRng.gen_range(0..bound)
    }
}

/// Permutación uniforme in situ (Fisher–Yates)
pub fn shuffle<T>(items: &mut [T], rng: &dyn RandomSource) {
    for i in (1..items.len()).rev() {
        let j = rng.next_below(i + 1);
        items.swap(i, j);
    }
}
