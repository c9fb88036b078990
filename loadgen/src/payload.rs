//! Random text payloads for write operations.

use bytes::Bytes;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Symbols payloads are drawn from.
///
/// Newlines appear twice, so text has lines of roughly 27 characters on average.
const ALPHABET: &[u8] = b"\nabcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ\n";

/// Generates fresh payloads of a fixed size.
///
/// Every call to [`generate`](Self::generate) produces new contents, nothing is cached between
/// calls. The contents are not cryptographically random, but they do not compress well enough to
/// let a backend skew results with transparent compression.
#[derive(Clone, Copy, Debug)]
pub struct PayloadGenerator {
    size: usize,
}

impl PayloadGenerator {
    /// Creates a generator for payloads of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self { size }
    }

    /// Generates a new payload.
    pub fn generate(&self) -> Bytes {
        let mut rng = SmallRng::from_rng(&mut rand::rng());
        generate(self.size, &mut rng)
    }
}

/// Generates `size` bytes of printable text using the given RNG.
pub fn generate<R: Rng + ?Sized>(size: usize, rng: &mut R) -> Bytes {
    let contents: Vec<u8> = (0..size)
        .map(|_| ALPHABET[rng.random_range(..ALPHABET.len())])
        .collect();
    contents.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_requested_size() {
        for size in [0, 1, 16, 250_000] {
            assert_eq!(PayloadGenerator::new(size).generate().len(), size);
        }
    }

    #[test]
    fn only_printable_symbols() {
        let payload = PayloadGenerator::new(10_000).generate();
        assert!(payload.iter().all(|b| ALPHABET.contains(b)));
        assert!(
            payload
                .iter()
                .all(|b| b.is_ascii_alphabetic() || *b == b'\n')
        );
    }

    #[test]
    fn payloads_are_fresh() {
        let generator = PayloadGenerator::new(1024);
        assert_ne!(generator.generate(), generator.generate());
    }

    #[test]
    fn deterministic_with_seeded_rng() {
        let first = generate(64, &mut SmallRng::seed_from_u64(7));
        let second = generate(64, &mut SmallRng::seed_from_u64(7));
        assert_eq!(first, second);
    }

    #[test]
    fn uses_the_whole_alphabet() {
        let payload = generate(100_000, &mut SmallRng::seed_from_u64(1));
        for symbol in ALPHABET {
            assert!(payload.contains(symbol), "missing {symbol:?}");
        }
    }
}
