//! Monotonic id source.

use std::sync::atomic::{AtomicU64, Ordering};

/// A sequential stream of `u64` values, safe for concurrent access.
///
/// The STM keeps two of these as process-wide statics: the transaction
/// point counter (read points and commit points draw from the same stream,
/// giving all transactions a total order) and the ref id source.
#[derive(Debug)]
pub struct IdGenerator {
    id: AtomicU64,
}

impl IdGenerator {
    /// A generator whose first value is 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            id: AtomicU64::new(0),
        }
    }

    /// The next value in the sequence.
    pub fn next(&self) -> u64 {
        self.id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::Arc;

    #[rstest]
    fn test_ids_start_at_one_and_increase() {
        let generator = IdGenerator::new();
        assert_eq!(generator.next(), 1);
        assert_eq!(generator.next(), 2);
        assert_eq!(generator.next(), 3);
    }

    #[rstest]
    fn test_concurrent_ids_are_unique() {
        let generator = Arc::new(IdGenerator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let generator = Arc::clone(&generator);
                std::thread::spawn(move || (0..1000).map(|_| generator.next()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|handle| handle.join().expect("worker panicked"))
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 8000);
    }
}
