//! MurmurHash3 (x86, 32-bit) primitives.
//!
//! The collection hashing scheme is part of the crate's public contract, not
//! an implementation detail: every collection caches a 32-bit hash computed
//! with these functions, and equivalent collections must agree on it. The body
//! constants follow the public MurmurHash3 description; the ordered/unordered
//! accumulation conventions live in [`crate::protocol`].
//!
//! Two details matter to callers:
//!
//! - The hash of the zero integer is 0. Collections use 0 to mean "hash not
//!   yet computed", and this special case keeps a cached zero from being
//!   recomputed forever.
//! - [`finalize_coll_hash`] re-mixes an accumulated collection hash so that
//!   the per-element accumulation (a weak polynomial or a plain sum) still
//!   avalanches.

const SEED: u32 = 0;
const C1: u32 = 0xcc9e_2d51;
const C2: u32 = 0x1b87_3593;
const R1: u32 = 15;
const R2: u32 = 13;
const M: u32 = 5;
const N: u32 = 0xe654_6b64;

/// Hash of an empty ordered sequence: `finalize_coll_hash(1, 0)`.
///
/// Every empty sequential collection (list, vector, exhausted seq) hashes to
/// this value so that structurally equivalent empties agree.
pub const EMPTY_SEQUENCE_HASH: u32 = finalize_coll_hash(1, 0);

/// Hash of an empty map: `finalize_coll_hash(0, 0)`.
pub const EMPTY_MAP_HASH: u32 = finalize_coll_hash(0, 0);

/// Hashes a signed 32-bit integer.
#[inline]
#[must_use]
pub const fn hash_int32(input: i32) -> u32 {
    hash_uint32(input as u32)
}

/// Hashes a signed 64-bit integer.
#[inline]
#[must_use]
pub const fn hash_int64(input: i64) -> u32 {
    hash_uint64(input as u64)
}

/// Hashes an unsigned 32-bit integer. Zero hashes to zero.
#[must_use]
pub const fn hash_uint32(input: u32) -> u32 {
    if input == 0 {
        return 0;
    }
    let key = mix_key(input);
    let hash = mix_hash(SEED, key);
    finalize(hash, 4)
}

/// Hashes an unsigned 64-bit integer as two 32-bit blocks, low word first.
/// Zero hashes to zero.
#[must_use]
pub const fn hash_uint64(input: u64) -> u32 {
    if input == 0 {
        return 0;
    }
    let low = input as u32;
    let high = (input >> 32) as u32;

    let mut hash = mix_hash(SEED, mix_key(low));
    hash = mix_hash(hash, mix_key(high));
    finalize(hash, 8)
}

/// Hashes a string, stepping through its bytes four at a time with the
/// standard little-endian tail handling.
#[must_use]
pub fn hash_string(input: &str) -> u32 {
    let bytes = input.as_bytes();
    let mut hash = SEED;

    let mut chunks = bytes.chunks_exact(4);
    for chunk in &mut chunks {
        let key = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        hash = mix_hash(hash, mix_key(key));
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut key = 0u32;
        let mut i = tail.len();
        while i > 0 {
            i -= 1;
            key = (key << 8) | u32::from(tail[i]);
        }
        hash = mix_hash(hash, mix_key(key));
    }

    finalize(hash, bytes.len() as u32)
}

/// Mixes a 32-bit key block.
#[inline]
#[must_use]
pub const fn mix_key(key: u32) -> u32 {
    key.wrapping_mul(C1).rotate_left(R1).wrapping_mul(C2)
}

/// Folds a mixed key block into the running hash.
#[inline]
#[must_use]
pub const fn mix_hash(hash: u32, key: u32) -> u32 {
    (hash ^ key).rotate_left(R2).wrapping_mul(M).wrapping_add(N)
}

/// Forces all bits of the hash block to avalanche.
#[must_use]
pub const fn finalize(hash: u32, length: u32) -> u32 {
    let mut h = hash ^ length;
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// Finalizes an accumulated collection hash: the accumulator is treated as a
/// single key block and run through the full mix/finalize pipeline with the
/// element count as the length.
#[must_use]
pub const fn finalize_coll_hash(hash: u32, count: u32) -> u32 {
    let key = mix_key(hash);
    let h = mix_hash(SEED, key);
    finalize(h, count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn test_zero_integers_hash_to_zero() {
        assert_eq!(hash_uint32(0), 0);
        assert_eq!(hash_uint64(0), 0);
        assert_eq!(hash_int32(0), 0);
        assert_eq!(hash_int64(0), 0);
    }

    #[rstest]
    fn test_nonzero_integers_avalanche() {
        assert_ne!(hash_int64(1), 0);
        assert_ne!(hash_int64(1), hash_int64(2));
        assert_ne!(hash_int64(1), hash_int64(-1));
    }

    #[rstest]
    fn test_int32_and_int64_agree_on_small_values() {
        // A value that fits in 32 bits hashes identically through either
        // entry point only when the 64-bit encoding has an empty high word,
        // which is false for any nonzero value; the two functions are
        // distinct hashes by design.
        assert_ne!(hash_int32(7), hash_int64(7));
    }

    #[rstest]
    #[case("")]
    #[case("a")]
    #[case("ab")]
    #[case("abc")]
    #[case("abcd")]
    #[case("hello, murmur")]
    fn test_string_hash_is_stable(#[case] input: &str) {
        assert_eq!(hash_string(input), hash_string(input));
    }

    #[rstest]
    fn test_string_hash_discriminates_tails() {
        assert_ne!(hash_string("abc"), hash_string("abd"));
        assert_ne!(hash_string("abcd"), hash_string("abce"));
        assert_ne!(hash_string("a"), hash_string(""));
    }

    #[rstest]
    fn test_finalize_coll_hash_separates_counts() {
        assert_ne!(finalize_coll_hash(1, 0), finalize_coll_hash(1, 1));
        assert_ne!(EMPTY_SEQUENCE_HASH, EMPTY_MAP_HASH);
    }
}
