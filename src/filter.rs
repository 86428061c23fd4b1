//! Flat array of pocket dictionaries addressed by key-derived buckets.
#![cfg(target_pointer_width = "64")]

use anyhow::{anyhow, Result};

use crate::pocket_dict::{self, PocketDict};

// Expected number of keys per bucket. Buckets reject inserts beyond
// pocket_dict::CAPACITY, so sizing by this constant leaves headroom.
const KEYS_PER_BUCKET: u64 = 45;

/// Approximate-membership structure over 64-bit keys, backed by a flat
/// array of [`PocketDict`] blocks.
///
/// A key is split into a bucket index, a quotient, and a byte remainder;
/// the quotient and remainder form a 14-bit fingerprint stored in the
/// bucket's dictionary. Lookups can return false positives where
/// fingerprints collide within a bucket, but never false negatives for
/// successfully inserted keys.
///
/// Capacity is fixed at construction. [`insert`](Self::insert) reports a
/// full bucket by returning `false`; the structure never relocates keys,
/// so callers needing a hard capacity guarantee must size `add_count`
/// with headroom.
///
/// # Examples
///
/// ```
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use pockets::Crate;
///
/// let mut filter = Crate::new(90)?;
/// assert_eq!(filter.num_buckets(), 2);
///
/// assert!(filter.insert(0xDEAD_BEEF_CAFE_F00D));
/// assert!(filter.contains(0xDEAD_BEEF_CAFE_F00D));
/// # Ok(())
/// # }
/// ```
pub struct Crate {
    buckets: Vec<PocketDict>,
}

impl Crate {
    /// Creates a filter sized for `add_count` keys.
    ///
    /// The bucket count is `add_count / 45`, targeting a load of about 88%
    /// of the per-bucket capacity.
    ///
    /// # Errors
    ///
    /// An error is returned if `add_count` is too small to produce at least
    /// one bucket.
    ///
    /// # Examples
    ///
    /// ```
    /// use pockets::Crate;
    ///
    /// assert!(Crate::new(45).is_ok());
    /// assert!(Crate::new(44).is_err());
    /// ```
    pub fn new(add_count: u64) -> Result<Self> {
        let bucket_count = add_count / KEYS_PER_BUCKET;
        if bucket_count == 0 {
            return Err(anyhow!(
                "add_count must be at least {KEYS_PER_BUCKET} (got {add_count})"
            ));
        }
        debug_assert!(bucket_count <= u32::MAX as u64);
        Ok(Self {
            buckets: vec![PocketDict::new(); bucket_count as usize],
        })
    }

    /// Returns the number of buckets.
    #[inline(always)]
    pub fn num_buckets(&self) -> u64 {
        self.buckets.len() as u64
    }

    /// Returns the memory used by the bucket array in bytes.
    #[inline(always)]
    pub fn size_in_bytes(&self) -> u64 {
        (std::mem::size_of::<PocketDict>() as u64) * self.num_buckets()
    }

    /// Inserts `key`, returning `false` if its bucket is full.
    ///
    /// A rejected key is dropped, not relocated; whether that is fatal is
    /// the caller's decision.
    ///
    /// # Examples
    ///
    /// ```
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// use pockets::Crate;
    ///
    /// let mut filter = Crate::new(450)?;
    /// assert!(filter.insert(42));
    /// # Ok(())
    /// # }
    /// ```
    #[inline(always)]
    pub fn insert(&mut self, key: u64) -> bool {
        let b = bucket_index(key, self.num_buckets());
        let (quot, rem) = fingerprint(key);
        self.buckets[b].insert(quot, rem)
    }

    /// Checks if `key` was inserted, admitting false positives on
    /// fingerprint collisions.
    ///
    /// # Examples
    ///
    /// ```
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// use pockets::Crate;
    ///
    /// let mut filter = Crate::new(450)?;
    /// filter.insert(42);
    /// assert!(filter.contains(42));
    /// # Ok(())
    /// # }
    /// ```
    #[inline(always)]
    pub fn contains(&self, key: u64) -> bool {
        let b = bucket_index(key, self.num_buckets());
        let (quot, rem) = fingerprint(key);
        self.buckets[b].find(quot, rem)
    }

    /// Batched [`contains`](Self::contains) over 64 keys.
    ///
    /// Bit `i` of the result is the answer for `keys[i]`. All bucket
    /// indices are computed up front and their blocks prefetched before any
    /// lookup runs; the prefetch is advisory and does not affect results.
    ///
    /// # Examples
    ///
    /// ```
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// use pockets::Crate;
    ///
    /// let mut filter = Crate::new(450)?;
    /// let keys: [u64; 64] =
    ///     std::array::from_fn(|i| (i as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    /// for &key in &keys {
    ///     assert!(filter.insert(key));
    /// }
    /// assert_eq!(filter.contains64(&keys), u64::MAX);
    /// # Ok(())
    /// # }
    /// ```
    pub fn contains64(&self, keys: &[u64; 64]) -> u64 {
        let n = self.num_buckets();
        let mut indices = [0usize; 64];
        for (idx, &key) in indices.iter_mut().zip(keys) {
            *idx = bucket_index(key, n);
        }
        for &b in &indices {
            prefetch(&self.buckets[b]);
        }
        let mut mask = 0;
        for (i, (&key, &b)) in keys.iter().zip(&indices).enumerate() {
            let (quot, rem) = fingerprint(key);
            mask |= (self.buckets[b].find(quot, rem) as u64) << i;
        }
        mask
    }

    /// Variant of [`contains64`](Self::contains64) that issues each
    /// prefetch as soon as the bucket index is known. Results are
    /// identical.
    pub fn contains64_interleaved(&self, keys: &[u64; 64]) -> u64 {
        let n = self.num_buckets();
        let mut indices = [0usize; 64];
        for (idx, &key) in indices.iter_mut().zip(keys) {
            *idx = bucket_index(key, n);
            prefetch(&self.buckets[*idx]);
        }
        let mut mask = 0;
        for (i, (&key, &b)) in keys.iter().zip(&indices).enumerate() {
            let (quot, rem) = fingerprint(key);
            mask |= (self.buckets[b].find(quot, rem) as u64) << i;
        }
        mask
    }

    /// Batched [`contains`](Self::contains) over 128 keys, with the same
    /// protocol as [`contains64`](Self::contains64).
    pub fn contains128(&self, keys: &[u64; 128]) -> u128 {
        let n = self.num_buckets();
        let mut indices = [0usize; 128];
        for (idx, &key) in indices.iter_mut().zip(keys) {
            *idx = bucket_index(key, n);
        }
        for &b in &indices {
            prefetch(&self.buckets[b]);
        }
        let mut mask = 0;
        for (i, (&key, &b)) in keys.iter().zip(&indices).enumerate() {
            let (quot, rem) = fingerprint(key);
            mask |= (self.buckets[b].find(quot, rem) as u128) << i;
        }
        mask
    }
}

impl std::fmt::Debug for Crate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crate")
            .field("num_buckets", &self.num_buckets())
            .field("size_in_bytes", &self.size_in_bytes())
            .finish()
    }
}

// Maps the low 32 key bits uniformly into [0, bucket_count) with a
// fixed-point multiply.
#[inline(always)]
fn bucket_index(key: u64, bucket_count: u64) -> usize {
    (((key & 0xFFFF_FFFF) * bucket_count) >> 32) as usize
}

// Quotient from the top 24 key bits via fixed-point multiply into [0, 50),
// remainder from the byte below them.
#[inline(always)]
fn fingerprint(key: u64) -> (u64, u8) {
    let quot = ((key >> 40) * pocket_dict::NUM_GROUPS) >> 24;
    let rem = (key >> 32) as u8;
    (quot, rem)
}

// Advisory non-temporal read prefetch of a bucket's cache line.
#[inline(always)]
fn prefetch(pd: &PocketDict) {
    #[cfg(target_arch = "x86_64")]
    // SAFETY: prefetching any valid address is side-effect free.
    unsafe {
        use core::arch::x86_64::{_mm_prefetch, _MM_HINT_NTA};
        _mm_prefetch::<_MM_HINT_NTA>((pd as *const PocketDict).cast());
    }
    #[cfg(not(target_arch = "x86_64"))]
    let _ = pd;
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaChaRng;

    fn gen_random_keys(len: usize, seed: u64) -> Vec<u64> {
        let mut rng = ChaChaRng::seed_from_u64(seed);
        (0..len).map(|_| rng.gen::<u64>()).collect()
    }

    // Loads the filter with `add_count` random keys and returns those that
    // were accepted.
    fn load_random(filter: &mut Crate, add_count: usize, seed: u64) -> Vec<u64> {
        gen_random_keys(add_count, seed)
            .into_iter()
            .filter(|&key| filter.insert(key))
            .collect()
    }

    #[test]
    fn test_bucket_sizing() {
        let filter = Crate::new(90).unwrap();
        assert_eq!(filter.num_buckets(), 2);
        assert_eq!(filter.size_in_bytes(), 128);

        assert_eq!(Crate::new(45).unwrap().num_buckets(), 1);
        assert!(Crate::new(44).is_err());
        assert!(Crate::new(0).is_err());
    }

    #[test]
    fn test_fingerprint_ranges() {
        let mut rng = ChaChaRng::seed_from_u64(3);
        for _ in 0..10000 {
            let key = rng.gen::<u64>();
            let (quot, _) = fingerprint(key);
            assert!(quot < pocket_dict::NUM_GROUPS);
            assert!(bucket_index(key, 100) < 100);
        }
        assert_eq!(fingerprint(u64::MAX).0, pocket_dict::NUM_GROUPS - 1);
        assert_eq!(fingerprint(0).0, 0);
        assert_eq!(bucket_index(u64::MAX, 100), 99);
        assert_eq!(bucket_index(0, 100), 0);
    }

    #[test]
    fn test_insert_then_contains() {
        let mut filter = Crate::new(90).unwrap();
        let key = 0x0123_4567_89AB_CDEF;
        assert!(!filter.contains(key));
        assert!(filter.insert(key));
        assert!(filter.contains(key));
    }

    #[test]
    fn test_inserted_keys_are_contained() {
        // Light load; every insert must be accepted.
        let mut filter = Crate::new(4500).unwrap();
        for &key in &gen_random_keys(1000, 42) {
            assert!(filter.insert(key));
        }
        for &key in &gen_random_keys(1000, 42) {
            assert!(filter.contains(key));
        }
    }

    #[test]
    fn test_contains64_matches_point_queries() {
        let mut filter = Crate::new(4500).unwrap();
        let inserted = load_random(&mut filter, 4500, 7);
        assert!(inserted.len() >= 4000);

        // Mix accepted keys with fresh ones.
        let fresh = gen_random_keys(32, 8);
        let mut keys = [0u64; 64];
        keys[..32].copy_from_slice(&inserted[..32]);
        keys[32..].copy_from_slice(&fresh);

        let mask = filter.contains64(&keys);
        assert_eq!(filter.contains64_interleaved(&keys), mask);
        for (i, &key) in keys.iter().enumerate() {
            assert_eq!((mask >> i) & 1 == 1, filter.contains(key));
        }
        assert_eq!(mask & ((1 << 32) - 1), (1 << 32) - 1);
    }

    #[test]
    fn test_contains64_all_inserted() {
        let mut filter = Crate::new(4500).unwrap();
        let inserted = load_random(&mut filter, 4500, 11);
        let mut keys = [0u64; 64];
        keys.copy_from_slice(&inserted[..64]);
        assert_eq!(filter.contains64(&keys), u64::MAX);
        assert_eq!(filter.contains64_interleaved(&keys), u64::MAX);
    }

    #[test]
    fn test_contains128_matches_point_queries() {
        let mut filter = Crate::new(4500).unwrap();
        let inserted = load_random(&mut filter, 4500, 13);

        let fresh = gen_random_keys(64, 14);
        let mut keys = [0u64; 128];
        keys[..64].copy_from_slice(&inserted[..64]);
        keys[64..].copy_from_slice(&fresh);

        let mask = filter.contains128(&keys);
        for (i, &key) in keys.iter().enumerate() {
            assert_eq!((mask >> i) & 1 == 1, filter.contains(key));
        }
        assert_eq!(mask & ((1u128 << 64) - 1), (1u128 << 64) - 1);
    }

    #[test]
    fn test_false_positive_rate() {
        let mut filter = Crate::new(4500).unwrap();
        load_random(&mut filter, 4500, 17);

        // Expected rate at this load is roughly 1/280 per query.
        let false_positives = gen_random_keys(10000, 18)
            .into_iter()
            .filter(|&key| filter.contains(key))
            .count();
        assert!(false_positives < 100, "{false_positives} of 10000");
    }

    #[test]
    fn test_full_buckets_reject() {
        // One bucket; every key maps to it, so exactly 51 fit.
        let mut filter = Crate::new(45).unwrap();
        let keys = gen_random_keys(100, 19);
        let accepted: Vec<u64> = keys.iter().copied().filter(|&k| filter.insert(k)).collect();
        assert_eq!(accepted[..], keys[..51]);
        assert!(!filter.insert(keys[99]));
        for &key in &accepted {
            assert!(filter.contains(key));
        }
    }
}
