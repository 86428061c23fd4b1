//! Word-level bit manipulation primitives.
//!
//! These are the inner loops of the pocket-dictionary operations. All
//! functions are pure and constant-time, using `pdep`/`tzcnt` on x86_64
//! machines with BMI2 and portable broadword arithmetic elsewhere.
#![cfg(target_pointer_width = "64")]

const ONES_STEP_8: u64 = 0x0101_0101_0101_0101;
const MSBS_STEP_8: u64 = 0x8080_8080_8080_8080;

/// Returns the number of set bits in `x`.
#[inline(always)]
pub const fn popcount(x: u64) -> u64 {
    x.count_ones() as u64
}

/// Returns the number of set bits in `x`.
#[inline(always)]
pub const fn popcount128(x: u128) -> u64 {
    x.count_ones() as u64
}

/// Returns the position (0-indexed) of the `k`-th set bit of `x`.
///
/// The result is unspecified if `x` has fewer than `k + 1` set bits;
/// callers must ensure `k < popcount(x)`.
///
/// # Examples
///
/// ```
/// use pockets::broadword::select_in_word;
///
/// assert_eq!(select_in_word(0b00100001_00010000, 0), 4);
/// assert_eq!(select_in_word(0b00100001_00010000, 1), 8);
/// assert_eq!(select_in_word(0b00100001_00010000, 2), 13);
/// ```
#[inline(always)]
pub fn select_in_word(x: u64, k: u64) -> u64 {
    debug_assert!(k < popcount(x));
    #[cfg(target_arch = "x86_64")]
    {
        if std::is_x86_feature_detected!("bmi2") {
            // SAFETY: feature detected at runtime.
            return unsafe { select_in_word_bmi2(x, k) };
        }
    }
    select_in_word_fallback(x, k)
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "bmi2")]
unsafe fn select_in_word_bmi2(x: u64, k: u64) -> u64 {
    // Deposits a lone bit at the position of the k-th set bit of x, then
    // counts trailing zeros to recover that position.
    // SAFETY: caller guarantees BMI2.
    let deposited = core::arch::x86_64::_pdep_u64(1 << k, x);
    deposited.trailing_zeros() as u64
}

fn select_in_word_fallback(x: u64, k: u64) -> u64 {
    // Cumulative per-byte popcounts, computed in parallel.
    let mut byte_sums = x - ((x >> 1) & 0x5555_5555_5555_5555);
    byte_sums = (byte_sums & 0x3333_3333_3333_3333) + ((byte_sums >> 2) & 0x3333_3333_3333_3333);
    byte_sums = (byte_sums + (byte_sums >> 4)) & 0x0f0f_0f0f_0f0f_0f0f;
    byte_sums = byte_sums.wrapping_mul(ONES_STEP_8);
    // Byte i of byte_sums now holds the number of set bits in bytes 0..=i.
    // A byte's MSB survives the subtraction iff its cumulative count is <= k,
    // so the surviving MSBs count the bytes wholly before the target one.
    let geq_k = (((k * ONES_STEP_8) | MSBS_STEP_8) - byte_sums) & MSBS_STEP_8;
    let place = popcount(geq_k) * 8;
    let byte_rank = k - (((byte_sums << 8) >> place) & 0xff);
    // Clear the byte_rank lowest set bits of the target byte; the next set
    // bit is the answer.
    let mut byte = (x >> place) & 0xff;
    let mut r = byte_rank;
    while r > 0 {
        byte &= byte - 1;
        r -= 1;
    }
    place + byte.trailing_zeros() as u64
}

/// Returns the position of the `k`-th set bit of `x`, extending the domain
/// to `k = -1`, which yields 63.
///
/// The 63 result lets callers compute `select(x, q - 1) + 1` uniformly for
/// `q >= 0`: the `q = 0` case wraps to 0 in 6-bit shift space.
///
/// # Examples
///
/// ```
/// use pockets::broadword::select_in_word_signed;
///
/// assert_eq!(select_in_word_signed(0b10100, -1), 63);
/// assert_eq!(select_in_word_signed(0b10100, 0), 2);
/// assert_eq!(select_in_word_signed(0b10100, 1), 4);
/// ```
#[inline(always)]
pub fn select_in_word_signed(x: u64, k: i64) -> u64 {
    debug_assert!((-1..64).contains(&k));
    if k < 0 {
        63
    } else {
        select_in_word(x, k as u64)
    }
}

/// Returns the position (0-indexed) of the `k`-th set bit of 128-bit `x`.
///
/// The result is unspecified if `x` has fewer than `k + 1` set bits.
///
/// # Examples
///
/// ```
/// use pockets::broadword::select128;
///
/// let x = (1u128 << 70) | 0b1001;
/// assert_eq!(select128(x, 0), 0);
/// assert_eq!(select128(x, 1), 3);
/// assert_eq!(select128(x, 2), 70);
/// ```
#[inline(always)]
pub fn select128(x: u128, k: u64) -> u64 {
    select128_with_pop(x, k, popcount(x as u64))
}

/// Variant of [`select128`] taking the precomputed popcount of the low half,
/// for callers that reuse it across several selections on the same word.
#[inline(always)]
pub fn select128_with_pop(x: u128, k: u64, low_pop: u64) -> u64 {
    debug_assert_eq!(low_pop, popcount(x as u64));
    if k < low_pop {
        select_in_word(x as u64, k)
    } else {
        64 + select_in_word((x >> 64) as u64, k - low_pop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaChaRng;

    fn select_naive(x: u64, k: u64) -> u64 {
        let mut seen = 0;
        for pos in 0..64 {
            if (x >> pos) & 1 == 1 {
                if seen == k {
                    return pos;
                }
                seen += 1;
            }
        }
        unreachable!();
    }

    #[test]
    fn test_popcount() {
        assert_eq!(popcount(0), 0);
        assert_eq!(popcount(0b1011), 3);
        assert_eq!(popcount(u64::MAX), 64);
        assert_eq!(popcount128(0), 0);
        assert_eq!(popcount128(u128::MAX), 128);
        assert_eq!(popcount128((1u128 << 100) | 1), 2);
    }

    #[test]
    fn test_select_in_word_small() {
        assert_eq!(select_in_word(1, 0), 0);
        assert_eq!(select_in_word(1 << 63, 0), 63);
        assert_eq!(select_in_word(u64::MAX, 17), 17);
    }

    #[test]
    fn test_select_in_word_random() {
        let mut rng = ChaChaRng::seed_from_u64(13);
        for _ in 0..1000 {
            let x = rng.gen::<u64>();
            for k in 0..popcount(x) {
                assert_eq!(select_in_word(x, k), select_naive(x, k));
                assert_eq!(select_in_word_fallback(x, k), select_naive(x, k));
            }
        }
    }

    #[test]
    fn test_select_in_word_signed() {
        let mut rng = ChaChaRng::seed_from_u64(17);
        for _ in 0..100 {
            let x = rng.gen::<u64>();
            assert_eq!(select_in_word_signed(x, -1), 63);
            for k in 0..popcount(x) {
                assert_eq!(select_in_word_signed(x, k as i64), select_naive(x, k));
            }
        }
    }

    #[test]
    fn test_select128_halves() {
        // Crossing the 64-bit boundary must add the low-half popcount back.
        let x = (0b101u128 << 64) | 0b11;
        assert_eq!(select128(x, 0), 0);
        assert_eq!(select128(x, 1), 1);
        assert_eq!(select128(x, 2), 64);
        assert_eq!(select128(x, 3), 66);
    }

    #[test]
    fn test_select128_random() {
        let mut rng = ChaChaRng::seed_from_u64(19);
        for _ in 0..1000 {
            let x = rng.gen::<u128>();
            let low_pop = popcount(x as u64);
            let mut seen = 0;
            for pos in 0..128 {
                if (x >> pos) & 1 == 1 {
                    assert_eq!(select128(x, seen), pos);
                    assert_eq!(select128_with_pop(x, seen, low_pop), pos);
                    seen += 1;
                }
            }
        }
    }
}
