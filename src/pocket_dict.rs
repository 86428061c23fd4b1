//! 512-bit pocket dictionary blocks.
//!
//! A [`PocketDict`] packs up to 51 byte-sized remainders, grouped by a
//! quotient in `[0, 50)`, into one cache line. The low 101 bits form a
//! unary-coded header with exactly 50 set bits: scanning from bit 0, each
//! zero bit is a remainder slot and each set bit terminates a quotient
//! group. Remainder bytes start at byte 13 and are kept in ascending order
//! within each group.
#![cfg(target_pointer_width = "64")]

use crate::broadword;

/// Number of quotient groups per dictionary.
pub const NUM_GROUPS: u64 = 50;

/// Maximum number of remainders a dictionary can hold.
pub const CAPACITY: u64 = 51;

/// Size of a dictionary block in bytes.
pub const BLOCK_BYTES: usize = 64;

const HEADER_BITS: usize = (NUM_GROUPS + CAPACITY) as usize;
const HEADER_BYTES: usize = (HEADER_BITS + 7) / 8;
const HEADER_MASK: u128 = (1 << HEADER_BITS) - 1;

// Empty state: one set bit per group, no slots in between.
const EMPTY_HEADER: u64 = (1 << NUM_GROUPS) - 1;

/// 512-bit pocket dictionary storing up to 51 byte remainders grouped by a
/// quotient in `[0, 50)`.
///
/// The block is 64-byte aligned so that it occupies a single cache line and
/// can be scanned with one wide byte comparison.
///
/// # Examples
///
/// ```
/// use pockets::PocketDict;
///
/// let mut pd = PocketDict::new();
/// assert!(pd.insert(3, 0xAB));
/// assert!(pd.find(3, 0xAB));
/// assert!(!pd.find(3, 0xAA));
/// assert!(!pd.find(4, 0xAB));
/// assert_eq!(pd.fill(), 1);
/// ```
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(C, align(64))]
pub struct PocketDict {
    bytes: [u8; BLOCK_BYTES],
}

impl PocketDict {
    /// Creates an empty dictionary.
    pub const fn new() -> Self {
        let mut bytes = [0u8; BLOCK_BYTES];
        let limb = EMPTY_HEADER.to_le_bytes();
        let mut i = 0;
        while i < limb.len() {
            bytes[i] = limb[i];
            i += 1;
        }
        Self { bytes }
    }

    #[inline(always)]
    fn header(&self) -> u128 {
        let mut buf = [0u8; 16];
        buf.copy_from_slice(&self.bytes[..16]);
        u128::from_le_bytes(buf) & HEADER_MASK
    }

    #[inline(always)]
    fn set_header(&mut self, header: u128) {
        debug_assert_eq!(header & !HEADER_MASK, 0);
        let le = header.to_le_bytes();
        self.bytes[..HEADER_BYTES].copy_from_slice(&le[..HEADER_BYTES]);
    }

    /// Returns the number of remainders currently stored.
    ///
    /// # Examples
    ///
    /// ```
    /// use pockets::PocketDict;
    ///
    /// let mut pd = PocketDict::new();
    /// assert_eq!(pd.fill(), 0);
    /// pd.insert(0, 42);
    /// assert_eq!(pd.fill(), 1);
    /// ```
    #[inline(always)]
    pub fn fill(&self) -> u64 {
        broadword::select128(self.header(), NUM_GROUPS - 1) - (NUM_GROUPS - 1)
    }

    /// Checks if no more remainders can be stored.
    #[inline(always)]
    pub fn is_full(&self) -> bool {
        self.fill() == CAPACITY
    }

    /// Checks if the fingerprint `(quot, rem)` is present.
    ///
    /// # Panics
    ///
    /// In debug builds, it panics if `quot >= 50`.
    ///
    /// # Examples
    ///
    /// ```
    /// use pockets::PocketDict;
    ///
    /// let mut pd = PocketDict::new();
    /// pd.insert(49, 0x01);
    /// assert!(pd.find(49, 0x01));
    /// assert!(!pd.find(49, 0x02));
    /// ```
    #[inline(always)]
    pub fn find(&self, quot: u64, rem: u8) -> bool {
        debug_assert!(quot < NUM_GROUPS);
        let header = self.header();
        let low_pop = broadword::popcount(header as u64);
        let begin = if quot == 0 {
            0
        } else {
            broadword::select128_with_pop(header, quot - 1, low_pop) + 1 - quot
        };
        let end = broadword::select128_with_pop(header, quot, low_pop) - quot;
        self.any_slot_matches(rem, begin, end)
    }

    /// Equivalent to [`find`](Self::find), selecting over the two 64-bit
    /// header halves without the precomputed low-half popcount.
    #[inline(always)]
    pub fn find_select128(&self, quot: u64, rem: u8) -> bool {
        debug_assert!(quot < NUM_GROUPS);
        let header = self.header();
        let begin = if quot == 0 {
            0
        } else {
            broadword::select128(header, quot - 1) + 1 - quot
        };
        let end = broadword::select128(header, quot) - quot;
        self.any_slot_matches(rem, begin, end)
    }

    /// Equivalent to [`find`](Self::find), deriving the group's end from its
    /// begin with a trailing-zeros count instead of a second selection.
    #[inline(always)]
    pub fn find_tzcnt(&self, quot: u64, rem: u8) -> bool {
        debug_assert!(quot < NUM_GROUPS);
        let header = self.header();
        let mut begin = 0;
        if quot > 0 {
            let low_pop = broadword::popcount(header as u64);
            begin = if quot - 1 < low_pop {
                broadword::select_in_word(header as u64, quot - 1) + 1 - quot
            } else {
                64 + broadword::select_in_word((header >> 64) as u64, quot - 1 - low_pop) + 1 - quot
            };
        }
        let end = begin + (header >> (begin + quot)).trailing_zeros() as u64;
        debug_assert_eq!(end, broadword::select128(header, quot) - quot);
        self.any_slot_matches(rem, begin, end)
    }

    /// Equivalent to [`find`](Self::find), with the selection over the header
    /// halves fully unrolled.
    #[inline(always)]
    pub fn find_unrolled(&self, quot: u64, rem: u8) -> bool {
        debug_assert!(quot < NUM_GROUPS);
        let header = self.header();
        let (begin, end);
        if quot == 0 {
            begin = 0;
            end = broadword::select_in_word(header as u64, 0);
        } else {
            let low_pop = broadword::popcount(header as u64);
            if quot - 1 >= low_pop {
                begin =
                    64 + broadword::select_in_word((header >> 64) as u64, quot - 1 - low_pop) + 1
                        - quot;
                end = 64 + broadword::select_in_word((header >> 64) as u64, quot - low_pop) - quot;
            } else {
                begin = broadword::select_in_word(header as u64, quot - 1) + 1 - quot;
                end = if quot >= low_pop {
                    64 + broadword::select_in_word((header >> 64) as u64, quot - low_pop) - quot
                } else {
                    broadword::select_in_word(header as u64, quot) - quot
                };
            }
        }
        debug_assert_eq!(end, broadword::select128(header, quot) - quot);
        self.any_slot_matches(rem, begin, end)
    }

    /// Equivalent to [`find`](Self::find), without the `quot == 0` branch.
    ///
    /// The previous group's terminator is selected with a signed rank, so
    /// `quot = 0` selects rank -1, yielding 63, and the following `+ 1`
    /// wraps the begin position to 0 in 6-bit shift space.
    #[inline(always)]
    pub fn find_branchless(&self, quot: u64, rem: u8) -> bool {
        debug_assert!(quot < NUM_GROUPS);
        let header = self.header();
        let low_pop = broadword::popcount(header as u64) as i64;
        let prev = quot as i64 - 1;
        let begin = if prev < low_pop {
            (broadword::select_in_word_signed(header as u64, prev) + 1 - quot) & 63
        } else {
            64 + broadword::select_in_word((header >> 64) as u64, (prev - low_pop) as u64) + 1
                - quot
        };
        let end = begin + (header >> (begin + quot)).trailing_zeros() as u64;
        debug_assert_eq!(end, broadword::select128(header, quot) - quot);
        self.any_slot_matches(rem, begin, end)
    }

    /// Inserts the fingerprint `(quot, rem)`.
    ///
    /// Returns `false` without mutating the block if the dictionary already
    /// holds [`CAPACITY`] remainders.
    ///
    /// # Panics
    ///
    /// In debug builds, it panics if `quot >= 50`.
    ///
    /// # Examples
    ///
    /// ```
    /// use pockets::PocketDict;
    ///
    /// let mut pd = PocketDict::new();
    /// for i in 0..51 {
    ///     assert!(pd.insert(i % 50, i as u8));
    /// }
    /// assert!(pd.is_full());
    /// assert!(!pd.insert(0, 0));
    /// ```
    pub fn insert(&mut self, quot: u64, rem: u8) -> bool {
        debug_assert!(quot < NUM_GROUPS);
        let header = self.header();
        debug_assert_eq!(broadword::popcount128(header), NUM_GROUPS);
        let fill = broadword::select128(header, NUM_GROUPS - 1) - (NUM_GROUPS - 1);
        if fill == CAPACITY {
            return false;
        }

        // Splice a zero into the header at the group's end: every bit from
        // there upward moves left by one, opening one slot.
        let begin = if quot == 0 {
            0
        } else {
            broadword::select128(header, quot - 1) + 1
        };
        let end = broadword::select128(header, quot);
        debug_assert!(begin <= end);
        let new_header = (header & ((1u128 << begin) - 1)) | ((header >> end) << (end + 1));
        debug_assert_eq!(broadword::popcount128(new_header), NUM_GROUPS);
        debug_assert_eq!(
            broadword::select128(new_header, NUM_GROUPS - 1) - (NUM_GROUPS - 1),
            fill + 1
        );
        self.set_header(new_header);

        // Shift the remainder tail right by one byte and place rem at its
        // sorted position within the group. The last byte is unused since
        // fill < CAPACITY.
        let begin_slot = (begin - quot) as usize;
        let end_slot = (end - quot) as usize;
        let mut i = begin_slot;
        while i < end_slot && self.bytes[HEADER_BYTES + i] < rem {
            i += 1;
        }
        self.bytes
            .copy_within(HEADER_BYTES + i..BLOCK_BYTES - 1, HEADER_BYTES + i + 1);
        self.bytes[HEADER_BYTES + i] = rem;

        debug_assert!(self.find(quot, rem));
        debug_assert!(self.find_select128(quot, rem));
        debug_assert!(self.find_tzcnt(quot, rem));
        debug_assert!(self.find_unrolled(quot, rem));
        debug_assert!(self.find_branchless(quot, rem));
        true
    }

    // Checks if rem occurs in the slot range [begin, end), given in
    // 0-indexed remainder space.
    #[inline(always)]
    fn any_slot_matches(&self, rem: u8, begin: u64, end: u64) -> bool {
        debug_assert!(begin <= end);
        debug_assert!(end <= CAPACITY);
        let v = self.match_mask(rem) >> HEADER_BYTES;
        (v & ((1 << end) - 1)) >> begin != 0
    }

    // One bit per block byte, set where the byte equals rem.
    #[inline(always)]
    fn match_mask(&self, rem: u8) -> u64 {
        #[cfg(target_arch = "x86_64")]
        {
            if std::is_x86_feature_detected!("avx512bw") {
                // SAFETY: feature detected at runtime.
                return unsafe { self.match_mask_avx512(rem) };
            }
            if std::is_x86_feature_detected!("avx2") {
                // SAFETY: feature detected at runtime.
                return unsafe { self.match_mask_avx2(rem) };
            }
        }
        self.match_mask_scalar(rem)
    }

    #[cfg(target_arch = "x86_64")]
    #[target_feature(enable = "avx512bw")]
    unsafe fn match_mask_avx512(&self, rem: u8) -> u64 {
        use core::arch::x86_64::{_mm512_cmpeq_epu8_mask, _mm512_load_si512, _mm512_set1_epi8};
        // SAFETY: the block is 64-byte aligned by its repr.
        let block = _mm512_load_si512(self.bytes.as_ptr().cast());
        _mm512_cmpeq_epu8_mask(_mm512_set1_epi8(rem as i8), block)
    }

    #[cfg(target_arch = "x86_64")]
    #[target_feature(enable = "avx2")]
    unsafe fn match_mask_avx2(&self, rem: u8) -> u64 {
        use core::arch::x86_64::{
            _mm256_cmpeq_epi8, _mm256_load_si256, _mm256_movemask_epi8, _mm256_set1_epi8,
        };
        let target = _mm256_set1_epi8(rem as i8);
        // SAFETY: the block is 64-byte aligned, so both halves are 32-byte
        // aligned.
        let lo = _mm256_load_si256(self.bytes.as_ptr().cast());
        let hi = _mm256_load_si256(self.bytes.as_ptr().add(32).cast());
        let lo = _mm256_movemask_epi8(_mm256_cmpeq_epi8(lo, target)) as u32;
        let hi = _mm256_movemask_epi8(_mm256_cmpeq_epi8(hi, target)) as u32;
        (lo as u64) | ((hi as u64) << 32)
    }

    fn match_mask_scalar(&self, rem: u8) -> u64 {
        let mut mask = 0;
        for (i, &b) in self.bytes.iter().enumerate() {
            mask |= ((b == rem) as u64) << i;
        }
        mask
    }
}

impl Default for PocketDict {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PocketDict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PocketDict")
            .field("fill", &self.fill())
            .field("header", &format_args!("{:#x}", self.header()))
            .finish()
    }
}
