//! # Pockets: approximate membership via pocket dictionaries
//!
//! This crate provides [`Crate`], an approximate-membership structure in
//! the Bloom/cuckoo filter family. Keys are 64-bit integers, assumed
//! already uniformly distributed; each key is reduced to a bucket index
//! and a 14-bit fingerprint, and fingerprints are stored in 512-bit
//! [`PocketDict`] blocks of 51 slots each. Every operation touches a
//! single cache line plus a constant amount of bit manipulation.
//!
//! Point queries can return false positives where fingerprints collide
//! within a bucket (roughly one query in 250 at full load), but never
//! false negatives for successfully inserted keys. Deletion, resizing,
//! and overflow handling are out of scope; a full bucket rejects further
//! inserts.
//!
//! # Examples
//!
//! ```
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use pockets::Crate;
//!
//! // Keys must already be uniformly distributed; spread the counter here.
//! let keys: Vec<u64> = (0..100u64)
//!     .map(|i| i.wrapping_mul(0x9E37_79B9_7F4A_7C15))
//!     .collect();
//!
//! let mut filter = Crate::new(900)?;
//! for &key in &keys {
//!     assert!(filter.insert(key));
//! }
//! for &key in &keys {
//!     assert!(filter.contains(key));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Limitations
//!
//! This library is designed to run on 64-bit machines.
#![cfg(target_pointer_width = "64")]

pub mod broadword;
pub mod filter;
pub mod pocket_dict;

pub use filter::Crate;
pub use pocket_dict::PocketDict;
