//! Stable string hashing and shard ownership.
//!
//! Every shard process and the sync path must compute the same owner for
//! the same token, across restarts and architectures. `std`'s `Hasher`
//! implementations are randomly seeded per process, so ownership uses a
//! fixed polynomial accumulator instead.

use crate::SessionError;

const SEED: i32 = 23;
const FACTOR: i32 = 31;

/// Hashes a string into a non-negative integer, deterministically.
///
/// The accumulator runs over UTF-16 code units with 32-bit signed
/// wrapping arithmetic, then takes the absolute value.
///
/// ```rust
/// use moonshard_session::stable_hash;
///
/// assert_eq!(stable_hash(""), 23);
/// assert_eq!(stable_hash("a"), 23 * 31 + 97);
/// ```
pub fn stable_hash(key: &str) -> u32 {
    let hash = key.encode_utf16().fold(SEED, |hash, unit| {
        hash.wrapping_mul(FACTOR).wrapping_add(i32::from(unit))
    });
    hash.unsigned_abs()
}

/// Which shard of how many this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardAssignment {
    shard_id: usize,
    shard_count: usize,
}

impl ShardAssignment {
    /// # Errors
    /// Returns [`SessionError::InvalidShard`] if `shard_count` is zero or
    /// `shard_id` is out of range.
    pub fn new(shard_id: usize, shard_count: usize) -> Result<Self, SessionError> {
        if shard_count == 0 || shard_id >= shard_count {
            return Err(SessionError::InvalidShard {
                shard_id,
                shard_count,
            });
        }
        Ok(Self {
            shard_id,
            shard_count,
        })
    }

    /// A single shard that owns every key.
    pub fn single() -> Self {
        Self {
            shard_id: 0,
            shard_count: 1,
        }
    }

    pub fn shard_id(&self) -> usize {
        self.shard_id
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    /// The shard that owns `key`.
    pub fn shard_of(&self, key: &str) -> usize {
        shard_of(key, self.shard_count)
    }

    /// Returns `true` if this shard owns `key`.
    pub fn owns(&self, key: &str) -> bool {
        self.shard_of(key) == self.shard_id
    }
}

/// `stable_hash(key) mod shard_count`. `shard_count` must be non-zero.
pub fn shard_of(key: &str, shard_count: usize) -> usize {
    // u32 always fits in usize on supported targets.
    stable_hash(key) as usize % shard_count
}
