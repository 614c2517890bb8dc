//! Deterministic hashing for visitor bucketing.
//!
//! This module intentionally does **not** provide cryptographic guarantees; it is meant for
//! repeatable, platform-independent assignment of visitors to buckets.

/// FNV-1a 32-bit offset basis.
pub const FNV32_OFFSET_BASIS: u32 = 0x811c_9dc5;
/// FNV-1a 32-bit prime.
pub const FNV32_PRIME: u32 = 0x0100_0193;

/// Resolution of [`unit_hash`]: the unit interval is split into this many equal steps.
///
/// Bucket boundaries therefore fall on multiples of `1 / 10_000`. A traffic percentage of
/// `12.345` behaves exactly like `12.34` for visitors whose hash lands on the boundary step.
pub const UNIT_RESOLUTION: u32 = 10_000;

/// Streaming FNV-1a over a sequence of string parts.
///
/// Parts are hashed as if concatenated; no separator is inserted. Each `char` is folded in as
/// its Unicode scalar value (XOR into the accumulator, then multiply by the prime with
/// wraparound), so non-ASCII keys hash per character rather than per UTF-8 byte.
#[must_use]
pub fn fnv1a32(parts: &[&str]) -> u32 {
    let mut h = FNV32_OFFSET_BASIS;
    for part in parts {
        for c in part.chars() {
            h ^= c as u32;
            h = h.wrapping_mul(FNV32_PRIME);
        }
    }
    h
}

/// Map `visitor_key ++ experiment_key` to a value in `[0, 1)` with `1 / 10_000` resolution.
#[must_use]
pub fn unit_hash(visitor_key: &str, experiment_key: &str) -> f64 {
    let h = fnv1a32(&[visitor_key, experiment_key]);
    f64::from(h % UNIT_RESOLUTION) / f64::from(UNIT_RESOLUTION)
}
