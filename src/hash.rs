//! Platform-stable key hashing.
//!
//! `std`'s `Hash`/`Hasher` is deliberately randomized per-process, which would
//! make the on-disk probe chains unreproducible across opens and platforms.
//! Instead every key is hashed by feeding its serialized byte sequence to
//! CRC-32 (via `crc32fast`, the SIMD-accelerated implementation used
//! throughout the Rust ecosystem) and reading the result as a signed 32-bit
//! integer, exactly as the on-disk `hashCode` field is defined.

/// CRC-32 of `bytes`, reinterpreted as a signed 32-bit hash code.
pub fn hash_code(bytes: &[u8]) -> i32 {
    crc32fast::hash(bytes) as i32
}

/// The first probe position's multiplicative hash, folding the hash code one
/// nibble at a time: `h = h*23 + nibble`, starting from 17.
pub fn first_hash(hash_code: i32) -> u64 {
    fold_nibbles(hash_code, 17, 23)
}

/// The probe stride's multiplicative hash: `h = h*29 + nibble`, starting from
/// 13, then forced odd so every slot is reachable when capacity is a power of
/// two (the engine still works under plain modulo if that ever changes, see
/// the capacity invariant noted in `table.rs`).
pub fn collision_offset(hash_code: i32) -> u64 {
    fold_nibbles(hash_code, 13, 29) | 1
}

fn fold_nibbles(hash_code: i32, seed: u64, multiplier: u64) -> u64 {
    let bits = hash_code as u32;
    let mut h = seed;
    for shift in (0..32).step_by(4) {
        let nibble = ((bits >> shift) & 0xF) as u64;
        h = h.wrapping_mul(multiplier).wrapping_add(nibble);
    }
    h
}

/// The `k`th probe position for a key whose code produced `first`/`stride`,
/// at the given `capacity`.
pub fn probe(first: u64, stride: u64, k: u64, capacity: u64) -> u64 {
    debug_assert!(capacity.is_power_of_two(), "capacity must stay a power of two");
    (first.wrapping_add(k.wrapping_mul(stride))) % capacity
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_hash_is_crc32_of_length_prefix() {
        // An empty string serializes to a single zero length-prefix byte.
        assert_eq!(hash_code(&[0u8]), crc32fast::hash(&[0u8]) as i32);
    }

    #[test]
    fn hash_is_deterministic() {
        let a = hash_code(b"same bytes");
        let b = hash_code(b"same bytes");
        assert_eq!(a, b);
    }

    #[test]
    fn collision_offset_is_always_odd() {
        for code in [0, 1, -1, i32::MAX, i32::MIN, 0x1234_5678] {
            assert_eq!(collision_offset(code) % 2, 1);
        }
    }

    #[test]
    fn probe_wraps_within_capacity() {
        let first = first_hash(12345);
        let stride = collision_offset(12345);
        for k in 0..1000u64 {
            assert!(probe(first, stride, k, 16) < 16);
        }
    }
}
