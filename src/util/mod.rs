//! Utility functions
//!
//! Hashing helpers shared by the value model and the built-in classes.

/// MurmurHash2, 32-bit variant
pub fn murmur_hash32(data: &[u8], seed: u32) -> u32 {
    const M: u32 = 0x5bd1_e995;
    const R: u32 = 24;

    let mut h = seed ^ data.len() as u32;

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);

        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        if tail.len() >= 3 {
            h ^= (tail[2] as u32) << 16;
        }
        if tail.len() >= 2 {
            h ^= (tail[1] as u32) << 8;
        }
        h ^= tail[0] as u32;
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}

/// Fold a 64-bit pattern into 32 bits
#[inline]
pub const fn fold_u64(bits: u64) -> u32 {
    (bits as u32).wrapping_add((bits >> 32) as u32)
}

/// Smallest power of two holding `n`, at least `min`
#[inline]
pub fn bucket_count_for(n: usize, min: usize) -> usize {
    n.max(min).next_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_murmur_deterministic() {
        assert_eq!(murmur_hash32(b"hello", 1), murmur_hash32(b"hello", 1));
        assert_ne!(murmur_hash32(b"hello", 1), murmur_hash32(b"hello", 2));
        assert_ne!(murmur_hash32(b"hello", 1), murmur_hash32(b"hellp", 1));
    }

    #[test]
    fn test_murmur_known_values() {
        // Reference values of the canonical MurmurHash2
        assert_eq!(murmur_hash32(b"", 0), 0);
        assert_eq!(murmur_hash32(b"", 1), 0x5bd1_5e36);
    }

    #[test]
    fn test_murmur_tail_lengths() {
        let hashes: Vec<u32> = (0..8)
            .map(|n| murmur_hash32(&b"abcdefgh"[..n], 7))
            .collect();
        for (i, a) in hashes.iter().enumerate() {
            for b in &hashes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_fold() {
        assert_eq!(fold_u64(0), 0);
        assert_eq!(fold_u64(0x0000_0001_0000_0002), 3);
        assert_eq!(fold_u64(u64::MAX), u32::MAX.wrapping_add(u32::MAX));
    }

    #[test]
    fn test_bucket_count() {
        assert_eq!(bucket_count_for(0, 8), 8);
        assert_eq!(bucket_count_for(9, 8), 16);
        assert_eq!(bucket_count_for(64, 8), 64);
    }
}
