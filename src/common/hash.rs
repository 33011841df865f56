//! Key routing
//!
//! Keys are assigned to shards with CRC-32/IEEE so every replica computes the
//! same placement without coordination. Shard ids are 1-based.

/// Checksum used for placement.
pub fn checksum32(key: &str) -> u32 {
    crc32fast::hash(key.as_bytes())
}

/// Compute the shard id (`1..=shard_count`) owning `key`.
///
/// The result depends on `shard_count`, so it must be recomputed after every
/// reshard. A zero count is treated as a single shard.
pub fn route_key(key: &str, shard_count: u64) -> u64 {
    (checksum32(key) as u64 % shard_count.max(1)) + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_crc32_ieee() {
        // Standard CRC-32/IEEE check value
        assert_eq!(checksum32("123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_route_key_deterministic() {
        for count in 1..8 {
            assert_eq!(route_key("test-key", count), route_key("test-key", count));
        }
    }

    #[test]
    fn test_route_key_range() {
        for i in 0..1000 {
            let shard = route_key(&format!("key-{}", i), 3);
            assert!((1..=3).contains(&shard));
        }
        assert_eq!(route_key("anything", 1), 1);
        assert_eq!(route_key("anything", 0), 1);
    }

    #[test]
    fn test_route_key_roughly_uniform() {
        let shards = 4u64;
        let keys = 20_000;
        let mut counts = vec![0usize; shards as usize];
        for i in 0..keys {
            let shard = route_key(&format!("user:{}:{}", i, i * 7919), shards);
            counts[(shard - 1) as usize] += 1;
        }
        let expected = keys / shards as usize;
        for count in counts {
            // within 20% of a perfect split
            assert!(count > expected * 8 / 10 && count < expected * 12 / 10, "{}", count);
        }
    }
}
