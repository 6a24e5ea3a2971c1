//! Fixed-size bloom filter over `u64` numeric ids, used by segments and
//! shards to short-circuit negative point lookups without a full scan.

use serde::{Deserialize, Serialize};

const DEFAULT_BITS_PER_KEY: usize = 10;
const NUM_HASHES: u32 = 7;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: usize,
}

impl BloomFilter {
    /// Builds a filter sized for `expected_keys`, at the default false
    /// positive rate (roughly 1% at 7 hashes / 10 bits-per-key).
    pub fn with_capacity(expected_keys: usize) -> Self {
        let num_bits = (expected_keys.max(1) * DEFAULT_BITS_PER_KEY).next_power_of_two();
        let words = (num_bits + 63) / 64;
        Self {
            bits: vec![0u64; words.max(1)],
            num_bits,
        }
    }

    pub fn insert(&mut self, key: u64) {
        let (h1, h2) = self.split_hash(key);
        for i in 0..NUM_HASHES {
            let idx = self.bit_index(h1, h2, i);
            self.bits[idx / 64] |= 1u64 << (idx % 64);
        }
    }

    pub fn insert_all<I: IntoIterator<Item = u64>>(&mut self, keys: I) {
        for key in keys {
            self.insert(key);
        }
    }

    /// False means "definitely absent"; true means "maybe present".
    pub fn might_contain(&self, key: u64) -> bool {
        let (h1, h2) = self.split_hash(key);
        for i in 0..NUM_HASHES {
            let idx = self.bit_index(h1, h2, i);
            if self.bits[idx / 64] & (1u64 << (idx % 64)) == 0 {
                return false;
            }
        }
        true
    }

    /// Splits a key into two independent hash values via double-hashing
    /// (Kirsch-Mitzenmacher), avoiding `NUM_HASHES` separate hash calls.
    fn split_hash(&self, key: u64) -> (u64, u64) {
        let h = blake3::hash(&key.to_le_bytes());
        let bytes = h.as_bytes();
        let h1 = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let h2 = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        (h1, h2)
    }

    fn bit_index(&self, h1: u64, h2: u64, i: u32) -> usize {
        let combined = h1.wrapping_add((i as u64).wrapping_mul(h2));
        (combined % self.num_bits as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_keys_are_found() {
        let mut filter = BloomFilter::with_capacity(1000);
        let keys: Vec<u64> = (0..500).collect();
        filter.insert_all(keys.iter().copied());
        for key in &keys {
            assert!(filter.might_contain(*key));
        }
    }

    #[test]
    fn absent_keys_are_usually_rejected() {
        let mut filter = BloomFilter::with_capacity(1000);
        filter.insert_all((0..500u64).into_iter());

        let false_positives = (10_000..20_000u64)
            .filter(|k| filter.might_contain(*k))
            .count();
        assert!(false_positives < 200, "false positive rate too high: {false_positives}");
    }
}
