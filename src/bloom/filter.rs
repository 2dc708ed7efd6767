//! Space-efficient probabilistic set membership testing, persisted at
//! `_index/bloom.json` and consulted before loading a keyword or category
//! shard off disk.
//!
//! False positive rate is configurable; false negatives never happen:
//! `might_contain` returning `false` is a guarantee, not a hint.

use serde::{Deserialize, Serialize};

/// Single-set Bloom filter over a fixed bit array, backed by MD5-seeded
/// hashing so the bit positions are stable across processes (needed since
/// the filter is serialized to disk and reloaded by other readers).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloomFilter {
    size: usize,
    hash_count: u32,
    expected_items: usize,
    false_positive_rate: f64,
    items_added: usize,
    bit_array: Vec<u8>,
}

impl BloomFilter {
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        let size = Self::optimal_size(expected_items, false_positive_rate);
        let hash_count = Self::optimal_hash_count(size, expected_items);
        BloomFilter {
            size,
            hash_count,
            expected_items,
            false_positive_rate,
            items_added: 0,
            bit_array: vec![0u8; size],
        }
    }

    fn optimal_size(n: usize, p: f64) -> usize {
        let n = n.max(1) as f64;
        let m = -(n * p.ln()) / (std::f64::consts::LN_2.powi(2));
        m.ceil().max(1.0) as usize
    }

    fn optimal_hash_count(m: usize, n: usize) -> u32 {
        let n = n.max(1) as f64;
        let k = (m as f64 / n) * std::f64::consts::LN_2;
        (k.ceil() as u32).max(1)
    }

    fn hash(&self, item: &str, seed: u32) -> usize {
        let input = format!("{item}:{seed}");
        let digest = md5::compute(input.as_bytes());
        let hash_int = u128::from_be_bytes(digest.0);
        (hash_int % self.size as u128) as usize
    }

    pub fn add(&mut self, item: &str) {
        let item = item.to_lowercase();
        for seed in 0..self.hash_count {
            let idx = self.hash(&item, seed);
            self.bit_array[idx] = 1;
        }
        self.items_added += 1;
    }

    /// `false` is a guarantee the item was never added. `true` means it
    /// probably was, modulo `actual_false_positive_rate`.
    pub fn might_contain(&self, item: &str) -> bool {
        let item = item.to_lowercase();
        (0..self.hash_count).all(|seed| self.bit_array[self.hash(&item, seed)] == 1)
    }

    pub fn actual_false_positive_rate(&self) -> f64 {
        if self.items_added == 0 {
            return 0.0;
        }
        let k = self.hash_count as f64;
        let n = self.items_added as f64;
        let m = self.size as f64;
        (1.0 - (-k * n / m).exp()).powf(k)
    }

    pub fn fill_ratio(&self) -> f64 {
        let set_bits: usize = self.bit_array.iter().filter(|&&b| b == 1).count();
        set_bits as f64 / self.size as f64
    }

    pub fn items_added(&self) -> usize {
        self.items_added
    }
}

/// Two independent filters, one over keywords and one over categories,
/// persisted together at `_index/bloom.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiBloomFilter {
    keyword_filter: BloomFilter,
    category_filter: BloomFilter,
}

impl MultiBloomFilter {
    pub fn new(expected_keywords: usize, expected_categories: usize, false_positive_rate: f64) -> Self {
        MultiBloomFilter {
            keyword_filter: BloomFilter::new(expected_keywords, false_positive_rate),
            category_filter: BloomFilter::new(expected_categories, false_positive_rate),
        }
    }

    pub fn add_keyword(&mut self, keyword: &str) {
        self.keyword_filter.add(keyword);
    }

    pub fn add_category(&mut self, category: &str) {
        self.category_filter.add(category);
    }

    pub fn keyword_might_exist(&self, keyword: &str) -> bool {
        self.keyword_filter.might_contain(keyword)
    }

    pub fn category_might_exist(&self, category: &str) -> bool {
        self.category_filter.might_contain(category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_false_negatives() {
        let mut bf = BloomFilter::new(1000, 0.01);
        let words = ["python", "async", "gil", "rust", "ownership"];
        for w in &words {
            bf.add(w);
        }
        for w in &words {
            assert!(bf.might_contain(w));
        }
    }

    #[test]
    fn absent_item_usually_rejected() {
        let mut bf = BloomFilter::new(1000, 0.01);
        bf.add("python");
        assert!(!bf.might_contain("zzzznotadded"));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let mut bf = BloomFilter::new(100, 0.01);
        bf.add("Python");
        assert!(bf.might_contain("python"));
        assert!(bf.might_contain("PYTHON"));
    }

    #[test]
    fn actual_fp_rate_tracks_target_order_of_magnitude() {
        let mut bf = BloomFilter::new(1000, 0.01);
        for i in 0..1000 {
            bf.add(&format!("key-{i}"));
        }
        let mut false_positives = 0;
        let trials = 5000;
        for i in 1000..(1000 + trials) {
            if bf.might_contain(&format!("key-{i}")) {
                false_positives += 1;
            }
        }
        let observed = false_positives as f64 / trials as f64;
        assert!(observed < 0.05, "observed fp rate too high: {observed}");
    }

    #[test]
    fn serde_round_trips() {
        let mut bf = BloomFilter::new(100, 0.01);
        bf.add("python");
        let json = serde_json::to_vec(&bf).unwrap();
        let restored: BloomFilter = serde_json::from_slice(&json).unwrap();
        assert!(restored.might_contain("python"));
    }

    #[test]
    fn multi_bloom_filter_tracks_independent_sets() {
        let mut mbf = MultiBloomFilter::new(100, 10, 0.01);
        mbf.add_keyword("python");
        mbf.add_category("programming");
        assert!(mbf.keyword_might_exist("python"));
        assert!(mbf.category_might_exist("programming"));
        assert!(!mbf.category_might_exist("python"));
    }
}
