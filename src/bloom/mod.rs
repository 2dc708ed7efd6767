pub mod filter;

pub use filter::{BloomFilter, MultiBloomFilter};
