//! Pure, stateless shard-routing functions.
//!
//! These are the language-independent contract: the same `topic_id` or
//! `keyword` must route to the same shard regardless of which
//! implementation (this one, or the Python original) computes it.

use crate::core::types::TopicId;

/// First lower-cased ASCII letter of `keyword`, mapped to one of five
/// buckets. Non-letters (and the empty string) route to `"u-z"`.
pub fn keyword_bucket(keyword: &str) -> &'static str {
    let first = keyword.chars().next().map(|c| c.to_ascii_lowercase());
    match first {
        Some(c) if ('a'..='e').contains(&c) => "a-e",
        Some(c) if ('f'..='j').contains(&c) => "f-j",
        Some(c) if ('k'..='o').contains(&c) => "k-o",
        Some(c) if ('p'..='t').contains(&c) => "p-t",
        _ => "u-z",
    }
}

/// `md5(topic_id)` interpreted as a big-endian integer, mod `shard_count`.
pub fn topic_shard(topic_id: &TopicId, shard_count: usize) -> usize {
    topic_shard_str(topic_id.as_str(), shard_count)
}

pub fn topic_shard_str(topic_id: &str, shard_count: usize) -> usize {
    assert!(shard_count > 0, "shard_count must be positive");
    let digest = md5::compute(topic_id.as_bytes());
    let hash_int = u128::from_be_bytes(digest.0);
    (hash_int % shard_count as u128) as usize
}

/// Characters of `topic_id` before the first `/`, or `"uncategorized"`.
pub fn category(topic_id: &TopicId) -> &str {
    topic_id.category()
}
