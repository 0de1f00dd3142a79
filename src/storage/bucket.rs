//! Topic filter to subscription bucket mapping.

use std::hash::Hasher;

use fnv::FnvHasher;

/// Map a topic filter to a bucket in `[0, bucket_count)`.
///
/// FNV-1a over the filter bytes: stable across processes, builds and
/// restarts, which the on-disk layout depends on. A `bucket_count` of 0 is
/// treated as 1.
pub fn bucket_of(topic_filter: &str, bucket_count: u32) -> u32 {
    let mut hasher = FnvHasher::default();
    hasher.write(topic_filter.as_bytes());
    (hasher.finish() % u64::from(bucket_count.max(1))) as u32
}
