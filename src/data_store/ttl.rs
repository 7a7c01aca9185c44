//! TTL suffix encoding and the compaction filter that reclaims expired
//! entries.

use crate::clock::{now_nanos, split_ttl_suffix, with_ttl_suffix};
use rocksdb::compaction_filter::Decision;

/// Wraps a value with the current timestamp when TTL mode is on; a no-op
/// when it's off, so callers don't need to branch on TTL mode themselves.
pub fn encode_for_storage(value: &[u8], ttl_enabled: bool) -> Vec<u8> {
    if ttl_enabled {
        with_ttl_suffix(value, now_nanos())
    } else {
        value.to_vec()
    }
}

/// Strips the TTL suffix back off, when present.
pub fn decode_from_storage(stored: &[u8], ttl_enabled: bool) -> Vec<u8> {
    if ttl_enabled {
        split_ttl_suffix(stored)
            .map(|(value, _)| value.to_vec())
            .unwrap_or_else(|| stored.to_vec())
    } else {
        stored.to_vec()
    }
}

/// Builds the compaction-filter closure installed on the "data" column
/// family only; the "meta" namespace never gets one.
pub fn make_compaction_filter(
    ttl_nanos: u64,
) -> impl Fn(u32, &[u8], &[u8]) -> Decision + Send + 'static {
    move |_level: u32, _key: &[u8], value: &[u8]| match split_ttl_suffix(value) {
        Some((_, ts_nanos)) => {
            let age = now_nanos().saturating_sub(ts_nanos);
            if age > ttl_nanos {
                Decision::Remove
            } else {
                Decision::Keep
            }
        }
        None => Decision::Keep,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn round_trips_through_encode_decode() {
        let encoded = encode_for_storage(b"payload", true);
        assert_eq!(decode_from_storage(&encoded, true), b"payload");
    }

    #[test]
    fn filter_keeps_fresh_and_removes_stale() {
        let filter = make_compaction_filter(Duration::from_secs(1).as_nanos() as u64);
        let fresh = with_ttl_suffix(b"v", now_nanos());
        assert!(matches!(filter(0, b"k", &fresh), Decision::Keep));

        let stale = with_ttl_suffix(b"v", now_nanos().saturating_sub(5_000_000_000));
        assert!(matches!(filter(0, b"k", &stale), Decision::Remove));
    }
}
