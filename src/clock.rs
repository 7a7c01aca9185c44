//! Encoding helpers for the logical clock and the reserved meta key.
//!
//! The logical clock is a strictly monotonic `u64` per core. It is encoded
//! big-endian everywhere it is persisted so that lexical key order matches
//! numeric order, which is what makes `delete_range` on the instruction log
//! a single physical range operation instead of a scan-and-delete.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Reserved key under which the current clock value lives, both in the
/// instruction log (the "accepted" `tick`) and in the data store's meta
/// namespace (the "applied" `clocked`). The two live in separate column
/// families / separate `rocksdb::DB` instances, so reusing the same bytes
/// does not collide.
pub const CLOCK_K: &[u8] = b"__core_clock__";

/// Encodes a clock value as 8 big-endian bytes.
pub fn encode_clock(clock: u64) -> [u8; 8] {
    clock.to_be_bytes()
}

/// Decodes a clock value from its leading 8 big-endian bytes.
///
/// Returns `None` if fewer than 8 bytes are available (a malformed or
/// truncated record).
pub fn decode_clock(bytes: &[u8]) -> Option<u64> {
    bytes
        .get(..8)
        .map(|head| u64::from_be_bytes(head.try_into().unwrap()))
}

/// Appends an 8-byte big-endian TTL timestamp (nanoseconds since epoch) to
/// a value, for values stored under TTL mode.
pub fn with_ttl_suffix(value: &[u8], ts_nanos: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() + 8);
    out.extend_from_slice(value);
    out.extend_from_slice(&ts_nanos.to_be_bytes());
    out
}

/// Splits a TTL-suffixed value into `(value, ts_nanos)`.
///
/// Returns `None` if the buffer is too short to carry a suffix.
pub fn split_ttl_suffix(buf: &[u8]) -> Option<(&[u8], u64)> {
    if buf.len() < 8 {
        return None;
    }
    let (value, suffix) = buf.split_at(buf.len() - 8);
    Some((value, u64::from_be_bytes(suffix.try_into().unwrap())))
}

/// Current wall-clock time as nanoseconds since the Unix epoch.
pub fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

static LAST_ISSUED_NANOS: AtomicU64 = AtomicU64::new(0);

/// A nanosecond timestamp guaranteed to be strictly greater than every
/// previously issued value from this process, even if the wall clock has
/// not advanced since the last call. Checkpoint directory names need this:
/// they're named `local-<nanos>` and rely on directory-name order
/// equalling creation order.
pub fn monotonic_nanos() -> u64 {
    let mut last = LAST_ISSUED_NANOS.load(Ordering::Relaxed);
    loop {
        let candidate = now_nanos().max(last.saturating_add(1));
        match LAST_ISSUED_NANOS.compare_exchange_weak(
            last,
            candidate,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return candidate,
            Err(observed) => last = observed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_round_trips_through_big_endian_bytes() {
        for clock in [0u64, 1, 255, 256, u64::MAX] {
            let encoded = encode_clock(clock);
            assert_eq!(decode_clock(&encoded), Some(clock));
        }
    }

    #[test]
    fn big_endian_order_matches_numeric_order() {
        let a = encode_clock(5);
        let b = encode_clock(300);
        assert!(a.as_slice() < b.as_slice());
    }

    #[test]
    fn ttl_suffix_round_trips() {
        let value = b"hello";
        let suffixed = with_ttl_suffix(value, 123456789);
        let (decoded_value, ts) = split_ttl_suffix(&suffixed).unwrap();
        assert_eq!(decoded_value, value);
        assert_eq!(ts, 123456789);
    }

    #[test]
    fn monotonic_nanos_is_strictly_increasing() {
        let mut previous = monotonic_nanos();
        for _ in 0..1000 {
            let next = monotonic_nanos();
            assert!(next > previous);
            previous = next;
        }
    }
}
