//! Worker identity: a 40-hex string encoding a creation instant, usable for
//! lexical expiry comparisons without decoding.

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;

const TIME_HEX_LEN: usize = 16;
const RAND_HEX_LEN: usize = 24;
const RAND_BYTES: usize = RAND_HEX_LEN / 2;

/// Create a fresh worker id: 16 hex digits of the current time in
/// milliseconds since the epoch, followed by 24 hex digits of
/// cryptographically-strong randomness.
pub fn create_worker_id() -> String {
    encode(Utc::now(), &mut OsRng)
}

/// Encode the lexical threshold below which a worker id is considered
/// expired at instant `t`: the time component of `t`, zero-padded random
/// tail. For any real worker id `w`, `w <= encode_expired_threshold(t)`
/// iff `w` was created at or before `t`.
pub fn encode_expired_threshold(t: DateTime<Utc>) -> String {
    format!("{}{}", time_hex(t), "0".repeat(RAND_HEX_LEN))
}

fn encode(t: DateTime<Utc>, rng: &mut impl RngCore) -> String {
    let mut rand_bytes = [0u8; RAND_BYTES];
    rng.fill_bytes(&mut rand_bytes);
    format!("{}{}", time_hex(t), hex::encode(rand_bytes))
}

fn time_hex(t: DateTime<Utc>) -> String {
    let millis = t.timestamp_millis().max(0) as u64;
    format!("{millis:0width$x}", width = TIME_HEX_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    /// Deterministic RNG for tests: we only care about time-component
    /// ordering here, not randomness quality.
    struct FixedRng;
    impl RngCore for FixedRng {
        fn next_u32(&mut self) -> u32 {
            0
        }
        fn next_u64(&mut self) -> u64 {
            0
        }
        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(0);
        }
    }

    #[test]
    fn worker_id_is_40_lowercase_hex_chars() {
        let id = create_worker_id();
        assert_eq!(id.len(), 40);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
    }

    #[test]
    fn expired_threshold_is_40_chars_with_zero_tail() {
        let t = Utc::now();
        let threshold = encode_expired_threshold(t);
        assert_eq!(threshold.len(), 40);
        assert!(threshold.ends_with(&"0".repeat(RAND_HEX_LEN)));
    }

    #[test]
    fn lexical_order_matches_creation_order() {
        let mut rng = FixedRng;
        let earlier = Utc::now() - Duration::seconds(5);
        let later = Utc::now();

        let id_earlier = encode(earlier, &mut rng);
        let id_later = encode(later, &mut rng);

        assert!(id_earlier < id_later);
    }

    #[test]
    fn threshold_comparison_matches_chronology() {
        let mut rng = FixedRng;
        let now = Utc::now();
        let threshold = encode_expired_threshold(now);

        let created_before = encode(now - Duration::seconds(1), &mut rng);
        let created_at = encode(now, &mut rng);
        let created_after = encode(now + Duration::seconds(1), &mut rng);

        assert!(created_before <= threshold);
        assert!(created_at <= threshold);
        assert!(created_after > threshold);
    }
}
