//! Byte layout of the persisted records.
//!
//! Every key carries a two-byte domain prefix so iteration can be scoped:
//! `"f:" + <path bytes>` maps to an 8-byte big-endian frame ID, and
//! `"s:" + <8-byte BE id> + <8-byte BE id>` (ascending) maps to a 4-byte
//! big-endian f32 bit pattern followed by one false-positive flag byte.
//! This layout is load-bearing: state files written by older runs must keep
//! decoding bit-exactly.

use std::path::PathBuf;

pub(crate) const FRAME_PREFIX: &[u8] = b"f:";
pub(crate) const SCORE_PREFIX: &[u8] = b"s:";

const FRAME_VALUE_LEN: usize = 8;
const SCORE_KEY_LEN: usize = SCORE_PREFIX.len() + 16;
const SCORE_VALUE_LEN: usize = 5;

pub(crate) fn frame_key(path: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(FRAME_PREFIX.len() + path.len());
    key.extend_from_slice(FRAME_PREFIX);
    key.extend_from_slice(path.as_bytes());
    key
}

/// Extract the file path back out of a frame key.
pub(crate) fn frame_key_path(key: &[u8]) -> PathBuf {
    let raw = &key[FRAME_PREFIX.len().min(key.len())..];
    PathBuf::from(String::from_utf8_lossy(raw).into_owned())
}

pub(crate) fn frame_value(frame_id: u64) -> [u8; FRAME_VALUE_LEN] {
    frame_id.to_be_bytes()
}

pub(crate) fn decode_frame_value(value: &[u8]) -> Option<u64> {
    let bytes: [u8; FRAME_VALUE_LEN] = value.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

/// Canonical score key: the two IDs are stored ascending so that `(a, b)`
/// and `(b, a)` land on the same record.
pub(crate) fn score_key(frame_a: u64, frame_b: u64) -> [u8; SCORE_KEY_LEN] {
    let (lo, hi) = if frame_a <= frame_b {
        (frame_a, frame_b)
    } else {
        (frame_b, frame_a)
    };

    let mut key = [0u8; SCORE_KEY_LEN];
    key[..SCORE_PREFIX.len()].copy_from_slice(SCORE_PREFIX);
    key[SCORE_PREFIX.len()..SCORE_PREFIX.len() + 8].copy_from_slice(&lo.to_be_bytes());
    key[SCORE_PREFIX.len() + 8..].copy_from_slice(&hi.to_be_bytes());
    key
}

pub(crate) fn decode_score_key(key: &[u8]) -> Option<(u64, u64)> {
    if key.len() != SCORE_KEY_LEN {
        return None;
    }

    let lo = u64::from_be_bytes(key[SCORE_PREFIX.len()..SCORE_PREFIX.len() + 8].try_into().ok()?);
    let hi = u64::from_be_bytes(key[SCORE_PREFIX.len() + 8..].try_into().ok()?);
    Some((lo, hi))
}

pub(crate) fn score_value(score: f32, false_positive: bool) -> [u8; SCORE_VALUE_LEN] {
    let mut value = [0u8; SCORE_VALUE_LEN];
    value[..4].copy_from_slice(&score.to_bits().to_be_bytes());
    value[4] = false_positive as u8;
    value
}

pub(crate) fn decode_score_value(value: &[u8]) -> Option<(f32, bool)> {
    if value.len() != SCORE_VALUE_LEN {
        return None;
    }

    let bits = u32::from_be_bytes(value[..4].try_into().ok()?);
    Some((f32::from_bits(bits), value[4] != 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_value_round_trips() {
        for frame_id in [1u64, 2, 255, 256, 1_000_000, i64::MAX as u64] {
            let encoded = frame_value(frame_id);
            assert_eq!(encoded.len(), 8);
            assert_eq!(decode_frame_value(&encoded), Some(frame_id));
        }
    }

    #[test]
    fn frame_value_rejects_wrong_length() {
        assert_eq!(decode_frame_value(&[1]), None);
        assert_eq!(decode_frame_value(&[0; 9]), None);
    }

    #[test]
    fn frame_key_round_trips_path() {
        let key = frame_key("videos/holiday 2019.mp4");
        assert!(key.starts_with(b"f:"));
        assert_eq!(frame_key_path(&key), PathBuf::from("videos/holiday 2019.mp4"));
    }

    #[test]
    fn score_key_is_order_independent() {
        assert_eq!(score_key(7, 3), score_key(3, 7));
        assert_eq!(decode_score_key(&score_key(7, 3)), Some((3, 7)));
    }

    #[test]
    fn score_key_layout_is_stable() {
        let key = score_key(1, 2);
        let mut expected = vec![b's', b':'];
        expected.extend_from_slice(&1u64.to_be_bytes());
        expected.extend_from_slice(&2u64.to_be_bytes());
        assert_eq!(key.to_vec(), expected);
    }

    #[test]
    fn score_value_preserves_bit_pattern_and_flag() {
        for score in [0.001f32, 0.1, 0.5, 1.0, f32::MIN_POSITIVE] {
            for flag in [false, true] {
                let encoded = score_value(score, flag);
                let (decoded, decoded_flag) = decode_score_value(&encoded).unwrap();
                assert_eq!(decoded.to_bits(), score.to_bits());
                assert_eq!(decoded_flag, flag);
            }
        }
    }

    #[test]
    fn score_value_rejects_wrong_length() {
        assert_eq!(decode_score_value(&[0; 4]), None);
        assert_eq!(decode_score_value(&[0; 6]), None);
    }
}
