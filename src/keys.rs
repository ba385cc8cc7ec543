/// The KV store key for an envelope by id
pub fn envelope_key(id: &str) -> String {
    format!("jobs/{}", id)
}

/// Inclusive scan bounds covering every envelope key.
/// 0xFF never appears in a uuid, so prefix + 0xFF is a safe upper bound.
pub fn envelope_scan_bounds() -> (Vec<u8>, Vec<u8>) {
    let start = b"jobs/".to_vec();
    let mut end = start.clone();
    end.push(0xFF);
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_key_format() {
        assert_eq!(envelope_key("abc-123"), "jobs/abc-123");
    }

    #[test]
    fn test_scan_bounds_cover_all_envelope_keys() {
        let (start, end) = envelope_scan_bounds();
        let key = envelope_key("00000000-0000-0000-0000-000000000000");
        assert!(start.as_slice() <= key.as_bytes());
        assert!(key.as_bytes() <= end.as_slice());

        // Keys outside the prefix fall outside the bounds
        assert!(b"lease/x".as_slice() > end.as_slice());
        assert!(b"a".as_slice() < start.as_slice());
    }
}
