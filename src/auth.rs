//! Constant-time comparison helper used by the WebSocket auth handshake
//! (spec §4.6). Carried over from the teacher's `auth.rs`; the HTTP
//! bearer-header middleware it used to back is gone — this system's auth
//! is a WebSocket JSON handshake, not an HTTP header.

/// Constant-time byte comparison to prevent timing side-channel attacks.
///
/// Always iterates over the full length of `expected` regardless of
/// `provided` length, so an attacker cannot determine the key length from
/// response times.
pub fn constant_time_eq(expected: &[u8], provided: &[u8]) -> bool {
    let mut diff = u8::from(expected.len() != provided.len());
    for i in 0..expected.len() {
        let p = if i < provided.len() { provided[i] } else { 0xff };
        diff |= expected[i] ^ p;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_keys_match() {
        assert!(constant_time_eq(b"secret", b"secret"));
    }

    #[test]
    fn different_length_does_not_match() {
        assert!(!constant_time_eq(b"secret", b"sec"));
    }

    #[test]
    fn different_content_does_not_match() {
        assert!(!constant_time_eq(b"secret", b"secreT"));
    }
}
