//! Shared-secret sealing for the legacy datagram path.
//!
//! A sealed frame is `HMAC-SHA256(secret, payload) || payload`; the digest
//! covers the payload only.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const DIGEST_LEN: usize = 32;

pub fn seal(secret: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(payload);
    let digest = mac.finalize().into_bytes();
    let mut frame = Vec::with_capacity(DIGEST_LEN + payload.len());
    frame.extend_from_slice(&digest);
    frame.extend_from_slice(payload);
    frame
}

/// Returns the payload when the frame's digest verifies.
pub fn open<'a>(secret: &[u8], frame: &'a [u8]) -> Option<&'a [u8]> {
    if frame.len() < DIGEST_LEN {
        return None;
    }
    let (digest, payload) = frame.split_at(DIGEST_LEN);
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(payload);
    mac.verify_slice(digest).ok()?;
    Some(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_frames_open_with_the_right_secret() {
        let frame = seal(b"secret", b"payload");
        assert_eq!(open(b"secret", &frame), Some(&b"payload"[..]));
    }

    #[test]
    fn rejects_the_wrong_secret() {
        let frame = seal(b"secret", b"payload");
        assert_eq!(open(b"other", &frame), None);
    }

    #[test]
    fn rejects_tampered_payloads() {
        let mut frame = seal(b"secret", b"payload");
        let last = frame.len() - 1;
        frame[last] ^= 1;
        assert_eq!(open(b"secret", &frame), None);
    }

    #[test]
    fn rejects_truncated_frames() {
        assert_eq!(open(b"secret", b"short"), None);
    }
}
