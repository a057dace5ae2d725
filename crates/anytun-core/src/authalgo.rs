// SPDX-License-Identifier: MIT

//! HMAC-SHA1 packet authentication, truncated to a configurable tag
//! length.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;

use crate::keyderivation::{Direction, KeyDerivation, Label};

type HmacSha1 = Hmac<Sha1>;

/// HMAC-SHA1 authentication bound to one connection's key derivation.
pub struct AuthAlgo {
    tag_len: usize,
}

impl AuthAlgo {
    /// `tag_len` is the number of left-most HMAC-SHA1 bytes appended
    /// to a packet; must be `0..=20`. `0` behaves as the null variant.
    pub fn new(tag_len: usize) -> Self {
        debug_assert!(tag_len <= 20);
        Self { tag_len }
    }

    pub fn tag_len(&self) -> usize {
        self.tag_len
    }

    /// Compute the tag for `auth_portion` under the per-packet auth
    /// key derived from `kd` for `(dir, seq_nr)`.
    pub fn generate(&self, kd: &KeyDerivation, dir: Direction, seq_nr: u32, auth_portion: &[u8]) -> Vec<u8> {
        if self.tag_len == 0 {
            return Vec::new();
        }
        let key = kd.generate(dir, Label::Auth, seq_nr, 20);
        let mut mac = HmacSha1::new_from_slice(&key).expect("HMAC accepts any key length");
        mac.update(auth_portion);
        let full = mac.finalize().into_bytes();
        full[..self.tag_len].to_vec()
    }

    /// Verify `tag` against `auth_portion`. A zero-length tag
    /// (`tag_len == 0`) always verifies.
    pub fn verify(&self, kd: &KeyDerivation, dir: Direction, seq_nr: u32, auth_portion: &[u8], tag: &[u8]) -> bool {
        if self.tag_len == 0 {
            return true;
        }
        if tag.len() != self.tag_len {
            return false;
        }
        let expected = self.generate(kd, dir, seq_nr, auth_portion);
        expected.ct_eq(tag).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyderivation::Role;

    fn test_kd() -> KeyDerivation {
        let master_key: Vec<u8> = (1u8..=16).collect();
        let master_salt = [0u8; 14];
        KeyDerivation::new(Role::Left, 128, &master_key, &master_salt).unwrap()
    }

    #[test]
    fn generate_and_verify_roundtrip() {
        let kd = test_kd();
        let auth = AuthAlgo::new(10);
        let data = b"header+ciphertext";
        let tag = auth.generate(&kd, Direction::Outbound, 1, data);
        assert_eq!(tag.len(), 10);
        assert!(auth.verify(&kd, Direction::Outbound, 1, data, &tag));
    }

    #[test]
    fn tampered_payload_fails_verify() {
        let kd = test_kd();
        let auth = AuthAlgo::new(10);
        let tag = auth.generate(&kd, Direction::Outbound, 1, b"original data here");
        assert!(!auth.verify(&kd, Direction::Outbound, 1, b"tampered data here!", &tag));
    }

    #[test]
    fn null_auth_accepts_unconditionally() {
        let kd = test_kd();
        let auth = AuthAlgo::new(0);
        assert!(auth.verify(&kd, Direction::Outbound, 1, b"anything", &[]));
    }
}
