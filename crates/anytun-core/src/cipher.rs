// SPDX-License-Identifier: MIT

//! AES-CTR transform whose IV is built from the packet header and a
//! per-packet session salt pulled out of [`KeyDerivation`].

use crate::keyderivation::{Direction, KeyDerivation, Label};
use aes::cipher::{KeyIvInit, StreamCipher};
use aes::{Aes128, Aes192, Aes256};
use ctr::Ctr128BE;

type Aes128Ctr = Ctr128BE<Aes128>;
type Aes192Ctr = Ctr128BE<Aes192>;
type Aes256Ctr = Ctr128BE<Aes256>;

fn packet_iv(mux: u16, sender_id: u16, seq_nr: u32) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[6..8].copy_from_slice(&mux.to_be_bytes());
    iv[8..10].copy_from_slice(&sender_id.to_be_bytes());
    let high: u16 = (seq_nr >> 16) as u16;
    iv[12..14].copy_from_slice(&high.to_be_bytes());
    iv
}

fn xor_salt(iv: &mut [u8; 16], salt: &[u8]) {
    for (b, s) in iv[0..14].iter_mut().zip(salt.iter()) {
        *b ^= s;
    }
}

/// Full counter block is the IV: `Ctr128BE` treats it as one big-endian
/// 128-bit counter incremented once per 16-byte keystream block, which
/// matches SATP's own counter construction byte-for-byte.
fn ctr_xor(key: &[u8], iv: [u8; 16], data: &mut [u8]) {
    match key.len() {
        16 => {
            if let Ok(mut cipher) = Aes128Ctr::new_from_slices(key, &iv) {
                cipher.apply_keystream(data);
            }
        }
        24 => {
            if let Ok(mut cipher) = Aes192Ctr::new_from_slices(key, &iv) {
                cipher.apply_keystream(data);
            }
        }
        32 => {
            if let Ok(mut cipher) = Aes256Ctr::new_from_slices(key, &iv) {
                cipher.apply_keystream(data);
            }
        }
        _ => {}
    }
}

/// AES-CTR cipher bound to one connection's key derivation.
pub struct Cipher;

impl Cipher {
    /// Encrypt `plain` in place into `out`, deriving the session key
    /// and salt for `(dir, seq_nr)` from `kd`.
    pub fn transform(kd: &KeyDerivation, dir: Direction, seq_nr: u32, sender_id: u16, mux: u16, data: &mut [u8]) {
        let salt = kd.generate(dir, Label::Salt, seq_nr, 14);
        let mut iv = packet_iv(mux, sender_id, seq_nr);
        xor_salt(&mut iv, &salt);
        let key = kd.generate(dir, Label::Enc, seq_nr, kd.key_length() as usize / 8);
        ctr_xor(&key, iv, data);
    }
}

/// Null cipher: identity transform, used when encryption is disabled.
pub struct NullCipher;

impl NullCipher {
    pub fn transform(_data: &mut [u8]) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyderivation::Role;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let master_key: Vec<u8> = (1u8..=16).collect();
        let master_salt = [0u8; 14];
        let kd_left = KeyDerivation::new(Role::Left, 128, &master_key, &master_salt).unwrap();
        let kd_right = KeyDerivation::new(Role::Right, 128, &master_key, &master_salt).unwrap();

        let plain = b"hello satp world".to_vec();
        let mut ciphertext = plain.clone();
        Cipher::transform(&kd_left, Direction::Outbound, 5, 1, 2, &mut ciphertext);
        assert_ne!(ciphertext, plain);

        // Only the peer (opposite role) can decrypt: `kd_left` derives a
        // different keystream for Inbound than the one it just used for
        // Outbound, so a same-instance "roundtrip" is not meaningful here.
        let mut peer_view = ciphertext;
        Cipher::transform(&kd_right, Direction::Inbound, 5, 1, 2, &mut peer_view);
        assert_eq!(peer_view, plain);
    }

    #[test]
    fn packet_iv_layout() {
        let iv = packet_iv(0x1234, 0x5678, 0xAABBCCDD);
        assert_eq!(iv[6..8], [0x12, 0x34]);
        assert_eq!(iv[8..10], [0x56, 0x78]);
        assert_eq!(iv[12..14], [0xAA, 0xBB]);
        assert_eq!(iv[14..16], [0, 0]);
    }

    #[test]
    fn null_cipher_is_identity() {
        let mut data = b"unchanged".to_vec();
        let before = data.clone();
        NullCipher::transform(&mut data);
        assert_eq!(data, before);
    }
}
