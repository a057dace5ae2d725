// SPDX-License-Identifier: MIT

//! SATP key derivation: the AES-CTR based PRF that expands a shared
//! master key/salt into per-packet session keys, salts and auth keys.
//!
//! Mirrors the counter-block construction the wire format depends on
//! byte-for-byte — any change to the label table or counter layout
//! breaks interop with a peer running an unmodified build.

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Which side of a connection this peer is keying as. Determines the
/// direction -> effective-label fold so both ends derive identical
/// per-direction material from the same master key/salt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    Enc,
    Auth,
    Salt,
}

const fn effective_label(dir: Direction, role: Role, label: Label) -> u32 {
    use Direction::*;
    use Label::*;
    use Role::*;
    match (dir, label, role) {
        (Outbound, Enc, Left) => 0xDA4B_9237,
        (Outbound, Enc, Right) => 0x356A_192B,
        (Inbound, Enc, Left) => 0x356A_192B,
        (Inbound, Enc, Right) => 0xDA4B_9237,
        (Outbound, Auth, Left) => 0xC1DF_D96E,
        (Outbound, Auth, Right) => 0xAC34_78D6,
        (Inbound, Auth, Left) => 0xAC34_78D6,
        (Inbound, Auth, Right) => 0xC1DF_D96E,
        (Outbound, Salt, Left) => 0x1B64_5389,
        (Outbound, Salt, Right) => 0x77DE_68DA,
        (Inbound, Salt, Left) => 0x77DE_68DA,
        (Inbound, Salt, Right) => 0x1B64_5389,
    }
}

/// The one AES block implementation used per key length.
enum AesHandle {
    Aes128(Box<Aes128>),
    Aes192(Box<Aes192>),
    Aes256(Box<Aes256>),
}

impl AesHandle {
    fn new(key: &[u8]) -> Result<Self> {
        match key.len() {
            16 => Ok(Self::Aes128(Box::new(
                Aes128::new_from_slice(key).map_err(|e| Error::Crypto(e.to_string()))?,
            ))),
            24 => Ok(Self::Aes192(Box::new(
                Aes192::new_from_slice(key).map_err(|e| Error::Crypto(e.to_string()))?,
            ))),
            32 => Ok(Self::Aes256(Box::new(
                Aes256::new_from_slice(key).map_err(|e| Error::Crypto(e.to_string()))?,
            ))),
            n => Err(Error::Config(format!("invalid master key length {n}"))),
        }
    }

    fn encrypt_block(&self, block: &mut [u8; 16]) {
        let ga = GenericArray::from_mut_slice(block);
        match self {
            Self::Aes128(h) => h.encrypt_block(ga),
            Self::Aes192(h) => h.encrypt_block(ga),
            Self::Aes256(h) => h.encrypt_block(ga),
        }
    }
}

/// Produces session key/salt/auth-key material from a shared master
/// key and salt, per role and direction. Not the null variant — see
/// [`NullKeyDerivation`] for the disabled-crypto path.
pub struct KeyDerivation {
    role: Role,
    key_length: u16,
    master_key: Zeroizing<Vec<u8>>,
    master_salt: [u8; 14],
    aes: AesHandle,
}

impl KeyDerivation {
    /// Build directly from raw master key/salt bytes. `key_length` is
    /// in bits (128/192/256) and must match `master_key.len() * 8`.
    pub fn new(role: Role, key_length: u16, master_key: &[u8], master_salt: &[u8]) -> Result<Self> {
        if master_key.len() * 8 != key_length as usize {
            return Err(Error::Config(format!(
                "master key length {} does not match key_length {}",
                master_key.len(),
                key_length
            )));
        }
        if master_salt.len() != 14 {
            return Err(Error::Config(format!(
                "master salt must be 14 bytes, got {}",
                master_salt.len()
            )));
        }
        let aes = AesHandle::new(master_key)?;
        let mut salt = [0u8; 14];
        salt.copy_from_slice(master_salt);
        Ok(Self {
            role,
            key_length,
            master_key: Zeroizing::new(master_key.to_vec()),
            master_salt: salt,
            aes,
        })
    }

    /// Derive `(master_key, master_salt)` from a UTF-8 passphrase per
    /// the key-length-selected SHA variant, then build the handle.
    pub fn from_passphrase(role: Role, key_length: u16, passphrase: &str) -> Result<Self> {
        let master_key = match key_length {
            128 => Sha256::digest(passphrase.as_bytes())[..16].to_vec(),
            192 => Sha384::digest(passphrase.as_bytes())[..24].to_vec(),
            256 => Sha512::digest(passphrase.as_bytes())[..32].to_vec(),
            n => return Err(Error::Config(format!("unsupported key length {n}"))),
        };
        let sha1_digest = Sha1::digest(passphrase.as_bytes());
        let master_salt = &sha1_digest[sha1_digest.len() - 14..];
        Self::new(role, key_length, &master_key, master_salt)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn key_length(&self) -> u16 {
        self.key_length
    }

    pub fn master_key(&self) -> &[u8] {
        &self.master_key
    }

    pub fn master_salt(&self) -> &[u8; 14] {
        &self.master_salt
    }

    /// Produce `requested_length` bytes of PRF output for
    /// `(direction, label, seq_nr)`.
    pub fn generate(&self, dir: Direction, label: Label, seq_nr: u32, requested_length: usize) -> Vec<u8> {
        let eff = effective_label(dir, self.role, label);
        let mut counter = [0u8; 16];
        counter[6..10].copy_from_slice(&eff.to_be_bytes());
        counter[10..14].copy_from_slice(&seq_nr.to_be_bytes());
        for (c, s) in counter[0..14].iter_mut().zip(self.master_salt.iter()) {
            *c ^= s;
        }
        self.keystream(counter, requested_length)
    }

    fn keystream(&self, mut block: [u8; 16], requested_length: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(requested_length);
        let mut counter_val = u128::from_be_bytes(block);
        while out.len() < requested_length {
            let mut b = counter_val.to_be_bytes();
            self.aes.encrypt_block(&mut b);
            let remaining = requested_length - out.len();
            out.extend_from_slice(&b[..remaining.min(16)]);
            counter_val = counter_val.wrapping_add(1);
        }
        let _ = &mut block;
        out
    }
}

/// The null key derivation: always returns all-zero material. Used
/// when both cipher and auth are disabled for a connection.
pub struct NullKeyDerivation;

impl NullKeyDerivation {
    pub fn generate(&self, _dir: Direction, _label: Label, _seq_nr: u32, requested_length: usize) -> Vec<u8> {
        vec![0u8; requested_length]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kdf_golden_vector() {
        let master_key: Vec<u8> = (1u8..=16).collect();
        let mut master_salt = [0u8; 14];
        master_salt[13] = 0x0D;
        let kd = KeyDerivation::new(Role::Left, 128, &master_key, &master_salt).unwrap();
        let out = kd.generate(Direction::Outbound, Label::Enc, 0, 16);
        assert_eq!(out.len(), 16);

        let eff = effective_label(Direction::Outbound, Role::Left, Label::Enc);
        assert_eq!(eff, 0xDA4B_9237);
        let mut counter = [0u8; 16];
        counter[6..10].copy_from_slice(&eff.to_be_bytes());
        for (c, s) in counter[0..14].iter_mut().zip(master_salt.iter()) {
            *c ^= s;
        }
        let aes = AesHandle::new(&master_key).unwrap();
        let mut expected = counter;
        aes.encrypt_block(&mut expected);
        assert_eq!(out, expected.to_vec());
    }

    #[test]
    fn role_swap_produces_matching_labels() {
        assert_eq!(
            effective_label(Direction::Outbound, Role::Left, Label::Enc),
            effective_label(Direction::Inbound, Role::Right, Label::Enc)
        );
        assert_eq!(
            effective_label(Direction::Outbound, Role::Right, Label::Auth),
            effective_label(Direction::Inbound, Role::Left, Label::Auth)
        );
    }

    #[test]
    fn null_kd_is_all_zero() {
        let nkd = NullKeyDerivation;
        let out = nkd.generate(Direction::Outbound, Label::Salt, 42, 14);
        assert_eq!(out, vec![0u8; 14]);
    }

    #[test]
    fn passphrase_derivation_produces_correct_lengths() {
        let kd = KeyDerivation::from_passphrase(Role::Left, 256, "correct horse battery staple").unwrap();
        assert_eq!(kd.master_key().len(), 32);
        assert_eq!(kd.master_salt().len(), 14);
    }

    #[test]
    fn generate_output_length_spans_multiple_blocks() {
        let master_key: Vec<u8> = (1u8..=16).collect();
        let master_salt = [0u8; 14];
        let kd = KeyDerivation::new(Role::Left, 128, &master_key, &master_salt).unwrap();
        let out = kd.generate(Direction::Outbound, Label::Auth, 7, 20);
        assert_eq!(out.len(), 20);
    }
}
