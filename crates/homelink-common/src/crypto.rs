//! Crypto primitives for the hub protocol and the OAuth token wrapping.
//!
//! - **AES-128-CBC** with zero padding and a rolling IV: every encrypt leaves
//!   the IV at the last ciphertext block emitted, every decrypt at the last
//!   ciphertext block consumed. A hub session therefore forms one ordered
//!   chain per direction and frames must be processed in order.
//! - **Diffie–Hellman** on 32-bit integers, as the hubs speak it. This is not
//!   cryptographically strong; the trust root is the pre-shared client token
//!   exchanged out-of-band during provisioning.
//! - Key material derivation and password hashes use MD5 for compatibility
//!   with already-provisioned credentials.

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use md5::{Digest, Md5};
use rand::{Rng, RngCore};

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Error returned when key or ciphertext material has the wrong shape.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("key must be 16 bytes, got {0}")]
    BadKeyLength(usize),
    #[error("ciphertext length {0} is not a multiple of the block size")]
    Misaligned(usize),
}

/// MD5 digest of `data`.
pub fn md5(data: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// `length` bytes from the thread-local CSPRNG.
pub fn random_bytes(length: usize) -> Vec<u8> {
    let mut data = vec![0u8; length];
    rand::rng().fill_bytes(&mut data);
    data
}

/// Strip the zero padding a decrypted payload carries. Payloads are JSON and
/// never legitimately end in NUL.
pub fn trim_zero_padding(buffer: &[u8]) -> &[u8] {
    let end = buffer
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |pos| pos + 1);
    &buffer[..end]
}

/// Salted password hash: `hex(salt) ++ hex(md5(salt ++ password))`.
pub fn hash_password(salt: &[u8], password: &str) -> String {
    let mut material = salt.to_vec();
    material.extend_from_slice(password.as_bytes());
    format!("{}{}", hex::encode(salt), hex::encode(md5(&material)))
}

/// Verify a password against a stored salted hash. The salt is the first
/// 32 hex characters of the hash.
pub fn verify_password(hash: &str, password: &str) -> bool {
    if hash.len() < 32 {
        return false;
    }

    match hex::decode(&hash[..32]) {
        Ok(salt) => hash == hash_password(&salt, password),
        Err(_) => false,
    }
}

/// Stateful AES-128-CBC cipher.
///
/// Owns the IV chain state; never share one instance across concurrent
/// operations or directions. Sessions keep one instance per direction, the
/// token registry builds a fresh instance per operation.
pub struct Aes128Cbc {
    cipher: Aes128,
    iv: [u8; BLOCK_SIZE],
}

impl Aes128Cbc {
    pub fn new(key: &[u8; BLOCK_SIZE], iv: [u8; BLOCK_SIZE]) -> Self {
        Self {
            cipher: Aes128::new(GenericArray::from_slice(key)),
            iv,
        }
    }

    /// Token cipher: key is the raw client secret, IV its MD5 digest.
    pub fn from_secret(secret: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; BLOCK_SIZE] = secret
            .try_into()
            .map_err(|_| CryptoError::BadKeyLength(secret.len()))?;

        Ok(Self::new(&key, md5(secret)))
    }

    /// Session cipher: key = MD5 of the big-endian shared secret, IV = MD5
    /// of the key.
    pub fn from_shared(shared: u32) -> Self {
        let key = md5(&shared.to_be_bytes());
        Self::new(&key, md5(&key))
    }

    /// Encrypt `buffer` in place, zero-padding it to a block boundary first.
    /// Advances the IV to the last ciphertext block.
    pub fn encrypt(&mut self, buffer: &mut Vec<u8>) {
        if buffer.len() % BLOCK_SIZE != 0 {
            buffer.resize(buffer.len() + BLOCK_SIZE - buffer.len() % BLOCK_SIZE, 0);
        }

        for block in buffer.chunks_exact_mut(BLOCK_SIZE) {
            for (byte, iv) in block.iter_mut().zip(self.iv.iter()) {
                *byte ^= iv;
            }

            self.cipher
                .encrypt_block(GenericArray::from_mut_slice(block));
            self.iv.copy_from_slice(block);
        }
    }

    /// Decrypt `buffer` in place. Advances the IV to the last ciphertext
    /// block consumed, so the chain continues even when a record is later
    /// dropped as unparseable.
    pub fn decrypt(&mut self, buffer: &mut [u8]) -> Result<(), CryptoError> {
        if buffer.len() % BLOCK_SIZE != 0 {
            return Err(CryptoError::Misaligned(buffer.len()));
        }

        for block in buffer.chunks_exact_mut(BLOCK_SIZE) {
            let mut next_iv = [0u8; BLOCK_SIZE];
            next_iv.copy_from_slice(block);

            self.cipher
                .decrypt_block(GenericArray::from_mut_slice(block));

            for (byte, iv) in block.iter_mut().zip(self.iv.iter()) {
                *byte ^= iv;
            }

            self.iv = next_iv;
        }

        Ok(())
    }
}

/// Ephemeral Diffie–Hellman half on 32-bit integers.
pub struct DiffieHellman {
    prime: u32,
    generator: u32,
    seed: u32,
}

impl DiffieHellman {
    /// New ephemeral key pair with a non-zero random seed.
    pub fn new(prime: u32, generator: u32) -> Self {
        Self {
            prime,
            generator,
            seed: rand::rng().random_range(1..=u32::MAX),
        }
    }

    /// Our public value: `generator ^ seed mod prime`.
    pub fn public_key(&self) -> u32 {
        pow_mod(self.generator, self.seed, self.prime)
    }

    /// Shared secret from the peer's public value: `peer ^ seed mod prime`.
    pub fn shared_secret(&self, peer: u32) -> u32 {
        pow_mod(peer, self.seed, self.prime)
    }
}

fn mul_mod(a: u32, b: u32, modulus: u32) -> u32 {
    ((a as u64 * b as u64) % modulus as u64) as u32
}

/// Square-and-multiply modular exponentiation.
fn pow_mod(base: u32, exponent: u32, modulus: u32) -> u32 {
    let mut result = 1 % modulus;
    let mut base = base % modulus;
    let mut exponent = exponent;

    while exponent > 0 {
        if exponent & 1 == 1 {
            result = mul_mod(result, base, modulus);
        }

        base = mul_mod(base, base, modulus);
        exponent >>= 1;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nist_cipher() -> Aes128Cbc {
        let key: [u8; 16] = hex::decode("2b7e151628aed2a6abf7158809cf4f3c")
            .unwrap()
            .try_into()
            .unwrap();
        let iv: [u8; 16] = hex::decode("000102030405060708090a0b0c0d0e0f")
            .unwrap()
            .try_into()
            .unwrap();
        Aes128Cbc::new(&key, iv)
    }

    #[test]
    fn cbc_matches_nist_vectors() {
        let mut cipher = nist_cipher();
        let mut buffer = hex::decode("6bc1bee22e409f96e93d7e117393172a").unwrap();

        cipher.encrypt(&mut buffer);
        assert_eq!(hex::encode(&buffer), "7649abac8119b246cee98e9b12e9197d");

        // Second block chains off the first ciphertext block
        let mut buffer = hex::decode("ae2d8a571e03ac9c9eb76fac45af8e51").unwrap();
        cipher.encrypt(&mut buffer);
        assert_eq!(hex::encode(&buffer), "5086cb9b507219ee95db113a917678b2");
    }

    #[test]
    fn chunked_encryption_equals_one_shot() {
        let plaintext = hex::decode(
            "6bc1bee22e409f96e93d7e117393172aae2d8a571e03ac9c9eb76fac45af8e51",
        )
        .unwrap();

        let mut one_shot = plaintext.clone();
        nist_cipher().encrypt(&mut one_shot);

        let mut cipher = nist_cipher();
        let mut first = plaintext[..16].to_vec();
        let mut second = plaintext[16..].to_vec();
        cipher.encrypt(&mut first);
        cipher.encrypt(&mut second);
        first.extend_from_slice(&second);

        assert_eq!(one_shot, first);
    }

    #[test]
    fn ordered_round_trip_with_padding() {
        let mut encryptor = Aes128Cbc::from_shared(0x1234_5678);
        let mut decryptor = Aes128Cbc::from_shared(0x1234_5678);

        for payload in [&b"{\"action\":\"subscribe\"}"[..], b"{}", b"x"] {
            let mut buffer = payload.to_vec();
            encryptor.encrypt(&mut buffer);
            assert_eq!(buffer.len() % BLOCK_SIZE, 0);

            decryptor.decrypt(&mut buffer).unwrap();
            assert_eq!(trim_zero_padding(&buffer), payload);
        }
    }

    #[test]
    fn decrypt_rejects_misaligned_input() {
        let mut cipher = Aes128Cbc::from_shared(1);
        let mut buffer = vec![0u8; 17];
        assert!(cipher.decrypt(&mut buffer).is_err());
    }

    #[test]
    fn dh_peers_agree() {
        let prime = 0xfffffffb;
        let alice = DiffieHellman::new(prime, 5);
        let bob = DiffieHellman::new(prime, 5);

        assert_eq!(
            alice.shared_secret(bob.public_key()),
            bob.shared_secret(alice.public_key())
        );
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password(&random_bytes(16), "hunter2");
        assert!(verify_password(&hash, "hunter2"));
        assert!(!verify_password(&hash, "hunter3"));
        assert!(!verify_password("short", "hunter2"));
    }

    #[test]
    fn zero_padding_trim() {
        assert_eq!(trim_zero_padding(b"{}\0\0\0"), b"{}");
        assert_eq!(trim_zero_padding(b"\0\0"), b"");
        assert_eq!(trim_zero_padding(b"{}"), b"{}");
    }
}
