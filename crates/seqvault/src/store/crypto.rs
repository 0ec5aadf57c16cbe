//! Artifact encryption primitives.
//!
//! The preferred algorithm is AES-256-GCM with a random 96-bit nonce
//! prepended to the ciphertext. The permitted fallback is a keyed XOR
//! stream (SHA-256 counter blocks) with an HMAC-SHA256 tag over
//! nonce-plus-ciphertext appended. Both forms verify on open.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const MAC_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    Seal(String),

    #[error("Authentication tag did not verify")]
    Integrity,

    #[error("Ciphertext is malformed")]
    Malformed,

    #[error("Failed to generate random bytes: {0}")]
    Random(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherAlgorithm {
    Aes256Gcm,
    XorHmacSha256,
}

impl CipherAlgorithm {
    pub fn tag(self) -> &'static str {
        match self {
            CipherAlgorithm::Aes256Gcm => "aes256-gcm",
            CipherAlgorithm::XorHmacSha256 => "xor-hmac-sha256",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "aes256-gcm" => Some(CipherAlgorithm::Aes256Gcm),
            "xor-hmac-sha256" => Some(CipherAlgorithm::XorHmacSha256),
            _ => None,
        }
    }

    pub fn seal(self, key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = rand_bytes::<NONCE_LEN>()?;
        match self {
            CipherAlgorithm::Aes256Gcm => seal_aes(key, &nonce, plaintext),
            CipherAlgorithm::XorHmacSha256 => Ok(seal_xor(key, &nonce, plaintext)),
        }
    }

    pub fn open(self, key: &[u8; KEY_LEN], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match self {
            CipherAlgorithm::Aes256Gcm => open_aes(key, sealed),
            CipherAlgorithm::XorHmacSha256 => open_xor(key, sealed),
        }
    }
}

fn seal_aes(
    key: &[u8; KEY_LEN],
    nonce_bytes: &[u8; NONCE_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| CryptoError::Seal(e.to_string()))?;
    let nonce = Nonce::from_slice(nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::Seal(e.to_string()))?;

    let mut combined = nonce_bytes.to_vec();
    combined.extend(ciphertext);
    Ok(combined)
}

fn open_aes(key: &[u8; KEY_LEN], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < NONCE_LEN {
        return Err(CryptoError::Malformed);
    }
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| CryptoError::Seal(e.to_string()))?;
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::Integrity)
}

/// Keystream block i is SHA256(key ‖ nonce ‖ i as little-endian u64).
fn xor_keystream(key: &[u8; KEY_LEN], nonce: &[u8], data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for (block_idx, chunk) in data.chunks(32).enumerate() {
        let mut hasher = Sha256::new();
        hasher.update(key);
        hasher.update(nonce);
        hasher.update((block_idx as u64).to_le_bytes());
        let block = hasher.finalize();
        out.extend(chunk.iter().zip(block.iter()).map(|(d, k)| d ^ k));
    }
    out
}

fn seal_xor(key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Vec<u8> {
    let ciphertext = xor_keystream(key, nonce, plaintext);

    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(nonce);
    mac.update(&ciphertext);
    let tag = mac.finalize().into_bytes();

    let mut combined = nonce.to_vec();
    combined.extend(ciphertext);
    combined.extend(tag);
    combined
}

fn open_xor(key: &[u8; KEY_LEN], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < NONCE_LEN + MAC_LEN {
        return Err(CryptoError::Malformed);
    }
    let (nonce, rest) = sealed.split_at(NONCE_LEN);
    let (ciphertext, tag) = rest.split_at(rest.len() - MAC_LEN);

    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(nonce);
    mac.update(ciphertext);
    mac.verify_slice(tag).map_err(|_| CryptoError::Integrity)?;

    Ok(xor_keystream(key, nonce, ciphertext))
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex_encode(&hasher.finalize())
}

/// SHA-256 of the key material. Recorded in metadata; never the key itself.
pub fn key_fingerprint(key: &[u8; KEY_LEN]) -> String {
    sha256_hex(key)
}

/// Deterministic sub-key derivation: SHA256(master ‖ context).
pub fn derive_key(master: &[u8; KEY_LEN], context: &[u8]) -> [u8; KEY_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(master);
    hasher.update(context);
    hasher.finalize().into()
}

pub fn hex_encode(bytes: &[u8]) -> String {
    const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";
    let mut result = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        result.push(HEX_CHARS[(byte >> 4) as usize] as char);
        result.push(HEX_CHARS[(byte & 0x0f) as usize] as char);
    }
    result
}

pub fn hex_decode(hex: &str) -> Result<Vec<u8>, String> {
    if hex.len() % 2 != 0 {
        return Err("Hex string must have even length".to_string());
    }

    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| format!("Invalid hex at position {}: {}", i, e))
        })
        .collect()
}

fn rand_bytes<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut bytes = [0u8; N];
    getrandom::getrandom(&mut bytes).map_err(|e| CryptoError::Random(e.to_string()))?;
    Ok(bytes)
}
