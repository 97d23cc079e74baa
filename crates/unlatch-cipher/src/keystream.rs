//! Keystream derivation: textual key → 32-byte block → LCG-generated keystream

use thiserror::Error;
use zeroize::Zeroize;

use crate::{KEYSTREAM_LEN, KEY_LEN};

const LCG_MULTIPLIER: u64 = 1_103_515_245;
const LCG_INCREMENT: u64 = 12_345;
const LCG_MODULUS: u64 = 1 << 31;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("key must be {expected} characters, got {len}")]
    WrongLength { expected: usize, len: usize },

    #[error("key must be hexadecimal (invalid character at position {position})")]
    NotHex { position: usize },
}

/// A decryption key as entered by the user. Zeroized on drop.
///
/// The characters themselves are the key material; they are never
/// hex-decoded even though vendor keys happen to be hex strings.
#[derive(Clone)]
pub struct DecryptionKey {
    text: String,
}

impl DecryptionKey {
    /// Accept a key of exactly 32 hexadecimal characters (any case).
    pub fn parse(text: &str) -> Result<Self, KeyError> {
        let trimmed = text.trim();
        let len = trimmed.chars().count();
        if len != KEY_LEN {
            return Err(KeyError::WrongLength {
                expected: KEY_LEN,
                len,
            });
        }
        if let Some(position) = trimmed.chars().position(|c| !c.is_ascii_hexdigit()) {
            return Err(KeyError::NotHex { position });
        }
        Ok(Self {
            text: trimmed.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn keystream(&self) -> Keystream {
        derive_keystream(&self.text)
    }
}

impl Drop for DecryptionKey {
    fn drop(&mut self) {
        self.text.zeroize();
    }
}

impl std::fmt::Debug for DecryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptionKey")
            .field("text", &"[REDACTED]")
            .finish()
    }
}

/// The 4096-byte keystream derived from a key. Zeroized on drop.
#[derive(Clone)]
pub struct Keystream {
    bytes: Box<[u8; KEYSTREAM_LEN]>,
}

impl Keystream {
    pub fn as_bytes(&self) -> &[u8; KEYSTREAM_LEN] {
        &self.bytes
    }
}

impl Drop for Keystream {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for Keystream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keystream")
            .field("len", &KEYSTREAM_LEN)
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive the keystream for a textual key.
///
/// The key is lower-cased, each character contributes its low code byte,
/// and the block is truncated or zero-padded to 32 bytes.
pub fn derive_keystream(key: &str) -> Keystream {
    let mut block = key_block(key);
    let seed = fold_seed(&block);
    block.zeroize();

    let mut bytes = Box::new([0u8; KEYSTREAM_LEN]);
    // u64 keeps A * state exact; a 53-bit float multiply would not.
    let mut state = u64::from(seed);
    for out in bytes.iter_mut() {
        state = (LCG_MULTIPLIER * state + LCG_INCREMENT) % LCG_MODULUS;
        *out = ((state >> 24) ^ (state >> 16) ^ (state >> 8) ^ state) as u8;
    }

    Keystream { bytes }
}

fn key_block(key: &str) -> [u8; KEY_LEN] {
    let mut block = [0u8; KEY_LEN];
    for (slot, c) in block
        .iter_mut()
        .zip(key.chars().flat_map(char::to_lowercase))
    {
        *slot = c as u32 as u8;
    }
    block
}

fn fold_seed(block: &[u8; KEY_LEN]) -> u32 {
    block
        .iter()
        .fold(0u32, |seed, &b| seed.wrapping_mul(17) ^ u32::from(b))
}
