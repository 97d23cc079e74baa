//! unlatch-cipher: byte-compatible reproduction of a vendor XOR stream cipher
//!
//! Pipeline: key → 32-byte block → u32 seed fold → LCG → 4096-byte keystream
//!
//! ```text
//! seed  = fold(block, |s, b| s * 17 ^ b)            (wrapping u32)
//! state = (1103515245 * state + 12345) mod 2^31     (exact u64 arithmetic)
//! byte  = (state>>24 ^ state>>16 ^ state>>8 ^ state) & 0xFF
//! plain[i] = cipher[i] ^ keystream[(offset + i) mod 4096]
//! ```
//!
//! The same transform encrypts and decrypts. It is a compatibility layer,
//! not a security primitive.

pub mod header;
pub mod keystream;
pub mod stream;

pub use header::{looks_like_container_header, CONTAINER_TAGS};
pub use keystream::{derive_keystream, DecryptionKey, KeyError, Keystream};
pub use stream::{decrypt, decrypt_in_place, decrypt_in_place_parallel, StreamDecryptor};

/// Length of a derived keystream in bytes
pub const KEYSTREAM_LEN: usize = 4096;

/// Nominal key length in characters; the key block is padded to this
pub const KEY_LEN: usize = 32;

/// Bytes decrypted up front to validate a file before the full pass
pub const HEADER_PROBE_LEN: usize = 12;
