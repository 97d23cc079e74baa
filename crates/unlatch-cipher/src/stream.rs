//! Positional XOR against a cycled keystream
//!
//! Position `p` of the plaintext stream is always combined with
//! `keystream[p % 4096]`, so any split of the input into chunks decrypts
//! identically to one pass as long as each chunk carries its absolute offset.

use rayon::prelude::*;

use crate::keystream::Keystream;
use crate::KEYSTREAM_LEN;

/// Buffers at least this large are split across the rayon pool.
const PARALLEL_THRESHOLD: usize = 4 * 1024 * 1024;
const PARALLEL_CHUNK: usize = 1024 * 1024;

/// Decrypt (or encrypt) `bytes` located at absolute stream `offset`.
pub fn decrypt(bytes: &[u8], keystream: &Keystream, offset: u64) -> Vec<u8> {
    let mut out = bytes.to_vec();
    decrypt_in_place(&mut out, keystream, offset);
    out
}

/// In-place variant of [`decrypt`].
pub fn decrypt_in_place(buf: &mut [u8], keystream: &Keystream, offset: u64) {
    let ks = keystream.as_bytes();
    let start = (offset % KEYSTREAM_LEN as u64) as usize;
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= ks[(start + i) % KEYSTREAM_LEN];
    }
}

/// In-place decryption that fans large buffers out over rayon.
///
/// Produces exactly the bytes [`decrypt_in_place`] would.
pub fn decrypt_in_place_parallel(buf: &mut [u8], keystream: &Keystream, offset: u64) {
    if buf.len() < PARALLEL_THRESHOLD {
        decrypt_in_place(buf, keystream, offset);
        return;
    }
    buf.par_chunks_mut(PARALLEL_CHUNK)
        .enumerate()
        .for_each(|(i, chunk)| {
            decrypt_in_place(chunk, keystream, offset + (i * PARALLEL_CHUNK) as u64);
        });
}

/// Stateful decryptor that tracks the stream position across chunks.
#[derive(Debug)]
pub struct StreamDecryptor {
    keystream: Keystream,
    position: u64,
}

impl StreamDecryptor {
    pub fn new(keystream: Keystream) -> Self {
        Self::starting_at(keystream, 0)
    }

    /// Resume decryption at an absolute offset (e.g. after a header probe).
    pub fn starting_at(keystream: Keystream, position: u64) -> Self {
        Self {
            keystream,
            position,
        }
    }

    /// Decrypt the next chunk of the stream in place.
    pub fn update(&mut self, chunk: &mut [u8]) {
        decrypt_in_place(chunk, &self.keystream, self.position);
        self.position += chunk.len() as u64;
    }

    /// Absolute offset of the next byte to be decrypted.
    pub fn position(&self) -> u64 {
        self.position
    }
}


#[cfg(test)]
mod proptest_suite {
    use super::*;
    use crate::derive_keystream;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn decrypt_is_an_involution(
            data in proptest::collection::vec(any::<u8>(), 0..=9000),
            offset in 0u64..20_000,
        ) {
            let ks = derive_keystream("0123456789abcdef0123456789abcdef");
            let once = decrypt(&data, &ks, offset);
            prop_assert_eq!(decrypt(&once, &ks, offset), data);
        }

        #[test]
        fn chunk_split_equivalence(
            data in proptest::collection::vec(any::<u8>(), 0..=9000),
            split in any::<prop::sample::Index>(),
        ) {
            let ks = derive_keystream("f626ad1ffb5159bef3e9295df34244af");
            let at = if data.is_empty() { 0 } else { split.index(data.len() + 1) };
            let (b1, b2) = data.split_at(at);

            let mut joined = decrypt(b1, &ks, 0);
            joined.extend(decrypt(b2, &ks, b1.len() as u64));

            prop_assert_eq!(joined, decrypt(&data, &ks, 0));
        }
    }
}
