//! Container header probe used to detect a wrong key early
//!
//! Decrypted files are ISO-BMFF style containers: a 4-byte big-endian box
//! length followed by a 4-byte ASCII box type. A wrong key turns both into
//! noise, so checking them on the first 12 bytes avoids decrypting a large
//! file only to produce garbage.

use crate::HEADER_PROBE_LEN;

/// Box types accepted as the first box of a decrypted file.
pub const CONTAINER_TAGS: [&[u8; 4]; 7] = [
    b"ftyp", b"moov", b"mdat", b"free", b"skip", b"wide", b"uuid",
];

const MIN_BOX_LEN: u32 = 8;
const MAX_BOX_LEN: u32 = 1024;

/// True if `bytes` start with a plausible first container box.
pub fn looks_like_container_header(bytes: &[u8]) -> bool {
    if bytes.len() < HEADER_PROBE_LEN {
        return false;
    }
    let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if !(MIN_BOX_LEN..=MAX_BOX_LEN).contains(&len) {
        return false;
    }
    CONTAINER_TAGS.iter().any(|tag| &bytes[4..8] == tag.as_slice())
}
