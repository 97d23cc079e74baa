//! unlatch-core: shared types, config schema, and error types

pub mod config;
pub mod error;
pub mod types;

pub use error::{UnlatchError, UnlatchResult};

/// Milliseconds since the Unix epoch.
///
/// Job timestamps and expiries are all expressed in this unit.
pub fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
