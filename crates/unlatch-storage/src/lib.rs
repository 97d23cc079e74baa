//! unlatch-storage: the file-store capabilities a decryption job consumes
//!
//! - [`FileStore`]: list / download / upload / resolve-destination, the only
//!   way the job core touches remote files
//! - [`OpendalStore`]: `FileStore` over any OpenDAL operator (S3, fs, memory)
//! - [`ArtifactStore`]: plaintext retained for client-download jobs

pub mod artifacts;
pub mod error;
pub mod health;
pub mod operator;
pub mod store;

pub use artifacts::ArtifactStore;
pub use error::StorageError;
pub use health::check_health;
pub use operator::{build_operator, memory_operator, S3Settings};
pub use store::{content_type_for, FileStore, OpendalStore};
