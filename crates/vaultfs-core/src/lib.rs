pub mod backend;
pub mod batcher;
pub mod chunker;
pub mod config;
pub mod error;
pub mod object;
pub mod pathcheck;

pub use backend::{Backend, Features, Usage};
pub use batcher::{BatchItem, Batcher, DepositSummary};
pub use chunker::Chunker;
pub use config::{VaultConfig, DEFAULT_CHUNK_SIZE};
pub use error::{BackendError, Result};
pub use object::{Directory, Entry, HashKind, Object};
pub use pathcheck::is_valid_path;

#[cfg(test)]
mod testutil;
