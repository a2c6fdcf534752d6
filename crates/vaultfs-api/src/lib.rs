pub mod cache;
pub mod client;
pub mod error;
pub mod multipart;
pub mod types;

pub use client::{Query, VaultApi, SUPPORTED_VERSION, VERSION_HEADER};
pub use error::{ApiError, Result};
pub use types::{
    Collection, CollectionStats, DepositStatus, ManifestFile, NodeType, Organization, PathInfo,
    Plan, RegisterDepositRequest, Scalar, TreeNode, User,
};

#[cfg(test)]
mod testutil;
