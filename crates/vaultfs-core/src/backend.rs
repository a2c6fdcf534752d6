use std::io::{self, Read};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use vaultfs_api::{ApiError, NodeType, VaultApi};

use crate::batcher::{BatchItem, Batcher, DepositSummary};
use crate::config::VaultConfig;
use crate::error::{BackendError, Result};
use crate::object::{Entry, Object};
use crate::pathcheck;

/// Optional capabilities advertised to the host utility.
#[derive(Debug, Clone, Copy)]
pub struct Features {
    /// Listing convenience only; the server itself is case sensitive.
    pub case_insensitive: bool,
}

/// Quota and usage summary for the session's organization.
#[derive(Debug, Clone, Copy)]
pub struct Usage {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub files: u64,
}

/// A Vault tree exposed as a virtual filesystem rooted at `root`. Owns the
/// API client and the deposit batcher; shared by concurrent callers.
pub struct Backend {
    api: Arc<VaultApi>,
    root: String,
    batcher: Batcher,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend").field("root", &self.root).finish()
    }
}

impl Backend {
    /// Log in, gate on the API version and set up the batcher. `root` is
    /// the absolute Vault path all remotes are relative to; uploads deposit
    /// into it.
    pub fn open(config: &VaultConfig, root: &str) -> Result<Self> {
        let config = config.clone().validated()?;
        let api = Arc::new(VaultApi::new(
            &config.endpoint,
            &config.username,
            &config.password,
        )?);
        api.login()?;
        api.ensure_version()?;
        let root = normalize_root(root);
        let batcher = Batcher::new(
            Arc::clone(&api),
            &root,
            config.chunk_size,
            config.resume_deposit_id,
            config.show_deposit_progress,
        );
        Ok(Self { api, root, batcher })
    }

    pub fn features(&self) -> Features {
        Features {
            case_insensitive: true,
        }
    }

    pub fn api(&self) -> &VaultApi {
        &self.api
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// List the entries of a directory. A path resolving to a file lists
    /// as a single-entry directory containing itself, which keeps lone-file
    /// sync targets working.
    pub fn list(&self, dir: &str) -> Result<Vec<Entry>> {
        let node = match self.api.resolve_path(&self.abs(dir)) {
            Ok(node) => node,
            Err(ApiError::NotFound) => return Err(BackendError::DirNotFound(dir.to_string())),
            Err(e) => return Err(e.into()),
        };
        if node.node_type == NodeType::File {
            return Ok(vec![Entry::from_node(dir.to_string(), node)]);
        }
        let children = self.api.children(&node)?;
        Ok(children
            .into_iter()
            .map(|child| {
                let remote = join_remote(dir, &child.name);
                Entry::from_node(remote, child)
            })
            .collect())
    }

    /// Stat a file.
    pub fn new_object(&self, remote: &str) -> Result<Object> {
        match self.api.resolve_path(&self.abs(remote)) {
            Ok(node) if node.node_type == NodeType::File => Ok(Object::new(remote, node)),
            Ok(_) => Err(BackendError::IsDir(remote.to_string())),
            Err(ApiError::NotFound) => Err(BackendError::ObjectNotFound(remote.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Stream a file's content. Reads bypass the batcher entirely.
    pub fn open_object(&self, object: &Object) -> Result<Box<dyn Read + Send + 'static>> {
        Ok(self.api.content(object.node())?)
    }

    /// Queue an upload: spool the content to a temp file and hand it to the
    /// batcher. No network traffic until shutdown.
    pub fn put(&self, src: &mut dyn Read, remote: &str, mod_time: DateTime<Utc>) -> Result<()> {
        if !pathcheck::is_valid_path(remote) {
            return Err(BackendError::PathInvalid(remote.to_string()));
        }
        let mut spool = tempfile::Builder::new()
            .prefix("vaultfs-deposit-")
            .tempfile()?;
        let size = io::copy(src, &mut spool)?;
        let (_file, path) = spool.keep().map_err(|e| BackendError::Io(e.error))?;
        tracing::debug!("spooled {remote} ({size} bytes) to {}", path.display());
        self.batcher.add(BatchItem {
            spool: path,
            remote: remote.to_string(),
            size,
            mod_time,
        });
        Ok(())
    }

    /// `mkdir -p` across the collection/folder type boundary: the first
    /// missing segment becomes a collection, every deeper one a folder.
    /// No segment is attempted without its parent existing.
    pub fn mkdir(&self, dir: &str) -> Result<()> {
        let path = self.abs(dir);
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            // The organization root always exists.
            return Ok(());
        }
        let mut parent = self.api.root_node()?;
        let mut built = String::new();
        for (depth, segment) in segments.iter().enumerate() {
            built.push('/');
            built.push_str(segment);
            match self.api.resolve_path(&built) {
                Ok(node) => parent = node,
                Err(ApiError::NotFound) => {
                    if depth == 0 {
                        tracing::debug!("creating collection {segment}");
                        self.api.create_collection(segment)?;
                    } else {
                        self.api.create_folder(&parent, segment)?;
                    }
                    parent = self.api.resolve_path(&built)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Remove an empty folder. The server prohibits deleting collections,
    /// so those are refused up front.
    pub fn rmdir(&self, dir: &str) -> Result<()> {
        let node = self.resolve_container(dir)?;
        if !self.api.children(&node)?.is_empty() {
            return Err(BackendError::DirNotEmpty(dir.to_string()));
        }
        self.api.remove(&node)?;
        Ok(())
    }

    /// Remove a folder and everything below it (the server cascades).
    pub fn purge(&self, dir: &str) -> Result<()> {
        let node = self.resolve_container(dir)?;
        self.api.remove(&node)?;
        Ok(())
    }

    /// Rename or move a node. Same parent means a single PATCH of the name;
    /// a different parent means a single PATCH of the parent, with a rename
    /// appended only when the base name changes too. Moving a file into a
    /// directory that does not exist yet creates it first.
    pub fn move_path(&self, src: &str, dst: &str) -> Result<()> {
        if !pathcheck::is_valid_path(dst) {
            return Err(BackendError::PathInvalid(dst.to_string()));
        }
        let src_node = match self.api.resolve_path(&self.abs(src)) {
            Ok(node) => node,
            Err(ApiError::NotFound) => return Err(BackendError::ObjectNotFound(src.to_string())),
            Err(e) => return Err(e.into()),
        };
        match self.api.resolve_path(&self.abs(dst)) {
            Ok(_) => return Err(BackendError::AlreadyExists(dst.to_string())),
            Err(ApiError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        let (src_parent, _) = parent_and_name(src);
        let (dst_parent, dst_name) = parent_and_name(dst);
        if src_parent == dst_parent {
            if dst_name != src_node.name {
                self.api.rename(&src_node, &dst_name)?;
            }
            return Ok(());
        }

        let parent_node = match self.api.resolve_path(&self.abs(&dst_parent)) {
            Ok(node) => node,
            Err(ApiError::NotFound) if src_node.node_type == NodeType::File => {
                self.mkdir(&dst_parent)?;
                self.api.resolve_path(&self.abs(&dst_parent))?
            }
            Err(ApiError::NotFound) => return Err(BackendError::DirNotFound(dst_parent)),
            Err(e) => return Err(e.into()),
        };
        self.api.move_node(&src_node, &parent_node)?;
        if dst_name != src_node.name {
            self.api.rename(&src_node, &dst_name)?;
        }
        Ok(())
    }

    /// Delete a file.
    pub fn remove_object(&self, remote: &str) -> Result<()> {
        let object = self.new_object(remote)?;
        self.api.remove(object.node())?;
        Ok(())
    }

    /// Quota versus usage across the organization's collections.
    pub fn about(&self) -> Result<Usage> {
        let org = self.api.organization()?;
        let stats = self.api.collection_stats()?;
        let used = stats.total_size().max(0) as u64;
        Ok(Usage {
            total: org.quota_bytes,
            used,
            free: org.quota_bytes.saturating_sub(used),
            files: stats.num_files().max(0) as u64,
        })
    }

    /// Number of uploads waiting for the shutdown deposit.
    pub fn pending_uploads(&self) -> usize {
        self.batcher.len()
    }

    /// Abandon queued uploads (interrupt semantics). Returns how many were
    /// dropped; a later shutdown finds an empty batch.
    pub fn clear_pending(&self) -> usize {
        self.batcher.clear()
    }

    /// Fire the deferred deposit. Runs the upload at most once no matter
    /// how often it is invoked; an empty batch performs no network calls.
    /// Failures leave unfinished spool files on disk so a rerun with a
    /// resume deposit id can continue.
    pub fn shutdown(&self) -> Result<Option<DepositSummary>> {
        let Some(items) = self.batcher.begin_shutdown() else {
            tracing::debug!("shutdown already ran");
            return Ok(None);
        };
        if items.is_empty() {
            tracing::debug!("nothing to deposit");
            return Ok(None);
        }
        let parent = match self.api.resolve_path(&self.root) {
            Ok(node) => node,
            Err(ApiError::NotFound) => {
                self.mkdir("")?;
                self.api.resolve_path(&self.root)?
            }
            Err(e) => return Err(e.into()),
        };
        let summary = self.batcher.deposit(&parent, &items)?;
        Ok(Some(summary))
    }

    /// Shutdown plus teardown of the session state and result cache.
    pub fn close(self) -> Result<Option<DepositSummary>> {
        let summary = self.shutdown();
        self.api.reset();
        summary
    }

    fn resolve_container(&self, dir: &str) -> Result<vaultfs_api::TreeNode> {
        let node = match self.api.resolve_path(&self.abs(dir)) {
            Ok(node) => node,
            Err(ApiError::NotFound) => return Err(BackendError::DirNotFound(dir.to_string())),
            Err(e) => return Err(e.into()),
        };
        match node.node_type {
            NodeType::Folder => Ok(node),
            NodeType::File => Err(BackendError::NotDir(dir.to_string())),
            NodeType::Collection => Err(BackendError::NotSupported(
                "collections cannot be removed".into(),
            )),
            NodeType::Organization => Err(BackendError::NotSupported(
                "the organization root cannot be removed".into(),
            )),
        }
    }

    /// Absolute Vault path for a root-relative remote.
    fn abs(&self, remote: &str) -> String {
        let rel = remote.trim_matches('/');
        if rel.is_empty() {
            self.root.clone()
        } else if self.root == "/" {
            format!("/{rel}")
        } else {
            format!("{}/{rel}", self.root)
        }
    }
}

fn normalize_root(root: &str) -> String {
    let trimmed = root.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn join_remote(dir: &str, name: &str) -> String {
    let dir = dir.trim_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Split a root-relative remote into its parent path and base name.
fn parent_and_name(remote: &str) -> (String, String) {
    let trimmed = remote.trim_matches('/');
    match trimmed.rsplit_once('/') {
        Some((parent, name)) => (parent.to_string(), name.to_string()),
        None => (String::new(), trimmed.to_string()),
    }
}

#[cfg(test)]
mod unit {
    use super::*;

    #[test]
    fn normalize_root_variants() {
        assert_eq!(normalize_root(""), "/");
        assert_eq!(normalize_root("/"), "/");
        assert_eq!(normalize_root("C1"), "/C1");
        assert_eq!(normalize_root("/C1/sub/"), "/C1/sub");
    }

    #[test]
    fn parent_and_name_splits() {
        assert_eq!(parent_and_name("A/x"), ("A".into(), "x".into()));
        assert_eq!(parent_and_name("x"), ("".into(), "x".into()));
        assert_eq!(parent_and_name("/A/B/x"), ("A/B".into(), "x".into()));
    }

    #[test]
    fn join_remote_handles_root() {
        assert_eq!(join_remote("", "a"), "a");
        assert_eq!(join_remote("A/B", "c"), "A/B/c");
    }
}
