use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use vaultfs_api::{NodeType, TreeNode};

/// Wall-clock format the server uses for `modified_at`.
pub const MODIFIED_AT_FORMAT: &str = "%B %d, %Y %H:%M:%S UTC";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashKind {
    Md5,
    Sha1,
    Sha256,
}

/// Read-only view over a FILE treenode.
#[derive(Debug, Clone)]
pub struct Object {
    remote: String,
    node: TreeNode,
}

impl Object {
    pub fn new(remote: impl Into<String>, node: TreeNode) -> Self {
        Self {
            remote: remote.into(),
            node,
        }
    }

    /// Path of the object relative to the backend root.
    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn node(&self) -> &TreeNode {
        &self.node
    }

    pub fn size(&self) -> u64 {
        self.node.size()
    }

    pub fn mod_time(&self) -> DateTime<Utc> {
        parse_modified_at(&self.node.modified_at)
    }

    /// Stable identifier: the node's materialised-path label.
    pub fn id(&self) -> &str {
        &self.node.path
    }

    pub fn mime_type(&self) -> &str {
        self.node.mime_type()
    }

    /// Server-side checksum, or the empty string when not populated.
    pub fn hash(&self, kind: HashKind) -> &str {
        let scalar = match kind {
            HashKind::Md5 => &self.node.md5_sum,
            HashKind::Sha1 => &self.node.sha1_sum,
            HashKind::Sha256 => &self.node.sha256_sum,
        };
        scalar.as_str().unwrap_or("")
    }
}

/// View over a container treenode (organization, collection or folder).
#[derive(Debug, Clone)]
pub struct Directory {
    remote: String,
    node: TreeNode,
}

impl Directory {
    pub fn new(remote: impl Into<String>, node: TreeNode) -> Self {
        Self {
            remote: remote.into(),
            node,
        }
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn node(&self) -> &TreeNode {
        &self.node
    }

    pub fn size(&self) -> u64 {
        0
    }

    pub fn mod_time(&self) -> DateTime<Utc> {
        parse_modified_at(&self.node.modified_at)
    }

    pub fn id(&self) -> &str {
        &self.node.path
    }
}

/// A single directory listing entry.
#[derive(Debug, Clone)]
pub enum Entry {
    Dir(Directory),
    Object(Object),
}

impl Entry {
    /// Wrap a child node by its type.
    pub fn from_node(remote: impl Into<String>, node: TreeNode) -> Self {
        match node.node_type {
            NodeType::File => Entry::Object(Object::new(remote, node)),
            _ => Entry::Dir(Directory::new(remote, node)),
        }
    }

    pub fn remote(&self) -> &str {
        match self {
            Entry::Dir(d) => d.remote(),
            Entry::Object(o) => o.remote(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Entry::Dir(d) => &d.node().name,
            Entry::Object(o) => &o.node().name,
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            Entry::Dir(d) => d.size(),
            Entry::Object(o) => o.size(),
        }
    }

    pub fn mod_time(&self) -> DateTime<Utc> {
        match self {
            Entry::Dir(d) => d.mod_time(),
            Entry::Object(o) => o.mod_time(),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Entry::Dir(_))
    }
}

/// Parse the server's human-formatted timestamp; epoch on failure.
pub fn parse_modified_at(raw: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(raw, MODIFIED_AT_FORMAT)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).single().unwrap_or_default())
}
