use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A server field that may arrive as null, a number, or a string depending
/// on the node type and assembly state (`size`, `parent`, checksums,
/// `content_url`, ...). Decoded through a typed union instead of a loose
/// scalar so access sites handle null explicitly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(n) => Some(*n),
            Scalar::Float(f) => Some(*f as i64),
            _ => None,
        }
    }
}

/// The four node kinds of the Vault tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    Organization,
    Collection,
    Folder,
    File,
}

impl NodeType {
    /// Whether children may hang off a node of this type.
    pub fn is_container(self) -> bool {
        !matches!(self, NodeType::File)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeType::Organization => "ORGANIZATION",
            NodeType::Collection => "COLLECTION",
            NodeType::Folder => "FOLDER",
            NodeType::File => "FILE",
        };
        f.write_str(s)
    }
}

/// The uniform record type for every element of the Vault tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: i64,
    pub name: String,
    pub node_type: NodeType,
    /// URL of the parent treenode; null for the organization root.
    #[serde(default)]
    pub parent: Scalar,
    /// Materialised path of ancestor ids, dot-delimited (e.g. "6.22.87").
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub modified_at: String,
    #[serde(default)]
    pub pre_deposit_modified_at: String,
    #[serde(default)]
    pub uploaded_at: String,
    #[serde(default)]
    pub size: Scalar,
    #[serde(default)]
    pub content_url: Scalar,
    #[serde(default)]
    pub file_type: Scalar,
    #[serde(default)]
    pub md5_sum: Scalar,
    #[serde(default)]
    pub sha1_sum: Scalar,
    #[serde(default)]
    pub sha256_sum: Scalar,
    #[serde(default)]
    pub comment: Scalar,
    #[serde(default)]
    pub uploaded_by: Scalar,
    #[serde(default)]
    pub url: String,
}

impl TreeNode {
    /// Object size in bytes; 0 for containers and unpopulated files.
    pub fn size(&self) -> u64 {
        self.size.as_i64().map(|n| n.max(0) as u64).unwrap_or(0)
    }

    /// Download URL for an assembled FILE node.
    pub fn content_url(&self) -> Option<&str> {
        self.content_url.as_str()
    }

    /// Server-detected MIME type, or the empty string.
    pub fn mime_type(&self) -> &str {
        self.file_type.as_str().unwrap_or("")
    }

    /// Numeric id of the parent treenode, parsed from either a plain id or
    /// an API URL. None for the organization root.
    pub fn parent_id(&self) -> Option<i64> {
        match &self.parent {
            Scalar::Int(n) => Some(*n),
            Scalar::Str(s) => id_from_url(s, "treenodes"),
            _ => None,
        }
    }
}

/// One tenant; each user belongs to exactly one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub name: String,
    #[serde(default)]
    pub plan: String,
    #[serde(default)]
    pub quota_bytes: u64,
    #[serde(default)]
    pub tree_node: String,
    #[serde(default)]
    pub url: String,
}

impl Organization {
    pub fn tree_node_id(&self) -> Option<i64> {
        id_from_url(&self.tree_node, "treenodes")
    }

    pub fn plan_id(&self) -> Option<i64> {
        id_from_url(&self.plan, "plans")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub url: String,
}

impl User {
    pub fn organization_id(&self) -> Option<i64> {
        id_from_url(&self.organization, "organizations")
    }
}

/// Read-only plan attributes attached to an organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub name: String,
    #[serde(default)]
    pub default_fixity_frequency: String,
    #[serde(default)]
    pub default_geolocations: Vec<String>,
    #[serde(default)]
    pub default_replication: i64,
    #[serde(default)]
    pub price_per_terabyte: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Geolocation {
    pub name: String,
    #[serde(default)]
    pub url: String,
}

/// Typed wrapper around a COLLECTION treenode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub name: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub fixity_frequency: String,
    #[serde(default)]
    pub target_replication: i64,
    #[serde(default)]
    pub target_geolocations: Vec<Geolocation>,
    #[serde(default)]
    pub tree_node: String,
    #[serde(default)]
    pub url: String,
}

impl Collection {
    pub fn identifier(&self) -> Option<i64> {
        id_from_url(&self.url, "collections")
    }

    pub fn tree_node_id(&self) -> Option<i64> {
        id_from_url(&self.tree_node, "treenodes")
    }
}

/// Per-deposit progress counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DepositStatus {
    #[serde(default)]
    pub total_files: i64,
    #[serde(default)]
    pub uploaded_files: i64,
    #[serde(default)]
    pub assembled_files: i64,
    #[serde(default)]
    pub in_storage_files: i64,
    #[serde(default)]
    pub file_queue: i64,
    #[serde(default)]
    pub errored_files: i64,
}

/// One planned file in a deposit manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestFile {
    pub name: String,
    pub flow_identifier: String,
    pub relative_path: String,
    pub size: u64,
    /// e.g. "2018-04-13T08:06:48.000Z"
    pub pre_deposit_modified_at: String,
    #[serde(rename = "type")]
    pub content_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterDepositRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_node_id: Option<i64>,
    pub total_size: u64,
    pub files: Vec<ManifestFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterDepositResponse {
    pub deposit_id: i64,
}

/// Usage summary across an organization's collections.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectionStats {
    #[serde(default)]
    pub collections: Vec<CollectionUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectionUsage {
    pub id: i64,
    #[serde(default, rename = "fileCount")]
    pub file_count: i64,
    #[serde(default, rename = "totalSize")]
    pub total_size: i64,
    #[serde(default)]
    pub time: String,
}

impl CollectionStats {
    pub fn total_size(&self) -> i64 {
        self.collections.iter().map(|c| c.total_size).sum()
    }

    pub fn num_files(&self) -> i64 {
        self.collections.iter().map(|c| c.file_count).sum()
    }
}

/// Collection node, leaf node and remainder derived from one absolute path.
#[derive(Debug, Clone)]
pub struct PathInfo {
    pub collection: TreeNode,
    pub leaf: TreeNode,
    pub relative_path: String,
}

/// Paginated list envelope shared by all `find_*` endpoints.
#[derive(Debug, Deserialize)]
pub(crate) struct Page<T> {
    #[allow(dead_code)]
    #[serde(default)]
    pub count: i64,
    pub results: Vec<T>,
}

static ID_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://.*/api/([a-z_]+)/([0-9]+)/?$").expect("static regex"));

/// Parse a numeric identifier out of either a plain id string or an API
/// detail URL like `http://host/api/treenodes/42/`.
pub fn id_from_url(value: &str, kind: &str) -> Option<i64> {
    if value.is_empty() {
        return None;
    }
    if !value.starts_with("http") {
        return value.parse().ok();
    }
    let caps = ID_URL_RE.captures(value)?;
    if &caps[1] != kind {
        return None;
    }
    caps[2].parse().ok()
}
