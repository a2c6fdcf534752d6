use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use md5::{Digest, Md5};
use rand::Rng;

use vaultfs_api::{ManifestFile, NodeType, RegisterDepositRequest, TreeNode, VaultApi};

use crate::error::{BackendError, Result};

/// Flow identifiers keep this prefix for wire compatibility with deposits
/// registered by earlier clients, so interrupted uploads stay resumable.
pub const FLOW_IDENTIFIER_PREFIX: &str = "rclone-vault-flow";

/// Opaque token the chunk endpoint currently ignores.
pub const UPLOAD_TOKEN: &str = "my_token";

/// Manifest timestamp format, millisecond precision with a literal Z.
pub const MANIFEST_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// How much of a spool file feeds the flow identifier hash.
const FLOW_HASH_PREFIX_BYTES: u64 = 16 * 1024 * 1024;

/// Bytes sniffed for content-type detection.
const SNIFF_BYTES: usize = 512;

/// A pending upload: the spooled content plus the metadata the manifest
/// needs. Lives from `Put` until the shutdown deposit completes.
#[derive(Debug, Clone)]
pub struct BatchItem {
    /// Local spool file holding the content.
    pub spool: PathBuf,
    /// Destination path relative to the backend root.
    pub remote: String,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
}

impl BatchItem {
    /// Manifest entry for this item. Falls back to a synthetic flow
    /// identifier when the spool cannot be read, at the cost of
    /// resumability.
    pub fn to_manifest_file(&self, root: &str) -> ManifestFile {
        let flow_identifier = match self.derive_flow_identifier(root) {
            Ok(id) => id,
            Err(err) => {
                tracing::debug!(
                    "{}: falling back to synthetic flow id (deposit will not be resumable): {err}",
                    self.spool.display()
                );
                let stamp = Utc::now().format("%Y%m%d%H%M%S");
                let tag: u64 = rand::thread_rng().gen_range(100_000_000..1_000_000_000);
                format!("{FLOW_IDENTIFIER_PREFIX}-{stamp}-{tag}")
            }
        };
        ManifestFile {
            name: basename(&self.remote).to_string(),
            flow_identifier,
            relative_path: self.remote.clone(),
            size: self.size,
            pre_deposit_modified_at: self.mod_time.format(MANIFEST_TIME_FORMAT).to_string(),
            content_type: self.content_type(),
        }
    }

    /// Stable identifier across reruns: MD5 over the first 16 MiB of the
    /// spool, the backend root and the remote path.
    fn derive_flow_identifier(&self, root: &str) -> io::Result<String> {
        let file = File::open(&self.spool)?;
        let mut hasher = Md5::new();
        io::copy(&mut file.take(FLOW_HASH_PREFIX_BYTES), &mut hasher)?;
        hasher.update(root.as_bytes());
        hasher.update(self.remote.as_bytes());
        Ok(format!(
            "{FLOW_IDENTIFIER_PREFIX}-{}",
            hex::encode(hasher.finalize())
        ))
    }

    /// Sniffed MIME type, or the empty string so the server can apply its
    /// own heuristic.
    fn content_type(&self) -> String {
        let mut buf = [0u8; SNIFF_BYTES];
        let n = match File::open(&self.spool).and_then(|mut f| f.read(&mut buf)) {
            Ok(n) => n,
            Err(_) => return String::new(),
        };
        match infer::get(&buf[..n]) {
            Some(kind) => kind.mime_type().to_string(),
            None => String::new(),
        }
    }
}

/// Outcome of a completed deposit drive.
#[derive(Debug, Clone)]
pub struct DepositSummary {
    pub deposit_id: i64,
    pub total_size: u64,
    pub files: usize,
}

#[derive(Default)]
struct BatchState {
    items: Vec<BatchItem>,
    seen: HashSet<PathBuf>,
}

/// Deferred, deduplicated, resumable upload job. Items accumulate during
/// the session; the deposit fires once at shutdown.
pub struct Batcher {
    api: Arc<VaultApi>,
    root: String,
    chunk_size: u64,
    resume_deposit_id: Option<i64>,
    show_progress: bool,
    state: Mutex<BatchState>,
    done: AtomicBool,
}

impl Batcher {
    pub fn new(
        api: Arc<VaultApi>,
        root: &str,
        chunk_size: u64,
        resume_deposit_id: Option<i64>,
        show_progress: bool,
    ) -> Self {
        Self {
            api,
            root: root.to_string(),
            chunk_size,
            resume_deposit_id,
            show_progress,
            state: Mutex::new(BatchState::default()),
            done: AtomicBool::new(false),
        }
    }

    /// Queue an item. Idempotent per spool path; insertion order is kept.
    pub fn add(&self, item: BatchItem) {
        let mut state = self.lock();
        if state.seen.insert(item.spool.clone()) {
            state.items.push(item);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Abandon the pending batch (the user interrupted: their signal means
    /// "drop the uploads", not "upload what you have"). Spool files are
    /// removed best-effort. Returns how many items were dropped.
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let dropped = state.items.len();
        for item in state.items.drain(..) {
            if let Err(err) = std::fs::remove_file(&item.spool) {
                tracing::debug!("could not remove spool {}: {err}", item.spool.display());
            }
        }
        state.seen.clear();
        dropped
    }

    /// Claim the batch for the one and only shutdown run. Returns `None`
    /// when a run already happened.
    pub fn begin_shutdown(&self) -> Option<Vec<BatchItem>> {
        if self.done.swap(true, Ordering::SeqCst) {
            return None;
        }
        let mut state = self.lock();
        state.seen.clear();
        Some(std::mem::take(&mut state.items))
    }

    /// Drive the deposit: register (or resume), then upload every item's
    /// chunks in order. Items are processed in insertion order; the first
    /// failure aborts the run and leaves the remaining spool files on disk
    /// so a rerun with a resume id can pick up where this one stopped.
    pub fn deposit(&self, parent: &TreeNode, items: &[BatchItem]) -> Result<DepositSummary> {
        let total_size: u64 = items.iter().map(|i| i.size).sum();
        tracing::info!("preparing {} file(s) for deposit", items.len());
        let files: Vec<ManifestFile> = items
            .iter()
            .map(|item| item.to_manifest_file(&self.root))
            .collect();

        let deposit_id = match self.resume_deposit_id {
            Some(id) if id > 0 => {
                tracing::debug!("trying to resume deposit {id}");
                id
            }
            _ => {
                let mut request = RegisterDepositRequest {
                    collection_id: None,
                    parent_node_id: None,
                    total_size,
                    files: files.clone(),
                };
                match parent.node_type {
                    NodeType::Collection => {
                        let collection = self.api.tree_node_to_collection(parent)?;
                        request.collection_id = collection.identifier();
                    }
                    NodeType::Folder => {
                        request.parent_node_id = Some(parent.id);
                    }
                    other => {
                        return Err(BackendError::Deposit(format!(
                            "deposit parent must be a collection or folder, not {other}"
                        )))
                    }
                }
                self.api.register_deposit(&request)?
            }
        };

        let bar = self.progress_bar(total_size);
        for (item, file) in items.iter().zip(&files) {
            self.upload_item(deposit_id, item, file, bar.as_ref())?;
        }
        if let Some(bar) = bar {
            bar.finish();
        }

        tracing::info!(
            "upload done ({deposit_id}), deposited {total_size} byte(s), {} item(s)",
            items.len()
        );
        Ok(DepositSummary {
            deposit_id,
            total_size,
            files: items.len(),
        })
    }

    /// Upload one item as an ordered sequence of probe/post chunk pairs,
    /// then delete its spool file.
    fn upload_item(
        &self,
        deposit_id: i64,
        item: &BatchItem,
        file: &ManifestFile,
        bar: Option<&ProgressBar>,
    ) -> Result<()> {
        let mut chunker = crate::chunker::Chunker::open(&item.spool, self.chunk_size)?;
        let num_chunks = chunker.num_chunks();
        for number in 1..=num_chunks {
            let current_chunk_size = chunker.chunk_len(number - 1);
            tracing::debug!(
                "[{number}/{num_chunks}] {current_chunk_size} {} {}",
                chunker.file_size(),
                item.spool.display()
            );
            let params = flow_params(
                deposit_id,
                number,
                self.chunk_size,
                current_chunk_size,
                file,
                num_chunks,
                chunker.file_size(),
            );

            // Probe: 204 means the chunk is missing, 200 that it is already
            // stored (resumed deposit) and the upload can be skipped.
            let probe = self.api.call("GET", "/flow_chunk", &params)?;
            if probe.status() >= 300 {
                return Err(BackendError::Deposit(format!(
                    "chunk probe: expected HTTP < 300, got {}",
                    probe.status()
                )));
            }
            if probe.status() == 200 {
                tracing::debug!("chunk {number} already stored, skipping upload");
                if let Some(bar) = bar {
                    bar.inc(current_chunk_size);
                }
                continue;
            }

            let data = chunker.read_chunk(number - 1)?;
            let resp = self
                .api
                .call_multipart("/flow_chunk", &params, &file.name, &data)?;
            if resp.status() >= 300 {
                return Err(BackendError::Deposit(format!(
                    "chunk upload: expected HTTP < 300, got {}",
                    resp.status()
                )));
            }
            if let Some(bar) = bar {
                bar.inc(current_chunk_size);
            }
        }
        drop(chunker);
        std::fs::remove_file(&item.spool)?;
        Ok(())
    }

    fn progress_bar(&self, total_size: u64) -> Option<ProgressBar> {
        if !self.show_progress {
            return None;
        }
        let bar = ProgressBar::new(total_size);
        bar.set_style(
            ProgressStyle::with_template(
                "{prefix} {bar:30} {bytes}/{total_bytes} ({bytes_per_sec})",
            )
            .unwrap()
            .progress_chars("=>-"),
        );
        bar.set_prefix("<5>NOTICE: depositing");
        Some(bar)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BatchState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// The chunk endpoint's parameter set, shared verbatim between the probe
/// query string and the upload form fields. `flowChunkNumber` is 1-based.
fn flow_params(
    deposit_id: i64,
    number: u64,
    chunk_size: u64,
    current_chunk_size: u64,
    file: &ManifestFile,
    total_chunks: u64,
    total_size: u64,
) -> Vec<(&'static str, String)> {
    vec![
        ("depositId", deposit_id.to_string()),
        ("flowChunkNumber", number.to_string()),
        ("flowChunkSize", chunk_size.to_string()),
        ("flowCurrentChunkSize", current_chunk_size.to_string()),
        ("flowFilename", file.name.clone()),
        ("flowIdentifier", file.flow_identifier.clone()),
        ("flowRelativePath", file.relative_path.clone()),
        ("flowTotalChunks", total_chunks.to_string()),
        ("flowTotalSize", total_size.to_string()),
        ("upload_token", UPLOAD_TOKEN.to_string()),
    ]
}

fn basename(remote: &str) -> &str {
    remote.rsplit('/').next().unwrap_or(remote)
}
