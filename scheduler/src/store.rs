//! C1 — durable, leased access to the plan/current document.
//!
//! The document is the single source of truth for a framework instance:
//! `{framework_id, target, plan, current, restart_flag, endpoints_cache}`,
//! persisted under `/<framework_name>`. Access goes exclusively through a
//! `Lease`: a scoped, optimistic-concurrency handle acquired by reading the
//! document at a version, and released either by `commit` (compare-and-set
//! against that version) or by simply dropping it (abandon).

use crate::error::{Error, Result};
use async_trait::async_trait;
use scheduler_types::{Document, RestartFlag};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Narrow interface to the external coordination store. A networked
/// implementation (etcd/ZooKeeper-style) is a drop-in replacement; tests and
/// single-node deployments use `InMemoryStore`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Creates the document at `path` if it does not already exist.
    async fn init(&self, path: &str, default: Document) -> Result<()>;

    /// Erases the document at `path`.
    async fn destroy(&self, path: &str) -> Result<()>;

    /// Reads the current version and document without taking a lease.
    async fn load_raw(&self, path: &str) -> Result<(u64, Document)>;

    /// Compare-and-set: succeeds only if `expected_version` still matches
    /// the stored version. Returns `Error::StaleState` otherwise.
    async fn compare_and_set(&self, path: &str, expected_version: u64, doc: Document) -> Result<()>;

    /// Single-writer flag, settable independent of a full lease (the SIGCHLD
    /// handler sets this without going through the reconciler tick).
    async fn set_restart_flag(&self, path: &str, flag: RestartFlag) -> Result<()>;

    /// Writes the companion reverse-proxy's derived configuration artifact.
    async fn write_reverse_proxy_config(&self, path: &str, contents: &str) -> Result<()>;
}

/// Scoped acquisition of the document. Must be terminated by `commit` or by
/// dropping (abandon); there is no other way to release it.
pub struct Lease {
    store: Arc<dyn Store>,
    path: String,
    version: u64,
    document: Document,
    committed: bool,
}

impl Lease {
    pub async fn acquire(store: Arc<dyn Store>, path: &str) -> Result<Self> {
        let (version, document) = store.load_raw(path).await?;
        Ok(Lease { store, path: path.to_string(), version, document, committed: false })
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    /// Compare-and-set against the version seen at acquisition. On success
    /// the lease is spent; on `Error::StaleState` the caller must reacquire.
    pub async fn commit(mut self) -> Result<()> {
        self.store
            .compare_and_set(&self.path, self.version, self.document.clone())
            .await?;
        self.committed = true;
        Ok(())
    }

    /// Explicit discard, equivalent to dropping without committing.
    pub fn abandon(self) {}
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !self.committed {
            tracing::debug!(path = %self.path, version = self.version, "lease abandoned without commit");
        }
    }
}

struct StoredDoc {
    version: u64,
    bytes: Vec<u8>,
}

/// Single-process store backed by a map of bincode-encoded documents. The
/// round trip through bytes on every read/write mirrors the protobuf-like
/// binary encoding the real coordination store uses on the wire, and gives
/// crash-restart recovery (reload from the last committed bytes) for free.
pub struct InMemoryStore {
    docs: RwLock<HashMap<String, StoredDoc>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore { docs: RwLock::new(HashMap::new()) }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn encode(doc: &Document) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(doc, bincode::config::standard())
        .map_err(|e| Error::Encoding(e.to_string()))
}

fn decode(bytes: &[u8]) -> Result<Document> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(doc, _)| doc)
        .map_err(|e| Error::Encoding(e.to_string()))
}

#[async_trait]
impl Store for InMemoryStore {
    async fn init(&self, path: &str, default: Document) -> Result<()> {
        let mut docs = self.docs.write().await;
        if !docs.contains_key(path) {
            docs.insert(path.to_string(), StoredDoc { version: 0, bytes: encode(&default)? });
        }
        Ok(())
    }

    async fn destroy(&self, path: &str) -> Result<()> {
        self.docs.write().await.remove(path);
        Ok(())
    }

    async fn load_raw(&self, path: &str) -> Result<(u64, Document)> {
        let docs = self.docs.read().await;
        let stored = docs
            .get(path)
            .ok_or_else(|| Error::StoreUnavailable(format!("no document at {path}")))?;
        Ok((stored.version, decode(&stored.bytes)?))
    }

    async fn compare_and_set(&self, path: &str, expected_version: u64, doc: Document) -> Result<()> {
        let mut docs = self.docs.write().await;
        let stored = docs
            .get_mut(path)
            .ok_or_else(|| Error::StoreUnavailable(format!("no document at {path}")))?;
        if stored.version != expected_version {
            return Err(Error::StaleState);
        }
        stored.bytes = encode(&doc)?;
        stored.version += 1;
        Ok(())
    }

    async fn set_restart_flag(&self, path: &str, flag: RestartFlag) -> Result<()> {
        let mut docs = self.docs.write().await;
        let stored = docs
            .get_mut(path)
            .ok_or_else(|| Error::StoreUnavailable(format!("no document at {path}")))?;
        let mut doc = decode(&stored.bytes)?;
        doc.restart_flag = flag;
        stored.bytes = encode(&doc)?;
        stored.version += 1;
        Ok(())
    }

    async fn write_reverse_proxy_config(&self, _path: &str, _contents: &str) -> Result<()> {
        Ok(())
    }
}
