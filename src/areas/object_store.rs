//! Content-addressed object storage.
//!
//! The store exposes only `put`/`get` pairs for blobs and trees — content
//! addressing makes every write an insert-or-noop, so there is nothing to
//! update or delete and concurrent writers race harmlessly. Reference counts
//! for blobs are maintained as trees are stored, for a later garbage-collection
//! pass; they are not part of the read/write contract.
//!
//! Two backends ship with the core: [`MemoryBackend`] (the test double and the
//! default) and [`DiskBackend`], which lays objects out as
//! `<first-2-hash-chars>/<rest>` files, zlib-compressed, written to a temp
//! file and atomically renamed into place.

use anyhow::Context;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::tree::TreeSnapshot;
use crate::errors::{CoreError, Result};

/// Durable storage collaborator. Identifiers are computed by the store, so a
/// backend only ever sees already-addressed content.
pub trait BlobBackend: Send + Sync {
    /// Insert-or-noop write of `bytes` under `id`.
    fn put(&self, id: &ObjectId, bytes: Bytes) -> Result<()>;

    fn get(&self, id: &ObjectId) -> Result<Option<Bytes>>;
}

/// In-memory backend; the default for tests and short-lived engines.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    objects: RwLock<HashMap<ObjectId, Bytes>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobBackend for MemoryBackend {
    fn put(&self, id: &ObjectId, bytes: Bytes) -> Result<()> {
        self.objects.write().entry(id.clone()).or_insert(bytes);
        Ok(())
    }

    fn get(&self, id: &ObjectId) -> Result<Option<Bytes>> {
        Ok(self.objects.read().get(id).cloned())
    }
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// On-disk backend with git-style fan-out directories and zlib compression.
#[derive(Debug)]
pub struct DiskBackend {
    path: Box<Path>,
}

impl DiskBackend {
    pub fn new(path: impl AsRef<Path>) -> Self {
        DiskBackend {
            path: path.as_ref().to_path_buf().into_boxed_path(),
        }
    }

    fn object_path(&self, id: &ObjectId) -> PathBuf {
        self.path.join(id.to_path())
    }

    fn compress(data: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder
            .write_all(data)
            .context("unable to compress object content")?;
        encoder
            .finish()
            .context("unable to finish compressing object content")
    }

    fn decompress(data: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut decoder = flate2::read::ZlibDecoder::new(data);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .context("unable to decompress object content")?;
        Ok(out)
    }

    fn generate_temp_name() -> String {
        format!(
            "tmp-obj-{}-{}",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        )
    }
}

impl BlobBackend for DiskBackend {
    fn put(&self, id: &ObjectId, bytes: Bytes) -> Result<()> {
        let object_path = self.object_path(id);
        if object_path.exists() {
            return Ok(());
        }

        let write = || -> anyhow::Result<()> {
            let object_dir = object_path
                .parent()
                .with_context(|| format!("invalid object path {}", object_path.display()))?;
            std::fs::create_dir_all(object_dir)
                .with_context(|| format!("unable to create {}", object_dir.display()))?;

            // Write to a temp name and rename, so readers never observe a
            // partially written object.
            let temp_path = object_dir.join(Self::generate_temp_name());
            let compressed = Self::compress(&bytes)?;
            std::fs::write(&temp_path, &compressed)
                .with_context(|| format!("unable to write {}", temp_path.display()))?;
            std::fs::rename(&temp_path, &object_path)
                .with_context(|| format!("unable to rename into {}", object_path.display()))?;
            Ok(())
        };

        write().map_err(CoreError::Integrity)
    }

    fn get(&self, id: &ObjectId) -> Result<Option<Bytes>> {
        let object_path = self.object_path(id);
        if !object_path.exists() {
            return Ok(None);
        }

        let read = || -> anyhow::Result<Bytes> {
            let compressed = std::fs::read(&object_path)
                .with_context(|| format!("unable to read {}", object_path.display()))?;
            Ok(Self::decompress(&compressed)?.into())
        };

        read().map(Some).map_err(CoreError::Integrity)
    }
}

/// The object & tree store: hashing, framing and reference counting over a
/// [`BlobBackend`].
pub struct ObjectStore {
    backend: Arc<dyn BlobBackend>,
    refcounts: RwLock<HashMap<ObjectId, u64>>,
}

impl ObjectStore {
    pub fn in_memory() -> Self {
        Self::with_backend(Arc::new(MemoryBackend::new()))
    }

    pub fn on_disk(path: impl AsRef<Path>) -> Self {
        Self::with_backend(Arc::new(DiskBackend::new(path)))
    }

    pub fn with_backend(backend: Arc<dyn BlobBackend>) -> Self {
        ObjectStore {
            backend,
            refcounts: RwLock::new(HashMap::new()),
        }
    }

    /// Store a blob; identical bytes always yield the same id.
    pub fn put_blob(&self, bytes: Bytes) -> Result<ObjectId> {
        let id = ObjectId::hash("blob", &bytes);
        self.backend.put(&id, bytes)?;
        Ok(id)
    }

    pub fn get_blob(&self, id: &ObjectId) -> Result<Bytes> {
        self.backend
            .get(id)?
            .ok_or_else(|| CoreError::not_found("blob", id))
    }

    pub fn try_get_blob(&self, id: &ObjectId) -> Result<Option<Bytes>> {
        self.backend.get(id)
    }

    /// Store a tree snapshot; identical directory states collapse to the same
    /// tree id. Bumps the reference count of every blob the tree points at.
    pub fn put_tree(&self, tree: &TreeSnapshot) -> Result<ObjectId> {
        let encoded = tree.encode();
        let id = ObjectId::hash("tree", &encoded);

        {
            let mut refcounts = self.refcounts.write();
            for (_, entry) in tree.entries() {
                *refcounts.entry(entry.blob_id.clone()).or_insert(0) += 1;
            }
        }

        self.backend.put(&id, encoded)?;
        Ok(id)
    }

    pub fn get_tree(&self, id: &ObjectId) -> Result<TreeSnapshot> {
        let bytes = self
            .backend
            .get(id)?
            .ok_or_else(|| CoreError::not_found("tree", id))?;
        TreeSnapshot::decode(&bytes)
    }

    /// Current reference count of a blob (GC bookkeeping).
    pub fn blob_refcount(&self, id: &ObjectId) -> u64 {
        self.refcounts.read().get(id).copied().unwrap_or(0)
    }
}
