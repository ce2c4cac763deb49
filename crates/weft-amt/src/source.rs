//! Block source abstraction
//!
//! Traversal never performs its own networking; it asks a [`BlockSource`]
//! for raw bytes and verifies them itself. Retry, backoff, caching and
//! timeout policy all belong to the source (or around it), never here.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use cid::Cid;

use crate::error::{AmtError, Result};

/// Async source of raw blocks keyed by content identifier
///
/// Implementations might wrap:
/// - an in-memory map ([`MemoryBlockSource`])
/// - a chain RPC endpoint's read-object call (user-provided)
/// - an on-disk snapshot or CAR archive (user-provided)
///
/// Bytes must be returned exactly as stored, with no transcoding, or
/// digest verification against the requesting identifier is meaningless.
/// Clone is required so a traversal handle can share the source.
///
/// # WASM Compatibility
///
/// The trait uses `trait_variant` to conditionally require `Send` only on
/// non-WASM targets, allowing it to work in browser environments where
/// `Send` is not available.
#[trait_variant::make(Send)]
pub trait BlockSource: Clone {
    /// Fetch the raw bytes stored under a CID
    ///
    /// Fails with [`NotFound`] when the source has no such block and
    /// [`Transport`] when the underlying channel fails (including
    /// cancellation, which is surfaced, not retried).
    ///
    /// [`NotFound`]: crate::error::AmtErrorKind::NotFound
    /// [`Transport`]: crate::error::AmtErrorKind::Transport
    async fn fetch(&self, cid: &Cid) -> Result<Bytes>;
}

/// In-memory block source backed by a BTreeMap
///
/// Useful for tests and for replaying pre-fetched block sets. Counts
/// fetches so callers can assert how many blocks a traversal touched.
#[derive(Debug, Clone)]
pub struct MemoryBlockSource {
    blocks: Arc<RwLock<BTreeMap<Cid, Bytes>>>,
    fetches: Arc<AtomicUsize>,
}

impl MemoryBlockSource {
    /// Create a new empty source
    pub fn new() -> Self {
        Self {
            blocks: Arc::new(RwLock::new(BTreeMap::new())),
            fetches: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Store a block under its computed identifier (blake2b-256, dag-cbor)
    pub fn put(&self, data: &[u8]) -> Result<Cid> {
        let cid = crate::identifier::compute_cid(data)?;
        self.blocks
            .write()
            .unwrap()
            .insert(cid, Bytes::copy_from_slice(data));
        Ok(cid)
    }

    /// Store a block under a caller-supplied identifier
    ///
    /// Bypasses CID computation, so the stored bytes may deliberately not
    /// match the identifier. Exists so tests can simulate corruption in
    /// transit; verification downstream is expected to catch it.
    pub fn put_with_cid(&self, cid: Cid, data: impl Into<Bytes>) {
        self.blocks.write().unwrap().insert(cid, data.into());
    }

    /// Number of blocks stored
    pub fn len(&self) -> usize {
        self.blocks.read().unwrap().len()
    }

    /// Check if the source is empty
    pub fn is_empty(&self) -> bool {
        self.blocks.read().unwrap().is_empty()
    }

    /// Total fetches served or refused since construction
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }
}

impl Default for MemoryBlockSource {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockSource for MemoryBlockSource {
    async fn fetch(&self, cid: &Cid) -> Result<Bytes> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.blocks
            .read()
            .unwrap()
            .get(cid)
            .cloned()
            .ok_or_else(|| AmtError::not_found(cid))
    }
}
