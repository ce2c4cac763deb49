//! Verified AMT traversal
//!
//! Every block on the path from the root to a key is fetched through the
//! [`BlockSource`], checked against its identifier before decoding, and
//! shape-checked before use. A lookup is a sequence of dependent fetches,
//! so execution is sequential per call; independent lookups on clones of
//! the same tree may run concurrently if the source permits it.

use cid::Cid;

use crate::amt::node::{AmtNode, AmtRoot};
use crate::cbor::{self, Value};
use crate::error::{AmtError, Result};
use crate::identifier;
use crate::source::BlockSource;

/// Read-only handle to an AMT rooted at a verified block
///
/// Loading fetches and validates the root once; lookups then descend from
/// the in-memory root node, fetching child blocks on demand. Nothing is
/// cached across lookups and nothing is ever written back.
#[derive(Debug, Clone)]
pub struct Amt<S> {
    source: S,
    root_cid: Cid,
    root: AmtRoot,
}

impl<S: BlockSource + Sync> Amt<S> {
    /// Fetch, verify and decode the root block
    pub async fn load(root_cid: Cid, source: S) -> Result<Self> {
        identifier::check_cid(&root_cid)?;
        let value = fetch_verified(&source, &root_cid).await?;
        let root = AmtRoot::from_value(&value)
            .map_err(|e| e.with_context(format!("root block {}", root_cid)))?;
        Ok(Self {
            source,
            root_cid,
            root,
        })
    }

    /// The identifier this tree was loaded from
    pub fn root_cid(&self) -> &Cid {
        &self.root_cid
    }

    /// Bits of key consumed per level
    pub fn bit_width(&self) -> u32 {
        self.root.bit_width
    }

    /// Height of the root node (0 = single leaf)
    pub fn height(&self) -> u32 {
        self.root.height
    }

    /// Number of elements in the tree
    pub fn count(&self) -> u64 {
        self.root.count
    }

    /// Resolve a key to its stored value
    ///
    /// `Ok(None)` means the key is in range but absent. A key the declared
    /// height cannot address at all is [`OutOfRange`], which is a distinct
    /// condition from absence. An empty tree answers `Ok(None)` for every
    /// key without fetching past the root.
    ///
    /// [`OutOfRange`]: crate::error::AmtErrorKind::OutOfRange
    pub async fn get(&self, key: u64) -> Result<Option<Value>> {
        if self.root.count == 0 {
            return Ok(None);
        }
        if let Some(capacity) = self.root.capacity() {
            if key >= capacity {
                return Err(AmtError::out_of_range(key, self.root.height, capacity));
            }
        }

        let mut height = self.root.height;
        let mut fetched: Option<AmtNode> = None;
        loop {
            let node = fetched.as_ref().unwrap_or(&self.root.node);
            let slot = self.slot_at(key, height);
            if !node.bit(slot) {
                return Ok(None);
            }
            if height == 0 {
                return Ok(Some(node.value_for_slot(slot).clone()));
            }
            let child_cid = *node.link_for_slot(slot);
            height -= 1;
            fetched = Some(
                self.load_node(&child_cid, height)
                    .await
                    .map_err(|e| e.with_context(format!(
                        "child {} for key {} at height {}",
                        child_cid, key, height
                    )))?,
            );
        }
    }

    /// Whether a key is present
    ///
    /// Same traversal and same failure modes as [`Amt::get`].
    pub async fn contains_key(&self, key: u64) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Visit every element in key order
    ///
    /// Depth-first walk reconstructing keys from the slot path. The
    /// callback may fail, which aborts the walk with its error.
    pub async fn for_each<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(u64, &Value) -> Result<()>,
    {
        if self.root.count == 0 {
            return Ok(());
        }

        enum Step {
            Loaded(AmtNode, u32, u64),
            Fetch(Cid, u32, u64),
        }

        let mut stack = vec![Step::Loaded(self.root.node.clone(), self.root.height, 0)];
        while let Some(step) = stack.pop() {
            let (node, height, base) = match step {
                Step::Loaded(node, height, base) => (node, height, base),
                Step::Fetch(cid, height, base) => (
                    self.load_node(&cid, height)
                        .await
                        .map_err(|e| e.with_context(format!(
                            "child {} at height {}",
                            cid, height
                        )))?,
                    height,
                    base,
                ),
            };

            if height == 0 {
                for slot in 0..self.root.fan_out() {
                    if node.bit(slot) {
                        f(base | u64::from(slot), node.value_for_slot(slot))?;
                    }
                }
            } else {
                // Pushed in reverse so children pop in ascending slot order.
                for slot in (0..self.root.fan_out()).rev() {
                    if node.bit(slot) {
                        let child_base =
                            base | (u64::from(slot) << (height * self.root.bit_width));
                        stack.push(Step::Fetch(*node.link_for_slot(slot), height - 1, child_base));
                    }
                }
            }
        }
        Ok(())
    }

    fn slot_at(&self, key: u64, height: u32) -> u32 {
        ((key >> (height * self.root.bit_width)) & u64::from(self.root.fan_out() - 1)) as u32
    }

    /// Fetch, verify and shape-check one child block
    async fn load_node(&self, cid: &Cid, height: u32) -> Result<AmtNode> {
        identifier::check_cid(cid)?;
        let value = fetch_verified(&self.source, cid).await?;
        AmtNode::from_value(&value, self.root.bit_width, height)
    }
}

/// Fetch a block and decode it only after its digest checks out
///
/// Hashing happens on the raw bytes exactly as fetched; a mismatch is
/// fatal to the call that observed it and is never retried here.
async fn fetch_verified<S: BlockSource>(source: &S, cid: &Cid) -> Result<Value> {
    let bytes = source.fetch(cid).await?;
    if !identifier::verify_block(cid, &bytes) {
        return Err(AmtError::integrity_failure(cid));
    }
    cbor::decode(&bytes).map_err(|e| e.with_context(format!("block {}", cid)))
}
