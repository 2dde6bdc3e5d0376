//! Overlay Merkle tree.
//!
//! Keys address leaves directly; an absent leaf reads as 64 zero bytes and
//! hashes into a precomputed per-level zero chain, so sparse trees of depth
//! up to 128 stay cheap. Writes stage into an overlay layered over the
//! committed maps; the overlay is merged on commit and dropped on rollback.

use std::collections::HashMap;

use zkra_common::merkle::{HashPath, Leaf, TreeHash, ZERO_LEAF};

use crate::error::StateError;

const LEAF_DOMAIN: &[u8] = b"ZKRA_MERKLE_LEAF";
const NODE_DOMAIN: &[u8] = b"ZKRA_MERKLE_NODE";

fn leaf_hash(value: &Leaf) -> TreeHash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(LEAF_DOMAIN);
    hasher.update(value);
    *hasher.finalize().as_bytes()
}

fn node_hash(left: &TreeHash, right: &TreeHash) -> TreeHash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(NODE_DOMAIN);
    hasher.update(left);
    hasher.update(right);
    *hasher.finalize().as_bytes()
}

#[derive(Default)]
struct Layer {
    leaves: HashMap<u128, Leaf>,
    /// Node hashes keyed by (level, index); level 0 is the leaf level.
    nodes: HashMap<(u32, u128), TreeHash>,
    /// Append cursor: one past the highest written leaf index. Meaningful
    /// for the data tree; sparse-tree keys beyond u64 leave it untouched.
    size: u64,
}

pub struct MerkleTree {
    depth: u32,
    zero_hashes: Vec<TreeHash>,
    committed: Layer,
    staged: Layer,
}

impl MerkleTree {
    pub fn new(depth: u32) -> Self {
        assert!(depth > 0 && depth <= 128, "tree depth must be in 1..=128");
        let mut zero_hashes = Vec::with_capacity(depth as usize + 1);
        zero_hashes.push(leaf_hash(&ZERO_LEAF));
        for level in 0..depth as usize {
            let zero = zero_hashes[level];
            zero_hashes.push(node_hash(&zero, &zero));
        }
        Self {
            depth,
            zero_hashes,
            committed: Layer::default(),
            staged: Layer::default(),
        }
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    fn check_key(&self, key: u128) -> Result<(), StateError> {
        if self.depth < 128 && key >> self.depth != 0 {
            return Err(StateError::KeyOutOfRange {
                key,
                depth: self.depth,
            });
        }
        Ok(())
    }

    fn node(&self, level: u32, index: u128) -> TreeHash {
        self.staged
            .nodes
            .get(&(level, index))
            .or_else(|| self.committed.nodes.get(&(level, index)))
            .copied()
            .unwrap_or(self.zero_hashes[level as usize])
    }

    fn committed_node(&self, level: u32, index: u128) -> TreeHash {
        self.committed
            .nodes
            .get(&(level, index))
            .copied()
            .unwrap_or(self.zero_hashes[level as usize])
    }

    /// Read a leaf, staged state first.
    pub fn get(&self, key: u128) -> Result<Leaf, StateError> {
        self.check_key(key)?;
        Ok(self
            .staged
            .leaves
            .get(&key)
            .or_else(|| self.committed.leaves.get(&key))
            .copied()
            .unwrap_or(ZERO_LEAF))
    }

    /// Read a leaf from the last committed snapshot only.
    pub fn get_committed(&self, key: u128) -> Result<Leaf, StateError> {
        self.check_key(key)?;
        Ok(self.committed.leaves.get(&key).copied().unwrap_or(ZERO_LEAF))
    }

    /// Stage a leaf write and rehash its path to the root.
    pub fn put(&mut self, key: u128, value: Leaf) -> Result<(), StateError> {
        self.check_key(key)?;
        self.staged.leaves.insert(key, value);

        let mut hash = leaf_hash(&value);
        let mut index = key;
        for level in 0..self.depth {
            self.staged.nodes.insert((level, index), hash);
            let sibling = self.node(level, index ^ 1);
            hash = if index & 1 == 0 {
                node_hash(&hash, &sibling)
            } else {
                node_hash(&sibling, &hash)
            };
            index >>= 1;
        }
        self.staged.nodes.insert((self.depth, 0), hash);

        if let Ok(next) = u64::try_from(key.saturating_add(1)) {
            self.staged.size = self.staged.size.max(next);
        }
        Ok(())
    }

    /// Root reflecting staged writes.
    pub fn root(&self) -> TreeHash {
        self.node(self.depth, 0)
    }

    /// Root of the last committed snapshot.
    pub fn committed_root(&self) -> TreeHash {
        self.committed_node(self.depth, 0)
    }

    /// Append cursor reflecting staged writes.
    pub fn size(&self) -> u64 {
        self.committed.size.max(self.staged.size)
    }

    pub fn committed_size(&self) -> u64 {
        self.committed.size
    }

    /// Raise the staged append cursor to at least `size`.
    pub(crate) fn put_size_floor(&mut self, size: u64) {
        self.staged.size = self.staged.size.max(size);
    }

    /// Authentication path for `key`, reflecting staged writes.
    ///
    /// Entry `k` pairs the level-`k` nodes straddling the leaf's ancestor;
    /// the final entry repeats the root, for `depth + 1` entries total.
    pub fn hash_path(&self, key: u128) -> Result<HashPath, StateError> {
        self.check_key(key)?;
        let mut entries = Vec::with_capacity(self.depth as usize + 1);
        for level in 0..self.depth {
            let index = key >> level;
            entries.push([self.node(level, index & !1u128), self.node(level, index | 1)]);
        }
        let root = self.root();
        entries.push([root, root]);
        Ok(HashPath(entries))
    }

    /// Leaves written since the last commit.
    pub(crate) fn staged_leaves(&self) -> impl Iterator<Item = (&u128, &Leaf)> {
        self.staged.leaves.iter()
    }

    /// Merge the overlay into the committed layer.
    pub(crate) fn commit_overlay(&mut self) {
        let staged = std::mem::take(&mut self.staged);
        self.committed.leaves.extend(staged.leaves);
        self.committed.nodes.extend(staged.nodes);
        self.committed.size = self.committed.size.max(staged.size);
    }

    /// Discard the overlay.
    pub(crate) fn drop_overlay(&mut self) {
        self.staged = Layer::default();
    }

    pub(crate) fn has_staged_writes(&self) -> bool {
        !self.staged.leaves.is_empty()
    }
}
