//! The three-tree world state store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rusqlite::{params, Connection};
use tracing::{debug, info};
use zkra_common::merkle::{HashPath, Leaf, TreeHash};

use crate::error::StateError;
use crate::tree::MerkleTree;

/// Depth of the note-commitment data tree.
pub const DATA_TREE_DEPTH: u32 = 32;

/// Depth of the sparse nullifier and root trees.
pub const SPARSE_TREE_DEPTH: u32 = 128;

/// The three world-state trees.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TreeId {
    /// Note commitments, appended two per tx.
    Data = 0,
    /// Spent nullifiers; a leaf ending in 1 marks a spend.
    Nullifier = 1,
    /// Known historical data roots, keyed by their low 16 bytes.
    Root = 2,
}

impl TreeId {
    fn index(self) -> usize {
        self as usize
    }
}

/// The replicated Merkle world state.
///
/// Reads and writes stage against an in-memory overlay; `commit` persists
/// the staged leaves in one sqlite transaction and promotes the overlay,
/// `rollback` discards it. Committed leaves are replayed on `open` to
/// rebuild the node hashes.
pub struct WorldState {
    trees: RwLock<[MerkleTree; 3]>,
    db: Mutex<Connection>,
}

impl WorldState {
    /// Open (or create) a world state backed by a sqlite file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StateError> {
        let conn = Connection::open(path.as_ref())?;
        let state = Self::with_connection(conn)?;
        info!("opened world state at {:?}", path.as_ref());
        Ok(state)
    }

    /// World state backed by an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, StateError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StateError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS leaves (
                tree INTEGER NOT NULL,
                key BLOB NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (tree, key)
            );

            CREATE TABLE IF NOT EXISTS tree_meta (
                tree INTEGER PRIMARY KEY,
                size INTEGER NOT NULL
            );
            "#,
        )?;

        let mut trees = [
            MerkleTree::new(DATA_TREE_DEPTH),
            MerkleTree::new(SPARSE_TREE_DEPTH),
            MerkleTree::new(SPARSE_TREE_DEPTH),
        ];
        Self::replay_leaves(&conn, &mut trees)?;

        Ok(Self {
            trees: RwLock::new(trees),
            db: Mutex::new(conn),
        })
    }

    fn replay_leaves(conn: &Connection, trees: &mut [MerkleTree; 3]) -> Result<(), StateError> {
        let mut stmt = conn.prepare("SELECT tree, key, value FROM leaves")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;
        let mut count = 0usize;
        for row in rows {
            let (tree, key, value) = row?;
            let tree = usize::try_from(tree)
                .ok()
                .filter(|t| *t < 3)
                .ok_or_else(|| StateError::Storage(format!("unknown tree id {tree} on disk")))?;
            let key = decode_key(&key)?;
            let value: Leaf = value
                .try_into()
                .map_err(|_| StateError::Storage("malformed leaf on disk".into()))?;
            trees[tree].put(key, value)?;
            count += 1;
        }
        let mut stmt = conn.prepare("SELECT tree, size FROM tree_meta")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (tree, size) = row?;
            if let (Ok(tree), Ok(size)) = (usize::try_from(tree), u64::try_from(size)) {
                if tree < 3 {
                    trees[tree].put_size_floor(size);
                }
            }
        }
        for tree in trees.iter_mut() {
            tree.commit_overlay();
        }
        if count > 0 {
            debug!("replayed {count} persisted leaves");
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, [MerkleTree; 3]>, StateError> {
        self.trees.read().map_err(|_| StateError::Lock)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, [MerkleTree; 3]>, StateError> {
        self.trees.write().map_err(|_| StateError::Lock)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StateError> {
        self.db.lock().map_err(|_| StateError::Lock)
    }

    /// Append cursor of a tree, staged view.
    pub fn size(&self, tree: TreeId) -> Result<u64, StateError> {
        Ok(self.read()?[tree.index()].size())
    }

    pub fn committed_size(&self, tree: TreeId) -> Result<u64, StateError> {
        Ok(self.read()?[tree.index()].committed_size())
    }

    /// Tree root, staged view.
    pub fn root(&self, tree: TreeId) -> Result<TreeHash, StateError> {
        Ok(self.read()?[tree.index()].root())
    }

    pub fn committed_root(&self, tree: TreeId) -> Result<TreeHash, StateError> {
        Ok(self.read()?[tree.index()].committed_root())
    }

    /// Leaf read, staged view.
    pub fn get(&self, tree: TreeId, key: u128) -> Result<Leaf, StateError> {
        self.read()?[tree.index()].get(key)
    }

    /// Leaf read against the last committed snapshot (the admission view).
    pub fn get_committed(&self, tree: TreeId, key: u128) -> Result<Leaf, StateError> {
        self.read()?[tree.index()].get_committed(key)
    }

    /// Stage a leaf write.
    pub fn put(&self, tree: TreeId, key: u128, value: Leaf) -> Result<(), StateError> {
        self.write()?[tree.index()].put(key, value)
    }

    /// Authentication path, staged view.
    pub fn hash_path(&self, tree: TreeId, key: u128) -> Result<HashPath, StateError> {
        self.read()?[tree.index()].hash_path(key)
    }

    /// Whether any writes are staged but uncommitted.
    pub fn has_staged_writes(&self) -> Result<bool, StateError> {
        Ok(self.read()?.iter().any(|t| t.has_staged_writes()))
    }

    /// Atomically persist and promote the overlay.
    pub fn commit(&self) -> Result<(), StateError> {
        let mut trees = self.write()?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut staged = 0usize;
        for (id, tree) in trees.iter().enumerate() {
            for (key, value) in tree.staged_leaves() {
                tx.execute(
                    "INSERT OR REPLACE INTO leaves (tree, key, value) VALUES (?1, ?2, ?3)",
                    params![id as i64, key.to_be_bytes().to_vec(), value.to_vec()],
                )?;
                staged += 1;
            }
            tx.execute(
                "INSERT INTO tree_meta (tree, size) VALUES (?1, ?2)
                 ON CONFLICT(tree) DO UPDATE SET size = MAX(size, excluded.size)",
                params![id as i64, tree.size() as i64],
            )?;
        }
        tx.commit()?;
        for tree in trees.iter_mut() {
            tree.commit_overlay();
        }
        debug!("committed {staged} staged leaves");
        Ok(())
    }

    /// Discard all staged writes.
    pub fn rollback(&self) -> Result<(), StateError> {
        for tree in self.write()?.iter_mut() {
            tree.drop_overlay();
        }
        Ok(())
    }
}

fn decode_key(bytes: &[u8]) -> Result<u128, StateError> {
    let buf: [u8; 16] = bytes
        .try_into()
        .map_err(|_| StateError::Storage("malformed leaf key on disk".into()))?;
    Ok(u128::from_be_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use zkra_common::merkle::{non_empty_leaf, root_tree_key, ZERO_LEAF};

    #[test]
    fn commit_promotes_and_rollback_discards() {
        let state = WorldState::in_memory().unwrap();
        let initial_root = state.root(TreeId::Data).unwrap();

        state.put(TreeId::Data, 0, [1u8; 64]).unwrap();
        state.put(TreeId::Data, 1, [2u8; 64]).unwrap();
        assert_ne!(state.root(TreeId::Data).unwrap(), initial_root);
        assert_eq!(state.committed_root(TreeId::Data).unwrap(), initial_root);

        state.rollback().unwrap();
        assert_eq!(state.root(TreeId::Data).unwrap(), initial_root);
        assert_eq!(state.size(TreeId::Data).unwrap(), 0);

        state.put(TreeId::Data, 0, [1u8; 64]).unwrap();
        state.commit().unwrap();
        assert_eq!(
            state.committed_root(TreeId::Data).unwrap(),
            state.root(TreeId::Data).unwrap()
        );
        assert_eq!(state.committed_size(TreeId::Data).unwrap(), 1);
        assert_eq!(state.get_committed(TreeId::Data, 0).unwrap(), [1u8; 64]);
    }

    #[test]
    fn sparse_trees_hold_wide_keys() {
        let state = WorldState::in_memory().unwrap();
        let root = [0xabu8; 32];
        let key = root_tree_key(&root);
        state.put(TreeId::Root, key, non_empty_leaf()).unwrap();
        state.commit().unwrap();
        assert_eq!(state.get_committed(TreeId::Root, key).unwrap(), non_empty_leaf());
        assert_eq!(state.get_committed(TreeId::Nullifier, key).unwrap(), ZERO_LEAF);
    }

    #[test]
    fn reopen_replays_committed_leaves() {
        let path = std::env::temp_dir().join(format!(
            "zkra-state-test-{}-{:?}.db",
            std::process::id(),
            std::thread::current().id()
        ));
        let _ = std::fs::remove_file(&path);

        let root_after_commit;
        {
            let state = WorldState::open(&path).unwrap();
            state.put(TreeId::Data, 0, [1u8; 64]).unwrap();
            state.put(TreeId::Data, 3, ZERO_LEAF).unwrap();
            state.put(TreeId::Nullifier, 42, non_empty_leaf()).unwrap();
            state.commit().unwrap();
            // staged-only writes must not survive
            state.put(TreeId::Data, 4, [9u8; 64]).unwrap();
            root_after_commit = state.committed_root(TreeId::Data).unwrap();
        }

        let state = WorldState::open(&path).unwrap();
        assert_eq!(state.committed_root(TreeId::Data).unwrap(), root_after_commit);
        assert_eq!(state.committed_size(TreeId::Data).unwrap(), 4);
        assert_eq!(state.get_committed(TreeId::Data, 4).unwrap(), ZERO_LEAF);
        assert_eq!(
            state.get_committed(TreeId::Nullifier, 42).unwrap(),
            non_empty_leaf()
        );
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn hash_path_has_depth_plus_one_entries() {
        let state = WorldState::in_memory().unwrap();
        let path = state.hash_path(TreeId::Data, 0).unwrap();
        assert_eq!(path.len() as u32, DATA_TREE_DEPTH + 1);
    }
}
