//! SQLite persistence for built rollups and admitted txs.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use zkra_common::{Block, JoinSplitTx, Rollup, TxId};

use crate::error::AggregatorError;

/// Lifecycle of a rollup row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RollupStatus {
    /// Built and handed to the prover/chain.
    Created,
    /// Confirmed on chain and applied to the world state.
    Confirmed,
}

impl RollupStatus {
    fn as_str(self) -> &'static str {
        match self {
            RollupStatus::Created => "created",
            RollupStatus::Confirmed => "confirmed",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(RollupStatus::Created),
            "confirmed" => Some(RollupStatus::Confirmed),
            _ => None,
        }
    }
}

/// Rollup and tx history.
///
/// The pipeline itself relies only on `next_rollup_id` and the insert and
/// confirm operations; the rest is operator-facing history.
pub struct RollupDb {
    conn: Mutex<Connection>,
}

impl RollupDb {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AggregatorError> {
        let conn = Connection::open(path.as_ref())?;
        let db = Self::with_connection(conn)?;
        info!("opened rollup db at {:?}", path.as_ref());
        Ok(db)
    }

    /// In-memory database (for testing).
    pub fn in_memory() -> Result<Self, AggregatorError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, AggregatorError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS rollups (
                id INTEGER PRIMARY KEY,
                created INTEGER NOT NULL,
                data_start_index INTEGER NOT NULL,
                num_txs INTEGER NOT NULL,
                proof BLOB,
                status TEXT NOT NULL DEFAULT 'created',
                block_num INTEGER,
                tx_hash BLOB
            );

            CREATE TABLE IF NOT EXISTS txs (
                tx_id BLOB PRIMARY KEY,
                rollup_id INTEGER,
                proof BLOB NOT NULL,
                viewing_key1 BLOB NOT NULL,
                viewing_key2 BLOB NOT NULL,
                signature BLOB,
                ip TEXT,
                origin TEXT,
                created INTEGER NOT NULL,
                settled INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, AggregatorError> {
        self.conn
            .lock()
            .map_err(|_| AggregatorError::Db("connection lock poisoned".into()))
    }

    /// Id the next built rollup must carry. Monotone over confirmed
    /// history; unproven rollups are deleted so their ids are reused.
    pub fn next_rollup_id(&self) -> Result<u64, AggregatorError> {
        let id: i64 = self.conn()?.query_row(
            "SELECT COALESCE(MAX(id) + 1, 0) FROM rollups",
            [],
            |row| row.get(0),
        )?;
        Ok(id as u64)
    }

    /// First rollup id without a confirmed row; block ingestion resumes
    /// here after a restart.
    pub fn next_unconfirmed_rollup_id(&self) -> Result<u64, AggregatorError> {
        let id: i64 = self.conn()?.query_row(
            "SELECT COALESCE(MAX(id) + 1, 0) FROM rollups WHERE status = 'confirmed'",
            [],
            |row| row.get(0),
        )?;
        Ok(id as u64)
    }

    pub fn insert_rollup(&self, rollup: &Rollup) -> Result<(), AggregatorError> {
        self.conn()?.execute(
            "INSERT INTO rollups (id, created, data_start_index, num_txs, status)
             VALUES (?1, ?2, ?3, ?4, 'created')",
            params![
                rollup.rollup_id as i64,
                now() as i64,
                rollup.data_start_index as i64,
                rollup.proofs.len() as i64,
            ],
        )?;
        Ok(())
    }

    pub fn set_rollup_proof(&self, rollup_id: u64, proof: &[u8]) -> Result<(), AggregatorError> {
        self.conn()?.execute(
            "UPDATE rollups SET proof = ?2 WHERE id = ?1",
            params![rollup_id as i64, proof],
        )?;
        Ok(())
    }

    /// Drop a rollup that never produced a proof. The id goes back into
    /// circulation; the chain requires consecutive rollup ids.
    pub fn delete_rollup(&self, rollup_id: u64) -> Result<(), AggregatorError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE txs SET rollup_id = NULL WHERE rollup_id = ?1",
            params![rollup_id as i64],
        )?;
        conn.execute(
            "DELETE FROM rollups WHERE id = ?1",
            params![rollup_id as i64],
        )?;
        Ok(())
    }

    /// Drop every unconfirmed rollup. Run at startup: anything that was in
    /// flight when the process died either confirms from the chain replay
    /// or was lost, and its id must be reusable.
    pub fn delete_unconfirmed_rollups(&self) -> Result<(), AggregatorError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE txs SET rollup_id = NULL
             WHERE rollup_id IN (SELECT id FROM rollups WHERE status != 'confirmed')",
            [],
        )?;
        conn.execute("DELETE FROM rollups WHERE status != 'confirmed'", [])?;
        Ok(())
    }

    /// Record a confirmed block. Upserts: blocks built by other
    /// aggregators land here too.
    pub fn confirm_rollup(&self, block: &Block) -> Result<(), AggregatorError> {
        self.conn()?.execute(
            "INSERT INTO rollups (id, created, data_start_index, num_txs, proof, status, block_num, tx_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, 'confirmed', ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                 status = 'confirmed', block_num = excluded.block_num, tx_hash = excluded.tx_hash",
            params![
                block.rollup_id as i64,
                block.created as i64,
                block.data_start_index as i64,
                (block.data_entries.len() / 2) as i64,
                block.rollup_proof_data,
                block.block_num as i64,
                block.tx_hash.to_vec(),
            ],
        )?;
        Ok(())
    }

    pub fn rollup_status(&self, rollup_id: u64) -> Result<Option<RollupStatus>, AggregatorError> {
        let status: Option<String> = self
            .conn()?
            .query_row(
                "SELECT status FROM rollups WHERE id = ?1",
                params![rollup_id as i64],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status.as_deref().and_then(RollupStatus::parse))
    }

    pub fn insert_tx(&self, tx: &JoinSplitTx) -> Result<(), AggregatorError> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO txs
                 (tx_id, rollup_id, proof, viewing_key1, viewing_key2, signature, ip, origin, created, settled)
             VALUES (?1, NULL, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)",
            params![
                tx.id.0.to_vec(),
                tx.raw_proof,
                tx.viewing_key1,
                tx.viewing_key2,
                tx.signature.map(|s| s.to_vec()),
                tx.sender.ip,
                tx.sender.origin,
                tx.received_at as i64,
            ],
        )?;
        Ok(())
    }

    /// Bind proven txs to their rollup.
    pub fn assign_txs(&self, rollup_id: u64, tx_ids: &[TxId]) -> Result<(), AggregatorError> {
        let conn = self.conn()?;
        for tx_id in tx_ids {
            conn.execute(
                "UPDATE txs SET rollup_id = ?1 WHERE tx_id = ?2",
                params![rollup_id as i64, tx_id.0.to_vec()],
            )?;
        }
        Ok(())
    }

    /// Mark a confirmed rollup's txs settled.
    pub fn settle_txs(&self, rollup_id: u64) -> Result<(), AggregatorError> {
        self.conn()?.execute(
            "UPDATE txs SET settled = 1 WHERE rollup_id = ?1",
            params![rollup_id as i64],
        )?;
        Ok(())
    }

    pub fn pending_tx_count(&self) -> Result<u64, AggregatorError> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM txs WHERE settled = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
