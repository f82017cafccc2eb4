//! StateStore: redb-backed persistence for the admin control plane.
//!
//! Provides typed CRUD operations over queue policies, subclusters,
//! federation applications, and node resource overrides. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, Key, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Decode))
}

/// Read a subcluster record inside an open write transaction.
fn subcluster_in(txn: &WriteTransaction, id: &str) -> StateResult<Option<SubClusterInfo>> {
    let table = txn.open_table(SUBCLUSTERS).map_err(map_err!(Table))?;
    let info = match table.get(id).map_err(map_err!(Storage))? {
        Some(guard) => Some(decode(guard.value())?),
        None => None,
    };
    Ok(info)
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(QUEUE_POLICIES).map_err(map_err!(Table))?;
        for table in [SUBCLUSTERS, APPLICATIONS, NODE_RESOURCES] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic JSON table access ──────────────────────────────────

    fn put_json<T: Serialize>(&self, table: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Encode))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            t.insert(key, bytes.as_slice()).map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        match t.get(key).map_err(map_err!(Storage))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    fn list_json<K: Key + 'static, T: DeserializeOwned>(
        &self,
        table: TableDefinition<'static, K, &'static [u8]>,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in t.iter().map_err(map_err!(Storage))? {
            let (_, value) = entry.map_err(map_err!(Storage))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    fn delete_key(&self, table: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            existed = t.remove(key).map_err(map_err!(Storage))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// Run `write` only if `subcluster_id` is registered and not
    /// deregistered, checking and writing in one transaction.
    fn write_if_active<F>(&self, subcluster_id: &str, write: F) -> StateResult<GuardedWrite>
    where
        F: FnOnce(&WriteTransaction) -> StateResult<()>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let verdict = match subcluster_in(&txn, subcluster_id)? {
            None => GuardedWrite::UnknownSubCluster,
            Some(info) if info.state == SubClusterState::Deregistered => GuardedWrite::Deregistered,
            Some(_) => {
                write(&txn)?;
                GuardedWrite::Written
            }
        };
        if verdict == GuardedWrite::Written {
            txn.commit().map_err(map_err!(Transaction))?;
        } else {
            txn.abort().map_err(map_err!(Transaction))?;
        }
        Ok(verdict)
    }

    // ── Queue policies ─────────────────────────────────────────────

    /// Insert or overwrite the policy for a `(queue, subcluster)` pair.
    pub fn put_policy(&self, record: &QueuePolicyRecord) -> StateResult<()> {
        let bytes = serde_json::to_vec(record).map_err(map_err!(Encode))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(QUEUE_POLICIES).map_err(map_err!(Table))?;
            t.insert(record.table_key(), bytes.as_slice()).map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(queue = %record.queue, subcluster = %record.subcluster_id, "queue policy stored");
        Ok(())
    }

    /// Upsert a policy unless its subcluster is unknown or deregistered.
    ///
    /// The subcluster check and the insert share one write transaction,
    /// so a deregistration either sees the new record and drops it, or
    /// commits first and the save is refused.
    pub fn put_policy_if_active(&self, record: &QueuePolicyRecord) -> StateResult<GuardedWrite> {
        let bytes = serde_json::to_vec(record).map_err(map_err!(Encode))?;
        let verdict = self.write_if_active(&record.subcluster_id, |txn| {
            let mut t = txn.open_table(QUEUE_POLICIES).map_err(map_err!(Table))?;
            t.insert(record.table_key(), bytes.as_slice()).map_err(map_err!(Storage))?;
            Ok(())
        })?;
        debug!(queue = %record.queue, subcluster = %record.subcluster_id, ?verdict, "guarded policy write");
        Ok(verdict)
    }

    /// Get the policy for a `(queue, subcluster)` pair.
    pub fn get_policy(&self, subcluster_id: &str, queue: &str) -> StateResult<Option<QueuePolicyRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(QUEUE_POLICIES).map_err(map_err!(Table))?;
        match t.get((subcluster_id, queue)).map_err(map_err!(Storage))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// List every stored queue policy, in key order.
    pub fn list_policies(&self) -> StateResult<Vec<QueuePolicyRecord>> {
        self.list_json(QUEUE_POLICIES)
    }

    /// List the policies owned by one subcluster (one key range).
    pub fn list_policies_for_subcluster(&self, subcluster_id: &str) -> StateResult<Vec<QueuePolicyRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(QUEUE_POLICIES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range((subcluster_id, "")..).map_err(map_err!(Storage))? {
            let (key, value) = entry.map_err(map_err!(Storage))?;
            if key.value().0 != subcluster_id {
                break;
            }
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// Delete the policy for a `(queue, subcluster)` pair. Returns true if it existed.
    pub fn delete_policy(&self, subcluster_id: &str, queue: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut t = txn.open_table(QUEUE_POLICIES).map_err(map_err!(Table))?;
            existed = t.remove((subcluster_id, queue)).map_err(map_err!(Storage))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Subclusters ────────────────────────────────────────────────

    /// Insert or update a subcluster registration.
    pub fn put_subcluster(&self, info: &SubClusterInfo) -> StateResult<()> {
        self.put_json(SUBCLUSTERS, &info.id, info)
    }

    /// Read, change, and write one subcluster record in a single write
    /// transaction.
    ///
    /// `update` sees the current record and returns the one to store, or
    /// `None` to leave it as is. Returns the record as it stands after
    /// the call.
    pub fn update_subcluster<F>(&self, id: &str, update: F) -> StateResult<Option<SubClusterInfo>>
    where
        F: FnOnce(Option<&SubClusterInfo>) -> Option<SubClusterInfo>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let current = subcluster_in(&txn, id)?;
        let Some(next) = update(current.as_ref()) else {
            txn.abort().map_err(map_err!(Transaction))?;
            return Ok(current);
        };
        let bytes = serde_json::to_vec(&next).map_err(map_err!(Encode))?;
        {
            let mut t = txn.open_table(SUBCLUSTERS).map_err(map_err!(Table))?;
            t.insert(id, bytes.as_slice()).map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(Some(next))
    }

    /// Get a subcluster by ID.
    pub fn get_subcluster(&self, id: &str) -> StateResult<Option<SubClusterInfo>> {
        self.get_json(SUBCLUSTERS, id)
    }

    /// List all subclusters.
    pub fn list_subclusters(&self) -> StateResult<Vec<SubClusterInfo>> {
        self.list_json(SUBCLUSTERS)
    }

    /// Mark a subcluster deregistered and drop every policy it owns.
    ///
    /// Both changes commit in one write transaction. Returns the record as
    /// it was before the change and the number of policies removed, or
    /// `None` if the subcluster is unknown.
    pub fn deregister_subcluster(&self, id: &str) -> StateResult<Option<(SubClusterInfo, u32)>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let Some(previous) = subcluster_in(&txn, id)? else {
            txn.abort().map_err(map_err!(Transaction))?;
            return Ok(None);
        };
        let removed;
        {
            let mut policies = txn.open_table(QUEUE_POLICIES).map_err(map_err!(Table))?;
            let mut queues = Vec::new();
            for entry in policies.range((id, "")..).map_err(map_err!(Storage))? {
                let (key, _) = entry.map_err(map_err!(Storage))?;
                let (owner, queue) = key.value();
                if owner != id {
                    break;
                }
                queues.push(queue.to_string());
            }
            for queue in &queues {
                policies.remove((id, queue.as_str())).map_err(map_err!(Storage))?;
            }
            removed = queues.len() as u32;

            let updated = SubClusterInfo {
                state: SubClusterState::Deregistered,
                ..previous.clone()
            };
            let bytes = serde_json::to_vec(&updated).map_err(map_err!(Encode))?;
            let mut subclusters = txn.open_table(SUBCLUSTERS).map_err(map_err!(Table))?;
            subclusters.insert(id, bytes.as_slice()).map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(subcluster = %id, removed, "subcluster deregistered");
        Ok(Some((previous, removed)))
    }

    // ── Applications ───────────────────────────────────────────────

    /// Record an application unless its home subcluster is unknown or deregistered.
    pub fn put_application_if_active(&self, app: &ApplicationHomeSubCluster) -> StateResult<GuardedWrite> {
        let bytes = serde_json::to_vec(app).map_err(map_err!(Encode))?;
        self.write_if_active(&app.home_subcluster, |txn| {
            let mut t = txn.open_table(APPLICATIONS).map_err(map_err!(Table))?;
            t.insert(app.application_id.as_str(), bytes.as_slice())
                .map_err(map_err!(Storage))?;
            Ok(())
        })
    }

    /// Get an application's home record.
    pub fn get_application(&self, application_id: &str) -> StateResult<Option<ApplicationHomeSubCluster>> {
        self.get_json(APPLICATIONS, application_id)
    }

    /// Delete an application's home record. Returns true if it existed.
    pub fn delete_application(&self, application_id: &str) -> StateResult<bool> {
        self.delete_key(APPLICATIONS, application_id)
    }

    // ── Node resources ─────────────────────────────────────────────

    /// Insert or overwrite a node resource override.
    pub fn put_node_resource(&self, record: &NodeResourceRecord) -> StateResult<()> {
        self.put_json(NODE_RESOURCES, &record.node.to_string(), record)
    }

    /// List all node resource overrides.
    pub fn list_node_resources(&self) -> StateResult<Vec<NodeResourceRecord>> {
        self.list_json(NODE_RESOURCES)
    }

    /// Clear a node resource override. Returns true if one existed.
    pub fn delete_node_resource(&self, node: &NodeId) -> StateResult<bool> {
        self.delete_key(NODE_RESOURCES, &node.to_string())
    }
}
