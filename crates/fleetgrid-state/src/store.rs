//! StateStore — redb-backed persistence for FleetGrid fleet records.
//!
//! Provides typed CRUD operations over services, instances and volumes.
//! All values are JSON-serialized into redb's `&[u8]` value columns. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
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
        txn.open_table(SERVICES).map_err(map_err!(Table))?;
        txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        txn.open_table(VOLUMES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Services ───────────────────────────────────────────────────

    /// Insert or update a service record.
    pub fn put_service(&self, svc: &ServiceRecord) -> StateResult<()> {
        let key = svc.table_key();
        self.put_json(SERVICES, &key, svc)?;
        debug!(%key, "service stored");
        Ok(())
    }

    /// Get the service registered for `topic` on `host`.
    pub fn get_service(&self, topic: &str, host: &str) -> StateResult<Option<ServiceRecord>> {
        self.get_json(SERVICES, &service_key(topic, host))
    }

    /// List every service registered under a topic.
    pub fn list_services_by_topic(&self, topic: &str) -> StateResult<Vec<ServiceRecord>> {
        let prefix = format!("{topic}/");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SERVICES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let svc: ServiceRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(svc);
            }
        }
        Ok(results)
    }

    /// Record a heartbeat for a service. Returns false if the service is unknown.
    pub fn touch_service(&self, topic: &str, host: &str, now: u64) -> StateResult<bool> {
        match self.get_service(topic, host)? {
            Some(mut svc) => {
                svc.updated_at = Some(now);
                self.put_service(&svc)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Delete a service. Returns true if it existed.
    pub fn delete_service(&self, topic: &str, host: &str) -> StateResult<bool> {
        self.delete_key(SERVICES, &service_key(topic, host))
    }

    // ── Instances ──────────────────────────────────────────────────

    /// Insert or update an instance record.
    pub fn put_instance(&self, instance: &Instance) -> StateResult<()> {
        self.put_json(INSTANCES, &instance.id, instance)?;
        debug!(instance_id = %instance.id, "instance stored");
        Ok(())
    }

    /// Get an instance by ID.
    pub fn get_instance(&self, instance_id: &str) -> StateResult<Option<Instance>> {
        self.get_json(INSTANCES, instance_id)
    }

    /// List all instances.
    pub fn list_instances(&self) -> StateResult<Vec<Instance>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let instance: Instance =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(instance);
        }
        Ok(results)
    }

    /// Overwrite an instance's power state and state description.
    pub fn set_instance_state(
        &self,
        instance_id: &str,
        power_state: PowerState,
        description: &str,
    ) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            let mut instance: Instance = read_in_txn(&table, "instance", instance_id)?;
            instance.power_state = power_state;
            instance.state_description = description.to_string();
            write_in_txn(&mut table, instance_id, &instance)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%instance_id, ?power_state, %description, "instance state set");
        Ok(())
    }

    /// Set an instance's state and the status of every attached volume in
    /// one write transaction.
    ///
    /// `expected` is the instance as the caller last read it. The write only
    /// goes ahead if the stored record still has the same power state,
    /// description, host and volume list; otherwise it fails with
    /// `Conflict`. If the instance or any of its volumes is missing, or on
    /// conflict, nothing is written. Returns the ids of the updated volumes.
    pub fn transition_instance(
        &self,
        expected: &Instance,
        power_state: PowerState,
        description: &str,
        volume_status: VolumeStatus,
    ) -> StateResult<Vec<VolumeId>> {
        let instance_id = expected.id.as_str();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let volume_ids = {
            let mut instances = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            let mut volumes = txn.open_table(VOLUMES).map_err(map_err!(Table))?;

            let mut instance: Instance = read_in_txn(&instances, "instance", instance_id)?;
            if let Some(reason) = instance_drift(expected, &instance) {
                return Err(StateError::Conflict {
                    kind: "instance",
                    id: instance_id.to_string(),
                    reason,
                });
            }
            instance.power_state = power_state;
            instance.state_description = description.to_string();
            write_in_txn(&mut instances, instance_id, &instance)?;

            for volume_id in &instance.volumes {
                let mut volume: Volume = read_in_txn(&volumes, "volume", volume_id)?;
                volume.status = volume_status;
                write_in_txn(&mut volumes, volume_id, &volume)?;
            }
            instance.volumes
        };
        // Dropping `txn` on an early return above aborts every write.
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            %instance_id,
            ?power_state,
            %description,
            volumes = volume_ids.len(),
            "instance transitioned"
        );
        Ok(volume_ids)
    }

    /// Delete an instance by ID. Returns true if it existed.
    pub fn delete_instance(&self, instance_id: &str) -> StateResult<bool> {
        self.delete_key(INSTANCES, instance_id)
    }

    // ── Volumes ────────────────────────────────────────────────────

    /// Insert or update a volume record.
    pub fn put_volume(&self, volume: &Volume) -> StateResult<()> {
        self.put_json(VOLUMES, &volume.id, volume)
    }

    /// Get a volume by ID.
    pub fn get_volume(&self, volume_id: &str) -> StateResult<Option<Volume>> {
        self.get_json(VOLUMES, volume_id)
    }

    /// Overwrite a volume's status.
    pub fn set_volume_status(&self, volume_id: &str, status: VolumeStatus) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(VOLUMES).map_err(map_err!(Table))?;
            let mut volume: Volume = read_in_txn(&table, "volume", volume_id)?;
            volume.status = status;
            write_in_txn(&mut table, volume_id, &volume)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%volume_id, ?status, "volume status set");
        Ok(())
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn put_json<T: Serialize>(&self, def: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            write_in_txn(&mut table, key, value)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn delete_key(&self, def: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "record deleted");
        Ok(existed)
    }
}

/// Describe how `stored` differs from `expected` in the fields a
/// transition depends on, or `None` if they agree.
fn instance_drift(expected: &Instance, stored: &Instance) -> Option<String> {
    if stored.power_state != expected.power_state
        || stored.state_description != expected.state_description
    {
        return Some(format!(
            "state is {:?}/{:?}, expected {:?}/{:?}",
            stored.power_state,
            stored.state_description,
            expected.power_state,
            expected.state_description
        ));
    }
    if stored.host != expected.host {
        return Some(format!("host is {}, expected {}", stored.host, expected.host));
    }
    if stored.volumes != expected.volumes {
        return Some(format!(
            "volumes are {:?}, expected {:?}",
            stored.volumes, expected.volumes
        ));
    }
    None
}

/// Read and decode a record inside an open write transaction.
fn read_in_txn<T, R>(table: &R, kind: &'static str, key: &str) -> StateResult<T>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    let bytes = table
        .get(key)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value().to_vec())
        .ok_or_else(|| StateError::not_found(kind, key))?;
    serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))
}

fn write_in_txn<T: Serialize>(
    table: &mut redb::Table<'_, &'static str, &'static [u8]>,
    key: &str,
    value: &T,
) -> StateResult<()> {
    let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
    table
        .insert(key, bytes.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}
